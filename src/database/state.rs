//! PostgreSQL-backed state store

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::core::StateStore;
use crate::error::Result;

use super::PostgresPool;

/// State store backed by a JSONB table with `expires_at` TTL semantics
///
/// Expired rows are invisible to reads immediately; `sweep` compacts them on
/// a periodic tick.
#[derive(Clone)]
pub struct PgStateStore {
    pool: PostgresPool,
}

impl PgStateStore {
    /// Create a store over a connection pool
    pub fn new(pool: PostgresPool) -> Self {
        PgStateStore { pool }
    }

    /// Delete expired rows, returning how many were dropped
    pub async fn sweep(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv_state WHERE expires_at IS NOT NULL AND expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let ttl_secs = ttl.map(|d| d.as_secs() as i64);
        sqlx::query(
            r#"
            INSERT INTO kv_state (key, value, expires_at, updated_at)
            VALUES ($1, $2, CASE WHEN $3::BIGINT IS NULL THEN NULL ELSE NOW() + make_interval(secs => $3) END, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
        "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row: Option<(Value,)> = sqlx::query_as(
            "SELECT value FROM kv_state WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_state WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
