//! PostgreSQL backends
//!
//! Optional networked implementations of the core collaborator traits:
//! `PgVectorStore` (pgvector-indexed KB chunks) and `PgStateStore` (JSONB
//! rows with TTL semantics). Selected when `DATABASE_URL` is configured.

pub mod kb;
pub mod state;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};

pub use kb::PgVectorStore;
pub use state::PgStateStore;

/// PostgreSQL connection pool type alias
pub type PostgresPool = PgPool;

/// Initialize the PostgreSQL connection pool
pub async fn init_pool(url: &str) -> Result<PostgresPool> {
    info!("Initializing PostgreSQL connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await?;

    verify_database(&pool).await?;

    info!("PostgreSQL connection pool initialized");
    Ok(pool)
}

/// Verify the connection and the pgvector extension
async fn verify_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;

    let result: Option<(String,)> =
        sqlx::query_as("SELECT extname FROM pg_extension WHERE extname = 'vector'")
            .fetch_optional(pool)
            .await?;

    if result.is_none() {
        return Err(Error::Database(sqlx::Error::Configuration(
            "pgvector extension is not installed. Run: CREATE EXTENSION vector;".into(),
        )));
    }

    Ok(())
}

/// Database migrations
pub mod migrations {
    use super::*;
    use tracing::warn;

    /// Run all migrations
    pub async fn run(pool: &PgPool) -> Result<()> {
        info!("Running database migrations");

        match sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(pool)
            .await
        {
            Ok(_) => info!("pgvector extension enabled"),
            Err(e) => {
                warn!("Could not create pgvector extension: {}. Vector features may not work.", e);
            }
        }

        // Knowledge-base chunks, one row per chunk
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kb_chunks (
                chunk_id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                source_doc TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding vector(768),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await?;

        // Saga (and other) state as JSONB with TTL semantics
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_state (
                key TEXT PRIMARY KEY,
                value JSONB NOT NULL,
                expires_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kb_chunks_tenant ON kb_chunks(tenant_id)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kb_chunks_doc ON kb_chunks(tenant_id, source_doc)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kv_state_expiry ON kv_state(expires_at)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_kb_chunks_embedding ON kb_chunks
            USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)
        "#,
        )
        .execute(pool)
        .await
        .ok(); // Ignore if not enough data or vector type not available

        info!("Database migrations completed");
        Ok(())
    }
}
