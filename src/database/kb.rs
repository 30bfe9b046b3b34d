//! pgvector-backed vector store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::FromRow;
use uuid::Uuid;

use crate::core::{KbChunk, ScoredChunk, VectorStore};
use crate::error::Result;

use super::PostgresPool;

/// Vector store backed by PostgreSQL + pgvector
#[derive(Clone)]
pub struct PgVectorStore {
    pool: PostgresPool,
}

impl PgVectorStore {
    /// Create a store over a connection pool
    pub fn new(pool: PostgresPool) -> Self {
        PgVectorStore { pool }
    }
}

#[derive(FromRow)]
struct ChunkRow {
    chunk_id: Uuid,
    tenant_id: String,
    source_doc: String,
    ordinal: i32,
    content: String,
    similarity: f32,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn upsert(&self, chunks: Vec<KbChunk>) -> Result<()> {
        for chunk in chunks {
            let embedding = Vector::from(chunk.embedding);
            sqlx::query(
                r#"
                INSERT INTO kb_chunks (chunk_id, tenant_id, source_doc, ordinal, content, embedding)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (chunk_id) DO UPDATE SET
                    content = EXCLUDED.content,
                    embedding = EXCLUDED.embedding,
                    ordinal = EXCLUDED.ordinal
            "#,
            )
            .bind(chunk.chunk_id)
            .bind(&chunk.tenant_id)
            .bind(&chunk.source_doc)
            .bind(chunk.ordinal as i32)
            .bind(&chunk.text)
            .bind(embedding)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn delete_doc(&self, tenant_id: &str, source_doc: &str) -> Result<()> {
        sqlx::query("DELETE FROM kb_chunks WHERE tenant_id = $1 AND source_doc = $2")
            .bind(tenant_id)
            .bind(source_doc)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        tenant_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let query_embedding = Vector::from(embedding.to_vec());

        let rows: Vec<ChunkRow> = sqlx::query_as(
            r#"
            SELECT
                chunk_id, tenant_id, source_doc, ordinal, content, created_at,
                1 - (embedding <=> $1) as similarity
            FROM kb_chunks
            WHERE tenant_id = $2 AND embedding IS NOT NULL
            ORDER BY embedding <=> $1
            LIMIT $3
        "#,
        )
        .bind(&query_embedding)
        .bind(tenant_id)
        .bind(top_k as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ScoredChunk {
                score: r.similarity,
                chunk: KbChunk {
                    chunk_id: r.chunk_id,
                    tenant_id: r.tenant_id,
                    source_doc: r.source_doc,
                    text: r.content,
                    // The query does not need the stored vector back.
                    embedding: Vec::new(),
                    ordinal: r.ordinal as usize,
                },
            })
            .collect())
    }

    async fn count(&self, tenant_id: &str) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM kb_chunks WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}
