//! Vector store trait - embedding-indexed tenant collections
//!
//! Knowledge-base chunks are scoped by tenant; membership in the tenant's
//! collection is the sole access control. Search is cosine top-k.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// A knowledge-base chunk with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbChunk {
    /// Unique chunk ID
    pub chunk_id: Uuid,
    /// Tenant that owns the chunk
    pub tenant_id: String,
    /// Source document filename
    pub source_doc: String,
    /// Chunk text
    pub text: String,
    /// Embedding vector (dimension fixed per embedder)
    pub embedding: Vec<f32>,
    /// Position of the chunk within its source document
    pub ordinal: usize,
}

impl KbChunk {
    /// Create a chunk with a fresh ID
    pub fn new(
        tenant_id: impl Into<String>,
        source_doc: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
        ordinal: usize,
    ) -> Self {
        KbChunk {
            chunk_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            source_doc: source_doc.into(),
            text: text.into(),
            embedding,
            ordinal,
        }
    }
}

/// A search hit with its similarity score
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The matching chunk
    pub chunk: KbChunk,
    /// Cosine similarity to the query (higher is more similar)
    pub score: f32,
}

/// Abstract interface for embedding-indexed storage
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace chunks
    async fn upsert(&self, chunks: Vec<KbChunk>) -> Result<()>;

    /// Remove all chunks of a source document within a tenant collection
    async fn delete_doc(&self, tenant_id: &str, source_doc: &str) -> Result<()>;

    /// Top-k nearest chunks in the tenant collection
    async fn search(
        &self,
        tenant_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Number of chunks in the tenant collection
    async fn count(&self, tenant_id: &str) -> Result<u64>;
}

/// Cosine similarity between two vectors
///
/// Zero-norm vectors (and mismatched lengths) score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// In-process vector store (brute-force cosine scan)
#[derive(Clone, Default)]
pub struct MemoryVectorStore {
    chunks: std::sync::Arc<tokio::sync::RwLock<Vec<KbChunk>>>,
}

impl MemoryVectorStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, mut new_chunks: Vec<KbChunk>) -> Result<()> {
        let mut chunks = self.chunks.write().await;
        chunks.retain(|c| !new_chunks.iter().any(|n| n.chunk_id == c.chunk_id));
        chunks.append(&mut new_chunks);
        Ok(())
    }

    async fn delete_doc(&self, tenant_id: &str, source_doc: &str) -> Result<()> {
        let mut chunks = self.chunks.write().await;
        chunks.retain(|c| !(c.tenant_id == tenant_id && c.source_doc == source_doc));
        Ok(())
    }

    async fn search(
        &self,
        tenant_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let chunks = self.chunks.read().await;

        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .map(|c| ScoredChunk {
                score: cosine_similarity(&c.embedding, embedding),
                chunk: c.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn count(&self, tenant_id: &str) -> Result<u64> {
        let chunks = self.chunks.read().await;
        Ok(chunks.iter().filter(|c| c.tenant_id == tenant_id).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_is_tenant_scoped() {
        let store = MemoryVectorStore::new();
        store
            .upsert(vec![
                KbChunk::new("acme", "a.md", "alpha", vec![1.0, 0.0], 0),
                KbChunk::new("globex", "b.md", "beta", vec![1.0, 0.0], 0),
            ])
            .await
            .unwrap();

        let hits = store.search("acme", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "alpha");
        assert_eq!(store.count("globex").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_doc_replaces_prior_chunks() {
        let store = MemoryVectorStore::new();
        store
            .upsert(vec![
                KbChunk::new("acme", "a.md", "v1 chunk", vec![1.0, 0.0], 0),
                KbChunk::new("acme", "a.md", "v1 chunk 2", vec![0.0, 1.0], 1),
            ])
            .await
            .unwrap();

        store.delete_doc("acme", "a.md").await.unwrap();
        store
            .upsert(vec![KbChunk::new("acme", "a.md", "v2", vec![1.0, 0.0], 0)])
            .await
            .unwrap();

        assert_eq!(store.count("acme").await.unwrap(), 1);
        let hits = store.search("acme", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits[0].chunk.text, "v2");
    }
}
