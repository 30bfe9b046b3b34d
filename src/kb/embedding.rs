//! Embedding generation
//!
//! `FastEmbedder` wraps a local fastembed model (bge-base-en-v1.5, 768
//! dimensions, auto-downloads on first use); inference runs on the blocking
//! pool. `CachedEmbedder` puts a moka TTL cache in front of any embedder.
//! `HashEmbedder` is a deterministic bag-of-words embedder for mock mode and
//! tests, where downloading a model is unwanted.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use moka::future::Cache;

use crate::error::{Error, Result};

/// Abstract interface for text embedding
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts in one call
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embedding dimension, fixed per embedder
    fn dimensions(&self) -> usize;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("No embedding returned".into()))
    }
}

/// Local embedding service wrapping fastembed
#[derive(Clone)]
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
}

impl FastEmbedder {
    /// Create a new embedding service with bge-base-en-v1.5
    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::BGEBaseENV15).with_show_download_progress(true),
        )
        .map_err(|e| Error::Internal(format!("Failed to init embedding model: {}", e)))?;

        Ok(FastEmbedder {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let model = self.model.clone();

        tokio::task::spawn_blocking(move || {
            model
                .embed(texts, None)
                .map_err(|e| Error::Internal(format!("Batch embedding error: {}", e)))
        })
        .await
        .map_err(|e| Error::Internal(format!("Embedding task join error: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        768
    }
}

/// Cache key helper: hash a string to u64
fn hash_key(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// TTL cache in front of another embedder
///
/// Misses within a batch still go out as a single call.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Cache<u64, Vec<f32>>,
}

impl CachedEmbedder {
    /// Wrap an embedder with a 30-minute, 10k-entry cache
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        CachedEmbedder {
            inner,
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(30 * 60))
                .build(),
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<(usize, String)> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(&hash_key(text)).await {
                Some(hit) => results.push(Some(hit)),
                None => {
                    results.push(None);
                    misses.push((i, text.clone()));
                }
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<String> = misses.iter().map(|(_, t)| t.clone()).collect();
            let embedded = self.inner.embed_batch(miss_texts).await?;

            for ((index, text), embedding) in misses.into_iter().zip(embedded) {
                self.cache.insert(hash_key(&text), embedding.clone()).await;
                results[index] = Some(embedding);
            }
        }

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| Error::Internal("embedding miss not filled".into())))
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Deterministic bag-of-words embedder
///
/// Each lowercase word hashes into one of `dims` buckets; the vector counts
/// bucket hits. Texts sharing vocabulary come out similar, disjoint topics
/// come out near-orthogonal. No model download, fully reproducible.
#[derive(Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    /// Create a hash embedder with the given dimension
    pub fn new(dims: usize) -> Self {
        HashEmbedder { dims }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = (hash_key(&word.to_lowercase()) as usize) % self.dims;
            v[bucket] += 1.0;
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
