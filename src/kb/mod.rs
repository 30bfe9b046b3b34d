//! Knowledge base - ingestion, embeddings, and retrieval
//!
//! - `embedding`: embedder trait, fastembed backend, cache, hash embedder
//! - `chunker`: sentence splitting and running-centroid semantic chunking
//! - `ingest`: the upload consumer (extract, chunk, embed, upsert)
//! - `qa`: retrieval-only question answering

pub mod chunker;
pub mod embedding;
pub mod ingest;
pub mod qa;

pub use chunker::{chunk_text, split_sentences, ChunkerConfig};
pub use embedding::{CachedEmbedder, Embedder, FastEmbedder, HashEmbedder};
pub use ingest::{IngestPipeline, IngestRequest, TOPIC_KB_INGEST};
pub use qa::{RetrievalAnswer, RetrievalQa, TOP_K};
