//! Knowledge-base ingestion pipeline
//!
//! A consumer on the ingest topic receives uploaded documents, extracts text
//! by extension, chunks semantically, batch-embeds the chunks, and upserts
//! them into the tenant's vector collection. Re-uploading a document replaces
//! its prior chunks.

use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::core::bus::MessageBus;
use crate::core::{KbChunk, VectorStore};
use crate::error::{Error, Result};

use super::chunker::{chunk_text, ChunkerConfig};
use super::embedding::Embedder;

/// Topic the ingestion consumer listens on
pub const TOPIC_KB_INGEST: &str = "kb.ingest";

/// An uploaded document travelling over the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Tenant whose collection receives the chunks
    pub tenant_id: String,
    /// Original filename; the extension selects the text extractor
    pub filename: String,
    /// Document bytes, base64-encoded
    pub doc_base64: String,
}

impl IngestRequest {
    /// Build a request, encoding the document bytes
    pub fn new(tenant_id: impl Into<String>, filename: impl Into<String>, bytes: &[u8]) -> Self {
        IngestRequest {
            tenant_id: tenant_id.into(),
            filename: filename.into(),
            doc_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Decode the document bytes
    pub fn bytes(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.doc_base64)
            .map_err(|e| Error::InvalidInput(format!("Invalid document encoding: {}", e)))
    }
}

/// The chunk-embed-upsert pipeline
pub struct IngestPipeline {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    chunker: ChunkerConfig,
}

impl IngestPipeline {
    /// Create a pipeline over an embedder and a vector store
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        chunker: ChunkerConfig,
    ) -> Self {
        IngestPipeline {
            embedder,
            vectors,
            chunker,
        }
    }

    /// Ingest one document; returns the number of chunks written
    pub async fn ingest(&self, tenant_id: &str, filename: &str, bytes: &[u8]) -> Result<usize> {
        let text = extract_text(filename, bytes)?;

        let chunk_texts = chunk_text(&text, self.embedder.as_ref(), &self.chunker).await?;
        if chunk_texts.is_empty() {
            info!("Document {} for {} produced no chunks", filename, tenant_id);
            return Ok(0);
        }

        let embeddings = self.embedder.embed_batch(chunk_texts.clone()).await?;

        let chunks: Vec<KbChunk> = chunk_texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(ordinal, (text, embedding))| {
                KbChunk::new(tenant_id, filename, text, embedding, ordinal)
            })
            .collect();
        let written = chunks.len();

        // Replace any prior version of this document.
        self.vectors.delete_doc(tenant_id, filename).await?;
        self.vectors.upsert(chunks).await?;

        info!(
            "Ingested {} into {} chunks for tenant {}",
            filename, written, tenant_id
        );
        Ok(written)
    }

    /// Consume the ingest topic forever
    pub async fn run_consumer(self: Arc<Self>, bus: Arc<dyn MessageBus>) {
        info!("KB ingestion consumer started");
        loop {
            let delivery = match bus.consume(TOPIC_KB_INGEST).await {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!("Consume on {} failed: {}", TOPIC_KB_INGEST, e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            let request: IngestRequest = match serde_json::from_value(delivery.payload.clone()) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Dropping malformed ingest message: {}", e);
                    delivery.ack().await;
                    continue;
                }
            };

            let outcome = match request.bytes() {
                Ok(bytes) => {
                    self.ingest(&request.tenant_id, &request.filename, &bytes)
                        .await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(_) => delivery.ack().await,
                Err(e) if e.is_retryable() => {
                    warn!("Ingest of {} failed transiently: {}", request.filename, e);
                    delivery.nack(std::time::Duration::from_secs(5)).await;
                }
                Err(e) => {
                    // Bad input never gets better; drop it.
                    warn!("Ingest of {} failed: {}", request.filename, e);
                    delivery.ack().await;
                }
            }
        }
    }
}

/// Extract text from document bytes, keyed by filename extension
fn extract_text(filename: &str, bytes: &[u8]) -> Result<String> {
    let extension = filename
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "txt" | "md" | "markdown" | "csv" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(Error::InvalidInput(format!(
            "Unsupported file type '.{}' (expected .txt, .md, or .csv)",
            other
        ))),
    }
}
