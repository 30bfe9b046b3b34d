//! Semantic chunker
//!
//! Splits a document into sentences, embeds them all in one batch, and walks
//! the sequence keeping a running centroid of the open chunk. A sentence that
//! would blow the size bound, or whose similarity to the centroid drops below
//! the threshold (a topic shift), closes the chunk.
//!
//! The running state is `(sum_vector, count)`; the centroid is computed as
//! `sum / count` at comparison time, so repeated appends do not accumulate
//! rounding error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::core::cosine_similarity;
use crate::error::Result;

use super::embedding::Embedder;

/// Chunking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Maximum chunk length in characters
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    /// Minimum cosine similarity to the centroid to keep appending
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

fn default_max_chunk_size() -> usize {
    1000
}

fn default_similarity_threshold() -> f32 {
    0.5
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            max_chunk_size: default_max_chunk_size(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// Split text into sentences on a terminator (`.?!`) followed by whitespace
pub fn split_sentences(text: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[.?!]+\s+").expect("sentence regex"));

    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in re.find_iter(text) {
        // Keep the terminator run, drop the whitespace.
        let terminators = boundary
            .as_str()
            .find(char::is_whitespace)
            .unwrap_or(boundary.len());
        let sentence = text[start..boundary.start() + terminators].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = boundary.end();
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

/// Running state of the open chunk
struct OpenChunk {
    text: String,
    sum: Vec<f32>,
    count: usize,
}

impl OpenChunk {
    fn start(sentence: &str, embedding: &[f32]) -> Self {
        OpenChunk {
            text: sentence.to_string(),
            sum: embedding.to_vec(),
            count: 1,
        }
    }

    fn centroid(&self) -> Vec<f32> {
        self.sum.iter().map(|x| x / self.count as f32).collect()
    }

    fn append(&mut self, sentence: &str, embedding: &[f32]) {
        self.text.push(' ');
        self.text.push_str(sentence);
        for (acc, x) in self.sum.iter_mut().zip(embedding) {
            *acc += x;
        }
        self.count += 1;
    }

    fn would_exceed(&self, sentence: &str, max_chunk_size: usize) -> bool {
        self.text.len() + 1 + sentence.len() > max_chunk_size
    }
}

/// Chunk a document semantically
///
/// All sentences are embedded in a single batch call. Returns chunk texts in
/// document order; every sentence lands in exactly one chunk.
pub async fn chunk_text(
    text: &str,
    embedder: &dyn Embedder,
    config: &ChunkerConfig,
) -> Result<Vec<String>> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Ok(vec![]);
    }

    let embeddings = embedder.embed_batch(sentences.clone()).await?;

    let mut chunks: Vec<String> = Vec::new();
    let mut open = OpenChunk::start(&sentences[0], &embeddings[0]);

    for (sentence, embedding) in sentences.iter().zip(embeddings.iter()).skip(1) {
        if open.would_exceed(sentence, config.max_chunk_size) {
            chunks.push(std::mem::replace(
                &mut open,
                OpenChunk::start(sentence, embedding),
            ).text);
            continue;
        }

        // Zero-norm embeddings score 0 and force a split.
        let similarity = cosine_similarity(&open.centroid(), embedding);
        if similarity < config.similarity_threshold {
            chunks.push(std::mem::replace(
                &mut open,
                OpenChunk::start(sentence, embedding),
            ).text);
        } else {
            open.append(sentence, embedding);
        }
    }

    chunks.push(open.text);
    Ok(chunks)
}
