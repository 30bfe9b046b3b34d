//! Retrieval-only question answering
//!
//! A synchronous, single-shot path beside the saga pipeline: embed the query,
//! pull the nearest chunks from the tenant collection, and synthesise an
//! answer with no tools. Shares the LLM client with the saga stages.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::agent::prompts::{render_retrieval_prompt, RETRIEVAL_SYSTEM_PROMPT};
use crate::agent::types::{GenerationOptions, Message};
use crate::agent::LlmProvider;
use crate::core::VectorStore;
use crate::error::{Error, Result};

use super::embedding::Embedder;

/// Nearest neighbours fed to the model
pub const TOP_K: usize = 4;

/// Answer plus the context passages it was grounded on
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalAnswer {
    pub answer: String,
    pub context: Vec<String>,
}

/// The retrieval-only Q&A service
pub struct RetrievalQa {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    provider: Arc<dyn LlmProvider>,
}

impl RetrievalQa {
    /// Create the service
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        RetrievalQa {
            embedder,
            vectors,
            provider,
        }
    }

    /// Answer a question from the tenant's knowledge base
    ///
    /// Fails with `NoContextAvailable` when the collection has nothing for
    /// this tenant.
    pub async fn ask(&self, tenant_id: &str, query: &str) -> Result<RetrievalAnswer> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self.vectors.search(tenant_id, &embedding, TOP_K).await?;

        if hits.is_empty() {
            return Err(Error::NoContextAvailable);
        }

        let context: Vec<String> = hits.into_iter().map(|h| h.chunk.text).collect();
        info!(
            "Answering for tenant {} with {} context passages",
            tenant_id,
            context.len()
        );

        let messages = vec![
            Message::system(RETRIEVAL_SYSTEM_PROMPT),
            Message::user(render_retrieval_prompt(query, &context)?),
        ];

        let response = self
            .provider
            .chat(messages, GenerationOptions::precise())
            .await?;
        let answer = response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(RetrievalAnswer { answer, context })
    }
}
