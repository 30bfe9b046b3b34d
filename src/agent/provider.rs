//! LLM provider trait - abstract interface for chat backends
//!
//! The engine never names a vendor; stage workers and the retrieval path talk
//! to this trait. Production wires in the OpenRouter-compatible HTTP client,
//! tests and `MOCK_LLM` deployments wire in the deterministic mock.

use async_trait::async_trait;

use crate::agent::types::{ChatCompletionResponse, GenerationOptions, Message, ToolDefinition};
use crate::error::Result;

/// Abstract interface for text generation with tool calling
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response without tools
    async fn chat(
        &self,
        messages: Vec<Message>,
        options: GenerationOptions,
    ) -> Result<ChatCompletionResponse>;

    /// Generate a response with a tool catalogue offered to the model
    async fn chat_with_tools(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: GenerationOptions,
    ) -> Result<ChatCompletionResponse>;
}
