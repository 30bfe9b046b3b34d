//! Configuration types
//!
//! Every field has a serde default so a bare environment boots a usable
//! single-node setup (in-memory state store and bus, mock-less LLM client).

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::kb::ChunkerConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// LLM client configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// State store backend
    #[serde(default)]
    pub state_store: StateStoreConfig,
    /// Message bus backend
    #[serde(default)]
    pub bus: BusConfig,
    /// Tool registry location
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Embedding backend
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Saga budgets and worker sizing
    #[serde(default)]
    pub saga: SagaConfig,
    /// Semantic chunker parameters
    #[serde(default)]
    pub chunker: ChunkerConfig,
    /// Gateway HTTP surface
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// PostgreSQL backend (pgvector + saga state), if configured
    #[serde(default)]
    pub database: DatabaseConfig,
}

fn default_secret() -> SecretString {
    SecretString::from(String::new())
}

/// LLM client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key
    #[serde(skip_serializing, default = "default_secret")]
    pub api_key: SecretString,
    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Base URL of the chat completions API
    #[serde(default = "default_llm_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Use the deterministic mock client instead of the network
    #[serde(default)]
    pub mock: bool,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_llm_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            api_key: default_secret(),
            default_model: default_model(),
            base_url: default_llm_url(),
            timeout_secs: default_llm_timeout(),
            mock: false,
        }
    }
}

/// State store backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateStoreConfig {
    /// `memory://` or `postgres://...`
    #[serde(default = "default_memory_url")]
    pub url: String,
}

fn default_memory_url() -> String {
    "memory://".to_string()
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        StateStoreConfig {
            url: default_memory_url(),
        }
    }
}

/// Message bus backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// `memory://` (external brokers integrate behind the bus trait)
    #[serde(default = "default_memory_url")]
    pub url: String,
    /// Unacked deliveries become visible again after this many seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

fn default_visibility_timeout() -> u64 {
    60
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            url: default_memory_url(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

/// Tool registry location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the registry service
    #[serde(default = "default_registry_url")]
    pub url: String,
}

fn default_registry_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            url: default_registry_url(),
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// `fastembed` (local model) or `hash` (deterministic, for mock mode)
    #[serde(default = "default_embedding_backend")]
    pub backend: String,
}

fn default_embedding_backend() -> String {
    "fastembed".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            backend: default_embedding_backend(),
        }
    }
}

/// Saga budgets and worker sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaConfig {
    /// Tool-loop iteration bound
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Per-LLM-call timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,
    /// Per-tool-call timeout in seconds
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Stage wall-clock budget in seconds
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
    /// Whole-saga deadline in seconds
    #[serde(default = "default_saga_deadline")]
    pub deadline_secs: u64,
    /// Workers per stage topic
    #[serde(default = "default_workers")]
    pub workers_per_topic: usize,
}

fn default_max_iterations() -> u32 {
    8
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_stage_timeout() -> u64 {
    180
}

fn default_saga_deadline() -> u64 {
    300
}

fn default_workers() -> usize {
    2
}

impl Default for SagaConfig {
    fn default() -> Self {
        SagaConfig {
            max_iterations: default_max_iterations(),
            llm_timeout_secs: default_llm_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            stage_timeout_secs: default_stage_timeout(),
            deadline_secs: default_saga_deadline(),
            workers_per_topic: default_workers(),
        }
    }
}

impl SagaConfig {
    /// Budgets for one tool-loop invocation
    pub fn loop_config(&self) -> crate::agent::tool_loop::LoopConfig {
        crate::agent::tool_loop::LoopConfig {
            max_iterations: self.max_iterations,
            loop_timeout: std::time::Duration::from_secs(self.stage_timeout_secs),
            llm_timeout: std::time::Duration::from_secs(self.llm_timeout_secs),
            tool_timeout: std::time::Duration::from_secs(self.tool_timeout_secs),
            generation_options: crate::agent::types::GenerationOptions::precise(),
        }
    }

    /// The whole-saga deadline
    pub fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.deadline_secs)
    }
}

/// Gateway HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// PostgreSQL backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; unset means the in-memory backends are used
    #[serde(default)]
    pub url: Option<String>,
}
