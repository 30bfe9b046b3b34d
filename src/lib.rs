//! # SQLSight
//!
//! An agentic SQL insight engine: answers natural-language questions about a
//! tenant's relational database by orchestrating a durable, multi-stage saga.
//!
//! ## Architecture
//!
//! - **Core traits** (`core`): abstract collaborators - state store, message
//!   bus, vector store - with in-memory implementations
//! - **Agent** (`agent`): LLM wire types, providers, and the bounded
//!   tool-calling loop
//! - **Tools** (`tools`): the stage tool catalogue; remote tools resolve
//!   through the registry and speak the tool protocol
//! - **Tool protocol** (`mcp`): JSON-RPC framing for replicated tool servers
//! - **Registry** (`registry`): service discovery with heartbeats, health
//!   probes, and stale-entry sweeping
//! - **Saga** (`saga`): record model, locked state store, safety gate, stage
//!   workers, orchestrator
//! - **Knowledge base** (`kb`): semantic chunker, embedders, ingestion
//!   pipeline, retrieval-only Q&A
//! - **Database** (`database`): PostgreSQL + pgvector backends for the core
//!   traits
//! - **Gateway** (`gateway`): the HTTP façade (submit/poll, uploads, KB ask)
//!
//! ## Design principles
//!
//! 1. **State lives outside workers**: a stage worker holds nothing between
//!    bus messages; the saga record is the single source of truth
//! 2. **At-least-once everywhere**: publishes happen before acks and every
//!    stage is idempotent against redelivery
//! 3. **Models can be wrong**: tool errors feed back into the conversation,
//!    generated SQL passes a read-only gate, and execution failures get one
//!    reflected retry

// Core abstractions (collaborator traits and in-memory implementations)
pub mod core;

// Agent logic and LLM interaction
pub mod agent;

// Modular configuration
pub mod config;

// PostgreSQL backends
pub mod database;

// Knowledge base: chunking, embeddings, ingestion, retrieval
pub mod kb;

// Error types
pub mod error;

// Gateway HTTP surface
pub mod gateway;

// Tool server protocol
pub mod mcp;

// Tool registry (service discovery)
pub mod registry;

// Saga engine
pub mod saga;

// Stage tools
pub mod tools;

// Re-export commonly used items
pub use error::{Error, Result};

pub use agent::{LlmProvider, MockLlmClient, OpenRouterClient};
pub use crate::core::{MessageBus, StateStore, VectorStore};
pub use saga::{SagaRecord, SagaStatus, SagaStore, StageContext};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
