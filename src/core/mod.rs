//! Core abstractions - traits for the engine's external collaborators
//!
//! The saga engine is defined against abstract collaborators rather than
//! concrete services:
//!
//! - `StateStore`: key-value storage with TTL (saga records)
//! - `MessageBus`: topic-based fan-out with durable queues (stage hand-off)
//! - `VectorStore`: embedding-indexed tenant collections (knowledge base)
//!
//! Each trait ships with an in-memory implementation used by tests and
//! single-node deployments. Networked backends implement the same traits
//! (see `database` for the PostgreSQL-backed store implementations).

pub mod bus;
pub mod store;
pub mod vector;

pub use bus::{Delivery, MemoryBus, MessageBus, StageEnvelope};
pub use store::{MemoryStateStore, StateStore};
pub use vector::{cosine_similarity, KbChunk, MemoryVectorStore, ScoredChunk, VectorStore};
