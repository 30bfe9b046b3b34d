//! Tool registry - service discovery for replicated tool servers
//!
//! Tool servers come and go; the registry tracks who is alive per role and
//! the client picks a healthy endpoint on every stage entry.

pub mod client;
pub mod service;
pub mod types;

pub use client::{RegistryClient, HEARTBEAT_INTERVAL};
pub use service::RegistryService;
pub use types::{RegisterRequest, ToolDescriptor, ToolHealth};
