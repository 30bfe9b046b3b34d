//! Tools the model can call during a stage
//!
//! The local `check_relevance` tool records a verdict in-process; everything
//! that touches tenant data (schema discovery, SQL execution, knowledge-base
//! search) lives on remote tool servers resolved through the registry.

pub mod relevance;
pub mod remote;
pub mod set;
pub mod traits;

pub use relevance::{RelevanceTool, RelevanceVerdict, VerdictSlot};
pub use remote::{
    RemoteTool, RemoteToolClient, ToolDispatcher, ROLE_DATABASE, ROLE_KNOWLEDGE_BASE,
};
pub use set::ToolSet;
pub use traits::{validate_args, Tool, ToolCall, ToolResult};
