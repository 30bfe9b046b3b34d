//! Tool server protocol (JSON-RPC over HTTP)

pub mod client;
pub mod protocol;

pub use client::McpHttpClient;
pub use protocol::{McpContent, McpError, McpRequest, McpResponse, McpTool, McpToolResult};
