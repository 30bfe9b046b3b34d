//! Remote tools dispatched through the registry
//!
//! Schema discovery, SQL execution, and knowledge-base search are served by
//! replicated tool servers. A tool call resolves its role to a live endpoint
//! and goes out over the JSON-RPC protocol; the tenant id is injected into
//! every call so servers scope their work.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::traits::{Tool, ToolResult};
use crate::error::Result;
use crate::mcp::{McpHttpClient, McpToolResult};
use crate::registry::RegistryClient;

/// Role under which tenant database tool servers register
pub const ROLE_DATABASE: &str = "database";
/// Role under which knowledge-base tool servers register
pub const ROLE_KNOWLEDGE_BASE: &str = "knowledge-base";

/// Resolves a role to a live endpoint and dispatches one tool call
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Dispatch `tool` with `args` to a healthy server of `role`
    async fn call(&self, role: &str, tool: &str, args: Value) -> Result<McpToolResult>;
}

/// Production dispatcher: registry resolution + JSON-RPC over HTTP
pub struct RemoteToolClient {
    registry: Arc<RegistryClient>,
    mcp: McpHttpClient,
}

impl RemoteToolClient {
    /// Create a dispatcher over a registry client and a tool-protocol client
    pub fn new(registry: Arc<RegistryClient>, mcp: McpHttpClient) -> Self {
        RemoteToolClient { registry, mcp }
    }
}

#[async_trait]
impl ToolDispatcher for RemoteToolClient {
    async fn call(&self, role: &str, tool: &str, args: Value) -> Result<McpToolResult> {
        let endpoint = self.registry.resolve(role).await?;
        self.mcp.call_tool(&endpoint, tool, args).await
    }
}

/// A tool whose handler lives on a remote tool server
pub struct RemoteTool {
    dispatcher: Arc<dyn ToolDispatcher>,
    role: &'static str,
    name: &'static str,
    description: &'static str,
    schema: Value,
    tenant_id: String,
}

impl RemoteTool {
    /// `list_tables` on the tenant database server
    pub fn list_tables(dispatcher: Arc<dyn ToolDispatcher>, tenant_id: impl Into<String>) -> Self {
        RemoteTool {
            dispatcher,
            role: ROLE_DATABASE,
            name: "list_tables",
            description: "List the tables available in the tenant's database.",
            schema: json!({"type": "object", "properties": {}}),
            tenant_id: tenant_id.into(),
        }
    }

    /// `describe_table` on the tenant database server
    pub fn describe_table(
        dispatcher: Arc<dyn ToolDispatcher>,
        tenant_id: impl Into<String>,
    ) -> Self {
        RemoteTool {
            dispatcher,
            role: ROLE_DATABASE,
            name: "describe_table",
            description: "Describe the columns and types of one table.",
            schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Table name"}
                },
                "required": ["name"]
            }),
            tenant_id: tenant_id.into(),
        }
    }

    /// `search_knowledge_base` on the knowledge-base server
    pub fn search_knowledge_base(
        dispatcher: Arc<dyn ToolDispatcher>,
        tenant_id: impl Into<String>,
    ) -> Self {
        RemoteTool {
            dispatcher,
            role: ROLE_KNOWLEDGE_BASE,
            name: "search_knowledge_base",
            description:
                "Search the tenant's knowledge base for business definitions and terminology.",
            schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"}
                },
                "required": ["query"]
            }),
            tenant_id: tenant_id.into(),
        }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, mut args: Value) -> Result<ToolResult> {
        if let Some(obj) = args.as_object_mut() {
            obj.insert("tenant_id".to_string(), json!(self.tenant_id));
        }

        match self.dispatcher.call(self.role, self.name, args).await {
            Ok(result) if result.is_error => Ok(ToolResult::failure(result.text())),
            Ok(result) => Ok(ToolResult::reply(result.text())),
            Err(e) => Ok(ToolResult::failure(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::McpContent;
    use tokio::sync::Mutex;

    /// Records calls and replies with a fixed payload.
    pub(crate) struct FakeDispatcher {
        pub calls: Mutex<Vec<(String, String, Value)>>,
        pub reply: McpToolResult,
    }

    impl FakeDispatcher {
        pub(crate) fn replying(text: &str, is_error: bool) -> Self {
            FakeDispatcher {
                calls: Mutex::new(Vec::new()),
                reply: McpToolResult {
                    content: vec![McpContent {
                        content_type: "text".into(),
                        text: Some(text.into()),
                    }],
                    is_error,
                },
            }
        }
    }

    #[async_trait]
    impl ToolDispatcher for FakeDispatcher {
        async fn call(&self, role: &str, tool: &str, args: Value) -> Result<McpToolResult> {
            self.calls
                .lock()
                .await
                .push((role.into(), tool.into(), args));
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_tenant_id_is_injected() {
        let dispatcher = Arc::new(FakeDispatcher::replying("orders, products", false));
        let tool = RemoteTool::list_tables(dispatcher.clone(), "acme");

        let result = tool.execute(json!({})).await.unwrap();
        assert!(result.succeeded());
        assert_eq!(result.for_model(), "orders, products");

        let calls = dispatcher.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, ROLE_DATABASE);
        assert_eq!(calls[0].1, "list_tables");
        assert_eq!(calls[0].2["tenant_id"], "acme");
    }

    #[tokio::test]
    async fn test_error_payload_becomes_tool_failure() {
        let dispatcher = Arc::new(FakeDispatcher::replying("relation does not exist", true));
        let tool = RemoteTool::describe_table(dispatcher, "acme");

        let result = tool.execute(json!({"name": "ghosts"})).await.unwrap();
        assert!(!result.succeeded());
        assert!(result.for_model().contains("relation does not exist"));
    }

    #[tokio::test]
    async fn test_dispatch_error_is_reported_not_raised() {
        struct DownDispatcher;

        #[async_trait]
        impl ToolDispatcher for DownDispatcher {
            async fn call(&self, role: &str, _tool: &str, _args: Value) -> Result<McpToolResult> {
                Err(crate::Error::NoLiveTool(role.to_string()))
            }
        }

        let tool = RemoteTool::search_knowledge_base(Arc::new(DownDispatcher), "acme");
        let result = tool.execute(json!({"query": "revenue"})).await.unwrap();
        assert!(!result.succeeded());
        assert!(result.for_model().contains("No live tool"));
    }
}
