//! HTTP client for tool servers
//!
//! Tool servers are replicated network services; the registry resolves a role
//! to a live endpoint and this client speaks the JSON-RPC protocol to it.
//! Requests are POSTed to the endpoint's `/rpc` path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::protocol::{McpRequest, McpResponse, McpTool, McpToolResult};
use crate::error::{Error, Result};

/// HTTP JSON-RPC client for tool servers
#[derive(Clone)]
pub struct McpHttpClient {
    client: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl McpHttpClient {
    /// Create a client with the given per-call timeout
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(McpHttpClient {
            client,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Send a request to a tool server endpoint
    async fn send_request(&self, endpoint: &str, request: McpRequest) -> Result<McpResponse> {
        let url = format!("{}/rpc", endpoint.trim_end_matches('/'));

        debug!("Tool request -> {}: {}", url, request.method);

        let response: McpResponse = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(ref err) = response.error {
            return Err(Error::Internal(format!(
                "Tool server error from {}: {} (code {})",
                endpoint, err.message, err.code
            )));
        }

        Ok(response)
    }

    /// List the tools a server exposes
    pub async fn list_tools(&self, endpoint: &str) -> Result<Vec<McpTool>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self.send_request(endpoint, McpRequest::list_tools(id)).await?;

        let result = response.result.unwrap_or_default();
        let tools: Vec<McpTool> = result
            .get("tools")
            .and_then(|t| serde_json::from_value(t.clone()).ok())
            .unwrap_or_default();

        debug!("Tool server {} exposes {} tools", endpoint, tools.len());
        Ok(tools)
    }

    /// Call a tool on a server
    pub async fn call_tool(
        &self,
        endpoint: &str,
        name: &str,
        arguments: Value,
    ) -> Result<McpToolResult> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self
            .send_request(endpoint, McpRequest::call_tool(id, name, arguments))
            .await?;

        let result = response.result.unwrap_or_default();
        let tool_result: McpToolResult = serde_json::from_value(result)
            .map_err(|e| Error::InvalidInput(format!("Malformed tool result: {}", e)))?;

        if tool_result.is_error {
            warn!("Tool {} on {} returned an error payload", name, endpoint);
        }

        Ok(tool_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_call_tool_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "content": [{"type": "text", "text": "| id |\n| 1 |"}],
                    "isError": false
                }
            })))
            .mount(&server)
            .await;

        let client = McpHttpClient::new(std::time::Duration::from_secs(30)).unwrap();
        let result = client
            .call_tool(&server.uri(), "execute_sql", serde_json::json!({"sql": "SELECT 1"}))
            .await
            .unwrap();

        assert!(!result.is_error);
        assert!(result.text().contains("| id |"));
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32601, "message": "method not found"}
            })))
            .mount(&server)
            .await;

        let client = McpHttpClient::new(std::time::Duration::from_secs(30)).unwrap();
        let result = client.list_tools(&server.uri()).await;
        assert!(result.is_err());
    }
}
