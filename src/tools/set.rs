//! Tool set - the catalogue of tools offered to one loop invocation

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::types::ToolDefinition;
use crate::error::Result;

use super::traits::{validate_args, Tool, ToolCall, ToolResult};

/// The tool catalogue for a stage
///
/// Arguments are validated against each tool's schema before dispatch;
/// mismatches come back as tool failures for the model to correct, never as
/// loop-level errors.
#[derive(Default)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    /// Create a new empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Register an already-shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Execute a tool call, validating its arguments first
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
        let Some(tool) = self.get(&call.name) else {
            return Ok(ToolResult::failure(format!("Unknown tool: {}", call.name)));
        };

        if let Err(reason) = validate_args(&tool.parameters_schema(), &call.arguments) {
            return Ok(ToolResult::failure(format!(
                "Invalid arguments for {}: {}",
                call.name, reason
            )));
        }

        tool.execute(call.arguments.clone()).await
    }

    /// Get tool count
    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// List tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercases text"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }
        async fn execute(&self, args: Value) -> Result<ToolResult> {
            Ok(ToolResult::reply(
                args["text"].as_str().unwrap_or_default().to_uppercase(),
            ))
        }
    }

    #[tokio::test]
    async fn test_execute_known_tool() {
        let mut set = ToolSet::new();
        set.register(UpperTool);

        let result = set
            .execute(&ToolCall {
                id: "1".into(),
                name: "upper".into(),
                arguments: json!({"text": "abc"}),
            })
            .await
            .unwrap();
        assert_eq!(result.for_model(), "ABC");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_failure_result() {
        let set = ToolSet::new();
        let result = set
            .execute(&ToolCall {
                id: "1".into(),
                name: "nope".into(),
                arguments: json!({}),
            })
            .await
            .unwrap();
        assert!(!result.succeeded());
        assert!(result.for_model().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_a_failure_result() {
        let mut set = ToolSet::new();
        set.register(UpperTool);

        let result = set
            .execute(&ToolCall {
                id: "1".into(),
                name: "upper".into(),
                arguments: json!({"text": 42}),
            })
            .await
            .unwrap();
        assert!(!result.succeeded());
        assert!(result.for_model().contains("Invalid arguments"));
    }
}
