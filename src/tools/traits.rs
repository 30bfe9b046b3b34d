//! The tool contract for stage catalogues
//!
//! A stage offers the model a small catalogue of tools. Each tool declares a
//! JSON schema for its arguments, and the catalogue checks every call against
//! that schema before dispatch (`validate_args`), so a malformed call comes
//! back to the model as failure text rather than aborting the loop. A tool
//! can also end the loop outright: a `ToolResult::Final` reply becomes the
//! loop's answer, which is how the relevance verdict stops stage 1 the
//! moment the model declares a question unanswerable.

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::types::{FunctionDefinition, ToolDefinition};
use crate::error::Result;

/// A capability the model may invoke during a stage
///
/// Implementations range from purely local (the relevance verdict) to fully
/// remote (schema discovery and SQL execution behind the registry). The loop
/// treats them identically: validate, dispatch, feed the reply back.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name under which the catalogue offers this tool to the model
    fn name(&self) -> &str;

    /// One-line purpose statement shown to the model
    fn description(&self) -> &str;

    /// JSON Schema the arguments must satisfy
    fn parameters_schema(&self) -> Value;

    /// Run against arguments that already passed schema validation
    async fn execute(&self, args: Value) -> Result<ToolResult>;

    /// The chat-API entry advertising this tool
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.parameters_schema(),
            },
        }
    }
}

/// What a tool call produced
///
/// Failures are data, not errors: the model reads the failure text and gets
/// to try again. Only the loop's own budgets can abort an invocation.
#[derive(Debug, Clone)]
pub enum ToolResult {
    /// Normal reply, fed back to the model as a tool message
    Reply(String),
    /// Reply that also ends the loop, becoming its final answer
    Final(String),
    /// Failure text the model sees and may self-correct from
    Failed(String),
}

impl ToolResult {
    /// A normal reply
    pub fn reply(text: impl Into<String>) -> Self {
        ToolResult::Reply(text.into())
    }

    /// A reply that halts the loop
    pub fn halting(text: impl Into<String>) -> Self {
        ToolResult::Final(text.into())
    }

    /// A failure
    pub fn failure(text: impl Into<String>) -> Self {
        ToolResult::Failed(text.into())
    }

    /// Whether the call did what was asked
    pub fn succeeded(&self) -> bool {
        !matches!(self, ToolResult::Failed(_))
    }

    /// Whether the loop should stop and adopt this reply as its answer
    pub fn halts_loop(&self) -> bool {
        matches!(self, ToolResult::Final(_))
    }

    /// The text that goes into the conversation
    pub fn for_model(&self) -> String {
        match self {
            ToolResult::Reply(text) | ToolResult::Final(text) => text.clone(),
            ToolResult::Failed(text) => format!("Error: {}", text),
        }
    }
}

/// One tool invocation requested by the model
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Call id, echoed back in the tool message
    pub id: String,
    /// Which tool to run
    pub name: String,
    /// Arguments, parsed from the model's JSON
    pub arguments: Value,
}

/// Check call arguments against a tool's JSON schema
///
/// Covers what the stage tools actually declare: the arguments must be an
/// object, every `required` key must be present, and declared primitive
/// types must match. Anything the schema does not mention passes through.
pub fn validate_args(schema: &Value, args: &Value) -> std::result::Result<(), String> {
    let Some(supplied) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|r| r.as_str()) {
            if !supplied.contains_key(key) {
                return Err(format!("missing required argument '{}'", key));
            }
        }
    }

    let Some(declared) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };

    for (key, value) in supplied {
        let Some(wanted) = declared.get(key).and_then(|p| p.get("type")).and_then(|t| t.as_str())
        else {
            continue;
        };
        let matches = match wanted {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !matches {
            return Err(format!("argument '{}' must be of type {}", key, wanted));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_text_for_model() {
        assert_eq!(ToolResult::reply("42 rows").for_model(), "42 rows");
        assert_eq!(ToolResult::failure("boom").for_model(), "Error: boom");
        assert_eq!(ToolResult::halting("off-topic").for_model(), "off-topic");
    }

    #[test]
    fn test_result_classification() {
        assert!(ToolResult::reply("x").succeeded());
        assert!(!ToolResult::reply("x").halts_loop());

        assert!(ToolResult::halting("x").succeeded());
        assert!(ToolResult::halting("x").halts_loop());

        assert!(!ToolResult::failure("x").succeeded());
        assert!(!ToolResult::failure("x").halts_loop());
    }

    #[test]
    fn test_validate_args_required() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });

        assert!(validate_args(&schema, &json!({"name": "orders"})).is_ok());
        assert!(validate_args(&schema, &json!({})).is_err());
        assert!(validate_args(&schema, &json!("not an object")).is_err());
    }

    #[test]
    fn test_validate_args_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "is_relevant": {"type": "boolean"},
                "reason": {"type": "string"}
            },
            "required": ["is_relevant", "reason"]
        });

        assert!(validate_args(&schema, &json!({"is_relevant": false, "reason": "off-topic"})).is_ok());
        let err = validate_args(&schema, &json!({"is_relevant": "no", "reason": "x"}));
        assert!(err.unwrap_err().contains("boolean"));
    }

    #[test]
    fn test_validate_args_ignores_undeclared_keys() {
        let schema = json!({"type": "object", "properties": {}});
        assert!(validate_args(&schema, &json!({"extra": 1})).is_ok());
    }
}
