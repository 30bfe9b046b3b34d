//! Relevance verdict tool
//!
//! Stage 1 offers this tool so the model can declare that a question cannot
//! be answered from the tenant's data. A negative verdict halts the tool loop
//! and the stage short-circuits the rest of the pipeline.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::traits::{Tool, ToolResult};
use crate::error::Result;

/// The verdict the model recorded
#[derive(Debug, Clone, Deserialize)]
pub struct RelevanceVerdict {
    /// Whether the question can be answered from tenant data
    pub is_relevant: bool,
    /// Short human-readable reason
    pub reason: String,
}

/// Shared slot the stage reads after the loop finishes
pub type VerdictSlot = Arc<Mutex<Option<RelevanceVerdict>>>;

/// Tool that records the model's relevance verdict
pub struct RelevanceTool {
    verdict: VerdictSlot,
}

impl RelevanceTool {
    /// Create the tool and the slot the stage will read
    pub fn new() -> (Self, VerdictSlot) {
        let slot: VerdictSlot = Arc::new(Mutex::new(None));
        (
            RelevanceTool {
                verdict: slot.clone(),
            },
            slot,
        )
    }
}

#[async_trait]
impl Tool for RelevanceTool {
    fn name(&self) -> &str {
        "check_relevance"
    }

    fn description(&self) -> &str {
        "Report whether the question can be answered from the tenant's database. \
         Call with is_relevant=false when the question is off-topic."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "is_relevant": {
                    "type": "boolean",
                    "description": "Whether the question is answerable from tenant data"
                },
                "reason": {
                    "type": "string",
                    "description": "Short explanation of the verdict"
                }
            },
            "required": ["is_relevant", "reason"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let verdict: RelevanceVerdict = serde_json::from_value(args)?;
        let reason = verdict.reason.clone();
        let relevant = verdict.is_relevant;

        *self.verdict.lock().expect("verdict slot lock") = Some(verdict);

        if relevant {
            Ok(ToolResult::reply(
                "Relevance confirmed. Continue answering the question.",
            ))
        } else {
            // A refusal ends the loop; the reason becomes the final text.
            Ok(ToolResult::halting(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_negative_verdict_halts() {
        let (tool, slot) = RelevanceTool::new();

        let result = tool
            .execute(json!({"is_relevant": false, "reason": "not about your database"}))
            .await
            .unwrap();

        assert!(result.halts_loop());
        assert_eq!(result.for_model(), "not about your database");

        let verdict = slot.lock().unwrap().clone().unwrap();
        assert!(!verdict.is_relevant);
    }

    #[tokio::test]
    async fn test_positive_verdict_continues() {
        let (tool, slot) = RelevanceTool::new();

        let result = tool
            .execute(json!({"is_relevant": true, "reason": "asks about sales data"}))
            .await
            .unwrap();

        assert!(!result.halts_loop());
        assert!(result.succeeded());
        assert!(slot.lock().unwrap().clone().unwrap().is_relevant);
    }
}
