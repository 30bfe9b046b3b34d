//! Bounded LLM tool-calling loop
//!
//! One invocation drives a chat-with-tools conversation until the model
//! produces a final text answer, a halting tool fires, or a budget runs out.
//! Tool calls are strictly sequential, so the transcript is a total order.
//! A single tool failure never aborts the loop; the error text goes back to
//! the model so it can self-correct. Only exhausted budgets surface failure.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::agent::guard::RepeatGuard;
use crate::agent::provider::LlmProvider;
use crate::agent::types::{GenerationOptions, Message, Usage};
use crate::error::Error;
use crate::saga::record::{StepMetadata, StepRecord, StepStatus, ToolInvocation};
use crate::tools::{ToolCall, ToolSet};

/// Budgets for one loop invocation.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum model round-trips before the loop fails
    pub max_iterations: u32,
    /// Aggregate wall-clock budget for the whole loop
    pub loop_timeout: Duration,
    /// Per-call budget for a single model request
    pub llm_timeout: Duration,
    /// Per-call budget for a single tool dispatch
    pub tool_timeout: Duration,
    /// Generation options for every model call
    pub generation_options: GenerationOptions,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            loop_timeout: Duration::from_secs(180),
            llm_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
            generation_options: GenerationOptions::precise(),
        }
    }
}

/// How a loop invocation finished.
pub enum LoopOutcome {
    /// The model produced a final text answer (or a halting tool fired)
    Completed(String),
    /// A budget ran out or the provider failed
    Failed(Error),
}

/// The result of one loop invocation.
///
/// The step record is produced even on failure so callers can persist the
/// partial call stack.
pub struct LoopOutput {
    /// Final outcome
    pub outcome: LoopOutcome,
    /// Aggregated step record for this invocation
    pub step: StepRecord,
    /// Token usage across all iterations
    pub total_usage: Usage,
}

/// Run the bounded tool loop.
///
/// `step_name` names the resulting step record (e.g. `generate_query`).
pub async fn run_tool_loop(
    step_name: &str,
    mut messages: Vec<Message>,
    tools: &ToolSet,
    provider: &dyn LlmProvider,
    config: &LoopConfig,
) -> LoopOutput {
    let loop_start = Instant::now();

    let prompt = messages
        .iter()
        .rev()
        .find(|m| m.role == crate::agent::types::Role::User)
        .map(|m| m.content.clone());

    let tool_definitions = tools.definitions();
    let mut tools_used: Vec<ToolInvocation> = Vec::new();
    let mut reasoning_parts: Vec<String> = Vec::new();
    let mut total_usage = Usage::default();
    let mut guard = RepeatGuard::default();
    let mut iteration: u32 = 0;

    let outcome = loop {
        if iteration >= config.max_iterations {
            warn!(
                "Tool loop '{}' exhausted its iteration budget ({})",
                step_name, config.max_iterations
            );
            break LoopOutcome::Failed(Error::IterationBudgetExceeded(config.max_iterations));
        }
        if loop_start.elapsed() >= config.loop_timeout {
            warn!("Tool loop '{}' exceeded its wall-clock budget", step_name);
            break LoopOutcome::Failed(Error::LoopTimeout);
        }
        iteration += 1;
        info!(
            "Tool loop '{}' iteration {}/{}",
            step_name, iteration, config.max_iterations
        );

        let call = if tool_definitions.is_empty() {
            provider.chat(messages.clone(), config.generation_options.clone())
        } else {
            provider.chat_with_tools(
                messages.clone(),
                tool_definitions.clone(),
                config.generation_options.clone(),
            )
        };

        let response = match tokio::time::timeout(config.llm_timeout, call).await {
            Err(_) => break LoopOutcome::Failed(Error::Timeout("LLM call timed out".into())),
            Ok(Err(e)) => break LoopOutcome::Failed(e),
            Ok(Ok(r)) => r,
        };

        if let Some(ref usage) = response.usage {
            total_usage.accumulate(usage);
        }

        let Some(choice) = response.choices.first() else {
            break LoopOutcome::Failed(Error::Llm("model returned no choices".into()));
        };

        let tool_calls = choice
            .message
            .tool_calls
            .clone()
            .unwrap_or_default();

        if tool_calls.is_empty() {
            // Text-only output ends the loop.
            if choice.message.content.is_empty() {
                break LoopOutcome::Failed(Error::Llm(
                    "model returned neither text nor tool calls".into(),
                ));
            }
            debug!(
                "Tool loop '{}' final answer: {}",
                step_name,
                &choice.message.content[..choice.message.content.len().min(500)]
            );
            break LoopOutcome::Completed(choice.message.content.clone());
        }

        messages.push(choice.message.clone());
        if !choice.message.content.is_empty() {
            reasoning_parts.push(choice.message.content.clone());
        }

        let mut halted: Option<String> = None;

        for tc in &tool_calls {
            let args: serde_json::Value = match serde_json::from_str(&tc.function.arguments) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        "Unparseable arguments for tool {}: {}",
                        tc.function.name, e
                    );
                    serde_json::json!({})
                }
            };

            info!("Dispatching tool: {}", tc.function.name);
            debug!("Tool {} arguments: {}", tc.function.name, tc.function.arguments);

            let call = ToolCall {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                arguments: args.clone(),
            };

            let tool_start = Instant::now();
            let result =
                match tokio::time::timeout(config.tool_timeout, tools.execute(&call)).await {
                    Err(_) => Err(Error::Timeout(format!(
                        "tool {} timed out",
                        tc.function.name
                    ))),
                    Ok(r) => r,
                };
            let duration_ms = tool_start.elapsed().as_millis() as u64;

            let (result_content, succeeded, halt) = match result {
                Ok(r) => (r.for_model(), r.succeeded(), r.halts_loop()),
                Err(e) => {
                    warn!("Tool {} failed: {}", tc.function.name, e);
                    (format!("Tool error: {}", e), false, false)
                }
            };

            messages.push(Message::tool(&tc.id, &result_content));

            tools_used.push(ToolInvocation {
                tool: tc.function.name.clone(),
                args,
                response: result_content.clone(),
                duration_ms,
                status: if succeeded {
                    StepStatus::Success
                } else {
                    StepStatus::Error
                },
            });

            if halt && succeeded {
                halted = Some(result_content.clone());
            }

            if let Some(hint) =
                guard.record(&tc.function.name, &tc.function.arguments, &result_content)
            {
                warn!("Repeat guard fired for tool '{}'", tc.function.name);
                messages.push(Message::user(&hint));
            }
        }

        if let Some(text) = halted {
            break LoopOutcome::Completed(text);
        }
    };

    let duration_ms = loop_start.elapsed().as_millis() as u64;
    let status = match outcome {
        LoopOutcome::Completed(_) => StepStatus::Success,
        LoopOutcome::Failed(_) => StepStatus::Failed,
    };

    info!(
        "Tool loop '{}' finished: iterations={}, tool_calls={}, duration={}ms",
        step_name,
        iteration,
        tools_used.len(),
        duration_ms,
    );

    let step = StepRecord::new(
        step_name,
        status,
        duration_ms,
        StepMetadata {
            prompt,
            llm_reasoning: if reasoning_parts.is_empty() {
                None
            } else {
                Some(reasoning_parts.join("\n"))
            },
            tools_used,
            usage: Some(total_usage.clone()),
            iterations: Some(iteration),
            ..Default::default()
        },
    );

    LoopOutput {
        outcome,
        step,
        total_usage,
    }
}
