//! Pipeline stage implementations
//!
//! Stage 1 (discover & generate) runs the tool loop against the schema and
//! knowledge-base tools and extracts a read-only SQL statement. Stage 2
//! executes the statement through the database tool server, with one
//! self-correction re-entry into stage 1 on failure. Stage 3 turns the rows
//! into an executive summary. Every stage is idempotent against redelivery:
//! work that already happened is detected from the record and only the
//! follow-up publish is repeated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::agent::prompts::{
    render_format_prompt, render_generate_prompt, Reflection, FORMAT_SYSTEM_PROMPT,
    GENERATE_SYSTEM_PROMPT,
};
use crate::agent::tool_loop::{run_tool_loop, LoopConfig, LoopOutcome};
use crate::agent::types::Message;
use crate::agent::LlmProvider;
use crate::core::bus::{MessageBus, StageEnvelope};
use crate::error::{Error, Result};
use crate::tools::{RelevanceTool, RemoteTool, ToolDispatcher, ToolSet, ROLE_DATABASE};

use super::record::{SagaPatch, SagaRecord, SagaStatus, StepMetadata, StepRecord, StepStatus};
use super::safety::check_read_only;
use super::store::SagaStore;

/// Topic consumed by stage 1
pub const TOPIC_INITIATED: &str = "q.initiated";
/// Topic consumed by stage 2
pub const TOPIC_GENERATED: &str = "q.generated";
/// Topic consumed by stage 3
pub const TOPIC_EXECUTED: &str = "q.executed";

/// Step names as they appear in the call stack
pub const STEP_GENERATE: &str = "generate_query";
pub const STEP_EXECUTE: &str = "execute_query";
pub const STEP_FORMAT: &str = "format_response";

/// Stage hint marking a self-correction re-entry
pub const HINT_REFLECT: &str = "reflect";

/// Result rows are truncated to this many before rendering
pub const MAX_RESULT_ROWS: usize = 50;
/// The executive summary is capped at this many characters
pub const MAX_SUMMARY_CHARS: usize = 2000;

/// Everything a stage needs to run
pub struct StageContext {
    /// Saga persistence
    pub store: SagaStore,
    /// Stage hand-off bus
    pub bus: Arc<dyn MessageBus>,
    /// LLM backend
    pub provider: Arc<dyn LlmProvider>,
    /// Remote tool dispatch (registry + tool protocol)
    pub dispatcher: Arc<dyn ToolDispatcher>,
    /// Budgets for the tool loop
    pub loop_config: LoopConfig,
    /// Overall per-saga deadline
    pub saga_deadline: Duration,
}

/// What the worker does after a stage returns
pub enum StageOutcome {
    /// Nothing further to publish; ack the delivery
    Done,
    /// Publish the envelope, then ack
    Publish {
        topic: &'static str,
        envelope: StageEnvelope,
    },
}

impl StageOutcome {
    fn publish(topic: &'static str, record: &SagaRecord) -> Self {
        StageOutcome::Publish {
            topic,
            envelope: StageEnvelope::new(record.saga_id, &record.tenant_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 1 - Discover & Generate
// ---------------------------------------------------------------------------

/// Run the discover-and-generate stage for one delivery
pub async fn run_generate_stage(
    ctx: &StageContext,
    record: SagaRecord,
    envelope: &StageEnvelope,
) -> Result<StageOutcome> {
    // Redelivery after a lost ack: the SQL is already there, only the
    // hand-off publish needs to be repeated.
    if record.status == SagaStatus::Executing && record.generated_sql.is_some() {
        return Ok(StageOutcome::publish(TOPIC_GENERATED, &record));
    }

    if record.status == SagaStatus::Pending {
        ctx.store
            .update(
                record.saga_id,
                SagaPatch::new().status(SagaStatus::Generating),
            )
            .await?;
    }

    let reflection = if envelope.stage_hint.as_deref() == Some(HINT_REFLECT) {
        match (record.generated_sql.as_deref(), record.error_message.as_deref()) {
            (Some(failed_sql), Some(db_error)) => Some(Reflection {
                failed_sql,
                db_error,
            }),
            _ => None,
        }
    } else {
        None
    };

    let (relevance_tool, verdict_slot) = RelevanceTool::new();
    let mut tools = ToolSet::new();
    tools.register(relevance_tool);
    tools.register(RemoteTool::search_knowledge_base(
        ctx.dispatcher.clone(),
        &record.tenant_id,
    ));
    tools.register(RemoteTool::list_tables(
        ctx.dispatcher.clone(),
        &record.tenant_id,
    ));
    tools.register(RemoteTool::describe_table(
        ctx.dispatcher.clone(),
        &record.tenant_id,
    ));

    let messages = vec![
        Message::system(GENERATE_SYSTEM_PROMPT),
        Message::user(render_generate_prompt(&record.question, reflection)?),
    ];

    let output = run_tool_loop(
        STEP_GENERATE,
        messages,
        &tools,
        ctx.provider.as_ref(),
        &ctx.loop_config,
    )
    .await;
    let mut step = output.step;

    if let Some(listing) = step
        .metadata
        .tools_used
        .iter()
        .find(|t| t.tool == "list_tables" && t.status == StepStatus::Success)
    {
        step.metadata.available_tables = Some(
            listing
                .response
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        );
    }

    let text = match output.outcome {
        LoopOutcome::Failed(e) => {
            ctx.store.fail(record.saga_id, &e, Some(step)).await?;
            return Ok(StageOutcome::Done);
        }
        LoopOutcome::Completed(text) => text,
    };

    // A negative relevance verdict bypasses the rest of the pipeline. The
    // status is still `error` so clients can tell refusal from success, with
    // `is_irrelevant` distinguishing it from failure.
    let verdict = verdict_slot.lock().expect("verdict slot lock").clone();
    if let Some(verdict) = verdict {
        if !verdict.is_relevant {
            info!(
                "Saga {} judged irrelevant: {}",
                record.saga_id, verdict.reason
            );
            step.metadata.reason = Some(verdict.reason.clone());
            ctx.store
                .update(
                    record.saga_id,
                    SagaPatch::new()
                        .status(SagaStatus::Error)
                        .irrelevant()
                        .formatted_response(verdict.reason.clone())
                        .error_message(format!("Irrelevant: {}", verdict.reason))
                        .append_step(step),
                )
                .await?;
            return Ok(StageOutcome::Done);
        }
    }

    let Some(sql) = extract_sql(&text) else {
        step.status = StepStatus::Failed;
        ctx.store
            .fail(record.saga_id, &Error::SqlNotProduced, Some(step))
            .await?;
        return Ok(StageOutcome::Done);
    };

    step.metadata.sql = Some(sql.clone());

    if let Err(e) = check_read_only(&sql) {
        warn!("Saga {} produced unsafe SQL: {}", record.saga_id, e);
        step.status = StepStatus::Failed;
        ctx.store.fail(record.saga_id, &e, Some(step)).await?;
        return Ok(StageOutcome::Done);
    }

    let updated = ctx
        .store
        .update(
            record.saga_id,
            SagaPatch::new()
                .status(SagaStatus::Executing)
                .generated_sql(sql)
                .append_step(step),
        )
        .await?;

    Ok(StageOutcome::publish(TOPIC_GENERATED, &updated))
}

// ---------------------------------------------------------------------------
// Stage 2 - Execute
// ---------------------------------------------------------------------------

/// Run the execute stage for one delivery
///
/// No LLM call here; the statement goes straight to the database tool server.
/// A database error consumes the self-correction budget and re-enters stage 1
/// with a reflection hint; past the budget it is terminal.
pub async fn run_execute_stage(
    ctx: &StageContext,
    record: SagaRecord,
    _envelope: &StageEnvelope,
) -> Result<StageOutcome> {
    // Redelivery after a lost ack.
    if record.status == SagaStatus::Formatting && record.raw_results.is_some() {
        return Ok(StageOutcome::publish(TOPIC_EXECUTED, &record));
    }
    // A reflection re-entry is already in flight on q.initiated.
    if record.status == SagaStatus::Generating {
        return Ok(StageOutcome::Done);
    }

    let sql = record
        .generated_sql
        .clone()
        .ok_or_else(|| Error::Internal("saga has no generated SQL".to_string()))?;

    let start = Instant::now();
    // Transport failures and NoLiveTool propagate: the worker nacks and the
    // message redelivers once a server is back.
    let result = ctx
        .dispatcher
        .call(
            ROLE_DATABASE,
            "execute_sql",
            json!({"sql": sql, "tenant_id": record.tenant_id}),
        )
        .await?;
    let duration_ms = start.elapsed().as_millis() as u64;

    if result.is_error {
        let db_error = result.text();
        warn!("Saga {} execution failed: {}", record.saga_id, db_error);

        if record.retries_remaining > 0 {
            let step = StepRecord::new(
                STEP_EXECUTE,
                StepStatus::Error,
                duration_ms,
                StepMetadata {
                    sql: Some(sql),
                    reason: Some(db_error.clone()),
                    ..Default::default()
                },
            );
            let updated = ctx
                .store
                .update(
                    record.saga_id,
                    SagaPatch::new()
                        .status(SagaStatus::Generating)
                        .retries_remaining(record.retries_remaining - 1)
                        .error_message(db_error)
                        .append_step(step),
                )
                .await?;

            info!(
                "Saga {} re-entering stage 1 for self-correction ({} retries left)",
                record.saga_id, updated.retries_remaining
            );
            return Ok(StageOutcome::Publish {
                topic: TOPIC_INITIATED,
                envelope: StageEnvelope::new(updated.saga_id, &updated.tenant_id)
                    .with_hint(HINT_REFLECT),
            });
        }

        let step = StepRecord::new(
            STEP_EXECUTE,
            StepStatus::Failed,
            duration_ms,
            StepMetadata {
                sql: Some(sql),
                reason: Some(db_error.clone()),
                ..Default::default()
            },
        );
        ctx.store
            .fail(record.saga_id, &Error::ExecutionFailed(db_error), Some(step))
            .await?;
        return Ok(StageOutcome::Done);
    }

    let raw = result.text();
    let table = match serde_json::from_str::<QueryRows>(&raw) {
        Ok(rows) => render_markdown_table(&rows, MAX_RESULT_ROWS),
        // Servers may already return rendered text; pass it through.
        Err(_) => raw,
    };

    let step = StepRecord::new(
        STEP_EXECUTE,
        StepStatus::Success,
        duration_ms,
        StepMetadata {
            sql: Some(sql),
            ..Default::default()
        },
    );
    let updated = ctx
        .store
        .update(
            record.saga_id,
            SagaPatch::new()
                .status(SagaStatus::Formatting)
                .raw_results(table)
                .clear_error()
                .append_step(step),
        )
        .await?;

    Ok(StageOutcome::publish(TOPIC_EXECUTED, &updated))
}

// ---------------------------------------------------------------------------
// Stage 3 - Format
// ---------------------------------------------------------------------------

/// Run the format stage for one delivery
///
/// The tool catalogue is empty; the loop degenerates to a single constrained
/// generation over the question, the SQL, and the rendered rows.
pub async fn run_format_stage(
    ctx: &StageContext,
    record: SagaRecord,
    _envelope: &StageEnvelope,
) -> Result<StageOutcome> {
    let sql = record.generated_sql.clone().unwrap_or_default();
    let results = record.raw_results.clone().unwrap_or_default();

    let messages = vec![
        Message::system(FORMAT_SYSTEM_PROMPT),
        Message::user(render_format_prompt(&record.question, &sql, &results)?),
    ];

    let tools = ToolSet::new();
    let output = run_tool_loop(
        STEP_FORMAT,
        messages,
        &tools,
        ctx.provider.as_ref(),
        &ctx.loop_config,
    )
    .await;

    match output.outcome {
        LoopOutcome::Failed(e) => {
            ctx.store.fail(record.saga_id, &e, Some(output.step)).await?;
        }
        LoopOutcome::Completed(text) => {
            let summary: String = if text.chars().count() > MAX_SUMMARY_CHARS {
                text.chars().take(MAX_SUMMARY_CHARS).collect()
            } else {
                text
            };
            ctx.store
                .complete(record.saga_id, summary, Some(output.step))
                .await?;
        }
    }
    Ok(StageOutcome::Done)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Rows returned by the `execute_sql` tool
#[derive(Debug, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Render rows as a markdown table, truncated with a marker past `max_rows`
pub fn render_markdown_table(rows: &QueryRows, max_rows: usize) -> String {
    if rows.columns.is_empty() || rows.rows.is_empty() {
        return "*no results*".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!("| {} |\n", rows.columns.join(" | ")));
    out.push_str(&format!(
        "|{}\n",
        " --- |".repeat(rows.columns.len())
    ));

    for row in rows.rows.iter().take(max_rows) {
        let cells: Vec<String> = row.iter().map(render_cell).collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    if rows.rows.len() > max_rows {
        out.push_str("\n*...truncated...*\n");
    }

    out
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Extract the SQL statement from the model's final text
///
/// Takes the last fenced code block; the statement the model settles on after
/// reasoning is the one it means.
pub fn extract_sql(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:sql)?\s*(.*?)```").expect("fence regex")
    });

    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .last()
}
