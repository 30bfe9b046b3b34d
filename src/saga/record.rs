//! Saga and step record types
//!
//! The saga record is the single source of truth for a query's progress. It
//! lives in the state store, keyed by saga id; workers load it, mutate it
//! through partial patches, and hand it off via the bus. Once terminal the
//! record is immutable until its TTL expires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::types::Usage;

/// Lifecycle status of a saga
///
/// Transitions are monotonic along the pipeline order, except that any stage
/// may short-circuit to `Error` or `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SagaStatus {
    /// Created, not yet picked up by stage 1
    Pending,
    /// Stage 1 (discover & generate) in progress
    Generating,
    /// Stage 2 (execute) in progress
    Executing,
    /// Stage 3 (format) in progress
    Formatting,
    /// Terminal: formatted response available
    Completed,
    /// Terminal: failed, or refused as irrelevant
    Error,
}

impl SagaStatus {
    /// Whether this status ends the saga
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Error)
    }

    /// Position along the pipeline, used to enforce monotonic transitions
    pub fn rank(&self) -> u8 {
        match self {
            SagaStatus::Pending => 0,
            SagaStatus::Generating => 1,
            SagaStatus::Executing => 2,
            SagaStatus::Formatting => 3,
            SagaStatus::Completed => 4,
            SagaStatus::Error => 4,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SagaStatus::Pending => "pending",
            SagaStatus::Generating => "generating",
            SagaStatus::Executing => "executing",
            SagaStatus::Formatting => "formatting",
            SagaStatus::Completed => "completed",
            SagaStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Status of a single step in the call stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not yet run
    Pending,
    /// Finished cleanly
    Success,
    /// Finished with a recoverable error (e.g. a retried execution)
    Error,
    /// Finished with a terminal error
    Failed,
}

/// A single tool invocation recorded in step metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool name
    pub tool: String,
    /// Arguments the model supplied
    pub args: Value,
    /// Tool response (or error text)
    pub response: String,
    /// Wall-clock duration of the call
    pub duration_ms: u64,
    /// Outcome of the call
    pub status: StepStatus,
}

/// Stage-specific step metadata
///
/// Every field is optional; a stage only writes what it produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMetadata {
    /// Prompt sent to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Free text the model produced alongside (or instead of) tool calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_reasoning: Option<String>,
    /// Tool calls made during the step, ordered by iteration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<ToolInvocation>,
    /// Tables discovered during schema discovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_tables: Option<Vec<String>>,
    /// SQL the step produced or executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Token usage for the step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Human-readable reason (relevance refusals, failures)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Number of model round-trips the step took
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

/// One entry in the saga call stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step name (e.g. `generate_query`)
    pub step_name: String,
    /// Outcome
    pub status: StepStatus,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Stage-specific detail
    #[serde(default)]
    pub metadata: StepMetadata,
}

impl StepRecord {
    /// Create a step record
    pub fn new(
        step_name: impl Into<String>,
        status: StepStatus,
        duration_ms: u64,
        metadata: StepMetadata,
    ) -> Self {
        StepRecord {
            step_name: step_name.into(),
            status,
            duration_ms,
            metadata,
        }
    }
}

/// The saga record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaRecord {
    /// Unique saga ID
    pub saga_id: Uuid,
    /// Tenant that owns the saga; scopes all tool calls and KB lookups
    pub tenant_id: String,
    /// Original user question
    pub question: String,
    /// Current lifecycle status
    pub status: SagaStatus,
    /// SQL produced by stage 1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_sql: Option<String>,
    /// Markdown result table produced by stage 2
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_results: Option<String>,
    /// Executive summary produced by stage 3 (or the refusal reason)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_response: Option<String>,
    /// True when stage 1 judged the question unanswerable from tenant data
    #[serde(default)]
    pub is_irrelevant: bool,
    /// Terminal error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Ordered step records; append-only
    #[serde(default)]
    pub call_stack: Vec<StepRecord>,
    /// Self-correction re-entries left (starts at 1)
    pub retries_remaining: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last write time
    pub updated_at: DateTime<Utc>,
    /// Total wall-clock across all steps
    #[serde(default)]
    pub total_duration_ms: u64,
    /// Total tokens across all steps
    #[serde(default)]
    pub total_tokens: u32,
}

impl SagaRecord {
    /// Create a fresh saga in `Pending`
    pub fn new(tenant_id: impl Into<String>, question: impl Into<String>) -> Self {
        let now = Utc::now();
        SagaRecord {
            saga_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            question: question.into(),
            status: SagaStatus::Pending,
            generated_sql: None,
            raw_results: None,
            formatted_response: None,
            is_irrelevant: false,
            error_message: None,
            call_stack: Vec::new(),
            retries_remaining: 1,
            created_at: now,
            updated_at: now,
            total_duration_ms: 0,
            total_tokens: 0,
        }
    }

    /// Whether the saga has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A partial update to a saga record
///
/// Unset fields never clobber; `append_steps` is strictly additive.
#[derive(Debug, Clone, Default)]
pub struct SagaPatch {
    pub status: Option<SagaStatus>,
    pub generated_sql: Option<String>,
    pub raw_results: Option<String>,
    pub formatted_response: Option<String>,
    pub is_irrelevant: Option<bool>,
    pub error_message: Option<String>,
    pub clear_error_message: bool,
    pub retries_remaining: Option<u32>,
    pub append_steps: Vec<StepRecord>,
}

impl SagaPatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status
    pub fn status(mut self, status: SagaStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the generated SQL
    pub fn generated_sql(mut self, sql: impl Into<String>) -> Self {
        self.generated_sql = Some(sql.into());
        self
    }

    /// Set the raw results markdown
    pub fn raw_results(mut self, results: impl Into<String>) -> Self {
        self.raw_results = Some(results.into());
        self
    }

    /// Set the formatted response
    pub fn formatted_response(mut self, response: impl Into<String>) -> Self {
        self.formatted_response = Some(response.into());
        self
    }

    /// Mark the saga irrelevant
    pub fn irrelevant(mut self) -> Self {
        self.is_irrelevant = Some(true);
        self
    }

    /// Set the error message
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Clear a previously-recorded error message
    ///
    /// A plain unset field never clobbers, so clearing is explicit (used when
    /// a self-corrected execution succeeds).
    pub fn clear_error(mut self) -> Self {
        self.clear_error_message = true;
        self
    }

    /// Set the remaining self-correction budget
    pub fn retries_remaining(mut self, retries: u32) -> Self {
        self.retries_remaining = Some(retries);
        self
    }

    /// Append a step record
    pub fn append_step(mut self, step: StepRecord) -> Self {
        self.append_steps.push(step);
        self
    }

    /// Apply this patch to a record, updating rollups and `updated_at`
    pub fn apply(self, record: &mut SagaRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(sql) = self.generated_sql {
            record.generated_sql = Some(sql);
        }
        if let Some(results) = self.raw_results {
            record.raw_results = Some(results);
        }
        if let Some(response) = self.formatted_response {
            record.formatted_response = Some(response);
        }
        if let Some(irrelevant) = self.is_irrelevant {
            record.is_irrelevant = irrelevant;
        }
        if self.clear_error_message {
            record.error_message = None;
        }
        if let Some(message) = self.error_message {
            record.error_message = Some(message);
        }
        if let Some(retries) = self.retries_remaining {
            record.retries_remaining = retries;
        }
        for step in self.append_steps {
            record.total_duration_ms += step.duration_ms;
            if let Some(ref usage) = step.metadata.usage {
                record.total_tokens += usage.total_tokens;
            }
            record.call_stack.push(step);
        }
        record.updated_at = Utc::now();
    }
}
