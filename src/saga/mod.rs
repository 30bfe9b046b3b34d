//! Saga engine - durable multi-stage query pipeline
//!
//! A saga is a long-running unit of work whose state lives in the state
//! store and whose stages hand off through bus topics. No worker holds
//! session state between messages.

pub mod orchestrator;
pub mod record;
pub mod safety;
pub mod stages;
pub mod store;

pub use orchestrator::{handle_delivery, submit_query, Orchestrator, REQUEUE_DELAY};
pub use record::{SagaPatch, SagaRecord, SagaStatus, StepMetadata, StepRecord, StepStatus, ToolInvocation};
pub use safety::check_read_only;
pub use stages::{
    extract_sql, render_markdown_table, StageContext, StageOutcome, HINT_REFLECT,
    MAX_RESULT_ROWS, MAX_SUMMARY_CHARS, STEP_EXECUTE, STEP_FORMAT, STEP_GENERATE,
    TOPIC_EXECUTED, TOPIC_GENERATED, TOPIC_INITIATED,
};
pub use store::SagaStore;
