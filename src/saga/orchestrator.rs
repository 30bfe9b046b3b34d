//! Saga orchestrator - worker pools over the stage topics
//!
//! One worker pool per topic. A worker pulls a delivery, loads the saga,
//! drops it if terminal, enforces the saga deadline, runs its stage, and
//! publishes the next-stage envelope BEFORE acking. A failed publish leaves
//! the delivery unacked so the bus redelivers it; stage idempotency checks
//! make the redelivery harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::bus::{publish_envelope, Delivery, StageEnvelope};
use crate::error::{Error, Result};

use super::record::SagaRecord;
use super::stages::{
    run_execute_stage, run_format_stage, run_generate_stage, StageContext, StageOutcome,
    TOPIC_EXECUTED, TOPIC_GENERATED, TOPIC_INITIATED,
};

/// Delay before a nacked message becomes visible again
pub const REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// Spawns and owns the stage worker pools
pub struct Orchestrator {
    ctx: Arc<StageContext>,
    workers_per_topic: usize,
}

impl Orchestrator {
    /// Create an orchestrator over a stage context
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Orchestrator {
            ctx,
            workers_per_topic: 2,
        }
    }

    /// Set the worker count per topic
    pub fn with_workers(mut self, workers_per_topic: usize) -> Self {
        self.workers_per_topic = workers_per_topic.max(1);
        self
    }

    /// Spawn all worker pools; the returned handles run until aborted
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for topic in [TOPIC_INITIATED, TOPIC_GENERATED, TOPIC_EXECUTED] {
            for worker in 0..self.workers_per_topic {
                let ctx = self.ctx.clone();
                handles.push(tokio::spawn(async move {
                    info!("Worker {}/{} started", topic, worker);
                    worker_loop(ctx, topic).await;
                }));
            }
        }
        handles
    }
}

async fn worker_loop(ctx: Arc<StageContext>, topic: &'static str) {
    loop {
        match ctx.bus.consume(topic).await {
            Ok(delivery) => handle_delivery(&ctx, topic, delivery).await,
            Err(e) => {
                error!("Consume on {} failed: {}", topic, e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Process a single delivery for a topic
///
/// Public so tests (and drain tooling) can drive messages deterministically.
pub async fn handle_delivery(ctx: &StageContext, topic: &str, delivery: Delivery) {
    let envelope = match delivery.envelope() {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Dropping malformed message on {}: {}", topic, e);
            delivery.ack().await;
            return;
        }
    };

    let record = match ctx.store.get(envelope.saga_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            debug!("Saga {} missing or expired; dropping", envelope.saga_id);
            delivery.ack().await;
            return;
        }
        Err(e) => {
            warn!("State store read failed; requeueing: {}", e);
            delivery.nack(REQUEUE_DELAY).await;
            return;
        }
    };

    // Duplicate deliveries of finished work land here.
    if record.is_terminal() {
        debug!("Saga {} already terminal; dropping", envelope.saga_id);
        delivery.ack().await;
        return;
    }

    let age = Utc::now()
        .signed_duration_since(record.created_at)
        .to_std()
        .unwrap_or_default();
    if age > ctx.saga_deadline {
        warn!("Saga {} exceeded its deadline", envelope.saga_id);
        let _ = ctx.store.fail(envelope.saga_id, &Error::SagaDeadline, None).await;
        delivery.ack().await;
        return;
    }

    let result = match topic {
        TOPIC_INITIATED => run_generate_stage(ctx, record, &envelope).await,
        TOPIC_GENERATED => run_execute_stage(ctx, record, &envelope).await,
        TOPIC_EXECUTED => run_format_stage(ctx, record, &envelope).await,
        other => {
            warn!("No stage bound to topic {}", other);
            delivery.ack().await;
            return;
        }
    };

    match result {
        Ok(StageOutcome::Done) => delivery.ack().await,
        Ok(StageOutcome::Publish {
            topic: next_topic,
            envelope: next_envelope,
        }) => {
            // Publish before ack. A lost publish means redelivery, and the
            // stage's idempotency check turns that into a bare re-publish.
            match publish_envelope(ctx.bus.as_ref(), next_topic, &next_envelope).await {
                Ok(()) => delivery.ack().await,
                Err(e) => {
                    warn!(
                        "Publish to {} failed; leaving delivery unacked: {}",
                        next_topic, e
                    );
                    drop(delivery);
                }
            }
        }
        Err(e) if e.is_retryable() => {
            warn!("Stage on {} failed transiently: {}", topic, e);
            delivery.nack(REQUEUE_DELAY).await;
        }
        Err(e) => {
            warn!("Stage on {} failed: {}", topic, e);
            let _ = ctx.store.fail(envelope.saga_id, &e, None).await;
            delivery.ack().await;
        }
    }
}

/// Submit a question: create the saga in `pending` and enqueue stage 1
///
/// Returns immediately with the saga id; clients poll for the result.
pub async fn submit_query(
    ctx: &StageContext,
    tenant_id: impl Into<String>,
    question: impl Into<String>,
) -> Result<Uuid> {
    let record = SagaRecord::new(tenant_id, question);
    ctx.store.create(&record).await?;

    let envelope = StageEnvelope::new(record.saga_id, &record.tenant_id);
    publish_envelope(ctx.bus.as_ref(), TOPIC_INITIATED, &envelope).await?;

    info!(
        "Saga {} submitted for tenant {}",
        record.saga_id, record.tenant_id
    );
    Ok(record.saga_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockLlmClient;
    use crate::agent::tool_loop::LoopConfig;
    use crate::agent::types::*;
    use crate::core::{MemoryBus, MemoryStateStore, MessageBus};
    use crate::mcp::{McpContent, McpToolResult};
    use crate::saga::record::{SagaStatus, StepStatus};
    use crate::saga::stages::{STEP_EXECUTE, STEP_FORMAT, STEP_GENERATE};
    use crate::saga::store::SagaStore;
    use crate::tools::ToolDispatcher;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Simulates database and knowledge-base tool servers.
    struct StubToolServers {
        execute_calls: AtomicUsize,
        /// SQL substrings that make execute_sql fail with this error
        failing_sql: Option<(String, String)>,
    }

    impl StubToolServers {
        fn healthy() -> Self {
            StubToolServers {
                execute_calls: AtomicUsize::new(0),
                failing_sql: None,
            }
        }

        fn failing_on(fragment: &str, error: &str) -> Self {
            StubToolServers {
                execute_calls: AtomicUsize::new(0),
                failing_sql: Some((fragment.into(), error.into())),
            }
        }

        fn text_result(text: &str, is_error: bool) -> McpToolResult {
            McpToolResult {
                content: vec![McpContent {
                    content_type: "text".into(),
                    text: Some(text.into()),
                }],
                is_error,
            }
        }
    }

    #[async_trait]
    impl ToolDispatcher for StubToolServers {
        async fn call(&self, _role: &str, tool: &str, args: Value) -> crate::error::Result<McpToolResult> {
            match tool {
                "list_tables" => Ok(Self::text_result("orders, products, customers", false)),
                "describe_table" => Ok(Self::text_result(
                    "customer_name text, quantity int, price numeric",
                    false,
                )),
                "search_knowledge_base" => Ok(Self::text_result(
                    "Revenue = SUM(quantity*price)",
                    false,
                )),
                "execute_sql" => {
                    self.execute_calls.fetch_add(1, Ordering::SeqCst);
                    let sql = args["sql"].as_str().unwrap_or_default();
                    if let Some((fragment, error)) = &self.failing_sql {
                        if sql.contains(fragment.as_str()) {
                            return Ok(Self::text_result(error, true));
                        }
                    }
                    Ok(Self::text_result(
                        &json!({
                            "columns": ["customer_name", "total"],
                            "rows": [["Initech", 4200], ["Globex", 1100]]
                        })
                        .to_string(),
                        false,
                    ))
                }
                other => Ok(Self::text_result(&format!("unknown tool {}", other), true)),
            }
        }
    }

    fn context(
        provider: Arc<dyn crate::agent::LlmProvider>,
        dispatcher: Arc<dyn ToolDispatcher>,
    ) -> (Arc<StageContext>, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let ctx = Arc::new(StageContext {
            store: SagaStore::new(Arc::new(MemoryStateStore::new())),
            bus: bus.clone(),
            provider,
            dispatcher,
            loop_config: LoopConfig::default(),
            saga_deadline: Duration::from_secs(300),
        });
        (ctx, bus)
    }

    /// Drain every queued message, stage by stage, until the bus is idle.
    async fn drain(ctx: &StageContext, bus: &MemoryBus) {
        for _ in 0..32 {
            let mut moved = false;
            for topic in [TOPIC_INITIATED, TOPIC_GENERATED, TOPIC_EXECUTED] {
                while bus.queued_len(topic).await > 0 {
                    let delivery = bus.consume(topic).await.unwrap();
                    handle_delivery(ctx, topic, delivery).await;
                    moved = true;
                }
            }
            if !moved {
                return;
            }
        }
        panic!("bus never went idle");
    }

    fn sql_response(sql: &str) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "cmpl".into(),
            model: "mock".into(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(format!("Here:\n```sql\n{}\n```", sql)),
                finish_reason: Some("stop".into()),
            }],
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        }
    }

    fn text_only_response(text: &str) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "cmpl".into(),
            model: "mock".into(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(text),
                finish_reason: Some("stop".into()),
            }],
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        }
    }

    #[tokio::test]
    async fn test_happy_path_end_to_end() {
        let (ctx, bus) = context(
            Arc::new(MockLlmClient::canned()),
            Arc::new(StubToolServers::healthy()),
        );

        let saga_id = submit_query(&ctx, "acme", "top 5 customers by revenue")
            .await
            .unwrap();
        drain(&ctx, &bus).await;

        let record = ctx.store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Completed);
        assert!(record.generated_sql.as_deref().unwrap().contains("LIMIT 5"));
        assert!(record.raw_results.as_deref().unwrap().contains("Initech"));
        assert!(!record.formatted_response.as_deref().unwrap().is_empty());
        assert!(!record.is_irrelevant);
        assert!(record.total_tokens > 0);

        let names: Vec<&str> = record
            .call_stack
            .iter()
            .map(|s| s.step_name.as_str())
            .collect();
        assert_eq!(names, vec![STEP_GENERATE, STEP_EXECUTE, STEP_FORMAT]);
        // The canned client makes a discovery call before emitting SQL.
        assert!(!record.call_stack[0].metadata.tools_used.is_empty());
        assert_eq!(
            record.call_stack[0].metadata.available_tables.as_deref(),
            Some(&["orders".to_string(), "products".into(), "customers".into()][..])
        );
    }

    #[tokio::test]
    async fn test_irrelevant_question_short_circuits() {
        let (ctx, bus) = context(
            Arc::new(MockLlmClient::canned()),
            Arc::new(StubToolServers::healthy()),
        );

        let saga_id = submit_query(&ctx, "acme", "what is the weather")
            .await
            .unwrap();
        let delivery = bus.consume(TOPIC_INITIATED).await.unwrap();
        handle_delivery(&ctx, TOPIC_INITIATED, delivery).await;

        let record = ctx.store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Error);
        assert!(record.is_irrelevant);
        assert_eq!(
            record.formatted_response.as_deref(),
            Some("The question is not about your database")
        );
        // Stages 2 and 3 are never entered.
        assert_eq!(bus.queued_len(TOPIC_GENERATED).await, 0);
        assert_eq!(bus.queued_len(TOPIC_EXECUTED).await, 0);
        assert_eq!(record.call_stack.len(), 1);
    }

    #[tokio::test]
    async fn test_self_correction_retries_once_then_succeeds() {
        let provider = MockLlmClient::scripted(vec![
            sql_response("SELECT usr_id FROM orders LIMIT 5"),
            sql_response("SELECT customer_name FROM orders LIMIT 5"),
            text_only_response("Summary of the corrected results."),
        ]);
        let dispatcher = Arc::new(StubToolServers::failing_on(
            "usr_id",
            r#"column "usr_id" does not exist"#,
        ));
        let (ctx, bus) = context(Arc::new(provider), dispatcher.clone());

        let saga_id = submit_query(&ctx, "acme", "who are our customers?")
            .await
            .unwrap();
        drain(&ctx, &bus).await;

        let record = ctx.store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Completed);
        assert_eq!(record.retries_remaining, 0);
        assert_eq!(dispatcher.execute_calls.load(Ordering::SeqCst), 2);

        let names: Vec<&str> = record
            .call_stack
            .iter()
            .map(|s| s.step_name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                STEP_GENERATE,
                STEP_EXECUTE,
                STEP_GENERATE,
                STEP_EXECUTE,
                STEP_FORMAT
            ]
        );
        // The failed execution is recorded as a recoverable error.
        assert_eq!(record.call_stack[1].status, StepStatus::Error);
        assert_eq!(record.call_stack[3].status, StepStatus::Success);
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn test_self_correction_budget_is_one() {
        // Both attempts produce failing SQL.
        let provider = MockLlmClient::scripted(vec![
            sql_response("SELECT usr_id FROM orders"),
            sql_response("SELECT usr_id FROM orders"),
        ]);
        let dispatcher = Arc::new(StubToolServers::failing_on(
            "usr_id",
            r#"column "usr_id" does not exist"#,
        ));
        let (ctx, bus) = context(Arc::new(provider), dispatcher.clone());

        let saga_id = submit_query(&ctx, "acme", "q").await.unwrap();
        drain(&ctx, &bus).await;

        let record = ctx.store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Error);
        assert!(record
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("ExecutionFailed"));
        assert_eq!(dispatcher.execute_calls.load(Ordering::SeqCst), 2);
        assert_eq!(record.retries_remaining, 0);
    }

    #[tokio::test]
    async fn test_unsafe_sql_is_rejected_before_execution() {
        let provider = MockLlmClient::scripted(vec![sql_response("DELETE FROM orders")]);
        let dispatcher = Arc::new(StubToolServers::healthy());
        let (ctx, bus) = context(Arc::new(provider), dispatcher.clone());

        let saga_id = submit_query(&ctx, "acme", "remove everything").await.unwrap();
        drain(&ctx, &bus).await;

        let record = ctx.store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Error);
        assert!(record
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("UnsafeStatement"));
        // Stage 2 never ran.
        assert_eq!(dispatcher.execute_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sql_not_produced() {
        let provider =
            MockLlmClient::scripted(vec![text_only_response("I cannot write a query for this.")]);
        let (ctx, bus) = context(Arc::new(provider), Arc::new(StubToolServers::healthy()));

        let saga_id = submit_query(&ctx, "acme", "q").await.unwrap();
        drain(&ctx, &bus).await;

        let record = ctx.store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Error);
        assert!(record
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("SqlNotProduced"));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_idempotent() {
        let (ctx, bus) = context(
            Arc::new(MockLlmClient::canned()),
            Arc::new(StubToolServers::healthy()),
        );

        let saga_id = submit_query(&ctx, "acme", "top 5 customers by revenue")
            .await
            .unwrap();

        // Simulate a duplicated stage-1 message (e.g. redelivery after a
        // crash between publish and ack).
        let duplicate = StageEnvelope::new(saga_id, "acme");
        publish_envelope(ctx.bus.as_ref(), TOPIC_INITIATED, &duplicate)
            .await
            .unwrap();

        drain(&ctx, &bus).await;

        let record = ctx.store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Completed);
        // Each stage ran exactly once despite the duplicate.
        let names: Vec<&str> = record
            .call_stack
            .iter()
            .map(|s| s.step_name.as_str())
            .collect();
        assert_eq!(names, vec![STEP_GENERATE, STEP_EXECUTE, STEP_FORMAT]);
    }

    #[tokio::test]
    async fn test_deadline_marks_saga_terminal_on_dequeue() {
        let (ctx, bus) = context(
            Arc::new(MockLlmClient::canned()),
            Arc::new(StubToolServers::healthy()),
        );

        let saga_id = submit_query(&ctx, "acme", "slow question").await.unwrap();

        // Backdate the record past the deadline.
        let mut record = ctx.store.get(saga_id).await.unwrap().unwrap();
        record.created_at = Utc::now() - chrono::Duration::seconds(600);
        ctx.store.create(&record).await.unwrap();

        let delivery = bus.consume(TOPIC_INITIATED).await.unwrap();
        handle_delivery(&ctx, TOPIC_INITIATED, delivery).await;

        let record = ctx.store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Error);
        assert!(record
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("SagaDeadline"));
    }

    #[tokio::test]
    async fn test_no_live_tool_requeues_the_message() {
        struct NoToolDispatcher;

        #[async_trait]
        impl ToolDispatcher for NoToolDispatcher {
            async fn call(
                &self,
                role: &str,
                _tool: &str,
                _args: Value,
            ) -> crate::error::Result<McpToolResult> {
                Err(Error::NoLiveTool(role.to_string()))
            }
        }

        let provider = MockLlmClient::scripted(vec![sql_response("SELECT 1")]);
        let (ctx, bus) = context(Arc::new(provider), Arc::new(NoToolDispatcher));

        let saga_id = submit_query(&ctx, "acme", "q").await.unwrap();

        // Stage 1 completes (its remote tools were never called by the script).
        let delivery = bus.consume(TOPIC_INITIATED).await.unwrap();
        handle_delivery(&ctx, TOPIC_INITIATED, delivery).await;

        // Stage 2 cannot resolve a database server: nacked, not failed.
        let delivery = bus.consume(TOPIC_GENERATED).await.unwrap();
        handle_delivery(&ctx, TOPIC_GENERATED, delivery).await;

        let record = ctx.store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Executing);

        // The message comes back after the requeue delay.
        let redelivered =
            tokio::time::timeout(Duration::from_secs(10), bus.consume(TOPIC_GENERATED))
                .await
                .expect("message requeued")
                .unwrap();
        assert_eq!(redelivered.attempt, 2);
        redelivered.ack().await;
    }
}
