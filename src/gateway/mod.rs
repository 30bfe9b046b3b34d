//! Gateway HTTP surface
//!
//! The external face of the engine:
//! - `POST /tenants/{tenant_id}/query` - submit a question, 202 + saga id
//! - `GET  /query/{saga_id}` - poll status/result
//! - `POST /tenants/{tenant_id}/documents` - upload a document into the KB
//! - `POST /kb/ask` - retrieval-only question answering
//! - `GET  /health`
//!
//! Submission returns immediately; clients poll at ~1s with a soft timeout
//! of 60s. Heavy work happens in the stage workers, not in handlers.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::Error;
use crate::kb::{IngestRequest, RetrievalQa, TOPIC_KB_INGEST};
use crate::saga::record::{SagaRecord, StepRecord};
use crate::saga::{submit_query, SagaStatus, StageContext};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Saga stage context (store, bus, provider, dispatcher)
    pub ctx: Arc<StageContext>,
    /// Retrieval-only Q&A service
    pub qa: Arc<RetrievalQa>,
}

/// Build the gateway router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tenants/{tenant_id}/query", post(submit_handler))
        .route("/query/{saga_id}", get(status_handler))
        .route("/tenants/{tenant_id}/documents", post(upload_handler))
        .route("/kb/ask", post(ask_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---- Error handling ----

struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) | Error::NoContextAvailable => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError(Error::from(err))
    }
}

// ---- Request / response types ----

#[derive(Deserialize)]
struct SubmitRequest {
    question: String,
}

#[derive(Serialize)]
struct SubmitResponse {
    saga_id: Uuid,
}

/// The saga record minus internal-only fields
#[derive(Serialize)]
struct SagaResult {
    saga_id: Uuid,
    tenant_id: String,
    question: String,
    status: SagaStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    generated_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_results: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    formatted_response: Option<String>,
    is_irrelevant: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    call_stack: Vec<StepRecord>,
    total_duration_ms: u64,
    total_tokens: u32,
}

impl From<SagaRecord> for SagaResult {
    fn from(record: SagaRecord) -> Self {
        SagaResult {
            saga_id: record.saga_id,
            tenant_id: record.tenant_id,
            question: record.question,
            status: record.status,
            generated_sql: record.generated_sql,
            raw_results: record.raw_results,
            formatted_response: record.formatted_response,
            is_irrelevant: record.is_irrelevant,
            error_message: record.error_message,
            call_stack: record.call_stack,
            total_duration_ms: record.total_duration_ms,
            total_tokens: record.total_tokens,
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: SagaStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    result: SagaResult,
}

#[derive(Serialize)]
struct UploadResponse {
    file_id: Uuid,
}

#[derive(Deserialize)]
struct AskRequest {
    tenant_id: String,
    query: String,
}

// ---- Handlers ----

async fn submit_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    if request.question.trim().is_empty() {
        return Err(Error::InvalidInput("question must not be empty".into()).into());
    }

    let saga_id = submit_query(&state.ctx, tenant_id, request.question).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { saga_id })))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(saga_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    let record = state
        .ctx
        .store
        .get(saga_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("saga {}", saga_id)))?;

    Ok(Json(StatusResponse {
        status: record.status,
        message: record.error_message.clone(),
        result: record.into(),
    }))
}

async fn upload_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidInput(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(|f| f.to_string())
            .ok_or_else(|| Error::InvalidInput("file field needs a filename".into()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidInput(format!("Failed to read upload: {}", e)))?;

        let request = IngestRequest::new(&tenant_id, &filename, &bytes);
        state
            .ctx
            .bus
            .publish(TOPIC_KB_INGEST, serde_json::to_value(&request)?)
            .await?;

        let file_id = Uuid::new_v4();
        info!(
            "Queued {} ({} bytes) for tenant {} as {}",
            filename,
            bytes.len(),
            tenant_id,
            file_id
        );
        return Ok(Json(UploadResponse { file_id }));
    }

    Err(Error::InvalidInput("multipart body had no 'file' field".into()).into())
}

async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<crate::kb::RetrievalAnswer>, AppError> {
    let answer = state.qa.ask(&request.tenant_id, &request.query).await?;
    Ok(Json(answer))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockLlmClient;
    use crate::agent::tool_loop::LoopConfig;
    use crate::core::{MemoryBus, MemoryStateStore, MemoryVectorStore, MessageBus};
    use crate::kb::HashEmbedder;
    use crate::mcp::{McpContent, McpToolResult};
    use crate::saga::SagaStore;
    use crate::tools::ToolDispatcher;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    struct NullDispatcher;

    #[async_trait]
    impl ToolDispatcher for NullDispatcher {
        async fn call(
            &self,
            _role: &str,
            _tool: &str,
            _args: Value,
        ) -> crate::error::Result<McpToolResult> {
            Ok(McpToolResult {
                content: vec![McpContent {
                    content_type: "text".into(),
                    text: Some("ok".into()),
                }],
                is_error: false,
            })
        }
    }

    fn test_state() -> (AppState, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let embedder = Arc::new(HashEmbedder::default());
        let vectors = Arc::new(MemoryVectorStore::new());
        let provider = Arc::new(MockLlmClient::canned());

        let ctx = Arc::new(StageContext {
            store: SagaStore::new(Arc::new(MemoryStateStore::new())),
            bus: bus.clone(),
            provider: provider.clone(),
            dispatcher: Arc::new(NullDispatcher),
            loop_config: LoopConfig::default(),
            saga_deadline: Duration::from_secs(300),
        });
        let qa = Arc::new(RetrievalQa::new(embedder, vectors, provider));

        (AppState { ctx, qa }, bus)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_202_and_queues_stage_one() {
        let (state, bus) = test_state();
        let app = router(state.clone());

        let response = app
            .oneshot(
                Request::post("/tenants/acme/query")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"question": "top 5 customers"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        let saga_id: Uuid = serde_json::from_value(body["saga_id"].clone()).unwrap();

        assert_eq!(bus.queued_len(crate::saga::TOPIC_INITIATED).await, 1);
        let record = state.ctx.store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(record.status, SagaStatus::Pending);
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_question() {
        let (state, _bus) = test_state();
        let app = router(state);

        let response = app
            .oneshot(
                Request::post("/tenants/acme/query")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"question": "  "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_returns_record_and_404_for_unknown() {
        let (state, _bus) = test_state();
        let app = router(state.clone());

        let saga_id = submit_query(&state.ctx, "acme", "a question").await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/query/{}", saga_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "pending");
        assert_eq!(body["result"]["question"], "a question");
        // Internal-only fields stay internal.
        assert!(body["result"].get("retries_remaining").is_none());

        let response = app
            .oneshot(
                Request::get(format!("/query/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_publishes_ingest_message() {
        let (state, bus) = test_state();
        let app = router(state);

        let boundary = "sqlsight-test-boundary";
        let body = format!(
            "--{b}\r\ncontent-disposition: form-data; name=\"file\"; filename=\"glossary.md\"\r\ncontent-type: text/markdown\r\n\r\nRevenue is quantity times price.\r\n--{b}--\r\n",
            b = boundary
        );

        let response = app
            .oneshot(
                Request::post("/tenants/acme/documents")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={}", boundary),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body.get("file_id").is_some());

        let delivery = bus.consume(TOPIC_KB_INGEST).await.unwrap();
        let request: IngestRequest = serde_json::from_value(delivery.payload.clone()).unwrap();
        assert_eq!(request.tenant_id, "acme");
        assert_eq!(request.filename, "glossary.md");
        assert_eq!(request.bytes().unwrap(), b"Revenue is quantity times price.");
        delivery.ack().await;
    }

    #[tokio::test]
    async fn test_ask_with_empty_collection_is_404() {
        let (state, _bus) = test_state();
        let app = router(state);

        let response = app
            .oneshot(
                Request::post("/kb/ask")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"tenant_id": "acme", "query": "revenue?"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
