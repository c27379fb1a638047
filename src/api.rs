//! HTTP surface for the pipeline orchestrator.
//!
//! The router wraps any [`PipelineApi`] implementation:
//!
//! - `GET /stages` – Ordered stage chain with each stage's predecessor.
//! - `GET /stages/:stage/claimable` – Documents whose stage may be claimed now (`?limit=`).
//! - `POST /documents`, `GET /documents` – Register a document; list summaries (`?status=`).
//! - `GET|DELETE /documents/:id` – Full stage state; remove the document.
//! - `GET /documents/:id/progress` – Progress percentage, current stage, aggregate status.
//! - `/documents/:id/stages/:stage/...` – Stage record, dependency check, and lifecycle
//!   transitions (`start`, `claim`, `lease`, `progress`, `complete`, `fail`, `skip`, `retry`).
//! - `POST /sweep` – Fail stale `processing` stages immediately.
//! - `GET /metrics` – Lifecycle counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! The MCP server and in-process workers share the same orchestrator, so behavior is identical
//! across interfaces.

use crate::config::get_config;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{
    CurrentStage, DocumentId, DocumentPipelineState, DocumentSummary, Metadata, PipelineApi,
    PipelineError, ProcessingStatus, StageClaim, StageDescriptor, StageName, StageRecord,
    SweptStage, stage_chain,
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Build the HTTP router exposing the pipeline API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: PipelineApi + ?Sized + 'static,
{
    Router::new()
        .route("/stages", get(get_stages))
        .route("/stages/:stage/claimable", get(claimable_documents::<S>))
        .route(
            "/documents",
            get(list_documents::<S>).post(register_document::<S>),
        )
        .route(
            "/documents/:id",
            get(document_state::<S>).delete(remove_document::<S>),
        )
        .route("/documents/:id/progress", get(document_progress::<S>))
        .route("/documents/:id/stages/:stage", get(stage_record::<S>))
        .route(
            "/documents/:id/stages/:stage/can-start",
            get(can_start_stage::<S>),
        )
        .route("/documents/:id/stages/:stage/start", post(start_stage::<S>))
        .route("/documents/:id/stages/:stage/claim", post(claim_stage::<S>))
        .route("/documents/:id/stages/:stage/lease", post(renew_lease::<S>))
        .route(
            "/documents/:id/stages/:stage/progress",
            post(update_progress::<S>),
        )
        .route(
            "/documents/:id/stages/:stage/complete",
            post(complete_stage::<S>),
        )
        .route("/documents/:id/stages/:stage/fail", post(fail_stage::<S>))
        .route("/documents/:id/stages/:stage/skip", post(skip_stage::<S>))
        .route("/documents/:id/stages/:stage/retry", post(retry_stage::<S>))
        .route("/sweep", post(sweep_stale::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

fn parse_target(id: &str, stage: &str) -> Result<(DocumentId, StageName), AppError> {
    Ok((DocumentId::new(id)?, stage.parse::<StageName>().map_err(PipelineError::from)?))
}

/// Response body for `GET /stages`.
#[derive(Serialize)]
struct StagesResponse {
    stages: Vec<StageDescriptor>,
}

async fn get_stages() -> Json<StagesResponse> {
    Json(StagesResponse {
        stages: stage_chain(),
    })
}

#[derive(Deserialize)]
struct ClaimableQuery {
    #[serde(default)]
    limit: Option<usize>,
}

/// Response body for `GET /stages/:stage/claimable`.
#[derive(Serialize)]
struct ClaimableResponse {
    stage: StageName,
    documents: Vec<DocumentId>,
}

/// List documents whose stage is pending with a satisfied predecessor.
async fn claimable_documents<S>(
    State(service): State<Arc<S>>,
    Path(stage): Path<String>,
    Query(query): Query<ClaimableQuery>,
) -> Result<Json<ClaimableResponse>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let stage = stage.parse::<StageName>().map_err(PipelineError::from)?;
    let limit = get_config().claimable_limit(query.limit);
    let documents = service.claimable_documents(stage, limit).await;
    Ok(Json(ClaimableResponse { stage, documents }))
}

/// Request body for `POST /documents`.
#[derive(Deserialize)]
struct RegisterRequest {
    document_id: String,
}

async fn register_document<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<DocumentPipelineState>), AppError>
where
    S: PipelineApi + ?Sized,
{
    let document_id = DocumentId::new(&request.document_id)?;
    let state = service.register_document(&document_id).await?;
    Ok((StatusCode::CREATED, Json(state)))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    status: Option<String>,
}

/// Response body for `GET /documents`.
#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentSummary>,
}

async fn list_documents<S>(
    State(service): State<Arc<S>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DocumentsResponse>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let status = query
        .status
        .map(|raw| {
            raw.parse::<ProcessingStatus>()
                .map_err(|_| AppError::BadRequest(format!("Unknown processing status: {raw}")))
        })
        .transpose()?;
    let documents = service.list_documents(status).await;
    Ok(Json(DocumentsResponse { documents }))
}

async fn document_state<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentPipelineState>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let document_id = DocumentId::new(&id)?;
    Ok(Json(service.document_state(&document_id).await?))
}

async fn remove_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError>
where
    S: PipelineApi + ?Sized,
{
    let document_id = DocumentId::new(&id)?;
    service.remove_document(&document_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Response body for `GET /documents/:id/progress`.
#[derive(Serialize)]
struct ProgressResponse {
    document_id: DocumentId,
    progress: f64,
    current_stage: CurrentStage,
    processing_status: ProcessingStatus,
}

async fn document_progress<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<Json<ProgressResponse>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let document_id = DocumentId::new(&id)?;
    let summary = service.document_summary(&document_id).await?;
    Ok(Json(ProgressResponse {
        document_id: summary.document_id,
        progress: summary.progress,
        current_stage: summary.current_stage,
        processing_status: summary.processing_status,
    }))
}

async fn stage_record<S>(
    State(service): State<Arc<S>>,
    Path((id, stage)): Path<(String, String)>,
) -> Result<Json<StageRecord>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let (document_id, stage) = parse_target(&id, &stage)?;
    Ok(Json(service.stage_record(&document_id, stage).await?))
}

/// Response body for `GET /documents/:id/stages/:stage/can-start`.
#[derive(Serialize)]
struct CanStartResponse {
    can_start: bool,
}

async fn can_start_stage<S>(
    State(service): State<Arc<S>>,
    Path((id, stage)): Path<(String, String)>,
) -> Result<Json<CanStartResponse>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let (document_id, stage) = parse_target(&id, &stage)?;
    let can_start = service.can_start_stage(&document_id, stage).await?;
    Ok(Json(CanStartResponse { can_start }))
}

async fn start_stage<S>(
    State(service): State<Arc<S>>,
    Path((id, stage)): Path<(String, String)>,
) -> Result<Json<StageRecord>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let (document_id, stage) = parse_target(&id, &stage)?;
    Ok(Json(service.start_stage(&document_id, stage).await?))
}

async fn retry_stage<S>(
    State(service): State<Arc<S>>,
    Path((id, stage)): Path<(String, String)>,
) -> Result<Json<StageRecord>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let (document_id, stage) = parse_target(&id, &stage)?;
    Ok(Json(service.retry_stage(&document_id, stage).await?))
}

/// Request body for claim and lease renewal.
#[derive(Deserialize)]
struct LeaseRequest {
    worker_id: String,
    #[serde(default)]
    lease_seconds: Option<u64>,
}

impl LeaseRequest {
    fn lease(&self) -> Result<Option<Duration>, AppError> {
        match self.lease_seconds {
            Some(0) => Err(AppError::BadRequest(
                "lease_seconds must be greater than zero".into(),
            )),
            other => Ok(other.map(Duration::from_secs)),
        }
    }
}

async fn claim_stage<S>(
    State(service): State<Arc<S>>,
    Path((id, stage)): Path<(String, String)>,
    Json(request): Json<LeaseRequest>,
) -> Result<Json<StageClaim>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let (document_id, stage) = parse_target(&id, &stage)?;
    let lease = request.lease()?;
    let claim = service
        .claim_stage(&document_id, stage, &request.worker_id, lease)
        .await?;
    Ok(Json(claim))
}

async fn renew_lease<S>(
    State(service): State<Arc<S>>,
    Path((id, stage)): Path<(String, String)>,
    Json(request): Json<LeaseRequest>,
) -> Result<Json<StageRecord>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let (document_id, stage) = parse_target(&id, &stage)?;
    let lease = request.lease()?;
    let record = service
        .renew_lease(&document_id, stage, &request.worker_id, lease)
        .await?;
    Ok(Json(record))
}

/// Request body for `POST .../progress`.
#[derive(Deserialize)]
struct ProgressRequest {
    progress: u32,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    worker_id: Option<String>,
}

async fn update_progress<S>(
    State(service): State<Arc<S>>,
    Path((id, stage)): Path<(String, String)>,
    Json(request): Json<ProgressRequest>,
) -> Result<Json<StageRecord>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let (document_id, stage) = parse_target(&id, &stage)?;
    let record = service
        .update_progress(
            &document_id,
            stage,
            request.progress,
            request.metadata,
            request.worker_id.as_deref(),
        )
        .await?;
    Ok(Json(record))
}

/// Request body for `POST .../complete`. The body may be omitted entirely.
#[derive(Deserialize, Default)]
struct CompleteRequest {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    worker_id: Option<String>,
}

async fn complete_stage<S>(
    State(service): State<Arc<S>>,
    Path((id, stage)): Path<(String, String)>,
    request: Option<Json<CompleteRequest>>,
) -> Result<Json<StageRecord>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let (document_id, stage) = parse_target(&id, &stage)?;
    let request = request.map(|Json(body)| body).unwrap_or_default();
    let record = service
        .complete_stage(
            &document_id,
            stage,
            request.metadata,
            request.worker_id.as_deref(),
        )
        .await?;
    Ok(Json(record))
}

/// Request body for `POST .../fail`.
#[derive(Deserialize)]
struct FailRequest {
    error: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    worker_id: Option<String>,
}

async fn fail_stage<S>(
    State(service): State<Arc<S>>,
    Path((id, stage)): Path<(String, String)>,
    Json(request): Json<FailRequest>,
) -> Result<Json<StageRecord>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let (document_id, stage) = parse_target(&id, &stage)?;
    let record = service
        .fail_stage(
            &document_id,
            stage,
            request.error,
            request.metadata,
            request.worker_id.as_deref(),
        )
        .await?;
    Ok(Json(record))
}

/// Request body for `POST .../skip`.
#[derive(Deserialize)]
struct SkipRequest {
    reason: String,
    #[serde(default)]
    worker_id: Option<String>,
}

async fn skip_stage<S>(
    State(service): State<Arc<S>>,
    Path((id, stage)): Path<(String, String)>,
    Json(request): Json<SkipRequest>,
) -> Result<Json<StageRecord>, AppError>
where
    S: PipelineApi + ?Sized,
{
    let (document_id, stage) = parse_target(&id, &stage)?;
    let record = service
        .skip_stage(
            &document_id,
            stage,
            request.reason,
            request.worker_id.as_deref(),
        )
        .await?;
    Ok(Json(record))
}

/// Request body for `POST /sweep`.
#[derive(Deserialize, Default)]
struct SweepRequest {
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

/// Response body for `POST /sweep`.
#[derive(Serialize)]
struct SweepResponse {
    swept: Vec<SweptStage>,
}

async fn sweep_stale<S>(
    State(service): State<Arc<S>>,
    request: Option<Json<SweepRequest>>,
) -> Json<SweepResponse>
where
    S: PipelineApi + ?Sized,
{
    let request = request.map(|Json(body)| body).unwrap_or_default();
    let swept = service
        .sweep_stale(request.timeout_seconds.map(Duration::from_secs))
        .await;
    tracing::info!(count = swept.len(), "Manual sweep completed");
    Json(SweepResponse { swept })
}

/// Return the lifecycle counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: PipelineApi + ?Sized,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "stages",
                method: "GET",
                path: "/stages",
                description: "Return the ordered stage chain with each stage's predecessor.",
                request_example: None,
            },
            CommandDescriptor {
                name: "claimable_documents",
                method: "GET",
                path: "/stages/:stage/claimable?limit=25",
                description: "List documents whose stage is pending and whose predecessor completed or was skipped.",
                request_example: None,
            },
            CommandDescriptor {
                name: "register_document",
                method: "POST",
                path: "/documents",
                description: "Create pending records for all eight stages of a new document.",
                request_example: Some(json!({ "document_id": "manual-123" })),
            },
            CommandDescriptor {
                name: "list_documents",
                method: "GET",
                path: "/documents?status=failed",
                description: "List document summaries, optionally filtered by processing status.",
                request_example: None,
            },
            CommandDescriptor {
                name: "document_progress",
                method: "GET",
                path: "/documents/:id/progress",
                description: "Return { \"progress\": number, \"current_stage\": string, \"processing_status\": string }.",
                request_example: None,
            },
            CommandDescriptor {
                name: "claim_stage",
                method: "POST",
                path: "/documents/:id/stages/:stage/claim",
                description: "Atomically claim a pending stage for a worker under a lease. Returns 409 when another worker holds it.",
                request_example: Some(json!({ "worker_id": "ocr-worker-1", "lease_seconds": 300 })),
            },
            CommandDescriptor {
                name: "update_progress",
                method: "POST",
                path: "/documents/:id/stages/:stage/progress",
                description: "Report 0-100 progress on a processing stage and merge metadata.",
                request_example: Some(json!({ "progress": 40, "metadata": { "pages_done": 12 } })),
            },
            CommandDescriptor {
                name: "complete_stage",
                method: "POST",
                path: "/documents/:id/stages/:stage/complete",
                description: "Mark a stage completed; duration is computed from its start time. A worker_id must hold the stage's lease.",
                request_example: Some(json!({ "metadata": { "pages": 30 }, "worker_id": "ocr-worker-1" })),
            },
            CommandDescriptor {
                name: "fail_stage",
                method: "POST",
                path: "/documents/:id/stages/:stage/fail",
                description: "Mark a stage failed. The document becomes failed until the stage is retried.",
                request_example: Some(json!({ "error": "OCR engine timeout" })),
            },
            CommandDescriptor {
                name: "skip_stage",
                method: "POST",
                path: "/documents/:id/stages/:stage/skip",
                description: "Mark a stage skipped; dependents may start.",
                request_example: Some(json!({ "reason": "document has no images" })),
            },
            CommandDescriptor {
                name: "retry_stage",
                method: "POST",
                path: "/documents/:id/stages/:stage/retry",
                description: "Move a failed stage back to processing and increment its attempt count.",
                request_example: None,
            },
            CommandDescriptor {
                name: "sweep",
                method: "POST",
                path: "/sweep",
                description: "Fail processing stages whose lease expired or that exceeded the stale timeout.",
                request_example: Some(json!({ "timeout_seconds": 3600 })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return stage lifecycle counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    Pipeline(PipelineError),
    BadRequest(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Pipeline(
                PipelineError::InvalidDocumentId
                | PipelineError::UnknownStage(_)
                | PipelineError::InvalidWorkerId
                | PipelineError::InvalidLease(_),
            ) => StatusCode::BAD_REQUEST,
            AppError::Pipeline(PipelineError::InvalidProgress(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Pipeline(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            AppError::Pipeline(err) if err.is_conflict() => StatusCode::CONFLICT,
            AppError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::Pipeline(err) => err.to_string(),
            AppError::BadRequest(message) => message,
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self::Pipeline(inner)
    }
}
