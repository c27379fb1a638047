//! Handlers for stage-level tools.

use std::sync::Arc;

use crate::{
    config::get_config,
    pipeline::{DocumentId, PipelineApi, PipelineError, StageName},
};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, JsonObject},
};
use serde::Deserialize;
use serde_json::json;

use super::{parse_arguments, pipeline_error};

/// Request payload for the `claimable-documents` tool.
#[derive(Debug, Deserialize)]
pub(crate) struct ClaimableRequest {
    /// Stage to look for work in.
    pub(crate) stage: String,
    /// Optional page size, clamped to the configured bounds.
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

/// Request payload for the `retry-stage` tool.
#[derive(Debug, Deserialize)]
pub(crate) struct RetryStageRequest {
    /// Document whose stage failed.
    pub(crate) document_id: String,
    /// Stage to retry.
    pub(crate) stage: String,
}

fn parse_stage(raw: &str) -> Result<StageName, McpError> {
    raw.parse::<StageName>()
        .map_err(|err| pipeline_error(PipelineError::from(err)))
}

/// Handle the `claimable-documents` tool.
pub(crate) async fn handle_claimable_documents(
    pipeline: &Arc<dyn PipelineApi>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let args: ClaimableRequest = parse_arguments(arguments)?;
    let stage = parse_stage(&args.stage)?;
    let limit = get_config().claimable_limit(args.limit);
    let documents = pipeline.claimable_documents(stage, limit).await;
    Ok(CallToolResult::structured(json!({
        "stage": stage,
        "limit": limit,
        "documents": documents,
    })))
}

/// Handle the `retry-stage` tool: move a failed stage back to processing.
pub(crate) async fn handle_retry_stage(
    pipeline: &Arc<dyn PipelineApi>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let args: RetryStageRequest = parse_arguments(arguments)?;
    let document_id = DocumentId::new(&args.document_id).map_err(pipeline_error)?;
    let stage = parse_stage(&args.stage)?;
    let record = pipeline
        .retry_stage(&document_id, stage)
        .await
        .map_err(pipeline_error)?;
    tracing::info!(
        document_id = %document_id,
        stage = %stage,
        attempt = record.attempt_count,
        "Stage retried via MCP"
    );
    Ok(CallToolResult::structured(json!({
        "documentId": document_id,
        "stage": stage,
        "attemptCount": record.attempt_count,
        "record": record,
    })))
}
