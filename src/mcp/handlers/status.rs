//! Handlers for document status tools.

use std::sync::Arc;

use crate::pipeline::{DocumentId, PipelineApi, ProcessingStatus};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, JsonObject},
};
use serde::Deserialize;
use serde_json::json;

use super::{parse_arguments, pipeline_error};

/// Request payload for the `pipeline-status` tool.
#[derive(Debug, Deserialize)]
pub(crate) struct PipelineStatusRequest {
    /// Document to inspect.
    pub(crate) document_id: String,
}

/// Request payload for the `list-documents` tool.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListDocumentsRequest {
    /// Optional aggregate status filter.
    #[serde(default)]
    pub(crate) status: Option<String>,
}

/// Handle the `pipeline-status` tool: summary plus every stage record.
pub(crate) async fn handle_pipeline_status(
    pipeline: &Arc<dyn PipelineApi>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let args: PipelineStatusRequest = parse_arguments(arguments)?;
    let document_id = DocumentId::new(&args.document_id).map_err(pipeline_error)?;
    let summary = pipeline
        .document_summary(&document_id)
        .await
        .map_err(pipeline_error)?;
    let state = pipeline
        .document_state(&document_id)
        .await
        .map_err(pipeline_error)?;

    Ok(CallToolResult::structured(json!({
        "documentId": summary.document_id,
        "processingStatus": summary.processing_status,
        "currentStage": summary.current_stage,
        "progress": summary.progress,
        "stages": state.stages,
    })))
}

/// Handle the `list-documents` tool.
pub(crate) async fn handle_list_documents(
    pipeline: &Arc<dyn PipelineApi>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let args: ListDocumentsRequest = parse_arguments(arguments)?;
    let status = args
        .status
        .as_deref()
        .map(|raw| {
            raw.parse::<ProcessingStatus>().map_err(|_| {
                McpError::invalid_params(format!("Unknown processing status: {raw}"), None)
            })
        })
        .transpose()?;
    let documents = pipeline.list_documents(status).await;
    Ok(CallToolResult::structured(json!({
        "count": documents.len(),
        "documents": documents,
    })))
}
