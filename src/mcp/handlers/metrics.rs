//! Handler for the metrics tool.

use std::sync::Arc;

use crate::pipeline::PipelineApi;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use serde_json::json;

/// Handle the `metrics` tool, returning the current lifecycle counters.
pub(crate) async fn handle_metrics(
    pipeline: &Arc<dyn PipelineApi>,
) -> Result<CallToolResult, McpError> {
    let snapshot = pipeline.metrics_snapshot();
    Ok(CallToolResult::structured(json!({
        "documentsRegistered": snapshot.documents_registered,
        "stagesStarted": snapshot.stages_started,
        "stagesCompleted": snapshot.stages_completed,
        "stagesFailed": snapshot.stages_failed,
        "stagesSkipped": snapshot.stages_skipped,
        "claimsGranted": snapshot.claims_granted,
        "stagesSwept": snapshot.stages_swept,
    })))
}
