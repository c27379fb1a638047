//! MCP server entrypoint (stdio transport).
//!
//! Exposes pipeline inspection tools and resources over stdio for agent hosts. Logs go to
//! stderr and the log file because stdout carries the protocol. The stale-stage sweeper runs
//! here too when `SWEEP_INTERVAL_SECONDS` is non-zero.
use anyhow::{Context, Result};
use docpipe::{
    config,
    logging::{self, ConsoleTarget},
    mcp::DocpipeMcpServer,
    pipeline::{self, PipelineApi, PipelineOrchestrator},
};
use rmcp::{service::ServiceExt, transport::stdio};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    config::init_config();
    logging::init_tracing_with(ConsoleTarget::Stderr);

    let orchestrator: Arc<dyn PipelineApi> = Arc::new(
        PipelineOrchestrator::from_config().context("failed to initialize document registry")?,
    );
    let sweep_interval = config::get_config().sweep_interval_seconds;
    let sweeper = (sweep_interval > 0).then(|| {
        pipeline::spawn_sweeper(
            orchestrator.clone(),
            Duration::from_secs(sweep_interval),
            None,
        )
    });

    let server = DocpipeMcpServer::new(orchestrator);
    let service = server
        .serve(stdio())
        .await
        .context("failed to start MCP server over stdio")?;

    let outcome = service
        .waiting()
        .await
        .context("MCP server terminated unexpectedly");
    if let Some(handle) = sweeper {
        handle.abort();
    }
    outcome?;

    Ok(())
}
