#![deny(missing_docs)]

//! Stage-state tracking and orchestration engine for document ingestion pipelines.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Structured logging and tracing setup.
pub mod logging;
/// Model Context Protocol server implementation.
pub mod mcp;
/// Stage lifecycle counters.
pub mod metrics;
/// Stage chain, stage records, and the orchestrator.
pub mod pipeline;
/// Document Registry boundary.
pub mod registry;
/// In-process stage workers.
pub mod worker;
