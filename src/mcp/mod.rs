//! Model Context Protocol (MCP) integration for the pipeline orchestrator.
//!
//! Agent hosts and dashboards inspect pipeline state over stdio:
//!
//! - Tools: `pipeline-status`, `list-documents`, `claimable-documents`, `retry-stage`, and
//!   `metrics`.
//! - Resources: `mcp://stages`, `mcp://settings`, and a templated
//!   `mcp://documents/{document_id}` returning the full stage state of one document.

mod format;
pub mod handlers;
mod registry;
mod schemas;
mod server;

pub use server::DocpipeMcpServer;
