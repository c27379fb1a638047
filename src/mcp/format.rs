//! Formatting helpers shared across MCP handlers and resources.

use crate::config::Config;
use crate::pipeline::{StageDescriptor, stage_chain};
use rmcp::model::ResourceContents;
use schemars::JsonSchema;
use serde::Serialize;

pub(crate) const APPLICATION_JSON: &str = "application/json";

/// Stage chain returned by the `stages` resource.
#[derive(Debug, Serialize)]
pub(crate) struct StagesSnapshot {
    /// Stages in execution order.
    pub(crate) stages: Vec<StageDescriptor>,
}

impl StagesSnapshot {
    pub(crate) fn current() -> Self {
        Self {
            stages: stage_chain(),
        }
    }
}

/// Top-level settings snapshot describing orchestrator defaults.
#[derive(Debug, Serialize, JsonSchema)]
pub(crate) struct SettingsSnapshot {
    /// Lease and sweep tunables.
    pub(crate) leases: LeaseSettingsSnapshot,
    /// Claimable query defaults.
    pub(crate) claimable: ClaimableSettingsSnapshot,
    /// Whether status changes are pushed to an external registry.
    pub(crate) registry_configured: bool,
}

/// Lease and sweep tunables.
#[derive(Debug, Serialize, JsonSchema)]
pub(crate) struct LeaseSettingsSnapshot {
    /// Lease granted when a claim omits one.
    pub(crate) default_lease_seconds: u64,
    /// Age after which unleased processing stages are failed.
    pub(crate) stale_stage_timeout_seconds: u64,
    /// Background sweep period; `0` when disabled.
    pub(crate) sweep_interval_seconds: u64,
}

/// Claimable query defaults.
#[derive(Debug, Serialize, JsonSchema)]
pub(crate) struct ClaimableSettingsSnapshot {
    /// Page size when callers omit one.
    pub(crate) default_limit: usize,
    /// Upper bound on page sizes.
    pub(crate) max_limit: usize,
}

impl From<&Config> for SettingsSnapshot {
    fn from(config: &Config) -> Self {
        Self {
            leases: LeaseSettingsSnapshot {
                default_lease_seconds: config.default_lease_seconds,
                stale_stage_timeout_seconds: config.stale_stage_timeout_seconds,
                sweep_interval_seconds: config.sweep_interval_seconds,
            },
            claimable: ClaimableSettingsSnapshot {
                default_limit: config.claimable_default_limit,
                max_limit: config.claimable_max_limit,
            },
            registry_configured: config.registry_url.is_some(),
        }
    }
}

/// Serialize a value to JSON, falling back to compact formatting on error.
pub(crate) fn serialize_json<T: Serialize>(value: &T, context_uri: &str) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|error| {
        tracing::warn!(uri = context_uri, %error, "Failed to serialize JSON prettily");
        serde_json::to_string(value).unwrap_or_else(|_| "{}".into())
    })
}

/// Build JSON resource contents for MCP resource responses.
pub(crate) fn json_resource_contents(uri: &str, text: String) -> ResourceContents {
    ResourceContents::TextResourceContents {
        uri: uri.to_string(),
        mime_type: Some(APPLICATION_JSON.into()),
        text,
        meta: None,
    }
}
