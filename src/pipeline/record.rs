//! Per-stage record and its state transitions.
//!
//! Transitions here are pure field updates. Locking, dependency checks, and aggregate
//! bookkeeping live in the orchestrator.

use crate::pipeline::{clock::checked_deadline, stages::StageStatus, types::StageLease};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use time::OffsetDateTime;

/// Opaque key-value data attached to a stage record.
pub type Metadata = Map<String, Value>;

/// Metadata key under which `skip_stage` stores its reason.
pub const SKIP_REASON_KEY: &str = "skip_reason";

/// Status, timing, error, and metadata tracked for one document at one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Current status.
    pub status: StageStatus,
    /// Last time the stage was started, claimed, or retried.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Set on terminal transitions only.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Seconds between `started_at` and the terminal transition.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Worker-reported progress, 0–100.
    #[serde(default)]
    pub progress: u8,
    /// Error text attached by the last failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Opaque key-value data reported by workers.
    #[serde(default)]
    pub metadata: Metadata,
    /// Number of times the stage has been started.
    #[serde(default)]
    pub attempt_count: u32,
    /// Lease held by the claiming worker, if any.
    #[serde(default)]
    pub lease: Option<StageLease>,
}

impl StageRecord {
    /// Enter `processing`, restarting the timer and clearing terminal fields.
    pub(crate) fn begin(&mut self, now: OffsetDateTime) {
        self.status = StageStatus::Processing;
        self.started_at = Some(now);
        self.completed_at = None;
        self.duration_seconds = None;
        self.progress = 0;
        self.error = None;
        self.lease = None;
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    /// Enter `processing` on behalf of a leasing worker.
    pub(crate) fn claim(&mut self, now: OffsetDateTime, lease: StageLease) {
        self.begin(now);
        self.lease = Some(lease);
    }

    /// Record worker progress. Caller guarantees the record is processing.
    pub(crate) fn set_progress(&mut self, progress: u8, metadata: Metadata) {
        self.progress = progress;
        merge_metadata(&mut self.metadata, metadata);
    }

    /// Mark completed. Returns `false` when the record was already completed, in which case
    /// only the metadata is merged and the first completion's timing is kept.
    pub(crate) fn complete(&mut self, now: OffsetDateTime, metadata: Metadata) -> bool {
        merge_metadata(&mut self.metadata, metadata);
        if self.status == StageStatus::Completed {
            return false;
        }
        self.finish(now, StageStatus::Completed);
        self.progress = 100;
        true
    }

    /// Mark failed with the supplied error text.
    pub(crate) fn fail(&mut self, now: OffsetDateTime, error: String, metadata: Metadata) {
        merge_metadata(&mut self.metadata, metadata);
        self.finish(now, StageStatus::Failed);
        self.error = Some(error);
    }

    /// Mark skipped, storing the reason in metadata.
    pub(crate) fn skip(&mut self, now: OffsetDateTime, reason: String) {
        self.metadata
            .insert(SKIP_REASON_KEY.to_string(), Value::String(reason));
        self.finish(now, StageStatus::Skipped);
    }

    /// Explain why a processing record should be failed by the sweep, if it should.
    pub(crate) fn stale_reason(&self, now: OffsetDateTime, timeout: Duration) -> Option<String> {
        if self.status != StageStatus::Processing {
            return None;
        }
        match (&self.lease, self.started_at) {
            (Some(lease), _) if lease.is_expired(now) => Some(format!(
                "lease held by worker {} expired without a terminal report",
                lease.worker_id
            )),
            (Some(_), _) => None,
            (None, Some(started_at)) => checked_deadline(started_at, timeout)
                .filter(|deadline| *deadline <= now)
                .map(|_| {
                    format!(
                        "stage timed out after {}s without a terminal report",
                        timeout.as_secs()
                    )
                }),
            (None, None) => Some("stage is processing without a start time".to_string()),
        }
    }

    fn finish(&mut self, now: OffsetDateTime, status: StageStatus) {
        self.duration_seconds = Some(
            self.started_at
                .map(|started_at| (now - started_at).as_seconds_f64().max(0.0))
                .unwrap_or(0.0),
        );
        self.completed_at = Some(now);
        self.status = status;
        self.lease = None;
        if status != StageStatus::Failed {
            self.error = None;
        }
    }
}

/// Shallow merge: keys from `updates` replace keys in `target`.
fn merge_metadata(target: &mut Metadata, updates: Metadata) {
    for (key, value) in updates {
        target.insert(key, value);
    }
}
