use crate::pipeline::StageStatus;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing stage lifecycle activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_registered: AtomicU64,
    stages_started: AtomicU64,
    stages_completed: AtomicU64,
    stages_failed: AtomicU64,
    stages_skipped: AtomicU64,
    claims_granted: AtomicU64,
    stages_swept: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly registered document.
    pub fn record_registration(&self) {
        self.documents_registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stage entering `processing`, noting whether it came from a claim.
    pub fn record_start(&self, claimed: bool) {
        self.stages_started.fetch_add(1, Ordering::Relaxed);
        if claimed {
            self.claims_granted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a terminal transition.
    pub fn record_terminal(&self, status: StageStatus) {
        let counter = match status {
            StageStatus::Completed => &self.stages_completed,
            StageStatus::Failed => &self.stages_failed,
            StageStatus::Skipped => &self.stages_skipped,
            StageStatus::Pending | StageStatus::Processing => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record stages failed by the stale sweep.
    pub fn record_swept(&self, count: u64) {
        self.stages_swept.fetch_add(count, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_registered: self.documents_registered.load(Ordering::Relaxed),
            stages_started: self.stages_started.load(Ordering::Relaxed),
            stages_completed: self.stages_completed.load(Ordering::Relaxed),
            stages_failed: self.stages_failed.load(Ordering::Relaxed),
            stages_skipped: self.stages_skipped.load(Ordering::Relaxed),
            claims_granted: self.claims_granted.load(Ordering::Relaxed),
            stages_swept: self.stages_swept.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of lifecycle counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents registered since startup.
    pub documents_registered: u64,
    /// Stage starts, including claims and retries.
    pub stages_started: u64,
    /// Stages completed.
    pub stages_completed: u64,
    /// Stages failed, including sweep failures.
    pub stages_failed: u64,
    /// Stages skipped.
    pub stages_skipped: u64,
    /// Starts that came from a lease claim.
    pub claims_granted: u64,
    /// Stages failed by the stale sweep.
    pub stages_swept: u64,
}
