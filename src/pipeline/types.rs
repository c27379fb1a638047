//! Core data types and error definitions for the stage-tracking engine.

use crate::pipeline::{
    record::StageRecord,
    stages::{StageName, StageStatus},
};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;

/// Opaque identifier of a document owned by the Document Registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Validate and wrap a raw identifier. Surrounding whitespace is trimmed.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, PipelineError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(PipelineError::InvalidDocumentId);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Aggregate status of a document across all stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// No stage has been touched.
    #[default]
    Pending,
    /// Work is in flight or some stages remain.
    Processing,
    /// Every stage completed or was skipped.
    Completed,
    /// At least one stage failed.
    Failed,
}

impl ProcessingStatus {
    /// Wire name of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

/// Result of [`crate::pipeline::PipelineOrchestrator::current_stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentStage {
    /// First stage that is pending, processing, or failed.
    Stage(StageName),
    /// Every stage is completed or skipped.
    Completed,
}

impl CurrentStage {
    /// Wire representation: the stage name, or `"completed"`.
    pub const fn as_str(self) -> &'static str {
        match self {
            CurrentStage::Stage(stage) => stage.as_str(),
            CurrentStage::Completed => "completed",
        }
    }
}

impl fmt::Display for CurrentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CurrentStage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Snapshot of every stage record of a document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentPipelineState {
    /// Document the records belong to.
    pub document_id: DocumentId,
    /// Aggregate status derived from the stage records.
    pub processing_status: ProcessingStatus,
    /// Stage records keyed in chain order.
    pub stages: BTreeMap<StageName, StageRecord>,
}

/// Compact dashboard row for a document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    /// Document identifier.
    pub document_id: DocumentId,
    /// Aggregate status.
    pub processing_status: ProcessingStatus,
    /// Stage currently blocking or in flight.
    pub current_stage: CurrentStage,
    /// Percentage of stages completed (skipped stages excluded).
    pub progress: f64,
}

/// Lease granted to the worker that claimed a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLease {
    /// Worker holding the lease.
    pub worker_id: String,
    /// Moment after which another worker may reclaim the stage.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl StageLease {
    /// Whether the lease has lapsed at `now`.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// Successful claim returned to a worker.
#[derive(Debug, Clone, Serialize)]
pub struct StageClaim {
    /// Claimed document.
    pub document_id: DocumentId,
    /// Claimed stage.
    pub stage: StageName,
    /// Worker holding the lease.
    pub worker_id: String,
    /// Attempt number of this execution, starting at 1.
    pub attempt: u32,
    /// Lease expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub lease_expires_at: OffsetDateTime,
}

/// Stage record failed by the stale sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweptStage {
    /// Document whose stage was failed.
    pub document_id: DocumentId,
    /// Stage that was failed.
    pub stage: StageName,
    /// Synthetic error stored on the record.
    pub error: String,
}

/// Errors emitted by the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Document identifier was empty.
    #[error("Document identifier must not be empty")]
    InvalidDocumentId,
    /// No pipeline state exists for the document.
    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),
    /// Pipeline state already exists for the document.
    #[error("Document already registered: {0}")]
    DocumentExists(DocumentId),
    /// Stage name did not match the chain.
    #[error(transparent)]
    UnknownStage(#[from] crate::pipeline::stages::UnknownStage),
    /// Predecessor has not completed or been skipped.
    #[error(
        "Stage {stage} of document {document_id} cannot start: predecessor {predecessor} is {predecessor_status}"
    )]
    DependencyNotSatisfied {
        /// Document being advanced.
        document_id: DocumentId,
        /// Stage the caller tried to start.
        stage: StageName,
        /// Blocking predecessor.
        predecessor: StageName,
        /// Current status of the predecessor.
        predecessor_status: StageStatus,
    },
    /// Operation is not permitted from the record's current status.
    #[error("Cannot {operation} stage {stage} of document {document_id} while it is {status}")]
    InvalidTransition {
        /// Document being mutated.
        document_id: DocumentId,
        /// Stage being mutated.
        stage: StageName,
        /// Status observed under the record lock.
        status: StageStatus,
        /// Operation that was rejected.
        operation: &'static str,
    },
    /// Progress outside of 0..=100.
    #[error("Progress must be between 0 and 100, got {0}")]
    InvalidProgress(u32),
    /// Another worker holds an unexpired lease, or the stage is not pending.
    #[error("Stage {stage} of document {document_id} is not claimable ({reason})")]
    ClaimConflict {
        /// Document being claimed.
        document_id: DocumentId,
        /// Stage being claimed.
        stage: StageName,
        /// Current lease holder or status explaining the conflict.
        reason: String,
    },
    /// Caller reported on, or renewed, a stage whose lease it does not hold.
    #[error("Worker {worker_id} does not hold the lease on stage {stage} of document {document_id}")]
    LeaseNotHeld {
        /// Document being reported on.
        document_id: DocumentId,
        /// Stage being reported on.
        stage: StageName,
        /// Worker that made the call.
        worker_id: String,
    },
    /// Worker identifier was empty.
    #[error("Worker identifier must not be empty")]
    InvalidWorkerId,
    /// Lease duration pushes the expiry past the representable date range.
    #[error("Lease of {0}s is too long")]
    InvalidLease(u64),
}

impl PipelineError {
    /// Whether the error is a not-found condition (unknown document or stage).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::DocumentNotFound(_) | PipelineError::UnknownStage(_)
        )
    }

    /// Whether the error rejects a state transition that conflicts with current state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            PipelineError::DocumentExists(_)
                | PipelineError::DependencyNotSatisfied { .. }
                | PipelineError::InvalidTransition { .. }
                | PipelineError::ClaimConflict { .. }
                | PipelineError::LeaseNotHeld { .. }
        )
    }
}
