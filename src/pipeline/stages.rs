//! Fixed stage chain and per-stage status vocabulary.
//!
//! The chain is linear: every stage except [`StageName::Upload`] has exactly one direct
//! predecessor, and lookups are O(1) through the enum discriminant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of stages in the document pipeline.
pub const STAGE_COUNT: usize = 8;

/// One named step of the document pipeline, declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Raw file accepted into the system.
    Upload = 0,
    /// Text pulled out of the document body.
    TextExtraction = 1,
    /// Embedded figures and scans processed.
    ImageProcessing = 2,
    /// Document type assigned.
    Classification = 3,
    /// Structured metadata extracted.
    MetadataExtraction = 4,
    /// Extracted content persisted.
    Storage = 5,
    /// Embedding vectors generated.
    Embedding = 6,
    /// Search index updated.
    SearchIndexing = 7,
}

impl StageName {
    /// Every stage in chain order.
    pub const ALL: [StageName; STAGE_COUNT] = [
        StageName::Upload,
        StageName::TextExtraction,
        StageName::ImageProcessing,
        StageName::Classification,
        StageName::MetadataExtraction,
        StageName::Storage,
        StageName::Embedding,
        StageName::SearchIndexing,
    ];

    /// Zero-based position of the stage in the chain.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Direct predecessor, or `None` for the first stage.
    pub fn predecessor(self) -> Option<Self> {
        self.index().checked_sub(1).map(|idx| Self::ALL[idx])
    }

    /// Wire name of the stage.
    pub const fn as_str(self) -> &'static str {
        match self {
            StageName::Upload => "upload",
            StageName::TextExtraction => "text_extraction",
            StageName::ImageProcessing => "image_processing",
            StageName::Classification => "classification",
            StageName::MetadataExtraction => "metadata_extraction",
            StageName::Storage => "storage",
            StageName::Embedding => "embedding",
            StageName::SearchIndexing => "search_indexing",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl FromStr for StageName {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Status of a single stage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// A worker is executing the stage.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error; blocks dependents until retried.
    Failed,
    /// Deliberately not executed; satisfies dependents like `Completed`.
    Skipped,
}

impl StageStatus {
    /// Whether a dependent stage may start after this status.
    pub const fn satisfies_dependency(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped)
    }

    /// Wire name of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of one link of the chain, used by discovery surfaces.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StageDescriptor {
    /// Stage being described.
    pub stage: StageName,
    /// Zero-based position in the chain.
    pub position: usize,
    /// Stage that must be completed or skipped first.
    pub predecessor: Option<StageName>,
}

/// Describe the full chain in order.
pub fn stage_chain() -> Vec<StageDescriptor> {
    StageName::ALL
        .into_iter()
        .map(|stage| StageDescriptor {
            stage,
            position: stage.index(),
            predecessor: stage.predecessor(),
        })
        .collect()
}
