//! Stage-state tracking: the stage chain, per-stage records, and the orchestrator that
//! applies lifecycle transitions to them.

pub mod clock;
mod orchestrator;
pub mod progress;
mod record;
pub mod stages;
mod store;
mod sweep;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use orchestrator::{OrchestratorSettings, PipelineApi, PipelineOrchestrator};
pub use record::{Metadata, SKIP_REASON_KEY, StageRecord};
pub use stages::{STAGE_COUNT, StageDescriptor, StageName, StageStatus, UnknownStage, stage_chain};
pub use sweep::spawn_sweeper;
pub use types::{
    CurrentStage, DocumentId, DocumentPipelineState, DocumentSummary, PipelineError,
    ProcessingStatus, StageClaim, StageLease, SweptStage,
};
