//! Derived queries over a document's stage statuses.
//!
//! All functions take statuses in chain order, indexed by [`StageName::index`].

use crate::pipeline::{
    stages::{STAGE_COUNT, StageName, StageStatus},
    types::{CurrentStage, ProcessingStatus},
};

/// Percentage of stages in `completed`.
///
/// Skipped stages satisfy dependents but are not counted here, so a document with skipped
/// stages finishes below 100.
pub fn progress_percent(statuses: &[StageStatus; STAGE_COUNT]) -> f64 {
    let completed = statuses
        .iter()
        .filter(|status| **status == StageStatus::Completed)
        .count();
    completed as f64 / STAGE_COUNT as f64 * 100.0
}

/// First stage that is pending, processing, or failed; `Completed` once none remain.
pub fn current_stage(statuses: &[StageStatus; STAGE_COUNT]) -> CurrentStage {
    StageName::ALL
        .into_iter()
        .find(|stage| !statuses[stage.index()].satisfies_dependency())
        .map_or(CurrentStage::Completed, CurrentStage::Stage)
}

/// Predecessor of `stage` and its status when it has not completed or been skipped.
///
/// `None` means the stage may start; the first stage never has a blocker.
pub fn blocking_predecessor(
    stage: StageName,
    predecessor_status: impl FnOnce(StageName) -> StageStatus,
) -> Option<(StageName, StageStatus)> {
    let predecessor = stage.predecessor()?;
    let status = predecessor_status(predecessor);
    (!status.satisfies_dependency()).then_some((predecessor, status))
}

/// Aggregate document status.
pub fn derive_processing_status(statuses: &[StageStatus; STAGE_COUNT]) -> ProcessingStatus {
    if statuses.contains(&StageStatus::Failed) {
        ProcessingStatus::Failed
    } else if statuses.iter().all(|status| status.satisfies_dependency()) {
        ProcessingStatus::Completed
    } else if statuses.iter().all(|status| *status == StageStatus::Pending) {
        ProcessingStatus::Pending
    } else {
        ProcessingStatus::Processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StageStatus::*;

    fn can_start(statuses: &[StageStatus; STAGE_COUNT], stage: StageName) -> bool {
        blocking_predecessor(stage, |predecessor| statuses[predecessor.index()]).is_none()
    }

    #[test]
    fn fresh_document() {
        let statuses = [Pending; STAGE_COUNT];
        assert_eq!(progress_percent(&statuses), 0.0);
        assert_eq!(current_stage(&statuses), CurrentStage::Stage(StageName::Upload));
        assert_eq!(derive_processing_status(&statuses), ProcessingStatus::Pending);
        assert!(can_start(&statuses, StageName::Upload));
        assert!(!can_start(&statuses, StageName::TextExtraction));
    }

    #[test]
    fn failure_is_reported_as_current_and_blocks_successor() {
        let statuses = [
            Completed, Completed, Skipped, Failed, Pending, Pending, Pending, Pending,
        ];
        assert_eq!(
            current_stage(&statuses),
            CurrentStage::Stage(StageName::Classification)
        );
        assert!(!can_start(&statuses, StageName::MetadataExtraction));
        assert!(can_start(&statuses, StageName::Classification));
        assert_eq!(derive_processing_status(&statuses), ProcessingStatus::Failed);
    }

    #[test]
    fn skipped_stages_do_not_count_toward_progress() {
        let statuses = [
            Completed, Completed, Skipped, Completed, Completed, Completed, Completed, Completed,
        ];
        assert_eq!(current_stage(&statuses), CurrentStage::Completed);
        assert_eq!(progress_percent(&statuses), 87.5);
        assert_eq!(derive_processing_status(&statuses), ProcessingStatus::Completed);
    }

    #[test]
    fn partial_progress_is_processing() {
        let statuses = [
            Completed, Processing, Pending, Pending, Pending, Pending, Pending, Pending,
        ];
        assert_eq!(progress_percent(&statuses), 12.5);
        assert_eq!(derive_processing_status(&statuses), ProcessingStatus::Processing);
        assert!(!can_start(&statuses, StageName::ImageProcessing));
    }

    #[test]
    fn blocker_names_predecessor_and_status() {
        assert_eq!(
            blocking_predecessor(StageName::Storage, |_| Failed),
            Some((StageName::MetadataExtraction, Failed))
        );
        assert_eq!(blocking_predecessor(StageName::Storage, |_| Skipped), None);
        assert_eq!(blocking_predecessor(StageName::Upload, |_| Failed), None);
    }
}
