//! In-memory stage-state store with one lock per `(document, stage)` record.

use crate::pipeline::{
    progress::derive_processing_status,
    record::StageRecord,
    stages::{STAGE_COUNT, StageName, StageStatus},
    types::{DocumentId, DocumentPipelineState, PipelineError, ProcessingStatus},
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Stage records of one document. Each record has its own lock; callers never hold more
/// than one record lock at a time.
pub(crate) struct DocumentEntry {
    stages: [Mutex<StageRecord>; STAGE_COUNT],
    processing_status: Mutex<ProcessingStatus>,
}

impl DocumentEntry {
    fn new() -> Self {
        Self {
            stages: std::array::from_fn(|_| Mutex::new(StageRecord::default())),
            processing_status: Mutex::new(ProcessingStatus::Pending),
        }
    }

    /// Lock a single stage record for a read-modify-write.
    pub(crate) async fn lock(&self, stage: StageName) -> MutexGuard<'_, StageRecord> {
        self.stages[stage.index()].lock().await
    }

    /// Read the status of a single stage.
    pub(crate) async fn status(&self, stage: StageName) -> StageStatus {
        self.lock(stage).await.status
    }

    /// Read every stage status in chain order, locking one record at a time.
    pub(crate) async fn statuses(&self) -> [StageStatus; STAGE_COUNT] {
        let mut statuses = [StageStatus::Pending; STAGE_COUNT];
        for stage in StageName::ALL {
            statuses[stage.index()] = self.status(stage).await;
        }
        statuses
    }

    /// Aggregate status as of the last refresh.
    pub(crate) async fn processing_status(&self) -> ProcessingStatus {
        *self.processing_status.lock().await
    }

    /// Re-derive the aggregate status from the records.
    ///
    /// Returns the previous status together with the guard, which now holds the new one.
    /// Keep the guard until side effects of the change are done so that refreshes of the same
    /// document are observed in order. The aggregate lock is always acquired before any
    /// record lock.
    pub(crate) async fn refresh_processing_status(
        &self,
    ) -> (MutexGuard<'_, ProcessingStatus>, ProcessingStatus) {
        let mut guard = self.processing_status.lock().await;
        let derived = derive_processing_status(&self.statuses().await);
        let previous = std::mem::replace(&mut *guard, derived);
        (guard, previous)
    }

    /// Copy every record into an owned snapshot.
    pub(crate) async fn snapshot(&self, document_id: &DocumentId) -> DocumentPipelineState {
        let mut stages = BTreeMap::new();
        for stage in StageName::ALL {
            stages.insert(stage, self.lock(stage).await.clone());
        }
        let processing_status = *self.processing_status.lock().await;
        DocumentPipelineState {
            document_id: document_id.clone(),
            processing_status,
            stages,
        }
    }
}

/// Map of documents to their stage records.
///
/// The map lock is held only long enough to clone an entry handle, so record mutations on
/// different documents never contend on it.
#[derive(Default)]
pub(crate) struct PipelineStore {
    documents: RwLock<BTreeMap<DocumentId, Arc<DocumentEntry>>>,
}

impl PipelineStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create pending records for a new document.
    pub(crate) async fn insert(&self, document_id: DocumentId) -> Result<(), PipelineError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&document_id) {
            return Err(PipelineError::DocumentExists(document_id));
        }
        documents.insert(document_id, Arc::new(DocumentEntry::new()));
        Ok(())
    }

    /// Drop a document and all of its stage records.
    pub(crate) async fn remove(&self, document_id: &DocumentId) -> Result<(), PipelineError> {
        self.documents
            .write()
            .await
            .remove(document_id)
            .map(|_| ())
            .ok_or_else(|| PipelineError::DocumentNotFound(document_id.clone()))
    }

    /// Fetch a handle to a document's records.
    pub(crate) async fn get(
        &self,
        document_id: &DocumentId,
    ) -> Result<Arc<DocumentEntry>, PipelineError> {
        self.documents
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| PipelineError::DocumentNotFound(document_id.clone()))
    }

    /// Handles to every document, ordered by identifier.
    pub(crate) async fn entries(&self) -> Vec<(DocumentId, Arc<DocumentEntry>)> {
        self.documents
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect()
    }
}
