//! Pipeline orchestrator: stage lifecycle operations and derived queries.

use crate::{
    config::{Config, get_config},
    metrics::{MetricsSnapshot, PipelineMetrics},
    pipeline::{
        clock::{Clock, SystemClock, checked_deadline},
        progress::{blocking_predecessor, current_stage, progress_percent},
        record::{Metadata, StageRecord},
        stages::{StageName, StageStatus},
        store::{DocumentEntry, PipelineStore},
        types::{
            CurrentStage, DocumentId, DocumentPipelineState, DocumentSummary, PipelineError,
            ProcessingStatus, StageClaim, StageLease, SweptStage,
        },
    },
    registry::{DocumentRegistry, HttpDocumentRegistry, InMemoryRegistry, RegistryError},
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Tunables applied by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Lease granted to claims that do not request a duration.
    pub default_lease: Duration,
    /// Age after which an unleased `processing` stage is considered stale.
    pub stale_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OrchestratorSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_lease: Duration::from_secs(config.default_lease_seconds),
            stale_timeout: Duration::from_secs(config.stale_stage_timeout_seconds),
        }
    }
}

/// Owns every stage record and applies lifecycle transitions to them.
///
/// Each mutation is a single read-modify-write under the lock of one `(document, stage)`
/// record. Dependency checks read the predecessor under its own lock before the target is
/// locked. Share the orchestrator through an `Arc`; the HTTP surface, MCP tools, sweeper,
/// and in-process workers all use the same instance.
pub struct PipelineOrchestrator {
    store: PipelineStore,
    registry: Arc<dyn DocumentRegistry>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    settings: OrchestratorSettings,
}

/// Abstraction over the orchestrator used by external surfaces (HTTP, workers).
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Create pending records for a newly ingested document.
    async fn register_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentPipelineState, PipelineError>;

    /// Remove a document together with all of its stage records.
    async fn remove_document(&self, document_id: &DocumentId) -> Result<(), PipelineError>;

    /// Snapshot all stage records of a document.
    async fn document_state(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentPipelineState, PipelineError>;

    /// Snapshot one stage record.
    async fn stage_record(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<StageRecord, PipelineError>;

    /// Whether `stage` may start for the document.
    async fn can_start_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<bool, PipelineError>;

    /// Enter `processing` without a lease.
    async fn start_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<StageRecord, PipelineError>;

    /// Move a failed stage back to `processing`.
    async fn retry_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<StageRecord, PipelineError>;

    /// Atomically move a pending (or lease-expired) stage to `processing` for one worker.
    async fn claim_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        worker_id: &str,
        lease: Option<Duration>,
    ) -> Result<StageClaim, PipelineError>;

    /// Extend a lease held by `worker_id`.
    async fn renew_lease(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        worker_id: &str,
        lease: Option<Duration>,
    ) -> Result<StageRecord, PipelineError>;

    /// Report progress on a processing stage.
    ///
    /// Operations that take a `worker_id` reject it with [`PipelineError::LeaseNotHeld`]
    /// unless that worker holds the record's lease. `None` skips the check.
    async fn update_progress(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        progress: u32,
        metadata: Metadata,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError>;

    /// Mark a stage completed.
    async fn complete_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        metadata: Metadata,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError>;

    /// Mark a stage failed; the document becomes failed.
    async fn fail_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        error: String,
        metadata: Metadata,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError>;

    /// Mark a stage skipped.
    async fn skip_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        reason: String,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError>;

    /// Progress, current stage, and aggregate status of a document.
    async fn document_summary(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentSummary, PipelineError>;

    /// Summaries of every document, optionally filtered by aggregate status.
    async fn list_documents(&self, status: Option<ProcessingStatus>) -> Vec<DocumentSummary>;

    /// Documents whose `stage` is pending and may start now.
    async fn claimable_documents(&self, stage: StageName, limit: usize) -> Vec<DocumentId>;

    /// Fail stale processing stages.
    async fn sweep_stale(&self, timeout: Option<Duration>) -> Vec<SweptStage>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl PipelineOrchestrator {
    /// Build an orchestrator that reports document status to `registry`.
    pub fn new(registry: Arc<dyn DocumentRegistry>, settings: OrchestratorSettings) -> Self {
        Self {
            store: PipelineStore::new(),
            registry,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(PipelineMetrics::new()),
            settings,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build an orchestrator from the global configuration.
    ///
    /// Uses [`HttpDocumentRegistry`] when `REGISTRY_URL` is set, otherwise an in-memory registry.
    pub fn from_config() -> Result<Self, RegistryError> {
        let config = get_config();
        let registry: Arc<dyn DocumentRegistry> = match config.registry_url.as_deref() {
            Some(url) => {
                tracing::info!(url, "Using HTTP document registry");
                Arc::new(HttpDocumentRegistry::new(
                    url,
                    config.registry_api_key.clone(),
                )?)
            }
            None => {
                tracing::info!("REGISTRY_URL not set; using in-memory document registry");
                Arc::new(InMemoryRegistry::new())
            }
        };
        Ok(Self::new(registry, OrchestratorSettings::from_config(config)))
    }

    /// Effective settings.
    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    /// Create pending records for a newly ingested document.
    pub async fn register_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentPipelineState, PipelineError> {
        self.store.insert(document_id.clone()).await?;
        self.metrics.record_registration();
        tracing::info!(document_id = %document_id, "Document registered");
        self.document_state(document_id).await
    }

    /// Remove a document together with all of its stage records.
    pub async fn remove_document(&self, document_id: &DocumentId) -> Result<(), PipelineError> {
        self.store.remove(document_id).await?;
        tracing::info!(document_id = %document_id, "Document removed");
        Ok(())
    }

    /// Snapshot all stage records of a document.
    pub async fn document_state(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentPipelineState, PipelineError> {
        let entry = self.store.get(document_id).await?;
        Ok(entry.snapshot(document_id).await)
    }

    /// Snapshot one stage record.
    pub async fn stage_record(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<StageRecord, PipelineError> {
        let entry = self.store.get(document_id).await?;
        let record = entry.lock(stage).await.clone();
        Ok(record)
    }

    /// `true` for the first stage, otherwise whether the predecessor completed or was skipped.
    pub async fn can_start_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<bool, PipelineError> {
        let entry = self.store.get(document_id).await?;
        Ok(dependency_blocker(&entry, stage).await.is_none())
    }

    /// Enter `processing`, restarting the timer if the stage was already running.
    ///
    /// Also serves as a retry entry point for failed stages.
    pub async fn start_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<StageRecord, PipelineError> {
        let entry = self.store.get(document_id).await?;
        ensure_dependency(&entry, document_id, stage).await?;

        let record = {
            let mut record = entry.lock(stage).await;
            record.begin(self.clock.now());
            record.clone()
        };
        self.metrics.record_start(false);
        tracing::info!(
            document_id = %document_id,
            stage = %stage,
            attempt = record.attempt_count,
            "Stage started"
        );
        self.settle(document_id, &entry).await;
        Ok(record)
    }

    /// Move a failed stage back to `processing`. Rejects stages that are not failed.
    pub async fn retry_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<StageRecord, PipelineError> {
        let entry = self.store.get(document_id).await?;
        ensure_dependency(&entry, document_id, stage).await?;

        let record = {
            let mut record = entry.lock(stage).await;
            if record.status != StageStatus::Failed {
                return Err(PipelineError::InvalidTransition {
                    document_id: document_id.clone(),
                    stage,
                    status: record.status,
                    operation: "retry",
                });
            }
            record.begin(self.clock.now());
            record.clone()
        };
        self.metrics.record_start(false);
        tracing::info!(
            document_id = %document_id,
            stage = %stage,
            attempt = record.attempt_count,
            "Stage retried"
        );
        self.settle(document_id, &entry).await;
        Ok(record)
    }

    /// Claim a stage for `worker_id` with a compare-and-swap on the record's status.
    ///
    /// Succeeds when the dependency is satisfied and the record is `pending`, or `processing`
    /// under a lease that has expired.
    pub async fn claim_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        worker_id: &str,
        lease: Option<Duration>,
    ) -> Result<StageClaim, PipelineError> {
        let worker_id = worker_id.trim();
        if worker_id.is_empty() {
            return Err(PipelineError::InvalidWorkerId);
        }
        let lease = lease.unwrap_or(self.settings.default_lease);
        let entry = self.store.get(document_id).await?;
        ensure_dependency(&entry, document_id, stage).await?;

        let claim = {
            let mut record = entry.lock(stage).await;
            let now = self.clock.now();
            let expires_at = checked_deadline(now, lease)
                .ok_or(PipelineError::InvalidLease(lease.as_secs()))?;
            match (record.status, record.lease.as_ref()) {
                (StageStatus::Pending, _) => {}
                (StageStatus::Processing, Some(held)) if held.is_expired(now) => {
                    tracing::warn!(
                        document_id = %document_id,
                        stage = %stage,
                        previous_worker = %held.worker_id,
                        worker_id,
                        "Reclaiming stage with expired lease"
                    );
                }
                (StageStatus::Processing, Some(held)) => {
                    return Err(PipelineError::ClaimConflict {
                        document_id: document_id.clone(),
                        stage,
                        reason: format!("leased by worker {}", held.worker_id),
                    });
                }
                (status, _) => {
                    return Err(PipelineError::ClaimConflict {
                        document_id: document_id.clone(),
                        stage,
                        reason: format!("stage is {status}"),
                    });
                }
            }

            record.claim(
                now,
                StageLease {
                    worker_id: worker_id.to_string(),
                    expires_at,
                },
            );
            StageClaim {
                document_id: document_id.clone(),
                stage,
                worker_id: worker_id.to_string(),
                attempt: record.attempt_count,
                lease_expires_at: expires_at,
            }
        };
        self.metrics.record_start(true);
        tracing::info!(
            document_id = %document_id,
            stage = %stage,
            worker_id,
            attempt = claim.attempt,
            lease_seconds = lease.as_secs(),
            "Stage claimed"
        );
        self.settle(document_id, &entry).await;
        Ok(claim)
    }

    /// Extend the lease held by `worker_id` on a processing stage.
    pub async fn renew_lease(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        worker_id: &str,
        lease: Option<Duration>,
    ) -> Result<StageRecord, PipelineError> {
        let lease = lease.unwrap_or(self.settings.default_lease);
        let entry = self.store.get(document_id).await?;
        let mut record = entry.lock(stage).await;
        let now = self.clock.now();
        let expires_at =
            checked_deadline(now, lease).ok_or(PipelineError::InvalidLease(lease.as_secs()))?;
        let processing = record.status == StageStatus::Processing;
        match record.lease.as_mut() {
            Some(held) if processing && held.worker_id == worker_id => {
                held.expires_at = expires_at;
            }
            _ => {
                return Err(PipelineError::LeaseNotHeld {
                    document_id: document_id.clone(),
                    stage,
                    worker_id: worker_id.to_string(),
                });
            }
        }
        tracing::debug!(
            document_id = %document_id,
            stage = %stage,
            worker_id,
            lease_seconds = lease.as_secs(),
            "Lease renewed"
        );
        Ok(record.clone())
    }

    /// Report progress on a processing stage, merging metadata. Timestamps are untouched.
    ///
    /// A `worker_id` must match the record's lease holder.
    pub async fn update_progress(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        progress: u32,
        metadata: Metadata,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError> {
        let percent = u8::try_from(progress)
            .ok()
            .filter(|value| *value <= 100)
            .ok_or(PipelineError::InvalidProgress(progress))?;
        let entry = self.store.get(document_id).await?;
        let mut record = entry.lock(stage).await;
        ensure_lease_holder(&record, document_id, stage, worker_id)?;
        if record.status != StageStatus::Processing {
            return Err(PipelineError::InvalidTransition {
                document_id: document_id.clone(),
                stage,
                status: record.status,
                operation: "report progress on",
            });
        }
        record.set_progress(percent, metadata);
        tracing::debug!(
            document_id = %document_id,
            stage = %stage,
            progress = percent,
            "Stage progress updated"
        );
        Ok(record.clone())
    }

    /// Mark a stage completed, computing its duration from `started_at`.
    ///
    /// Completing an already-completed stage only merges metadata. A `worker_id` must match
    /// the record's lease holder.
    pub async fn complete_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        metadata: Metadata,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError> {
        let entry = self.store.get(document_id).await?;
        let (record, changed) = {
            let mut record = entry.lock(stage).await;
            ensure_lease_holder(&record, document_id, stage, worker_id)?;
            let changed = record.complete(self.clock.now(), metadata);
            (record.clone(), changed)
        };
        if changed {
            self.metrics.record_terminal(StageStatus::Completed);
            tracing::info!(
                document_id = %document_id,
                stage = %stage,
                duration_seconds = record.duration_seconds,
                "Stage completed"
            );
            self.settle(document_id, &entry).await;
        } else {
            tracing::debug!(
                document_id = %document_id,
                stage = %stage,
                "Stage already completed; metadata merged"
            );
        }
        Ok(record)
    }

    /// Mark a stage failed and the document failed. The stage stays retryable.
    pub async fn fail_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        error: String,
        metadata: Metadata,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError> {
        let entry = self.store.get(document_id).await?;
        let record = {
            let mut record = entry.lock(stage).await;
            ensure_lease_holder(&record, document_id, stage, worker_id)?;
            record.fail(self.clock.now(), error, metadata);
            record.clone()
        };
        self.metrics.record_terminal(StageStatus::Failed);
        tracing::warn!(
            document_id = %document_id,
            stage = %stage,
            error = record.error.as_deref().unwrap_or_default(),
            duration_seconds = record.duration_seconds,
            "Stage failed"
        );
        self.settle(document_id, &entry).await;
        Ok(record)
    }

    /// Mark a stage skipped; dependents treat it like a completion.
    pub async fn skip_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        reason: String,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError> {
        let entry = self.store.get(document_id).await?;
        let record = {
            let mut record = entry.lock(stage).await;
            ensure_lease_holder(&record, document_id, stage, worker_id)?;
            record.skip(self.clock.now(), reason);
            record.clone()
        };
        self.metrics.record_terminal(StageStatus::Skipped);
        tracing::info!(document_id = %document_id, stage = %stage, "Stage skipped");
        self.settle(document_id, &entry).await;
        Ok(record)
    }

    /// Percentage of stages completed. Skipped stages are not counted.
    pub async fn progress(&self, document_id: &DocumentId) -> Result<f64, PipelineError> {
        let entry = self.store.get(document_id).await?;
        Ok(progress_percent(&entry.statuses().await))
    }

    /// First pending, processing, or failed stage, or `Completed`.
    pub async fn current_stage(
        &self,
        document_id: &DocumentId,
    ) -> Result<CurrentStage, PipelineError> {
        let entry = self.store.get(document_id).await?;
        Ok(current_stage(&entry.statuses().await))
    }

    /// Progress, current stage, and aggregate status of a document.
    pub async fn document_summary(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentSummary, PipelineError> {
        let entry = self.store.get(document_id).await?;
        Ok(summarize(document_id, &entry).await)
    }

    /// Summaries of every document, optionally filtered by aggregate status.
    pub async fn list_documents(&self, status: Option<ProcessingStatus>) -> Vec<DocumentSummary> {
        let mut summaries = Vec::new();
        for (document_id, entry) in self.store.entries().await {
            let summary = summarize(&document_id, &entry).await;
            if status.is_none_or(|wanted| wanted == summary.processing_status) {
                summaries.push(summary);
            }
        }
        summaries
    }

    /// Documents whose `stage` is pending and whose predecessor is satisfied, by id order.
    pub async fn claimable_documents(&self, stage: StageName, limit: usize) -> Vec<DocumentId> {
        let mut claimable = Vec::new();
        for (document_id, entry) in self.store.entries().await {
            if claimable.len() >= limit {
                break;
            }
            if entry.status(stage).await == StageStatus::Pending
                && dependency_blocker(&entry, stage).await.is_none()
            {
                claimable.push(document_id);
            }
        }
        claimable
    }

    /// Fail every processing stage whose lease expired, or which has no lease and started
    /// longer than `timeout` ago (defaults to the configured stale timeout).
    pub async fn sweep_stale(&self, timeout: Option<Duration>) -> Vec<SweptStage> {
        let timeout = timeout.unwrap_or(self.settings.stale_timeout);
        let mut swept = Vec::new();
        for (document_id, entry) in self.store.entries().await {
            let before = swept.len();
            for stage in StageName::ALL {
                let mut record = entry.lock(stage).await;
                let now = self.clock.now();
                let Some(error) = record.stale_reason(now, timeout) else {
                    continue;
                };
                record.fail(now, error.clone(), Metadata::new());
                drop(record);
                self.metrics.record_terminal(StageStatus::Failed);
                tracing::warn!(
                    document_id = %document_id,
                    stage = %stage,
                    error = %error,
                    "Stale stage failed by sweep"
                );
                swept.push(SweptStage {
                    document_id: document_id.clone(),
                    stage,
                    error,
                });
            }
            if swept.len() > before {
                self.settle(&document_id, &entry).await;
            }
        }
        self.metrics.record_swept(swept.len() as u64);
        swept
    }

    /// Return the current lifecycle metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Re-derive the aggregate status and inform the registry when it reaches a terminal
    /// value or recovers from `failed`.
    ///
    /// The aggregate lock stays held across the registry call, so notifications for one
    /// document reach the registry in the order their statuses were derived.
    async fn settle(&self, document_id: &DocumentId, entry: &DocumentEntry) -> ProcessingStatus {
        let (guard, previous) = entry.refresh_processing_status().await;
        let current = *guard;
        let notify = previous != current
            && (matches!(
                current,
                ProcessingStatus::Failed | ProcessingStatus::Completed
            ) || previous == ProcessingStatus::Failed);
        if notify {
            tracing::info!(
                document_id = %document_id,
                from = %previous,
                to = %current,
                "Document processing status changed"
            );
            if let Err(error) = self.registry.update_status(document_id, current).await {
                tracing::warn!(
                    document_id = %document_id,
                    status = %current,
                    error = %error,
                    "Failed to inform document registry"
                );
            }
        }
        drop(guard);
        current
    }
}

/// Predecessor and its status when it blocks `stage`.
async fn dependency_blocker(
    entry: &DocumentEntry,
    stage: StageName,
) -> Option<(StageName, StageStatus)> {
    let status = entry.status(stage.predecessor()?).await;
    blocking_predecessor(stage, |_| status)
}

/// Reject a report from a worker that does not hold the record's lease.
fn ensure_lease_holder(
    record: &StageRecord,
    document_id: &DocumentId,
    stage: StageName,
    worker_id: Option<&str>,
) -> Result<(), PipelineError> {
    let Some(worker_id) = worker_id else {
        return Ok(());
    };
    match &record.lease {
        Some(held) if held.worker_id == worker_id => Ok(()),
        _ => Err(PipelineError::LeaseNotHeld {
            document_id: document_id.clone(),
            stage,
            worker_id: worker_id.to_string(),
        }),
    }
}

async fn ensure_dependency(
    entry: &DocumentEntry,
    document_id: &DocumentId,
    stage: StageName,
) -> Result<(), PipelineError> {
    match dependency_blocker(entry, stage).await {
        None => Ok(()),
        Some((predecessor, predecessor_status)) => Err(PipelineError::DependencyNotSatisfied {
            document_id: document_id.clone(),
            stage,
            predecessor,
            predecessor_status,
        }),
    }
}

async fn summarize(document_id: &DocumentId, entry: &DocumentEntry) -> DocumentSummary {
    let statuses = entry.statuses().await;
    DocumentSummary {
        document_id: document_id.clone(),
        processing_status: entry.processing_status().await,
        current_stage: current_stage(&statuses),
        progress: progress_percent(&statuses),
    }
}

#[async_trait]
impl PipelineApi for PipelineOrchestrator {
    async fn register_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentPipelineState, PipelineError> {
        PipelineOrchestrator::register_document(self, document_id).await
    }

    async fn remove_document(&self, document_id: &DocumentId) -> Result<(), PipelineError> {
        PipelineOrchestrator::remove_document(self, document_id).await
    }

    async fn document_state(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentPipelineState, PipelineError> {
        PipelineOrchestrator::document_state(self, document_id).await
    }

    async fn stage_record(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<StageRecord, PipelineError> {
        PipelineOrchestrator::stage_record(self, document_id, stage).await
    }

    async fn can_start_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<bool, PipelineError> {
        PipelineOrchestrator::can_start_stage(self, document_id, stage).await
    }

    async fn start_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<StageRecord, PipelineError> {
        PipelineOrchestrator::start_stage(self, document_id, stage).await
    }

    async fn retry_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
    ) -> Result<StageRecord, PipelineError> {
        PipelineOrchestrator::retry_stage(self, document_id, stage).await
    }

    async fn claim_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        worker_id: &str,
        lease: Option<Duration>,
    ) -> Result<StageClaim, PipelineError> {
        PipelineOrchestrator::claim_stage(self, document_id, stage, worker_id, lease).await
    }

    async fn renew_lease(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        worker_id: &str,
        lease: Option<Duration>,
    ) -> Result<StageRecord, PipelineError> {
        PipelineOrchestrator::renew_lease(self, document_id, stage, worker_id, lease).await
    }

    async fn update_progress(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        progress: u32,
        metadata: Metadata,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError> {
        PipelineOrchestrator::update_progress(
            self,
            document_id,
            stage,
            progress,
            metadata,
            worker_id,
        )
        .await
    }

    async fn complete_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        metadata: Metadata,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError> {
        PipelineOrchestrator::complete_stage(self, document_id, stage, metadata, worker_id).await
    }

    async fn fail_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        error: String,
        metadata: Metadata,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError> {
        PipelineOrchestrator::fail_stage(self, document_id, stage, error, metadata, worker_id).await
    }

    async fn skip_stage(
        &self,
        document_id: &DocumentId,
        stage: StageName,
        reason: String,
        worker_id: Option<&str>,
    ) -> Result<StageRecord, PipelineError> {
        PipelineOrchestrator::skip_stage(self, document_id, stage, reason, worker_id).await
    }

    async fn document_summary(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentSummary, PipelineError> {
        PipelineOrchestrator::document_summary(self, document_id).await
    }

    async fn list_documents(&self, status: Option<ProcessingStatus>) -> Vec<DocumentSummary> {
        PipelineOrchestrator::list_documents(self, status).await
    }

    async fn claimable_documents(&self, stage: StageName, limit: usize) -> Vec<DocumentId> {
        PipelineOrchestrator::claimable_documents(self, stage, limit).await
    }

    async fn sweep_stale(&self, timeout: Option<Duration>) -> Vec<SweptStage> {
        PipelineOrchestrator::sweep_stale(self, timeout).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        PipelineOrchestrator::metrics_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::ManualClock;
    use serde_json::json;
    use time::macros::datetime;

    struct Harness {
        orchestrator: Arc<PipelineOrchestrator>,
        registry: Arc<InMemoryRegistry>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(InMemoryRegistry::new());
        let clock = Arc::new(ManualClock::new(datetime!(2026-05-04 08:00:00 UTC)));
        let orchestrator = PipelineOrchestrator::new(
            registry.clone(),
            OrchestratorSettings {
                default_lease: Duration::from_secs(60),
                stale_timeout: Duration::from_secs(600),
            },
        )
        .with_clock(clock.clone());
        Harness {
            orchestrator: Arc::new(orchestrator),
            registry,
            clock,
        }
    }

    fn doc(id: &str) -> DocumentId {
        DocumentId::new(id).expect("valid id")
    }

    fn metadata(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn start_rejects_unsatisfied_dependency() {
        let h = harness();
        let id = doc("manual-1");
        h.orchestrator.register_document(&id).await.unwrap();

        let err = h
            .orchestrator
            .start_stage(&id, StageName::TextExtraction)
            .await
            .expect_err("upload is still pending");
        match err {
            PipelineError::DependencyNotSatisfied {
                predecessor,
                predecessor_status,
                ..
            } => {
                assert_eq!(predecessor, StageName::Upload);
                assert_eq!(predecessor_status, StageStatus::Pending);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn restart_resets_timer() {
        let h = harness();
        let id = doc("manual-2");
        h.orchestrator.register_document(&id).await.unwrap();

        let first = h.orchestrator.start_stage(&id, StageName::Upload).await.unwrap();
        h.clock.advance(Duration::from_secs(45));
        let second = h.orchestrator.start_stage(&id, StageName::Upload).await.unwrap();
        assert!(second.started_at > first.started_at);
        assert_eq!(second.attempt_count, 2);

        h.clock.advance(Duration::from_secs(5));
        let done = h
            .orchestrator
            .complete_stage(&id, StageName::Upload, Metadata::new(), None)
            .await
            .unwrap();
        assert_eq!(done.duration_seconds, Some(5.0));
    }

    #[tokio::test]
    async fn progress_requires_processing_and_bounds() {
        let h = harness();
        let id = doc("manual-3");
        h.orchestrator.register_document(&id).await.unwrap();

        let err = h
            .orchestrator
            .update_progress(&id, StageName::Upload, 10, Metadata::new(), None)
            .await
            .expect_err("pending stage rejects progress");
        assert!(err.is_conflict());

        h.orchestrator.start_stage(&id, StageName::Upload).await.unwrap();
        assert!(matches!(
            h.orchestrator
                .update_progress(&id, StageName::Upload, 101, Metadata::new(), None)
                .await,
            Err(PipelineError::InvalidProgress(101))
        ));

        let started_at = h
            .orchestrator
            .stage_record(&id, StageName::Upload)
            .await
            .unwrap()
            .started_at;
        h.clock.advance(Duration::from_secs(3));
        let record = h
            .orchestrator
            .update_progress(&id, StageName::Upload, 55, metadata(json!({ "bytes": 2048 })), None)
            .await
            .unwrap();
        assert_eq!(record.progress, 55);
        assert_eq!(record.metadata["bytes"], 2048);
        assert_eq!(record.started_at, started_at);

        h.orchestrator
            .complete_stage(&id, StageName::Upload, Metadata::new(), None)
            .await
            .unwrap();
        assert!(
            h.orchestrator
                .update_progress(&id, StageName::Upload, 20, Metadata::new(), None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn fail_marks_document_failed_and_notifies_registry() {
        let h = harness();
        let id = doc("bulletin-4");
        h.orchestrator.register_document(&id).await.unwrap();
        h.orchestrator.start_stage(&id, StageName::Upload).await.unwrap();
        h.orchestrator
            .fail_stage(&id, StageName::Upload, "corrupt archive".into(), Metadata::new(), None)
            .await
            .unwrap();

        let state = h.orchestrator.document_state(&id).await.unwrap();
        assert_eq!(state.processing_status, ProcessingStatus::Failed);
        assert_eq!(
            state.stages[&StageName::Upload].error.as_deref(),
            Some("corrupt archive")
        );
        assert_eq!(h.registry.status(&id).await, Some(ProcessingStatus::Failed));

        h.orchestrator.retry_stage(&id, StageName::Upload).await.unwrap();
        let summary = h.orchestrator.document_summary(&id).await.unwrap();
        assert_eq!(summary.processing_status, ProcessingStatus::Processing);
        assert_eq!(
            h.registry.status(&id).await,
            Some(ProcessingStatus::Processing)
        );
    }

    #[tokio::test]
    async fn retry_requires_failed_status() {
        let h = harness();
        let id = doc("catalog-5");
        h.orchestrator.register_document(&id).await.unwrap();
        let err = h
            .orchestrator
            .retry_stage(&id, StageName::Upload)
            .await
            .expect_err("pending stage cannot be retried");
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                operation: "retry",
                status: StageStatus::Pending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_lease_expires() {
        let h = harness();
        let id = doc("manual-6");
        h.orchestrator.register_document(&id).await.unwrap();

        let claim = h
            .orchestrator
            .claim_stage(&id, StageName::Upload, "worker-a", None)
            .await
            .unwrap();
        assert_eq!(claim.attempt, 1);
        assert_eq!(
            claim.lease_expires_at,
            datetime!(2026-05-04 08:01:00 UTC)
        );

        let err = h
            .orchestrator
            .claim_stage(&id, StageName::Upload, "worker-b", None)
            .await
            .expect_err("lease is live");
        assert!(matches!(err, PipelineError::ClaimConflict { .. }));

        h.clock.advance(Duration::from_secs(61));
        let reclaimed = h
            .orchestrator
            .claim_stage(&id, StageName::Upload, "worker-b", None)
            .await
            .unwrap();
        assert_eq!(reclaimed.worker_id, "worker-b");
        assert_eq!(reclaimed.attempt, 2);

        assert!(matches!(
            h.orchestrator
                .renew_lease(&id, StageName::Upload, "worker-a", None)
                .await,
            Err(PipelineError::LeaseNotHeld { .. })
        ));
        let renewed = h
            .orchestrator
            .renew_lease(&id, StageName::Upload, "worker-b", Some(Duration::from_secs(600)))
            .await
            .unwrap();
        assert_eq!(
            renewed.lease.map(|lease| lease.expires_at),
            Some(datetime!(2026-05-04 08:11:01 UTC))
        );
    }

    #[tokio::test]
    async fn concurrent_claims_grant_exactly_one() {
        let h = harness();
        let id = doc("manual-7");
        h.orchestrator.register_document(&id).await.unwrap();

        let mut tasks = Vec::new();
        for worker in 0..16 {
            let orchestrator = h.orchestrator.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                orchestrator
                    .claim_stage(&id, StageName::Upload, &format!("worker-{worker}"), None)
                    .await
                    .is_ok()
            }));
        }
        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
        assert_eq!(h.orchestrator.metrics_snapshot().claims_granted, 1);
    }

    #[tokio::test]
    async fn claimable_documents_follow_dependencies() {
        let h = harness();
        for id in ["c", "a", "b"] {
            h.orchestrator.register_document(&doc(id)).await.unwrap();
        }
        h.orchestrator
            .complete_stage(&doc("b"), StageName::Upload, Metadata::new(), None)
            .await
            .unwrap();
        h.orchestrator
            .skip_stage(&doc("c"), StageName::Upload, "pre-uploaded".into(), None)
            .await
            .unwrap();

        assert_eq!(
            h.orchestrator
                .claimable_documents(StageName::Upload, 10)
                .await,
            vec![doc("a")]
        );
        assert_eq!(
            h.orchestrator
                .claimable_documents(StageName::TextExtraction, 10)
                .await,
            vec![doc("b"), doc("c")]
        );
        assert_eq!(
            h.orchestrator
                .claimable_documents(StageName::TextExtraction, 1)
                .await,
            vec![doc("b")]
        );
    }

    #[tokio::test]
    async fn sweep_fails_stale_and_expired_stages() {
        let h = harness();
        let unleased = doc("stale-unleased");
        let leased = doc("stale-leased");
        let fresh = doc("fresh");
        for id in [&unleased, &leased, &fresh] {
            h.orchestrator.register_document(id).await.unwrap();
        }
        h.orchestrator
            .start_stage(&unleased, StageName::Upload)
            .await
            .unwrap();
        h.orchestrator
            .claim_stage(&leased, StageName::Upload, "worker-z", None)
            .await
            .unwrap();

        h.clock.advance(Duration::from_secs(120));
        h.orchestrator.start_stage(&fresh, StageName::Upload).await.unwrap();

        let swept = h.orchestrator.sweep_stale(None).await;
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].document_id, leased);

        h.clock.advance(Duration::from_secs(500));
        let swept = h.orchestrator.sweep_stale(None).await;
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].document_id, unleased);
        assert!(swept[0].error.contains("timed out"));

        assert_eq!(
            h.registry.status(&unleased).await,
            Some(ProcessingStatus::Failed)
        );
        assert_eq!(h.orchestrator.metrics_snapshot().stages_swept, 2);
        let record = h
            .orchestrator
            .stage_record(&fresh, StageName::Upload)
            .await
            .unwrap();
        assert_eq!(record.status, StageStatus::Processing);
    }

    #[tokio::test]
    async fn list_documents_filters_by_status() {
        let h = harness();
        for id in ["ok", "broken", "idle"] {
            h.orchestrator.register_document(&doc(id)).await.unwrap();
        }
        h.orchestrator.start_stage(&doc("ok"), StageName::Upload).await.unwrap();
        h.orchestrator
            .fail_stage(&doc("broken"), StageName::Upload, "bad".into(), Metadata::new(), None)
            .await
            .unwrap();

        let failed = h
            .orchestrator
            .list_documents(Some(ProcessingStatus::Failed))
            .await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].document_id, doc("broken"));
        assert_eq!(failed[0].current_stage, CurrentStage::Stage(StageName::Upload));

        let pending = h
            .orchestrator
            .list_documents(Some(ProcessingStatus::Pending))
            .await;
        assert_eq!(pending.len(), 1);
        assert_eq!(h.orchestrator.list_documents(None).await.len(), 3);
    }

    #[tokio::test]
    async fn unknown_documents_are_not_found() {
        let h = harness();
        let err = h
            .orchestrator
            .start_stage(&doc("ghost"), StageName::Upload)
            .await
            .expect_err("not registered");
        assert!(err.is_not_found());
        assert!(matches!(
            h.orchestrator.register_document(&doc("twice")).await,
            Ok(_)
        ));
        assert!(matches!(
            h.orchestrator.register_document(&doc("twice")).await,
            Err(PipelineError::DocumentExists(_))
        ));
    }

    #[tokio::test]
    async fn oversized_leases_are_rejected_without_mutation() {
        let h = harness();
        let id = doc("manual-lease");
        h.orchestrator.register_document(&id).await.unwrap();

        let err = h
            .orchestrator
            .claim_stage(&id, StageName::Upload, "worker-a", Some(Duration::from_secs(u64::MAX)))
            .await
            .expect_err("expiry cannot be represented");
        assert!(matches!(err, PipelineError::InvalidLease(u64::MAX)));
        let record = h.orchestrator.stage_record(&id, StageName::Upload).await.unwrap();
        assert_eq!(record.status, StageStatus::Pending);
        assert_eq!(record.attempt_count, 0);

        h.orchestrator
            .claim_stage(&id, StageName::Upload, "worker-a", None)
            .await
            .unwrap();
        assert!(matches!(
            h.orchestrator
                .renew_lease(&id, StageName::Upload, "worker-a", Some(Duration::MAX))
                .await,
            Err(PipelineError::InvalidLease(_))
        ));
        let record = h.orchestrator.stage_record(&id, StageName::Upload).await.unwrap();
        assert_eq!(
            record.lease.map(|lease| lease.expires_at),
            Some(datetime!(2026-05-04 08:01:00 UTC))
        );
    }

    #[tokio::test]
    async fn sweep_with_unbounded_timeout_still_visits_every_document() {
        let h = harness();
        let unleased = doc("a-unleased");
        let leased = doc("b-leased");
        for id in [&unleased, &leased] {
            h.orchestrator.register_document(id).await.unwrap();
        }
        h.orchestrator
            .start_stage(&unleased, StageName::Upload)
            .await
            .unwrap();
        h.orchestrator
            .claim_stage(&leased, StageName::Upload, "worker-z", None)
            .await
            .unwrap();
        h.clock.advance(Duration::from_secs(120));

        let swept = h
            .orchestrator
            .sweep_stale(Some(Duration::from_secs(u64::MAX)))
            .await;
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].document_id, leased);
        let record = h
            .orchestrator
            .stage_record(&unleased, StageName::Upload)
            .await
            .unwrap();
        assert_eq!(record.status, StageStatus::Processing);
    }

    #[tokio::test]
    async fn reports_require_the_current_lease_holder() {
        let h = harness();
        let id = doc("catalog-lease");
        h.orchestrator.register_document(&id).await.unwrap();
        h.orchestrator
            .claim_stage(&id, StageName::Upload, "worker-a", None)
            .await
            .unwrap();

        let intruder = Some("worker-b");
        assert!(matches!(
            h.orchestrator
                .update_progress(&id, StageName::Upload, 30, Metadata::new(), intruder)
                .await,
            Err(PipelineError::LeaseNotHeld { .. })
        ));
        assert!(matches!(
            h.orchestrator
                .complete_stage(&id, StageName::Upload, Metadata::new(), intruder)
                .await,
            Err(PipelineError::LeaseNotHeld { .. })
        ));
        assert!(matches!(
            h.orchestrator
                .fail_stage(&id, StageName::Upload, "x".into(), Metadata::new(), intruder)
                .await,
            Err(PipelineError::LeaseNotHeld { .. })
        ));
        assert!(matches!(
            h.orchestrator
                .skip_stage(&id, StageName::Upload, "x".into(), intruder)
                .await,
            Err(PipelineError::LeaseNotHeld { .. })
        ));
        assert_eq!(
            h.orchestrator
                .stage_record(&id, StageName::Upload)
                .await
                .unwrap()
                .status,
            StageStatus::Processing
        );

        h.orchestrator
            .update_progress(&id, StageName::Upload, 30, Metadata::new(), Some("worker-a"))
            .await
            .unwrap();
        let done = h
            .orchestrator
            .complete_stage(&id, StageName::Upload, Metadata::new(), Some("worker-a"))
            .await
            .unwrap();
        assert_eq!(done.status, StageStatus::Completed);
    }

    #[tokio::test]
    async fn swept_stage_rejects_late_report_from_its_worker() {
        let h = harness();
        let id = doc("bulletin-late");
        h.orchestrator.register_document(&id).await.unwrap();
        h.orchestrator
            .claim_stage(&id, StageName::Upload, "worker-a", None)
            .await
            .unwrap();
        h.clock.advance(Duration::from_secs(61));
        assert_eq!(h.orchestrator.sweep_stale(None).await.len(), 1);

        assert!(matches!(
            h.orchestrator
                .complete_stage(&id, StageName::Upload, Metadata::new(), Some("worker-a"))
                .await,
            Err(PipelineError::LeaseNotHeld { .. })
        ));
        let record = h.orchestrator.stage_record(&id, StageName::Upload).await.unwrap();
        assert_eq!(record.status, StageStatus::Failed);
    }

    /// Registry whose first update stalls until later updates have been attempted.
    #[derive(Default)]
    struct StallingRegistry {
        stalled: std::sync::atomic::AtomicBool,
        entered: tokio::sync::Notify,
        received: tokio::sync::Mutex<Vec<ProcessingStatus>>,
    }

    #[async_trait]
    impl DocumentRegistry for StallingRegistry {
        async fn update_status(
            &self,
            _document_id: &DocumentId,
            status: ProcessingStatus,
        ) -> Result<(), RegistryError> {
            if !self.stalled.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.entered.notify_one();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.received.lock().await.push(status);
            Ok(())
        }
    }

    #[tokio::test]
    async fn registry_sees_status_changes_in_derivation_order() {
        let registry = Arc::new(StallingRegistry::default());
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            registry.clone(),
            OrchestratorSettings::default(),
        ));
        let id = doc("manual-order");
        orchestrator.register_document(&id).await.unwrap();
        orchestrator.start_stage(&id, StageName::Upload).await.unwrap();

        let failing = {
            let orchestrator = orchestrator.clone();
            let id = id.clone();
            tokio::spawn(async move {
                orchestrator
                    .fail_stage(&id, StageName::Upload, "ocr timeout".into(), Metadata::new(), None)
                    .await
            })
        };
        registry.entered.notified().await;
        orchestrator.retry_stage(&id, StageName::Upload).await.unwrap();
        failing.await.expect("task").expect("fail_stage");

        assert_eq!(
            *registry.received.lock().await,
            vec![ProcessingStatus::Failed, ProcessingStatus::Processing]
        );
        assert_eq!(
            orchestrator.document_summary(&id).await.unwrap().processing_status,
            ProcessingStatus::Processing
        );
    }
}
