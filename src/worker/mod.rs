//! In-process stage workers that claim, execute, and report stage work.
//!
//! A worker polls [`PipelineApi::claimable_documents`] for its stage, claims each candidate
//! under a lease, runs its [`StageHandler`], and reports the outcome as the lease holder.
//! Losing a claim race is normal and only logged, as is a report rejected because the lease
//! was reclaimed by another worker in the meantime.

use crate::pipeline::{
    DocumentId, Metadata, PipelineApi, PipelineError, StageClaim, StageName, StageRecord,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Result of executing one stage for one document.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Work finished; metadata is merged into the record.
    Completed(Metadata),
    /// Stage does not apply to the document.
    Skipped(String),
    /// Work failed with the given error text.
    Failed(String),
}

/// Claimed unit of work handed to a [`StageHandler`].
pub struct StageJob {
    api: Arc<dyn PipelineApi>,
    claim: StageClaim,
}

impl StageJob {
    /// Claim backing this job.
    pub fn claim(&self) -> &StageClaim {
        &self.claim
    }

    /// Document being processed.
    pub fn document_id(&self) -> &DocumentId {
        &self.claim.document_id
    }

    /// Attempt number, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.claim.attempt
    }

    /// Report intermediate progress for the claimed stage.
    pub async fn report_progress(
        &self,
        progress: u32,
        metadata: Metadata,
    ) -> Result<StageRecord, PipelineError> {
        self.api
            .update_progress(
                &self.claim.document_id,
                self.claim.stage,
                progress,
                metadata,
                Some(&self.claim.worker_id),
            )
            .await
    }

    /// Extend the lease for long-running work.
    pub async fn renew_lease(&self, lease: Option<Duration>) -> Result<StageRecord, PipelineError> {
        self.api
            .renew_lease(
                &self.claim.document_id,
                self.claim.stage,
                &self.claim.worker_id,
                lease,
            )
            .await
    }
}

/// Executes one pipeline stage.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Stage this handler processes.
    fn stage(&self) -> StageName;

    /// Execute the stage for the claimed document.
    async fn handle(&self, job: &StageJob) -> StageOutcome;
}

/// Polling behaviour of a worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Sleep between polls that found no work.
    pub poll_interval: Duration,
    /// Maximum documents fetched per poll.
    pub batch_size: usize,
    /// Lease requested on claims; `None` uses the orchestrator default.
    pub lease: Option<Duration>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 25,
            lease: None,
        }
    }
}

/// Claim and execute one batch of claimable documents. Returns how many jobs ran.
pub async fn run_once(
    api: &Arc<dyn PipelineApi>,
    handler: &dyn StageHandler,
    worker_id: &str,
    settings: &WorkerSettings,
) -> usize {
    let stage = handler.stage();
    let candidates = api.claimable_documents(stage, settings.batch_size).await;
    let mut processed = 0;

    for document_id in candidates {
        let claim = match api
            .claim_stage(&document_id, stage, worker_id, settings.lease)
            .await
        {
            Ok(claim) => claim,
            Err(error) if error.is_conflict() || error.is_not_found() => {
                tracing::debug!(
                    document_id = %document_id,
                    stage = %stage,
                    worker_id,
                    error = %error,
                    "Claim lost"
                );
                continue;
            }
            Err(error) => {
                tracing::warn!(document_id = %document_id, stage = %stage, error = %error, "Claim failed");
                continue;
            }
        };

        let job = StageJob {
            api: Arc::clone(api),
            claim,
        };
        let outcome = handler.handle(&job).await;
        let holder = Some(job.claim.worker_id.as_str());
        let reported = match outcome {
            StageOutcome::Completed(metadata) => {
                api.complete_stage(&document_id, stage, metadata, holder)
                    .await
            }
            StageOutcome::Skipped(reason) => {
                api.skip_stage(&document_id, stage, reason, holder).await
            }
            StageOutcome::Failed(error) => {
                api.fail_stage(&document_id, stage, error, Metadata::new(), holder)
                    .await
            }
        };
        if let Err(error) = reported {
            tracing::warn!(
                document_id = %document_id,
                stage = %stage,
                worker_id,
                error = %error,
                "Failed to report stage outcome"
            );
        }
        processed += 1;
    }

    processed
}

/// Set of background workers sharing one shutdown signal.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start one polling task per handler.
    pub fn spawn(
        api: Arc<dyn PipelineApi>,
        handlers: Vec<Arc<dyn StageHandler>>,
        settings: WorkerSettings,
    ) -> Self {
        let (shutdown, receiver) = watch::channel(false);
        let handles = handlers
            .into_iter()
            .map(|handler| {
                let api = Arc::clone(&api);
                let mut receiver = receiver.clone();
                let worker_id = format!("{}-{}", handler.stage(), uuid::Uuid::new_v4());
                tokio::spawn(async move {
                    tracing::info!(worker_id = %worker_id, stage = %handler.stage(), "Worker started");
                    while !*receiver.borrow() {
                        let processed =
                            run_once(&api, handler.as_ref(), &worker_id, &settings).await;
                        if processed > 0 {
                            continue;
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(settings.poll_interval) => {}
                            changed = receiver.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    tracing::info!(worker_id = %worker_id, "Worker stopped");
                })
            })
            .collect();
        Self { shutdown, handles }
    }

    /// Signal every worker to stop and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(error) = handle.await {
                tracing::warn!(error = %error, "Worker task ended abnormally");
            }
        }
    }
}
