//! Periodic background sweep of stale `processing` stages.

use crate::pipeline::PipelineApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run [`PipelineApi::sweep_stale`] every `interval` until the task is aborted.
///
/// `timeout` overrides the orchestrator's stale timeout when set.
pub fn spawn_sweeper<P>(api: Arc<P>, interval: Duration, timeout: Option<Duration>) -> JoinHandle<()>
where
    P: PipelineApi + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately.
        ticker.tick().await;
        tracing::info!(interval_seconds = interval.as_secs(), "Stale stage sweeper started");
        loop {
            ticker.tick().await;
            let swept = api.sweep_stale(timeout).await;
            if swept.is_empty() {
                tracing::trace!("Sweep found no stale stages");
            } else {
                tracing::warn!(count = swept.len(), "Sweep failed stale stages");
            }
        }
    })
}
