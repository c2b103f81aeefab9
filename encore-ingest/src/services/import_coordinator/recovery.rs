//! Periodic pickup of jobs no runner is driving

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ImportCoordinator;

/// Re-run [`ImportCoordinator::recover_stale_jobs`] every `interval`
///
/// Catches jobs whose runner stopped while this process kept serving, not
/// only those left over from a previous process.
pub fn spawn_stale_job_sweep(
    coordinator: ImportCoordinator,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Stale job sweep stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match coordinator.recover_stale_jobs().await {
                        Ok(0) => {}
                        Ok(resumed) => tracing::info!(resumed, "Stale job sweep resumed import jobs"),
                        Err(e) => tracing::error!(error = %e, "Stale job sweep failed"),
                    }
                }
            }
        }
    })
}
