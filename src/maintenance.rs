//! Background retention loop for the server.
//!
//! Sweeps expired artifacts and job records until shutdown is signaled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::orchestrator::JobOrchestrator;

/// Spawn the retention loop. The first sweep runs immediately.
pub fn spawn(
    orchestrator: Arc<JobOrchestrator>,
    every: Duration,
    retention: Duration,
    shutdown: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            every_secs = every.as_secs(),
            retention_secs = retention.as_secs(),
            "maintenance loop started"
        );
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    tracing::info!("maintenance loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = orchestrator.sweep(retention).await {
                        tracing::warn!("maintenance sweep failed: {e}");
                    }
                }
            }
        }
    })
}
