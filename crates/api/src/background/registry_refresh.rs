//! Periodic worker liveness and capability refresh.
//!
//! Probes every configured worker on a fixed interval and pokes the
//! dispatcher afterwards so queued jobs get a chance at workers that came
//! online or switched checkpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::dispatcher::Dispatcher;
use crate::engine::registry::WorkerRegistry;

/// Run the refresh loop until `cancel` is triggered.
///
/// The first tick fires immediately, so workers are probed once at startup.
/// A refresh that overruns the interval delays the next tick instead of
/// bursting to catch up.
pub async fn run(
    registry: Arc<WorkerRegistry>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let workers = registry.len().await;
    tracing::info!(
        interval_secs = interval.as_secs(),
        workers,
        "Worker refresh task started",
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Worker refresh task stopping");
                break;
            }
            _ = ticker.tick() => {
                registry.refresh_all().await;
                let online = registry.online_count().await;
                tracing::debug!(online, "Worker refresh complete");
                dispatcher.notify_workers_changed().await;
            }
        }
    }
}
