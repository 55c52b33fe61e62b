//! The two scheduler-owned control loops (spec §5): dispatch (batches
//! ready tasks to the backend) and the endpoint health watchdog. The third
//! loop, the transfer tracker, lives on `TransferManager` itself since it
//! only touches transfer state.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::SchedulerCore;

/// Runs `dispatch_tick` on a fixed cadence until `stop` is signalled.
pub async fn run_dispatch_loop(
    core: Arc<SchedulerCore>,
    polling_interval: Duration,
    stop: Arc<tokio::sync::Notify>,
) {
    info!("dispatch loop started");
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = tokio::time::sleep(polling_interval) => core.dispatch_tick().await,
        }
    }
    info!("dispatch loop stopped");
}

/// Polls every configured endpoint's health once per tick (spec §4.5).
pub async fn run_watchdog_loop(
    core: Arc<SchedulerCore>,
    polling_interval: Duration,
    heartbeat_threshold: f64,
    stop: Arc<tokio::sync::Notify>,
) {
    info!("watchdog loop started");
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = tokio::time::sleep(polling_interval) => {
                let ids: Vec<String> = core.directory().ids().to_vec();
                for endpoint_id in ids {
                    core.watchdog_tick_one(&endpoint_id, heartbeat_threshold).await;
                }
            }
        }
    }
    info!("watchdog loop stopped");
}
