//! Background tasks: the retention loop and the WebSocket liveness ping
//! loop. Both handle cancellation at their sleep points via a shutdown
//! watch channel, and both swallow-and-log per-iteration failures so one
//! bad pass never kills the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use loophive_storage::StorageBackend;

use crate::ws::WsManager;

/// Periodic retention prune. Runs once at startup, then on the interval.
pub async fn retention_task(
    storage: Arc<dyn StorageBackend>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(period_secs = period.as_secs(), "Retention task started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Retention task shutting down");
                    break;
                }
            }
            // The first tick fires immediately: startup prune.
            _ = ticker.tick() => {
                match storage.prune_events(Utc::now()).await {
                    Ok(stats) if stats.total_pruned > 0 => {
                        tracing::info!(
                            ttl_pruned = stats.ttl_pruned,
                            cold_pruned = stats.cold_pruned,
                            "Retention pass completed"
                        );
                    }
                    Ok(_) => tracing::debug!("Retention pass: nothing to prune"),
                    Err(error) => tracing::error!(error = %error, "Retention pass failed"),
                }
            }
        }
    }
}

/// Periodic liveness ping over all stream connections.
pub async fn ws_ping_task(
    ws: Arc<WsManager>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Stream ping task shutting down");
                    break;
                }
            }
            _ = ticker.tick() => {
                ws.ping_all();
            }
        }
    }
}
