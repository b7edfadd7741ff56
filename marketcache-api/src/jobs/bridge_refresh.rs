//! Bridge Refresh Background Task
//!
//! Runs one aggregation cycle per tick of the bridge's refresh interval
//! until the shutdown signal flips. Ticks missed while a cycle overran are
//! skipped, never queued, and each cycle is already bounded by the bridge's
//! own deadline.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::bridge::{AggregationBridge, BridgeMetrics};

/// Background task that refreshes the aggregate views.
///
/// Returns the bridge metrics once shut down.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(bridge_refresh_task(bridge, shutdown_rx));
///
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await.unwrap();
/// ```
pub async fn bridge_refresh_task(
    bridge: Arc<AggregationBridge>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<BridgeMetrics> {
    let config = bridge.config().clone();

    let mut refresh_interval = interval(config.refresh_interval);
    refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        refresh_interval_ms = config.refresh_interval.as_millis() as u64,
        cycle_deadline_ms = config.cycle_deadline.as_millis() as u64,
        view_ttl_ms = config.view_ttl.as_millis() as u64,
        top_n = config.top_n,
        "Bridge refresh task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Bridge refresh task shutting down");
                    break;
                }
            }

            _ = refresh_interval.tick() => {
                match bridge.run_cycle().await {
                    Ok(report) if !report.failed.is_empty() => {
                        tracing::warn!(
                            failed = report.failed.len(),
                            published = report.published.len(),
                            "Bridge cycle completed with publish failures"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Bridge cycle failed");
                    }
                }
            }
        }
    }

    let metrics = Arc::clone(bridge.metrics());
    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles_completed = snapshot.cycles_completed,
        cycles_succeeded = snapshot.cycles_succeeded,
        cycles_abandoned = snapshot.cycles_abandoned,
        views_published = snapshot.views_published,
        publish_failures = snapshot.publish_failures,
        "Bridge refresh task completed"
    );

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeConfig;
    use marketcache_core::{Clock, ManualClock, SymbolRecord};
    use marketcache_storage::{MemoryTier, TierStore};
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_runs_cycles_until_shutdown() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(
            TierStore::builder()
                .clock(clock.clone())
                .tier(Arc::new(MemoryTier::new().with_clock(clock.clone())))
                .build()
                .unwrap(),
        );
        let writer = crate::writer::RecordWriter::new(store.clone(), Duration::from_secs(600));
        writer
            .write_record(SymbolRecord::new("BTCUSDT", 70.0, 2.5, clock.now()))
            .await
            .unwrap();

        let bridge = Arc::new(AggregationBridge::new(store, BridgeConfig::development()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(bridge_refresh_task(bridge.clone(), shutdown_rx));

        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap();

        let snapshot = metrics.snapshot();
        assert!(snapshot.cycles_completed >= 1);
        assert!(snapshot.cycles_succeeded >= 1);
        assert!(snapshot.last_success_at.is_some());
    }

    #[tokio::test]
    async fn test_task_stops_without_data() {
        let store = Arc::new(
            TierStore::builder()
                .tier(Arc::new(MemoryTier::new()))
                .build()
                .unwrap(),
        );
        let bridge = Arc::new(AggregationBridge::new(store, BridgeConfig::development()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(bridge_refresh_task(bridge, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        let snapshot = handle.await.unwrap().snapshot();
        assert_eq!(snapshot.cycles_succeeded, 0);
        assert_eq!(snapshot.cycles_abandoned, 0);
    }
}
