//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use marketcache_storage::TierStore;

use crate::bridge::{AggregationBridge, BridgeConfig};
use crate::freshness::{FreshnessChecker, FreshnessPolicy};
use crate::reader::MarketReader;
use crate::rollout::RolloutHandle;
use crate::writer::RecordWriter;

/// Application-wide state shared across all routes and the refresh job.
#[derive(Clone)]
pub struct AppState {
    /// Tier store every component reads and writes through.
    pub store: Arc<TierStore>,
    pub writer: Arc<RecordWriter>,
    pub bridge: Arc<AggregationBridge>,
    pub reader: Arc<MarketReader>,
    pub rollout: RolloutHandle,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the writer, bridge and reader over one store.
    pub fn new(
        store: Arc<TierStore>,
        record_ttl: Duration,
        bridge_config: BridgeConfig,
        freshness: FreshnessPolicy,
        rollout: RolloutHandle,
    ) -> Self {
        let writer = Arc::new(RecordWriter::new(store.clone(), record_ttl));
        let bridge = Arc::new(AggregationBridge::new(store.clone(), bridge_config));
        let checker = FreshnessChecker::new(store.clone(), freshness);
        let reader = Arc::new(MarketReader::new(
            store.clone(),
            bridge.clone(),
            checker,
            rollout.clone(),
        ));

        Self {
            store,
            writer,
            bridge,
            reader,
            rollout,
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(Arc<TierStore>, store);
crate::impl_from_ref!(Arc<RecordWriter>, writer);
crate::impl_from_ref!(Arc<AggregationBridge>, bridge);
crate::impl_from_ref!(Arc<MarketReader>, reader);
crate::impl_from_ref!(RolloutHandle, rollout);
crate::impl_from_ref!(Instant, start_time);
