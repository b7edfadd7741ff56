#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use marketcache_api::{AppState, BridgeConfig, FreshnessPolicy, RolloutHandle};
use marketcache_core::RolloutConfig;
use marketcache_test_utils::fixtures::{manual_clock, memory_store};
use marketcache_test_utils::{ManualClock, TierStore};

pub const RECORD_TTL: Duration = Duration::from_secs(600);

/// Rollout sending every request down one path.
pub fn rollout(optimized: bool) -> RolloutHandle {
    let config = RolloutConfig::new("optimized_reads", optimized, if optimized { 100 } else { 0 });
    RolloutHandle::new(config.expect("valid rollout")).expect("valid rollout")
}

pub fn app_state(store: Arc<TierStore>, optimized: bool) -> AppState {
    AppState::new(
        store,
        RECORD_TTL,
        BridgeConfig::default(),
        FreshnessPolicy::default(),
        rollout(optimized),
    )
}

/// Memory-backed state on a manual clock.
pub fn memory_app(optimized: bool) -> (ManualClock, AppState) {
    let clock = manual_clock();
    let store = memory_store(&clock);
    (clock, app_state(store, optimized))
}
