//! End-to-end tests: writer, bridge, reader and tier store together.

mod test_support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use marketcache_api::{
    AggregationBridge, BridgeConfig, BridgePhase, ReadPayload, ReadRequest, ServePath, Verdict,
};
use marketcache_core::{BridgeError, CircuitState, Clock};
use marketcache_test_utils::assertions::{assert_movers_ordered, expect_movers, symbols};
use marketcache_test_utils::fixtures::{
    build_store, fast_store_config, manual_clock, record, seed_raw,
};
use marketcache_test_utils::{
    breakdown_key, AggregateView, CacheTier, MemoryTier, ScriptedTier, TierKind, TierMode,
    TierStoreConfig, ViewKind,
};

use test_support::{app_state, memory_app, RECORD_TTL};

#[tokio::test]
async fn test_btc_eth_end_to_end() -> Result<(), String> {
    let (_clock, state) = memory_app(true);

    state
        .writer
        .write_record(record("BTCUSDT", 70.0, 2.5, 0))
        .await
        .map_err(|e| e.to_string())?;
    state
        .writer
        .write_record(record("ETHUSDT", 40.0, -1.2, 0))
        .await
        .map_err(|e| e.to_string())?;

    let report = state.bridge.run_cycle().await.map_err(|e| e.to_string())?;
    assert!(report.is_success());
    assert_eq!(report.published.len(), 3);
    assert_eq!(report.skipped, 0);

    let overview = state
        .reader
        .read(&ReadRequest::View(ViewKind::Overview), "req-1")
        .await
        .map_err(|e| e.message)?;
    assert_eq!(overview.path, ServePath::Optimized);
    assert_eq!(overview.tier, Some(TierKind::InProcess));
    assert!(!overview.recomputed);
    assert_eq!(overview.freshness, Verdict::Fresh);
    match overview.data {
        ReadPayload::View(AggregateView::Overview(o)) => {
            assert_eq!(o.total_symbols, 2);
            assert_eq!(o.valid_symbols, 2);
            assert_eq!(o.gainers, 1);
            assert_eq!(o.losers, 1);
        }
        other => return Err(format!("unexpected payload {:?}", other)),
    }

    let movers = state
        .reader
        .read(&ReadRequest::View(ViewKind::Movers), "req-2")
        .await
        .map_err(|e| e.message)?;
    let ReadPayload::View(view) = &movers.data else {
        return Err("expected a view".to_string());
    };
    let movers = expect_movers(view);
    assert_eq!(symbols(&movers.gainers), vec!["BTCUSDT"]);
    assert_eq!(symbols(&movers.losers), vec!["ETHUSDT"]);
    Ok(())
}

#[tokio::test]
async fn test_one_malformed_among_fifty() -> Result<(), String> {
    let (_clock, state) = memory_app(true);

    for i in 0..50 {
        let change = (i as f64 - 25.0) / 2.0;
        state
            .writer
            .write_record(record(&format!("SYM{:02}", i), 50.0, change, i))
            .await
            .map_err(|e| e.to_string())?;
    }
    seed_raw(&state.store, "BROKEN", b"{\"symbol\":", RECORD_TTL).await;

    let report = state.bridge.run_cycle().await.map_err(|e| e.to_string())?;
    assert_eq!(report.published.len(), 3);
    assert_eq!(report.total_symbols, 51);
    assert_eq!(report.valid_symbols, 50);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.malformed, 1);

    let status = state.bridge.status();
    assert_eq!(status.metrics.last_skipped, 1);
    assert_eq!(status.metrics.last_malformed, 1);
    assert!(status.metrics.last_success_at.is_some());

    let movers = state
        .store
        .get_json::<AggregateView>(ViewKind::Movers.key())
        .await
        .map_err(|e| e.to_string())?
        .ok_or("movers not published")?;
    let movers = expect_movers(movers.value());
    assert_eq!(movers.gainers.len(), 10);
    assert_eq!(movers.losers.len(), 10);
    assert_movers_ordered(movers);
    assert_eq!(movers.gainers[0].symbol, "SYM49");
    assert_eq!(movers.losers[0].symbol, "SYM00");
    Ok(())
}

#[tokio::test]
async fn test_hanging_tier_abandons_cycle_at_deadline() -> Result<(), String> {
    let clock = manual_clock();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let tier = ScriptedTier::new("stuck", TierKind::Networked);
    let config = TierStoreConfig {
        tier_timeout: Duration::from_secs(5),
        ..TierStoreConfig::default()
    };
    let store = build_store(vec![tier.clone() as Arc<dyn CacheTier>], shared, config);
    tier.set_mode(TierMode::Hanging);

    let bridge = AggregationBridge::new(
        store,
        BridgeConfig {
            refresh_interval: Duration::from_millis(500),
            cycle_deadline: Duration::from_millis(100),
            view_ttl: Duration::from_millis(450),
            ..BridgeConfig::default()
        },
    );

    let started = Instant::now();
    let result = bridge.run_cycle().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(
        result,
        Err(BridgeError::DeadlineExceeded { deadline_ms: 100 })
    ));
    assert_eq!(bridge.phase(), BridgePhase::Idle);

    let snapshot = bridge.metrics().snapshot();
    assert_eq!(snapshot.cycles_abandoned, 1);
    assert_eq!(snapshot.cycles_completed, 0);
    assert!(snapshot.last_success_at.is_none());

    // The next cycle proceeds normally once the tier answers again.
    tier.set_mode(TierMode::Healthy);
    let report = bridge.run_cycle().await.map_err(|e| e.to_string())?;
    assert_eq!(report.total_symbols, 0);
    Ok(())
}

#[tokio::test]
async fn test_failing_networked_tier_trips_breaker_and_pipeline_continues() -> Result<(), String> {
    let clock = manual_clock();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let memory = Arc::new(MemoryTier::new().with_clock(shared.clone()));
    let networked = ScriptedTier::new("redis", TierKind::Networked);
    networked.set_mode(TierMode::Failing);
    let store = build_store(
        vec![memory as Arc<dyn CacheTier>, networked.clone()],
        shared,
        fast_store_config(),
    );
    let state = app_state(store, true);

    state
        .writer
        .write_record(record("BTCUSDT", 70.0, 2.5, 0))
        .await
        .map_err(|e| e.to_string())?;
    state
        .writer
        .write_record(record("SOLUSDT", 55.0, 0.4, 1))
        .await
        .map_err(|e| e.to_string())?;

    let tiers = state.store.tier_snapshots();
    assert_eq!(tiers[1].circuit, CircuitState::Open);
    assert!(tiers[1].errors >= 2);

    let report = state.bridge.run_cycle().await.map_err(|e| e.to_string())?;
    assert!(report.is_success());

    let calls_before = networked.calls();
    let overview = state
        .reader
        .read(&ReadRequest::View(ViewKind::Overview), "req")
        .await
        .map_err(|e| e.message)?;
    assert_eq!(overview.tier, Some(TierKind::InProcess));
    assert_eq!(networked.calls(), calls_before);
    assert!(state.store.tier_snapshots()[1].short_circuited > 0);
    Ok(())
}

#[tokio::test]
async fn test_lower_tier_hit_is_promoted() -> Result<(), String> {
    let clock = manual_clock();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let memory = Arc::new(MemoryTier::new().with_clock(shared.clone()));
    let networked = ScriptedTier::new("redis", TierKind::Networked);
    let store = build_store(
        vec![memory.clone() as Arc<dyn CacheTier>, networked.clone()],
        shared,
        TierStoreConfig::default(),
    );
    let state = app_state(store, false);

    state
        .writer
        .write_record(record("BTCUSDT", 70.0, 2.5, 0))
        .await
        .map_err(|e| e.to_string())?;
    let key = breakdown_key("BTCUSDT");
    let original = memory
        .get(&key)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("not written to memory")?;

    clock.advance(Duration::from_secs(30));
    memory.delete(&key).await.map_err(|e| e.to_string())?;

    let read = state
        .reader
        .read(&ReadRequest::Symbol("btcusdt".to_string()), "req")
        .await
        .map_err(|e| e.message)?;
    assert_eq!(read.tier, Some(TierKind::Networked));

    let promoted = memory
        .get(&key)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("not promoted")?;
    assert_eq!(promoted.written_at, original.written_at);
    assert_eq!(promoted.ttl, original.ttl);
    assert_eq!(promoted.value, original.value);
    Ok(())
}

#[tokio::test]
async fn test_expired_view_recomputed_on_read() -> Result<(), String> {
    let (clock, state) = memory_app(true);
    state
        .writer
        .write_record(record("BTCUSDT", 70.0, 2.5, 0))
        .await
        .map_err(|e| e.to_string())?;
    state.bridge.run_cycle().await.map_err(|e| e.to_string())?;

    // Past the view TTL but within the record max age.
    clock.advance(Duration::from_secs(10));
    let read = state
        .reader
        .read(&ReadRequest::View(ViewKind::LatestBreakdown), "req")
        .await
        .map_err(|e| e.message)?;
    assert!(read.recomputed);
    assert_eq!(read.tier, None);
    assert_eq!(read.age_ms, 10_000);
    assert!(read.freshness.is_fresh());

    // The recompute republished the view.
    assert!(state.store.get(ViewKind::LatestBreakdown.key()).await.is_some());
    Ok(())
}

#[tokio::test]
async fn test_records_past_max_age_are_skipped() -> Result<(), String> {
    let (clock, state) = memory_app(true);
    state
        .writer
        .write_record(record("OLDUSDT", 20.0, -4.0, 0))
        .await
        .map_err(|e| e.to_string())?;

    clock.advance(Duration::from_secs(400));
    state
        .writer
        .write_record(record("NEWUSDT", 60.0, 1.0, 400))
        .await
        .map_err(|e| e.to_string())?;

    let report = state.bridge.run_cycle().await.map_err(|e| e.to_string())?;
    assert_eq!(report.total_symbols, 2);
    assert_eq!(report.stale, 1);
    assert_eq!(report.valid_symbols, 1);

    let symbol = state
        .reader
        .read(&ReadRequest::Symbol("OLDUSDT".to_string()), "req")
        .await
        .map_err(|e| e.message)?;
    assert!(!symbol.freshness.is_fresh());
    Ok(())
}
