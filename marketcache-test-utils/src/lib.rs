//! MARKETCACHE Test Utilities
//!
//! Shared test infrastructure for the MARKETCACHE workspace:
//! - Proptest generators for symbol records
//! - Fixtures for stores, clocks and seeded records
//! - A scripted tier whose failures can be switched on mid-test
//! - Custom assertions for published views

pub use marketcache_core::{
    breakdown_key, score_key, AggregateView, CacheEntry, CacheError, CacheResult, Clock,
    LatestScore, ManualClock, MoverEntry, Movers, SymbolIndex, SymbolRecord, TierKind, ViewKind,
    SYMBOL_INDEX_KEY,
};
pub use marketcache_storage::{CacheTier, MemoryTier, TierStore, TierStoreConfig};

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// SCRIPTED TIER
// ============================================================================

/// Behavior of a [`ScriptedTier`] at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TierMode {
    /// Delegate to the backing memory tier.
    Healthy = 0,
    /// Fail every call immediately.
    Failing = 1,
    /// Never answer (until the caller gives up).
    Hanging = 2,
}

impl From<u8> for TierMode {
    fn from(v: u8) -> Self {
        match v {
            1 => TierMode::Failing,
            2 => TierMode::Hanging,
            _ => TierMode::Healthy,
        }
    }
}

/// Tier backed by memory whose health is switched by the test.
pub struct ScriptedTier {
    name: String,
    kind: TierKind,
    inner: MemoryTier,
    mode: AtomicU8,
    calls: AtomicUsize,
    rejected_prefix: Mutex<Option<String>>,
    latency_ms: AtomicU64,
}

impl ScriptedTier {
    pub fn new(name: impl Into<String>, kind: TierKind) -> Arc<Self> {
        let name = name.into();
        Arc::new(Self {
            inner: MemoryTier::new().with_name(name.clone()),
            name,
            kind,
            mode: AtomicU8::new(TierMode::Healthy as u8),
            calls: AtomicUsize::new(0),
            rejected_prefix: Mutex::new(None),
            latency_ms: AtomicU64::new(0),
        })
    }

    pub fn set_mode(&self, mode: TierMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub fn mode(&self) -> TierMode {
        TierMode::from(self.mode.load(Ordering::SeqCst))
    }

    /// Delay every call by `latency` before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Fail writes to keys starting with `prefix`, whatever the mode.
    pub fn reject_writes_to(&self, prefix: Option<&str>) {
        *self.rejected_prefix.lock().unwrap() = prefix.map(str::to_string);
    }

    fn rejects_write(&self, key: &str) -> bool {
        self.rejected_prefix
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|prefix| key.starts_with(prefix))
    }

    /// Calls received, in any mode.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Entries held by the backing memory tier.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    async fn gate(&self) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        match self.mode() {
            TierMode::Healthy => Ok(()),
            TierMode::Failing => Err(CacheError::TierUnavailable {
                tier: self.kind,
                reason: "scripted failure".to_string(),
            }),
            TierMode::Hanging => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CacheError::TierUnavailable {
                    tier: self.kind,
                    reason: "scripted hang".to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl CacheTier for ScriptedTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        self.gate().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        self.gate().await?;
        if self.rejects_write(key) {
            return Err(CacheError::TierUnavailable {
                tier: self.kind,
                reason: format!("scripted write rejection for {key}"),
            });
        }
        self.inner.set(key, entry).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.gate().await?;
        self.inner.delete(key).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for MARKETCACHE records.

    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    /// Upper-case ticker-like symbol.
    pub fn arb_symbol() -> impl Strategy<Value = String> {
        "[A-Z]{2,6}(USDT)?"
    }

    /// Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    /// Percent change, including exact zero.
    pub fn arb_change_pct() -> impl Strategy<Value = f64> {
        prop_oneof![
            1 => Just(0.0),
            6 => -50.0f64..50.0,
        ]
    }

    /// A record that passes validation.
    pub fn arb_symbol_record() -> impl Strategy<Value = SymbolRecord> {
        (
            arb_symbol(),
            0.0f64..=100.0,
            arb_change_pct(),
            arb_timestamp(),
            proptest::option::of(0.0f64..100_000.0),
            proptest::collection::btree_map("[a-z]{3,10}", 0.0f64..=100.0, 0..4),
        )
            .prop_map(|(symbol, score, change_pct, timestamp, volume, components)| {
                let mut record = SymbolRecord::new(symbol, score, change_pct, timestamp);
                record.volume = volume;
                record.components = components;
                record
            })
    }

    /// Records with distinct symbols.
    pub fn arb_record_set(max: usize) -> impl Strategy<Value = Vec<SymbolRecord>> {
        proptest::collection::btree_map(arb_symbol(), arb_symbol_record(), 1..=max).prop_map(
            |by_symbol| {
                by_symbol
                    .into_iter()
                    .map(|(symbol, mut record)| {
                        record.symbol = symbol;
                        record
                    })
                    .collect()
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    /// Fixed start time so tests do not depend on the wall clock.
    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn manual_clock() -> ManualClock {
        ManualClock::new(epoch())
    }

    /// A record at `epoch() + offset_secs`.
    pub fn record(symbol: &str, score: f64, change_pct: f64, offset_secs: i64) -> SymbolRecord {
        SymbolRecord::new(
            symbol,
            score,
            change_pct,
            epoch() + chrono::Duration::seconds(offset_secs),
        )
        .with_component("momentum", score / 2.0)
        .with_volume(1_000.0)
    }

    /// Store config with short timeouts and a breaker that trips fast.
    pub fn fast_store_config() -> TierStoreConfig {
        let mut config = TierStoreConfig::default();
        config.tier_timeout = Duration::from_millis(50);
        config.breaker.failure_threshold = 2;
        config.breaker.cooldown = Duration::from_secs(30);
        config
    }

    /// Single memory tier driven by `clock`.
    pub fn memory_store(clock: &ManualClock) -> Arc<TierStore> {
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        build_store(
            vec![Arc::new(MemoryTier::new().with_clock(shared.clone()))],
            shared,
            TierStoreConfig::default(),
        )
    }

    /// Store over the given tiers, in order.
    pub fn build_store(
        tiers: Vec<Arc<dyn CacheTier>>,
        clock: Arc<dyn Clock>,
        config: TierStoreConfig,
    ) -> Arc<TierStore> {
        let builder = tiers
            .into_iter()
            .fold(TierStore::builder(), |builder, tier| builder.tier(tier));
        match builder.config(config).clock(clock).build() {
            Ok(store) => Arc::new(store),
            Err(e) => panic!("invalid test store: {}", e),
        }
    }

    /// Write raw bytes under the breakdown key of `symbol` and index it,
    /// bypassing record validation.
    pub async fn seed_raw(store: &TierStore, symbol: &str, payload: &[u8], ttl: Duration) {
        if let Err(e) = store.set(&breakdown_key(symbol), payload.to_vec(), ttl).await {
            panic!("seed {} failed: {}", symbol, e);
        }
        add_to_index(store, symbol, ttl).await;
    }

    /// Add `symbol` to the symbol index.
    pub async fn add_to_index(store: &TierStore, symbol: &str, ttl: Duration) {
        let mut index = match store.get_json::<SymbolIndex>(SYMBOL_INDEX_KEY).await {
            Ok(Some(read)) => read.into_value(),
            _ => SymbolIndex::default(),
        };
        index.insert(symbol, store.now());
        if let Err(e) = store.set_json(SYMBOL_INDEX_KEY, &index, ttl).await {
            panic!("index update failed: {}", e);
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over published views.

    use super::*;

    /// Gainers strictly positive and descending, losers strictly negative
    /// and ascending, ties broken by symbol.
    pub fn assert_movers_ordered(movers: &Movers) {
        assert!(movers.gainers.iter().all(|m| m.change_pct > 0.0));
        assert!(movers.losers.iter().all(|m| m.change_pct < 0.0));

        for pair in movers.gainers.windows(2) {
            assert!(
                ordered(&pair[0], &pair[1], |a, b| b.total_cmp(&a)),
                "gainers out of order: {} then {}",
                pair[0].symbol,
                pair[1].symbol
            );
        }
        for pair in movers.losers.windows(2) {
            assert!(
                ordered(&pair[0], &pair[1], |a, b| a.total_cmp(&b)),
                "losers out of order: {} then {}",
                pair[0].symbol,
                pair[1].symbol
            );
        }
    }

    fn ordered(
        a: &MoverEntry,
        b: &MoverEntry,
        cmp: impl Fn(f64, f64) -> std::cmp::Ordering,
    ) -> bool {
        cmp(a.change_pct, b.change_pct)
            .then_with(|| a.symbol.cmp(&b.symbol))
            .is_le()
    }

    /// Symbols of a movers list, in order.
    pub fn symbols(entries: &[MoverEntry]) -> Vec<&str> {
        entries.iter().map(|m| m.symbol.as_str()).collect()
    }

    /// Unwrap a movers view.
    pub fn expect_movers(view: &AggregateView) -> &Movers {
        match view {
            AggregateView::Movers(movers) => movers,
            other => panic!("expected movers view, got {}", other.kind()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
