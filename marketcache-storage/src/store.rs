//! Ordered multi-tier store with per-tier timeouts and circuit breakers.
//!
//! # Read path
//!
//! Tiers are consulted fastest first. The first live entry wins and is
//! promoted into every faster tier with its original `written_at` and
//! `ttl`, so a promoted copy never outlives the source. A tier that errors,
//! times out or sits behind an open circuit counts as a miss.
//!
//! # Write path
//!
//! `set` and `delete` fan out to every tier concurrently. A failing tier is
//! logged and skipped; the call fails only when no tier accepted it.
//!
//! A tier that missed an acknowledged write may still hold the previous
//! value. The store deletes the key there when it can and otherwise marks
//! the key invalid for that tier, so reads skip it until a later write,
//! promotion or delete reaches it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures_util::future::join_all;
use marketcache_core::{
    CacheEntry, CacheError, CacheResult, Clock, ConfigError, SystemClock, TierSnapshot,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::read::CacheRead;
use crate::tier::CacheTier;

/// Default bound on a single tier call.
pub const DEFAULT_TIER_TIMEOUT_MS: u64 = 100;

/// Configuration shared by every tier of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierStoreConfig {
    /// Upper bound on each individual tier call.
    pub tier_timeout: Duration,
    /// Breaker settings, one breaker per tier.
    pub breaker: CircuitBreakerConfig,
}

impl Default for TierStoreConfig {
    fn default() -> Self {
        Self {
            tier_timeout: Duration::from_millis(DEFAULT_TIER_TIMEOUT_MS),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl TierStoreConfig {
    /// Create TierStoreConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `MARKETCACHE_TIER_TIMEOUT_MS`: per-call tier timeout (default: 100)
    /// - breaker variables, see [`CircuitBreakerConfig::from_env`]
    pub fn from_env() -> Self {
        let tier_timeout = Duration::from_millis(
            std::env::var("MARKETCACHE_TIER_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_TIER_TIMEOUT_MS),
        );

        Self {
            tier_timeout,
            breaker: CircuitBreakerConfig::from_env(),
        }
    }
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    promotions: AtomicU64,
    short_circuited: AtomicU64,
}

struct TierSlot {
    tier: Arc<dyn CacheTier>,
    breaker: CircuitBreaker,
    counters: TierCounters,
    /// Keys whose copy in this tier may predate an acknowledged write.
    invalidated: DashSet<String>,
}

impl TierSlot {
    fn is_invalidated(&self, key: &str) -> bool {
        self.invalidated.contains(key)
    }

    fn clear_invalidation(&self, key: &str) {
        self.invalidated.remove(key);
    }

    fn snapshot(&self) -> TierSnapshot {
        TierSnapshot {
            name: self.tier.name().to_string(),
            kind: self.tier.kind(),
            circuit: self.breaker.state(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            short_circuited: self.counters.short_circuited.load(Ordering::Relaxed),
        }
    }
}

/// Builder for [`TierStore`].
pub struct TierStoreBuilder {
    tiers: Vec<Arc<dyn CacheTier>>,
    config: TierStoreConfig,
    clock: Arc<dyn Clock>,
}

impl TierStoreBuilder {
    /// Append a tier. Tiers are consulted in the order they are added.
    pub fn tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn config(mut self, config: TierStoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<TierStore, ConfigError> {
        if self.tiers.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "tiers".to_string(),
            });
        }

        let slots = self
            .tiers
            .into_iter()
            .map(|tier| TierSlot {
                tier,
                breaker: CircuitBreaker::new(self.config.breaker.clone()),
                counters: TierCounters::default(),
                invalidated: DashSet::new(),
            })
            .collect();

        Ok(TierStore {
            slots,
            config: self.config,
            clock: self.clock,
        })
    }
}

/// Uniform get/set/delete over an ordered list of cache tiers.
pub struct TierStore {
    slots: Vec<TierSlot>,
    config: TierStoreConfig,
    clock: Arc<dyn Clock>,
}

impl TierStore {
    pub fn builder() -> TierStoreBuilder {
        TierStoreBuilder {
            tiers: Vec::new(),
            config: TierStoreConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &TierStoreConfig {
        &self.config
    }

    /// Direct access to the tier at `index`, bypassing breakers and counters.
    pub fn tier(&self, index: usize) -> Option<&Arc<dyn CacheTier>> {
        self.slots.get(index).map(|slot| &slot.tier)
    }

    pub fn tier_count(&self) -> usize {
        self.slots.len()
    }

    pub fn tier_snapshots(&self) -> Vec<TierSnapshot> {
        self.slots.iter().map(TierSlot::snapshot).collect()
    }

    /// Run one tier call through its breaker and the tier timeout.
    async fn guarded<R, F, Fut>(&self, slot: &TierSlot, key: &str, op: &str, f: F) -> CacheResult<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<R>>,
    {
        let kind = slot.tier.kind();
        if !slot.breaker.is_allowed() {
            slot.counters.short_circuited.fetch_add(1, Ordering::Relaxed);
            return Err(CacheError::CircuitOpen { tier: kind });
        }

        let result = match tokio::time::timeout(self.config.tier_timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                tier: kind,
                timeout_ms: self.config.tier_timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(_) => slot.breaker.record_success(),
            Err(e) => {
                slot.counters.errors.fetch_add(1, Ordering::Relaxed);
                if e.is_unavailability() {
                    slot.breaker.record_failure();
                } else {
                    slot.breaker.end_trial();
                }
                warn!(
                    tier = %slot.tier.name(),
                    key = %key,
                    op = %op,
                    circuit = %slot.breaker.state().as_str(),
                    error = %e,
                    "Tier call failed"
                );
            }
        }
        result
    }

    /// Fetch the live entry for `key` from the fastest tier holding one.
    ///
    /// Unreachable tiers are treated as misses, so this never fails.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();

        for (index, slot) in self.slots.iter().enumerate() {
            if slot.is_invalidated(key) {
                slot.counters.misses.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let found = self
                .guarded(slot, key, "get", || slot.tier.get(key))
                .await
                .ok()
                .flatten()
                .filter(|entry| !entry.is_expired_at(now));

            match found {
                Some(entry) => {
                    slot.counters.hits.fetch_add(1, Ordering::Relaxed);
                    let entry = entry.with_tier(slot.tier.kind());
                    if index > 0 {
                        self.promote(index, key, &entry).await;
                    }
                    return Some(entry);
                }
                None => {
                    slot.counters.misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        debug!(key = %key, "Miss in every tier");
        None
    }

    /// Copy `entry` into every tier faster than `source`.
    async fn promote(&self, source: usize, key: &str, entry: &CacheEntry) {
        let targets = &self.slots[..source];
        let results = join_all(
            targets
                .iter()
                .map(|slot| self.guarded(slot, key, "promote", || slot.tier.set(key, entry))),
        )
        .await;

        for (slot, result) in targets.iter().zip(results) {
            if result.is_ok() {
                slot.clear_invalidation(key);
                slot.counters.promotions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    key = %key,
                    from = %self.slots[source].tier.name(),
                    to = %slot.tier.name(),
                    "Promoted entry"
                );
            }
        }
    }

    /// Write `value` under `key` into every tier.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let entry = CacheEntry::new(value, self.clock.now(), ttl, self.slots[0].tier.kind());

        let results = join_all(
            self.slots
                .iter()
                .map(|slot| self.guarded(slot, key, "set", || slot.tier.set(key, &entry))),
        )
        .await;

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        if accepted == 0 {
            return Err(CacheError::AllTiersUnavailable {
                key: key.to_string(),
            });
        }

        for (slot, result) in self.slots.iter().zip(&results) {
            if result.is_ok() {
                slot.clear_invalidation(key);
            } else {
                self.invalidate(slot, key).await;
            }
        }
        if results[0].is_err() {
            warn!(
                key = %key,
                accepted,
                "Primary tier rejected write, value only in lower tiers"
            );
        }
        Ok(())
    }

    /// Keep `slot` from serving a copy of `key` older than the last write.
    async fn invalidate(&self, slot: &TierSlot, key: &str) {
        slot.invalidated.insert(key.to_string());
        if self
            .guarded(slot, key, "invalidate", || slot.tier.delete(key))
            .await
            .is_ok()
        {
            slot.clear_invalidation(key);
        }
    }

    /// Remove `key` from every tier. Returns whether any tier held it.
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let results = join_all(
            self.slots
                .iter()
                .map(|slot| self.guarded(slot, key, "delete", || slot.tier.delete(key))),
        )
        .await;

        if results.iter().all(|r| r.is_err()) {
            return Err(CacheError::AllTiersUnavailable {
                key: key.to_string(),
            });
        }
        for (slot, result) in self.slots.iter().zip(&results) {
            if result.is_ok() {
                slot.clear_invalidation(key);
            } else {
                slot.invalidated.insert(key.to_string());
            }
        }
        Ok(results.into_iter().any(|r| matches!(r, Ok(true))))
    }

    /// Serialize `value` as JSON and [`set`](Self::set) it.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Encoding {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.set(key, bytes, ttl).await
    }

    /// [`get`](Self::get) and decode the payload as JSON.
    ///
    /// A payload that does not decode is reported as [`CacheError::Decoding`]
    /// so callers can tell corruption from absence.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<CacheRead<T>>> {
        let Some(entry) = self.get(key).await else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&entry.value).map_err(|e| CacheError::Decoding {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(CacheRead::new(
            value,
            entry.written_at,
            entry.ttl,
            entry.tier,
        )))
    }
}
