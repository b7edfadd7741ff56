//! In-process tier over a concurrent map.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use marketcache_core::{CacheEntry, CacheResult, Clock, SystemClock, TierKind};
use tracing::debug;

use super::CacheTier;

/// Fastest tier: a `DashMap` keyed by cache key.
///
/// With a capacity set, inserting a new key into a full map first purges
/// expired entries and then, if still full, evicts the entry closest to
/// expiry.
pub struct MemoryTier {
    name: String,
    entries: DashMap<String, CacheEntry>,
    max_entries: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self {
            name: "memory".to_string(),
            entries: DashMap::new(),
            max_entries: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn make_room(&self, max_entries: usize) {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        let purged = before.saturating_sub(self.entries.len());

        if self.entries.len() >= max_entries {
            let victim = self
                .entries
                .iter()
                .min_by_key(|item| item.value().expires_at())
                .map(|item| item.key().clone());
            if let Some(key) = victim {
                self.entries.remove(&key);
                debug!(tier = %self.name, key = %key, "Evicted entry closest to expiry");
            }
        }

        if purged > 0 {
            debug!(tier = %self.name, purged, "Purged expired entries at capacity");
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TierKind {
        TierKind::InProcess
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self
            .entries
            .get(key)
            .map(|entry| entry.value().clone().with_tier(TierKind::InProcess)))
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        if let Some(max_entries) = self.max_entries {
            if !self.entries.contains_key(key) && self.entries.len() >= max_entries {
                self.make_room(max_entries);
            }
        }
        self.entries
            .insert(key.to_string(), entry.clone().with_tier(TierKind::InProcess));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}
