//! Cache entries: an opaque payload plus the metadata needed to expire it.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::TierKind;

/// A cached value with its write time and time-to-live.
///
/// `written_at + ttl` is the only expiry condition. Tiers may evict on their
/// own schedule, but a read never trusts an entry past that instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Serialized payload.
    pub value: Vec<u8>,
    /// When the value was first written into the store.
    pub written_at: DateTime<Utc>,
    /// Lifetime measured from `written_at`.
    pub ttl: Duration,
    /// Tier that produced this entry on read.
    pub tier: TierKind,
}

impl CacheEntry {
    pub fn new(value: Vec<u8>, written_at: DateTime<Utc>, ttl: Duration, tier: TierKind) -> Self {
        Self {
            value,
            written_at,
            ttl,
            tier,
        }
    }

    /// Instant at which the entry stops being served.
    ///
    /// TTLs too large to represent saturate to the maximum timestamp.
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.written_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Lifetime left at `now`, or `None` once expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_expired_at(now) {
            return None;
        }
        (self.expires_at() - now).to_std().ok()
    }

    /// Time since the entry was written.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.written_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Re-label the tier that produced this entry.
    pub fn with_tier(mut self, tier: TierKind) -> Self {
        self.tier = tier;
        self
    }
}
