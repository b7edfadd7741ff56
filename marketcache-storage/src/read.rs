//! Typed cache reads carrying the metadata of the entry they came from.

use chrono::{DateTime, Utc};
use marketcache_core::TierKind;
use std::time::Duration;

/// Result of a typed cache read.
///
/// Keeps the write time, TTL and serving tier next to the decoded value so
/// callers can judge staleness without going back to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    written_at: DateTime<Utc>,
    ttl: Duration,
    tier: TierKind,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, written_at: DateTime<Utc>, ttl: Duration, tier: TierKind) -> Self {
        Self {
            value,
            written_at,
            ttl,
            tier,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn written_at(&self) -> DateTime<Utc> {
        self.written_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Tier that served the read.
    pub fn tier(&self) -> TierKind {
        self.tier
    }

    /// Time since the value was written, zero if `now` precedes the write.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.written_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            written_at: self.written_at,
            ttl: self.ttl,
            tier: self.tier,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
