//! Cache tiers and the trait the tier store drives them through.
//!
//! A tier is one level of the cache hierarchy. Tiers store entries with
//! their original write time and TTL and report errors honestly; the
//! [`TierStore`](crate::TierStore) decides what an error means for a read.
//!
//! # Expiry
//!
//! A tier may return an entry past its deadline (for example when the
//! backing store has not evicted it yet). Callers must check
//! [`CacheEntry::is_expired_at`] before serving it.

pub mod lmdb;
pub mod memory;
pub mod redis;

pub use lmdb::{LmdbTier, LmdbTierError};
pub use memory::MemoryTier;
pub use redis::{RedisTier, RedisTierConfig};

use async_trait::async_trait;
use marketcache_core::{CacheEntry, CacheResult, TierKind};

/// One level of the cache hierarchy.
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Name used in logs and metrics labels.
    fn name(&self) -> &str;

    fn kind(&self) -> TierKind;

    /// Fetch the entry stored under `key`, expired or not.
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Store `entry` under `key`, keeping its `written_at` and `ttl`.
    async fn set(&self, key: &str, entry: &CacheEntry) -> CacheResult<()>;

    /// Remove `key`. Returns whether an entry was present.
    async fn delete(&self, key: &str) -> CacheResult<bool>;
}
