//! Networked tier over a bounded Redis connection pool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::{cmd, Cmd, RedisError};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use marketcache_core::{
    CacheEntry, CacheError, CacheResult, Clock, ConfigError, SystemClock, TierKind,
};
use tracing::debug;

use super::CacheTier;
use crate::encoding::{decode_entry, encode_entry};

/// Connection settings for [`RedisTier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisTierConfig {
    pub url: String,
    /// Upper bound on pooled connections.
    pub pool_size: usize,
    /// Prepended to every key, e.g. `mc:`.
    pub key_prefix: String,
}

impl RedisTierConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: 16,
            key_prefix: String::new(),
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }
}

/// Shared tier reached over the network.
///
/// Entries are stored in the common binary encoding with a server-side
/// `PX` expiry equal to their remaining lifetime, so Redis evicts them at
/// roughly the same instant a read would start rejecting them.
pub struct RedisTier {
    pool: Pool,
    key_prefix: String,
    clock: Arc<dyn Clock>,
}

impl RedisTier {
    /// Build the pool. No connection is opened until the first command.
    pub fn new(config: RedisTierConfig) -> Result<Self, ConfigError> {
        if config.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "redis_pool_size".to_string(),
                value: "0".to_string(),
                reason: "pool must hold at least one connection".to_string(),
            });
        }

        let mut cfg = Config::from_url(config.url.clone());
        cfg.pool = Some(PoolConfig::new(config.pool_size));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConfigError::InvalidValue {
                field: "redis_url".to_string(),
                value: config.url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
            clock: Arc::new(SystemClock),
        })
    }

    /// Clock used to turn an entry's deadline into a `PX` expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> CacheResult<Connection> {
        self.pool.get().await.map_err(|e| CacheError::TierUnavailable {
            tier: TierKind::Networked,
            reason: e.to_string(),
        })
    }
}

/// Server-side expiry for `entry` at `now`, in milliseconds.
///
/// `None` once the entry has expired. Rounds up to 1 ms so a live entry
/// is never written without an expiry.
fn expiry_millis(entry: &CacheEntry, now: DateTime<Utc>) -> Option<u64> {
    let remaining = entry.remaining_ttl(now)?;
    Some(u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX).max(1))
}

/// `SET <key> <encoded entry> PX <remaining>`, or `None` for an expired entry.
fn set_command(full_key: &str, entry: &CacheEntry, now: DateTime<Utc>) -> Option<Cmd> {
    let px = expiry_millis(entry, now)?;
    let mut set = cmd("SET");
    set.arg(full_key).arg(encode_entry(entry)).arg("PX").arg(px);
    Some(set)
}

fn unavailable(e: RedisError) -> CacheError {
    CacheError::TierUnavailable {
        tier: TierKind::Networked,
        reason: e.to_string(),
    }
}

#[async_trait]
impl CacheTier for RedisTier {
    fn name(&self) -> &str {
        "redis"
    }

    fn kind(&self) -> TierKind {
        TierKind::Networked
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let mut conn = self.connection().await?;
        let bytes: Option<Vec<u8>> = cmd("GET")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        bytes
            .map(|b| decode_entry(&b, TierKind::Networked, key))
            .transpose()
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        let Some(set) = set_command(&self.full_key(key), entry, self.clock.now()) else {
            debug!(key = %key, "Skipping Redis write for already expired entry");
            return Ok(());
        };

        let mut conn = self.connection().await?;
        let _: () = set.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = cmd("DEL")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }
}
