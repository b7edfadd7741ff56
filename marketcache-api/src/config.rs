//! Service Configuration Module
//!
//! Tier store, record and server settings loaded from environment variables
//! with defaults from [`crate::constants`]. Bridge, freshness and rollout
//! settings live next to the component they configure.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use marketcache_core::{Clock, ConfigError, MarketResult};
use marketcache_storage::{
    LmdbTier, MemoryTier, RedisTier, RedisTierConfig, TierStore, TierStoreConfig,
};

use crate::constants::{
    DEFAULT_HOST, DEFAULT_LMDB_MAP_SIZE_MB, DEFAULT_MEMORY_MAX_ENTRIES, DEFAULT_PORT,
    DEFAULT_RECORD_TTL_SECS, DEFAULT_REDIS_KEY_PREFIX, DEFAULT_REDIS_POOL_SIZE,
};

/// Parse an environment variable, ignoring unset or unparsable values.
pub(crate) fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Read a boolean flag; anything other than "false"/"0" counts as true.
pub(crate) fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|s| !matches!(s.trim().to_lowercase().as_str(), "false" | "0"))
}

// ============================================================================
// TIER STORE
// ============================================================================

/// Which tiers to build and how.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    /// Capacity of the in-process tier.
    pub memory_max_entries: usize,
    /// Networked tier; skipped when unset.
    pub redis_url: Option<String>,
    pub redis_pool_size: usize,
    pub redis_key_prefix: String,
    /// Durable tier; skipped when unset.
    pub lmdb_path: Option<PathBuf>,
    pub lmdb_map_size_mb: usize,
    /// Timeout and breaker settings shared by every tier.
    pub tiers: TierStoreConfig,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            memory_max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
            redis_url: None,
            redis_pool_size: DEFAULT_REDIS_POOL_SIZE,
            redis_key_prefix: DEFAULT_REDIS_KEY_PREFIX.to_string(),
            lmdb_path: None,
            lmdb_map_size_mb: DEFAULT_LMDB_MAP_SIZE_MB,
            tiers: TierStoreConfig::default(),
        }
    }
}

impl StoreSettings {
    /// Create StoreSettings from environment variables.
    ///
    /// # Environment Variables
    /// - `MARKETCACHE_MEMORY_MAX_ENTRIES`: in-process tier capacity (default: 10000)
    /// - `MARKETCACHE_REDIS_URL`: enables the Redis tier
    /// - `MARKETCACHE_REDIS_POOL_SIZE`: max pooled connections (default: 16)
    /// - `MARKETCACHE_REDIS_KEY_PREFIX`: key prefix (default: "mc:")
    /// - `MARKETCACHE_LMDB_PATH`: enables the LMDB tier
    /// - `MARKETCACHE_LMDB_MAP_SIZE_MB`: LMDB map size (default: 256)
    /// - tier timeout and breaker variables, see [`TierStoreConfig::from_env`]
    pub fn from_env() -> Self {
        Self {
            memory_max_entries: env_parse("MARKETCACHE_MEMORY_MAX_ENTRIES")
                .unwrap_or(DEFAULT_MEMORY_MAX_ENTRIES),
            redis_url: std::env::var("MARKETCACHE_REDIS_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            redis_pool_size: env_parse("MARKETCACHE_REDIS_POOL_SIZE")
                .unwrap_or(DEFAULT_REDIS_POOL_SIZE),
            redis_key_prefix: std::env::var("MARKETCACHE_REDIS_KEY_PREFIX")
                .unwrap_or_else(|_| DEFAULT_REDIS_KEY_PREFIX.to_string()),
            lmdb_path: std::env::var("MARKETCACHE_LMDB_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            lmdb_map_size_mb: env_parse("MARKETCACHE_LMDB_MAP_SIZE_MB")
                .unwrap_or(DEFAULT_LMDB_MAP_SIZE_MB),
            tiers: TierStoreConfig::from_env(),
        }
    }

    /// Build the store: memory first, then Redis and LMDB when configured.
    pub fn build_store(&self, clock: Arc<dyn Clock>) -> MarketResult<TierStore> {
        let mut builder = TierStore::builder()
            .config(self.tiers.clone())
            .clock(clock.clone())
            .tier(Arc::new(
                MemoryTier::new()
                    .with_max_entries(self.memory_max_entries)
                    .with_clock(clock.clone()),
            ));

        if let Some(url) = &self.redis_url {
            let redis = RedisTier::new(
                RedisTierConfig::new(url.clone())
                    .with_pool_size(self.redis_pool_size)
                    .with_key_prefix(self.redis_key_prefix.clone()),
            )?
            .with_clock(clock.clone());
            builder = builder.tier(Arc::new(redis));
        }

        if let Some(path) = &self.lmdb_path {
            let lmdb = LmdbTier::open(path, self.lmdb_map_size_mb).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "lmdb_path".to_string(),
                    value: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.tier(Arc::new(lmdb));
        }

        Ok(builder.build()?)
    }
}

// ============================================================================
// SERVICE
// ============================================================================

/// Process-level settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// TTL of per-symbol records and the symbol index.
    pub record_ttl: Duration,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
    pub store: StoreSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            record_ttl: Duration::from_secs(DEFAULT_RECORD_TTL_SECS),
            cors_origins: Vec::new(),
            store: StoreSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Create ServiceConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `MARKETCACHE_BIND`: bind host (default: 0.0.0.0)
    /// - `PORT` or `MARKETCACHE_PORT`: listen port (default: 3000)
    /// - `MARKETCACHE_RECORD_TTL_SECS`: record and index TTL (default: 600)
    /// - `MARKETCACHE_CORS_ORIGINS`: comma-separated origins (default: any)
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("MARKETCACHE_BIND").unwrap_or_else(|_| DEFAULT_HOST.to_string());

        let port = match std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("MARKETCACHE_PORT").ok())
        {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                field: "port".to_string(),
                value: raw.clone(),
                reason: "must be a valid TCP port".to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let record_ttl = Duration::from_secs(
            env_parse("MARKETCACHE_RECORD_TTL_SECS")
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_RECORD_TTL_SECS),
        );

        let cors_origins = std::env::var("MARKETCACHE_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            record_ttl,
            cors_origins,
            store: StoreSettings::from_env(),
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "bind".to_string(),
                value: addr.clone(),
                reason: e.to_string(),
            })
    }
}
