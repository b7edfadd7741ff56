//! Constants for MARKETCACHE API
//!
//! This module contains all constant values used throughout the API.
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// SERVER
// ============================================================================

/// Default bind host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

// ============================================================================
// TIER STORE
// ============================================================================

/// Default in-process tier capacity (entries)
pub const DEFAULT_MEMORY_MAX_ENTRIES: usize = 10_000;

/// Default Redis connection pool size
pub const DEFAULT_REDIS_POOL_SIZE: usize = 16;

/// Default Redis key prefix
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "mc:";

/// Default LMDB map size in megabytes
pub const DEFAULT_LMDB_MAP_SIZE_MB: usize = 256;

// ============================================================================
// RECORDS
// ============================================================================

/// Default TTL for per-symbol records and the symbol index (10 minutes)
pub const DEFAULT_RECORD_TTL_SECS: u64 = 600;

/// Default age after which a record is excluded from aggregation (5 minutes)
pub const DEFAULT_RECORD_MAX_AGE_SECS: u64 = 300;

// ============================================================================
// AGGREGATION BRIDGE
// ============================================================================

/// Default refresh interval
pub const DEFAULT_BRIDGE_REFRESH_INTERVAL_MS: u64 = 5_000;

/// Default deadline for a whole refresh cycle
pub const DEFAULT_BRIDGE_CYCLE_DEADLINE_MS: u64 = 4_000;

/// Default TTL of published views; must stay below the refresh interval
pub const DEFAULT_BRIDGE_VIEW_TTL_MS: u64 = 4_500;

/// Default number of gainers and losers kept in the movers view
pub const DEFAULT_MOVERS_TOP_N: usize = 10;

// ============================================================================
// FRESHNESS
// ============================================================================

/// Default max age of the data behind the overview view
pub const DEFAULT_OVERVIEW_MAX_AGE_MS: u64 = 60_000;

/// Default max age of the data behind the movers view
pub const DEFAULT_MOVERS_MAX_AGE_MS: u64 = 60_000;

/// Default max age of the data behind the latest-breakdown view
pub const DEFAULT_LATEST_BREAKDOWN_MAX_AGE_MS: u64 = 30_000;

/// Default allowed score difference between a view and the latest-score record
pub const DEFAULT_SCORE_TOLERANCE: f64 = 0.5;

// ============================================================================
// ROLLOUT
// ============================================================================

/// Default rollout feature name
pub const DEFAULT_ROLLOUT_FEATURE: &str = "optimized_reads";

/// Default rollout percentage
pub const DEFAULT_ROLLOUT_PERCENTAGE: u8 = 0;

/// Header carrying the stable request key used for bucketing
pub const REQUEST_KEY_HEADER: &str = "x-request-id";
