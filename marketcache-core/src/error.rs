//! Error types for marketcache operations

use crate::{TierKind, ViewKind};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Cache tier and tier store errors.
///
/// Every variant is `Clone` so a single recomputation result can be handed
/// to all callers waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: TierKind, reason: String },

    #[error("Tier {tier} timed out after {timeout_ms}ms")]
    Timeout { tier: TierKind, timeout_ms: u64 },

    #[error("Circuit open for tier {tier}")]
    CircuitOpen { tier: TierKind },

    #[error("All tiers unavailable for key {key}")]
    AllTiersUnavailable { key: String },

    #[error("Encoding failed for key {key}: {reason}")]
    Encoding { key: String, reason: String },

    #[error("Decoding failed for key {key}: {reason}")]
    Decoding { key: String, reason: String },
}

impl CacheError {
    /// True when the error means the tier could not be reached at all,
    /// as opposed to the tier answering with bytes we could not use.
    pub fn is_unavailability(&self) -> bool {
        matches!(
            self,
            Self::TierUnavailable { .. } | Self::Timeout { .. } | Self::CircuitOpen { .. }
        )
    }
}

/// Per-symbol record errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Malformed record for {symbol}: {reason}")]
    Malformed { symbol: String, reason: String },

    #[error("Stale write for {symbol}: incoming {incoming} is older than stored {stored}")]
    StaleWrite {
        symbol: String,
        incoming: DateTime<Utc>,
        stored: DateTime<Utc>,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Aggregation bridge errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("No valid records to compute {view}")]
    NoData { view: ViewKind },

    #[error("Refresh cycle exceeded its {deadline_ms}ms deadline")]
    DeadlineExceeded { deadline_ms: u64 },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Master error type for all marketcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarketError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

/// Result type alias for tier operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type alias for marketcache operations.
pub type MarketResult<T> = Result<T, MarketError>;
