//! Tier identity, circuit state and per-tier observability snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One level of the cache hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// Process-local memory.
    InProcess,
    /// Shared cache reached over the network.
    Networked,
    /// Disk-backed cache that survives restarts.
    Durable,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProcess => "in_process",
            Self::Networked => "networked",
            Self::Durable => "durable",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker state for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed = 0,
    /// Circuit is open, requests are short-circuited
    Open = 1,
    /// Circuit is half-open, testing if the tier recovered
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time counters for one tier of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSnapshot {
    pub name: String,
    pub kind: TierKind,
    pub circuit: CircuitState,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub promotions: u64,
    /// Calls skipped without touching the tier because its circuit was open.
    pub short_circuited: u64,
}

impl TierSnapshot {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
