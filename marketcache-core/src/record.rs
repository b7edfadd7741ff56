//! Per-instrument signal snapshots written by the analysis collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::RecordError;

/// Upper bound of the score convention.
pub const MAX_SCORE: f64 = 100.0;

/// Canonical form of a symbol: trimmed and upper-cased.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

/// Signal snapshot for a single instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub symbol: String,
    /// Composite score, 0-100 by convention.
    pub score: f64,
    /// Sub-scores by component name.
    #[serde(default)]
    pub components: BTreeMap<String, f64>,
    /// Percent change used for ranking movers.
    pub change_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// Producer-supplied; non-decreasing per symbol.
    pub timestamp: DateTime<Utc>,
}

impl SymbolRecord {
    pub fn new(
        symbol: impl AsRef<str>,
        score: f64,
        change_pct: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: normalize_symbol(symbol.as_ref()),
            score,
            components: BTreeMap::new(),
            change_pct,
            price: None,
            volume: None,
            timestamp,
        }
    }

    pub fn with_component(mut self, name: impl Into<String>, value: f64) -> Self {
        self.components.insert(name.into(), value);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Check the fields the aggregation relies on.
    pub fn validate(&self) -> Result<(), RecordError> {
        let malformed = |reason: String| RecordError::Malformed {
            symbol: self.symbol.clone(),
            reason,
        };

        if self.symbol.trim().is_empty() {
            return Err(malformed("symbol is empty".to_string()));
        }
        if !self.score.is_finite() || !(0.0..=MAX_SCORE).contains(&self.score) {
            return Err(malformed(format!("score {} outside 0-100", self.score)));
        }
        if !self.change_pct.is_finite() {
            return Err(malformed("change_pct is not finite".to_string()));
        }
        if let Some((name, _)) = self.components.iter().find(|(_, v)| !v.is_finite()) {
            return Err(malformed(format!("component {} is not finite", name)));
        }
        for (field, value) in [("price", self.price), ("volume", self.volume)] {
            if matches!(value, Some(v) if !v.is_finite() || v < 0.0) {
                return Err(malformed(format!("{} must be a non-negative number", field)));
            }
        }
        Ok(())
    }
}

/// Lightweight latest-score record kept under its own namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestScore {
    pub symbol: String,
    pub score: f64,
    pub change_pct: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&SymbolRecord> for LatestScore {
    fn from(record: &SymbolRecord) -> Self {
        Self {
            symbol: record.symbol.clone(),
            score: record.score,
            change_pct: record.change_pct,
            timestamp: record.timestamp,
        }
    }
}

/// Index of symbols with a live record, maintained by the writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolIndex {
    pub symbols: BTreeSet<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SymbolIndex {
    /// Insert a symbol; returns true if it was not already present.
    pub fn insert(&mut self, symbol: &str, at: DateTime<Utc>) -> bool {
        self.updated_at = Some(at);
        self.symbols.insert(normalize_symbol(symbol))
    }

    pub fn remove(&mut self, symbol: &str, at: DateTime<Utc>) -> bool {
        self.updated_at = Some(at);
        self.symbols.remove(&normalize_symbol(symbol))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
