//! Derived cross-instrument views published by the aggregation bridge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SymbolRecord;

/// Discriminant of an [`AggregateView`], also naming its cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Overview,
    Movers,
    LatestBreakdown,
}

impl ViewKind {
    pub const ALL: [ViewKind; 3] = [Self::Overview, Self::Movers, Self::LatestBreakdown];

    /// Fixed key the view is published under.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Overview => "market:overview",
            Self::Movers => "market:movers",
            Self::LatestBreakdown => "market:latest_breakdown",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overview => "overview",
            Self::Movers => "movers",
            Self::LatestBreakdown => "latest_breakdown",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market-wide summary over every indexed symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOverview {
    /// All indexed symbols, including ones skipped this cycle.
    pub total_symbols: usize,
    pub valid_symbols: usize,
    pub total_volume: f64,
    pub average_change_pct: f64,
    pub gainers: usize,
    pub losers: usize,
    pub unchanged: usize,
    pub timestamp: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
}

/// One ranked entry in a movers list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoverEntry {
    pub symbol: String,
    pub score: f64,
    pub change_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<&SymbolRecord> for MoverEntry {
    fn from(record: &SymbolRecord) -> Self {
        Self {
            symbol: record.symbol.clone(),
            score: record.score,
            change_pct: record.change_pct,
            price: record.price,
            volume: record.volume,
            timestamp: record.timestamp,
        }
    }
}

/// Top gainers (descending) and losers (ascending) by percent change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movers {
    pub gainers: Vec<MoverEntry>,
    pub losers: Vec<MoverEntry>,
    pub timestamp: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
}

/// The most recently updated record, with its full component breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestBreakdown {
    pub record: SymbolRecord,
    pub timestamp: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
}

/// A derived view, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateView {
    Overview(MarketOverview),
    Movers(Movers),
    LatestBreakdown(LatestBreakdown),
}

impl AggregateView {
    pub fn kind(&self) -> ViewKind {
        match self {
            Self::Overview(_) => ViewKind::Overview,
            Self::Movers(_) => ViewKind::Movers,
            Self::LatestBreakdown(_) => ViewKind::LatestBreakdown,
        }
    }

    /// Timestamp of the newest source record.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Overview(v) => v.timestamp,
            Self::Movers(v) => v.timestamp,
            Self::LatestBreakdown(v) => v.timestamp,
        }
    }

    pub fn computed_at(&self) -> DateTime<Utc> {
        match self {
            Self::Overview(v) => v.computed_at,
            Self::Movers(v) => v.computed_at,
            Self::LatestBreakdown(v) => v.computed_at,
        }
    }

    /// Per-symbol scores the view carries, for cross-key consistency checks.
    ///
    /// The overview only holds counts, so it references nothing.
    pub fn referenced_scores(&self) -> Vec<(&str, f64)> {
        match self {
            Self::Overview(_) => Vec::new(),
            Self::Movers(v) => v
                .gainers
                .iter()
                .chain(v.losers.iter())
                .map(|e| (e.symbol.as_str(), e.score))
                .collect(),
            Self::LatestBreakdown(v) => vec![(v.record.symbol.as_str(), v.record.score)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movers() -> AggregateView {
        let now = Utc::now();
        let a = SymbolRecord::new("AAA", 60.0, 5.0, now);
        let c = SymbolRecord::new("CCC", 30.0, -3.0, now);
        AggregateView::Movers(Movers {
            gainers: vec![MoverEntry::from(&a)],
            losers: vec![MoverEntry::from(&c)],
            timestamp: now,
            computed_at: now,
        })
    }

    #[test]
    fn test_view_keys_are_distinct() {
        let keys: std::collections::HashSet<_> = ViewKind::ALL.iter().map(|k| k.key()).collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(ViewKind::LatestBreakdown.key(), "market:latest_breakdown");
    }

    #[test]
    fn test_tagged_serialization() {
        let view = movers();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["kind"], "movers");

        let back: AggregateView = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), ViewKind::Movers);
    }

    #[test]
    fn test_referenced_scores_cover_both_sides() {
        let view = movers();
        let refs = view.referenced_scores();
        assert_eq!(refs, vec![("AAA", 60.0), ("CCC", 30.0)]);
    }
}
