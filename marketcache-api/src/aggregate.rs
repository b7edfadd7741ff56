//! Pure computation of aggregate views from a set of valid records.
//!
//! Nothing here touches the cache; the bridge scans records, hands the
//! valid ones to these functions and publishes what comes back.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use marketcache_core::{
    AggregateView, BridgeError, LatestBreakdown, MarketOverview, MoverEntry, Movers,
    SymbolRecord, ViewKind,
};

/// Records gathered by a scan, split into usable and skipped.
#[derive(Debug, Clone, Default)]
pub struct SymbolSnapshot {
    /// Every symbol listed in the index.
    pub total_symbols: usize,
    /// Records that decoded, validated and are recent enough.
    pub records: Vec<SymbolRecord>,
    pub malformed: usize,
    pub missing: usize,
    pub stale: usize,
}

impl SymbolSnapshot {
    pub fn skipped(&self) -> usize {
        self.malformed + self.missing + self.stale
    }

    /// Timestamp of the newest usable record.
    pub fn newest(&self) -> Option<DateTime<Utc>> {
        newest(&self.records)
    }
}

fn gainer_order(a: &SymbolRecord, b: &SymbolRecord) -> Ordering {
    b.change_pct
        .total_cmp(&a.change_pct)
        .then_with(|| a.symbol.cmp(&b.symbol))
}

fn loser_order(a: &SymbolRecord, b: &SymbolRecord) -> Ordering {
    a.change_pct
        .total_cmp(&b.change_pct)
        .then_with(|| a.symbol.cmp(&b.symbol))
}

/// Top `top_n` gainers (descending) and losers (ascending) by percent change.
///
/// Records with no change belong to neither list.
pub fn compute_movers(
    records: &[SymbolRecord],
    top_n: usize,
    now: DateTime<Utc>,
) -> Result<Movers, BridgeError> {
    let timestamp = newest(records).ok_or(BridgeError::NoData {
        view: ViewKind::Movers,
    })?;

    let mut gainers: Vec<&SymbolRecord> = records.iter().filter(|r| r.change_pct > 0.0).collect();
    let mut losers: Vec<&SymbolRecord> = records.iter().filter(|r| r.change_pct < 0.0).collect();
    gainers.sort_by(|a, b| gainer_order(a, b));
    losers.sort_by(|a, b| loser_order(a, b));

    Ok(Movers {
        gainers: gainers.into_iter().take(top_n).map(MoverEntry::from).collect(),
        losers: losers.into_iter().take(top_n).map(MoverEntry::from).collect(),
        timestamp,
        computed_at: now,
    })
}

/// Market overview. `total_symbols` counts skipped symbols too; the mean
/// only covers `records`.
pub fn compute_overview(
    total_symbols: usize,
    records: &[SymbolRecord],
    now: DateTime<Utc>,
) -> Result<MarketOverview, BridgeError> {
    let timestamp = newest(records).ok_or(BridgeError::NoData {
        view: ViewKind::Overview,
    })?;

    let valid = records.len();
    let sum_change: f64 = records.iter().map(|r| r.change_pct).sum();

    Ok(MarketOverview {
        total_symbols: total_symbols.max(valid),
        valid_symbols: valid,
        total_volume: records.iter().filter_map(|r| r.volume).sum(),
        average_change_pct: sum_change / valid as f64,
        gainers: records.iter().filter(|r| r.change_pct > 0.0).count(),
        losers: records.iter().filter(|r| r.change_pct < 0.0).count(),
        unchanged: records.iter().filter(|r| r.change_pct == 0.0).count(),
        timestamp,
        computed_at: now,
    })
}

/// The most recently updated record; equal timestamps go to the lower symbol.
pub fn compute_latest_breakdown(
    records: &[SymbolRecord],
    now: DateTime<Utc>,
) -> Result<LatestBreakdown, BridgeError> {
    let record = records
        .iter()
        .max_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| b.symbol.cmp(&a.symbol))
        })
        .ok_or(BridgeError::NoData {
            view: ViewKind::LatestBreakdown,
        })?;

    Ok(LatestBreakdown {
        record: record.clone(),
        timestamp: record.timestamp,
        computed_at: now,
    })
}

/// Compute one view of `kind` from `snapshot`.
pub fn compute_view(
    kind: ViewKind,
    snapshot: &SymbolSnapshot,
    top_n: usize,
    now: DateTime<Utc>,
) -> Result<AggregateView, BridgeError> {
    match kind {
        ViewKind::Overview => {
            compute_overview(snapshot.total_symbols, &snapshot.records, now).map(AggregateView::Overview)
        }
        ViewKind::Movers => compute_movers(&snapshot.records, top_n, now).map(AggregateView::Movers),
        ViewKind::LatestBreakdown => {
            compute_latest_breakdown(&snapshot.records, now).map(AggregateView::LatestBreakdown)
        }
    }
}

fn newest(records: &[SymbolRecord]) -> Option<DateTime<Utc>> {
    records.iter().map(|r| r.timestamp).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn rec(symbol: &str, change_pct: f64) -> SymbolRecord {
        SymbolRecord::new(symbol, 50.0, change_pct, Utc::now())
    }

    fn symbols(entries: &[MoverEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.symbol.as_str()).collect()
    }

    #[test]
    fn test_movers_ordering_with_ties() {
        let records = vec![rec("A", 5.0), rec("B", 10.0), rec("D", -3.0), rec("C", -3.0)];
        let movers = compute_movers(&records, 10, Utc::now()).unwrap();
        assert_eq!(symbols(&movers.gainers), vec!["B", "A"]);
        assert_eq!(symbols(&movers.losers), vec!["C", "D"]);
    }

    #[test]
    fn test_movers_truncated_to_top_n() {
        let records: Vec<_> = (1..=20).map(|i| rec(&format!("S{:02}", i), i as f64)).collect();
        let movers = compute_movers(&records, 3, Utc::now()).unwrap();
        assert_eq!(symbols(&movers.gainers), vec!["S20", "S19", "S18"]);
        assert!(movers.losers.is_empty());
    }

    #[test]
    fn test_unchanged_is_neither_gainer_nor_loser() {
        let records = vec![rec("FLAT", 0.0), rec("UP", 1.0)];
        let movers = compute_movers(&records, 10, Utc::now()).unwrap();
        assert_eq!(symbols(&movers.gainers), vec!["UP"]);
        assert!(movers.losers.is_empty());

        let overview = compute_overview(2, &records, Utc::now()).unwrap();
        assert_eq!(overview.unchanged, 1);
    }

    #[test]
    fn test_overview_counts_skipped_in_total() {
        let records = vec![
            rec("BTCUSDT", 2.5).with_volume(100.0),
            rec("ETHUSDT", -1.5).with_volume(50.0),
        ];
        let overview = compute_overview(5, &records, Utc::now()).unwrap();
        assert_eq!(overview.total_symbols, 5);
        assert_eq!(overview.valid_symbols, 2);
        assert_eq!(overview.total_volume, 150.0);
        assert!((overview.average_change_pct - 0.5).abs() < 1e-9);
        assert_eq!((overview.gainers, overview.losers), (1, 1));
    }

    #[test]
    fn test_views_need_data() {
        assert!(matches!(
            compute_overview(3, &[], Utc::now()),
            Err(BridgeError::NoData { view: ViewKind::Overview })
        ));
        assert!(compute_movers(&[], 10, Utc::now()).is_err());
        assert!(compute_latest_breakdown(&[], Utc::now()).is_err());
    }

    #[test]
    fn test_latest_breakdown_picks_newest() {
        let now = Utc::now();
        let records = vec![
            SymbolRecord::new("OLD", 10.0, 1.0, now - Duration::seconds(30)),
            SymbolRecord::new("NEWB", 20.0, 1.0, now).with_component("trend", 64.0),
            SymbolRecord::new("NEWA", 30.0, 1.0, now),
        ];
        let latest = compute_latest_breakdown(&records, now).unwrap();
        assert_eq!(latest.record.symbol, "NEWA");
        assert_eq!(latest.timestamp, now);
    }

    #[test]
    fn test_view_timestamp_is_newest_source() {
        let now = Utc::now();
        let records = vec![
            SymbolRecord::new("A", 10.0, 1.0, now - Duration::seconds(10)),
            SymbolRecord::new("B", 10.0, -1.0, now - Duration::seconds(2)),
        ];
        let snapshot = SymbolSnapshot {
            total_symbols: 2,
            records,
            ..Default::default()
        };
        for kind in ViewKind::ALL {
            let view = compute_view(kind, &snapshot, 10, now).unwrap();
            assert_eq!(view.timestamp(), now - Duration::seconds(2));
            assert_eq!(view.computed_at(), now);
        }
    }

    proptest! {
        #[test]
        fn prop_movers_are_sorted_and_partitioned(
            changes in prop::collection::vec(-50i32..50, 0..60),
            top_n in 1usize..20,
        ) {
            let records: Vec<_> = changes
                .iter()
                .enumerate()
                .map(|(i, c)| rec(&format!("SYM{:03}", i), *c as f64 / 4.0))
                .collect();
            let Ok(movers) = compute_movers(&records, top_n, Utc::now()) else {
                prop_assert!(records.is_empty());
                return Ok(());
            };

            prop_assert!(movers.gainers.len() <= top_n);
            prop_assert!(movers.losers.len() <= top_n);
            prop_assert!(movers.gainers.iter().all(|e| e.change_pct > 0.0));
            prop_assert!(movers.losers.iter().all(|e| e.change_pct < 0.0));

            for pair in movers.gainers.windows(2) {
                prop_assert!(
                    pair[0].change_pct > pair[1].change_pct
                        || (pair[0].change_pct == pair[1].change_pct && pair[0].symbol < pair[1].symbol)
                );
            }
            for pair in movers.losers.windows(2) {
                prop_assert!(
                    pair[0].change_pct < pair[1].change_pct
                        || (pair[0].change_pct == pair[1].change_pct && pair[0].symbol < pair[1].symbol)
                );
            }

            let expected_gainers = records.iter().filter(|r| r.change_pct > 0.0).count().min(top_n);
            prop_assert_eq!(movers.gainers.len(), expected_gainers);
        }

        #[test]
        fn prop_movers_independent_of_input_order(
            changes in prop::collection::vec(-20i32..20, 1..40),
            seed in any::<u64>(),
        ) {
            let records: Vec<_> = changes
                .iter()
                .enumerate()
                .map(|(i, c)| rec(&format!("SYM{:03}", i), *c as f64))
                .collect();
            let mut shuffled = records.clone();
            // Deterministic rotation stands in for a shuffle.
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let now = Utc::now();
            let a = compute_movers(&records, 10, now).unwrap();
            let b = compute_movers(&shuffled, 10, now).unwrap();
            prop_assert_eq!(symbols(&a.gainers), symbols(&b.gainers));
            prop_assert_eq!(symbols(&a.losers), symbols(&b.losers));
        }
    }
}
