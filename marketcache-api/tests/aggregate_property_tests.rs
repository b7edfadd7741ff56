//! Property tests for the view computations over generated record sets.

use marketcache_api::aggregate::{compute_view, SymbolSnapshot};
use marketcache_core::{AggregateView, ViewKind};
use marketcache_test_utils::assertions::assert_movers_ordered;
use marketcache_test_utils::fixtures::epoch;
use marketcache_test_utils::generators::{arb_record_set, arb_symbol_record};
use proptest::prelude::*;

fn snapshot(records: Vec<marketcache_core::SymbolRecord>, extra_skipped: usize) -> SymbolSnapshot {
    SymbolSnapshot {
        total_symbols: records.len() + extra_skipped,
        records,
        malformed: extra_skipped,
        ..Default::default()
    }
}

proptest! {
    #[test]
    fn prop_generated_records_validate(record in arb_symbol_record()) {
        prop_assert!(record.validate().is_ok());
    }

    #[test]
    fn prop_movers_ordered_and_bounded(records in arb_record_set(40), top_n in 1usize..15) {
        let snap = snapshot(records, 0);
        let view = compute_view(ViewKind::Movers, &snap, top_n, epoch())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let AggregateView::Movers(movers) = view else {
            return Err(TestCaseError::fail("wrong view kind"));
        };
        assert_movers_ordered(&movers);
        prop_assert!(movers.gainers.len() <= top_n);
        prop_assert!(movers.losers.len() <= top_n);
    }

    #[test]
    fn prop_overview_counts_partition(records in arb_record_set(40), skipped in 0usize..5) {
        let valid = records.len();
        let snap = snapshot(records, skipped);
        let view = compute_view(ViewKind::Overview, &snap, 10, epoch())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let AggregateView::Overview(overview) = view else {
            return Err(TestCaseError::fail("wrong view kind"));
        };
        prop_assert_eq!(overview.total_symbols, valid + skipped);
        prop_assert_eq!(overview.valid_symbols, valid);
        prop_assert_eq!(overview.gainers + overview.losers + overview.unchanged, valid);
    }

    #[test]
    fn prop_latest_breakdown_is_newest(records in arb_record_set(40)) {
        let newest = records.iter().map(|r| r.timestamp).max();
        let snap = snapshot(records, 0);
        let view = compute_view(ViewKind::LatestBreakdown, &snap, 10, epoch())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(Some(view.timestamp()), newest);
    }
}
