//! Freshness and consistency checks for served data.
//!
//! Age is a semantic bound on the data behind a view, independent of the
//! cache TTL. Consistency compares the scores a view carries against each
//! symbol's independently cached latest-score record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use marketcache_core::{score_key, AggregateView, LatestScore, ViewKind};
use marketcache_storage::TierStore;

use crate::config::env_parse;
use crate::constants::{
    DEFAULT_LATEST_BREAKDOWN_MAX_AGE_MS, DEFAULT_MOVERS_MAX_AGE_MS, DEFAULT_OVERVIEW_MAX_AGE_MS,
    DEFAULT_RECORD_MAX_AGE_SECS, DEFAULT_SCORE_TOLERANCE,
};

/// Staleness bounds per view type.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessPolicy {
    pub overview_max_age: Duration,
    pub movers_max_age: Duration,
    pub latest_breakdown_max_age: Duration,
    /// Bound for raw symbol records served directly.
    pub symbol_max_age: Duration,
    /// Largest accepted score difference between a view and the score record.
    pub score_tolerance: f64,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            overview_max_age: Duration::from_millis(DEFAULT_OVERVIEW_MAX_AGE_MS),
            movers_max_age: Duration::from_millis(DEFAULT_MOVERS_MAX_AGE_MS),
            latest_breakdown_max_age: Duration::from_millis(DEFAULT_LATEST_BREAKDOWN_MAX_AGE_MS),
            symbol_max_age: Duration::from_secs(DEFAULT_RECORD_MAX_AGE_SECS),
            score_tolerance: DEFAULT_SCORE_TOLERANCE,
        }
    }
}

impl FreshnessPolicy {
    /// Create FreshnessPolicy from environment variables.
    ///
    /// # Environment Variables
    /// - `MARKETCACHE_OVERVIEW_MAX_AGE_MS` (default: 60000)
    /// - `MARKETCACHE_MOVERS_MAX_AGE_MS` (default: 60000)
    /// - `MARKETCACHE_LATEST_BREAKDOWN_MAX_AGE_MS` (default: 30000)
    /// - `MARKETCACHE_RECORD_MAX_AGE_SECS`: bound for symbol reads (default: 300)
    /// - `MARKETCACHE_SCORE_TOLERANCE` (default: 0.5)
    pub fn from_env() -> Self {
        let ms = |name: &str, default: u64| {
            Duration::from_millis(env_parse(name).unwrap_or(default))
        };
        Self {
            overview_max_age: ms("MARKETCACHE_OVERVIEW_MAX_AGE_MS", DEFAULT_OVERVIEW_MAX_AGE_MS),
            movers_max_age: ms("MARKETCACHE_MOVERS_MAX_AGE_MS", DEFAULT_MOVERS_MAX_AGE_MS),
            latest_breakdown_max_age: ms(
                "MARKETCACHE_LATEST_BREAKDOWN_MAX_AGE_MS",
                DEFAULT_LATEST_BREAKDOWN_MAX_AGE_MS,
            ),
            symbol_max_age: Duration::from_secs(
                env_parse("MARKETCACHE_RECORD_MAX_AGE_SECS").unwrap_or(DEFAULT_RECORD_MAX_AGE_SECS),
            ),
            score_tolerance: env_parse::<f64>("MARKETCACHE_SCORE_TOLERANCE")
                .filter(|t| t.is_finite() && *t >= 0.0)
                .unwrap_or(DEFAULT_SCORE_TOLERANCE),
        }
    }

    pub fn max_age_for(&self, kind: ViewKind) -> Duration {
        match kind {
            ViewKind::Overview => self.overview_max_age,
            ViewKind::Movers => self.movers_max_age,
            ViewKind::LatestBreakdown => self.latest_breakdown_max_age,
        }
    }
}

/// Why a value was judged stale.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StaleReason {
    TooOld { age_ms: u64, max_age_ms: u64 },
    ScoreMismatch {
        symbol: String,
        view_score: f64,
        cached_score: f64,
    },
}

/// Result of a freshness check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Fresh,
    Stale { reason: StaleReason },
}

impl Verdict {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale { .. } => "stale",
        }
    }

    pub fn reason(&self) -> Option<&StaleReason> {
        match self {
            Self::Fresh => None,
            Self::Stale { reason } => Some(reason),
        }
    }

    /// True when the view disagrees with the score records.
    pub fn is_inconsistent(&self) -> bool {
        matches!(
            self,
            Self::Stale {
                reason: StaleReason::ScoreMismatch { .. }
            }
        )
    }
}

/// Age of data stamped `timestamp`, zero for timestamps in the future.
pub fn age_at(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - timestamp).to_std().unwrap_or_default()
}

/// Pure age check.
pub fn check_age(timestamp: DateTime<Utc>, max_age: Duration, now: DateTime<Utc>) -> Verdict {
    let age = age_at(timestamp, now);
    if age > max_age {
        Verdict::Stale {
            reason: StaleReason::TooOld {
                age_ms: age.as_millis() as u64,
                max_age_ms: max_age.as_millis() as u64,
            },
        }
    } else {
        Verdict::Fresh
    }
}

/// Validates views against the policy and the cached score records.
pub struct FreshnessChecker {
    store: Arc<TierStore>,
    policy: FreshnessPolicy,
}

impl FreshnessChecker {
    pub fn new(store: Arc<TierStore>, policy: FreshnessPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Age first, then score consistency. The first failing check decides.
    pub async fn validate(&self, view: &AggregateView) -> Verdict {
        let verdict = check_age(
            view.timestamp(),
            self.policy.max_age_for(view.kind()),
            self.store.now(),
        );
        if !verdict.is_fresh() {
            return verdict;
        }
        self.check_consistency(view).await
    }

    async fn check_consistency(&self, view: &AggregateView) -> Verdict {
        let refs = view.referenced_scores();
        if refs.is_empty() {
            return Verdict::Fresh;
        }

        let cached = join_all(refs.iter().map(|(symbol, _)| {
            let key = score_key(symbol);
            async move { self.store.get_json::<LatestScore>(&key).await }
        }))
        .await;

        for ((symbol, view_score), read) in refs.into_iter().zip(cached) {
            let cached_score = match read {
                Ok(Some(read)) => read.value().score,
                // Nothing to compare against.
                Ok(None) => {
                    debug!(symbol, "No cached score to check against");
                    continue;
                }
                Err(e) => {
                    warn!(symbol, error = %e, "Cached score undecodable, not checked");
                    continue;
                }
            };

            if (view_score - cached_score).abs() > self.policy.score_tolerance {
                debug!(
                    view = %view.kind(),
                    symbol,
                    view_score,
                    cached_score,
                    "View disagrees with score record"
                );
                return Verdict::Stale {
                    reason: StaleReason::ScoreMismatch {
                        symbol: symbol.to_string(),
                        view_score,
                        cached_score,
                    },
                };
            }
        }
        Verdict::Fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use marketcache_core::{
        Clock, LatestBreakdown, ManualClock, MarketOverview, MoverEntry, Movers, SymbolRecord,
    };
    use marketcache_storage::MemoryTier;

    fn checker() -> (ManualClock, Arc<TierStore>, FreshnessChecker) {
        let clock = ManualClock::new(Utc::now());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(
            TierStore::builder()
                .clock(shared.clone())
                .tier(Arc::new(MemoryTier::new().with_clock(shared)))
                .build()
                .unwrap(),
        );
        let checker = FreshnessChecker::new(store.clone(), FreshnessPolicy::default());
        (clock, store, checker)
    }

    fn overview(timestamp: DateTime<Utc>) -> AggregateView {
        AggregateView::Overview(MarketOverview {
            total_symbols: 1,
            valid_symbols: 1,
            total_volume: 0.0,
            average_change_pct: 1.0,
            gainers: 1,
            losers: 0,
            unchanged: 0,
            timestamp,
            computed_at: timestamp,
        })
    }

    fn movers_with(record: &SymbolRecord) -> AggregateView {
        AggregateView::Movers(Movers {
            gainers: vec![MoverEntry::from(record)],
            losers: Vec::new(),
            timestamp: record.timestamp,
            computed_at: record.timestamp,
        })
    }

    async fn cache_score(store: &TierStore, symbol: &str, score: f64, at: DateTime<Utc>) {
        let record = SymbolRecord::new(symbol, score, 1.0, at);
        store
            .set_json(&score_key(symbol), &LatestScore::from(&record), Duration::from_secs(600))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recent_view_is_fresh() {
        let (clock, _, checker) = checker();
        assert_eq!(checker.validate(&overview(clock.now())).await, Verdict::Fresh);
    }

    #[tokio::test]
    async fn test_old_view_is_stale_even_if_cached() {
        let (clock, _, checker) = checker();
        let view = overview(clock.now() - ChronoDuration::seconds(61));
        let verdict = checker.validate(&view).await;
        assert!(matches!(
            verdict,
            Verdict::Stale {
                reason: StaleReason::TooOld { max_age_ms: 60_000, .. }
            }
        ));
        assert!(!verdict.is_inconsistent());
    }

    #[tokio::test]
    async fn test_per_view_thresholds() {
        let (clock, _, checker) = checker();
        let at = clock.now() - ChronoDuration::seconds(45);
        let record = SymbolRecord::new("BTCUSDT", 70.0, 2.5, at);
        let latest = AggregateView::LatestBreakdown(LatestBreakdown {
            record: record.clone(),
            timestamp: at,
            computed_at: at,
        });

        assert!(checker.validate(&overview(at)).await.is_fresh());
        assert!(!checker.validate(&latest).await.is_fresh());
    }

    #[tokio::test]
    async fn test_score_mismatch_is_inconsistent() {
        let (clock, store, checker) = checker();
        let now = clock.now();
        let record = SymbolRecord::new("ETHUSDT", 40.0, 1.0, now);
        cache_score(&store, "ETHUSDT", 55.0, now).await;

        let verdict = checker.validate(&movers_with(&record)).await;
        assert!(verdict.is_inconsistent());
        match verdict.reason() {
            Some(StaleReason::ScoreMismatch { symbol, cached_score, .. }) => {
                assert_eq!(symbol, "ETHUSDT");
                assert_eq!(*cached_score, 55.0);
            }
            other => panic!("unexpected reason {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_score_within_tolerance_passes() {
        let (clock, store, checker) = checker();
        let now = clock.now();
        let record = SymbolRecord::new("ETHUSDT", 40.0, 1.0, now);
        cache_score(&store, "ETHUSDT", 40.4, now).await;
        assert!(checker.validate(&movers_with(&record)).await.is_fresh());
    }

    #[tokio::test]
    async fn test_missing_score_record_passes() {
        let (clock, _, checker) = checker();
        let record = SymbolRecord::new("SOLUSDT", 60.0, 3.0, clock.now());
        assert!(checker.validate(&movers_with(&record)).await.is_fresh());
    }

    #[test]
    fn test_future_timestamp_has_zero_age() {
        let now = Utc::now();
        assert_eq!(age_at(now + ChronoDuration::seconds(5), now), Duration::ZERO);
        assert!(check_age(now + ChronoDuration::seconds(5), Duration::ZERO, now).is_fresh());
    }

    #[test]
    fn test_verdict_serialization() {
        let verdict = Verdict::Stale {
            reason: StaleReason::TooOld {
                age_ms: 90_000,
                max_age_ms: 60_000,
            },
        };
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["status"], "stale");
        assert_eq!(json["reason"]["kind"], "too_old");
    }
}
