//! Aggregation Bridge
//!
//! Recomputes the aggregate views from the per-symbol records held in the
//! tier store and publishes them back under their fixed keys. One cycle
//! moves through `Idle -> Scanning -> Computing -> Publishing -> Idle`:
//!
//! - *Scanning* reads the symbol index and every listed record. Records
//!   that fail to decode or validate, are missing, or are older than the
//!   configured max age are skipped and counted.
//! - *Computing* derives every view from the usable records only. A view
//!   that cannot be computed does not stop the others.
//! - *Publishing* writes each view with a TTL shorter than the refresh
//!   interval, so a missed cycle shows up as a miss rather than silently
//!   old data.
//!
//! Each view's scan, compute and publish run inside one [`SingleFlight`]
//! execution keyed by the view key. A manual refresh that overlaps a cycle
//! joins it instead of racing it, and the cycle's scan starts only after
//! every view key is claimed, so a published view never comes from a scan
//! older than one already published.
//!
//! The cycle as a whole runs under a deadline; when it expires the cycle is
//! abandoned and the next tick starts fresh.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use marketcache_core::{
    breakdown_key, AggregateView, BridgeError, SymbolIndex, SymbolRecord, ViewKind,
    SYMBOL_INDEX_KEY,
};
use marketcache_storage::{SingleFlight, TierStore};

use crate::aggregate::{compute_view, SymbolSnapshot};
use crate::constants::{
    DEFAULT_BRIDGE_CYCLE_DEADLINE_MS, DEFAULT_BRIDGE_REFRESH_INTERVAL_MS,
    DEFAULT_BRIDGE_VIEW_TTL_MS, DEFAULT_MOVERS_TOP_N, DEFAULT_RECORD_MAX_AGE_SECS,
};
use crate::telemetry::metrics::metrics;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the aggregation bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Time between cycles (default: 5 seconds)
    pub refresh_interval: Duration,

    /// Deadline for one whole cycle (default: 4 seconds)
    pub cycle_deadline: Duration,

    /// TTL of published views; kept below `refresh_interval` (default: 4.5 seconds)
    pub view_ttl: Duration,

    /// Gainers and losers kept in the movers view (default: 10)
    pub top_n: usize,

    /// Records older than this are skipped as stale (default: 5 minutes)
    pub record_max_age: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(DEFAULT_BRIDGE_REFRESH_INTERVAL_MS),
            cycle_deadline: Duration::from_millis(DEFAULT_BRIDGE_CYCLE_DEADLINE_MS),
            view_ttl: Duration::from_millis(DEFAULT_BRIDGE_VIEW_TTL_MS),
            top_n: DEFAULT_MOVERS_TOP_N,
            record_max_age: Duration::from_secs(DEFAULT_RECORD_MAX_AGE_SECS),
        }
    }
}

impl BridgeConfig {
    /// Create BridgeConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `MARKETCACHE_BRIDGE_REFRESH_INTERVAL_MS`: Time between cycles (default: 5000)
    /// - `MARKETCACHE_BRIDGE_CYCLE_DEADLINE_MS`: Deadline for one cycle (default: 4000)
    /// - `MARKETCACHE_BRIDGE_VIEW_TTL_MS`: TTL of published views (default: 4500)
    /// - `MARKETCACHE_MOVERS_TOP_N`: Size of each movers list (default: 10)
    /// - `MARKETCACHE_RECORD_MAX_AGE_SECS`: Max record age for aggregation (default: 300)
    pub fn from_env() -> Self {
        let refresh_interval = Duration::from_millis(
            std::env::var("MARKETCACHE_BRIDGE_REFRESH_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BRIDGE_REFRESH_INTERVAL_MS),
        );

        let cycle_deadline = Duration::from_millis(
            std::env::var("MARKETCACHE_BRIDGE_CYCLE_DEADLINE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BRIDGE_CYCLE_DEADLINE_MS),
        );

        let view_ttl = Duration::from_millis(
            std::env::var("MARKETCACHE_BRIDGE_VIEW_TTL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BRIDGE_VIEW_TTL_MS),
        );

        let top_n = std::env::var("MARKETCACHE_MOVERS_TOP_N")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MOVERS_TOP_N);

        let record_max_age = Duration::from_secs(
            std::env::var("MARKETCACHE_RECORD_MAX_AGE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RECORD_MAX_AGE_SECS),
        );

        Self {
            refresh_interval,
            cycle_deadline,
            view_ttl,
            top_n,
            record_max_age,
        }
        .normalized()
    }

    /// Create a configuration for development/testing with a fast cadence.
    pub fn development() -> Self {
        Self {
            refresh_interval: Duration::from_millis(500),
            cycle_deadline: Duration::from_millis(400),
            view_ttl: Duration::from_millis(450),
            top_n: DEFAULT_MOVERS_TOP_N,
            record_max_age: Duration::from_secs(60),
        }
    }

    /// Clamp settings that would break the cycle contract.
    ///
    /// The view TTL must stay below the refresh interval and the deadline
    /// must not exceed it.
    pub fn normalized(mut self) -> Self {
        if self.refresh_interval.is_zero() {
            self.refresh_interval = Duration::from_millis(DEFAULT_BRIDGE_REFRESH_INTERVAL_MS);
        }
        if self.view_ttl.is_zero() || self.view_ttl >= self.refresh_interval {
            let clamped = (self.refresh_interval * 9 / 10).max(Duration::from_millis(1));
            warn!(
                view_ttl_ms = self.view_ttl.as_millis() as u64,
                refresh_interval_ms = self.refresh_interval.as_millis() as u64,
                clamped_ms = clamped.as_millis() as u64,
                "View TTL must be below the refresh interval, clamping"
            );
            self.view_ttl = clamped;
        }
        if self.cycle_deadline.is_zero() || self.cycle_deadline > self.refresh_interval {
            self.cycle_deadline = self.refresh_interval;
        }
        if self.top_n == 0 {
            self.top_n = DEFAULT_MOVERS_TOP_N;
        }
        self
    }
}

// ============================================================================
// PHASE
// ============================================================================

/// Where the current cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BridgePhase {
    Idle = 0,
    Scanning = 1,
    Computing = 2,
    Publishing = 3,
}

impl From<u8> for BridgePhase {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Scanning,
            2 => Self::Computing,
            3 => Self::Publishing,
            _ => Self::Idle,
        }
    }
}

impl BridgePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Computing => "computing",
            Self::Publishing => "publishing",
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for bridge activity since startup.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    /// Cycles that finished before the deadline
    pub cycles_completed: AtomicU64,

    /// Cycles that finished and published every computable view
    pub cycles_succeeded: AtomicU64,

    /// Cycles abandoned at the deadline
    pub cycles_abandoned: AtomicU64,

    /// Views computed from a scan
    pub views_computed: AtomicU64,

    /// Views written to the store
    pub views_published: AtomicU64,

    /// View writes that failed
    pub publish_failures: AtomicU64,

    /// Unix millis of the last successful cycle, 0 if none
    pub last_success_ms: AtomicI64,

    pub last_total_symbols: AtomicU64,
    pub last_skipped: AtomicU64,
    pub last_malformed: AtomicU64,
    pub last_missing: AtomicU64,
    pub last_stale: AtomicU64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> BridgeMetricsSnapshot {
        let last_success_ms = self.last_success_ms.load(Ordering::Relaxed);
        BridgeMetricsSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_succeeded: self.cycles_succeeded.load(Ordering::Relaxed),
            cycles_abandoned: self.cycles_abandoned.load(Ordering::Relaxed),
            views_computed: self.views_computed.load(Ordering::Relaxed),
            views_published: self.views_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            last_success_at: (last_success_ms != 0)
                .then(|| Utc.timestamp_millis_opt(last_success_ms).single())
                .flatten(),
            last_total_symbols: self.last_total_symbols.load(Ordering::Relaxed),
            last_skipped: self.last_skipped.load(Ordering::Relaxed),
            last_malformed: self.last_malformed.load(Ordering::Relaxed),
            last_missing: self.last_missing.load(Ordering::Relaxed),
            last_stale: self.last_stale.load(Ordering::Relaxed),
        }
    }

    fn record_scan(&self, snapshot: &SymbolSnapshot) {
        self.last_total_symbols
            .store(snapshot.total_symbols as u64, Ordering::Relaxed);
        self.last_skipped
            .store(snapshot.skipped() as u64, Ordering::Relaxed);
        self.last_malformed
            .store(snapshot.malformed as u64, Ordering::Relaxed);
        self.last_missing
            .store(snapshot.missing as u64, Ordering::Relaxed);
        self.last_stale.store(snapshot.stale as u64, Ordering::Relaxed);
    }
}

/// Snapshot of bridge metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeMetricsSnapshot {
    pub cycles_completed: u64,
    pub cycles_succeeded: u64,
    pub cycles_abandoned: u64,
    pub views_computed: u64,
    pub views_published: u64,
    pub publish_failures: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_total_symbols: u64,
    pub last_skipped: u64,
    pub last_malformed: u64,
    pub last_missing: u64,
    pub last_stale: u64,
}

/// Bridge state for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub phase: BridgePhase,
    pub refresh_interval_ms: u64,
    pub view_ttl_ms: u64,
    #[serde(flatten)]
    pub metrics: BridgeMetricsSnapshot,
}

// ============================================================================
// CYCLE REPORT
// ============================================================================

/// A view that was computed but could not be published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewFailure {
    pub view: ViewKind,
    pub error: String,
}

/// Outcome of one completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub published: Vec<ViewKind>,
    /// Views skipped because no record was usable.
    pub unpublished: Vec<ViewKind>,
    pub failed: Vec<ViewFailure>,
    pub total_symbols: usize,
    pub valid_symbols: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub missing: usize,
    pub stale: usize,
    pub duration_ms: u64,
}

impl CycleReport {
    /// Every computable view was published and at least one was.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.published.is_empty()
    }
}

// ============================================================================
// BRIDGE
// ============================================================================

/// Cache-to-cache transform from symbol records to aggregate views.
pub struct AggregationBridge {
    store: Arc<TierStore>,
    config: BridgeConfig,
    flights: SingleFlight<AggregateView, BridgeError>,
    phase: AtomicU8,
    metrics: Arc<BridgeMetrics>,
}

impl AggregationBridge {
    pub fn new(store: Arc<TierStore>, config: BridgeConfig) -> Self {
        Self {
            store,
            config: config.normalized(),
            flights: SingleFlight::new(),
            phase: AtomicU8::new(BridgePhase::Idle as u8),
            metrics: Arc::new(BridgeMetrics::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TierStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.metrics
    }

    pub fn phase(&self) -> BridgePhase {
        BridgePhase::from(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: BridgePhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            phase: self.phase(),
            refresh_interval_ms: self.config.refresh_interval.as_millis() as u64,
            view_ttl_ms: self.config.view_ttl.as_millis() as u64,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Read the index and every listed record, sorting out unusable ones.
    pub async fn scan(&self) -> SymbolSnapshot {
        let index = match self.store.get_json::<SymbolIndex>(SYMBOL_INDEX_KEY).await {
            Ok(Some(read)) => read.into_value(),
            Ok(None) => SymbolIndex::default(),
            Err(e) => {
                warn!(error = %e, "Symbol index undecodable, scanning nothing");
                SymbolIndex::default()
            }
        };

        let now = self.store.now();
        let reads = join_all(index.symbols.iter().map(|symbol| async move {
            let read = self
                .store
                .get_json::<SymbolRecord>(&breakdown_key(symbol))
                .await;
            (symbol, read)
        }))
        .await;

        let mut snapshot = SymbolSnapshot {
            total_symbols: index.len(),
            ..Default::default()
        };

        for (symbol, read) in reads {
            let record = match read {
                Ok(Some(read)) => read.into_value(),
                Ok(None) => {
                    debug!(symbol = %symbol, "Indexed symbol has no live record");
                    snapshot.missing += 1;
                    continue;
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Skipping undecodable record");
                    snapshot.malformed += 1;
                    continue;
                }
            };

            if let Err(e) = record.validate() {
                warn!(symbol = %symbol, error = %e, "Skipping invalid record");
                snapshot.malformed += 1;
                continue;
            }
            if record.symbol != *symbol {
                warn!(symbol = %symbol, stored = %record.symbol, "Skipping record stored under another symbol");
                snapshot.malformed += 1;
                continue;
            }

            let age = (now - record.timestamp).to_std().unwrap_or_default();
            if age > self.config.record_max_age {
                debug!(symbol = %symbol, age_ms = age.as_millis() as u64, "Skipping stale record");
                snapshot.stale += 1;
                continue;
            }

            snapshot.records.push(record);
        }

        snapshot
    }

    /// Scan once per cycle, however many views ask for it.
    async fn cycle_scan<'a>(&self, scanned: &'a OnceCell<SymbolSnapshot>) -> &'a SymbolSnapshot {
        scanned
            .get_or_init(|| async {
                let snapshot = self.scan().await;
                self.metrics.record_scan(&snapshot);
                if snapshot.malformed > 0 {
                    warn!(
                        malformed = snapshot.malformed,
                        total = snapshot.total_symbols,
                        "Skipped malformed records"
                    );
                }
                snapshot
            })
            .await
    }

    fn compute(&self, kind: ViewKind, snapshot: &SymbolSnapshot) -> Result<AggregateView, BridgeError> {
        let view = compute_view(kind, snapshot, self.config.top_n, self.store.now())?;
        self.metrics.views_computed.fetch_add(1, Ordering::Relaxed);
        Ok(view)
    }

    /// Write `view` under its key. Runs inside the view's flight.
    async fn publish(&self, view: AggregateView) -> Result<AggregateView, BridgeError> {
        let kind = view.kind();
        match self
            .store
            .set_json(kind.key(), &view, self.config.view_ttl)
            .await
        {
            Ok(()) => {
                self.metrics.views_published.fetch_add(1, Ordering::Relaxed);
                Ok(view)
            }
            Err(e) => {
                self.metrics.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!(view = %kind, error = %e, "Failed to publish view");
                Err(e.into())
            }
        }
    }

    async fn cycle(&self, started: Instant) -> CycleReport {
        self.set_phase(BridgePhase::Scanning);
        let scanned = OnceCell::new();

        let results = join_all(ViewKind::ALL.into_iter().map(|kind| {
            let scanned = &scanned;
            async move {
                let result = self
                    .flights
                    .run(kind.key(), || async move {
                        let snapshot = self.cycle_scan(scanned).await;
                        self.set_phase(BridgePhase::Computing);
                        let view = self.compute(kind, snapshot)?;
                        self.set_phase(BridgePhase::Publishing);
                        self.publish(view).await
                    })
                    .await;
                (kind, result)
            }
        }))
        .await;

        // Every view may have joined a refresh already in flight.
        let snapshot = self.cycle_scan(&scanned).await;

        let mut published = Vec::new();
        let mut unpublished = Vec::new();
        let mut failed = Vec::new();
        for (kind, result) in results {
            match result {
                Ok(_) => published.push(kind),
                Err(BridgeError::NoData { .. }) => unpublished.push(kind),
                Err(e) => {
                    warn!(view = %kind, error = %e, "View not refreshed this cycle");
                    failed.push(ViewFailure {
                        view: kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        CycleReport {
            published,
            unpublished,
            failed,
            total_symbols: snapshot.total_symbols,
            valid_symbols: snapshot.records.len(),
            skipped: snapshot.skipped(),
            malformed: snapshot.malformed,
            missing: snapshot.missing,
            stale: snapshot.stale,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Run one refresh cycle under the configured deadline.
    pub async fn run_cycle(&self) -> Result<CycleReport, BridgeError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.cycle_deadline, self.cycle(started)).await;
        self.set_phase(BridgePhase::Idle);
        let elapsed = started.elapsed().as_secs_f64();

        let report = match outcome {
            Ok(report) => report,
            Err(_) => {
                self.metrics.cycles_abandoned.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = metrics() {
                    m.record_bridge_cycle("abandoned", elapsed);
                }
                let deadline_ms = self.config.cycle_deadline.as_millis() as u64;
                warn!(deadline_ms, "Bridge cycle abandoned at deadline");
                return Err(BridgeError::DeadlineExceeded { deadline_ms });
            }
        };

        self.metrics.cycles_completed.fetch_add(1, Ordering::Relaxed);
        let outcome = if report.is_success() {
            self.metrics.cycles_succeeded.fetch_add(1, Ordering::Relaxed);
            let now = self.store.now();
            self.metrics
                .last_success_ms
                .store(now.timestamp_millis(), Ordering::Relaxed);
            if let Some(m) = metrics() {
                m.set_bridge_last_success(now.timestamp());
            }
            "succeeded"
        } else {
            "partial"
        };
        if let Some(m) = metrics() {
            m.record_bridge_cycle(outcome, elapsed);
            m.set_bridge_skipped(report.skipped);
        }

        debug!(
            outcome,
            published = report.published.len(),
            failed = report.failed.len(),
            total_symbols = report.total_symbols,
            skipped = report.skipped,
            duration_ms = report.duration_ms,
            "Bridge cycle completed"
        );
        Ok(report)
    }

    /// Recompute and publish a single view now.
    ///
    /// Concurrent callers for the same view share one recomputation, and
    /// share it with a cycle publishing that view at the same moment.
    pub async fn refresh_view(&self, kind: ViewKind) -> Result<AggregateView, BridgeError> {
        let run = self.flights.run(kind.key(), || async move {
            let snapshot = self.scan().await;
            let view = self.publish(self.compute(kind, &snapshot)?).await?;
            info!(view = %kind, valid_symbols = snapshot.records.len(), "View refreshed on demand");
            Ok(view)
        });

        match tokio::time::timeout(self.config.cycle_deadline, run).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::DeadlineExceeded {
                deadline_ms: self.config.cycle_deadline.as_millis() as u64,
            }),
        }
    }
}
