//! Prometheus Metrics Definitions
//!
//! Defines all MARKETCACHE metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_histogram_vec, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramVec,
    TextEncoder,
};

use marketcache_core::{RolloutConfig, TierSnapshot};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Bridge cycle duration buckets (seconds)
const CYCLE_DURATION_BUCKETS: &[f64] =
    &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<MarketMetrics>> = Lazy::new(MarketMetrics::new);

/// The global metrics, or `None` if registration failed.
pub fn metrics() -> Option<&'static MarketMetrics> {
    METRICS.as_ref().ok()
}

/// Container for all MARKETCACHE metrics.
#[derive(Clone)]
pub struct MarketMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Read responses - labels: view, path (optimized/legacy), status
    pub read_responses_total: CounterVec,

    /// Bridge cycles - labels: outcome (succeeded/partial/abandoned)
    pub bridge_cycles_total: CounterVec,

    /// Bridge cycle duration
    pub bridge_cycle_duration_seconds: Histogram,

    /// Symbols skipped by the last completed cycle
    pub bridge_skipped_symbols: Gauge,

    /// Unix time of the last successful cycle
    pub bridge_last_success_timestamp_seconds: Gauge,

    /// Tier hits since startup - labels: tier
    pub tier_hits: GaugeVec,

    /// Tier misses since startup - labels: tier
    pub tier_misses: GaugeVec,

    /// Tier errors since startup - labels: tier
    pub tier_errors: GaugeVec,

    /// Circuit state per tier (0 closed, 1 open, 2 half-open) - labels: tier
    pub tier_circuit_state: GaugeVec,

    /// Current rollout percentage, 0 when disabled
    pub rollout_percentage: Gauge,
}

impl MarketMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "marketcache_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "marketcache_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            read_responses_total: register_counter_vec!(
                "marketcache_read_responses_total",
                "Read responses by view, serving path and freshness",
                &["view", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register read_responses_total: {}", e)))?,

            bridge_cycles_total: register_counter_vec!(
                "marketcache_bridge_cycles_total",
                "Aggregation bridge cycles by outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register bridge_cycles_total: {}", e)))?,

            bridge_cycle_duration_seconds: register_histogram!(
                "marketcache_bridge_cycle_duration_seconds",
                "Aggregation bridge cycle duration in seconds",
                CYCLE_DURATION_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register bridge_cycle_duration_seconds: {}", e)))?,

            bridge_skipped_symbols: register_gauge!(
                "marketcache_bridge_skipped_symbols",
                "Symbols skipped by the last completed bridge cycle"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register bridge_skipped_symbols: {}", e)))?,

            bridge_last_success_timestamp_seconds: register_gauge!(
                "marketcache_bridge_last_success_timestamp_seconds",
                "Unix time of the last successful bridge cycle"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register bridge_last_success_timestamp_seconds: {}", e)))?,

            tier_hits: register_gauge_vec!(
                "marketcache_tier_hits",
                "Cache hits per tier since startup",
                &["tier"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register tier_hits: {}", e)))?,

            tier_misses: register_gauge_vec!(
                "marketcache_tier_misses",
                "Cache misses per tier since startup",
                &["tier"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register tier_misses: {}", e)))?,

            tier_errors: register_gauge_vec!(
                "marketcache_tier_errors",
                "Failed tier calls since startup",
                &["tier"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register tier_errors: {}", e)))?,

            tier_circuit_state: register_gauge_vec!(
                "marketcache_tier_circuit_state",
                "Circuit breaker state per tier (0 closed, 1 open, 2 half-open)",
                &["tier"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register tier_circuit_state: {}", e)))?,

            rollout_percentage: register_gauge!(
                "marketcache_rollout_percentage",
                "Share of reads routed to the optimized path"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register rollout_percentage: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a read served by the reader.
    pub fn record_read(&self, view: &str, path: &str, status: &str) {
        self.read_responses_total
            .with_label_values(&[view, path, status])
            .inc();
    }

    /// Record the end of a bridge cycle.
    pub fn record_bridge_cycle(&self, outcome: &str, duration_secs: f64) {
        self.bridge_cycles_total.with_label_values(&[outcome]).inc();
        self.bridge_cycle_duration_seconds.observe(duration_secs);
    }

    pub fn set_bridge_skipped(&self, skipped: usize) {
        self.bridge_skipped_symbols.set(skipped as f64);
    }

    pub fn set_bridge_last_success(&self, unix_secs: i64) {
        self.bridge_last_success_timestamp_seconds.set(unix_secs as f64);
    }

    /// Copy tier counters and breaker states into the gauges.
    pub fn observe_tiers(&self, tiers: &[TierSnapshot]) {
        for tier in tiers {
            let label = [tier.name.as_str()];
            self.tier_hits.with_label_values(&label).set(tier.hits as f64);
            self.tier_misses.with_label_values(&label).set(tier.misses as f64);
            self.tier_errors.with_label_values(&label).set(tier.errors as f64);
            self.tier_circuit_state
                .with_label_values(&label)
                .set(tier.circuit as u8 as f64);
        }
    }

    pub fn set_rollout(&self, config: &RolloutConfig) {
        let effective = if config.enabled { config.percentage } else { 0 };
        self.rollout_percentage.set(effective as f64);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Refreshes tier gauges from the store, then returns Prometheus text format.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(metrics) = metrics() {
        metrics.observe_tiers(&state.store.tier_snapshots());
        metrics.set_rollout(&state.rollout.snapshot());
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketcache_core::{CircuitState, TierKind};
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        assert!(!metrics.http_requests_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_read_and_cycle() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.record_read("overview", "optimized", "fresh");
        metrics.record_read("movers", "legacy", "stale");
        metrics.record_bridge_cycle("succeeded", 0.012);
        metrics.set_bridge_skipped(3);
        assert_eq!(metrics.bridge_skipped_symbols.get(), 3.0);
        Ok(())
    }

    #[test]
    fn test_observe_tiers() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.observe_tiers(&[TierSnapshot {
            name: "metrics-test-tier".to_string(),
            kind: TierKind::Networked,
            circuit: CircuitState::Open,
            hits: 7,
            misses: 2,
            errors: 1,
            promotions: 0,
            short_circuited: 4,
        }]);
        let state = metrics
            .tier_circuit_state
            .with_label_values(&["metrics-test-tier"])
            .get();
        assert_eq!(state, 1.0);
        assert_eq!(
            metrics.tier_hits.with_label_values(&["metrics-test-tier"]).get(),
            7.0
        );
        Ok(())
    }

    #[test]
    fn test_rollout_gauge_zero_when_disabled() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let config = RolloutConfig {
            feature_name: "optimized_reads".to_string(),
            enabled: false,
            percentage: 40,
        };
        metrics.set_rollout(&config);
        assert_eq!(metrics.rollout_percentage.get(), 0.0);
        Ok(())
    }
}
