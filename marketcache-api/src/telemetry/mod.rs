//! MARKETCACHE Telemetry - Observability Infrastructure
//!
//! Structured logging through `tracing` and Prometheus metrics for the API
//! layer. Neither needs an external collector to run.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, MarketMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracer, TelemetryConfig};
