//! Tracing Subscriber Initialization
//!
//! JSON-formatted structured logs filtered by `RUST_LOG`, falling back to a
//! default directive set when it is unset or invalid.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

/// Default filter when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "marketcache_api=debug,marketcache_storage=info,info";

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Emit JSON lines (default) or human-readable output
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("MARKETCACHE_SERVICE_NAME")
                .unwrap_or_else(|_| "marketcache-api".to_string()),
            service_version: std::env::var("MARKETCACHE_SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            environment: std::env::var("MARKETCACHE_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            json_logs: std::env::var("MARKETCACHE_LOG_FORMAT")
                .map(|s| s.to_lowercase() != "pretty")
                .unwrap_or(true),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup before anything logs. A second call fails because
/// the global subscriber is already set.
pub fn init_tracer(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        service_version = %config.service_version,
        environment = %config.environment,
        "Telemetry initialized"
    );

    Ok(())
}
