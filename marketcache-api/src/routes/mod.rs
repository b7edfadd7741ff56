//! REST API Routes Module
//!
//! - Market reads (`/v1/market/*`, `/v1/symbols/:symbol`)
//! - Record ingestion for the analysis producer (`/v1/records`)
//! - Rollout control, manual refresh and status (`/v1/control/*`, `/v1/status`)
//! - Health checks and Prometheus metrics (public)

pub mod control;
pub mod health;
pub mod market;

use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::constants::REQUEST_KEY_HEADER;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use control::create_router as control_router;
pub use health::create_router as health_router;
pub use market::create_router as market_router;

/// Preflight cache lifetime.
const CORS_MAX_AGE: Duration = Duration::from_secs(3600);

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer.
///
/// With no configured origins every origin is allowed; otherwise only the
/// listed ones.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(REQUEST_KEY_HEADER),
        ])
        .max_age(CORS_MAX_AGE);

    if origins.is_empty() {
        tracing::info!("CORS: allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(origins = ?origins, "CORS: allowing configured origins");
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(origins)
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the complete API router.
///
/// # Middleware Order (outer to inner)
/// 1. CORS - handles preflight requests
/// 2. Observability - tracing and metrics
pub fn create_api_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .merge(market_router())
        .merge(control_router())
        .merge(health_router())
        .route("/metrics", get(metrics_handler))
        .layer(from_fn(observability_middleware))
        .layer(build_cors_layer(cors_origins))
        .with_state(state)
}

