//! Control and Status Endpoints
//!
//! Live rollout management, manual view refresh and the observability
//! JSON consumed by dashboards.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use marketcache_core::{AggregateView, RolloutConfig, RolloutUpdate, TierSnapshot, ViewKind};
use marketcache_storage::TierStore;

use crate::bridge::{AggregationBridge, BridgeStatus};
use crate::error::ApiResult;
use crate::rollout::RolloutHandle;
use crate::state::AppState;
use crate::telemetry::metrics::metrics;

// ============================================================================
// TYPES
// ============================================================================

/// Body of GET /v1/status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub bridge: BridgeStatus,
    pub tiers: Vec<TierSnapshot>,
    pub rollout: RolloutConfig,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /v1/control/rollout
pub async fn get_rollout(State(rollout): State<RolloutHandle>) -> Json<RolloutConfig> {
    Json(rollout.snapshot())
}

/// PUT /v1/control/rollout - partial update, applied without restart
pub async fn update_rollout(
    State(rollout): State<RolloutHandle>,
    Json(update): Json<RolloutUpdate>,
) -> ApiResult<Json<RolloutConfig>> {
    let config = rollout.apply(&update)?;
    if let Some(m) = metrics() {
        m.set_rollout(&config);
    }
    Ok(Json(config))
}

/// POST /v1/control/rollout/reload - re-read the rollout environment
pub async fn reload_rollout(State(rollout): State<RolloutHandle>) -> ApiResult<Json<RolloutConfig>> {
    let config = rollout.reload_from_env()?;
    if let Some(m) = metrics() {
        m.set_rollout(&config);
    }
    Ok(Json(config))
}

/// POST /v1/control/views/:view/refresh - recompute and publish one view
pub async fn refresh_view(
    State(bridge): State<Arc<AggregationBridge>>,
    Path(view): Path<ViewKind>,
) -> ApiResult<Json<AggregateView>> {
    let view = bridge.refresh_view(view).await?;
    Ok(Json(view))
}

/// GET /v1/status
pub async fn status(
    State(bridge): State<Arc<AggregationBridge>>,
    State(store): State<Arc<TierStore>>,
    State(rollout): State<RolloutHandle>,
    State(start_time): State<Instant>,
) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        bridge: bridge.status(),
        tiers: store.tier_snapshots(),
        rollout: rollout.snapshot(),
    })
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/v1/control/rollout", get(get_rollout).put(update_rollout))
        .route("/v1/control/rollout/reload", post(reload_rollout))
        .route("/v1/control/views/:view/refresh", post(refresh_view))
        .route("/v1/status", get(status))
}
