//! Health Check Endpoints
//!
//! Provides Kubernetes-compatible health check endpoints:
//! - /health/ping - Simple liveness check
//! - /health/live - Process alive check
//! - /health/ready - At least one cache tier has a closed circuit
//!
//! No authentication required for health endpoints.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use marketcache_core::{CircuitState, TierSnapshot};
use marketcache_storage::TierStore;

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiers: Option<Vec<ComponentHealth>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub circuit: CircuitState,
}

impl From<&TierSnapshot> for ComponentHealth {
    fn from(tier: &TierSnapshot) -> Self {
        let status = match tier.circuit {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Open => HealthStatus::Unhealthy,
        };
        Self {
            name: tier.name.clone(),
            status,
            circuit: tier.circuit,
        }
    }
}

/// Overall status: healthy when every tier is, unhealthy when none can serve.
fn overall_status(tiers: &[ComponentHealth]) -> HealthStatus {
    if tiers.iter().all(|t| t.status == HealthStatus::Healthy) {
        HealthStatus::Healthy
    } else if tiers.iter().any(|t| t.status != HealthStatus::Unhealthy) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping - Simple pong response
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness check
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        tiers: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready - Readiness check (tier circuits)
pub async fn readiness(State(store): State<Arc<TierStore>>) -> impl IntoResponse {
    let tiers: Vec<ComponentHealth> = store.tier_snapshots().iter().map(Into::into).collect();
    let status = overall_status(&tiers);

    let status_code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let response = HealthResponse {
        status,
        message: None,
        tiers: Some(tiers),
    };
    (status_code, Json(response))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create health check router (no auth required)
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health/ping", get(ping))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
}
