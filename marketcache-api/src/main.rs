//! MARKETCACHE API Server Entry Point
//!
//! Bootstraps configuration, builds the tier store, starts the bridge
//! refresh job and serves the Axum HTTP API until ctrl-c.

use std::sync::Arc;

use tokio::sync::watch;

use marketcache_api::jobs::bridge_refresh_task;
use marketcache_api::telemetry::{init_tracer, TelemetryConfig};
use marketcache_api::{
    create_api_router, ApiError, ApiResult, AppState, BridgeConfig, FreshnessPolicy,
    RolloutHandle, ServiceConfig,
};
use marketcache_core::{Clock, SystemClock};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let config = ServiceConfig::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(config.store.build_store(clock)?);

    let state = AppState::new(
        store,
        config.record_ttl,
        BridgeConfig::from_env(),
        FreshnessPolicy::from_env(),
        RolloutHandle::from_env()?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresh_handle = tokio::spawn(bridge_refresh_task(state.bridge.clone(), shutdown_rx));

    let app = create_api_router(state, &config.cors_origins);

    let addr = config.bind_addr()?;
    tracing::info!(%addr, "Starting MARKETCACHE API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    match refresh_handle.await {
        Ok(metrics) => {
            let snapshot = metrics.snapshot();
            tracing::info!(
                cycles_completed = snapshot.cycles_completed,
                cycles_abandoned = snapshot.cycles_abandoned,
                views_published = snapshot.views_published,
                "Bridge refresh stopped"
            );
        }
        Err(e) => tracing::error!(error = %e, "Bridge refresh task panicked"),
    }

    Ok(())
}
