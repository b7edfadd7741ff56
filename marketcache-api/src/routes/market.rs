//! Market Read and Ingestion Endpoints
//!
//! Read endpoints route through the [`MarketReader`], which picks the
//! optimized or legacy path from the request key. The key comes from the
//! `x-request-id` header so a client keeps its path across requests; callers
//! without one get a fresh UUID per request.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;

use marketcache_core::{normalize_symbol, SymbolRecord, ViewKind};

use crate::constants::REQUEST_KEY_HEADER;
use crate::error::{ApiError, ApiResult};
use crate::reader::{MarketReader, ReadRequest, ReadResponse};
use crate::state::AppState;
use crate::writer::RecordWriter;

/// Request key for the rollout decision.
pub fn request_key(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string())
}

async fn read_view(
    reader: &MarketReader,
    kind: ViewKind,
    headers: &HeaderMap,
) -> ApiResult<Json<ReadResponse>> {
    let key = request_key(headers);
    let response = reader.read(&ReadRequest::View(kind), &key).await?;
    Ok(Json(response))
}

// ============================================================================
// READ HANDLERS
// ============================================================================

/// GET /v1/market/overview
pub async fn overview(
    State(reader): State<Arc<MarketReader>>,
    headers: HeaderMap,
) -> ApiResult<Json<ReadResponse>> {
    read_view(&reader, ViewKind::Overview, &headers).await
}

/// GET /v1/market/movers
pub async fn movers(
    State(reader): State<Arc<MarketReader>>,
    headers: HeaderMap,
) -> ApiResult<Json<ReadResponse>> {
    read_view(&reader, ViewKind::Movers, &headers).await
}

/// GET /v1/market/latest
pub async fn latest(
    State(reader): State<Arc<MarketReader>>,
    headers: HeaderMap,
) -> ApiResult<Json<ReadResponse>> {
    read_view(&reader, ViewKind::LatestBreakdown, &headers).await
}

/// GET /v1/symbols/:symbol
pub async fn symbol(
    State(reader): State<Arc<MarketReader>>,
    Path(symbol): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ReadResponse>> {
    let key = request_key(&headers);
    let response = reader.read(&ReadRequest::Symbol(symbol), &key).await?;
    Ok(Json(response))
}

// ============================================================================
// INGESTION HANDLERS
// ============================================================================

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub symbol: String,
    pub removed: bool,
}

/// POST /v1/records - store one record from the analysis producer
pub async fn write_record(
    State(writer): State<Arc<RecordWriter>>,
    Json(record): Json<SymbolRecord>,
) -> ApiResult<impl IntoResponse> {
    let outcome = writer.write_record(record).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// DELETE /v1/records/:symbol - drop a symbol and its records
pub async fn remove_record(
    State(writer): State<Arc<RecordWriter>>,
    Path(symbol): Path<String>,
) -> ApiResult<Json<RemoveResponse>> {
    let symbol = normalize_symbol(&symbol);
    if symbol.is_empty() {
        return Err(ApiError::invalid_input("symbol must not be empty"));
    }
    let removed = writer.remove_symbol(&symbol).await?;
    if !removed {
        return Err(ApiError::symbol_not_found(&symbol));
    }
    Ok(Json(RemoveResponse { symbol, removed }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/v1/market/overview", get(overview))
        .route("/v1/market/movers", get(movers))
        .route("/v1/market/latest", get(latest))
        .route("/v1/symbols/:symbol", get(symbol))
        .route("/v1/records", post(write_record))
        .route("/v1/records/:symbol", delete(remove_record))
}
