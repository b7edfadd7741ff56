//! Read Service
//!
//! Single entry point for reads. The rollout controller picks the path per
//! request key:
//!
//! - **optimized**: serve the published view from the tier store. A view
//!   that disagrees with the score records is recomputed instead of served;
//!   a view that is merely old is served marked stale. A miss falls back to
//!   recomputation.
//! - **legacy**: recompute the view on demand through the bridge, falling
//!   back to the published view if recomputation fails.
//!
//! Only when neither source yields anything does the caller get an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use marketcache_core::{
    breakdown_key, normalize_symbol, AggregateView, BridgeError, SymbolRecord, TierKind, ViewKind,
};
use marketcache_storage::{CacheRead, TierStore};

use crate::bridge::AggregationBridge;
use crate::error::{ApiError, ApiResult};
use crate::freshness::{age_at, check_age, FreshnessChecker, Verdict};
use crate::rollout::RolloutHandle;
use crate::telemetry::metrics::metrics;

/// What the caller wants to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadRequest {
    View(ViewKind),
    Symbol(String),
}

impl ReadRequest {
    fn label(&self) -> &'static str {
        match self {
            Self::View(kind) => kind.as_str(),
            Self::Symbol(_) => "symbol",
        }
    }
}

/// Which path served the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServePath {
    Optimized,
    Legacy,
}

impl ServePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Optimized => "optimized",
            Self::Legacy => "legacy",
        }
    }
}

/// Served value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadPayload {
    View(AggregateView),
    Symbol(SymbolRecord),
}

/// A read result with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResponse {
    pub data: ReadPayload,
    /// Timestamp of the newest source record behind `data`.
    pub timestamp: DateTime<Utc>,
    pub age_ms: u64,
    #[serde(flatten)]
    pub freshness: Verdict,
    pub path: ServePath,
    /// Tier that served a cached value; `None` when recomputed.
    pub tier: Option<TierKind>,
    pub recomputed: bool,
}

/// Serves market reads over the tier store and the bridge.
pub struct MarketReader {
    store: Arc<TierStore>,
    bridge: Arc<AggregationBridge>,
    checker: FreshnessChecker,
    rollout: RolloutHandle,
}

impl MarketReader {
    pub fn new(
        store: Arc<TierStore>,
        bridge: Arc<AggregationBridge>,
        checker: FreshnessChecker,
        rollout: RolloutHandle,
    ) -> Self {
        Self {
            store,
            bridge,
            checker,
            rollout,
        }
    }

    pub fn checker(&self) -> &FreshnessChecker {
        &self.checker
    }

    pub async fn read(&self, request: &ReadRequest, request_key: &str) -> ApiResult<ReadResponse> {
        let path = if self.rollout.should_use_optimized_path(request_key) {
            ServePath::Optimized
        } else {
            ServePath::Legacy
        };

        let result = match request {
            ReadRequest::View(kind) => match path {
                ServePath::Optimized => self.read_view_optimized(*kind).await,
                ServePath::Legacy => self.read_view_legacy(*kind).await,
            },
            ReadRequest::Symbol(symbol) => self.read_symbol(symbol, path).await,
        };

        if let Some(m) = metrics() {
            let status = match &result {
                Ok(response) => response.freshness.as_str(),
                Err(_) => "error",
            };
            m.record_read(request.label(), path.as_str(), status);
        }
        result
    }

    async fn cached_view(&self, kind: ViewKind) -> Option<CacheRead<AggregateView>> {
        match self.store.get_json::<AggregateView>(kind.key()).await {
            Ok(Some(read)) if read.value().kind() == kind => Some(read),
            Ok(Some(read)) => {
                warn!(view = %kind, found = %read.value().kind(), "View stored under the wrong key");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(view = %kind, error = %e, "Published view undecodable");
                None
            }
        }
    }

    fn respond(
        &self,
        data: ReadPayload,
        timestamp: DateTime<Utc>,
        freshness: Verdict,
        path: ServePath,
        tier: Option<TierKind>,
    ) -> ReadResponse {
        ReadResponse {
            data,
            timestamp,
            age_ms: age_at(timestamp, self.store.now()).as_millis() as u64,
            freshness,
            path,
            recomputed: tier.is_none(),
            tier,
        }
    }

    async fn recompute(&self, kind: ViewKind, path: ServePath) -> Result<ReadResponse, BridgeError> {
        let view = self.bridge.refresh_view(kind).await?;
        let verdict = self.checker.validate(&view).await;
        let timestamp = view.timestamp();
        Ok(self.respond(ReadPayload::View(view), timestamp, verdict, path, None))
    }

    async fn read_view_optimized(&self, kind: ViewKind) -> ApiResult<ReadResponse> {
        let path = ServePath::Optimized;
        let Some(cached) = self.cached_view(kind).await else {
            debug!(view = %kind, "Published view missing, recomputing");
            return self
                .recompute(kind, path)
                .await
                .map_err(|e| unavailable(kind, e));
        };

        let verdict = self.checker.validate(cached.value()).await;
        if !verdict.is_inconsistent() {
            let tier = cached.tier();
            let view = cached.into_value();
            let timestamp = view.timestamp();
            return Ok(self.respond(ReadPayload::View(view), timestamp, verdict, path, Some(tier)));
        }

        debug!(view = %kind, "Published view inconsistent, recomputing");
        match self.recompute(kind, path).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(view = %kind, error = %e, "Recompute failed, serving inconsistent view as stale");
                let tier = cached.tier();
                let view = cached.into_value();
                let timestamp = view.timestamp();
                Ok(self.respond(ReadPayload::View(view), timestamp, verdict, path, Some(tier)))
            }
        }
    }

    async fn read_view_legacy(&self, kind: ViewKind) -> ApiResult<ReadResponse> {
        let path = ServePath::Legacy;
        let error = match self.recompute(kind, path).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        warn!(view = %kind, error = %error, "Recompute failed, trying published view");
        match self.cached_view(kind).await {
            Some(cached) => {
                let verdict = self.checker.validate(cached.value()).await;
                let tier = cached.tier();
                let view = cached.into_value();
                let timestamp = view.timestamp();
                Ok(self.respond(ReadPayload::View(view), timestamp, verdict, path, Some(tier)))
            }
            None => Err(unavailable(kind, error)),
        }
    }

    async fn read_symbol(&self, symbol: &str, path: ServePath) -> ApiResult<ReadResponse> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(ApiError::invalid_input("symbol must not be empty"));
        }

        let read = match self.store.get_json::<SymbolRecord>(&breakdown_key(&symbol)).await {
            Ok(Some(read)) => read,
            Ok(None) => return Err(ApiError::symbol_not_found(&symbol)),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Stored record undecodable");
                return Err(ApiError::symbol_not_found(&symbol));
            }
        };

        let tier = read.tier();
        let record = read.into_value();
        let verdict = check_age(
            record.timestamp,
            self.checker.policy().symbol_max_age,
            self.store.now(),
        );
        let timestamp = record.timestamp;
        Ok(self.respond(ReadPayload::Symbol(record), timestamp, verdict, path, Some(tier)))
    }
}

/// Error for a view neither path could produce.
fn unavailable(kind: ViewKind, error: BridgeError) -> ApiError {
    match error {
        BridgeError::NoData { .. } => ApiError::view_not_found(kind),
        other => ApiError::service_unavailable(format!("{} unavailable: {}", kind, other)),
    }
}
