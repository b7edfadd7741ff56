//! MARKETCACHE API - Aggregation Bridge, Read Service and HTTP Layer
//!
//! Per-symbol records written by the analysis producer land in the tier
//! store through the [`RecordWriter`]. The [`AggregationBridge`] turns them
//! into market-wide views on a fixed interval, and the [`MarketReader`]
//! serves those views (or recomputes them) behind a percentage rollout,
//! labelling every response with its age and freshness.

pub mod aggregate;
pub mod bridge;
pub mod config;
pub mod constants;
pub mod error;
pub mod freshness;
pub mod jobs;
pub mod macros;
pub mod reader;
pub mod rollout;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod writer;

pub use bridge::{AggregationBridge, BridgeConfig, BridgeMetrics, BridgePhase, CycleReport};
pub use config::{ServiceConfig, StoreSettings};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use freshness::{FreshnessChecker, FreshnessPolicy, StaleReason, Verdict};
pub use reader::{MarketReader, ReadPayload, ReadRequest, ReadResponse, ServePath};
pub use rollout::RolloutHandle;
pub use routes::create_api_router;
pub use state::AppState;
pub use writer::{RecordWriter, WriteOutcome};
