//! MARKETCACHE Core - Domain Types
//!
//! Records, derived views, cache entries, key layout and the error taxonomy
//! shared by the storage and api crates. No I/O lives here.

pub mod clock;
pub mod entry;
pub mod error;
pub mod keys;
pub mod record;
pub mod rollout;
pub mod tier;
pub mod view;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::CacheEntry;
pub use error::{
    BridgeError, CacheError, CacheResult, ConfigError, MarketError, MarketResult, RecordError,
};
pub use keys::{breakdown_key, score_key, BREAKDOWN_NAMESPACE, SCORE_NAMESPACE, SYMBOL_INDEX_KEY};
pub use record::{normalize_symbol, LatestScore, SymbolIndex, SymbolRecord, MAX_SCORE};
pub use rollout::{RolloutConfig, RolloutUpdate};
pub use tier::{CircuitState, TierKind, TierSnapshot};
pub use view::{AggregateView, LatestBreakdown, MarketOverview, MoverEntry, Movers, ViewKind};
