//! MARKETCACHE Storage - Tiered Cache Store
//!
//! Cache tiers (in-process, Redis, LMDB), the [`TierStore`] that orders
//! them behind per-tier timeouts and circuit breakers, and the
//! [`SingleFlight`] guard used to deduplicate recomputation.

pub mod breaker;
pub mod encoding;
pub mod read;
pub mod single_flight;
pub mod store;
pub mod tier;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use encoding::{decode_entry, encode_entry};
pub use read::CacheRead;
pub use single_flight::SingleFlight;
pub use store::{TierStore, TierStoreBuilder, TierStoreConfig};
pub use tier::{CacheTier, LmdbTier, LmdbTierError, MemoryTier, RedisTier, RedisTierConfig};
