//! Background Jobs for MARKETCACHE API
//!
//! - `bridge_refresh`: drives the aggregation bridge on a fixed interval
//!
//! # Usage
//!
//! ```ignore
//! use marketcache_api::jobs::bridge_refresh_task;
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(bridge_refresh_task(Arc::clone(&bridge), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

pub mod bridge_refresh;

pub use bridge_refresh::bridge_refresh_task;
