//! Time source abstraction.
//!
//! Expiry, staleness and cycle timestamps all read the clock through this
//! trait so tests can move time forward without sleeping.

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub trait Clock: Send + Sync {
    /// Get the current time according to this clock
    fn now(&self) -> DateTime<Utc>;

    /// Get the clock's name/identifier for debugging
    fn name(&self) -> &str {
        "Clock"
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn name(&self) -> &str {
        "SystemClock"
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(at)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn name(&self) -> &str {
        "ManualClock"
    }
}
