//! Per-tier circuit breaker.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use marketcache_core::CircuitState;

/// Consecutive failures before the circuit opens.
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Successes in half-open needed to close the circuit.
pub const DEFAULT_CIRCUIT_SUCCESS_THRESHOLD: u32 = 1;

/// How long an open circuit waits before letting a probe through.
pub const DEFAULT_CIRCUIT_COOLDOWN_MS: u64 = 5_000;

/// Configuration for circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
            cooldown: Duration::from_millis(DEFAULT_CIRCUIT_COOLDOWN_MS),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create CircuitBreakerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `MARKETCACHE_CIRCUIT_FAILURE_THRESHOLD`: Failures before opening (default: 5)
    /// - `MARKETCACHE_CIRCUIT_SUCCESS_THRESHOLD`: Successes to close from half-open (default: 1)
    /// - `MARKETCACHE_CIRCUIT_COOLDOWN_MS`: How long the circuit stays open (default: 5000)
    pub fn from_env() -> Self {
        let failure_threshold = std::env::var("MARKETCACHE_CIRCUIT_FAILURE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CIRCUIT_FAILURE_THRESHOLD);

        let success_threshold = std::env::var("MARKETCACHE_CIRCUIT_SUCCESS_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CIRCUIT_SUCCESS_THRESHOLD);

        let cooldown = Duration::from_millis(
            std::env::var("MARKETCACHE_CIRCUIT_COOLDOWN_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CIRCUIT_COOLDOWN_MS),
        );

        Self {
            failure_threshold,
            success_threshold,
            cooldown,
        }
    }
}

/// Circuit breaker guarding one cache tier.
///
/// Closed until `failure_threshold` consecutive failures, then open for
/// `cooldown`. The first call after the cooldown moves it to half-open;
/// a success there closes it and any failure reopens it immediately.
///
/// Half-open admits one trial call at a time. A trial that never reports
/// back (its caller was cancelled) is given up after another `cooldown`.
pub struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
    trial_started_at: Mutex<Option<Instant>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            opened_at: RwLock::new(None),
            trial_started_at: Mutex::new(None),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    /// Whether a call may go to the tier now.
    ///
    /// In half-open only the caller that wins the trial slot gets `true`;
    /// it must report back through `record_success`, `record_failure` or
    /// `end_trial`.
    pub fn is_allowed(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.begin_trial(),
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .read()
                    .ok()
                    .and_then(|guard| *guard)
                    .is_some_and(|opened| opened.elapsed() >= self.config.cooldown);
                if !cooled {
                    return false;
                }
                let _ = self.state.compare_exchange(
                    CircuitState::Open as u8,
                    CircuitState::HalfOpen as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                self.begin_trial()
            }
        }
    }

    fn begin_trial(&self) -> bool {
        let Ok(mut trial) = self.trial_started_at.lock() else {
            return false;
        };
        let free = trial.map_or(true, |started| started.elapsed() >= self.config.cooldown);
        if free {
            *trial = Some(Instant::now());
        }
        free
    }

    /// Release the half-open trial slot without judging the tier.
    pub fn end_trial(&self) {
        if let Ok(mut trial) = self.trial_started_at.lock() {
            *trial = None;
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        self.end_trial();

        if self.state() == CircuitState::HalfOpen {
            let count = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
            if count >= self.config.success_threshold {
                self.state
                    .store(CircuitState::Closed as u8, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
            }
        }
    }

    pub fn record_failure(&self) {
        self.success_count.store(0, Ordering::SeqCst);
        self.end_trial();

        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state() == CircuitState::HalfOpen || count >= self.config.failure_threshold {
            self.open();
        }
    }

    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        if let Ok(mut guard) = self.opened_at.write() {
            *guard = None;
        }
        self.end_trial();
    }

    fn open(&self) {
        if let Ok(mut guard) = self.opened_at.write() {
            *guard = Some(Instant::now());
        }
        self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Relaxed))
            .field("success_count", &self.success_count.load(Ordering::Relaxed))
            .finish()
    }
}
