//! Rollout Controller
//!
//! Decides per request whether a read takes the optimized path (serve the
//! published view from the tier store) or the legacy path (recompute on
//! demand). The decision hashes the request key into a stable bucket in
//! `[0, 100)` and compares it with the live percentage, so a given key keeps
//! its path for as long as the percentage stays put.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use tracing::info;

use marketcache_core::{ConfigError, RolloutConfig, RolloutUpdate};

use crate::config::{env_flag, env_parse};
use crate::constants::{DEFAULT_ROLLOUT_FEATURE, DEFAULT_ROLLOUT_PERCENTAGE};

/// Stable bucket for `request_key` under `feature_name`.
pub fn bucket(feature_name: &str, request_key: &str) -> u8 {
    let mut hasher = Sha256::new();
    hasher.update(feature_name.as_bytes());
    hasher.update(b":");
    hasher.update(request_key.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 100) as u8
}

/// Process-wide rollout state, swapped atomically on update.
///
/// Readers load the current snapshot lock-free; writers serialize among
/// themselves so concurrent partial updates do not lose fields.
#[derive(Clone)]
pub struct RolloutHandle {
    current: Arc<ArcSwap<RolloutConfig>>,
    update_lock: Arc<Mutex<()>>,
}

impl RolloutHandle {
    pub fn new(config: RolloutConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            update_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Seed from environment variables.
    ///
    /// # Environment Variables
    /// - `MARKETCACHE_ROLLOUT_FEATURE`: feature name (default: "optimized_reads")
    /// - `MARKETCACHE_ROLLOUT_ENABLED`: whether the rollout is active (default: false)
    /// - `MARKETCACHE_ROLLOUT_PERCENTAGE`: 0-100 (default: 0)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(config_from_env()?)
    }

    /// Current configuration.
    pub fn snapshot(&self) -> RolloutConfig {
        self.current.load().as_ref().clone()
    }

    /// Whether the request identified by `request_key` takes the optimized path.
    pub fn should_use_optimized_path(&self, request_key: &str) -> bool {
        let config = self.current.load();
        config.enabled && bucket(&config.feature_name, request_key) < config.percentage
    }

    /// Apply a partial update. On error the previous config stays in place.
    pub fn apply(&self, update: &RolloutUpdate) -> Result<RolloutConfig, ConfigError> {
        let _held = self.update_lock.lock().unwrap_or_else(|e| e.into_inner());
        let next = update.merged_into(&self.current.load())?;
        self.store(next.clone());
        Ok(next)
    }

    /// Replace the whole config.
    pub fn replace(&self, config: RolloutConfig) -> Result<RolloutConfig, ConfigError> {
        config.validate()?;
        let _held = self.update_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.store(config.clone());
        Ok(config)
    }

    /// Re-read the environment and apply it.
    pub fn reload_from_env(&self) -> Result<RolloutConfig, ConfigError> {
        self.replace(config_from_env()?)
    }

    fn store(&self, config: RolloutConfig) {
        info!(
            feature = %config.feature_name,
            enabled = config.enabled,
            percentage = config.percentage,
            "Rollout config updated"
        );
        self.current.store(Arc::new(config));
    }
}

fn config_from_env() -> Result<RolloutConfig, ConfigError> {
    let feature_name = std::env::var("MARKETCACHE_ROLLOUT_FEATURE")
        .unwrap_or_else(|_| DEFAULT_ROLLOUT_FEATURE.to_string());
    let enabled = env_flag("MARKETCACHE_ROLLOUT_ENABLED").unwrap_or(false);

    let percentage = match std::env::var("MARKETCACHE_ROLLOUT_PERCENTAGE") {
        Ok(raw) => {
            let parsed = env_parse::<u8>("MARKETCACHE_ROLLOUT_PERCENTAGE");
            parsed.ok_or_else(|| ConfigError::InvalidValue {
                field: "percentage".to_string(),
                value: raw,
                reason: "must be between 0 and 100".to_string(),
            })?
        }
        Err(_) => DEFAULT_ROLLOUT_PERCENTAGE,
    };

    RolloutConfig::new(feature_name, enabled, percentage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn handle(enabled: bool, percentage: u8) -> RolloutHandle {
        RolloutHandle::new(RolloutConfig::new("optimized_reads", enabled, percentage).unwrap())
            .unwrap()
    }

    #[test]
    fn test_decision_is_deterministic() {
        let rollout = handle(true, 37);
        for key in ["session-1", "session-2", "3f1c9a", ""] {
            let first = rollout.should_use_optimized_path(key);
            for _ in 0..1000 {
                assert_eq!(rollout.should_use_optimized_path(key), first);
            }
        }
    }

    #[test]
    fn test_fraction_converges_to_percentage() {
        for percentage in [0u8, 10, 25, 50, 90, 100] {
            let rollout = handle(true, percentage);
            let hits = (0..10_000)
                .filter(|i| rollout.should_use_optimized_path(&format!("req-{}", i)))
                .count();
            let fraction = hits as f64 / 10_000.0;
            let expected = percentage as f64 / 100.0;
            assert!(
                (fraction - expected).abs() <= 0.02,
                "percentage {} gave fraction {}",
                percentage,
                fraction
            );
        }
    }

    #[test]
    fn test_disabled_never_optimizes() {
        let rollout = handle(false, 100);
        assert!((0..500).all(|i| !rollout.should_use_optimized_path(&i.to_string())));
    }

    #[test]
    fn test_update_takes_effect_without_restart() {
        let rollout = handle(true, 0);
        assert!(!rollout.should_use_optimized_path("req-1"));

        rollout
            .apply(&RolloutUpdate {
                percentage: Some(100),
                ..Default::default()
            })
            .unwrap();
        assert!(rollout.should_use_optimized_path("req-1"));
    }

    #[test]
    fn test_invalid_update_keeps_previous_config() {
        let rollout = handle(true, 20);
        let before = rollout.snapshot();

        let err = rollout
            .apply(&RolloutUpdate {
                percentage: Some(150),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "percentage"));

        assert!(rollout
            .apply(&RolloutUpdate {
                feature_name: Some(String::new()),
                ..Default::default()
            })
            .is_err());
        assert_eq!(rollout.snapshot(), before);
    }

    #[test]
    fn test_clones_share_state() {
        let rollout = handle(false, 0);
        let other = rollout.clone();
        rollout
            .replace(RolloutConfig::new("optimized_reads", true, 60).unwrap())
            .unwrap();
        assert_eq!(other.snapshot().percentage, 60);
    }

    #[test]
    fn test_bucket_depends_on_feature() {
        let differing = (0..200)
            .filter(|i| {
                let key = format!("k{}", i);
                bucket("feature_a", &key) != bucket("feature_b", &key)
            })
            .count();
        assert!(differing > 100);
    }

    proptest! {
        #[test]
        fn prop_bucket_in_range(key in ".*", feature in "[a-z_]{1,16}") {
            prop_assert!(bucket(&feature, &key) < 100);
        }

        #[test]
        fn prop_raising_percentage_never_drops_a_key(key in "[a-zA-Z0-9-]{1,32}", low in 0u8..=100, high in 0u8..=100) {
            let (low, high) = (low.min(high), low.max(high));
            let low_on = handle(true, low).should_use_optimized_path(&key);
            let high_on = handle(true, high).should_use_optimized_path(&key);
            prop_assert!(!low_on || high_on);
        }
    }
}
