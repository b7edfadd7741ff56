//! Percentage rollout configuration for the optimized read path.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Validated rollout settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutConfig {
    pub feature_name: String,
    pub enabled: bool,
    /// Share of requests sent down the optimized path, 0-100.
    pub percentage: u8,
}

impl RolloutConfig {
    pub fn new(
        feature_name: impl Into<String>,
        enabled: bool,
        percentage: u8,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            feature_name: feature_name.into(),
            enabled,
            percentage,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rollout that routes everything through the legacy path.
    pub fn disabled(feature_name: impl Into<String>) -> Self {
        Self {
            feature_name: feature_name.into(),
            enabled: false,
            percentage: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feature_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "feature_name".to_string(),
                value: self.feature_name.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.percentage > 100 {
            return Err(percentage_error(self.percentage as i64));
        }
        Ok(())
    }
}

/// Partial update from the control surface.
///
/// Percentage is signed so out-of-range input reaches validation instead of
/// failing deserialization with an opaque message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutUpdate {
    #[serde(default)]
    pub feature_name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub percentage: Option<i64>,
}

impl RolloutUpdate {
    /// Apply the update on top of `current`, rejecting invalid results.
    pub fn merged_into(&self, current: &RolloutConfig) -> Result<RolloutConfig, ConfigError> {
        let percentage = match self.percentage {
            Some(p) => u8::try_from(p)
                .ok()
                .filter(|p| *p <= 100)
                .ok_or_else(|| percentage_error(p))?,
            None => current.percentage,
        };
        RolloutConfig::new(
            self.feature_name
                .clone()
                .unwrap_or_else(|| current.feature_name.clone()),
            self.enabled.unwrap_or(current.enabled),
            percentage,
        )
    }
}

fn percentage_error(value: i64) -> ConfigError {
    ConfigError::InvalidValue {
        field: "percentage".to_string(),
        value: value.to_string(),
        reason: "must be between 0 and 100".to_string(),
    }
}
