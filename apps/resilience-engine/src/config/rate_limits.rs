//! Rate limiter and scheduler configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::observability::default_true;
use crate::resilience::{AdaptiveConfig, SchedulerConfig, WindowLimits};

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitsConfig {
    /// Limits for APIs without a configured or builtin profile.
    #[serde(default)]
    pub default: WindowLimits,
    /// Per-API limits, taking precedence over builtin profiles.
    #[serde(default)]
    pub apis: HashMap<String, WindowLimits>,
    /// Adaptive limit tuning.
    #[serde(default)]
    pub adaptive: AdaptiveSettings,
}

/// Adaptive tuning driven by recent success rates (fractions in `0..=1`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveSettings {
    /// Enable adaptation.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Shrink limits below this success rate.
    #[serde(default = "default_degrade_below")]
    pub degrade_below: f64,
    /// Grow the minute limit above this success rate.
    #[serde(default = "default_recover_above")]
    pub recover_above: f64,
    /// Requests required before growing.
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
    /// Multiplier when shrinking.
    #[serde(default = "default_degrade_factor")]
    pub degrade_factor: f64,
    /// Multiplier when growing.
    #[serde(default = "default_recover_factor")]
    pub recover_factor: f64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            degrade_below: default_degrade_below(),
            recover_above: default_recover_above(),
            min_samples: default_min_samples(),
            degrade_factor: default_degrade_factor(),
            recover_factor: default_recover_factor(),
        }
    }
}

impl AdaptiveSettings {
    /// Convert to the limiter's adaptive configuration.
    #[must_use]
    pub const fn to_adaptive_config(&self) -> AdaptiveConfig {
        AdaptiveConfig {
            enabled: self.enabled,
            degrade_below: self.degrade_below,
            recover_above: self.recover_above,
            min_samples: self.min_samples,
            degrade_factor: self.degrade_factor,
            recover_factor: self.recover_factor,
        }
    }
}

/// Request scheduler configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Executions before a failing request is dropped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pending requests listed in queue status.
    #[serde(default = "default_status_preview")]
    pub status_preview: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            status_preview: default_status_preview(),
        }
    }
}

impl SchedulerSettings {
    /// Convert to the scheduler's configuration.
    #[must_use]
    pub const fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_attempts: self.max_attempts,
            status_preview: self.status_preview,
        }
    }
}

/// Check one set of window limits.
pub(crate) fn check_limits(name: &str, limits: &WindowLimits) -> Result<(), String> {
    if limits.per_minute == 0 {
        return Err(format!("rate_limits.{name}.per_minute must be positive"));
    }
    if limits.per_minute > limits.per_hour || limits.per_hour > limits.per_day {
        return Err(format!(
            "rate_limits.{name} must satisfy per_minute <= per_hour <= per_day"
        ));
    }
    Ok(())
}

const fn default_degrade_below() -> f64 {
    0.95
}

const fn default_recover_above() -> f64 {
    0.98
}

const fn default_min_samples() -> u64 {
    100
}

const fn default_degrade_factor() -> f64 {
    0.8
}

const fn default_recover_factor() -> f64 {
    1.1
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_status_preview() -> usize {
    10
}
