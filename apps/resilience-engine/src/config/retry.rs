//! Retry and recovery-strategy configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::observability::default_true;
use crate::resilience::{RecoverySettings, RetryPolicy};

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap for any retry delay (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Double the delay after every retry.
    #[serde(default = "default_true")]
    pub exponential: bool,
    /// Randomize delays.
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// Builtin recovery strategies.
    #[serde(default)]
    pub recovery: RecoveryStrategyConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential: true,
            jitter: true,
            recovery: RecoveryStrategyConfig::default(),
        }
    }
}

impl RetryConfig {
    /// Convert to the retry engine's default policy.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            exponential: self.exponential,
            jitter: self.jitter,
        }
    }
}

/// Builtin recovery strategy tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStrategyConfig {
    /// Minimum time between two strategy runs (seconds).
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Pause when an API reports rate limiting without a wait hint (seconds).
    #[serde(default = "default_rate_limit_pause_secs")]
    pub rate_limit_pause_secs: u64,
    /// `host:port` probed by the network strategy.
    #[serde(default = "default_probe_address")]
    pub probe_address: String,
    /// Connect timeout for the probe (milliseconds).
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for RecoveryStrategyConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            rate_limit_pause_secs: default_rate_limit_pause_secs(),
            probe_address: default_probe_address(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl RecoveryStrategyConfig {
    /// Convert to strategy settings; the system strategy cleans `temp_dir`.
    #[must_use]
    pub fn to_recovery_settings(&self, temp_dir: &Path) -> RecoverySettings {
        RecoverySettings {
            cooldown: Duration::from_secs(self.cooldown_secs),
            rate_limit_pause: Duration::from_secs(self.rate_limit_pause_secs),
            probe_address: self.probe_address.clone(),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            temp_dir: temp_dir.to_path_buf(),
        }
    }
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> u64 {
    60_000
}

const fn default_cooldown_secs() -> u64 {
    30
}

const fn default_rate_limit_pause_secs() -> u64 {
    60
}

fn default_probe_address() -> String {
    "8.8.8.8:53".to_string()
}

const fn default_probe_timeout_ms() -> u64 {
    3000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_defaults() {
        assert_eq!(RetryConfig::default().to_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_recovery_settings_use_temp_dir() {
        let settings = RecoveryStrategyConfig::default().to_recovery_settings(Path::new("/tmp/app"));
        assert_eq!(settings.temp_dir, Path::new("/tmp/app"));
        assert_eq!(settings.rate_limit_pause, Duration::from_secs(60));
        assert_eq!(settings.probe_timeout, Duration::from_secs(3));
    }
}
