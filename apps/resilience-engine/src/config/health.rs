//! Health monitor and transaction housekeeping configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::observability::default_true;
use crate::health::HealthConfig;

/// Health monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Time between cycles (seconds).
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Run recovery plans automatically.
    #[serde(default = "default_true")]
    pub auto_recovery: bool,
    /// Consecutive unhealthy cycles before recovery.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u32,
    /// Wait after recovery before re-checking (seconds).
    #[serde(default = "default_settle_time")]
    pub settle_time_secs: u64,
    /// Endpoints probed by `network_connectivity`. Empty uses the client's
    /// request success rate.
    #[serde(default)]
    pub connectivity_urls: Vec<String>,
    /// Register the builtin checks, actions and plans.
    #[serde(default = "default_true")]
    pub builtin_checks: bool,
    /// Include the CPU, memory, disk and process checks in the builtins.
    #[serde(default = "default_true")]
    pub host_metrics: bool,
    /// Any path on the disk watched by `disk_space`.
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            auto_recovery: true,
            alert_threshold: default_alert_threshold(),
            settle_time_secs: default_settle_time(),
            connectivity_urls: Vec::new(),
            builtin_checks: true,
            host_metrics: true,
            disk_path: default_disk_path(),
        }
    }
}

impl HealthSettings {
    /// Convert to the manager's configuration.
    #[must_use]
    pub const fn to_health_config(&self) -> HealthConfig {
        HealthConfig {
            check_interval: Duration::from_secs(self.check_interval_secs),
            auto_recovery: self.auto_recovery,
            alert_threshold: self.alert_threshold,
            settle_time: Duration::from_secs(self.settle_time_secs),
        }
    }
}

/// Transaction retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsConfig {
    /// Finished transactions older than this are dropped (seconds).
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    /// How often retention runs (seconds).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl TransactionsConfig {
    /// Retention as a duration.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Cleanup interval as a duration.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

const fn default_check_interval() -> u64 {
    30
}

const fn default_alert_threshold() -> u32 {
    2
}

const fn default_settle_time() -> u64 {
    30
}

fn default_disk_path() -> PathBuf {
    PathBuf::from(".")
}

const fn default_retention() -> u64 {
    24 * 3600
}

const fn default_cleanup_interval() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_defaults_match_manager() {
        assert_eq!(HealthSettings::default().to_health_config(), HealthConfig::default());
    }

    #[test]
    fn test_host_metrics_on_by_default() {
        let settings: HealthSettings = serde_yaml_bw::from_str("alert_threshold: 3").expect("parse");
        assert!(settings.host_metrics);
        assert_eq!(settings.disk_path, PathBuf::from("."));

        let settings: HealthSettings =
            serde_yaml_bw::from_str("host_metrics: false\ndisk_path: /var/lib/resilience").expect("parse");
        assert!(!settings.host_metrics);
        assert_eq!(settings.disk_path, PathBuf::from("/var/lib/resilience"));
    }

    #[test]
    fn test_transactions_retention() {
        let config = TransactionsConfig::default();
        assert_eq!(config.retention(), Duration::from_secs(86_400));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(3600));
    }
}
