//! Network client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::network::NetworkConfig;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Network client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Per-request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Timeout for each connectivity probe (seconds).
    #[serde(default = "default_connectivity_timeout")]
    pub connectivity_timeout_secs: u64,
    /// User-Agent header; defaults to the crate name and version.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Statuses treated as transient failures.
    #[serde(default = "default_status_forcelist")]
    pub status_forcelist: Vec<u16>,
    /// Endpoints probed by connectivity checks.
    #[serde(default = "default_health_check_urls")]
    pub health_check_urls: Vec<String>,
    /// Retries per request.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Consecutive failures that open the request breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Open-circuit duration (seconds).
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            connectivity_timeout_secs: default_connectivity_timeout(),
            user_agent: None,
            status_forcelist: default_status_forcelist(),
            health_check_urls: default_health_check_urls(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
        }
    }
}

impl NetworkSettings {
    /// Convert to the client's configuration.
    #[must_use]
    pub fn to_network_config(&self) -> NetworkConfig {
        let defaults = NetworkConfig::default();
        NetworkConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            connectivity_timeout: Duration::from_secs(self.connectivity_timeout_secs),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            status_forcelist: self.status_forcelist.clone(),
            health_check_urls: self.health_check_urls.clone(),
            retry: RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms)),
            breaker: CircuitBreakerConfig::new(
                self.failure_threshold,
                Duration::from_secs(self.recovery_timeout_secs),
            ),
        }
    }
}

const fn default_timeout() -> u64 {
    30
}

const fn default_connectivity_timeout() -> u64 {
    10
}

fn default_status_forcelist() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

fn default_health_check_urls() -> Vec<String> {
    NetworkConfig::default().health_check_urls
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    2000
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout() -> u64 {
    60
}
