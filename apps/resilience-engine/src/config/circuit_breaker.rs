//! Circuit breaker configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CircuitBreakerSection {
    /// Settings for services without an override.
    #[serde(default)]
    pub default: CircuitBreakerSettings,
    /// Per-service overrides.
    #[serde(default)]
    pub services: HashMap<String, CircuitBreakerSettings>,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call (seconds).
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Convert config settings to the resilience module's `CircuitBreakerConfig`.
    #[must_use]
    pub const fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig::new(
            self.failure_threshold,
            Duration::from_secs(self.recovery_timeout_secs),
        )
    }
}

impl CircuitBreakerSection {
    /// Per-service overrides in runtime form.
    #[must_use]
    pub fn overrides(&self) -> HashMap<String, crate::resilience::CircuitBreakerConfig> {
        self.services
            .iter()
            .map(|(service, settings)| (service.clone(), settings.to_resilience_config()))
            .collect()
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout() -> u64 {
    60
}
