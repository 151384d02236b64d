//! Configuration module for the resilience engine.
//!
//! Loads YAML with environment variable interpolation, fills every missing
//! field with its default and validates the result.
//!
//! # Usage
//!
//! ```rust,ignore
//! use resilience_engine::config::load_config;
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("custom/config.yaml"))?;
//!
//! println!("check interval: {}s", config.health.check_interval_secs);
//! ```

mod circuit_breaker;
mod health;
mod network;
mod observability;
mod persistence;
mod rate_limits;
mod retry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use circuit_breaker::{CircuitBreakerSection, CircuitBreakerSettings};
pub use health::{HealthSettings, TransactionsConfig};
pub use network::NetworkSettings;
pub use observability::{LoggingConfig, MetricsSettings, ObservabilityConfig};
pub use persistence::PersistenceConfig;
pub use rate_limits::{AdaptiveSettings, RateLimitsConfig, SchedulerSettings};
pub use retry::{RecoveryStrategyConfig, RetryConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure. Every section is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResilienceConfig {
    /// Retry defaults and recovery strategies.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Circuit breakers.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
    /// Rate limits.
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    /// Request scheduler.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Transaction retention.
    #[serde(default)]
    pub transactions: TransactionsConfig,
    /// Health monitor.
    #[serde(default)]
    pub health: HealthSettings,
    /// Network client.
    #[serde(default)]
    pub network: NetworkSettings,
    /// Journal and scratch directories.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<ResilienceConfig, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<ResilienceConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: ResilienceConfig = if interpolated.trim().is_empty() {
        ResilienceConfig::default()
    } else {
        serde_yaml_bw::from_str(&interpolated)?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration values.
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` naming the first offending field.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), ConfigError> {
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        return Err(invalid("retry.base_delay_ms must not exceed retry.max_delay_ms"));
    }

    let breakers = std::iter::once(("default", &config.circuit_breaker.default)).chain(
        config
            .circuit_breaker
            .services
            .iter()
            .map(|(name, settings)| (name.as_str(), settings)),
    );
    for (name, settings) in breakers {
        if settings.failure_threshold == 0 {
            return Err(invalid(format!(
                "circuit_breaker.{name}.failure_threshold must be positive"
            )));
        }
    }

    rate_limits::check_limits("default", &config.rate_limits.default).map_err(invalid)?;
    for (api, limits) in &config.rate_limits.apis {
        rate_limits::check_limits(&format!("apis.{api}"), limits).map_err(invalid)?;
    }

    let adaptive = &config.rate_limits.adaptive;
    let rate_range = 0.0..=1.0;
    if !rate_range.contains(&adaptive.degrade_below) || !rate_range.contains(&adaptive.recover_above) {
        return Err(invalid(
            "rate_limits.adaptive thresholds must be between 0.0 and 1.0",
        ));
    }
    if adaptive.degrade_below > adaptive.recover_above {
        return Err(invalid(
            "rate_limits.adaptive.degrade_below must not exceed recover_above",
        ));
    }
    if !(adaptive.degrade_factor > 0.0 && adaptive.degrade_factor < 1.0) {
        return Err(invalid(
            "rate_limits.adaptive.degrade_factor must be between 0.0 and 1.0 (exclusive)",
        ));
    }
    if adaptive.recover_factor < 1.0 {
        return Err(invalid("rate_limits.adaptive.recover_factor must be at least 1.0"));
    }

    if config.scheduler.max_attempts == 0 {
        return Err(invalid("scheduler.max_attempts must be positive"));
    }

    if config.health.check_interval_secs == 0 {
        return Err(invalid("health.check_interval_secs must be positive"));
    }
    if config.health.alert_threshold == 0 {
        return Err(invalid("health.alert_threshold must be positive"));
    }

    if config.network.timeout_secs == 0 {
        return Err(invalid("network.timeout_secs must be positive"));
    }
    if config.network.failure_threshold == 0 {
        return Err(invalid("network.failure_threshold must be positive"));
    }

    if config.transactions.cleanup_interval_secs == 0 {
        return Err(invalid("transactions.cleanup_interval_secs must be positive"));
    }

    let valid_formats = ["json", "pretty", "compact"];
    if !valid_formats.contains(&config.observability.logging.format.as_str()) {
        return Err(invalid(format!(
            "observability.logging.format must be one of: {valid_formats:?}"
        )));
    }

    let metrics = &config.observability.metrics;
    if metrics.enabled && metrics.socket_addr().is_err() {
        return Err(invalid(format!(
            "observability.metrics.listen_addr '{}' is not a socket address",
            metrics.listen_addr
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::resilience::WindowLimits;

    #[test]
    fn test_default_config() {
        let config = ResilienceConfig::default();

        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.circuit_breaker.default.failure_threshold, 5);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.health.alert_threshold, 2);
        assert_eq!(config.network.status_forcelist, vec![500, 502, 503, 504]);
        assert!(config.persistence.enabled);
        assert!(!config.observability.metrics.enabled);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_empty_config() {
        let config = match load_config_from_string("") {
            Ok(c) => c,
            Err(e) => panic!("should load empty config: {e}"),
        };
        assert_eq!(config.health.check_interval_secs, 30);
    }

    #[test]
    fn test_load_minimal_config() {
        let yaml = r"
health:
  check_interval_secs: 10
";

        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load minimal config: {e}"),
        };
        assert_eq!(config.health.check_interval_secs, 10);
        assert_eq!(config.health.settle_time_secs, 30); // Default value
    }

    #[test]
    fn test_env_var_with_default_when_missing() {
        // Use a variable name unlikely to exist
        let input = "level: ${RESILIENCE_CONFIG_TEST_NONEXISTENT_VAR:-debug}";
        let result = interpolate_env_vars(input);

        assert_eq!(result, "level: debug");
    }

    #[test]
    #[expect(clippy::literal_string_with_formatting_args)] // ${...} is env var syntax, not format args
    fn test_env_var_with_default_uses_existing() {
        // PATH should always exist
        let input = "path: ${PATH:-default}";
        let result = interpolate_env_vars(input);

        assert_ne!(result, "path: default");
        assert!(result.starts_with("path: "));
    }

    #[test]
    fn test_env_var_without_default_becomes_empty() {
        let input = "api_key: ${RESILIENCE_CONFIG_TEST_UNLIKELY_TO_EXIST}";
        let result = interpolate_env_vars(input);

        assert_eq!(result, "api_key: ");
    }

    #[test]
    fn test_validation_zero_failure_threshold() {
        let yaml = r"
circuit_breaker:
  services:
    market_data:
      failure_threshold: 0
";

        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for zero threshold");
        };
        assert!(err.to_string().contains("market_data.failure_threshold"));
    }

    #[test]
    fn test_validation_unordered_limits() {
        let yaml = r"
rate_limits:
  apis:
    broker_api:
      per_minute: 500
      per_hour: 100
";

        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for unordered limits");
        };
        assert!(err.to_string().contains("apis.broker_api"));
    }

    #[test]
    fn test_validation_invalid_log_format() {
        let yaml = r"
observability:
  logging:
    format: xml
";

        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for invalid format");
        };
        assert!(err.to_string().contains("format"));
    }

    #[test]
    fn test_validation_bad_metrics_addr() {
        let yaml = r"
observability:
  metrics:
    enabled: true
    listen_addr: not-an-address
";

        assert!(load_config_from_string(yaml).is_err());
    }

    #[test]
    fn test_full_config_parse() {
        let yaml = r#"
retry:
  max_retries: 5
  base_delay_ms: 500
  jitter: false
  recovery:
    rate_limit_pause_secs: 30

circuit_breaker:
  default:
    failure_threshold: 3
    recovery_timeout_secs: 20
  services:
    market_data:
      failure_threshold: 2

rate_limits:
  default:
    per_minute: 30
    per_hour: 600
    per_day: 5000
  apis:
    broker_api:
      per_minute: 120
      per_hour: 6000
      per_day: 100000
  adaptive:
    enabled: false

scheduler:
  max_attempts: 5

health:
  check_interval_secs: 15
  alert_threshold: 3
  connectivity_urls:
    - "https://example.com/health"

network:
  timeout_secs: 5
  status_forcelist: [502, 503]

persistence:
  log_dir: "${RESILIENCE_CONFIG_TEST_LOG_DIR:-/var/log/desk}"

observability:
  logging:
    level: "debug"
    format: "pretty"
  metrics:
    enabled: true
    listen_addr: "127.0.0.1:9100"
"#;

        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load full config: {e}"),
        };

        let policy = config.retry.to_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert!(!policy.jitter);
        assert_eq!(config.retry.recovery.rate_limit_pause_secs, 30);

        let overrides = config.circuit_breaker.overrides();
        assert_eq!(overrides["market_data"].failure_threshold, 2);
        assert_eq!(overrides["market_data"].recovery_timeout, Duration::from_secs(60));
        assert_eq!(
            config.circuit_breaker.default.to_resilience_config().recovery_timeout,
            Duration::from_secs(20)
        );

        assert_eq!(config.rate_limits.default, WindowLimits::new(30, 600, 5000));
        assert_eq!(config.rate_limits.apis["broker_api"].per_minute, 120);
        assert!(!config.rate_limits.adaptive.enabled);
        assert!((config.rate_limits.adaptive.degrade_factor - 0.8).abs() < f64::EPSILON);

        assert_eq!(config.scheduler.max_attempts, 5);
        assert_eq!(config.health.to_health_config().check_interval, Duration::from_secs(15));
        assert_eq!(config.health.connectivity_urls.len(), 1);

        let network = config.network.to_network_config();
        assert_eq!(network.timeout, Duration::from_secs(5));
        assert_eq!(network.status_forcelist, vec![502, 503]);

        assert_eq!(config.persistence.log_dir, std::path::PathBuf::from("/var/log/desk"));
        assert_eq!(
            config.persistence.recovery_dir(),
            std::path::PathBuf::from("/var/log/desk/recovery")
        );
        assert_eq!(config.observability.logging.format, "pretty");
        assert!(config.observability.metrics.to_metrics_config().is_some());
    }
}
