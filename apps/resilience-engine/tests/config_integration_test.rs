//! Integration tests for loading a configuration file and wiring the layer.

use std::io::Write;
use std::time::Duration;

use resilience_engine::config::validate_config;
use resilience_engine::{ConfigError, ResilienceLayer, load_config};

fn write_config(dir: &std::path::Path, yaml: &str) -> String {
    let path = dir.join("config.yaml");
    let mut file = std::fs::File::create(&path).expect("create config");
    file.write_all(yaml.as_bytes()).expect("write config");
    path.display().to_string()
}

#[test]
fn test_load_full_config_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        r"
retry:
  max_retries: 5
  base_delay_ms: 250
  jitter: false
circuit_breaker:
  default:
    failure_threshold: 4
  services:
    polygon_api:
      failure_threshold: 2
      recovery_timeout_secs: 15
rate_limits:
  apis:
    alpaca:
      per_minute: 200
      per_hour: 10000
      per_day: 100000
health:
  check_interval_secs: 10
  alert_threshold: 3
network:
  status_forcelist: [429, 502, 503]
",
    );

    let config = load_config(Some(&path)).expect("config");

    let policy = config.retry.to_policy();
    assert_eq!(policy.max_retries, 5);
    assert_eq!(policy.base_delay, Duration::from_millis(250));
    assert!(!policy.jitter);

    let overrides = config.circuit_breaker.overrides();
    assert_eq!(overrides["polygon_api"].failure_threshold, 2);
    assert_eq!(overrides["polygon_api"].recovery_timeout, Duration::from_secs(15));
    assert_eq!(config.circuit_breaker.default.failure_threshold, 4);

    assert_eq!(config.rate_limits.apis["alpaca"].per_minute, 200);
    assert_eq!(config.health.to_health_config().alert_threshold, 3);
    assert_eq!(config.network.to_network_config().status_forcelist, vec![429, 502, 503]);
    assert!(validate_config(&config).is_ok());
}

#[test]
fn test_missing_file_is_read_error() {
    let result = load_config(Some("/nonexistent/resilience.yaml"));
    assert!(matches!(result, Err(ConfigError::ReadError { .. })));
}

#[test]
fn test_invalid_values_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        r"
retry:
  base_delay_ms: 5000
  max_delay_ms: 1000
",
    );
    assert!(matches!(load_config(Some(&path)), Err(ConfigError::ValidationError(_))));
}

#[tokio::test]
async fn test_layer_uses_configured_overrides() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().display();
    let path = write_config(
        dir.path(),
        &format!(
            r"
circuit_breaker:
  services:
    polygon_api:
      failure_threshold: 2
rate_limits:
  apis:
    alpaca:
      per_minute: 200
      per_hour: 10000
      per_day: 100000
persistence:
  log_dir: {root}/logs
  temp_dir: {root}/temp
  cache_dirs: []
"
        ),
    );

    let layer = ResilienceLayer::new(load_config(Some(&path)).expect("config")).expect("layer");

    assert_eq!(layer.breakers().breaker("polygon_api").config().failure_threshold, 2);
    assert_eq!(layer.get_api_stats("alpaca").configured_limits.per_minute, 200);
    assert_eq!(layer.get_error_statistics().total_errors, 0);
}
