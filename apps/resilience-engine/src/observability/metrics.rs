//! Prometheus metrics for the resilience layer.
//!
//! Covers retries, circuit breakers, rate limiting, the request scheduler,
//! transactions and the health/recovery engine. Recording functions are
//! no-ops until a recorder is installed with [`init_metrics`].

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for latency measurements (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            // Latency buckets from 1ms to 60s
            latency_buckets: vec![
                0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration with custom address.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP server that exposes metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the metrics exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

// ============================================================================
// Error and Retry Metrics
// ============================================================================

/// Record a caught failure.
///
/// # Arguments
///
/// * `kind` - Error kind (e.g., `"network_error"`)
pub fn record_error(kind: &str) {
    counter!("resilience_errors_total", "kind" => kind.to_string()).increment(1);
}

/// Record a retry attempt about to sleep.
///
/// # Arguments
///
/// * `origin` - Function or component being retried
/// * `delay_seconds` - Backoff before the next attempt
pub fn record_retry_attempt(origin: &str, delay_seconds: f64) {
    counter!("retry_attempts_total", "origin" => origin.to_string()).increment(1);
    histogram!("retry_backoff_seconds", "origin" => origin.to_string()).record(delay_seconds);
}

/// Record a recovery strategy run after retries were exhausted.
///
/// # Arguments
///
/// * `kind` - Error kind the strategy handled
/// * `resolved` - Whether the strategy resolved the failure
pub fn record_recovery_strategy(kind: &str, resolved: bool) {
    counter!(
        "recovery_strategy_runs_total",
        "kind" => kind.to_string(),
        "resolved" => resolved.to_string()
    )
    .increment(1);
}

// ============================================================================
// Circuit Breaker Metrics
// ============================================================================

/// Circuit breaker state values for the gauge.
pub mod circuit_breaker_state {
    /// Circuit is closed (healthy).
    pub const CLOSED: f64 = 0.0;
    /// Circuit is open (failing).
    pub const OPEN: f64 = 1.0;
    /// Circuit is half-open (testing).
    pub const HALF_OPEN: f64 = 2.0;
}

/// Update circuit breaker state gauge.
///
/// # Arguments
///
/// * `service` - Service name
/// * `state` - Numeric state (0=closed, 1=open, 2=`half_open`)
pub fn record_circuit_breaker_state(service: &str, state: f64) {
    gauge!(
        "circuit_breaker_state",
        "service" => service.to_string()
    )
    .set(state);
}

/// Record a circuit breaker failure.
pub fn record_circuit_breaker_failure(service: &str) {
    counter!(
        "circuit_breaker_failures_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a circuit breaker success.
pub fn record_circuit_breaker_success(service: &str) {
    counter!(
        "circuit_breaker_success_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a circuit breaker rejection (call rejected due to open circuit).
pub fn record_circuit_breaker_rejected(service: &str) {
    counter!(
        "circuit_breaker_rejected_total",
        "service" => service.to_string()
    )
    .increment(1);
}

// ============================================================================
// Rate Limit Metrics
// ============================================================================

/// Record a rate-limit rejection.
///
/// # Arguments
///
/// * `api` - API name
/// * `wait_seconds` - Time until the violated window resets
pub fn record_rate_limit_rejected(api: &str, wait_seconds: f64) {
    counter!("rate_limit_rejected_total", "api" => api.to_string()).increment(1);
    histogram!("rate_limit_wait_seconds", "api" => api.to_string()).record(wait_seconds);
}

/// Update the adaptive per-minute limit gauge.
pub fn record_rate_limit_adjustment(api: &str, per_minute: u32) {
    gauge!("rate_limit_per_minute", "api" => api.to_string()).set(f64::from(per_minute));
}

/// Update the scheduler queue length gauge.
pub fn update_scheduler_queue(api: &str, length: usize) {
    gauge!("scheduler_queue_length", "api" => api.to_string()).set(length as f64);
}

/// Record a scheduled request that gave up after its final attempt.
pub fn record_scheduler_drop(api: &str) {
    counter!("scheduler_dropped_total", "api" => api.to_string()).increment(1);
}

// ============================================================================
// Transaction Metrics
// ============================================================================

/// Record a finished transaction.
///
/// # Arguments
///
/// * `transaction_type` - Transaction type (e.g., `"trade"`)
/// * `status` - Final status (e.g., `"COMPLETED"`, `"ROLLED_BACK"`)
/// * `duration_seconds` - Execution time in seconds
pub fn record_transaction(transaction_type: &str, status: &str, duration_seconds: f64) {
    counter!(
        "transactions_total",
        "type" => transaction_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "transaction_duration_seconds",
        "type" => transaction_type.to_string()
    )
    .record(duration_seconds);
}

/// Record a failed compensation.
pub fn record_rollback_failure(operation: &str) {
    counter!("rollback_failures_total", "operation" => operation.to_string()).increment(1);
}

// ============================================================================
// Health Metrics
// ============================================================================

/// Health status values for the gauge.
pub mod health_status {
    /// All checks healthy.
    pub const HEALTHY: f64 = 0.0;
    /// Degraded.
    pub const WARNING: f64 = 1.0;
    /// Severely degraded.
    pub const CRITICAL: f64 = 2.0;
    /// A check could not run.
    pub const FAILED: f64 = 3.0;
    /// Recovery in progress.
    pub const RECOVERING: f64 = 4.0;
}

/// Update the overall health gauge.
pub fn record_health_status(status: f64) {
    gauge!("system_health_status").set(status);
}

/// Record a health check reading.
pub fn record_health_check(check: &str, value: f64) {
    gauge!("health_check_value", "check" => check.to_string()).set(value);
}

/// Record a recovery plan execution.
pub fn record_recovery_plan(plan: &str, success: bool, duration_seconds: f64) {
    counter!(
        "recovery_plan_runs_total",
        "plan" => plan.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
    histogram!("recovery_plan_duration_seconds", "plan" => plan.to_string())
        .record(duration_seconds);
}

// ============================================================================
// Network Metrics
// ============================================================================

/// Record an outbound HTTP request.
///
/// # Arguments
///
/// * `method` - HTTP method
/// * `outcome` - `"success"` or `"failure"`
/// * `latency_seconds` - Request duration in seconds
pub fn record_http_request(method: &str, outcome: &str, latency_seconds: f64) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("http_request_duration_seconds", "method" => method.to_string())
        .record(latency_seconds);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert_eq!(config.listen_addr.port(), 9090);
        assert!(!config.latency_buckets.is_empty());
    }

    #[test]
    fn test_config_with_addr() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let config = MetricsConfig::with_addr(addr);
        assert_eq!(config.listen_addr.port(), 8080);
    }

    #[test]
    fn test_latency_buckets_sorted() {
        let config = MetricsConfig::default();
        assert!(config.latency_buckets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        // Actual metric recording requires an installed recorder
        record_error("network_error");
        record_retry_attempt("fetch", 1.0);
        record_recovery_strategy("network_error", true);
        record_circuit_breaker_state("broker", circuit_breaker_state::OPEN);
        record_rate_limit_rejected("github_api", 12.0);
        record_transaction("trade", "COMPLETED", 0.2);
        record_health_status(health_status::WARNING);
        record_recovery_plan("network_issue_recovery", true, 1.5);
        record_http_request("GET", "success", 0.05);
    }

    #[test]
    fn test_state_constants_distinct() {
        assert!((circuit_breaker_state::CLOSED - 0.0).abs() < f64::EPSILON);
        assert!((circuit_breaker_state::OPEN - 1.0).abs() < f64::EPSILON);
        assert!((circuit_breaker_state::HALF_OPEN - 2.0).abs() < f64::EPSILON);
        assert!(health_status::RECOVERING > health_status::FAILED);
    }
}
