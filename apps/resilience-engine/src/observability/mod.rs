//! Observability module for metrics.
//!
//! This module provides Prometheus instrumentation for the resilience layer.
//! Log output is configured separately in [`crate::telemetry`].

mod metrics;

pub use metrics::{
    MetricsConfig, MetricsError, circuit_breaker_state, health_status, init_metrics,
    record_circuit_breaker_failure, record_circuit_breaker_rejected, record_circuit_breaker_state,
    record_circuit_breaker_success, record_error, record_health_check, record_health_status,
    record_http_request, record_rate_limit_adjustment, record_rate_limit_rejected,
    record_recovery_plan, record_recovery_strategy, record_retry_attempt, record_rollback_failure,
    record_scheduler_drop, record_transaction, update_scheduler_queue,
};
