//! Circuit breaker for named services.
//!
//! Stops hammering a service that keeps failing and probes it again after a
//! cool-off.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (consecutive failures >= threshold)
//! OPEN → HALF_OPEN (recovery timeout elapsed since last failure, on next call)
//! HALF_OPEN → CLOSED (the single trial call succeeds)
//! HALF_OPEN → OPEN (the single trial call fails)
//! ```
//!
//! `failure_count` is only reset by a successful call while CLOSED or
//! HALF_OPEN. While HALF_OPEN exactly one trial call is in flight; other
//! callers fail fast until it completes.
//!
//! # Example
//!
//! ```rust,ignore
//! use resilience_engine::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new("broker_api", CircuitBreakerConfig::default());
//! let balance = breaker.call(|| client.fetch_balance()).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{CallResult, ResilienceError};
use crate::observability;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Circuit is closed, calls flow normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit is admitting one trial call.
    HalfOpen,
}

impl CircuitBreakerState {
    /// Numeric value published on the state gauge.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => observability::circuit_breaker_state::CLOSED,
            Self::Open => observability::circuit_breaker_state::OPEN,
            Self::HalfOpen => observability::circuit_breaker_state::HALF_OPEN,
        }
    }
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is admitted.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
        }
    }

    /// Configuration for outbound HTTP requests made by the network client.
    #[must_use]
    pub const fn network_request() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }

    /// More sensitive configuration for market data feeds.
    #[must_use]
    pub const fn market_data() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// How a call was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal call while CLOSED.
    Normal,
    /// The single HALF_OPEN trial call.
    Trial,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

/// Circuit breaker for one named service.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Service name for logging.
    name: String,
    /// Configuration.
    config: CircuitBreakerConfig,
    /// Mutable state, one lock per breaker.
    inner: Mutex<BreakerInner>,
    /// Total admitted calls (for metrics).
    total_calls: AtomicU64,
    /// Total failures (for metrics).
    total_failures: AtomicU64,
    /// Calls rejected while open (for metrics).
    total_rejections: AtomicU64,
    /// State transitions (for metrics).
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                last_failure_at: None,
                trial_in_flight: false,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Get the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Get the current state.
    ///
    /// OPEN only moves to HALF_OPEN when a call is attempted.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    /// Get the consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Run `op` under the breaker.
    ///
    /// Fails fast with [`ResilienceError::CircuitOpen`] without invoking `op`
    /// when the circuit rejects the call.
    pub async fn call<T, F, Fut>(&self, op: F) -> CallResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let admission = self.try_acquire()?;
        let mut guard = TrialGuard {
            breaker: self,
            admission,
            settled: false,
        };

        let result = op().await;
        guard.settled = true;
        match &result {
            Ok(_) => self.record_success(admission),
            Err(_) => self.record_failure(admission),
        }
        result
    }

    /// Ask for permission to make a call.
    pub fn try_acquire(&self) -> CallResult<Admission> {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> CallResult<Admission> {
        let mut inner = self.inner.lock();
        let admission = match inner.state {
            CircuitBreakerState::Closed => Some(Admission::Normal),
            CircuitBreakerState::Open => {
                let cooled = inner.last_failure.is_none_or(|last| {
                    now.saturating_duration_since(last) > self.config.recovery_timeout
                });
                if cooled {
                    self.transition(&mut inner, CircuitBreakerState::HalfOpen);
                    inner.trial_in_flight = true;
                    Some(Admission::Trial)
                } else {
                    None
                }
            }
            CircuitBreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Admission::Trial)
                }
            }
        };
        drop(inner);

        if let Some(admission) = admission {
            self.total_calls.fetch_add(1, Ordering::Relaxed);
            Ok(admission)
        } else {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            observability::record_circuit_breaker_rejected(&self.name);
            tracing::debug!(name = %self.name, "Circuit breaker rejected call");
            Err(ResilienceError::CircuitOpen {
                service: self.name.clone(),
            })
        }
    }

    /// Record a successful call.
    ///
    /// Only the trial call closes a HALF_OPEN circuit. A normal call that
    /// was admitted while CLOSED and finishes after the circuit tripped is
    /// ignored.
    pub fn record_success(&self, admission: Admission) {
        observability::record_circuit_breaker_success(&self.name);

        let mut inner = self.inner.lock();
        match (inner.state, admission) {
            (CircuitBreakerState::HalfOpen, Admission::Trial) => {
                inner.failure_count = 0;
                inner.trial_in_flight = false;
                self.transition(&mut inner, CircuitBreakerState::Closed);
            }
            (CircuitBreakerState::Closed, _) => inner.failure_count = 0,
            (CircuitBreakerState::HalfOpen, Admission::Normal) | (CircuitBreakerState::Open, _) => {}
        }
    }

    /// Record a failed call.
    ///
    /// A HALF_OPEN circuit reopens only when the trial call fails.
    pub fn record_failure(&self, admission: Admission) {
        self.record_failure_at(Instant::now(), admission);
    }

    fn record_failure_at(&self, now: Instant, admission: Admission) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        observability::record_circuit_breaker_failure(&self.name);

        let mut inner = self.inner.lock();
        if inner.state == CircuitBreakerState::HalfOpen && admission == Admission::Normal {
            tracing::debug!(name = %self.name, "Late failure ignored while HALF_OPEN");
            return;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitBreakerState::HalfOpen => {
                inner.trial_in_flight = false;
                self.transition(&mut inner, CircuitBreakerState::Open);
            }
            CircuitBreakerState::Closed if inner.failure_count >= self.config.failure_threshold => {
                self.transition(&mut inner, CircuitBreakerState::Open);
            }
            CircuitBreakerState::Closed | CircuitBreakerState::Open => {}
        }
    }

    /// Release a trial slot whose call never reported an outcome.
    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitBreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitBreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
        observability::record_circuit_breaker_state(&self.name, to.gauge_value());

        match to {
            CircuitBreakerState::Open => tracing::warn!(
                name = %self.name,
                from = %from,
                to = "OPEN",
                failure_count = inner.failure_count,
                "Circuit breaker opened"
            ),
            CircuitBreakerState::HalfOpen => tracing::info!(
                name = %self.name,
                from = %from,
                to = "HALF_OPEN",
                "Circuit breaker testing"
            ),
            CircuitBreakerState::Closed => tracing::info!(
                name = %self.name,
                from = %from,
                to = "CLOSED",
                "Circuit breaker closed"
            ),
        }
    }

    /// Get metrics for this circuit breaker.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout: self.config.recovery_timeout,
            last_failure_time: inner.last_failure_at,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
        }
    }

    /// Force the circuit breaker to open (for testing or emergency).
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitBreakerState::Open);
    }

    /// Force the circuit breaker to close (for testing or recovery).
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitBreakerState::Closed);
    }
}

/// Frees the HALF_OPEN trial slot if the guarded future is dropped mid-call.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.abandon_trial();
        }
    }
}

/// Metrics for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Service name.
    pub name: String,
    /// Current state.
    pub state: CircuitBreakerState,
    /// Consecutive failures.
    pub failure_count: u32,
    /// Failures that open the circuit.
    pub failure_threshold: u32,
    /// Cool-off before a trial call.
    pub recovery_timeout: Duration,
    /// Wall-clock time of the last failure.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Total admitted calls.
    pub total_calls: u64,
    /// Total failures.
    pub total_failures: u64,
    /// Calls rejected while open.
    pub total_rejections: u64,
    /// Number of state transitions.
    pub state_transitions: u64,
}

/// Keyed registry of circuit breakers, one per service name.
///
/// Breakers are created lazily on first use and live for the registry's
/// lifetime.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry using `defaults` for unknown services.
    #[must_use]
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Set per-service configurations used when those breakers are created.
    #[must_use]
    pub fn with_overrides(mut self, overrides: HashMap<String, CircuitBreakerConfig>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Get the breaker for `service`, creating it with its configured settings.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        self.get_or_create(service, self.config_for(service))
    }

    /// Configured settings for `service`.
    #[must_use]
    pub fn config_for(&self, service: &str) -> CircuitBreakerConfig {
        self.overrides.get(service).copied().unwrap_or(self.defaults)
    }

    /// Get the breaker for `service`, creating it with `config` if absent.
    ///
    /// An existing breaker keeps the configuration it was created with.
    pub fn get_or_create(&self, service: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        Arc::clone(
            breakers
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(service, config))),
        )
    }

    /// Get an existing breaker.
    #[must_use]
    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().get(service).cloned()
    }

    /// Run `op` under the breaker for `service`.
    pub async fn guard<T, F, Fut>(
        &self,
        service: &str,
        config: CircuitBreakerConfig,
        op: F,
    ) -> CallResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let breaker = self.get_or_create(service, config);
        breaker.call(op).await
    }

    /// Metrics for every breaker, sorted by name.
    #[must_use]
    pub fn all_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let breakers: Vec<Arc<CircuitBreaker>> = self.breakers.lock().values().cloned().collect();
        let mut metrics: Vec<_> = breakers.iter().map(|b| b.metrics()).collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// Force every breaker closed. Returns how many were not already closed.
    pub fn reset_all(&self) -> usize {
        let breakers: Vec<Arc<CircuitBreaker>> = self.breakers.lock().values().cloned().collect();
        breakers
            .iter()
            .filter(|b| b.state() != CircuitBreakerState::Closed)
            .inspect(|b| b.force_close())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use proptest::prelude::*;

    use super::*;

    fn breaker(threshold: u32, timeout_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::new(threshold, Duration::from_secs(timeout_secs)),
        )
    }

    async fn failing(calls: &AtomicU32) -> CallResult<u32> {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(ResilienceError::api("boom"))
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_initial_state_is_closed() {
        let breaker = breaker(3, 60);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.try_acquire().unwrap(), Admission::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = breaker(3, 60);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let result = breaker.call(|| failing(&calls)).await;
            assert!(matches!(result, Err(ResilienceError::Api { .. })));
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        let result = breaker.call(|| failing(&calls)).await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes() {
        let breaker = breaker(2, 10);
        let calls = AtomicU32::new(0);
        for _ in 0..2 {
            let _ = breaker.call(|| failing(&calls)).await;
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;

        let result = breaker.call(|| async { Ok::<_, ResilienceError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens() {
        let breaker = breaker(1, 5);
        let calls = AtomicU32::new(0);
        let _ = breaker.call(|| failing(&calls)).await;
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        tokio::time::advance(Duration::from_secs(6)).await;
        let _ = breaker.call(|| failing(&calls)).await;
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The failed trial restarts the cool-off
        let result = breaker.call(|| failing(&calls)).await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_trial_in_half_open() {
        let breaker = breaker(1, 5);
        breaker.record_failure(Admission::Normal);
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(breaker.try_acquire().unwrap(), Admission::Trial);
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        assert!(matches!(
            breaker.try_acquire(),
            Err(ResilienceError::CircuitOpen { .. })
        ));

        breaker.record_success(Admission::Trial);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_normal_call_does_not_settle_trial() {
        let breaker = breaker(1, 5);
        let early = breaker.try_acquire().unwrap();
        assert_eq!(early, Admission::Normal);

        breaker.record_failure(Admission::Normal);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(breaker.try_acquire().unwrap(), Admission::Trial);

        // The call admitted while CLOSED finishes during the trial
        breaker.record_success(early);
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        breaker.record_failure(early);
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        assert!(breaker.try_acquire().is_err());

        breaker.record_success(Admission::Trial);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_frees_slot() {
        let breaker = breaker(1, 5);
        breaker.record_failure(Admission::Normal);
        tokio::time::advance(Duration::from_secs(6)).await;

        {
            let pending = breaker.call(|| std::future::pending::<CallResult<()>>());
            let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;
        }

        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        assert_eq!(breaker.try_acquire().unwrap(), Admission::Trial);
    }

    #[test]
    fn test_success_in_closed_resets_count() {
        let breaker = breaker(3, 60);
        breaker.record_failure(Admission::Normal);
        breaker.record_failure(Admission::Normal);
        assert_eq!(breaker.failure_count(), 2);
        breaker.record_success(Admission::Normal);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn test_recovery_timeout_not_elapsed_rejects() {
        let breaker = breaker(1, 60);
        let start = Instant::now();
        breaker.record_failure_at(start, Admission::Normal);
        assert!(breaker.try_acquire_at(start + Duration::from_secs(60)).is_err());
        assert_eq!(
            breaker.try_acquire_at(start + Duration::from_secs(61)).unwrap(),
            Admission::Trial
        );
    }

    #[test]
    fn test_metrics() {
        let breaker = breaker(5, 60);
        breaker.try_acquire().unwrap();
        breaker.record_success(Admission::Normal);
        breaker.try_acquire().unwrap();
        breaker.record_failure(Admission::Normal);

        let metrics = breaker.metrics();
        assert_eq!(metrics.name, "test");
        assert_eq!(metrics.total_calls, 2);
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.failure_count, 1);
        assert!(metrics.last_failure_time.is_some());
    }

    #[test]
    fn test_force_open_and_close() {
        let breaker = breaker(5, 60);
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        breaker.force_close();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.metrics().state_transitions, 2);
    }

    #[test]
    fn test_registry_creates_lazily_and_reuses() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        assert!(registry.get("broker").is_none());

        let first = registry.get_or_create("broker", CircuitBreakerConfig::new(2, Duration::from_secs(1)));
        let second = registry.get_or_create("broker", CircuitBreakerConfig::default());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().failure_threshold, 2);
    }

    #[test]
    fn test_registry_overrides_and_reset_all() {
        let mut overrides = HashMap::new();
        overrides.insert("feed".to_string(), CircuitBreakerConfig::market_data());
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default()).with_overrides(overrides);

        assert_eq!(registry.breaker("feed").config().failure_threshold, 3);
        assert_eq!(registry.breaker("other").config().failure_threshold, 5);

        registry.breaker("feed").force_open();
        assert_eq!(registry.reset_all(), 1);
        assert!(
            registry
                .all_metrics()
                .iter()
                .all(|m| m.state == CircuitBreakerState::Closed)
        );
    }

    proptest! {
        #[test]
        fn prop_opens_exactly_at_threshold(threshold in 1u32..20, failures in 0u32..40) {
            let breaker = breaker(threshold, 60);
            for _ in 0..failures {
                breaker.record_failure(Admission::Normal);
            }
            let expected = if failures >= threshold {
                CircuitBreakerState::Open
            } else {
                CircuitBreakerState::Closed
            };
            prop_assert_eq!(breaker.state(), expected);
            prop_assert_eq!(breaker.failure_count(), failures);
        }
    }
}
