//! Recovery strategies consulted after retries are exhausted.
//!
//! A strategy is keyed by [`ErrorKind`]. When it resolves a failure it
//! supplies a substitute JSON value that the retry engine deserializes into
//! the caller's result type. Builtin strategies:
//!
//! | Kind | Strategy | Resolves with |
//! |------|----------|---------------|
//! | `network_error` | TCP connectivity probe | `null` when reachable |
//! | `api_error`, `rate_limit_exceeded` | pause on rate limiting | `null` after the pause |
//! | `trading_error` | trading safeguard | `{"trading_halted": true}` or `{"position_cleaned": true}` |
//! | `system_error` | temp directory cleanup | `null` once cleaned |
//!
//! Strategy dispatch is throttled: a strategy never runs within
//! `cooldown` of the previous strategy run of any kind.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::error::{ErrorKind, ResilienceError};
use crate::observability;

/// Result of a recovery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// The failure was handled; `value` replaces the failed result.
    Resolved {
        /// Name of the action taken.
        action: String,
        /// Substitute value.
        value: Value,
    },
    /// The failure stands.
    Unresolved {
        /// Why recovery did not resolve it.
        reason: String,
    },
}

impl RecoveryOutcome {
    /// Resolved with a `null` value.
    pub fn resolved(action: impl Into<String>) -> Self {
        Self::Resolved {
            action: action.into(),
            value: Value::Null,
        }
    }

    /// Not resolved.
    pub fn unresolved(reason: impl Into<String>) -> Self {
        Self::Unresolved {
            reason: reason.into(),
        }
    }

    /// Whether the failure was resolved.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

/// Handler for one error kind.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Strategy name, recorded on resolved error records.
    fn name(&self) -> &str;

    /// Try to recover from `error` raised by `origin`.
    async fn recover(&self, error: &ResilienceError, origin: &str) -> RecoveryOutcome;
}

/// Tunables for the builtin strategies.
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    /// Minimum time between two strategy runs of any kind.
    pub cooldown: Duration,
    /// Pause applied when an API signals rate limiting without a wait hint.
    pub rate_limit_pause: Duration,
    /// `host:port` probed by the connectivity strategy.
    pub probe_address: String,
    /// Connect timeout for the probe.
    pub probe_timeout: Duration,
    /// Directory emptied by the system strategy.
    pub temp_dir: PathBuf,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30),
            rate_limit_pause: Duration::from_secs(60),
            probe_address: "8.8.8.8:53".to_string(),
            probe_timeout: Duration::from_secs(3),
            temp_dir: std::env::temp_dir().join("resilience-engine"),
        }
    }
}

/// Registry of recovery strategies keyed by error kind.
pub struct RecoveryRegistry {
    strategies: RwLock<HashMap<ErrorKind, Arc<dyn RecoveryStrategy>>>,
    cooldown: Duration,
    last_run: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for RecoveryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryRegistry")
            .field("kinds", &self.kinds())
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl RecoveryRegistry {
    /// Registry without any strategy.
    #[must_use]
    pub fn empty(cooldown: Duration) -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            cooldown,
            last_run: Mutex::new(None),
        }
    }

    /// Registry with the builtin strategies.
    #[must_use]
    pub fn with_defaults(settings: &RecoverySettings) -> Self {
        let registry = Self::empty(settings.cooldown);
        for kind in ErrorKind::ALL {
            if let Some(strategy) = default_strategy(kind, settings) {
                registry.register(kind, strategy);
            }
        }
        registry
    }

    /// Register or replace the strategy for `kind`.
    pub fn register(&self, kind: ErrorKind, strategy: Arc<dyn RecoveryStrategy>) {
        tracing::debug!(kind = %kind, strategy = strategy.name(), "Recovery strategy registered");
        self.strategies.write().insert(kind, strategy);
    }

    /// Strategy registered for `kind`.
    #[must_use]
    pub fn get(&self, kind: ErrorKind) -> Option<Arc<dyn RecoveryStrategy>> {
        self.strategies.read().get(&kind).cloned()
    }

    /// Kinds with a registered strategy, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<ErrorKind> {
        let mut kinds: Vec<ErrorKind> = self.strategies.read().keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Run the strategy for `error`, if one is registered and not throttled.
    ///
    /// Returns `None` when no strategy ran.
    pub async fn attempt(&self, error: &ResilienceError, origin: &str) -> Option<RecoveryOutcome> {
        let kind = error.kind();
        let strategy = self.get(kind)?;

        {
            let mut last_run = self.last_run.lock();
            let now = Instant::now();
            if let Some(last) = *last_run
                && now.saturating_duration_since(last) < self.cooldown
            {
                tracing::debug!(
                    kind = %kind,
                    origin = origin,
                    "Skipping recovery, previous run too recent"
                );
                return None;
            }
            *last_run = Some(now);
        }

        let outcome = strategy.recover(error, origin).await;
        observability::record_recovery_strategy(kind.as_str(), outcome.is_resolved());
        match &outcome {
            RecoveryOutcome::Resolved { action, .. } => tracing::info!(
                kind = %kind,
                origin = origin,
                action = %action,
                "Recovery strategy resolved failure"
            ),
            RecoveryOutcome::Unresolved { reason } => tracing::warn!(
                kind = %kind,
                origin = origin,
                reason = %reason,
                "Recovery strategy did not resolve failure"
            ),
        }
        Some(outcome)
    }
}

/// Builtin strategy for each kind.
fn default_strategy(kind: ErrorKind, settings: &RecoverySettings) -> Option<Arc<dyn RecoveryStrategy>> {
    match kind {
        ErrorKind::Network => Some(Arc::new(ConnectivityProbe::new(
            settings.probe_address.clone(),
            settings.probe_timeout,
        ))),
        ErrorKind::Api | ErrorKind::RateLimitExceeded => {
            Some(Arc::new(RateLimitPause::new(settings.rate_limit_pause)))
        }
        ErrorKind::Trading => Some(Arc::new(TradingSafeguard)),
        ErrorKind::System => Some(Arc::new(TempDirCleanup::new(settings.temp_dir.clone()))),
        ErrorKind::Data
        | ErrorKind::CircuitOpen
        | ErrorKind::TransactionStep
        | ErrorKind::RecoveryAction
        | ErrorKind::HealthCheck
        | ErrorKind::NotFound
        | ErrorKind::InvalidState
        | ErrorKind::Persistence => None,
    }
}

// ============================================================================
// Builtin strategies
// ============================================================================

/// Probes a TCP endpoint; resolves when it is reachable again.
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    address: String,
    timeout: Duration,
}

impl ConnectivityProbe {
    /// Probe `address` (`host:port`) with a connect timeout.
    #[must_use]
    pub const fn new(address: String, timeout: Duration) -> Self {
        Self { address, timeout }
    }
}

#[async_trait]
impl RecoveryStrategy for ConnectivityProbe {
    fn name(&self) -> &str {
        "connectivity_probe"
    }

    async fn recover(&self, _error: &ResilienceError, _origin: &str) -> RecoveryOutcome {
        match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => RecoveryOutcome::resolved(self.name()),
            Ok(Err(e)) => RecoveryOutcome::unresolved(format!("{} unreachable: {e}", self.address)),
            Err(_) => RecoveryOutcome::unresolved(format!("{} probe timed out", self.address)),
        }
    }
}

/// Waits out API rate limiting; never resolves authentication failures.
#[derive(Debug, Clone)]
pub struct RateLimitPause {
    pause: Duration,
}

impl RateLimitPause {
    /// Pause for `pause` when no wait hint is available.
    #[must_use]
    pub const fn new(pause: Duration) -> Self {
        Self { pause }
    }
}

const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests", "429"];
const AUTH_MARKERS: &[&str] = &["unauthorized", "forbidden", "authentication", "401", "403"];

#[async_trait]
impl RecoveryStrategy for RateLimitPause {
    fn name(&self) -> &str {
        "rate_limit_pause"
    }

    async fn recover(&self, error: &ResilienceError, _origin: &str) -> RecoveryOutcome {
        let message = error.normalized_message();

        if AUTH_MARKERS.iter().any(|m| message.contains(m)) {
            return RecoveryOutcome::unresolved("authentication failure needs new credentials");
        }

        let rate_limited = error.kind() == ErrorKind::RateLimitExceeded
            || RATE_LIMIT_MARKERS.iter().any(|m| message.contains(m));
        if !rate_limited {
            return RecoveryOutcome::unresolved("no automatic recovery for this API error");
        }

        let pause = error.wait_hint().unwrap_or(self.pause);
        tracing::info!(pause_secs = pause.as_secs_f64(), "Pausing for API rate limit");
        tokio::time::sleep(pause).await;
        RecoveryOutcome::resolved(self.name())
    }
}

/// Halts trading on balance problems and flags position cleanup.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradingSafeguard;

#[async_trait]
impl RecoveryStrategy for TradingSafeguard {
    fn name(&self) -> &str {
        "trading_safeguard"
    }

    async fn recover(&self, error: &ResilienceError, origin: &str) -> RecoveryOutcome {
        let message = error.normalized_message();

        if message.contains("insufficient") || message.contains("balance") {
            tracing::warn!(origin = origin, "Insufficient balance, halting trading");
            RecoveryOutcome::Resolved {
                action: "halt_trading".to_string(),
                value: json!({ "trading_halted": true }),
            }
        } else if message.contains("position") {
            tracing::warn!(origin = origin, "Position error, cleaning up positions");
            RecoveryOutcome::Resolved {
                action: "clean_positions".to_string(),
                value: json!({ "position_cleaned": true }),
            }
        } else {
            RecoveryOutcome::unresolved("no automatic recovery for this trading error")
        }
    }
}

/// Removes and recreates the application temp directory.
#[derive(Debug, Clone)]
pub struct TempDirCleanup {
    dir: PathBuf,
}

impl TempDirCleanup {
    /// Clean `dir`.
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl RecoveryStrategy for TempDirCleanup {
    fn name(&self) -> &str {
        "temp_dir_cleanup"
    }

    async fn recover(&self, _error: &ResilienceError, _origin: &str) -> RecoveryOutcome {
        if self.dir.exists()
            && let Err(e) = tokio::fs::remove_dir_all(&self.dir).await
        {
            return RecoveryOutcome::unresolved(format!("remove '{}': {e}", self.dir.display()));
        }
        match tokio::fs::create_dir_all(&self.dir).await {
            Ok(()) => RecoveryOutcome::resolved(self.name()),
            Err(e) => RecoveryOutcome::unresolved(format!("create '{}': {e}", self.dir.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkFailure;

    fn settings(temp_dir: PathBuf) -> RecoverySettings {
        RecoverySettings {
            cooldown: Duration::ZERO,
            temp_dir,
            ..RecoverySettings::default()
        }
    }

    #[test]
    fn test_default_registry_kinds() {
        let registry = RecoveryRegistry::with_defaults(&RecoverySettings::default());
        assert_eq!(
            registry.kinds(),
            vec![
                ErrorKind::Network,
                ErrorKind::Api,
                ErrorKind::RateLimitExceeded,
                ErrorKind::Trading,
                ErrorKind::System
            ]
        );
        assert!(registry.get(ErrorKind::Data).is_none());
    }

    #[tokio::test]
    async fn test_trading_balance_halts() {
        let outcome = TradingSafeguard
            .recover(&ResilienceError::trading("Insufficient balance"), "buy")
            .await;
        assert_eq!(
            outcome,
            RecoveryOutcome::Resolved {
                action: "halt_trading".into(),
                value: json!({ "trading_halted": true })
            }
        );
    }

    #[tokio::test]
    async fn test_trading_position_cleans() {
        let outcome = TradingSafeguard
            .recover(&ResilienceError::trading("position mismatch"), "sell")
            .await;
        assert!(matches!(
            outcome,
            RecoveryOutcome::Resolved { ref value, .. } if value["position_cleaned"] == json!(true)
        ));
    }

    #[tokio::test]
    async fn test_trading_unknown_unresolved() {
        let outcome = TradingSafeguard
            .recover(&ResilienceError::trading("market closed"), "buy")
            .await;
        assert!(!outcome.is_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_pause_uses_hint() {
        let strategy = RateLimitPause::new(Duration::from_secs(60));
        let err = ResilienceError::RateLimitExceeded {
            api: "github_api".into(),
            wait: Duration::from_secs(5),
        };
        let start = Instant::now();
        let outcome = strategy.recover(&err, "fetch").await;
        assert!(outcome.is_resolved());
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_pause_from_message() {
        let strategy = RateLimitPause::new(Duration::from_secs(60));
        let start = Instant::now();
        let outcome = strategy
            .recover(&ResilienceError::api("429 Too Many Requests"), "fetch")
            .await;
        assert!(outcome.is_resolved());
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_auth_failure_not_resolved() {
        let strategy = RateLimitPause::new(Duration::from_secs(60));
        let outcome = strategy
            .recover(&ResilienceError::api("401 Unauthorized"), "fetch")
            .await;
        assert!(!outcome.is_resolved());
    }

    #[tokio::test]
    async fn test_temp_dir_cleanup_recreates_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("tmp");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stale.bin"), b"x").unwrap();

        let outcome = TempDirCleanup::new(dir.clone())
            .recover(&ResilienceError::system("disk full"), "writer")
            .await;
        assert!(outcome.is_resolved());
        assert!(dir.exists());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_connectivity_probe_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let probe = ConnectivityProbe::new(addr, Duration::from_secs(1));
        let err = ResilienceError::network(NetworkFailure::ConnectionRefused, "refused");
        assert!(probe.recover(&err, "fetch").await.is_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_throttled_by_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RecoveryRegistry::with_defaults(&RecoverySettings {
            cooldown: Duration::from_secs(30),
            ..settings(dir.path().join("tmp"))
        });
        let err = ResilienceError::trading("insufficient balance");

        assert!(registry.attempt(&err, "buy").await.is_some());
        assert!(registry.attempt(&err, "buy").await.is_none());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(registry.attempt(&err, "buy").await.is_some());
    }

    #[tokio::test]
    async fn test_attempt_without_strategy() {
        let registry = RecoveryRegistry::with_defaults(&settings(std::env::temp_dir()));
        assert!(registry.attempt(&ResilienceError::data("bad json"), "parse").await.is_none());
    }

    #[tokio::test]
    async fn test_register_replaces_strategy() {
        struct Always;

        #[async_trait]
        impl RecoveryStrategy for Always {
            fn name(&self) -> &str {
                "always"
            }

            async fn recover(&self, _error: &ResilienceError, _origin: &str) -> RecoveryOutcome {
                RecoveryOutcome::Resolved {
                    action: "always".into(),
                    value: json!(42),
                }
            }
        }

        let registry = RecoveryRegistry::empty(Duration::ZERO);
        registry.register(ErrorKind::Data, Arc::new(Always));
        let outcome = registry.attempt(&ResilienceError::data("x"), "parse").await;
        assert!(matches!(outcome, Some(RecoveryOutcome::Resolved { value, .. }) if value == json!(42)));
    }
}
