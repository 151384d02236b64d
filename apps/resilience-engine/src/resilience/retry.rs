//! Retry with exponential backoff and jitter.
//!
//! An operation is invoked up to `max_retries + 1` times. The delay before
//! retry `i` (0-indexed) is `min(base_delay * 2^i, max_delay)` when
//! exponential, `min(base_delay, max_delay)` otherwise. Jitter multiplies
//! the delay by a uniform factor in `[0.5, 1.0]`.
//!
//! Every failed attempt is appended to the [`ErrorStore`]. Once attempts are
//! exhausted the [`RecoveryRegistry`] is consulted; a resolving strategy's
//! value is returned in place of the error.
//!
//! # Example
//!
//! ```rust,ignore
//! use resilience_engine::resilience::{RetryEngine, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(1));
//! let quote = engine.retry("fetch_quote", &policy, || client.quote("BTC")).await?;
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::recovery::{RecoveryOutcome, RecoveryRegistry};
use crate::error::{CallResult, ResilienceError};
use crate::error_store::ErrorStore;
use crate::observability;

/// Retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 3).
    pub max_retries: u32,
    /// Delay before the first retry (default: 1s).
    pub base_delay: Duration,
    /// Upper bound for any delay (default: 60s).
    pub max_delay: Duration,
    /// Double the delay on every retry (default: true).
    pub exponential: bool,
    /// Randomize delays into `[0.5, 1.0]` of their value (default: true).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential: true,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default cap, exponential growth and jitter.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(60),
            exponential: true,
            jitter: true,
        }
    }

    /// Same policy without jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Same policy with a constant delay.
    #[must_use]
    pub const fn fixed(mut self) -> Self {
        self.exponential = false;
        self
    }

    /// Same policy with a different cap.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Total invocations the policy allows.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `retry_index` without jitter.
    #[must_use]
    pub fn base_delay_for(&self, retry_index: u32) -> Duration {
        let delay = if self.exponential {
            let factor = 2u32.checked_pow(retry_index).unwrap_or(u32::MAX);
            self.base_delay.saturating_mul(factor)
        } else {
            self.base_delay
        };
        delay.min(self.max_delay)
    }

    /// Delay before retry `retry_index`, jittered when enabled.
    #[must_use]
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let delay = self.base_delay_for(retry_index);
        if self.jitter { apply_jitter(delay) } else { delay }
    }
}

/// Scale `delay` by a uniform factor in `[0.5, 1.0]`.
#[must_use]
pub fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let factor: f64 = rng.random_range(0.5..=1.0);
    delay.mul_f64(factor)
}

/// Runs operations under a retry policy and falls back to recovery strategies.
#[derive(Debug, Clone)]
pub struct RetryEngine {
    store: Arc<ErrorStore>,
    recovery: Arc<RecoveryRegistry>,
}

impl RetryEngine {
    /// Create an engine recording into `store` and recovering via `recovery`.
    #[must_use]
    pub const fn new(store: Arc<ErrorStore>, recovery: Arc<RecoveryRegistry>) -> Self {
        Self { store, recovery }
    }

    /// The error store failures are recorded into.
    #[must_use]
    pub fn store(&self) -> &Arc<ErrorStore> {
        &self.store
    }

    /// The recovery strategy registry.
    #[must_use]
    pub fn recovery(&self) -> &Arc<RecoveryRegistry> {
        &self.recovery
    }

    /// Invoke `op` under `policy`.
    ///
    /// `origin` names the function or component for error records. The
    /// backoff sleeps on the calling task.
    pub async fn retry<T, F, Fut>(&self, origin: &str, policy: &RetryPolicy, mut op: F) -> CallResult<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let mut retry_index = 0;
        let error = loop {
            match op().await {
                Ok(value) => {
                    if retry_index > 0 {
                        tracing::info!(
                            origin = origin,
                            attempts = retry_index + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let attempt = retry_index + 1;
                    let mut context = BTreeMap::new();
                    context.insert("max_retries".to_string(), policy.max_retries.to_string());
                    self.store.record_error(&err, origin, attempt, context);

                    if retry_index >= policy.max_retries {
                        tracing::error!(
                            origin = origin,
                            attempts = attempt,
                            error = %err,
                            "Retries exhausted"
                        );
                        break err;
                    }

                    let delay = policy.delay_for(retry_index);
                    tracing::warn!(
                        origin = origin,
                        attempt = attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    observability::record_retry_attempt(origin, delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                    retry_index += 1;
                }
            }
        };

        self.recover(origin, error).await
    }

    async fn recover<T: DeserializeOwned>(&self, origin: &str, error: ResilienceError) -> CallResult<T> {
        let Some(RecoveryOutcome::Resolved { action, value }) =
            self.recovery.attempt(&error, origin).await
        else {
            return Err(error);
        };

        match serde_json::from_value::<T>(value) {
            Ok(value) => {
                self.store.mark_resolved(error.kind(), origin, &action);
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(
                    origin = origin,
                    action = %action,
                    error = %e,
                    "Recovery value does not fit the result type"
                );
                Err(error)
            }
        }
    }
}
