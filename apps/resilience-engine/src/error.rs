//! Error taxonomy for the resilience layer.
//!
//! Every failure that crosses a resilience boundary is a [`ResilienceError`].
//! Its [`ErrorKind`] tag is what the retry engine uses to pick a recovery
//! strategy and what the error store aggregates statistics by.
//!
//! # Kinds
//!
//! | Kind | Produced by |
//! |------|-------------|
//! | `network_error` | timeouts, refused connections, HTTP 5xx |
//! | `api_error` | non-retryable API responses, auth failures |
//! | `rate_limit_exceeded` | rate limiter rejections |
//! | `circuit_open` | circuit breaker fail-fast |
//! | `data_error` | malformed payloads |
//! | `trading_error` | broker-side trading failures |
//! | `system_error` | local resource failures |
//! | `transaction_step_failure` | a saga step returned an error |
//! | `recovery_action_failure` | a recovery action could not complete |
//! | `health_check_failure` | a health probe could not be evaluated |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used by wrapped operations.
pub type CallResult<T> = Result<T, ResilienceError>;

/// Tag of a [`ResilienceError`], used as a registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network transport failure.
    #[serde(rename = "network_error")]
    Network,
    /// Remote API returned an error.
    #[serde(rename = "api_error")]
    Api,
    /// Local rate limit exhausted.
    RateLimitExceeded,
    /// Circuit breaker rejected the call.
    CircuitOpen,
    /// Payload could not be parsed or was inconsistent.
    #[serde(rename = "data_error")]
    Data,
    /// Trading operation rejected.
    #[serde(rename = "trading_error")]
    Trading,
    /// Local system resource failure.
    #[serde(rename = "system_error")]
    System,
    /// A transaction step failed.
    #[serde(rename = "transaction_step_failure")]
    TransactionStep,
    /// A recovery action failed.
    #[serde(rename = "recovery_action_failure")]
    RecoveryAction,
    /// A health check could not be evaluated.
    #[serde(rename = "health_check_failure")]
    HealthCheck,
    /// Referenced entity does not exist.
    NotFound,
    /// Operation not valid in the current state.
    InvalidState,
    /// Persistence layer failure.
    #[serde(rename = "persistence_error")]
    Persistence,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::Network,
        Self::Api,
        Self::RateLimitExceeded,
        Self::CircuitOpen,
        Self::Data,
        Self::Trading,
        Self::System,
        Self::TransactionStep,
        Self::RecoveryAction,
        Self::HealthCheck,
        Self::NotFound,
        Self::InvalidState,
        Self::Persistence,
    ];

    /// Stable string form, identical to the serialized representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network_error",
            Self::Api => "api_error",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::CircuitOpen => "circuit_open",
            Self::Data => "data_error",
            Self::Trading => "trading_error",
            Self::System => "system_error",
            Self::TransactionStep => "transaction_step_failure",
            Self::RecoveryAction => "recovery_action_failure",
            Self::HealthCheck => "health_check_failure",
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::Persistence => "persistence_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a network failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "status")]
pub enum NetworkFailure {
    /// Request or connect timed out.
    Timeout,
    /// Peer refused or reset the connection.
    ConnectionRefused,
    /// Server answered with a retryable HTTP status.
    HttpStatus(u16),
    /// Any other transport error.
    Transport,
}

impl std::fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::HttpStatus(status) => write!(f, "HTTP {status}"),
            Self::Transport => write!(f, "transport error"),
        }
    }
}

/// Failure surfaced by any resilience component.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResilienceError {
    /// Network transport failure.
    #[error("network error ({failure}): {message}")]
    Network {
        /// What went wrong on the wire.
        failure: NetworkFailure,
        /// Human-readable detail.
        message: String,
    },

    /// Remote API error.
    #[error("API error: {message}")]
    Api {
        /// HTTP status, when one was received.
        status: Option<u16>,
        /// Error detail.
        message: String,
    },

    /// Rate limit exhausted for an API.
    #[error("rate limit exceeded for '{api}', retry in {wait:?}")]
    RateLimitExceeded {
        /// API name.
        api: String,
        /// Time until the violated window resets.
        wait: Duration,
    },

    /// Circuit breaker is open for the service.
    #[error("circuit breaker OPEN for service '{service}'")]
    CircuitOpen {
        /// Service name.
        service: String,
    },

    /// Data error.
    #[error("data error: {0}")]
    Data(String),

    /// Trading error.
    #[error("trading error: {0}")]
    Trading(String),

    /// System error.
    #[error("system error: {0}")]
    System(String),

    /// A transaction step failed.
    #[error("transaction step '{step}' failed: {message}")]
    TransactionStep {
        /// Step name.
        step: String,
        /// Failure detail.
        message: String,
    },

    /// A recovery action failed.
    #[error("recovery action '{action}' failed: {message}")]
    RecoveryAction {
        /// Action name.
        action: String,
        /// Failure detail.
        message: String,
    },

    /// A health check could not be evaluated.
    #[error("health check '{check}' failed: {message}")]
    HealthCheck {
        /// Check name.
        check: String,
        /// Failure detail.
        message: String,
    },

    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity type, e.g. "transaction".
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Trigger condition could not be parsed.
    #[error("invalid trigger condition '{condition}': {reason}")]
    InvalidTriggerCondition {
        /// Raw condition text.
        condition: String,
        /// Parse failure.
        reason: String,
    },

    /// Persistence failure.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ResilienceError {
    /// Create a network error.
    pub fn network(failure: NetworkFailure, message: impl Into<String>) -> Self {
        Self::Network {
            failure,
            message: message.into(),
        }
    }

    /// Create an API error without a status code.
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            status: None,
            message: message.into(),
        }
    }

    /// Create a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// Create a trading error.
    pub fn trading(message: impl Into<String>) -> Self {
        Self::Trading(message.into())
    }

    /// Create a system error.
    pub fn system(message: impl Into<String>) -> Self {
        Self::System(message.into())
    }

    /// Create a not-found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Get the kind tag.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Api { .. } => ErrorKind::Api,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Data(_) => ErrorKind::Data,
            Self::Trading(_) => ErrorKind::Trading,
            Self::System(_) => ErrorKind::System,
            Self::TransactionStep { .. } => ErrorKind::TransactionStep,
            Self::RecoveryAction { .. } => ErrorKind::RecoveryAction,
            Self::HealthCheck { .. } => ErrorKind::HealthCheck,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState(_) | Self::InvalidTriggerCondition { .. } => {
                ErrorKind::InvalidState
            }
            Self::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Lower-cased message text, used for keyword-based recovery decisions.
    #[must_use]
    pub fn normalized_message(&self) -> String {
        self.to_string().to_lowercase()
    }

    /// Suggested wait carried by the error, if any.
    #[must_use]
    pub const fn wait_hint(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { wait, .. } => Some(*wait),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ResilienceError {
    fn from(err: std::io::Error) -> Self {
        Self::System(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(ResilienceError::network(NetworkFailure::Timeout, "slow"), ErrorKind::Network ; "network")]
    #[test_case(ResilienceError::api("bad"), ErrorKind::Api ; "api")]
    #[test_case(ResilienceError::CircuitOpen { service: "x".into() }, ErrorKind::CircuitOpen ; "circuit")]
    #[test_case(ResilienceError::trading("insufficient balance"), ErrorKind::Trading ; "trading")]
    #[test_case(ResilienceError::system("disk"), ErrorKind::System ; "system")]
    #[test_case(ResilienceError::InvalidTriggerCondition { condition: "x".into(), reason: "y".into() }, ErrorKind::InvalidState ; "trigger")]
    fn test_error_kind_mapping(err: ResilienceError, expected: ErrorKind) {
        assert_eq!(err.kind(), expected);
    }

    #[test]
    fn test_kind_serializes_as_as_str() {
        for kind in ErrorKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_error_display() {
        let err = ResilienceError::network(NetworkFailure::HttpStatus(503), "upstream");
        assert_eq!(err.to_string(), "network error (HTTP 503): upstream");

        let err = ResilienceError::CircuitOpen {
            service: "broker".into(),
        };
        assert!(err.to_string().contains("OPEN"));
    }

    #[test]
    fn test_wait_hint() {
        let err = ResilienceError::RateLimitExceeded {
            api: "github_api".into(),
            wait: Duration::from_secs(12),
        };
        assert_eq!(err.wait_hint(), Some(Duration::from_secs(12)));
        assert_eq!(ResilienceError::api("x").wait_hint(), None);
    }
}
