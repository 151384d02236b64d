// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Resilience Engine - fault tolerance for calls to external services
//!
//! A library-level resilience layer an application wires around its outbound
//! work: broker APIs, market data feeds, HTTP endpoints and local resources.
//!
//! # Components
//!
//! - **Error store** ([`error_store`]): normalized error records, statistics
//!   and the human-readable report, optionally journaled to disk
//! - **Resilience** ([`resilience`]):
//!   - `RetryEngine`: exponential backoff with jitter and per-kind recovery
//!   - `CircuitBreaker`: CLOSED / OPEN / `HALF_OPEN` per service
//!   - `RateLimiter`: minute, hour and day windows with adaptive limits
//!   - `RequestScheduler`: priority queues drained per API
//!   - `Pipeline`: middleware chain composing the above
//! - **Sagas** ([`saga`]): multi-step transactions with reverse-order
//!   compensation
//! - **Health** ([`health`]): periodic checks, overall status and recovery
//!   plans with cooldowns
//! - **Network** ([`network`]): HTTP client with retry, circuit breaking and
//!   connectivity checks
//! - **Layer** ([`layer`]): one owner for all of the above plus the
//!   background tasks
//!
//! # Example
//!
//! ```rust,ignore
//! let layer = ResilienceLayer::new(load_config(None)?)?;
//! layer.start();
//!
//! let quote: Quote = layer
//!     .pipeline("fetch_quote")
//!     .circuit_breaker("alpaca_api")
//!     .rate_limited("alpaca", 1)
//!     .retry()
//!     .build()
//!     .execute(|| fetch_quote("AAPL"))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Configuration loading and validation.
pub mod config;

/// Error taxonomy shared by every component.
pub mod error;

/// Error history, statistics and reports.
pub mod error_store;

/// Health checks and automatic recovery.
pub mod health;

/// Append-only JSON-lines journals.
pub mod journal;

/// Top-level wiring of the resilience components.
pub mod layer;

/// HTTP client with resilience built in.
pub mod network;

/// Prometheus metrics.
pub mod observability;

/// Retry, circuit breaking and rate limiting.
pub mod resilience;

/// Saga transactions.
pub mod saga;

/// Tracing subscriber setup.
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, ResilienceConfig, load_config, load_config_from_string};
pub use error::{CallResult, ErrorKind, NetworkFailure, ResilienceError};
pub use error_store::{ErrorRecord, ErrorStatistics, ErrorStore};
pub use health::{HealthRecoveryManager, HealthStatus, RecoveryPlan, SystemStatus};
pub use layer::{PipelineBuilder, ResilienceLayer};
pub use network::{NetworkClient, NetworkConfig};
pub use resilience::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerState, Pipeline, RateLimiter,
    RequestScheduler, RetryEngine, RetryPolicy,
};
pub use saga::{TransactionManager, TransactionStatus};
