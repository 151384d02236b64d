//! Resilience patterns for calls to external services.
//!
//! Retry with backoff and recovery strategies, circuit breakers, multi-window
//! rate limiting with a priority scheduler, and the [`Pipeline`] that
//! composes them around a single operation.

mod circuit_breaker;
mod pipeline;
mod rate_limiter;
mod recovery;
mod retry;
mod scheduler;

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerRegistry,
    CircuitBreakerState,
};
pub use pipeline::{
    CallContext, CircuitBreakerMiddleware, Middleware, Next, Pipeline, RateLimitMiddleware,
    RetryMiddleware,
};
pub use rate_limiter::{
    AdaptiveConfig, ApiStats, RateLimitDecision, RateLimiter, Window, WindowLimits, WindowUsage,
};
pub use recovery::{
    ConnectivityProbe, RateLimitPause, RecoveryOutcome, RecoveryRegistry, RecoverySettings,
    RecoveryStrategy, TempDirCleanup, TradingSafeguard,
};
pub use retry::{RetryEngine, RetryPolicy, apply_jitter};
pub use scheduler::{
    PendingRequest, QueueStatus, RequestHandle, RequestOutcome, RequestScheduler, ScheduledOperation,
    SchedulerConfig,
};
