//! Composable call pipeline.
//!
//! A [`Pipeline`] wraps an operation in an ordered stack of [`Middleware`]
//! layers. The first layer added is the outermost:
//!
//! ```rust,ignore
//! let pipeline = Pipeline::new("fetch_quotes")
//!     .rate_limited(limiter, "max_api", 1)
//!     .circuit_breaker(registry, "max_api", CircuitBreakerConfig::default())
//!     .retry(engine, RetryPolicy::default());
//!
//! // rate limit -> breaker -> retry -> operation
//! let quotes: Vec<Quote> = pipeline.execute(|| client.quotes()).await?;
//! ```
//!
//! Placing retry inside the breaker means the breaker sees one outcome per
//! retried call; placing it outside means every attempt passes the breaker.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use super::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use super::rate_limiter::RateLimiter;
use super::retry::{RetryEngine, RetryPolicy};
use crate::error::CallResult;
use crate::saga::{TransactionManager, TransactionalMiddleware};

/// Per-call context passed to every layer.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Name of the wrapped operation, used in records and logs.
    pub origin: String,
    /// Free-form call metadata.
    pub metadata: BTreeMap<String, String>,
}

impl CallContext {
    /// Context for `origin` without metadata.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// A layer around the rest of the pipeline.
#[async_trait]
pub trait Middleware<T: Send + 'static>: Send + Sync {
    /// Layer name for logs.
    fn name(&self) -> &'static str;

    /// Handle the call, invoking `next` zero or more times.
    async fn handle<'a>(&self, ctx: &'a CallContext, next: Next<'a, T>) -> CallResult<T>;
}

type ErasedOperation<'a, T> = dyn Fn() -> BoxFuture<'a, CallResult<T>> + Send + Sync + 'a;

/// The remainder of the pipeline below a layer.
///
/// `Next` is `Copy`, so a layer may run it more than once.
pub struct Next<'a, T> {
    layers: &'a [Arc<dyn Middleware<T>>],
    op: &'a ErasedOperation<'a, T>,
}

impl<T> Clone for Next<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Next<'_, T> {}

impl<'a, T: Send + 'static> Next<'a, T> {
    /// Run the remaining layers and finally the operation.
    pub fn run(self, ctx: &'a CallContext) -> BoxFuture<'a, CallResult<T>> {
        match self.layers.split_first() {
            Some((layer, rest)) => layer.handle(
                ctx,
                Next {
                    layers: rest,
                    op: self.op,
                },
            ),
            None => (self.op)(),
        }
    }
}

/// Ordered middleware stack for operations returning `T`.
pub struct Pipeline<T> {
    origin: String,
    layers: Vec<Arc<dyn Middleware<T>>>,
}

impl<T> std::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("origin", &self.origin)
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Empty pipeline for the operation named `origin`.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            layers: Vec::new(),
        }
    }

    /// Operation name.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Layer names, outermost first.
    #[must_use]
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    /// Append a custom layer inside the existing ones.
    #[must_use]
    pub fn layer(mut self, layer: Arc<dyn Middleware<T>>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Guard calls with the breaker for `service`.
    #[must_use]
    pub fn circuit_breaker(
        self,
        registry: Arc<CircuitBreakerRegistry>,
        service: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Self {
        self.layer(Arc::new(CircuitBreakerMiddleware {
            registry,
            service: service.into(),
            config,
        }))
    }

    /// Wait for rate-limit capacity on `api` and record each outcome.
    #[must_use]
    pub fn rate_limited(self, limiter: Arc<RateLimiter>, api: impl Into<String>, priority: i32) -> Self {
        self.layer(Arc::new(RateLimitMiddleware {
            limiter,
            api: api.into(),
            priority,
        }))
    }

    /// Run calls as single-step transactions of `transaction_type`.
    #[must_use]
    pub fn transactional(
        self,
        manager: Arc<TransactionManager>,
        transaction_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.layer(Arc::new(TransactionalMiddleware::new(
            manager,
            transaction_type,
            description,
        )))
    }

    /// Run `op` through every layer.
    pub async fn execute<F, Fut>(&self, op: F) -> CallResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = CallResult<T>> + Send,
    {
        let ctx = CallContext::new(self.origin.clone());
        self.execute_with(&ctx, op).await
    }

    /// Run `op` through every layer with an explicit context.
    pub async fn execute_with<F, Fut>(&self, ctx: &CallContext, op: F) -> CallResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = CallResult<T>> + Send,
    {
        let op = &op;
        let erased = move || Box::pin(op()) as BoxFuture<'_, CallResult<T>>;
        let next = Next {
            layers: &self.layers,
            op: &erased,
        };
        next.run(ctx).await
    }
}

impl<T: DeserializeOwned + Send + 'static> Pipeline<T> {
    /// Retry failures under `policy`, then try recovery.
    #[must_use]
    pub fn retry(self, engine: RetryEngine, policy: RetryPolicy) -> Self {
        self.layer(Arc::new(RetryMiddleware { engine, policy }))
    }
}

// ============================================================================
// Builtin layers
// ============================================================================

/// Retries the rest of the pipeline.
#[derive(Debug, Clone)]
pub struct RetryMiddleware {
    engine: RetryEngine,
    policy: RetryPolicy,
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> Middleware<T> for RetryMiddleware {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn handle<'a>(&self, ctx: &'a CallContext, next: Next<'a, T>) -> CallResult<T> {
        self.engine
            .retry(&ctx.origin, &self.policy, || next.run(ctx))
            .await
    }
}

/// Guards the rest of the pipeline with a named breaker.
#[derive(Debug)]
pub struct CircuitBreakerMiddleware {
    registry: Arc<CircuitBreakerRegistry>,
    service: String,
    config: CircuitBreakerConfig,
}

#[async_trait]
impl<T: Send + 'static> Middleware<T> for CircuitBreakerMiddleware {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    async fn handle<'a>(&self, ctx: &'a CallContext, next: Next<'a, T>) -> CallResult<T> {
        self.registry
            .guard(&self.service, self.config, || next.run(ctx))
            .await
    }
}

/// Waits for rate-limit capacity before the rest of the pipeline.
#[derive(Debug)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    api: String,
    priority: i32,
}

#[async_trait]
impl<T: Send + 'static> Middleware<T> for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle<'a>(&self, ctx: &'a CallContext, next: Next<'a, T>) -> CallResult<T> {
        let waited = self.limiter.acquire(&self.api).await;
        if !waited.is_zero() {
            tracing::debug!(
                api = %self.api,
                origin = %ctx.origin,
                priority = self.priority,
                waited_ms = waited.as_millis() as u64,
                "Rate limit slot acquired"
            );
        }

        let result = next.run(ctx).await;
        self.limiter.record_outcome(&self.api, result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::error::ResilienceError;
    use crate::error_store::ErrorStore;
    use crate::resilience::{CircuitBreakerState, RecoveryRegistry, WindowLimits};

    fn engine() -> RetryEngine {
        RetryEngine::new(
            Arc::new(ErrorStore::new()),
            Arc::new(RecoveryRegistry::empty(Duration::from_secs(30))),
        )
    }

    struct Tag {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware<u32> for Tag {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn handle<'a>(&self, ctx: &'a CallContext, next: Next<'a, u32>) -> CallResult<u32> {
            self.log.lock().push(self.label);
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn test_empty_pipeline_runs_operation() {
        let pipeline = Pipeline::<u32>::new("plain");
        assert_eq!(pipeline.execute(|| async { Ok(7) }).await, Ok(7));
        assert!(pipeline.layer_names().is_empty());
    }

    #[tokio::test]
    async fn test_layers_run_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::<u32>::new("ordered")
            .layer(Arc::new(Tag { label: "outer", log: Arc::clone(&log) }))
            .layer(Arc::new(Tag { label: "inner", log: Arc::clone(&log) }));

        assert_eq!(pipeline.execute(|| async { Ok(1) }).await, Ok(1));
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
        assert_eq!(pipeline.layer_names(), vec!["outer", "inner"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_inside_breaker_counts_one_failure() {
        let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = Pipeline::<u32>::new("inner_retry")
            .circuit_breaker(Arc::clone(&registry), "svc", CircuitBreakerConfig::default())
            .retry(engine(), RetryPolicy::new(2, Duration::from_secs(1)).without_jitter());

        let counter = Arc::clone(&calls);
        let result = pipeline
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(ResilienceError::data("bad payload"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let breaker = registry.get("svc").expect("breaker created");
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_outside_breaker_stops_when_open() {
        let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = Pipeline::<u32>::new("outer_retry")
            .retry(engine(), RetryPolicy::new(3, Duration::from_secs(1)).without_jitter())
            .circuit_breaker(
                Arc::clone(&registry),
                "fragile",
                CircuitBreakerConfig::new(2, Duration::from_secs(60)),
            );

        let counter = Arc::clone(&calls);
        let result = pipeline
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(ResilienceError::data("bad payload"))
                }
            })
            .await;

        // Two real failures open the circuit; later attempts are rejected
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let breaker = registry.get("fragile").expect("breaker created");
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
    }

    #[tokio::test]
    async fn test_rate_limited_records_outcomes() {
        let limiter = Arc::new(RateLimiter::new());
        limiter.set_limits("api", WindowLimits::new(10, 100, 1000));
        let pipeline = Pipeline::<u32>::new("limited").rate_limited(Arc::clone(&limiter), "api", 0);

        assert_eq!(pipeline.execute(|| async { Ok(1) }).await, Ok(1));
        assert!(pipeline
            .execute(|| async { Err(ResilienceError::api("nope")) })
            .await
            .is_err());

        let stats = limiter.get_api_stats("api");
        assert_eq!(stats.usage.minute, 2);
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.successful_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_waits_for_window() {
        let limiter = Arc::new(RateLimiter::new());
        limiter.set_limits("slow", WindowLimits::new(1, 100, 1000));
        let pipeline = Pipeline::<u32>::new("slow").rate_limited(Arc::clone(&limiter), "slow", 0);

        let start = tokio::time::Instant::now();
        assert_eq!(pipeline.execute(|| async { Ok(1) }).await, Ok(1));
        assert_eq!(pipeline.execute(|| async { Ok(2) }).await, Ok(2));
        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
