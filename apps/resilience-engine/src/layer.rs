//! Wiring of every resilience component.
//!
//! [`ResilienceLayer`] owns the shared registries and hands out `Arc`s to
//! them. Protected calls are built with [`ResilienceLayer::pipeline`]:
//!
//! ```rust,ignore
//! let pipeline = layer
//!     .pipeline::<Value>("fetch_ticker")
//!     .with_retry(3, Duration::from_secs(1))
//!     .circuit_breaker("market_data")
//!     .rate_limited("max_api", 5)
//!     .build();
//! let ticker = pipeline.execute(|| client.fetch_ticker()).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ResilienceConfig;
use crate::error::{CallResult, ErrorKind};
use crate::error_store::{ErrorStatistics, ErrorStore};
use crate::health::{
    BuiltinResources, CheckResult, HealthCheck, HealthRecoveryManager, RecoveryActionHandler,
    RecoveryPlan, RecoveryRecord, SystemStatus,
};
use crate::network::NetworkClient;
use crate::resilience::{
    ApiStats, CircuitBreakerConfig, CircuitBreakerRegistry, Pipeline, RateLimiter, RecoveryRegistry,
    RecoveryStrategy, RequestScheduler, RetryEngine, RetryPolicy,
};
use crate::saga::{RollbackHandler, TransactionManager, TransactionSummary};

/// Owner of the resilience components.
#[derive(Debug)]
pub struct ResilienceLayer {
    config: ResilienceConfig,
    errors: Arc<ErrorStore>,
    recovery: Arc<RecoveryRegistry>,
    retry: RetryEngine,
    breakers: Arc<CircuitBreakerRegistry>,
    limiter: Arc<RateLimiter>,
    scheduler: RequestScheduler,
    transactions: Arc<TransactionManager>,
    network: Arc<NetworkClient>,
    health: Arc<HealthRecoveryManager>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl ResilienceLayer {
    /// Build every component from `config`.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built or a builtin recovery
    /// plan does not parse.
    pub fn new(config: ResilienceConfig) -> CallResult<Self> {
        let persistence = &config.persistence;

        let errors = Arc::new(if persistence.enabled {
            ErrorStore::with_journal(persistence.error_dir())
        } else {
            ErrorStore::new()
        });

        let recovery = Arc::new(RecoveryRegistry::with_defaults(
            &config.retry.recovery.to_recovery_settings(&persistence.temp_dir),
        ));
        let retry = RetryEngine::new(Arc::clone(&errors), Arc::clone(&recovery));

        let breakers = Arc::new(
            CircuitBreakerRegistry::new(config.circuit_breaker.default.to_resilience_config())
                .with_overrides(config.circuit_breaker.overrides()),
        );

        let limiter = Arc::new(RateLimiter::with_config(
            config.rate_limits.default,
            config.rate_limits.adaptive.to_adaptive_config(),
        ));
        for (api, limits) in &config.rate_limits.apis {
            limiter.set_limits(api, *limits);
        }

        let shutdown = CancellationToken::new();
        let scheduler = RequestScheduler::new(
            Arc::clone(&limiter),
            config.scheduler.to_scheduler_config(),
            shutdown.child_token(),
        );

        let transactions = Arc::new(TransactionManager::new());

        let network = Arc::new(NetworkClient::new(
            config.network.to_network_config(),
            retry.clone(),
            Arc::clone(&breakers),
        )?);

        let mut health = HealthRecoveryManager::new(config.health.to_health_config());
        if persistence.enabled {
            health = health.with_history_dir(persistence.recovery_dir());
        }
        if config.health.builtin_checks {
            health.register_builtins(&BuiltinResources {
                temp_dir: persistence.temp_dir.clone(),
                cache_dirs: persistence.cache_dirs.clone(),
                log_dir: persistence.log_dir.clone(),
                network: Arc::clone(&network),
                connectivity_urls: config.health.connectivity_urls.clone(),
                errors: Arc::clone(&errors),
                breakers: Arc::clone(&breakers),
                host_metrics: config.health.host_metrics,
                disk_path: config.health.disk_path.clone(),
            })?;
        }

        tracing::info!(
            persistence = persistence.enabled,
            strategies = recovery.kinds().len(),
            configured_apis = config.rate_limits.apis.len(),
            "Resilience layer initialized"
        );

        Ok(Self {
            config,
            errors,
            recovery,
            retry,
            breakers,
            limiter,
            scheduler,
            transactions,
            network,
            health: Arc::new(health),
            shutdown,
            tasks: TaskTracker::new(),
        })
    }

    /// Configuration the layer was built from.
    #[must_use]
    pub const fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Shared error record store.
    #[must_use]
    pub fn errors(&self) -> Arc<ErrorStore> {
        Arc::clone(&self.errors)
    }

    /// Recovery strategies keyed by error kind.
    #[must_use]
    pub fn recovery(&self) -> Arc<RecoveryRegistry> {
        Arc::clone(&self.recovery)
    }

    /// Retry engine bound to the shared store and strategies.
    #[must_use]
    pub fn retry_engine(&self) -> RetryEngine {
        self.retry.clone()
    }

    /// Circuit breakers.
    #[must_use]
    pub fn breakers(&self) -> Arc<CircuitBreakerRegistry> {
        Arc::clone(&self.breakers)
    }

    /// Rate limiter.
    #[must_use]
    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Priority request scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    /// Transaction manager.
    #[must_use]
    pub fn transactions(&self) -> Arc<TransactionManager> {
        Arc::clone(&self.transactions)
    }

    /// Network client.
    #[must_use]
    pub fn network(&self) -> Arc<NetworkClient> {
        Arc::clone(&self.network)
    }

    /// Health monitor.
    #[must_use]
    pub fn health(&self) -> Arc<HealthRecoveryManager> {
        Arc::clone(&self.health)
    }

    /// Start building a pipeline for the operation named `origin`.
    #[must_use]
    pub fn pipeline<T: Send + 'static>(&self, origin: &str) -> PipelineBuilder<'_, T> {
        PipelineBuilder {
            layer: self,
            pipeline: Pipeline::new(origin),
        }
    }

    /// Spawn the health monitor and transaction retention.
    pub fn start(&self) {
        self.tasks
            .spawn(Arc::clone(&self.health).monitor(self.shutdown.child_token()));

        let transactions = Arc::clone(&self.transactions);
        let retention = self.config.transactions.retention();
        let every = self.config.transactions.cleanup_interval();
        let shutdown = self.shutdown.child_token();
        self.tasks.spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = transactions.cleanup_old_transactions(retention);
                        if removed > 0 {
                            tracing::info!(removed = removed, "Old transactions cleaned up");
                        }
                    }
                }
            }
        });
        tracing::info!("Background services started");
    }

    /// Stop background services and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.scheduler.shutdown().await;
        tracing::info!("Resilience layer stopped");
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Replace the recovery strategy for `kind`.
    pub fn register_recovery_strategy(&self, kind: ErrorKind, strategy: Arc<dyn RecoveryStrategy>) {
        self.recovery.register(kind, strategy);
    }

    /// Register a rollback handler under `operation`.
    pub fn register_rollback_handler(&self, operation: &str, handler: Arc<dyn RollbackHandler>) {
        self.transactions.register_rollback_handler(operation, handler);
    }

    /// Add a health check to the monitor.
    pub fn register_health_check(&self, check: HealthCheck) {
        self.health.register_health_check(check);
    }

    /// Add a recovery plan to the monitor.
    pub fn register_recovery_plan(&self, plan: RecoveryPlan) {
        self.health.register_recovery_plan(plan);
    }

    /// Make a recovery action available to plans by name.
    pub fn register_recovery_action(&self, name: &str, handler: Arc<dyn RecoveryActionHandler>) {
        self.health.register_recovery_action(name, handler);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Aggregate error statistics.
    #[must_use]
    pub fn get_error_statistics(&self) -> ErrorStatistics {
        self.errors.statistics()
    }

    /// Plain-text report of errors and breaker states.
    #[must_use]
    pub fn generate_error_report(&self) -> String {
        self.errors.generate_report(&self.breakers.all_metrics())
    }

    /// Rate limit usage for `api`.
    #[must_use]
    pub fn get_api_stats(&self, api: &str) -> ApiStats {
        self.limiter.get_api_stats(api)
    }

    /// Summary of a transaction.
    #[must_use]
    pub fn get_transaction_status(&self, transaction_id: &str) -> Option<TransactionSummary> {
        self.transactions.get_transaction_status(transaction_id)
    }

    /// Health monitor status.
    #[must_use]
    pub fn get_system_status(&self) -> SystemStatus {
        self.health.get_system_status()
    }

    /// Last result of every health check that has run.
    #[must_use]
    pub fn get_health_check_results(&self) -> BTreeMap<String, CheckResult> {
        self.health.last_results()
    }

    /// The most recent `limit` recovery records.
    #[must_use]
    pub fn get_recovery_history(&self, limit: usize) -> Vec<RecoveryRecord> {
        self.health.get_recovery_history(limit)
    }
}

/// Pipeline builder bound to a layer's registries.
///
/// Layers run in the order they are added, outermost first.
pub struct PipelineBuilder<'a, T> {
    layer: &'a ResilienceLayer,
    pipeline: Pipeline<T>,
}

impl<T: Send + 'static> PipelineBuilder<'_, T> {
    /// Guard with the breaker for `service` using its configured settings.
    #[must_use]
    pub fn circuit_breaker(mut self, service: &str) -> Self {
        let config = self.layer.breakers.config_for(service);
        self.pipeline = self
            .pipeline
            .circuit_breaker(Arc::clone(&self.layer.breakers), service, config);
        self
    }

    /// Guard with the breaker for `service`, opening after `failure_threshold`
    /// consecutive failures.
    #[must_use]
    pub fn circuit_breaker_with(mut self, service: &str, failure_threshold: u32) -> Self {
        let configured = self.layer.breakers.config_for(service);
        let config = CircuitBreakerConfig::new(failure_threshold, configured.recovery_timeout);
        self.pipeline = self
            .pipeline
            .circuit_breaker(Arc::clone(&self.layer.breakers), service, config);
        self
    }

    /// Wait for rate-limit capacity on `api`.
    #[must_use]
    pub fn rate_limited(mut self, api: &str, priority: i32) -> Self {
        self.pipeline = self
            .pipeline
            .rate_limited(Arc::clone(&self.layer.limiter), api, priority);
        self
    }

    /// Run calls as single-step transactions of `transaction_type`.
    #[must_use]
    pub fn transactional(mut self, transaction_type: &str, description: &str) -> Self {
        self.pipeline = self.pipeline.transactional(
            Arc::clone(&self.layer.transactions),
            transaction_type,
            description,
        );
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Pipeline<T> {
        self.pipeline
    }
}

impl<T: DeserializeOwned + Send + 'static> PipelineBuilder<'_, T> {
    /// Retry under the configured default policy.
    #[must_use]
    pub fn retry(self) -> Self {
        let policy = self.layer.config.retry.to_policy();
        self.retry_with(policy)
    }

    /// Retry `max_retries` times starting at `base_delay`.
    #[must_use]
    pub fn with_retry(self, max_retries: u32, base_delay: Duration) -> Self {
        let policy = RetryPolicy {
            max_retries,
            base_delay,
            ..self.layer.config.retry.to_policy()
        };
        self.retry_with(policy)
    }

    /// Retry under `policy`.
    #[must_use]
    pub fn retry_with(mut self, policy: RetryPolicy) -> Self {
        self.pipeline = self.pipeline.retry(self.layer.retry.clone(), policy);
        self
    }
}
