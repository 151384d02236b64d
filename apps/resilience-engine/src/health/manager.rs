//! Periodic health monitoring with automatic recovery.
//!
//! Every cycle runs the enabled health checks, classifies the system and
//! counts consecutive unhealthy cycles. Once the count reaches
//! `alert_threshold`, every plan whose trigger holds and whose cooldown has
//! elapsed runs in priority order. When no plan applies, the recovery
//! actions listed on each CRITICAL or FAILED check run instead, at most once
//! per [`DEFAULT_PLAN_COOLDOWN`] per check. The manager then waits
//! `settle_time`, checks again, and clears the counter when the system is
//! healthy.
//!
//! ```text
//! monitor ──interval──► run_cycle ──► run_health_checks ──► evaluate
//!                           │
//!                           └─(threshold reached)─► trigger_recovery
//!                                                     ├── plans by priority
//!                                                     ├── settle_time
//!                                                     └── re-check
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::actions::{
    AlertAdministrators, CleanupLogFiles, CleanupTempFiles, ClearApplicationCache,
    ResetNetworkConnections,
};
use super::checks::{
    CPU_USAGE_THRESHOLDS, CpuUsageProbe, DISK_SPACE_THRESHOLDS, DiskSpaceProbe, ErrorRateProbe,
    FilesystemProbe, MEMORY_USAGE_THRESHOLDS, MemoryUsageProbe, NetworkConnectivityProbe,
    PROCESS_HEALTH_THRESHOLDS, ProcessHealthProbe, SystemSampler,
};
use super::types::{
    ActionExecution, CheckResult, DEFAULT_PLAN_COOLDOWN, HealthCheck, HealthStatus, PlanAction,
    RecoveryActionHandler, RecoveryPlan, RecoveryRecord, SystemStatus, Thresholds,
};
use crate::error::CallResult;
use crate::error_store::ErrorStore;
use crate::journal::DailyJournal;
use crate::network::NetworkClient;
use crate::observability;
use crate::resilience::CircuitBreakerRegistry;

/// File prefix of the recovery history journal.
pub const RECOVERY_JOURNAL_PREFIX: &str = "recovery_history";

/// Monitor tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Time between cycles (default: 30s).
    pub check_interval: Duration,
    /// Run recovery plans automatically (default: true).
    pub auto_recovery: bool,
    /// Consecutive unhealthy cycles before recovery (default: 2).
    pub alert_threshold: u32,
    /// Wait after recovery before re-checking (default: 30s).
    pub settle_time: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            auto_recovery: true,
            alert_threshold: 2,
            settle_time: Duration::from_secs(30),
        }
    }
}

/// Resources the builtin checks and actions operate on.
#[derive(Debug, Clone)]
pub struct BuiltinResources {
    /// Probed by `filesystem_health`, recreated by `cleanup_temp_files`.
    pub temp_dir: PathBuf,
    /// Removed by `clear_application_cache`.
    pub cache_dirs: Vec<PathBuf>,
    /// Scanned by `cleanup_log_files`.
    pub log_dir: PathBuf,
    /// Source for `network_connectivity`.
    pub network: Arc<NetworkClient>,
    /// Probed by `network_connectivity`; empty uses request statistics.
    pub connectivity_urls: Vec<String>,
    /// Source for `error_rate`.
    pub errors: Arc<ErrorStore>,
    /// Reset by `reset_network_connections`.
    pub breakers: Arc<CircuitBreakerRegistry>,
    /// Register the `cpu_usage`, `memory_usage`, `disk_space` and
    /// `process_health` checks with their plans.
    pub host_metrics: bool,
    /// Any path on the disk watched by `disk_space`.
    pub disk_path: PathBuf,
}

#[derive(Debug)]
struct PlanState {
    plan: RecoveryPlan,
    last_run: Option<Instant>,
    attempts: u32,
}

impl PlanState {
    fn runnable(&self, now: Instant) -> bool {
        self.plan.enabled
            && self.attempts < self.plan.max_attempts
            && self
                .last_run
                .is_none_or(|at| now.saturating_duration_since(at) >= self.plan.cooldown)
    }
}

#[derive(Debug)]
struct MonitorState {
    overall_health: HealthStatus,
    last_check_time: Option<chrono::DateTime<Utc>>,
    consecutive_failures: u32,
    recovery_in_progress: bool,
    last_recovery_time: Option<chrono::DateTime<Utc>>,
}

/// Health monitor and recovery orchestrator.
pub struct HealthRecoveryManager {
    config: HealthConfig,
    checks: RwLock<BTreeMap<String, HealthCheck>>,
    plans: Mutex<BTreeMap<String, PlanState>>,
    actions: RwLock<HashMap<String, Arc<dyn RecoveryActionHandler>>>,
    history: Mutex<Vec<RecoveryRecord>>,
    /// Last fallback run per check name.
    fallback_runs: Mutex<HashMap<String, Instant>>,
    journal: Option<DailyJournal>,
    state: Mutex<MonitorState>,
    status_tx: watch::Sender<SystemStatus>,
    monitoring: AtomicBool,
}

impl std::fmt::Debug for HealthRecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthRecoveryManager")
            .field("config", &self.config)
            .field("checks", &self.checks.read().len())
            .field("plans", &self.plans.lock().len())
            .finish_non_exhaustive()
    }
}

/// Clears `recovery_in_progress` however recovery ends, including when the
/// cycle future is dropped on shutdown.
struct RecoveryGuard<'a>(&'a HealthRecoveryManager);

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.0.state.lock().recovery_in_progress = false;
        self.0.publish();
    }
}

impl HealthRecoveryManager {
    /// Manager with in-memory history only.
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        let initial = SystemStatus {
            overall_health: HealthStatus::Healthy,
            last_check_time: None,
            consecutive_failures: 0,
            recovery_in_progress: false,
            last_recovery_time: None,
            monitoring_active: false,
            health_checks_count: 0,
            recovery_plans_count: 0,
        };
        let (status_tx, _) = watch::channel(initial);

        Self {
            config,
            checks: RwLock::new(BTreeMap::new()),
            plans: Mutex::new(BTreeMap::new()),
            actions: RwLock::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            fallback_runs: Mutex::new(HashMap::new()),
            journal: None,
            state: Mutex::new(MonitorState {
                overall_health: HealthStatus::Healthy,
                last_check_time: None,
                consecutive_failures: 0,
                recovery_in_progress: false,
                last_recovery_time: None,
            }),
            status_tx,
            monitoring: AtomicBool::new(false),
        }
    }

    /// Persist recovery records under `dir` and load the ones already there.
    #[must_use]
    pub fn with_history_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let journal = DailyJournal::new(dir.as_ref(), RECOVERY_JOURNAL_PREFIX);
        let loaded: Vec<RecoveryRecord> = journal.load_all();
        if !loaded.is_empty() {
            tracing::info!(records = loaded.len(), "Recovery history loaded");
        }
        self.history = Mutex::new(loaded);
        self.journal = Some(journal);
        self
    }

    /// Monitor tunables.
    #[must_use]
    pub const fn config(&self) -> HealthConfig {
        self.config
    }

    /// Register or replace a health check.
    pub fn register_health_check(&self, check: HealthCheck) {
        tracing::debug!(
            check = %check.name,
            warning = check.thresholds.warning,
            critical = check.thresholds.critical,
            "Health check registered"
        );
        self.checks.write().insert(check.name.clone(), check);
        self.publish();
    }

    /// Register or replace a recovery plan.
    pub fn register_recovery_plan(&self, plan: RecoveryPlan) {
        tracing::debug!(plan = %plan.id, trigger = %plan.trigger, priority = plan.priority, "Recovery plan registered");
        self.plans.lock().insert(
            plan.id.clone(),
            PlanState {
                plan,
                last_run: None,
                attempts: 0,
            },
        );
        self.publish();
    }

    /// Register or replace a named recovery action.
    pub fn register_recovery_action(&self, name: impl Into<String>, handler: Arc<dyn RecoveryActionHandler>) {
        self.actions.write().insert(name.into(), handler);
    }

    /// Names of registered recovery actions, sorted.
    #[must_use]
    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Register the builtin checks, actions and plans.
    pub fn register_builtins(&self, resources: &BuiltinResources) -> CallResult<()> {
        self.register_recovery_action(
            "cleanup_temp_files",
            Arc::new(CleanupTempFiles::new(resources.temp_dir.clone())),
        );
        self.register_recovery_action(
            "clear_application_cache",
            Arc::new(ClearApplicationCache::new(resources.cache_dirs.clone())),
        );
        self.register_recovery_action(
            "cleanup_log_files",
            Arc::new(CleanupLogFiles::new(
                resources.log_dir.clone(),
                CleanupLogFiles::DEFAULT_MAX_AGE,
            )),
        );
        self.register_recovery_action(
            "reset_network_connections",
            Arc::new(ResetNetworkConnections::new(Arc::clone(&resources.breakers))),
        );
        self.register_recovery_action("alert_administrators", Arc::new(AlertAdministrators));

        self.register_health_check(
            HealthCheck::new(
                "filesystem_health",
                "Temp directory write/read probe",
                Arc::new(FilesystemProbe::new(resources.temp_dir.clone())),
                Thresholds::new(90.0, 60.0),
            )
            .with_recovery_actions(["cleanup_temp_files"]),
        );
        self.register_health_check(
            HealthCheck::new(
                "network_connectivity",
                "Outbound request success rate",
                Arc::new(NetworkConnectivityProbe::new(
                    Arc::clone(&resources.network),
                    resources.connectivity_urls.clone(),
                )),
                Thresholds::new(70.0, 50.0),
            )
            .with_recovery_actions(["reset_network_connections"]),
        );
        self.register_health_check(
            HealthCheck::new(
                "error_rate",
                "Errors recorded in the last hour",
                Arc::new(ErrorRateProbe::new(
                    Arc::clone(&resources.errors),
                    Duration::from_secs(3600),
                )),
                Thresholds::new(20.0, 50.0),
            )
            .with_recovery_actions(["clear_application_cache", "alert_administrators"]),
        );

        self.register_recovery_plan(RecoveryPlan::new(
            "network_issue_recovery",
            "network_connectivity < 60",
            vec![
                PlanAction::new("reset_network_connections", 1),
                PlanAction::new("alert_administrators", 2),
            ],
            2,
        )?);
        self.register_recovery_plan(RecoveryPlan::new(
            "error_storm_recovery",
            "error_rate > 50",
            vec![
                PlanAction::new("clear_application_cache", 1),
                PlanAction::new("cleanup_temp_files", 2),
                PlanAction::new("alert_administrators", 3),
            ],
            1,
        )?);
        self.register_recovery_plan(RecoveryPlan::new(
            "filesystem_recovery",
            "filesystem_health < 60",
            vec![
                PlanAction::new("cleanup_log_files", 1),
                PlanAction::new("cleanup_temp_files", 2),
            ],
            2,
        )?);

        if resources.host_metrics {
            self.register_host_metrics(resources)?;
        }

        tracing::info!(
            checks = self.checks.read().len(),
            plans = self.plans.lock().len(),
            "Builtin health checks and recovery plans registered"
        );
        Ok(())
    }

    fn register_host_metrics(&self, resources: &BuiltinResources) -> CallResult<()> {
        let sampler = SystemSampler::new();

        self.register_health_check(
            HealthCheck::new(
                "cpu_usage",
                "Global CPU usage",
                Arc::new(CpuUsageProbe::new(sampler.clone())),
                CPU_USAGE_THRESHOLDS,
            )
            .with_recovery_actions(["cleanup_temp_files"]),
        );
        self.register_health_check(
            HealthCheck::new(
                "memory_usage",
                "Used share of host memory",
                Arc::new(MemoryUsageProbe::new(sampler.clone())),
                MEMORY_USAGE_THRESHOLDS,
            )
            .with_recovery_actions(["clear_application_cache", "cleanup_temp_files"]),
        );
        self.register_health_check(
            HealthCheck::new(
                "disk_space",
                "Used share of the data disk",
                Arc::new(DiskSpaceProbe::new(resources.disk_path.clone())),
                DISK_SPACE_THRESHOLDS,
            )
            .with_recovery_actions(["cleanup_log_files", "cleanup_temp_files"]),
        );
        self.register_health_check(
            HealthCheck::new(
                "process_health",
                "CPU and memory held by this process",
                Arc::new(ProcessHealthProbe::current(sampler)?),
                PROCESS_HEALTH_THRESHOLDS,
            )
            .with_recovery_actions(["alert_administrators"]),
        );

        self.register_recovery_plan(RecoveryPlan::new(
            "high_cpu_recovery",
            "cpu_usage > 90",
            vec![
                PlanAction::new("cleanup_temp_files", 1),
                PlanAction::new("alert_administrators", 2),
            ],
            1,
        )?);
        self.register_recovery_plan(RecoveryPlan::new(
            "memory_shortage_recovery",
            "memory_usage > 90",
            vec![
                PlanAction::new("clear_application_cache", 1),
                PlanAction::new("alert_administrators", 2),
            ],
            1,
        )?);
        self.register_recovery_plan(RecoveryPlan::new(
            "disk_space_recovery",
            "disk_space > 90",
            vec![
                PlanAction::new("cleanup_log_files", 1),
                PlanAction::new("cleanup_temp_files", 2),
            ],
            2,
        )?);
        Ok(())
    }

    /// Run every enabled check once and remember each result on its check.
    pub async fn run_health_checks(&self) -> BTreeMap<String, CheckResult> {
        let checks: Vec<HealthCheck> = self
            .checks
            .read()
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect();

        let results = join_all(checks.iter().map(Self::run_check)).await;

        let mut registered = self.checks.write();
        for result in &results {
            if let Some(check) = registered.get_mut(&result.name) {
                check.last_check = Some(result.checked_at);
                check.last_result = Some(result.clone());
            }
        }
        drop(registered);

        results.into_iter().map(|r| (r.name.clone(), r)).collect()
    }

    /// Registered checks with their last results, by name.
    #[must_use]
    pub fn health_checks(&self) -> Vec<HealthCheck> {
        self.checks.read().values().cloned().collect()
    }

    /// Last result of every check that has run.
    #[must_use]
    pub fn last_results(&self) -> BTreeMap<String, CheckResult> {
        self.checks
            .read()
            .values()
            .filter_map(|c| c.last_result.clone().map(|r| (c.name.clone(), r)))
            .collect()
    }

    async fn run_check(check: &HealthCheck) -> CheckResult {
        let started = Instant::now();
        let outcome = check.probe.probe().await;
        let check_time = started.elapsed();

        match outcome {
            Ok(reading) => {
                observability::record_health_check(&check.name, reading.value);
                let status = check.thresholds.classify(reading.value);
                if status != HealthStatus::Healthy {
                    tracing::warn!(check = %check.name, value = reading.value, status = %status, "Health check degraded");
                }
                CheckResult {
                    name: check.name.clone(),
                    status,
                    value: Some(reading.value),
                    unit: Some(reading.unit),
                    details: reading.details,
                    error: None,
                    check_time,
                    checked_at: Utc::now(),
                }
            }
            Err(e) => {
                tracing::error!(check = %check.name, error = %e, "Health check failed");
                CheckResult {
                    name: check.name.clone(),
                    status: HealthStatus::Failed,
                    value: None,
                    unit: None,
                    details: serde_json::Value::Null,
                    error: Some(e.to_string()),
                    check_time,
                    checked_at: Utc::now(),
                }
            }
        }
    }

    /// Overall health of one cycle's results.
    #[must_use]
    pub fn evaluate_overall_health(results: &BTreeMap<String, CheckResult>) -> HealthStatus {
        if results.is_empty() {
            return HealthStatus::Healthy;
        }

        let total = results.len() as f64;
        let count = |status: HealthStatus| results.values().filter(|r| r.status == status).count();
        let failed = count(HealthStatus::Failed);
        let critical = count(HealthStatus::Critical);
        let warning = count(HealthStatus::Warning);

        if failed > 0 || critical as f64 > total * 0.5 {
            HealthStatus::Failed
        } else if critical > 0 || warning as f64 > total * 0.3 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }

    /// Run one monitoring cycle, recovering when the threshold is reached.
    pub async fn run_cycle(&self) -> HealthStatus {
        let results = self.run_health_checks().await;
        let overall = Self::evaluate_overall_health(&results);

        let trigger = {
            let mut state = self.state.lock();
            state.overall_health = overall;
            state.last_check_time = Some(Utc::now());
            if overall.is_unhealthy() {
                state.consecutive_failures += 1;
            } else {
                state.consecutive_failures = 0;
            }

            let trigger = state.consecutive_failures >= self.config.alert_threshold
                && self.config.auto_recovery
                && !state.recovery_in_progress;
            if trigger {
                state.recovery_in_progress = true;
                state.last_recovery_time = Some(Utc::now());
            }
            trigger
        };

        if overall == HealthStatus::Healthy {
            self.reset_plan_attempts();
        }
        observability::record_health_status(overall.gauge_value());
        self.publish();

        if trigger {
            self.trigger_recovery(&results).await;
        }
        self.state.lock().overall_health
    }

    async fn trigger_recovery(&self, results: &BTreeMap<String, CheckResult>) {
        let _guard = RecoveryGuard(self);
        let consecutive = self.state.lock().consecutive_failures;
        tracing::warn!(consecutive_failures = consecutive, "Automatic recovery triggered");

        let values: BTreeMap<String, f64> = results
            .values()
            .filter_map(|r| r.value.map(|v| (r.name.clone(), v)))
            .collect();

        let mut plans: Vec<RecoveryPlan> = {
            let now = Instant::now();
            let mut plans = self.plans.lock();
            plans
                .values_mut()
                .filter(|s| s.runnable(now) && s.plan.trigger.evaluate(&values))
                .map(|s| {
                    s.last_run = Some(now);
                    s.attempts += 1;
                    s.plan.clone()
                })
                .collect()
        };
        plans.sort_by_key(|p| p.priority);

        let runs: Vec<(String, Vec<String>)> = if plans.is_empty() {
            self.fallback_runs(results)
        } else {
            plans
                .iter()
                .map(|plan| {
                    tracing::info!(plan = %plan.id, trigger = %plan.trigger, "Recovery plan applies");
                    let actions = plan.ordered_actions().into_iter().map(|a| a.action.clone()).collect();
                    (plan.id.clone(), actions)
                })
                .collect()
        };

        if runs.is_empty() {
            tracing::warn!("No applicable recovery plan");
            return;
        }

        self.state.lock().overall_health = HealthStatus::Recovering;
        observability::record_health_status(HealthStatus::Recovering.gauge_value());
        self.publish();

        for (id, actions) in &runs {
            let record = self.execute_actions(id, actions).await;
            self.store_record(record);
        }

        tokio::time::sleep(self.config.settle_time).await;

        let recheck = self.run_health_checks().await;
        let overall = Self::evaluate_overall_health(&recheck);
        {
            let mut state = self.state.lock();
            state.overall_health = overall;
            state.last_check_time = Some(Utc::now());
            if overall == HealthStatus::Healthy {
                state.consecutive_failures = 0;
            }
        }
        observability::record_health_status(overall.gauge_value());

        if overall == HealthStatus::Healthy {
            self.reset_plan_attempts();
            tracing::info!(runs = runs.len(), "System recovered");
        } else {
            tracing::warn!(runs = runs.len(), status = %overall, "System still unhealthy after recovery");
        }
    }

    /// Per-check action lists for CRITICAL or FAILED checks outside their
    /// fallback cooldown. Ids are `<check>_fallback`.
    fn fallback_runs(&self, results: &BTreeMap<String, CheckResult>) -> Vec<(String, Vec<String>)> {
        let now = Instant::now();
        let checks = self.checks.read();
        let mut last_runs = self.fallback_runs.lock();

        results
            .values()
            .filter(|r| matches!(r.status, HealthStatus::Critical | HealthStatus::Failed))
            .filter_map(|r| {
                let check = checks.get(&r.name)?;
                if check.recovery_actions.is_empty() {
                    return None;
                }
                let cooled = last_runs
                    .get(&r.name)
                    .is_none_or(|at| now.saturating_duration_since(*at) >= DEFAULT_PLAN_COOLDOWN);
                if !cooled {
                    return None;
                }
                last_runs.insert(r.name.clone(), now);
                tracing::info!(check = %r.name, status = %r.status, "Running check recovery actions");
                Some((format!("{}_fallback", r.name), check.recovery_actions.clone()))
            })
            .collect()
    }

    async fn execute_actions(&self, plan_id: &str, actions: &[String]) -> RecoveryRecord {
        let started = Instant::now();
        let started_at = Utc::now();
        tracing::info!(plan = plan_id, actions = actions.len(), "Executing recovery plan");

        let mut executed = Vec::with_capacity(actions.len());
        for action in actions {
            let handler = self.actions.read().get(action).cloned();
            let (success, detail) = match handler {
                Some(handler) => match handler.run().await {
                    Ok(value) => (true, value),
                    Err(e) => {
                        tracing::warn!(plan = plan_id, action = %action, error = %e, "Recovery action failed");
                        (false, json!({ "error": e.to_string() }))
                    }
                },
                None => {
                    tracing::warn!(plan = plan_id, action = %action, "Unknown recovery action");
                    (false, json!({ "error": "unknown action" }))
                }
            };
            executed.push(ActionExecution {
                action: action.clone(),
                success,
                detail,
                timestamp: Utc::now(),
            });
        }

        let failed: Vec<&str> = executed
            .iter()
            .filter(|a| !a.success)
            .map(|a| a.action.as_str())
            .collect();
        let success = failed.is_empty();
        let error = (!success).then(|| format!("{} of {} actions failed: {}", failed.len(), executed.len(), failed.join(", ")));

        observability::record_recovery_plan(plan_id, success, started.elapsed().as_secs_f64());
        tracing::info!(plan = plan_id, success = success, actions = executed.len(), "Recovery plan finished");

        RecoveryRecord {
            plan_id: plan_id.to_string(),
            started_at,
            ended_at: Some(Utc::now()),
            actions_executed: executed,
            success,
            error,
        }
    }

    fn store_record(&self, record: RecoveryRecord) {
        if let Some(journal) = &self.journal
            && let Err(e) = journal.append(&record, record.started_at)
        {
            tracing::warn!(plan = %record.plan_id, error = %e, "Failed to persist recovery record");
        }
        self.history.lock().push(record);
    }

    fn reset_plan_attempts(&self) {
        for state in self.plans.lock().values_mut() {
            state.attempts = 0;
        }
    }

    /// Current status snapshot.
    #[must_use]
    pub fn get_system_status(&self) -> SystemStatus {
        let health_checks_count = self.checks.read().len();
        let recovery_plans_count = self.plans.lock().len();
        let state = self.state.lock();
        SystemStatus {
            overall_health: state.overall_health,
            last_check_time: state.last_check_time,
            consecutive_failures: state.consecutive_failures,
            recovery_in_progress: state.recovery_in_progress,
            last_recovery_time: state.last_recovery_time,
            monitoring_active: self.monitoring.load(Ordering::Acquire),
            health_checks_count,
            recovery_plans_count,
        }
    }

    /// The most recent `limit` recovery records, oldest first.
    #[must_use]
    pub fn get_recovery_history(&self, limit: usize) -> Vec<RecoveryRecord> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history[skip..].to_vec()
    }

    /// Status updates, published after every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SystemStatus> {
        self.status_tx.subscribe()
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.get_system_status());
    }

    /// Run cycles every `check_interval` until `shutdown` fires.
    pub async fn monitor(self: Arc<Self>, shutdown: CancellationToken) {
        if self.monitoring.swap(true, Ordering::AcqRel) {
            tracing::warn!("Health monitor already running");
            return;
        }
        self.publish();
        tracing::info!(interval = ?self.config.check_interval, "Health monitor started");

        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                () = shutdown.cancelled() => break,
                status = self.run_cycle() => {
                    tracing::debug!(status = %status, "Health cycle complete");
                }
            }
        }

        self.monitoring.store(false, Ordering::Release);
        self.publish();
        tracing::info!("Health monitor stopped");
    }
}
