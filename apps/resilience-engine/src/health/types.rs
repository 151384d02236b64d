//! Health checks, recovery plans and their results.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::condition::TriggerCondition;
use crate::error::{CallResult, ResilienceError};
use crate::observability::health_status;

/// Health of one check or of the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Within thresholds.
    Healthy,
    /// Past the warning threshold.
    Warning,
    /// Past the critical threshold.
    Critical,
    /// Recovery plans are running.
    Recovering,
    /// The check itself failed, or most checks are critical.
    Failed,
}

impl HealthStatus {
    /// Whether the status counts toward the unhealthy-cycle threshold.
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Warning | Self::Critical | Self::Failed)
    }

    /// Gauge value for metrics.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Healthy => health_status::HEALTHY,
            Self::Warning => health_status::WARNING,
            Self::Critical => health_status::CRITICAL,
            Self::Recovering => health_status::RECOVERING,
            Self::Failed => health_status::FAILED,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "HEALTHY",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Recovering => "RECOVERING",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Warning and critical thresholds for a numeric reading.
///
/// When `critical < warning` lower readings are worse (scores, success
/// rates); otherwise higher readings are worse (usage, error counts).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Warning threshold.
    pub warning: f64,
    /// Critical threshold.
    pub critical: f64,
}

impl Thresholds {
    /// Create thresholds.
    #[must_use]
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    /// Whether lower readings are worse.
    #[must_use]
    pub fn lower_is_worse(&self) -> bool {
        self.critical < self.warning
    }

    /// Classify a reading.
    #[must_use]
    pub fn classify(&self, value: f64) -> HealthStatus {
        if self.lower_is_worse() {
            if value <= self.critical {
                HealthStatus::Critical
            } else if value <= self.warning {
                HealthStatus::Warning
            } else {
                HealthStatus::Healthy
            }
        } else if value >= self.critical {
            HealthStatus::Critical
        } else if value >= self.warning {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }
}

/// A numeric reading produced by a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReading {
    /// Compared against the thresholds.
    pub value: f64,
    /// Unit label (`%`, `score`, `count`).
    pub unit: String,
    /// Probe-specific details.
    #[serde(default)]
    pub details: Value,
}

impl HealthReading {
    /// Reading without details.
    #[must_use]
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
            details: Value::Null,
        }
    }

    /// Attach details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Produces a reading for a health check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Take a reading. An error marks the check FAILED for this cycle.
    async fn probe(&self) -> CallResult<HealthReading>;
}

/// Probe backed by a closure.
pub struct FnProbe<F>(pub F);

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = CallResult<HealthReading>> + Send,
{
    async fn probe(&self) -> CallResult<HealthReading> {
        (self.0)().await
    }
}

/// A registered health check.
#[derive(Clone)]
pub struct HealthCheck {
    /// Unique name, referenced by trigger conditions.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Reading source.
    pub probe: Arc<dyn HealthProbe>,
    /// Classification thresholds.
    pub thresholds: Thresholds,
    /// Actions run, in order, when this check is CRITICAL or FAILED and no
    /// recovery plan applies.
    pub recovery_actions: Vec<String>,
    /// Disabled checks are skipped.
    pub enabled: bool,
    /// When the check last ran.
    pub last_check: Option<DateTime<Utc>>,
    /// Outcome of the last run.
    pub last_result: Option<CheckResult>,
}

impl std::fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheck")
            .field("name", &self.name)
            .field("thresholds", &self.thresholds)
            .field("recovery_actions", &self.recovery_actions)
            .field("enabled", &self.enabled)
            .field("last_check", &self.last_check)
            .finish_non_exhaustive()
    }
}

impl HealthCheck {
    /// Enabled check without associated actions.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        probe: Arc<dyn HealthProbe>,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            probe,
            thresholds,
            recovery_actions: Vec::new(),
            enabled: true,
            last_check: None,
            last_result: None,
        }
    }

    /// Check backed by a closure.
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        thresholds: Thresholds,
        probe: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CallResult<HealthReading>> + Send + 'static,
    {
        Self::new(name, description, Arc::new(FnProbe(probe)), thresholds)
    }

    /// Associate recovery actions.
    #[must_use]
    pub fn with_recovery_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recovery_actions = actions.into_iter().map(Into::into).collect();
        self
    }

    /// Disable the check.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Result of one check in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name.
    pub name: String,
    /// Classification.
    pub status: HealthStatus,
    /// Reading, absent when the probe failed.
    pub value: Option<f64>,
    /// Unit label.
    pub unit: Option<String>,
    /// Probe details.
    pub details: Value,
    /// Probe error, when FAILED.
    pub error: Option<String>,
    /// Probe duration.
    pub check_time: Duration,
    /// When the probe finished.
    pub checked_at: DateTime<Utc>,
}

/// A named step of a recovery plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAction {
    /// Registered recovery action name.
    pub action: String,
    /// Lower runs first.
    pub priority: u32,
}

impl PlanAction {
    /// Create a plan action.
    pub fn new(action: impl Into<String>, priority: u32) -> Self {
        Self {
            action: action.into(),
            priority,
        }
    }
}

/// Default time before a plan may run again.
pub const DEFAULT_PLAN_COOLDOWN: Duration = Duration::from_secs(300);

/// Ordered recovery actions run when a condition holds.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPlan {
    /// Unique id.
    pub id: String,
    /// When the plan applies.
    pub trigger: TriggerCondition,
    /// Actions, run in priority order.
    pub actions: Vec<PlanAction>,
    /// Lower runs first among applicable plans.
    pub priority: u32,
    /// Runs allowed before the system is seen healthy again.
    pub max_attempts: u32,
    /// Minimum time between runs, regardless of outcome.
    pub cooldown: Duration,
    /// Disabled plans never run.
    pub enabled: bool,
}

impl RecoveryPlan {
    /// Parse `trigger` and build an enabled plan with default limits.
    pub fn new(
        id: impl Into<String>,
        trigger: &str,
        actions: Vec<PlanAction>,
        priority: u32,
    ) -> Result<Self, ResilienceError> {
        Ok(Self {
            id: id.into(),
            trigger: TriggerCondition::parse(trigger)?,
            actions,
            priority,
            max_attempts: 3,
            cooldown: DEFAULT_PLAN_COOLDOWN,
            enabled: true,
        })
    }

    /// Override the cooldown.
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Override the attempt limit.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Actions in execution order. Equal priorities keep their listed order.
    #[must_use]
    pub fn ordered_actions(&self) -> Vec<&PlanAction> {
        let mut actions: Vec<&PlanAction> = self.actions.iter().collect();
        actions.sort_by_key(|a| a.priority);
        actions
    }
}

/// Performs a named recovery action.
#[async_trait]
pub trait RecoveryActionHandler: Send + Sync {
    /// Run the action, returning what it did.
    async fn run(&self) -> CallResult<Value>;
}

/// One action run within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecution {
    /// Action name.
    pub action: String,
    /// Whether it succeeded.
    pub success: bool,
    /// Returned value or failure description.
    #[serde(default)]
    pub detail: Value,
    /// When it finished.
    pub timestamp: DateTime<Utc>,
}

/// One plan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// Plan id.
    pub plan_id: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Actions in execution order.
    #[serde(default)]
    pub actions_executed: Vec<ActionExecution>,
    /// Every action succeeded.
    #[serde(default)]
    pub success: bool,
    /// Failure summary.
    #[serde(default)]
    pub error: Option<String>,
}

/// Snapshot returned by `get_system_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Latest overall health.
    pub overall_health: HealthStatus,
    /// When the last cycle finished.
    pub last_check_time: Option<DateTime<Utc>>,
    /// Consecutive unhealthy cycles.
    pub consecutive_failures: u32,
    /// Recovery plans are running.
    pub recovery_in_progress: bool,
    /// When recovery last started.
    pub last_recovery_time: Option<DateTime<Utc>>,
    /// The monitor loop is running.
    pub monitoring_active: bool,
    /// Registered checks.
    pub health_checks_count: usize,
    /// Registered plans.
    pub recovery_plans_count: usize,
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(Thresholds::new(80.0, 95.0), 50.0, HealthStatus::Healthy; "usage low")]
    #[test_case(Thresholds::new(80.0, 95.0), 80.0, HealthStatus::Warning; "usage warning")]
    #[test_case(Thresholds::new(80.0, 95.0), 99.0, HealthStatus::Critical; "usage critical")]
    #[test_case(Thresholds::new(70.0, 50.0), 100.0, HealthStatus::Healthy; "rate high")]
    #[test_case(Thresholds::new(70.0, 50.0), 65.0, HealthStatus::Warning; "rate warning")]
    #[test_case(Thresholds::new(70.0, 50.0), 50.0, HealthStatus::Critical; "rate critical")]
    fn test_classify(thresholds: Thresholds, value: f64, expected: HealthStatus) {
        assert_eq!(thresholds.classify(value), expected);
    }

    #[test]
    fn test_ordered_actions_stable() {
        let plan = RecoveryPlan::new(
            "p",
            "x > 1",
            vec![
                PlanAction::new("third", 3),
                PlanAction::new("first_a", 1),
                PlanAction::new("first_b", 1),
            ],
            1,
        )
        .expect("plan");
        let names: Vec<&str> = plan.ordered_actions().iter().map(|a| a.action.as_str()).collect();
        assert_eq!(names, vec!["first_a", "first_b", "third"]);
        assert_eq!(plan.cooldown, DEFAULT_PLAN_COOLDOWN);
    }

    #[test]
    fn test_record_tolerates_missing_fields() {
        let record: RecoveryRecord =
            serde_json::from_str(r#"{"plan_id":"p","started_at":"2026-01-01T00:00:00Z"}"#).expect("parse");
        assert!(record.actions_executed.is_empty());
        assert!(!record.success);
        assert!(record.ended_at.is_none());
    }
}
