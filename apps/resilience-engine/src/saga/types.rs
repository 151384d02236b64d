//! Transaction records and execution reports.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CallResult;

/// Lifecycle of a transaction or a single step.
///
/// Transactions only move forward:
/// `PENDING -> EXECUTING -> COMPLETED` or `EXECUTING -> FAILED -> ROLLED_BACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Created, not yet executed.
    Pending,
    /// Steps are running.
    Executing,
    /// Every step succeeded.
    Completed,
    /// A step failed; rollback pending.
    Failed,
    /// Completed steps were compensated.
    RolledBack,
}

impl TransactionStatus {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Executing => 1,
            Self::Completed | Self::Failed => 2,
            Self::RolledBack => 3,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Failed, Self::RolledBack) => true,
            (Self::Completed | Self::RolledBack, _) | (Self::Failed, _) => false,
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward action of a step. Receives the step parameters.
pub type StepAction = Arc<dyn Fn(Value) -> BoxFuture<'static, CallResult<Value>> + Send + Sync>;

/// Compensating action of a step. Receives a snapshot of the completed step.
pub type CompensationAction =
    Arc<dyn Fn(TransactionStep) -> BoxFuture<'static, CallResult<Value>> + Send + Sync>;

/// How a completed step is undone.
#[derive(Clone)]
pub enum Compensation {
    /// Run this action.
    Action(CompensationAction),
    /// Run the rollback handler registered under this name.
    Handler(String),
}

impl std::fmt::Debug for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Action(_) => f.write_str("Compensation::Action(..)"),
            Self::Handler(name) => f.debug_tuple("Compensation::Handler").field(name).finish(),
        }
    }
}

/// A step to add to a transaction.
#[derive(Clone)]
pub struct StepDefinition {
    pub(crate) name: String,
    pub(crate) operation: String,
    pub(crate) params: Value,
    pub(crate) action: StepAction,
    pub(crate) compensation: Option<Compensation>,
}

impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("operation", &self.operation)
            .field("params", &self.params)
            .field("compensation", &self.compensation)
            .finish_non_exhaustive()
    }
}

impl StepDefinition {
    /// Step `name` running `operation` via `action`.
    ///
    /// `operation` is the forward-action name, used to pick a default
    /// compensation when none is given.
    pub fn new<F, Fut>(name: impl Into<String>, operation: impl Into<String>, action: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CallResult<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            operation: operation.into(),
            params: Value::Null,
            action: Arc::new(move |params| Box::pin(action(params))),
            compensation: None,
        }
    }

    /// Parameters passed to the action and kept on the record.
    #[must_use]
    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Undo with an explicit action.
    #[must_use]
    pub fn compensate_with<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(TransactionStep) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CallResult<Value>> + Send + 'static,
    {
        self.compensation = Some(Compensation::Action(Arc::new(move |step| Box::pin(compensate(step)))));
        self
    }

    /// Undo with a registered rollback handler.
    #[must_use]
    pub fn rollback_handler(mut self, handler: impl Into<String>) -> Self {
        self.compensation = Some(Compensation::Handler(handler.into()));
        self
    }
}

/// Recorded state of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStep {
    /// `{transaction_id}_{n}`, numbered from 1.
    pub step_id: String,
    /// Step name.
    pub name: String,
    /// Forward operation name.
    pub operation: String,
    /// Parameters the action ran with.
    pub params: Value,
    /// Name of the rollback handler, when one was requested.
    pub rollback_handler: Option<String>,
    /// Step status.
    pub status: TransactionStatus,
    /// When the action finished. Unset while it runs.
    pub executed_at: Option<DateTime<Utc>>,
    /// Value returned by the action.
    pub result: Option<Value>,
    /// Failure message of the action.
    pub error: Option<String>,
}

/// Recorded state of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// `TXN_{YYYYmmdd_HHMMSS}_{8 hex}`.
    pub transaction_id: String,
    /// Caller-chosen category.
    pub transaction_type: String,
    /// Human-readable description.
    pub description: String,
    /// Steps in execution order.
    pub steps: Vec<TransactionStep>,
    /// Transaction status.
    pub status: TransactionStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When execution began.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution or rollback finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Free-form annotations.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

/// Which compensation undid a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackMethod {
    /// The step's own compensating action.
    Explicit,
    /// A registered rollback handler.
    Handler,
    /// Inferred from the operation name.
    Default,
}

/// Result of compensating one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRollback {
    /// Compensated step.
    pub step_id: String,
    /// Whether the compensation succeeded.
    pub success: bool,
    /// Compensation used.
    pub method: RollbackMethod,
    /// Value returned by the compensation.
    pub result: Option<Value>,
    /// Failure message of the compensation.
    pub error: Option<String>,
}

/// Result of rolling back a transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Rolled-back transaction.
    pub transaction_id: String,
    /// Steps a compensation was attempted for.
    pub rolled_back_steps: usize,
    /// Per-step results in compensation order.
    pub details: Vec<StepRollback>,
}

impl RollbackReport {
    /// Compensations that failed.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.details.iter().filter(|d| !d.success).count()
    }
}

/// Result of [`super::TransactionManager::execute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    /// Every step completed.
    pub success: bool,
    /// Executed transaction.
    pub transaction_id: String,
    /// Steps that completed.
    pub executed_steps: usize,
    /// Id of the step that failed.
    pub failed_step: Option<String>,
    /// Failure message of that step.
    pub error: Option<String>,
    /// Compensation results, present on failure.
    pub rollback: Option<RollbackReport>,
    /// Wall time including rollback.
    pub execution_time: Duration,
}

/// Status summary for one transaction.
///
/// Mirrors [`Transaction`] with step counts in place of the steps.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub transaction_id: String,
    pub transaction_type: String,
    pub description: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps_count: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
}

impl From<&Transaction> for TransactionSummary {
    fn from(txn: &Transaction) -> Self {
        let count = |status| txn.steps.iter().filter(|s| s.status == status).count();
        Self {
            transaction_id: txn.transaction_id.clone(),
            transaction_type: txn.transaction_type.clone(),
            description: txn.description.clone(),
            status: txn.status,
            created_at: txn.created_at,
            started_at: txn.started_at,
            completed_at: txn.completed_at,
            steps_count: txn.steps.len(),
            completed_steps: count(TransactionStatus::Completed),
            failed_steps: count(TransactionStatus::Failed),
        }
    }
}

/// Lifetime transaction counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatistics {
    /// Transactions created.
    pub total_transactions: u64,
    /// Completed transactions.
    pub successful_transactions: u64,
    /// Failed and not rolled back.
    pub failed_transactions: u64,
    /// Rolled back after a failure.
    pub rolled_back_transactions: u64,
    /// Successful share of all transactions, in percent.
    pub success_rate: f64,
    /// Rolled-back share of all transactions, in percent.
    pub rollback_rate: f64,
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(TransactionStatus::Pending, TransactionStatus::Executing, true)]
    #[test_case(TransactionStatus::Executing, TransactionStatus::Completed, true)]
    #[test_case(TransactionStatus::Executing, TransactionStatus::Failed, true)]
    #[test_case(TransactionStatus::Failed, TransactionStatus::RolledBack, true)]
    #[test_case(TransactionStatus::Executing, TransactionStatus::Pending, false)]
    #[test_case(TransactionStatus::Completed, TransactionStatus::RolledBack, false)]
    #[test_case(TransactionStatus::Failed, TransactionStatus::Completed, false)]
    #[test_case(TransactionStatus::RolledBack, TransactionStatus::Failed, false)]
    fn test_status_is_monotonic(from: TransactionStatus, to: TransactionStatus, allowed: bool) {
        assert_eq!(from.can_advance_to(to), allowed);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&TransactionStatus::RolledBack).expect("serialize");
        assert_eq!(json, "\"ROLLED_BACK\"");
    }
}
