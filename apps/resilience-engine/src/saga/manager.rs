//! Transaction manager.
//!
//! Steps run in order on the calling task. The first failure stops the
//! transaction and compensates the completed steps in reverse order. A
//! failing compensation is reported and the remaining ones still run. The
//! registry lock is only held between awaits, never across one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::time::Instant;

use super::handlers::{
    CancelOrder, RestoreBalance, RestorePosition, RollbackHandler, RollbackNotice, default_compensation,
};
use super::types::{
    Compensation, RollbackMethod, RollbackReport, StepAction, StepDefinition, StepRollback, Transaction,
    TransactionOutcome, TransactionStatistics, TransactionStatus, TransactionStep, TransactionSummary,
};
use crate::error::{CallResult, ResilienceError};
use crate::observability;

/// Runtime parts of a step that are not part of its record.
#[derive(Clone)]
struct StepRuntime {
    action: Option<StepAction>,
    compensation: Option<Compensation>,
}

struct TransactionEntry {
    record: Transaction,
    runtime: Vec<StepRuntime>,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    rolled_back: u64,
}

/// Single-step transaction opened by [`TransactionManager::begin_inline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineTransaction {
    /// Transaction id.
    pub transaction_id: String,
    /// Id of the only step.
    pub step_id: String,
    started: Instant,
}

/// Creates, executes and rolls back transactions.
pub struct TransactionManager {
    transactions: Mutex<HashMap<String, TransactionEntry>>,
    handlers: RwLock<HashMap<String, Arc<dyn RollbackHandler>>>,
    counters: Mutex<Counters>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("transactions", &self.transactions.lock().len())
            .field("handlers", &self.handler_names())
            .finish_non_exhaustive()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    /// Manager with the builtin rollback handlers registered.
    #[must_use]
    pub fn new() -> Self {
        let manager = Self {
            transactions: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
        };
        manager.register_rollback_handler("buy_order", Arc::new(CancelOrder::buy()));
        manager.register_rollback_handler("sell_order", Arc::new(CancelOrder::sell()));
        manager.register_rollback_handler("balance_update", Arc::new(RestoreBalance));
        manager.register_rollback_handler("position_update", Arc::new(RestorePosition));
        manager.register_rollback_handler("notification_send", Arc::new(RollbackNotice));
        manager
    }

    /// Register or replace the rollback handler for `operation`.
    pub fn register_rollback_handler(&self, operation: &str, handler: Arc<dyn RollbackHandler>) {
        self.handlers.write().insert(operation.to_string(), handler);
        tracing::debug!(operation = operation, "Rollback handler registered");
    }

    /// Registered handler names, sorted.
    #[must_use]
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Create a pending transaction and return its id.
    pub fn create_transaction(&self, transaction_type: &str, description: &str) -> String {
        let now = Utc::now();
        let id = format!(
            "TXN_{}_{}",
            now.format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        let record = Transaction {
            transaction_id: id.clone(),
            transaction_type: transaction_type.to_string(),
            description: description.to_string(),
            steps: Vec::new(),
            status: TransactionStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            context: Default::default(),
        };
        self.transactions.lock().insert(
            id.clone(),
            TransactionEntry {
                record,
                runtime: Vec::new(),
            },
        );
        self.counters.lock().total += 1;

        tracing::info!(transaction_id = %id, transaction_type = transaction_type, description = description, "Transaction created");
        id
    }

    /// Append a step. Returns the step id (`{transaction_id}_{n}`).
    pub fn add_step(&self, transaction_id: &str, step: StepDefinition) -> CallResult<String> {
        let mut transactions = self.transactions.lock();
        let entry = transactions
            .get_mut(transaction_id)
            .ok_or_else(|| ResilienceError::not_found("transaction", transaction_id))?;
        if entry.record.status != TransactionStatus::Pending {
            return Err(ResilienceError::InvalidState(format!(
                "cannot add steps to {transaction_id} in state {}",
                entry.record.status
            )));
        }

        let step_id = format!("{transaction_id}_{}", entry.record.steps.len() + 1);
        let rollback_handler = match &step.compensation {
            Some(Compensation::Handler(name)) => Some(name.clone()),
            _ => None,
        };
        entry.record.steps.push(TransactionStep {
            step_id: step_id.clone(),
            name: step.name,
            operation: step.operation,
            params: step.params,
            rollback_handler,
            status: TransactionStatus::Pending,
            executed_at: None,
            result: None,
            error: None,
        });
        entry.runtime.push(StepRuntime {
            action: Some(step.action),
            compensation: step.compensation,
        });
        drop(transactions);

        tracing::debug!(step_id = %step_id, "Transaction step added");
        Ok(step_id)
    }

    /// Execute a pending transaction.
    ///
    /// Step failures do not return `Err`; they produce an unsuccessful
    /// outcome carrying the rollback report.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidState` when the transaction is
    /// not pending.
    pub async fn execute(&self, transaction_id: &str) -> CallResult<TransactionOutcome> {
        let started = Instant::now();
        let (transaction_type, plan) = self.start(transaction_id)?;
        tracing::info!(transaction_id = transaction_id, steps = plan.len(), "Executing transaction");

        let mut executed = 0;
        for (index, (params, action)) in plan.into_iter().enumerate() {
            self.update_step(transaction_id, index, |step| {
                step.status = TransactionStatus::Executing;
            });

            let result = match action {
                Some(action) => action(params).await,
                None => Ok(Value::Null),
            };
            let finished_at = Utc::now();
            executed += 1;

            match result {
                Ok(value) => {
                    self.update_step(transaction_id, index, |step| {
                        step.status = TransactionStatus::Completed;
                        step.executed_at = Some(finished_at);
                        step.result = Some(value);
                    });
                }
                Err(error) => {
                    let message = error.to_string();
                    let failed_step = self.update_step(transaction_id, index, |step| {
                        step.status = TransactionStatus::Failed;
                        step.executed_at = Some(finished_at);
                        step.error = Some(message.clone());
                        step.step_id.clone()
                    });
                    tracing::error!(
                        transaction_id = transaction_id,
                        step_id = ?failed_step,
                        error = %message,
                        "Transaction step failed"
                    );

                    self.set_status(transaction_id, TransactionStatus::Failed);
                    let rollback = self.rollback(transaction_id).await;
                    self.finish_failed(&transaction_type, started);

                    return Ok(TransactionOutcome {
                        success: false,
                        transaction_id: transaction_id.to_string(),
                        executed_steps: executed,
                        failed_step,
                        error: Some(message),
                        rollback: Some(rollback),
                        execution_time: started.elapsed(),
                    });
                }
            }
        }

        self.set_status(transaction_id, TransactionStatus::Completed);
        self.counters.lock().successful += 1;
        let elapsed = started.elapsed();
        observability::record_transaction(&transaction_type, "completed", elapsed.as_secs_f64());
        tracing::info!(transaction_id = transaction_id, steps = executed, "Transaction completed");

        Ok(TransactionOutcome {
            success: true,
            transaction_id: transaction_id.to_string(),
            executed_steps: executed,
            failed_step: None,
            error: None,
            rollback: None,
            execution_time: elapsed,
        })
    }

    /// Move a pending transaction to EXECUTING and take its step plan.
    fn start(&self, transaction_id: &str) -> CallResult<(String, Vec<(Value, Option<StepAction>)>)> {
        let mut transactions = self.transactions.lock();
        let entry = transactions
            .get_mut(transaction_id)
            .ok_or_else(|| ResilienceError::not_found("transaction", transaction_id))?;
        if entry.record.status != TransactionStatus::Pending {
            return Err(ResilienceError::InvalidState(format!(
                "transaction {transaction_id} is {}, expected pending",
                entry.record.status
            )));
        }

        entry.record.status = TransactionStatus::Executing;
        entry.record.started_at = Some(Utc::now());
        let plan = entry
            .record
            .steps
            .iter()
            .zip(&entry.runtime)
            .map(|(step, runtime)| (step.params.clone(), runtime.action.clone()))
            .collect();
        Ok((entry.record.transaction_type.clone(), plan))
    }

    fn update_step<R>(
        &self,
        transaction_id: &str,
        index: usize,
        update: impl FnOnce(&mut TransactionStep) -> R,
    ) -> Option<R> {
        let mut transactions = self.transactions.lock();
        let step = transactions.get_mut(transaction_id)?.record.steps.get_mut(index)?;
        Some(update(step))
    }

    fn set_status(&self, transaction_id: &str, status: TransactionStatus) {
        let mut transactions = self.transactions.lock();
        let Some(entry) = transactions.get_mut(transaction_id) else {
            return;
        };
        let current = entry.record.status;
        if !current.can_advance_to(status) {
            tracing::warn!(
                transaction_id = transaction_id,
                from = %current,
                to = %status,
                "Ignoring non-monotonic status change"
            );
            return;
        }
        entry.record.status = status;
        if matches!(status, TransactionStatus::Completed | TransactionStatus::RolledBack) {
            entry.record.completed_at = Some(Utc::now());
        }
    }

    fn finish_failed(&self, transaction_type: &str, started: Instant) {
        {
            let mut counters = self.counters.lock();
            counters.failed += 1;
            counters.rolled_back += 1;
        }
        observability::record_transaction(transaction_type, "rolled_back", started.elapsed().as_secs_f64());
    }

    /// Compensate every completed step in reverse order and mark the
    /// transaction ROLLED_BACK.
    async fn rollback(&self, transaction_id: &str) -> RollbackReport {
        let completed: Vec<(TransactionStep, Option<Compensation>)> = {
            let transactions = self.transactions.lock();
            transactions.get(transaction_id).map_or_else(Vec::new, |entry| {
                entry
                    .record
                    .steps
                    .iter()
                    .zip(&entry.runtime)
                    .filter(|(step, _)| step.status == TransactionStatus::Completed)
                    .map(|(step, runtime)| (step.clone(), runtime.compensation.clone()))
                    .rev()
                    .collect()
            })
        };

        tracing::info!(transaction_id = transaction_id, steps = completed.len(), "Rolling back transaction");

        let mut details = Vec::with_capacity(completed.len());
        for (step, compensation) in completed {
            let detail = self.compensate(step, compensation).await;
            if !detail.success {
                tracing::error!(
                    transaction_id = transaction_id,
                    step_id = %detail.step_id,
                    error = ?detail.error,
                    "Step compensation failed"
                );
            }
            details.push(detail);
        }

        self.set_status(transaction_id, TransactionStatus::RolledBack);
        tracing::info!(transaction_id = transaction_id, "Transaction rolled back");

        RollbackReport {
            transaction_id: transaction_id.to_string(),
            rolled_back_steps: details.len(),
            details,
        }
    }

    async fn compensate(&self, step: TransactionStep, compensation: Option<Compensation>) -> StepRollback {
        let step_id = step.step_id.clone();
        let operation = step.operation.clone();

        let (method, result) = match compensation {
            Some(Compensation::Action(action)) => (RollbackMethod::Explicit, action(step).await),
            Some(Compensation::Handler(name)) => {
                let handler = self.handlers.read().get(&name).cloned();
                match handler {
                    Some(handler) => (RollbackMethod::Handler, handler.rollback(&step).await),
                    None => {
                        tracing::warn!(step_id = %step_id, handler = %name, "Rollback handler not found, using default");
                        (RollbackMethod::Default, Ok(default_compensation(&step)))
                    }
                }
            }
            None => (RollbackMethod::Default, Ok(default_compensation(&step))),
        };

        match result {
            Ok(value) => StepRollback {
                step_id,
                success: true,
                method,
                result: Some(value),
                error: None,
            },
            Err(error) => {
                observability::record_rollback_failure(&operation);
                StepRollback {
                    step_id,
                    success: false,
                    method,
                    result: None,
                    error: Some(error.to_string()),
                }
            }
        }
    }

    /// Open a single-step transaction for a call made outside the manager.
    ///
    /// The transaction and its step are EXECUTING on return. Close it with
    /// [`Self::complete_inline`] or [`Self::fail_inline`].
    pub fn begin_inline(&self, transaction_type: &str, description: &str, operation: &str) -> InlineTransaction {
        let transaction_id = self.create_transaction(transaction_type, description);
        let step_id = format!("{transaction_id}_1");
        let now = Utc::now();

        if let Some(entry) = self.transactions.lock().get_mut(&transaction_id) {
            entry.record.status = TransactionStatus::Executing;
            entry.record.started_at = Some(now);
            entry.record.steps.push(TransactionStep {
                step_id: step_id.clone(),
                name: operation.to_string(),
                operation: operation.to_string(),
                params: Value::Null,
                rollback_handler: None,
                status: TransactionStatus::Executing,
                executed_at: None,
                result: None,
                error: None,
            });
            entry.runtime.push(StepRuntime {
                action: None,
                compensation: None,
            });
        }

        InlineTransaction {
            transaction_id,
            step_id,
            started: Instant::now(),
        }
    }

    /// Mark an inline transaction completed.
    pub fn complete_inline(&self, inline: &InlineTransaction, result: Option<Value>) {
        let transaction_type = self.complete_step(&inline.transaction_id, TransactionStatus::Completed, result, None);
        self.set_status(&inline.transaction_id, TransactionStatus::Completed);
        self.counters.lock().successful += 1;
        if let Some(transaction_type) = transaction_type {
            observability::record_transaction(&transaction_type, "completed", inline.started.elapsed().as_secs_f64());
        }
    }

    /// Mark an inline transaction failed and roll it back.
    pub async fn fail_inline(&self, inline: &InlineTransaction, error: &ResilienceError) -> RollbackReport {
        let transaction_type = self
            .complete_step(
                &inline.transaction_id,
                TransactionStatus::Failed,
                None,
                Some(error.to_string()),
            )
            .unwrap_or_default();
        self.set_status(&inline.transaction_id, TransactionStatus::Failed);
        let report = self.rollback(&inline.transaction_id).await;
        self.finish_failed(&transaction_type, inline.started);
        report
    }

    fn complete_step(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Option<String> {
        let mut transactions = self.transactions.lock();
        let entry = transactions.get_mut(transaction_id)?;
        if let Some(step) = entry.record.steps.first_mut() {
            step.status = status;
            step.executed_at = Some(Utc::now());
            step.result = result;
            step.error = error;
        }
        Some(entry.record.transaction_type.clone())
    }

    /// Status summary for one transaction.
    #[must_use]
    pub fn get_transaction_status(&self, transaction_id: &str) -> Option<TransactionSummary> {
        self.transactions
            .lock()
            .get(transaction_id)
            .map(|entry| TransactionSummary::from(&entry.record))
    }

    /// Full record of one transaction.
    #[must_use]
    pub fn get_transaction(&self, transaction_id: &str) -> Option<Transaction> {
        self.transactions
            .lock()
            .get(transaction_id)
            .map(|entry| entry.record.clone())
    }

    /// Ids of the transactions held, oldest first.
    #[must_use]
    pub fn transaction_ids(&self) -> Vec<String> {
        let transactions = self.transactions.lock();
        let mut ids: Vec<(&String, chrono::DateTime<Utc>)> = transactions
            .iter()
            .map(|(id, entry)| (id, entry.record.created_at))
            .collect();
        ids.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Number of transactions held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.lock().len()
    }

    /// Whether no transactions are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.lock().is_empty()
    }

    /// Lifetime counters with success and rollback rates in percent.
    #[must_use]
    pub fn statistics(&self) -> TransactionStatistics {
        let counters = self.counters.lock();
        let rate = |n: u64| {
            if counters.total == 0 {
                0.0
            } else {
                n as f64 / counters.total as f64 * 100.0
            }
        };
        TransactionStatistics {
            total_transactions: counters.total,
            successful_transactions: counters.successful,
            failed_transactions: counters.failed,
            rolled_back_transactions: counters.rolled_back,
            success_rate: rate(counters.successful),
            rollback_rate: rate(counters.rolled_back),
        }
    }

    /// Drop transactions created more than `max_age` ago. Returns how many.
    ///
    /// Transactions still executing are kept. Counters are not affected.
    pub fn cleanup_old_transactions(&self, max_age: Duration) -> usize {
        let age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };
        let mut transactions = self.transactions.lock();
        let before = transactions.len();
        transactions.retain(|_, entry| {
            entry.record.created_at >= cutoff || entry.record.status == TransactionStatus::Executing
        });
        let removed = before - transactions.len();
        drop(transactions);

        if removed > 0 {
            tracing::info!(removed = removed, "Old transactions cleaned up");
        }
        removed
    }
}
