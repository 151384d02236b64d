//! Rollback handlers.
//!
//! A handler undoes one kind of completed step. Handlers are registered on
//! the [`super::TransactionManager`] by name and selected per step with
//! [`super::StepDefinition::rollback_handler`]. When a step names no
//! compensation, [`default_compensation`] infers one from the operation name.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::types::TransactionStep;
use crate::error::CallResult;

/// Undoes a completed step.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RollbackHandler: Send + Sync {
    /// Compensate `step`, returning a description of what was undone.
    async fn rollback(&self, step: &TransactionStep) -> CallResult<Value>;
}

fn order_id(step: &TransactionStep) -> Option<Value> {
    step.result
        .as_ref()
        .and_then(|r| r.get("order_id"))
        .filter(|id| !id.is_null())
        .cloned()
}

/// Cancels the order placed by a buy or sell step.
#[derive(Debug, Clone, Copy)]
pub struct CancelOrder {
    side: &'static str,
}

impl CancelOrder {
    /// Handler for buy orders.
    #[must_use]
    pub const fn buy() -> Self {
        Self { side: "buy" }
    }

    /// Handler for sell orders.
    #[must_use]
    pub const fn sell() -> Self {
        Self { side: "sell" }
    }
}

#[async_trait]
impl RollbackHandler for CancelOrder {
    async fn rollback(&self, step: &TransactionStep) -> CallResult<Value> {
        match order_id(step) {
            Some(id) => {
                tracing::info!(step_id = %step.step_id, side = self.side, order_id = %id, "Cancelling order");
                Ok(json!({ "cancelled_order": id, "status": "cancelled" }))
            }
            None => Ok(json!({ "status": "no_order_to_cancel" })),
        }
    }
}

/// Restores the balance recorded in the step's `old_balance` parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreBalance;

#[async_trait]
impl RollbackHandler for RestoreBalance {
    async fn rollback(&self, step: &TransactionStep) -> CallResult<Value> {
        match step.params.get("old_balance").filter(|b| !b.is_null()) {
            Some(balance) => {
                tracing::info!(step_id = %step.step_id, balance = %balance, "Restoring balance");
                Ok(json!({ "restored_balance": balance, "status": "restored" }))
            }
            None => Ok(json!({ "status": "no_balance_to_restore" })),
        }
    }
}

/// Restores the position state before the step.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestorePosition;

#[async_trait]
impl RollbackHandler for RestorePosition {
    async fn rollback(&self, step: &TransactionStep) -> CallResult<Value> {
        tracing::info!(step_id = %step.step_id, "Restoring position");
        Ok(json!({ "status": "position_restored" }))
    }
}

/// Sends a notice that an earlier notification was rolled back.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackNotice;

#[async_trait]
impl RollbackHandler for RollbackNotice {
    async fn rollback(&self, step: &TransactionStep) -> CallResult<Value> {
        tracing::info!(step_id = %step.step_id, "Sending rollback notice");
        Ok(json!({ "status": "rollback_notification_sent" }))
    }
}

/// Compensation inferred from the forward operation name.
#[must_use]
pub fn default_compensation(step: &TransactionStep) -> Value {
    let operation = step.operation.to_lowercase();
    if operation.contains("buy") {
        json!({ "action": "cancel_buy_order", "order_id": order_id(step) })
    } else if operation.contains("sell") {
        json!({ "action": "cancel_sell_order", "order_id": order_id(step) })
    } else if operation.contains("balance") {
        json!({ "action": "restore_balance", "original_balance": step.params.get("old_balance") })
    } else if operation.contains("position") {
        json!({ "action": "restore_position", "step_name": step.name })
    } else if operation.contains("notification") {
        json!({ "action": "send_rollback_notice", "step_name": step.name })
    } else {
        json!({ "action": "generic_rollback", "step_name": step.name })
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::saga::TransactionStatus;

    fn step(operation: &str, params: Value, result: Option<Value>) -> TransactionStep {
        TransactionStep {
            step_id: "TXN_1_1".to_string(),
            name: "step".to_string(),
            operation: operation.to_string(),
            params,
            rollback_handler: None,
            status: TransactionStatus::Completed,
            executed_at: None,
            result,
            error: None,
        }
    }

    #[test_case("place_buy_order", "cancel_buy_order")]
    #[test_case("SELL_position", "cancel_sell_order")]
    #[test_case("balance_update", "restore_balance")]
    #[test_case("position_update", "restore_position")]
    #[test_case("notification_send", "send_rollback_notice")]
    #[test_case("refresh_cache", "generic_rollback")]
    fn test_default_compensation_by_operation(operation: &str, action: &str) {
        let value = default_compensation(&step(operation, Value::Null, None));
        assert_eq!(value["action"], action);
    }

    #[test]
    fn test_default_buy_carries_order_id() {
        let value = default_compensation(&step("buy", Value::Null, Some(json!({ "order_id": "B1" }))));
        assert_eq!(value["order_id"], "B1");
    }

    #[tokio::test]
    async fn test_cancel_order_without_result() {
        let value = CancelOrder::buy()
            .rollback(&step("buy", Value::Null, None))
            .await
            .expect("rollback");
        assert_eq!(value["status"], "no_order_to_cancel");
    }

    #[tokio::test]
    async fn test_restore_balance() {
        let value = RestoreBalance
            .rollback(&step("balance_update", json!({ "old_balance": 10_000 }), None))
            .await
            .expect("rollback");
        assert_eq!(value["restored_balance"], 10_000);
        assert_eq!(value["status"], "restored");
    }
}
