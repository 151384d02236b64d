//! Pipeline layer that records each call as a single-step transaction.

use std::sync::Arc;

use async_trait::async_trait;

use super::manager::TransactionManager;
use crate::error::CallResult;
use crate::resilience::{CallContext, Middleware, Next};

/// Wraps the rest of the pipeline in a transaction of `transaction_type`.
///
/// On failure the transaction is rolled back and the error returned
/// unchanged. An empty description falls back to the call origin.
#[derive(Debug, Clone)]
pub struct TransactionalMiddleware {
    manager: Arc<TransactionManager>,
    transaction_type: String,
    description: String,
}

impl TransactionalMiddleware {
    /// Layer recording into `manager`.
    #[must_use]
    pub fn new(
        manager: Arc<TransactionManager>,
        transaction_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            transaction_type: transaction_type.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Middleware<T> for TransactionalMiddleware {
    fn name(&self) -> &'static str {
        "transactional"
    }

    async fn handle<'a>(&self, ctx: &'a CallContext, next: Next<'a, T>) -> CallResult<T> {
        let description = ctx
            .metadata
            .get("description")
            .map(String::as_str)
            .or_else(|| (!self.description.is_empty()).then_some(self.description.as_str()))
            .unwrap_or(ctx.origin.as_str());
        let inline = self
            .manager
            .begin_inline(&self.transaction_type, description, &ctx.origin);

        match next.run(ctx).await {
            Ok(value) => {
                self.manager.complete_inline(&inline, None);
                Ok(value)
            }
            Err(error) => {
                tracing::error!(
                    transaction_id = %inline.transaction_id,
                    origin = %ctx.origin,
                    error = %error,
                    "Transactional call failed"
                );
                self.manager.fail_inline(&inline, &error).await;
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResilienceError;
    use crate::resilience::Pipeline;
    use crate::saga::TransactionStatus;

    #[tokio::test]
    async fn test_success_completes_transaction() {
        let manager = Arc::new(TransactionManager::new());
        let pipeline = Pipeline::<u32>::new("submit_order").transactional(
            Arc::clone(&manager),
            "order",
            "buy 10 AAPL",
        );

        assert_eq!(pipeline.execute(|| async { Ok(3) }).await, Ok(3));
        let stats = manager.statistics();
        assert_eq!(stats.total_transactions, 1);
        assert_eq!(stats.successful_transactions, 1);
        let txn = manager.get_transaction(&manager.transaction_ids()[0]).expect("txn");
        assert_eq!(txn.description, "buy 10 AAPL");
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_reraises() {
        let manager = Arc::new(TransactionManager::new());
        let pipeline = Pipeline::<u32>::new("submit_order").transactional(Arc::clone(&manager), "order", "");

        let err = pipeline
            .execute(|| async { Err(ResilienceError::trading("rejected")) })
            .await
            .expect_err("call fails");
        assert_eq!(err, ResilienceError::trading("rejected"));

        let stats = manager.statistics();
        assert_eq!(stats.failed_transactions, 1);
        assert_eq!(stats.rolled_back_transactions, 1);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_inline_step_named_after_origin() {
        let manager = TransactionManager::new();
        let inline = manager.begin_inline("balance", "update_balance", "update_balance");
        let report = manager.fail_inline(&inline, &ResilienceError::system("disk")).await;
        assert_eq!(report.rolled_back_steps, 0);

        let txn = manager.get_transaction(&inline.transaction_id).expect("txn");
        assert_eq!(txn.status, TransactionStatus::RolledBack);
        assert_eq!(txn.steps.len(), 1);
        assert_eq!(txn.steps[0].name, "update_balance");
        assert_eq!(txn.steps[0].status, TransactionStatus::Failed);
        assert_eq!(inline.step_id, format!("{}_1", inline.transaction_id));
    }
}
