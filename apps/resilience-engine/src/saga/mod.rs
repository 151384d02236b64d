//! Saga-style transactions with reverse-order compensation.
//!
//! ```rust,ignore
//! let id = manager.create_transaction("order", "buy and book");
//! manager.add_step(&id, StepDefinition::new("buy", "buy_order", place).rollback_handler("buy_order"))?;
//! manager.add_step(&id, StepDefinition::new("book", "balance_update", book))?;
//! let outcome = manager.execute(&id).await?;
//! ```

mod handlers;
mod manager;
mod middleware;
mod types;

pub use handlers::{
    CancelOrder, RestoreBalance, RestorePosition, RollbackHandler, RollbackNotice, default_compensation,
};
pub use manager::{InlineTransaction, TransactionManager};
pub use middleware::TransactionalMiddleware;
pub use types::{
    Compensation, CompensationAction, RollbackMethod, RollbackReport, StepAction, StepDefinition,
    StepRollback, Transaction, TransactionOutcome, TransactionStatistics, TransactionStatus,
    TransactionStep, TransactionSummary,
};
