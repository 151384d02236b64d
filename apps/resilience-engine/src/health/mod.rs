//! Health monitoring and automatic recovery.
//!
//! - [`HealthRecoveryManager`]: periodic checks, overall classification,
//!   recovery plans with cooldowns
//! - [`TriggerCondition`]: parsed plan triggers
//! - Builtin probes in [`checks`] and actions in [`actions`]

pub mod actions;
pub mod checks;
mod condition;
mod manager;
mod types;

pub use condition::{Comparator, Comparison, TriggerCondition};
pub use manager::{BuiltinResources, HealthConfig, HealthRecoveryManager, RECOVERY_JOURNAL_PREFIX};
pub use types::{
    ActionExecution, CheckResult, DEFAULT_PLAN_COOLDOWN, FnProbe, HealthCheck, HealthProbe,
    HealthReading, HealthStatus, PlanAction, RecoveryActionHandler, RecoveryPlan, RecoveryRecord,
    SystemStatus, Thresholds,
};
