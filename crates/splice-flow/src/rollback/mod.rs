//! Rollback planning, execution, triggering, and recovery.
//!
//! The rollback pipeline runs only on the failure path of an integration:
//! the planner derives a [`RollbackPlan`] from the forward change ledger,
//! the executor runs it producing a [`RollbackExecution`], the trigger
//! monitor decides *when* an automatic rollback starts, and the recovery
//! engine is consulted only when the rollback itself fails.

pub mod execute;
pub mod plan;
pub mod recovery;
pub mod trigger;

pub use execute::{
    ExecutionState, RollbackExecution, RollbackExecutor, RollbackResult, StepRecord, StepStatus,
};
pub use plan::{
    RollbackCommand, RollbackPlan, RollbackPlanner, RollbackStep, RollbackStepType, StepCondition,
};
pub use recovery::{
    RecoveryEngine, RecoveryOutcome, RecoveryScenario, RecoveryStep, RecoveryStrategy,
};
pub use trigger::{
    RollbackTrigger, SignalSource, StaticSignals, TriggerCondition, TriggerFired, TriggerMonitor,
    TriggerSeverity, TriggerSignals, TriggerType,
};
