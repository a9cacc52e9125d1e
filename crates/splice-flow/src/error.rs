//! Error types for the integration orchestration domain.

use splice_core::{ExecutionId, JobId, PlanId, TriggerId};

/// The result type used throughout splice-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in integration and rollback operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A prerequisite for integration was not met (pre-mutation).
    #[error("prerequisite not met: {message}")]
    Prerequisite {
        /// Description of the unmet prerequisite.
        message: String,
    },

    /// The feature conflicts with existing system state (pre-mutation).
    #[error("integration conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// A declared feature dependency is unavailable (pre-mutation).
    #[error("missing dependency: {dependency}")]
    Dependency {
        /// The dependency that could not be resolved.
        dependency: String,
    },

    /// The strategy configuration is invalid for the feature.
    #[error("invalid strategy: {message}")]
    InvalidStrategy {
        /// Why the strategy was rejected.
        message: String,
    },

    /// An external command failed or could not be run.
    #[error("command '{command}' failed: {message}")]
    CommandExecution {
        /// The command that failed.
        command: String,
        /// Exit code or failure description.
        message: String,
    },

    /// A test tier reported failures.
    #[error("{tier} tests failed: {failed} of {total} cases")]
    TestFailure {
        /// The failing test tier.
        tier: String,
        /// Number of failed cases.
        failed: u32,
        /// Total cases run.
        total: u32,
    },

    /// A performance delta exceeded its threshold.
    #[error("performance regression: {metric} changed {delta_pct:.1}% (threshold {threshold_pct:.1}%)")]
    PerformanceRegression {
        /// The regressed metric.
        metric: String,
        /// Observed change in percent.
        delta_pct: f64,
        /// Allowed change in percent.
        threshold_pct: f64,
    },

    /// A required validation check failed.
    #[error("validation '{check}' failed: {message}")]
    Validation {
        /// The failing check name.
        check: String,
        /// Failure detail.
        message: String,
    },

    /// An integration job failed. Carries the job id so callers can fetch
    /// the partially-built job, its log trail, and any rollback outcome.
    #[error("integration job {job_id} failed: {source}")]
    IntegrationFailed {
        /// The failed job.
        job_id: JobId,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A rollback could not be planned or executed.
    #[error("rollback failure: {message}")]
    RollbackFailure {
        /// Description of the failure.
        message: String,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// A job was not found in the store.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The job ID that was not found.
        job_id: JobId,
    },

    /// A rollback plan was not found in the store.
    #[error("rollback plan not found: {plan_id}")]
    PlanNotFound {
        /// The plan ID that was not found.
        plan_id: PlanId,
    },

    /// A rollback execution was not found in the store.
    #[error("rollback execution not found: {execution_id}")]
    ExecutionNotFound {
        /// The execution ID that was not found.
        execution_id: ExecutionId,
    },

    /// A trigger was not found in the monitor.
    #[error("trigger not found: {trigger_id}")]
    TriggerNotFound {
        /// The trigger ID that was not found.
        trigger_id: TriggerId,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from splice-core.
    #[error("core error: {0}")]
    Core(#[from] splice_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a command-execution error from a failed output.
    #[must_use]
    pub fn command_failed(command: impl Into<String>, output: &splice_core::CommandOutput) -> Self {
        Self::CommandExecution {
            command: command.into(),
            message: format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
        }
    }

    /// Returns true when the failure happened before any system mutation.
    ///
    /// Pre-mutation failures surface directly with no rollback attempt.
    #[must_use]
    pub const fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            Self::Prerequisite { .. }
                | Self::Conflict { .. }
                | Self::Dependency { .. }
                | Self::InvalidStrategy { .. }
        )
    }
}
