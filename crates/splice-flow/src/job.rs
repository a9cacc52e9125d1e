//! Integration job tracking.
//!
//! A job is one execution attempt of applying a feature under a strategy,
//! capturing:
//!
//! - **State**: a validated state machine (`Pending` through terminal states)
//! - **Progress**: 0-100, updated at phase boundaries
//! - **Log trail**: ordered structured events, complete at every terminal state
//! - **Outcome**: the integration result on success, the error and any
//!   rollback outcome on failure
//!
//! A job is owned exclusively by the executor that created it and mutated
//! only by that execution path; everything else reads snapshots from the
//! store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use splice_core::{ExecutionId, FeatureId, JobId};

use crate::change::CodeChange;
use crate::config::BackupHandle;
use crate::error::{Error, Result};
use crate::events::LogEvent;
use crate::strategy::IntegrationStrategy;
use crate::testing::TestRunResult;
use crate::validate::{PerformanceDelta, ValidationResult};

/// Job state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Created, waiting to start.
    Pending,
    /// Actively executing phases.
    Running,
    /// All phases completed and validations passed.
    Completed,
    /// A phase failed.
    Failed,
    /// The failed job's changes were rolled back.
    RolledBack,
}

impl JobState {
    /// Returns true if this is a terminal state.
    ///
    /// `Failed` is not terminal: a failed job may still transition to
    /// `RolledBack`, exactly once.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::RolledBack)
    }

    /// Returns true if the transition from self to target is valid.
    ///
    /// `RolledBack` is reachable only from `Failed`.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Running | Self::Failed),
            Self::Running => matches!(target, Self::Completed | Self::Failed),
            Self::Failed => matches!(target, Self::RolledBack),
            Self::Completed | Self::RolledBack => false,
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// Outcome of the automatic rollback attached to a failed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    /// The rollback execution that was attempted.
    pub execution_id: ExecutionId,
    /// Whether the rollback completed.
    pub succeeded: bool,
    /// Summary for the log trail.
    pub summary: String,
}

/// Result of a successfully completed integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationResult {
    /// The job that produced this result.
    pub job_id: JobId,
    /// The integrated feature.
    pub feature_id: FeatureId,
    /// Changes in application order. Append-only: the rollback planner
    /// depends on this ordering.
    pub changes: Vec<CodeChange>,
    /// Per-tier test results.
    pub test_results: Vec<TestRunResult>,
    /// Measured performance deltas.
    pub performance: PerformanceDelta,
    /// Final validation results.
    pub validations: Vec<ValidationResult>,
    /// When the integration completed.
    pub completed_at: DateTime<Utc>,
}

/// One integration job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationJob {
    /// Unique job identifier.
    pub id: JobId,
    /// The feature being integrated.
    pub feature_id: FeatureId,
    /// Current state.
    pub state: JobState,
    /// The strategy the job runs under. Immutable for the job's lifetime.
    pub strategy: IntegrationStrategy,
    /// Progress, 0-100.
    pub progress: u8,
    /// Label of the phase currently executing.
    pub current_step: String,
    /// Ordered log trail.
    pub log: Vec<LogEvent>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job started executing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached `Completed` or `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// The result, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<IntegrationResult>,
    /// The failure description, once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Outcome of the automatic rollback, if one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackOutcome>,
    /// Backup taken before apply; rollback restores configuration from it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupHandle>,
}

impl IntegrationJob {
    /// Creates a pending job for a feature under a strategy.
    #[must_use]
    pub fn new(feature_id: FeatureId, strategy: IntegrationStrategy) -> Self {
        Self {
            id: JobId::generate(),
            feature_id,
            state: JobState::Pending,
            strategy,
            progress: 0,
            current_step: "created".into(),
            log: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            rollback: None,
            backup: None,
        }
    }

    /// Returns true if the job is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Transitions to a new state, updating timestamps.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is invalid.
    #[tracing::instrument(skip(self), fields(job_id = %self.id, from = %self.state, to = %target))]
    pub fn transition_to(&mut self, target: JobState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
                reason: "invalid job state transition".into(),
            });
        }

        let now = Utc::now();
        match target {
            JobState::Running => self.started_at = Some(now),
            JobState::Completed | JobState::Failed => self.completed_at = Some(now),
            _ => {}
        }

        self.state = target;
        Ok(())
    }

    /// Records progress and the currently executing step.
    pub fn set_progress(&mut self, progress: u8, step: impl Into<String>) {
        self.progress = progress.min(100);
        self.current_step = step.into();
    }

    /// Appends a log event to the job's trail.
    pub fn record(&mut self, event: LogEvent) {
        self.log.push(event);
    }

    /// Marks the job failed with the given error description.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in a state that can fail.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.error = Some(error.into());
        self.transition_to(JobState::Failed)
    }

    /// Marks the job completed with its result.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not running.
    pub fn complete(&mut self, result: IntegrationResult) -> Result<()> {
        self.result = Some(result);
        self.progress = 100;
        self.transition_to(JobState::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogLevel;

    fn job() -> IntegrationJob {
        IntegrationJob::new(FeatureId::generate(), IntegrationStrategy::direct())
    }

    #[test]
    fn job_state_happy_path() {
        let state = JobState::Pending;
        assert!(state.can_transition_to(JobState::Running));
        assert!(!state.can_transition_to(JobState::Completed));

        let state = JobState::Running;
        assert!(state.can_transition_to(JobState::Completed));
        assert!(state.can_transition_to(JobState::Failed));
    }

    #[test]
    fn rolled_back_only_from_failed() {
        assert!(JobState::Failed.can_transition_to(JobState::RolledBack));
        assert!(!JobState::Pending.can_transition_to(JobState::RolledBack));
        assert!(!JobState::Running.can_transition_to(JobState::RolledBack));
        assert!(!JobState::Completed.can_transition_to(JobState::RolledBack));
        // Only once: RolledBack is terminal.
        assert!(!JobState::RolledBack.can_transition_to(JobState::Failed));
        assert!(!JobState::RolledBack.can_transition_to(JobState::RolledBack));
    }

    #[test]
    fn transition_updates_timestamps() {
        let mut job = job();
        assert!(job.started_at.is_none());

        job.transition_to(JobState::Running).unwrap();
        assert!(job.started_at.is_some());

        job.fail("tests failed").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.completed_at.is_some());
        assert_eq!(job.error.as_deref(), Some("tests failed"));
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut job = job();
        let result = job.transition_to(JobState::Completed);
        assert!(matches!(
            result,
            Err(Error::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn failed_is_not_terminal_but_rolled_back_is() {
        assert!(!JobState::Failed.is_terminal());
        assert!(JobState::RolledBack.is_terminal());
        assert!(JobState::Completed.is_terminal());
    }

    #[test]
    fn record_appends_in_order() {
        let mut job = job();
        job.record(LogEvent::info("pre_validation", "checking prerequisites"));
        job.record(LogEvent::error("tests", "2 failures"));

        assert_eq!(job.log.len(), 2);
        assert_eq!(job.log[0].step, "pre_validation");
        assert_eq!(job.log[1].level, LogLevel::Error);
    }

    #[test]
    fn progress_is_clamped() {
        let mut job = job();
        job.set_progress(150, "apply");
        assert_eq!(job.progress, 100);
    }
}
