//! Rollback plan execution.
//!
//! The executor runs one [`RollbackPlan`] to a terminal
//! [`RollbackExecution`]. Steps run strictly in plan order; cancellation is
//! cooperative and takes effect only between steps. A failed execution
//! consults the recovery engine once and is never automatically retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use splice_core::{CommandRunner, CommandSpec, ExecutionId, FileStore, JobId, PlanId, StepId};

use crate::config::{BackupHandle, ConfigMerger};
use crate::error::{Error, Result};
use crate::events::LogEvent;
use crate::job::JobState;
use crate::store::{ExecutionFilter, Store};

use super::plan::{RollbackPlan, RollbackStep, RollbackStepType};
use super::recovery::{RecoveryEngine, RecoveryOutcome, RecoveryScenario};

/// Lifecycle state of a rollback execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    /// Created, not yet started.
    Pending,
    /// Steps are running.
    Running,
    /// All steps and validations succeeded.
    Completed,
    /// A critical step or validation failed.
    Failed,
    /// Cancelled before or between steps.
    Cancelled,
}

impl ExecutionState {
    /// Returns true for states with no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition to `target` is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Running | Self::Cancelled),
            Self::Running => matches!(target, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// How one step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// All commands succeeded, or a failure was tolerated.
    Completed,
    /// A command failed and the step marks failures.
    Failed,
    /// A precondition was unmet.
    Skipped,
}

/// Record of one executed (or skipped) step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// The plan step this records.
    pub step_id: StepId,
    /// Step description, copied for self-contained logs.
    pub description: String,
    /// How the step ended.
    pub status: StepStatus,
    /// Failure or skip detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the step started.
    pub started_at: DateTime<Utc>,
    /// When the step finished.
    pub finished_at: DateTime<Utc>,
}

/// Aggregate outcome of a finished execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    /// Steps that completed.
    pub completed_steps: u32,
    /// Steps that failed.
    pub failed_steps: u32,
    /// Steps skipped on unmet conditions.
    pub skipped_steps: u32,
    /// Total wall-clock duration.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Whether code state was restored.
    pub data_restored: bool,
    /// Whether configuration was restored.
    pub config_restored: bool,
}

/// One run of a rollback plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackExecution {
    /// Execution identifier.
    pub id: ExecutionId,
    /// The plan being executed.
    pub plan_id: PlanId,
    /// The job being rolled back.
    pub job_id: JobId,
    /// Current state.
    pub state: ExecutionState,
    /// Progress, 0-100.
    pub progress: u8,
    /// Per-step records, in execution order.
    pub steps: Vec<StepRecord>,
    /// Ordered log trail.
    pub log: Vec<LogEvent>,
    /// Who started this execution ("automatic", "manual", an operator id).
    pub triggered_by: String,
    /// Why the rollback was started.
    pub reason: String,
    /// When the execution was created.
    pub created_at: DateTime<Utc>,
    /// When steps started running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Aggregate result, once terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RollbackResult>,
    /// Recovery outcome, when the execution failed and recovery ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryOutcome>,
}

impl RollbackExecution {
    /// Creates a pending execution for a plan.
    #[must_use]
    pub fn new(
        plan: &RollbackPlan,
        triggered_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: ExecutionId::generate(),
            plan_id: plan.id,
            job_id: plan.job_id,
            state: ExecutionState::Pending,
            progress: 0,
            steps: Vec::new(),
            log: Vec::new(),
            triggered_by: triggered_by.into(),
            reason: reason.into(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            recovery: None,
        }
    }

    /// Transitions to a new state, updating timestamps.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is invalid.
    #[tracing::instrument(skip(self), fields(execution_id = %self.id, from = %self.state, to = %target))]
    pub fn transition_to(&mut self, target: ExecutionState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
                reason: "invalid execution state transition".into(),
            });
        }

        let now = Utc::now();
        if target == ExecutionState::Running {
            self.started_at = Some(now);
        }
        if target.is_terminal() {
            self.finished_at = Some(now);
        }

        self.state = target;
        Ok(())
    }

    /// Appends a log event.
    pub fn record(&mut self, event: LogEvent) {
        self.log.push(event);
    }

    fn tally(&self, duration: Duration, executed: &[&RollbackStep]) -> RollbackResult {
        let completed = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        let failed = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count();
        let skipped = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Skipped)
            .count();

        let restored = |step_type: RollbackStepType| {
            self.steps.iter().any(|record| {
                record.status == StepStatus::Completed
                    && executed
                        .iter()
                        .any(|step| step.id == record.step_id && step.step_type == step_type)
            })
        };

        RollbackResult {
            completed_steps: completed as u32,
            failed_steps: failed as u32,
            skipped_steps: skipped as u32,
            duration,
            data_restored: restored(RollbackStepType::CodeRevert),
            config_restored: restored(RollbackStepType::ConfigRestore),
        }
    }
}

/// How a step left the execution.
enum StepDisposition {
    Continue,
    Abort,
}

/// The pre-apply backup a rollback restores from.
struct BackupRestorer {
    merger: ConfigMerger,
    handle: BackupHandle,
}

/// Runs rollback plans to terminal executions.
pub struct RollbackExecutor {
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn Store>,
    recovery: RecoveryEngine,
    environment: HashMap<String, bool>,
    backup: Option<BackupRestorer>,
}

impl RollbackExecutor {
    /// Creates an executor with the default recovery engine and an empty
    /// condition environment.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, store: Arc<dyn Store>) -> Self {
        Self {
            runner,
            store,
            recovery: RecoveryEngine::new(),
            environment: HashMap::new(),
            backup: None,
        }
    }

    /// Attaches the backup taken before the forward apply.
    ///
    /// Sets the `backup_available` condition from the handle, and makes
    /// `ConfigRestore` steps restore the backed-up contents before running
    /// their commands.
    #[must_use]
    pub fn with_backup(mut self, files: Arc<dyn FileStore>, handle: BackupHandle) -> Self {
        self.environment
            .insert("backup_available".into(), !handle.is_empty());
        self.backup = Some(BackupRestorer {
            merger: ConfigMerger::new(files),
            handle,
        });
        self
    }

    /// Overrides the recovery engine.
    #[must_use]
    pub fn with_recovery(mut self, recovery: RecoveryEngine) -> Self {
        self.recovery = recovery;
        self
    }

    /// Sets a named condition used by prerequisite and step evaluation.
    #[must_use]
    pub fn with_condition(mut self, name: impl Into<String>, met: bool) -> Self {
        self.environment.insert(name.into(), met);
        self
    }

    fn condition_met(&self, name: &str) -> bool {
        self.environment.get(name).copied().unwrap_or(false)
    }

    /// Executes a plan to a terminal state.
    ///
    /// The returned execution is `Completed`, `Failed`, or `Cancelled` and
    /// has been persisted. Command failures are reflected in the execution,
    /// not surfaced as errors.
    ///
    /// # Errors
    ///
    /// Returns an error when the plan was already rolled back, a
    /// prerequisite is unmet, or storage fails.
    #[tracing::instrument(skip(self, plan), fields(plan_id = %plan.id, job_id = %plan.job_id))]
    pub async fn execute(
        &self,
        plan: &RollbackPlan,
        triggered_by: impl Into<String> + std::fmt::Debug,
        reason: impl Into<String> + std::fmt::Debug,
    ) -> Result<RollbackExecution> {
        self.reject_double_rollback(plan).await?;

        for prerequisite in &plan.prerequisites {
            if !self.condition_met(prerequisite) {
                return Err(Error::RollbackFailure {
                    message: format!("prerequisite '{prerequisite}' not met"),
                });
            }
        }

        let mut execution = RollbackExecution::new(plan, triggered_by, reason);
        self.store.save_execution(&execution).await?;

        execution.transition_to(ExecutionState::Running)?;
        execution.record(LogEvent::info(
            "rollback",
            format!("executing {} step(s)", plan.total_steps()),
        ));
        self.store.save_execution(&execution).await?;

        let started = Instant::now();
        let total = plan.total_steps();
        let mut executed: Vec<&RollbackStep> = Vec::new();
        let mut aborted = false;

        for step in plan.steps.iter().chain(&plan.validation_steps) {
            if self.store.is_cancel_requested(&execution.id).await? {
                execution.record(LogEvent::warn("rollback", "cancel requested, stopping"));
                execution.result = Some(execution.tally(started.elapsed(), &executed));
                execution.transition_to(ExecutionState::Cancelled)?;
                self.store.save_execution(&execution).await?;
                return Ok(execution);
            }

            executed.push(step);
            let disposition = self.run_step(step, &mut execution).await?;
            execution.progress = progress_pct(execution.steps.len(), total);
            self.store.save_execution(&execution).await?;

            if matches!(disposition, StepDisposition::Abort) {
                aborted = true;
                break;
            }
        }

        let duration = started.elapsed();
        metrics::histogram!("splice_rollback_duration_seconds").record(duration.as_secs_f64());
        execution.result = Some(execution.tally(duration, &executed));

        if aborted {
            execution.transition_to(ExecutionState::Failed)?;
            self.store.save_execution(&execution).await?;

            if let Some(outcome) = self
                .recovery
                .recover(RecoveryScenario::RollbackFailure, &self.runner)
                .await?
            {
                execution.record(LogEvent::warn(
                    "recovery",
                    format!("recovery strategy '{}' applied", outcome.strategy_name),
                ));
                execution.recovery = Some(outcome);
                self.store.save_execution(&execution).await?;
            }
        } else {
            execution.progress = 100;
            execution.transition_to(ExecutionState::Completed)?;
            self.store.save_execution(&execution).await?;
            self.mark_job_rolled_back(&plan.job_id).await?;
        }

        Ok(execution)
    }

    /// Rejects a second rollback of the same plan or job.
    async fn reject_double_rollback(&self, plan: &RollbackPlan) -> Result<()> {
        let filter = ExecutionFilter::default().for_plan(plan.id);
        let prior = self.store.list_executions(&filter).await?;
        if prior.iter().any(|e| e.state == ExecutionState::Completed) {
            return Err(Error::RollbackFailure {
                message: format!("plan {} has already been rolled back", plan.id),
            });
        }

        if let Some(job) = self.store.get_job(&plan.job_id).await? {
            if job.state == JobState::RolledBack {
                return Err(Error::RollbackFailure {
                    message: format!("job {} is already rolled back", plan.job_id),
                });
            }
        }
        Ok(())
    }

    /// Runs one step, recording its outcome on the execution.
    async fn run_step(
        &self,
        step: &RollbackStep,
        execution: &mut RollbackExecution,
    ) -> Result<StepDisposition> {
        let started_at = Utc::now();
        metrics::counter!("splice_rollback_steps_total").increment(1);

        for condition in &step.conditions {
            if self.condition_met(&condition.name) {
                continue;
            }
            let detail = format!("condition '{}' unmet", condition.name);
            execution.steps.push(StepRecord {
                step_id: step.id,
                description: step.description.clone(),
                status: StepStatus::Skipped,
                error: Some(detail.clone()),
                started_at,
                finished_at: Utc::now(),
            });
            if condition.required {
                execution.record(LogEvent::error(
                    "rollback",
                    format!("aborting: required {detail} for '{}'", step.description),
                ));
                return Ok(StepDisposition::Abort);
            }
            execution.record(LogEvent::warn(
                "rollback",
                format!("skipping '{}': {detail}", step.description),
            ));
            return Ok(StepDisposition::Continue);
        }

        let mut failure: Option<String> = None;
        if step.step_type == RollbackStepType::ConfigRestore {
            if let Some(backup) = &self.backup {
                if let Err(e) = backup.merger.restore(&backup.handle).await {
                    failure = Some(format!("backup restore: {e}"));
                }
            }
        }
        if failure.is_none() {
            for command in &step.commands {
                if let Err(detail) = self.run_with_retries(&command.spec).await? {
                    failure = Some(format!("{}: {detail}", command.description));
                    break;
                }
            }
        }

        match failure {
            None => {
                execution.steps.push(StepRecord {
                    step_id: step.id,
                    description: step.description.clone(),
                    status: StepStatus::Completed,
                    error: None,
                    started_at,
                    finished_at: Utc::now(),
                });
                execution.record(LogEvent::info("rollback", step.description.clone()));
                Ok(StepDisposition::Continue)
            }
            Some(detail) if step.rollback_on_failure => {
                execution.steps.push(StepRecord {
                    step_id: step.id,
                    description: step.description.clone(),
                    status: StepStatus::Failed,
                    error: Some(detail.clone()),
                    started_at,
                    finished_at: Utc::now(),
                });
                execution.record(LogEvent::error(
                    "rollback",
                    format!("step failed: {detail}"),
                ));
                if step.critical {
                    Ok(StepDisposition::Abort)
                } else {
                    Ok(StepDisposition::Continue)
                }
            }
            Some(detail) => {
                // Failure tolerated for this step.
                execution.steps.push(StepRecord {
                    step_id: step.id,
                    description: step.description.clone(),
                    status: StepStatus::Completed,
                    error: Some(detail.clone()),
                    started_at,
                    finished_at: Utc::now(),
                });
                execution.record(LogEvent::warn(
                    "rollback",
                    format!("tolerated failure: {detail}"),
                ));
                Ok(StepDisposition::Continue)
            }
        }
    }

    /// Runs a command honoring its retry budget.
    ///
    /// Timeouts count as failed attempts; other runner errors propagate.
    async fn run_with_retries(
        &self,
        spec: &CommandSpec,
    ) -> Result<std::result::Result<(), String>> {
        let mut last_failure = String::new();
        for attempt in 0..=spec.retries {
            match self.runner.run(spec).await {
                Ok(output) if output.success => return Ok(Ok(())),
                Ok(output) => {
                    last_failure =
                        format!("exit code {}: {}", output.exit_code, output.stderr.trim());
                }
                Err(splice_core::Error::CommandTimeout { timeout_ms, .. }) => {
                    last_failure = format!("timed out after {timeout_ms}ms");
                }
                Err(e) => return Err(e.into()),
            }
            if attempt < spec.retries {
                tracing::debug!(
                    command = %spec.display_line(),
                    attempt = attempt + 1,
                    "retrying rollback command"
                );
            }
        }
        Ok(Err(last_failure))
    }

    /// Transitions the rolled-back job to its terminal state.
    async fn mark_job_rolled_back(&self, job_id: &JobId) -> Result<()> {
        if let Some(mut job) = self.store.get_job(job_id).await? {
            if job.state == JobState::Failed {
                job.transition_to(JobState::RolledBack)?;
                self.store.save_job(&job).await?;
            }
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn progress_pct(done: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        ((done * 100) / total).min(100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_core::{CommandOutput, FeatureId, MemoryFiles, ScriptedRunner};

    use crate::change::{ChangeType, CodeChange};
    use crate::feature::{Complexity, RiskLevel};
    use crate::job::{IntegrationJob, IntegrationResult};
    use crate::rollback::plan::RollbackPlanner;
    use crate::store::InMemoryStore;
    use crate::strategy::IntegrationStrategy;

    fn change(path: &str, risk: RiskLevel, rollback: CommandSpec) -> CodeChange {
        CodeChange::new(ChangeType::FileModified, path, Complexity::Low, risk, rollback)
    }

    fn plan_for(changes: Vec<CodeChange>) -> RollbackPlan {
        let result = IntegrationResult {
            job_id: JobId::generate(),
            feature_id: FeatureId::generate(),
            changes,
            test_results: Vec::new(),
            performance: crate::validate::PerformanceDelta::default(),
            validations: Vec::new(),
            completed_at: Utc::now(),
        };
        RollbackPlanner::new().plan(&result)
    }

    fn executor(runner: Arc<ScriptedRunner>, store: Arc<InMemoryStore>) -> RollbackExecutor {
        RollbackExecutor::new(runner, store).with_condition("backup_available", true)
    }

    #[test]
    fn state_transition_table() {
        use ExecutionState as S;
        assert!(S::Pending.can_transition_to(S::Running));
        assert!(S::Pending.can_transition_to(S::Cancelled));
        assert!(S::Running.can_transition_to(S::Completed));
        assert!(S::Running.can_transition_to(S::Failed));
        assert!(S::Running.can_transition_to(S::Cancelled));
        assert!(!S::Pending.can_transition_to(S::Completed));
        assert!(!S::Completed.can_transition_to(S::Running));
        assert!(!S::Failed.can_transition_to(S::Running));
    }

    #[tokio::test]
    async fn successful_execution_completes_all_steps() {
        let runner = Arc::new(ScriptedRunner::new());
        let store = Arc::new(InMemoryStore::new());
        let plan = plan_for(vec![
            change("a.ts", RiskLevel::Low, CommandSpec::new("git")),
            change("b.ts", RiskLevel::Low, CommandSpec::new("git")),
        ]);

        let execution = executor(runner, store.clone())
            .execute(&plan, "manual", "operator request")
            .await
            .unwrap();

        assert_eq!(execution.state, ExecutionState::Completed);
        assert_eq!(execution.progress, 100);
        let result = execution.result.unwrap();
        assert_eq!(result.completed_steps, 3); // 2 reverts + validation
        assert_eq!(result.failed_steps, 0);
        assert!(result.data_restored);

        let stored = store.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::Completed);
    }

    #[tokio::test]
    async fn critical_step_failure_stops_remaining_steps() {
        // Three changes; the middle rollback command (second step after
        // reversal) fails on a critical, rollback_on_failure step.
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("revert-c", CommandOutput::ok(""));
        runner.script("revert-b", CommandOutput::failed(1, "conflict"));

        let store = Arc::new(InMemoryStore::new());
        let plan = plan_for(vec![
            change("a.ts", RiskLevel::Low, CommandSpec::new("revert-a")),
            change("b.ts", RiskLevel::High, CommandSpec::new("revert-b")),
            change("c.ts", RiskLevel::Low, CommandSpec::new("revert-c")),
        ]);

        let execution = executor(runner, store)
            .execute(&plan, "manual", "test")
            .await
            .unwrap();

        assert_eq!(execution.state, ExecutionState::Failed);
        let result = execution.result.as_ref().unwrap();
        assert!(result.failed_steps >= 1);
        // revert-a and the validation step never ran.
        assert_eq!(execution.steps.len(), 2);
        assert_eq!(execution.steps[1].status, StepStatus::Failed);
        assert!(execution.recovery.is_some());
    }

    #[tokio::test]
    async fn noncritical_failure_continues() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("revert-b", CommandOutput::failed(1, "already gone"));

        let store = Arc::new(InMemoryStore::new());
        let plan = plan_for(vec![
            change("a.ts", RiskLevel::Low, CommandSpec::new("revert-a")),
            change("b.ts", RiskLevel::Low, CommandSpec::new("revert-b")),
        ]);

        let execution = executor(runner, store)
            .execute(&plan, "manual", "test")
            .await
            .unwrap();

        // Low-risk steps are not critical, so the run continues past the
        // failure and the passing validation step completes it.
        assert_eq!(execution.state, ExecutionState::Completed);
        let result = execution.result.unwrap();
        assert_eq!(result.failed_steps, 1);
        assert_eq!(result.completed_steps, 2);
    }

    #[tokio::test]
    async fn double_rollback_is_rejected() {
        let runner = Arc::new(ScriptedRunner::new());
        let store = Arc::new(InMemoryStore::new());
        let plan = plan_for(vec![change("a.ts", RiskLevel::Low, CommandSpec::new("git"))]);

        let exec = executor(runner.clone(), store.clone());
        let first = exec.execute(&plan, "manual", "first").await.unwrap();
        assert_eq!(first.state, ExecutionState::Completed);

        let second = exec.execute(&plan, "manual", "second").await;
        assert!(matches!(second, Err(Error::RollbackFailure { .. })));
    }

    #[tokio::test]
    async fn rolled_back_job_rejects_new_rollback() {
        let runner = Arc::new(ScriptedRunner::new());
        let store = Arc::new(InMemoryStore::new());
        let mut plan = plan_for(vec![change("a.ts", RiskLevel::Low, CommandSpec::new("git"))]);

        let mut job = IntegrationJob::new(FeatureId::generate(), IntegrationStrategy::direct());
        plan.job_id = job.id;
        job.transition_to(JobState::Running).unwrap();
        job.fail("tests failed").unwrap();
        job.transition_to(JobState::RolledBack).unwrap();
        store.save_job(&job).await.unwrap();

        let result = executor(runner, store).execute(&plan, "manual", "test").await;
        assert!(matches!(result, Err(Error::RollbackFailure { .. })));
    }

    #[tokio::test]
    async fn completion_marks_failed_job_rolled_back() {
        let runner = Arc::new(ScriptedRunner::new());
        let store = Arc::new(InMemoryStore::new());
        let mut plan = plan_for(vec![change("a.ts", RiskLevel::Low, CommandSpec::new("git"))]);

        let mut job = IntegrationJob::new(FeatureId::generate(), IntegrationStrategy::direct());
        plan.job_id = job.id;
        job.transition_to(JobState::Running).unwrap();
        job.fail("tests failed").unwrap();
        store.save_job(&job).await.unwrap();

        executor(runner, store.clone())
            .execute(&plan, "automatic", "error rate")
            .await
            .unwrap();

        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::RolledBack);
    }

    #[tokio::test]
    async fn unmet_prerequisite_aborts_with_no_steps() {
        let runner = Arc::new(ScriptedRunner::new());
        let store = Arc::new(InMemoryStore::new());
        let mut plan = plan_for(vec![change("a.ts", RiskLevel::Low, CommandSpec::new("git"))]);
        plan.prerequisites = vec!["maintenance_window".into()];

        let result = executor(runner.clone(), store)
            .execute(&plan, "manual", "test")
            .await;

        assert!(matches!(result, Err(Error::RollbackFailure { .. })));
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn unmet_required_condition_aborts() {
        let runner = Arc::new(ScriptedRunner::new());
        let store = Arc::new(InMemoryStore::new());
        let plan = plan_for(vec![
            change("a.ts", RiskLevel::Low, CommandSpec::new("git")),
            CodeChange::new(
                ChangeType::ConfigUpdated,
                "app.json",
                Complexity::Low,
                RiskLevel::Low,
                CommandSpec::new("restore"),
            ),
        ]);

        // No backup_available condition set.
        let execution = RollbackExecutor::new(runner, store)
            .execute(&plan, "manual", "test")
            .await
            .unwrap();

        assert_eq!(execution.state, ExecutionState::Failed);
        // Config restore step (first after reversal) was skipped, nothing else ran.
        assert_eq!(execution.steps.len(), 1);
        assert_eq!(execution.steps[0].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn attached_backup_restores_config_contents() {
        let runner = Arc::new(ScriptedRunner::new());
        let store = Arc::new(InMemoryStore::new());
        let files = Arc::new(MemoryFiles::new());
        files.seed("app.json", br#"{"theme":"light"}"#.to_vec());

        let merger = crate::config::ConfigMerger::new(files.clone());
        let handle = merger.backup(["app.json"]).await.unwrap();
        files.write("app.json", br#"{"theme":"dark"}"#).await.unwrap();

        let plan = plan_for(vec![CodeChange::new(
            ChangeType::ConfigUpdated,
            "app.json",
            Complexity::Low,
            RiskLevel::Low,
            CommandSpec::new("restore-config"),
        )]);

        let execution = RollbackExecutor::new(runner, store)
            .with_backup(files.clone(), handle)
            .execute(&plan, "manual", "test")
            .await
            .unwrap();

        assert_eq!(execution.state, ExecutionState::Completed);
        assert!(execution.result.unwrap().config_restored);
        assert_eq!(files.read("app.json").await.unwrap(), br#"{"theme":"light"}"#);
    }

    #[tokio::test]
    async fn empty_backup_leaves_condition_unmet() {
        let runner = Arc::new(ScriptedRunner::new());
        let store = Arc::new(InMemoryStore::new());
        let files = Arc::new(MemoryFiles::new());

        let plan = plan_for(vec![CodeChange::new(
            ChangeType::ConfigUpdated,
            "app.json",
            Complexity::Low,
            RiskLevel::Low,
            CommandSpec::new("restore-config"),
        )]);

        let execution = RollbackExecutor::new(runner, store)
            .with_backup(files, BackupHandle::default())
            .execute(&plan, "manual", "test")
            .await
            .unwrap();

        assert_eq!(execution.state, ExecutionState::Failed);
        assert_eq!(execution.steps[0].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn cancel_takes_effect_between_steps() {
        let runner = Arc::new(ScriptedRunner::new());
        let store = Arc::new(InMemoryStore::new());
        let plan = plan_for(vec![change("a.ts", RiskLevel::Low, CommandSpec::new("git"))]);

        // Pre-request the cancel: the first between-step check honors it.
        // The execution id is not known yet, so cancel all via a probe run.
        let exec = executor(runner, store.clone());

        // Request cancellation as soon as the execution is persisted.
        // InMemoryStore cancel flags are keyed by execution id, so run the
        // execution and cancel concurrently.
        let handle = {
            let store = store.clone();
            tokio::spawn(async move {
                loop {
                    let filter = ExecutionFilter::default();
                    let running = store.list_executions(&filter).await.unwrap();
                    if let Some(e) = running.first() {
                        store.request_cancel(&e.id).await.unwrap();
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let execution = exec.execute(&plan, "manual", "test").await.unwrap();
        handle.await.unwrap();

        assert!(matches!(
            execution.state,
            ExecutionState::Cancelled | ExecutionState::Completed
        ));
    }

    #[tokio::test]
    async fn retries_honor_the_command_budget() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("flaky", CommandOutput::failed(1, "transient"));
        runner.script("flaky", CommandOutput::ok(""));

        let store = Arc::new(InMemoryStore::new());
        let plan = plan_for(vec![change(
            "a.ts",
            RiskLevel::Low,
            CommandSpec::new("flaky").with_retries(1),
        )]);

        let execution = executor(runner.clone(), store)
            .execute(&plan, "manual", "test")
            .await
            .unwrap();

        assert_eq!(execution.state, ExecutionState::Completed);
        let flaky_runs = runner
            .invocations()
            .iter()
            .filter(|c| c.command == "flaky")
            .count();
        assert_eq!(flaky_runs, 2);
    }
}
