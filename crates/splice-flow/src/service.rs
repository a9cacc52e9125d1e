//! The public service facade.
//!
//! [`IntegrationService`] wires the executor, planner, rollback executor,
//! and store behind one API. Callers hand it features and strategies; the
//! read-only accessors surface job and rollback state from the store.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use splice_core::{CommandRunner, ExecutionId, FeatureId, FileStore, JobId, PlanId};

use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::executor::IntegrationExecutor;
use crate::feature::PrioritizedFeature;
use crate::job::{IntegrationJob, IntegrationResult, JobState};
use crate::rollback::{
    ExecutionState, RollbackExecution, RollbackExecutor, RollbackPlan, RollbackPlanner,
    TriggerFired,
};
use crate::store::{ExecutionFilter, JobFilter, Store};
use crate::strategy::IntegrationStrategy;

/// Facade over the integration and rollback pipeline.
pub struct IntegrationService {
    runner: Arc<dyn CommandRunner>,
    files: Arc<dyn FileStore>,
    store: Arc<dyn Store>,
    executor: IntegrationExecutor,
    planner: RollbackPlanner,
    sink: Option<Arc<Mutex<dyn EventSink>>>,
}

impl IntegrationService {
    /// Creates a service over the given capabilities.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        files: Arc<dyn FileStore>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            executor: IntegrationExecutor::new(runner.clone(), files.clone(), store.clone()),
            runner,
            files,
            store,
            planner: RollbackPlanner::new(),
            sink: None,
        }
    }

    /// Overrides the integration executor.
    #[must_use]
    pub fn with_executor(mut self, executor: IntegrationExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Streams every job's log trail to the sink as jobs finish.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<Mutex<dyn EventSink>>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Integrates a feature under a strategy.
    ///
    /// # Errors
    ///
    /// Pre-mutation failures surface directly;
    /// [`Error::IntegrationFailed`] wraps post-mutation failures and
    /// carries the job id.
    pub async fn integrate(
        &self,
        feature: &PrioritizedFeature,
        strategy: IntegrationStrategy,
    ) -> Result<IntegrationResult> {
        let outcome = self.executor.integrate(feature, strategy).await;
        match &outcome {
            Ok(result) => self.publish_job_log(&result.job_id).await?,
            Err(Error::IntegrationFailed { job_id, .. }) => {
                self.publish_job_log(job_id).await?;
            }
            Err(_) => {}
        }
        outcome
    }

    /// Rolls back the most recent failed integration of a feature.
    ///
    /// Uses the stored plan when the failure path already derived one,
    /// otherwise derives a fresh plan from the job's change ledger.
    ///
    /// # Errors
    ///
    /// Fails when the feature has no failed job to roll back, the job has
    /// no change ledger, or execution fails.
    pub async fn rollback_feature(&self, feature_id: FeatureId) -> Result<RollbackExecution> {
        let filter = JobFilter::default()
            .for_feature(feature_id)
            .in_state(JobState::Failed);
        let jobs = self.store.list_jobs(&filter).await?;
        let Some(job) = jobs.last() else {
            return Err(Error::RollbackFailure {
                message: format!("feature {feature_id} has no failed integration to roll back"),
            });
        };

        let plan = match self.store.latest_plan_for_job(&job.id).await? {
            Some(plan) => plan,
            None => {
                let Some(ledger) = &job.result else {
                    return Err(Error::RollbackFailure {
                        message: format!("job {} recorded no changes to roll back", job.id),
                    });
                };
                let plan = self.planner.plan(ledger);
                self.store.save_plan(&plan).await?;
                plan
            }
        };

        self.execute_plan(&plan, "manual", "operator requested feature rollback")
            .await
    }

    /// Executes a stored rollback plan.
    ///
    /// # Errors
    ///
    /// Fails when the plan is unknown, was already rolled back, or
    /// execution fails.
    pub async fn execute_rollback(
        &self,
        plan_id: PlanId,
        triggered_by: impl Into<String> + std::fmt::Debug,
        reason: impl Into<String> + std::fmt::Debug,
    ) -> Result<RollbackExecution> {
        let Some(plan) = self.store.get_plan(&plan_id).await? else {
            return Err(Error::PlanNotFound { plan_id });
        };
        self.execute_plan(&plan, triggered_by, reason).await
    }

    /// Executes the plan a fired trigger points at.
    ///
    /// The execution is recorded with `triggered_by = "automatic"` and the
    /// trigger's fire reason.
    ///
    /// # Errors
    ///
    /// Fails when the plan is unknown, was already rolled back, or
    /// execution fails.
    pub async fn handle_trigger_fire(&self, fire: &TriggerFired) -> Result<RollbackExecution> {
        self.execute_rollback(fire.plan_id, "automatic", fire.reason.clone())
            .await
    }

    /// Consumes trigger fires until the channel closes, executing each
    /// fired plan.
    ///
    /// Pair with [`crate::rollback::TriggerMonitor::run`] as the sender. A
    /// fire that cannot execute (plan already rolled back, plan pruned) is
    /// logged and dropped so later fires still run.
    pub async fn run_trigger_rollbacks(&self, mut fires: mpsc::Receiver<TriggerFired>) {
        while let Some(fire) = fires.recv().await {
            match self.handle_trigger_fire(&fire).await {
                Ok(execution) => tracing::info!(
                    trigger_id = %fire.trigger_id,
                    plan_id = %fire.plan_id,
                    execution_id = %execution.id,
                    "trigger fire executed rollback"
                ),
                Err(e) => tracing::warn!(
                    trigger_id = %fire.trigger_id,
                    plan_id = %fire.plan_id,
                    error = %e,
                    "trigger fire could not execute rollback"
                ),
            }
        }
    }

    /// Requests cancellation of a rollback execution.
    ///
    /// A pending execution is cancelled outright; a running one stops
    /// cooperatively at the next step boundary.
    ///
    /// # Errors
    ///
    /// Fails when the execution is unknown or already terminal.
    pub async fn cancel_rollback(&self, execution_id: ExecutionId) -> Result<()> {
        let Some(mut execution) = self.store.get_execution(&execution_id).await? else {
            return Err(Error::ExecutionNotFound { execution_id });
        };

        match execution.state {
            ExecutionState::Pending => {
                execution.transition_to(ExecutionState::Cancelled)?;
                self.store.save_execution(&execution).await
            }
            ExecutionState::Running => self.store.request_cancel(&execution_id).await,
            state => Err(Error::InvalidStateTransition {
                from: state.to_string(),
                to: ExecutionState::Cancelled.to_string(),
                reason: "execution already terminal".into(),
            }),
        }
    }

    /// Fetches a job.
    ///
    /// # Errors
    ///
    /// Fails when the job is unknown or storage fails.
    pub async fn get_job_status(&self, job_id: JobId) -> Result<IntegrationJob> {
        self.store
            .get_job(&job_id)
            .await?
            .ok_or(Error::JobNotFound { job_id })
    }

    /// Lists jobs matching the filter, oldest first.
    ///
    /// # Errors
    ///
    /// Fails when storage fails.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<IntegrationJob>> {
        self.store.list_jobs(filter).await
    }

    /// Fetches a rollback execution.
    ///
    /// # Errors
    ///
    /// Fails when the execution is unknown or storage fails.
    pub async fn get_rollback_status(
        &self,
        execution_id: ExecutionId,
    ) -> Result<RollbackExecution> {
        self.store
            .get_execution(&execution_id)
            .await?
            .ok_or(Error::ExecutionNotFound { execution_id })
    }

    /// Lists rollback executions matching the filter, oldest first.
    ///
    /// # Errors
    ///
    /// Fails when storage fails.
    pub async fn list_rollback_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<RollbackExecution>> {
        self.store.list_executions(filter).await
    }

    async fn execute_plan(
        &self,
        plan: &RollbackPlan,
        triggered_by: impl Into<String> + std::fmt::Debug,
        reason: impl Into<String> + std::fmt::Debug,
    ) -> Result<RollbackExecution> {
        let mut executor = RollbackExecutor::new(self.runner.clone(), self.store.clone());
        if let Some(job) = self.store.get_job(&plan.job_id).await? {
            if let Some(handle) = job.backup {
                executor = executor.with_backup(self.files.clone(), handle);
            }
        }
        let execution = executor.execute(plan, triggered_by, reason).await?;
        self.publish_events(&execution.log);
        Ok(execution)
    }

    async fn publish_job_log(&self, job_id: &JobId) -> Result<()> {
        if self.sink.is_none() {
            return Ok(());
        }
        if let Some(job) = self.store.get_job(job_id).await? {
            self.publish_events(&job.log);
        }
        Ok(())
    }

    fn publish_events(&self, events: &[crate::events::LogEvent]) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Ok(mut sink) = sink.lock() {
            for event in events {
                sink.push(event.clone());
            }
        }
    }
}
