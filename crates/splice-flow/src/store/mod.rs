//! Persistence abstraction for jobs, plans, and rollback executions.
//!
//! The store is the single registry the executor, rollback executor, and
//! service layer share. Entries are written only by the owning execution
//! path; readers get clones. The in-memory implementation in
//! [`memory`] backs tests and single-process deployments.

pub mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;

use splice_core::{ExecutionId, FeatureId, JobId, PlanId};

use crate::error::Result;
use crate::job::{IntegrationJob, JobState};
use crate::rollback::{ExecutionState, RollbackExecution, RollbackPlan};

/// Filter for job listings. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobFilter {
    /// Match only jobs in this state.
    pub state: Option<JobState>,
    /// Match only jobs for this feature.
    pub feature_id: Option<FeatureId>,
}

impl JobFilter {
    /// Restricts to one state.
    #[must_use]
    pub const fn in_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    /// Restricts to one feature.
    #[must_use]
    pub const fn for_feature(mut self, feature_id: FeatureId) -> Self {
        self.feature_id = Some(feature_id);
        self
    }

    fn matches(&self, job: &IntegrationJob) -> bool {
        self.state.map_or(true, |s| job.state == s)
            && self.feature_id.map_or(true, |f| job.feature_id == f)
    }
}

/// Filter for execution listings. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionFilter {
    /// Match only executions in this state.
    pub state: Option<ExecutionState>,
    /// Match only executions of this plan.
    pub plan_id: Option<PlanId>,
}

impl ExecutionFilter {
    /// Restricts to one state.
    #[must_use]
    pub const fn in_state(mut self, state: ExecutionState) -> Self {
        self.state = Some(state);
        self
    }

    /// Restricts to one plan.
    #[must_use]
    pub const fn for_plan(mut self, plan_id: PlanId) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    fn matches(&self, execution: &RollbackExecution) -> bool {
        self.state.map_or(true, |s| execution.state == s)
            && self.plan_id.map_or(true, |p| execution.plan_id == p)
    }
}

/// Registry of jobs, rollback plans, and rollback executions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetches a job by id.
    async fn get_job(&self, job_id: &JobId) -> Result<Option<IntegrationJob>>;

    /// Saves (inserts or replaces) a job.
    async fn save_job(&self, job: &IntegrationJob) -> Result<()>;

    /// Lists jobs matching the filter, oldest first.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<IntegrationJob>>;

    /// Fetches a rollback plan by id.
    async fn get_plan(&self, plan_id: &PlanId) -> Result<Option<RollbackPlan>>;

    /// Saves a rollback plan. Plans are immutable; saving twice replaces
    /// the stored copy with an identical one.
    async fn save_plan(&self, plan: &RollbackPlan) -> Result<()>;

    /// The most recent plan derived for a job, if any.
    async fn latest_plan_for_job(&self, job_id: &JobId) -> Result<Option<RollbackPlan>>;

    /// Fetches a rollback execution by id.
    async fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<RollbackExecution>>;

    /// Saves (inserts or replaces) a rollback execution.
    async fn save_execution(&self, execution: &RollbackExecution) -> Result<()>;

    /// Lists executions matching the filter, oldest first.
    async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<RollbackExecution>>;

    /// Requests cooperative cancellation of an execution.
    async fn request_cancel(&self, execution_id: &ExecutionId) -> Result<()>;

    /// Whether cancellation has been requested for an execution.
    async fn is_cancel_requested(&self, execution_id: &ExecutionId) -> Result<bool>;
}
