//! In-memory store implementation.
//!
//! Thread-safe but single-process: state is lost when the process exits and
//! is not shared across process boundaries. Suitable for tests and for
//! running the orchestrator as a library inside one process.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use splice_core::{ExecutionId, JobId, PlanId};

use super::{ExecutionFilter, JobFilter, Store};
use crate::error::{Error, Result};
use crate::job::IntegrationJob;
use crate::rollback::{RollbackExecution, RollbackPlan};

/// In-memory registry behind `RwLock<HashMap>` maps.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    jobs: RwLock<HashMap<JobId, IntegrationJob>>,
    plans: RwLock<HashMap<PlanId, RollbackPlan>>,
    executions: RwLock<HashMap<ExecutionId, RollbackExecution>>,
    cancels: RwLock<HashSet<ExecutionId>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of jobs currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn job_count(&self) -> Result<usize> {
        let count = {
            let jobs = self.jobs.read().map_err(poison_err)?;
            jobs.len()
        };
        Ok(count)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_job(&self, job_id: &JobId) -> Result<Option<IntegrationJob>> {
        let result = {
            let jobs = self.jobs.read().map_err(poison_err)?;
            jobs.get(job_id).cloned()
        };
        Ok(result)
    }

    async fn save_job(&self, job: &IntegrationJob) -> Result<()> {
        {
            let mut jobs = self.jobs.write().map_err(poison_err)?;
            jobs.insert(job.id, job.clone());
        }
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<IntegrationJob>> {
        let mut result = {
            let jobs = self.jobs.read().map_err(poison_err)?;
            jobs.values()
                .filter(|j| filter.matches(j))
                .cloned()
                .collect::<Vec<_>>()
        };
        // Job ids are ULIDs, so id order is creation order.
        result.sort_by_key(|j| j.id);
        Ok(result)
    }

    async fn get_plan(&self, plan_id: &PlanId) -> Result<Option<RollbackPlan>> {
        let result = {
            let plans = self.plans.read().map_err(poison_err)?;
            plans.get(plan_id).cloned()
        };
        Ok(result)
    }

    async fn save_plan(&self, plan: &RollbackPlan) -> Result<()> {
        {
            let mut plans = self.plans.write().map_err(poison_err)?;
            plans.insert(plan.id, plan.clone());
        }
        Ok(())
    }

    async fn latest_plan_for_job(&self, job_id: &JobId) -> Result<Option<RollbackPlan>> {
        let result = {
            let plans = self.plans.read().map_err(poison_err)?;
            plans
                .values()
                .filter(|p| p.job_id == *job_id)
                .max_by_key(|p| p.id)
                .cloned()
        };
        Ok(result)
    }

    async fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<RollbackExecution>> {
        let result = {
            let executions = self.executions.read().map_err(poison_err)?;
            executions.get(execution_id).cloned()
        };
        Ok(result)
    }

    async fn save_execution(&self, execution: &RollbackExecution) -> Result<()> {
        {
            let mut executions = self.executions.write().map_err(poison_err)?;
            executions.insert(execution.id, execution.clone());
        }
        Ok(())
    }

    async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<RollbackExecution>> {
        let mut result = {
            let executions = self.executions.read().map_err(poison_err)?;
            executions
                .values()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect::<Vec<_>>()
        };
        result.sort_by_key(|e| e.id);
        Ok(result)
    }

    async fn request_cancel(&self, execution_id: &ExecutionId) -> Result<()> {
        {
            let mut cancels = self.cancels.write().map_err(poison_err)?;
            cancels.insert(*execution_id);
        }
        Ok(())
    }

    async fn is_cancel_requested(&self, execution_id: &ExecutionId) -> Result<bool> {
        let requested = {
            let cancels = self.cancels.read().map_err(poison_err)?;
            cancels.contains(execution_id)
        };
        Ok(requested)
    }
}
