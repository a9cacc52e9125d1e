//! Rollback plan derivation.
//!
//! A [`RollbackPlan`] is derived deterministically from an
//! [`IntegrationResult`]'s change ledger and is immutable once created. Step
//! order is the exact reverse of forward application order, so the last
//! mutation is undone first.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use splice_core::{CommandSpec, FeatureId, JobId, PlanId, StepId};

use crate::change::{ChangeType, CodeChange};
use crate::feature::RiskLevel;
use crate::job::IntegrationResult;

use super::trigger::RollbackTrigger;

/// What a rollback step undoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStepType {
    /// Delete an added file or restore a previous file version.
    CodeRevert,
    /// Remove or pin back a dependency.
    DependencyDowngrade,
    /// Restore a configuration store from backup.
    ConfigRestore,
    /// Verify the system after the reverting steps.
    Validation,
}

/// One command within a step, executed in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackCommand {
    /// What the command does, for logs.
    pub description: String,
    /// The command itself, with its own timeout and retry budget.
    pub spec: CommandSpec,
}

impl RollbackCommand {
    /// Creates a command with a description.
    #[must_use]
    pub fn new(description: impl Into<String>, spec: CommandSpec) -> Self {
        Self {
            description: description.into(),
            spec,
        }
    }
}

/// A named precondition evaluated before a step runs.
///
/// An unmet non-required condition skips the step; an unmet required
/// condition aborts the execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCondition {
    /// Condition name, resolved against the execution environment.
    pub name: String,
    /// Whether the whole execution depends on this condition.
    #[serde(default)]
    pub required: bool,
}

impl StepCondition {
    /// An optional condition. Unmet means the step is skipped.
    #[must_use]
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }

    /// A required condition. Unmet aborts the execution.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }
}

/// One reversing step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackStep {
    /// Step identifier.
    pub id: StepId,
    /// What this step undoes.
    pub step_type: RollbackStepType,
    /// Human-readable description.
    pub description: String,
    /// Commands to run, in order.
    pub commands: Vec<RollbackCommand>,
    /// Preconditions evaluated before the step runs.
    #[serde(default)]
    pub conditions: Vec<StepCondition>,
    /// A critical step failure aborts the remainder of the plan.
    pub critical: bool,
    /// Whether this step can itself be undone afterwards.
    pub reversible: bool,
    /// Whether a command failure marks the step failed.
    pub rollback_on_failure: bool,
    /// Estimated wall-clock minutes.
    pub estimated_minutes: u32,
}

/// A derived, immutable rollback plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPlan {
    /// Plan identifier.
    pub id: PlanId,
    /// The job being rolled back.
    pub job_id: JobId,
    /// The feature being rolled back.
    pub feature_id: FeatureId,
    /// Reversing steps, in execution order (reverse of application order).
    pub steps: Vec<RollbackStep>,
    /// Verification steps run after all reversing steps complete.
    pub validation_steps: Vec<RollbackStep>,
    /// Conditions that must hold before any step runs.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Paths whose backups this plan restores from.
    #[serde(default)]
    pub backup_paths: Vec<String>,
    /// Triggers that may start this plan automatically.
    #[serde(default)]
    pub triggers: Vec<RollbackTrigger>,
    /// Estimated total duration.
    #[serde(with = "humantime_serde")]
    pub estimated_duration: Duration,
    /// Overall risk of executing this plan.
    pub risk: RiskLevel,
    /// When the plan was derived.
    pub created_at: DateTime<Utc>,
}

impl RollbackPlan {
    /// Total number of steps including validation.
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.steps.len() + self.validation_steps.len()
    }
}

/// Derives rollback plans from integration results.
#[derive(Debug, Clone, Default)]
pub struct RollbackPlanner {
    prerequisites: Vec<String>,
    triggers: Vec<RollbackTrigger>,
}

impl RollbackPlanner {
    /// Creates a planner with no prerequisites or triggers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Conditions that must hold before any derived plan starts.
    #[must_use]
    pub fn with_prerequisites<I, S>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites = prerequisites.into_iter().map(Into::into).collect();
        self
    }

    /// Triggers attached to every derived plan.
    #[must_use]
    pub fn with_triggers(mut self, triggers: Vec<RollbackTrigger>) -> Self {
        self.triggers = triggers;
        self
    }

    /// Derives a plan from the result's change ledger.
    ///
    /// Steps are collected in application order and reversed, then a
    /// mandatory validation step is appended. The derivation is pure.
    #[must_use]
    #[tracing::instrument(skip(self, result), fields(job_id = %result.job_id, changes = result.changes.len()))]
    pub fn plan(&self, result: &IntegrationResult) -> RollbackPlan {
        let mut steps: Vec<RollbackStep> = result.changes.iter().map(step_for_change).collect();
        steps.reverse();

        let step_minutes: u32 = steps.iter().map(|s| s.estimated_minutes).sum();
        let validation = validation_step();
        let estimated_duration =
            Duration::from_secs(u64::from(step_minutes + validation.estimated_minutes) * 60);

        let backup_paths = result
            .changes
            .iter()
            .filter(|c| c.change_type == ChangeType::ConfigUpdated)
            .map(|c| c.path.clone())
            .collect();

        RollbackPlan {
            id: PlanId::generate(),
            job_id: result.job_id,
            feature_id: result.feature_id,
            risk: assess_risk(&result.changes),
            steps,
            validation_steps: vec![validation],
            prerequisites: self.prerequisites.clone(),
            backup_paths,
            triggers: self.triggers.clone(),
            estimated_duration,
            created_at: Utc::now(),
        }
    }
}

/// The reversing step for one forward change.
fn step_for_change(change: &CodeChange) -> RollbackStep {
    let (step_type, description, conditions) = match change.change_type {
        ChangeType::FileAdded => (
            RollbackStepType::CodeRevert,
            format!("delete added file {}", change.path),
            Vec::new(),
        ),
        ChangeType::FileModified | ChangeType::FileDeleted => (
            RollbackStepType::CodeRevert,
            format!("restore previous version of {}", change.path),
            Vec::new(),
        ),
        ChangeType::DependencyAdded => (
            RollbackStepType::DependencyDowngrade,
            format!("remove dependency {}", change.path),
            Vec::new(),
        ),
        ChangeType::ConfigUpdated => (
            RollbackStepType::ConfigRestore,
            format!("restore configuration {}", change.path),
            vec![StepCondition::required("backup_available")],
        ),
    };

    RollbackStep {
        id: StepId::generate(),
        step_type,
        description: description.clone(),
        commands: vec![RollbackCommand::new(description, change.rollback_command.clone())],
        conditions,
        critical: change.risk.is_elevated(),
        reversible: matches!(
            change.change_type,
            ChangeType::FileModified | ChangeType::ConfigUpdated
        ),
        rollback_on_failure: true,
        estimated_minutes: change.complexity.rollback_minutes(),
    }
}

/// The mandatory final verification step.
fn validation_step() -> RollbackStep {
    RollbackStep {
        id: StepId::generate(),
        step_type: RollbackStepType::Validation,
        description: "verify system state after rollback".to_string(),
        commands: vec![RollbackCommand::new(
            "run smoke verification",
            CommandSpec::new("npm").with_args(["run", "verify"]),
        )],
        conditions: Vec::new(),
        critical: true,
        reversible: false,
        rollback_on_failure: true,
        estimated_minutes: 5,
    }
}

/// Overall plan risk from the change ledger.
///
/// `Critical` requires both an elevated-risk change and a large ledger
/// (more than ten changes, at least one of high complexity); either
/// condition alone yields `High`.
fn assess_risk(changes: &[CodeChange]) -> RiskLevel {
    let elevated = changes.iter().any(|c| c.risk.is_elevated());
    let large = changes.len() > 10
        && changes
            .iter()
            .any(|c| c.complexity == crate::feature::Complexity::High);

    match (elevated, large) {
        (true, true) => RiskLevel::Critical,
        (true, false) | (false, true) => RiskLevel::High,
        (false, false) if changes.len() > 5 => RiskLevel::Medium,
        (false, false) => RiskLevel::Low,
    }
}
