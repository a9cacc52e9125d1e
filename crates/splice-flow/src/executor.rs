//! The integration executor.
//!
//! Runs one [`IntegrationJob`] through seven sequential phases, each
//! updating progress and appending log events. Phases before any mutation
//! fail fast with no rollback; once the apply phase has started, a failure
//! marks the job `Failed` and derives an automatic rollback from the
//! changes applied so far, unless the rollout strategy is `Immediate`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use splice_core::{CommandRunner, CommandSpec, FileStore};

use crate::apply::{apply_feature, ApplyContext};
use crate::change::{ChangeType, CodeChange};
use crate::config::{BackupHandle, ConfigMerger, MergeStrategy};
use crate::error::{Error, Result};
use crate::events::LogEvent;
use crate::feature::{Complexity, PrioritizedFeature};
use crate::job::{IntegrationJob, IntegrationResult, JobState, RollbackOutcome};
use crate::rollback::{ExecutionState, RollbackExecutor, RollbackPlanner};
use crate::store::Store;
use crate::strategy::{IntegrationStrategy, RolloutStrategy};
use crate::testing::{TestHarness, TestRunResult};
use crate::validate::{check_required, PerformanceDelta, ValidationResult};

/// Path of the merged application configuration store.
const APP_CONFIG_PATH: &str = "config/app.json";

/// Measures performance deltas against the pre-integration baseline.
#[async_trait]
pub trait PerformanceProbe: Send + Sync {
    /// Measures the current deltas.
    async fn measure(&self) -> PerformanceDelta;
}

/// Fixed deltas, for tests and for wiring before a real probe exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDeltas(pub PerformanceDelta);

#[async_trait]
impl PerformanceProbe for FixedDeltas {
    async fn measure(&self) -> PerformanceDelta {
        self.0
    }
}

/// One final-validation check, run as a command.
#[derive(Debug, Clone)]
struct ValidationCheck {
    name: String,
    required: bool,
    spec: CommandSpec,
}

/// Runs integration jobs end to end.
pub struct IntegrationExecutor {
    runner: Arc<dyn CommandRunner>,
    files: Arc<dyn FileStore>,
    store: Arc<dyn Store>,
    tests: TestHarness,
    planner: RollbackPlanner,
    performance: Arc<dyn PerformanceProbe>,
    validations: Vec<ValidationCheck>,
}

impl IntegrationExecutor {
    /// Creates an executor with the default test harness, planner, probe,
    /// and validation checks.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        files: Arc<dyn FileStore>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            tests: TestHarness::new(runner.clone()),
            runner,
            files,
            store,
            planner: RollbackPlanner::new(),
            performance: Arc::new(FixedDeltas::default()),
            validations: default_validations(),
        }
    }

    /// Overrides the test harness.
    #[must_use]
    pub fn with_tests(mut self, tests: TestHarness) -> Self {
        self.tests = tests;
        self
    }

    /// Overrides the rollback planner.
    #[must_use]
    pub fn with_planner(mut self, planner: RollbackPlanner) -> Self {
        self.planner = planner;
        self
    }

    /// Overrides the performance probe.
    #[must_use]
    pub fn with_performance_probe(mut self, probe: Arc<dyn PerformanceProbe>) -> Self {
        self.performance = probe;
        self
    }

    /// Integrates a feature under a strategy.
    ///
    /// # Errors
    ///
    /// Pre-mutation failures surface as their own variants. Post-mutation
    /// failures surface as [`Error::IntegrationFailed`] wrapping the cause;
    /// the job in the store carries the log trail and, unless the rollout
    /// is `Immediate`, the automatic rollback outcome.
    #[tracing::instrument(skip(self, feature, strategy), fields(feature_id = %feature.id))]
    pub async fn integrate(
        &self,
        feature: &PrioritizedFeature,
        strategy: IntegrationStrategy,
    ) -> Result<IntegrationResult> {
        strategy.validate(feature)?;

        let mut job = IntegrationJob::new(feature.id, strategy);
        self.store.save_job(&job).await?;

        match self.run_phases(feature, &mut job).await {
            Ok(result) => {
                job.complete(result.clone())?;
                self.store.save_job(&job).await?;
                metrics::counter!("splice_integrations_completed_total").increment(1);
                Ok(result)
            }
            Err(e) if e.is_pre_mutation() => {
                job.record(LogEvent::error("pre_validation", e.to_string()));
                job.fail(e.to_string())?;
                self.store.save_job(&job).await?;
                Err(e)
            }
            Err(e) => {
                let job_id = job.id;
                let step = job.current_step.clone();
                job.record(LogEvent::error(step, e.to_string()));
                job.fail(e.to_string())?;
                self.store.save_job(&job).await?;
                metrics::counter!("splice_integrations_failed_total").increment(1);

                // A rollback-path error must not hide the integration
                // failure that caused it.
                let source = match self.auto_rollback(feature, job, &e).await {
                    Ok(()) => e,
                    Err(rollback_err) => Error::RollbackFailure {
                        message: format!(
                            "automatic rollback failed ({rollback_err}); original failure: {e}"
                        ),
                    },
                };

                Err(Error::IntegrationFailed {
                    job_id,
                    source: Box::new(source),
                })
            }
        }
    }

    /// Runs phases 1 through 7, recording progress on the job.
    ///
    /// Changes applied before a failure are attached to the job so the
    /// failure path can plan a rollback over exactly those changes.
    async fn run_phases(
        &self,
        feature: &PrioritizedFeature,
        job: &mut IntegrationJob,
    ) -> Result<IntegrationResult> {
        job.transition_to(JobState::Running)?;
        self.store.save_job(job).await?;

        // Phase 1: pre-validation, no mutation yet.
        job.set_progress(10, "pre_validation");
        self.pre_validate(feature).await?;
        job.record(LogEvent::info("pre_validation", "prerequisites satisfied"));

        // Phase 2: backup. The handle stays on the job so the rollback path
        // can restore from it.
        job.set_progress(20, "backup");
        if job.strategy.backup_required {
            let handle = self.backup(feature).await?;
            job.record(LogEvent::info(
                "backup",
                format!("backed up {} path(s)", handle.len()),
            ));
            job.backup = Some(handle);
        }
        self.store.save_job(job).await?;

        // Phase 3: apply.
        job.set_progress(40, "apply");
        let ctx = ApplyContext {
            runner: self.runner.clone(),
            files: self.files.clone(),
        };
        let report = apply_feature(feature, &job.strategy.approach.clone(), &ctx).await?;
        for event in report.events {
            job.record(event);
        }
        let mut changes = report.changes;
        if let Some(failure) = report.failure {
            stash_changes(job, &changes);
            return Err(failure);
        }

        // Phase 4: configuration updates.
        job.set_progress(60, "configure");
        let config_result = self.update_configuration(feature, job).await;
        match config_result {
            Ok(mut config_changes) => changes.append(&mut config_changes),
            Err(e) => {
                stash_changes(job, &changes);
                return Err(e);
            }
        }
        self.store.save_job(job).await?;

        // Phase 5: tests.
        job.set_progress(80, "test");
        let test_results = match self.tests.run(job.strategy.testing).await {
            Ok(results) => results,
            Err(e) => {
                stash_changes(job, &changes);
                return Err(e);
            }
        };
        record_test_results(job, &test_results);

        // Phase 6: performance validation.
        job.set_progress(90, "performance");
        let performance = self.performance.measure().await;
        if let Err(e) = performance.check() {
            stash_changes(job, &changes);
            return Err(e);
        }
        job.record(LogEvent::info("performance", "deltas within thresholds"));

        // Phase 7: final validation.
        job.set_progress(95, "validate");
        let validations = self.final_validation(job).await?;
        if job.strategy.validation_required {
            if let Err(e) = check_required(&validations) {
                stash_changes(job, &changes);
                return Err(e);
            }
        }

        Ok(IntegrationResult {
            job_id: job.id,
            feature_id: feature.id,
            changes,
            test_results,
            performance,
            validations,
            completed_at: Utc::now(),
        })
    }

    /// Phase 1 checks. All pure reads, so failure needs no rollback.
    async fn pre_validate(&self, feature: &PrioritizedFeature) -> Result<()> {
        if feature.files.is_empty() {
            return Err(Error::Prerequisite {
                message: "feature touches no files".into(),
            });
        }

        for file in &feature.files {
            if file.is_new && self.files.exists(&file.path).await? {
                return Err(Error::Conflict {
                    message: format!("new file {} already exists", file.path),
                });
            }
        }

        for dependency in &feature.dependencies {
            let name = dependency.split('@').next().unwrap_or(dependency);
            let probe = CommandSpec::new("npm").with_args(["view", name, "version"]);
            let output = self.runner.run(&probe).await?;
            if !output.success {
                return Err(Error::Dependency {
                    dependency: dependency.clone(),
                });
            }
        }

        Ok(())
    }

    /// Phase 2: backs up every touched file plus the config store.
    async fn backup(&self, feature: &PrioritizedFeature) -> Result<BackupHandle> {
        let merger = ConfigMerger::new(self.files.clone());
        let mut paths: Vec<String> = feature
            .files
            .iter()
            .filter(|f| !f.is_new)
            .map(|f| f.path.clone())
            .collect();
        paths.push(APP_CONFIG_PATH.to_string());
        if !feature.dependencies.is_empty() {
            paths.push("package.json".to_string());
        }
        merger.backup(paths).await
    }

    /// Phase 4: dependency installs and config-store merges.
    async fn update_configuration(
        &self,
        feature: &PrioritizedFeature,
        job: &mut IntegrationJob,
    ) -> Result<Vec<CodeChange>> {
        let mut changes = Vec::new();

        for dependency in &feature.dependencies {
            let install = CommandSpec::new("npm").with_args(["install", dependency]);
            let output = self.runner.run(&install).await?;
            if !output.success {
                return Err(Error::command_failed(install.display_line(), &output));
            }
            let name = dependency.split('@').next().unwrap_or(dependency);
            changes.push(
                CodeChange::new(
                    ChangeType::DependencyAdded,
                    name,
                    Complexity::Low,
                    feature.risk,
                    CommandSpec::new("npm").with_args(["uninstall", name]),
                )
                .with_checks(["installs_cleanly"]),
            );
            job.record(LogEvent::info("configure", format!("installed {dependency}")));
        }

        if !feature.config_updates.is_empty() {
            let base = match self.files.read(APP_CONFIG_PATH).await {
                Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| Error::Serialization {
                    message: format!("{APP_CONFIG_PATH}: {e}"),
                })?,
                Err(splice_core::Error::FileNotFound { .. }) => serde_json::Map::new(),
                Err(e) => return Err(e.into()),
            };

            let merged = crate::config::merge_configurations(
                &base,
                &feature.config_updates,
                MergeStrategy::Merge,
            );
            let payload =
                serde_json::to_vec_pretty(&merged).map_err(|e| Error::Serialization {
                    message: format!("{APP_CONFIG_PATH}: {e}"),
                })?;
            self.files.write(APP_CONFIG_PATH, &payload).await?;

            changes.push(
                CodeChange::new(
                    ChangeType::ConfigUpdated,
                    APP_CONFIG_PATH,
                    Complexity::Low,
                    feature.risk,
                    CommandSpec::new("git").with_args(["checkout", "--", APP_CONFIG_PATH]),
                )
                .with_checks(["config_valid"]),
            );
            job.record(LogEvent::info(
                "configure",
                format!("merged {} config key(s)", feature.config_updates.len()),
            ));
        }

        Ok(changes)
    }

    /// Phase 7: compatibility, security, and branding checks.
    async fn final_validation(&self, job: &mut IntegrationJob) -> Result<Vec<ValidationResult>> {
        let mut results = Vec::new();
        for check in &self.validations {
            let output = self.runner.run(&check.spec).await?;
            let result = if output.success {
                ValidationResult::pass(&check.name, check.required)
            } else {
                ValidationResult::fail(
                    &check.name,
                    check.required,
                    output.stderr.trim().to_string(),
                )
            };
            job.record(LogEvent::info(
                "validate",
                format!(
                    "{}: {}",
                    check.name,
                    if result.passed { "passed" } else { "failed" }
                ),
            ));
            results.push(result);
        }
        Ok(results)
    }

    /// Failure path: derive and execute a rollback over the changes applied
    /// so far, then attach the outcome to the failed job.
    ///
    /// `Immediate` rollouts skip this; the operator accepted that risk when
    /// choosing an un-staged rollout, so only a warning is recorded.
    async fn auto_rollback(
        &self,
        feature: &PrioritizedFeature,
        mut job: IntegrationJob,
        cause: &Error,
    ) -> Result<()> {
        if job.strategy.rollout == RolloutStrategy::Immediate {
            // The change ledger stays on the job for a later manual rollback.
            job.record(LogEvent::warn(
                "rollback",
                "immediate rollout: automatic rollback skipped",
            ));
            self.store.save_job(&job).await?;
            return Ok(());
        }

        let changes = take_stashed_changes(&mut job);
        if changes.is_empty() {
            self.store.save_job(&job).await?;
            return Ok(());
        }

        let ledger = IntegrationResult {
            job_id: job.id,
            feature_id: feature.id,
            changes,
            test_results: Vec::new(),
            performance: PerformanceDelta::default(),
            validations: Vec::new(),
            completed_at: Utc::now(),
        };
        let plan = self.planner.plan(&ledger);
        self.store.save_plan(&plan).await?;
        self.store.save_job(&job).await?;

        let mut rollback = RollbackExecutor::new(self.runner.clone(), self.store.clone());
        if let Some(handle) = job.backup.clone() {
            rollback = rollback.with_backup(self.files.clone(), handle);
        }
        let execution = rollback
            .execute(&plan, "automatic", cause.to_string())
            .await?;

        let succeeded = execution.state == ExecutionState::Completed;
        // The rollback executor may have advanced the job to RolledBack.
        let mut job = self.store.get_job(&job.id).await?.unwrap_or(job);
        job.rollback = Some(RollbackOutcome {
            execution_id: execution.id,
            succeeded,
            summary: format!(
                "automatic rollback {}",
                if succeeded { "completed" } else { "failed" }
            ),
        });
        job.record(LogEvent::warn(
            "rollback",
            format!("automatic rollback execution {}", execution.id),
        ));
        self.store.save_job(&job).await?;
        Ok(())
    }
}

/// Default final-validation checks.
fn default_validations() -> Vec<ValidationCheck> {
    vec![
        ValidationCheck {
            name: "compatibility".into(),
            required: true,
            spec: CommandSpec::new("npm").with_args(["run", "verify:compat"]),
        },
        ValidationCheck {
            name: "security".into(),
            required: true,
            spec: CommandSpec::new("npm").with_args(["audit", "--audit-level=high"]),
        },
        ValidationCheck {
            name: "branding".into(),
            required: false,
            spec: CommandSpec::new("npm").with_args(["run", "verify:brand"]),
        },
    ]
}

/// Attaches applied changes to a failing job so the rollback path can read
/// them back after the job has been persisted.
fn stash_changes(job: &mut IntegrationJob, changes: &[CodeChange]) {
    job.result = Some(IntegrationResult {
        job_id: job.id,
        feature_id: job.feature_id,
        changes: changes.to_vec(),
        test_results: Vec::new(),
        performance: PerformanceDelta::default(),
        validations: Vec::new(),
        completed_at: Utc::now(),
    });
}

fn take_stashed_changes(job: &mut IntegrationJob) -> Vec<CodeChange> {
    job.result.take().map(|r| r.changes).unwrap_or_default()
}

fn record_test_results(job: &mut IntegrationJob, results: &[TestRunResult]) {
    for result in results {
        job.record(LogEvent::info(
            "test",
            format!(
                "{}: {} of {} case(s) passed",
                result.tier,
                result.total - result.failed,
                result.total
            ),
        ));
    }
}
