//! End-to-end tests for the integration and rollback pipeline.

use std::sync::Arc;

use splice_core::{
    CommandOutput, CommandSpec, FeatureId, FileStore, JobId, MemoryFiles, ScriptedRunner,
};

use splice_flow::change::{ChangeType, CodeChange};
use splice_flow::error::Error;
use splice_flow::feature::{Complexity, FeatureFile, FeatureFlagConfig, FileGroup,
    PrioritizedFeature, RiskLevel};
use splice_flow::job::{IntegrationResult, JobState};
use splice_flow::rollback::{
    ExecutionState, RollbackExecutor, RollbackPlanner, RollbackTrigger, StepStatus,
    TriggerCondition, TriggerMonitor, TriggerSeverity, TriggerSignals,
};
use splice_flow::service::IntegrationService;
use splice_flow::store::{ExecutionFilter, InMemoryStore, JobFilter, Store};
use splice_flow::strategy::IntegrationStrategy;
use splice_flow::validate::PerformanceDelta;

struct Harness {
    runner: Arc<ScriptedRunner>,
    files: Arc<MemoryFiles>,
    store: Arc<InMemoryStore>,
    service: IntegrationService,
}

fn harness() -> Harness {
    let runner = Arc::new(ScriptedRunner::new());
    let files = Arc::new(MemoryFiles::new());
    let store = Arc::new(InMemoryStore::new());
    let service = IntegrationService::new(runner.clone(), files.clone(), store.clone());
    Harness {
        runner,
        files,
        store,
        service,
    }
}

fn twofile_feature() -> PrioritizedFeature {
    PrioritizedFeature::new(
        "full-text search",
        vec![
            FeatureFile::added("src/search.ts", 200, Complexity::Medium),
            FeatureFile::modified("src/app.ts", 15, 4, Complexity::Low),
        ],
    )
}

#[tokio::test]
async fn full_lifecycle_direct_apply() {
    let h = harness();
    h.files.seed("src/app.ts", b"export {};");

    let result = h
        .service
        .integrate(&twofile_feature(), IntegrationStrategy::direct())
        .await
        .unwrap();

    assert_eq!(result.changes.len(), 2);
    assert_eq!(result.changes[0].path, "src/search.ts");
    assert_eq!(result.changes[0].change_type, ChangeType::FileAdded);
    assert_eq!(result.changes[1].path, "src/app.ts");

    let job = h.service.get_job_status(result.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress, 100);

    // Each phase left its mark in the log trail.
    for step in ["pre_validation", "backup", "apply", "test", "validate"] {
        assert!(
            job.log.iter().any(|e| e.step == step),
            "no log event for phase {step}"
        );
    }
}

/// A failing critical rollback step stops the remaining steps.
#[tokio::test]
async fn critical_rollback_step_failure_aborts_plan() {
    let runner = Arc::new(ScriptedRunner::new());
    let store = Arc::new(InMemoryStore::new());

    // Three applied changes; after reversal, revert-b runs second, fails,
    // and is critical because the change carried high risk.
    let changes = vec![
        CodeChange::new(
            ChangeType::FileModified,
            "a.ts",
            Complexity::Low,
            RiskLevel::Low,
            CommandSpec::new("revert-a"),
        ),
        CodeChange::new(
            ChangeType::FileModified,
            "b.ts",
            Complexity::Medium,
            RiskLevel::High,
            CommandSpec::new("revert-b"),
        ),
        CodeChange::new(
            ChangeType::FileModified,
            "c.ts",
            Complexity::Low,
            RiskLevel::Low,
            CommandSpec::new("revert-c"),
        ),
    ];
    runner.script("revert-b", CommandOutput::failed(1, "merge conflict"));

    let ledger = IntegrationResult {
        job_id: JobId::generate(),
        feature_id: FeatureId::generate(),
        changes,
        test_results: Vec::new(),
        performance: PerformanceDelta::default(),
        validations: Vec::new(),
        completed_at: chrono::Utc::now(),
    };
    let plan = RollbackPlanner::new().plan(&ledger);

    let execution = RollbackExecutor::new(runner.clone(), store)
        .execute(&plan, "manual", "test")
        .await
        .unwrap();

    assert_eq!(execution.state, ExecutionState::Failed);
    let result = execution.result.as_ref().unwrap();
    assert!(result.failed_steps >= 1);

    // revert-c ran (first after reversal), revert-b failed, revert-a and
    // the validation step never started.
    assert_eq!(execution.steps.len(), 2);
    assert_eq!(execution.steps[0].status, StepStatus::Completed);
    assert_eq!(execution.steps[1].status, StepStatus::Failed);
    assert!(!runner.invocations().iter().any(|c| c.command == "revert-a"));
}

/// Gradual apply creates every flag, in order, before any file change.
#[tokio::test]
async fn gradual_apply_orders_flags_before_file_changes() {
    let h = harness();
    h.files.seed("src/app.ts", b"export {};");

    let strategy = IntegrationStrategy::gradual(vec![
        FeatureFlagConfig::new("search-enabled"),
        FeatureFlagConfig::new("search-ui"),
    ]);
    let result = h
        .service
        .integrate(&twofile_feature(), strategy)
        .await
        .unwrap();

    let job = h.service.get_job_status(result.job_id).await.unwrap();
    let flag_indices: Vec<usize> = job
        .log
        .iter()
        .enumerate()
        .filter(|(_, e)| e.step == "flag_setup")
        .map(|(i, _)| i)
        .collect();
    let first_file_apply = job
        .log
        .iter()
        .position(|e| e.step == "apply" && e.message.starts_with("applied "))
        .expect("file apply events present");

    assert_eq!(flag_indices.len(), 2);
    assert!(flag_indices.iter().all(|&i| i < first_file_apply));
    assert!(job.log[flag_indices[0]].message.contains("search-enabled"));
    assert!(job.log[flag_indices[1]].message.contains("search-ui"));

    // Flags exist as config changes ahead of the file changes.
    assert!(h.files.exists("config/flags/search-enabled.json").await.unwrap());
    assert_eq!(result.changes.len(), 4);
    assert_eq!(result.changes[0].change_type, ChangeType::ConfigUpdated);
    assert_eq!(result.changes[1].change_type, ChangeType::ConfigUpdated);
}

/// Parallel apply over disjoint groups produces the union of both groups.
#[tokio::test]
async fn parallel_apply_covers_all_groups() {
    let h = harness();
    h.files.seed("src/app.ts", b"export {};");

    let strategy = IntegrationStrategy::parallel(vec![
        FileGroup::new("engine", ["src/search.ts"]),
        FileGroup::new("wiring", ["src/app.ts"]),
    ]);
    let result = h
        .service
        .integrate(&twofile_feature(), strategy)
        .await
        .unwrap();

    let mut paths: Vec<&str> = result.changes.iter().map(|c| c.path.as_str()).collect();
    paths.sort_unstable();
    assert_eq!(paths, vec!["src/app.ts", "src/search.ts"]);
}

/// Overlapping parallel groups are rejected before any mutation.
#[tokio::test]
async fn overlapping_parallel_groups_rejected_pre_mutation() {
    let h = harness();
    h.files.seed("src/app.ts", b"export {};");

    let strategy = IntegrationStrategy::parallel(vec![
        FileGroup::new("one", ["src/search.ts", "src/app.ts"]),
        FileGroup::new("two", ["src/app.ts"]),
    ]);
    let result = h.service.integrate(&twofile_feature(), strategy).await;

    assert!(matches!(result, Err(Error::InvalidStrategy { .. })));
    assert!(h
        .service
        .list_jobs(&JobFilter::default())
        .await
        .unwrap()
        .is_empty());
    assert!(h.runner.invocations().is_empty());
}

/// A failed integration rolls back automatically and the job ends
/// `RolledBack`; a second rollback of the same plan is rejected.
#[tokio::test]
async fn failed_job_rolls_back_once() {
    let h = harness();
    h.files.seed("src/app.ts", b"export {};");
    h.runner.script(
        "npm",
        CommandOutput {
            exit_code: 1,
            stdout: "Tests: 3 failed, 37 passed, 40 total".into(),
            stderr: String::new(),
            success: false,
        },
    );

    let err = h
        .service
        .integrate(&twofile_feature(), IntegrationStrategy::direct())
        .await
        .unwrap_err();
    let Error::IntegrationFailed { job_id, source } = err else {
        panic!("expected IntegrationFailed, got {err}");
    };
    assert!(matches!(*source, Error::TestFailure { failed: 3, .. }));

    let job = h.service.get_job_status(job_id).await.unwrap();
    assert_eq!(job.state, JobState::RolledBack);
    assert!(job.rollback.unwrap().succeeded);

    let executions = h
        .service
        .list_rollback_executions(&ExecutionFilter::default())
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].triggered_by, "automatic");

    // The same plan cannot run again.
    let second = h
        .service
        .execute_rollback(executions[0].plan_id, "manual", "again")
        .await;
    assert!(matches!(second, Err(Error::RollbackFailure { .. })));
}

/// Rollback step order is the exact reverse of forward change order.
#[tokio::test]
async fn rollback_undoes_changes_in_reverse_order() {
    let h = harness();
    h.files.seed("src/app.ts", b"export {};");
    h.runner.script(
        "npm",
        CommandOutput {
            exit_code: 1,
            stdout: "Tests: 1 failed, 39 passed, 40 total".into(),
            stderr: String::new(),
            success: false,
        },
    );

    let feature = twofile_feature();
    let _ = h
        .service
        .integrate(&feature, IntegrationStrategy::direct())
        .await;

    let executions = h
        .service
        .list_rollback_executions(&ExecutionFilter::default())
        .await
        .unwrap();
    let steps = &executions[0].steps;

    // Forward order was search.ts then app.ts; reversal restores app.ts
    // first, then deletes the added search.ts, then validates.
    assert!(steps[0].description.contains("src/app.ts"));
    assert!(steps[1].description.contains("src/search.ts"));
    assert!(steps[2].description.contains("verify"));
}

/// A fired monitoring trigger drives its stored plan to completion with
/// `triggered_by = "automatic"`.
#[tokio::test]
async fn fired_trigger_executes_stored_plan() {
    let h = harness();
    h.files.seed("src/app.ts", b"export {};");

    let result = h
        .service
        .integrate(&twofile_feature(), IntegrationStrategy::direct())
        .await
        .unwrap();

    // Plan ahead of deployment, with an error-rate trigger attached.
    let trigger = RollbackTrigger::automatic(
        TriggerCondition::ErrorRateAbove { threshold: 0.05 },
        TriggerSeverity::High,
    );
    let planner = RollbackPlanner::new().with_triggers(vec![trigger]);
    let plan = planner.plan(&result);
    h.store.save_plan(&plan).await.unwrap();

    // Production degrades past the threshold; the fire names the plan.
    let mut monitor = TriggerMonitor::for_plan(&plan);
    let fired = monitor.evaluate(
        &TriggerSignals {
            error_rate: 0.12,
            response_time_ms: 180.0,
            baseline_response_time_ms: 150.0,
        },
        chrono::Utc::now(),
    );
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].plan_id, plan.id);

    let execution = h.service.handle_trigger_fire(&fired[0]).await.unwrap();

    assert_eq!(execution.state, ExecutionState::Completed);
    assert_eq!(execution.triggered_by, "automatic");
    assert!(execution.reason.contains("error rate"));
    assert_eq!(execution.progress, 100);
}

/// The executed rollback commands are the recorded inverses.
#[tokio::test]
async fn rollback_runs_recorded_inverse_commands() {
    let runner = Arc::new(ScriptedRunner::new());
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());

    let ledger = IntegrationResult {
        job_id: JobId::generate(),
        feature_id: FeatureId::generate(),
        changes: vec![CodeChange::new(
            ChangeType::FileAdded,
            "src/new.ts",
            Complexity::Low,
            RiskLevel::Low,
            CommandSpec::new("rm").with_args(["-f", "src/new.ts"]),
        )],
        test_results: Vec::new(),
        performance: PerformanceDelta::default(),
        validations: Vec::new(),
        completed_at: chrono::Utc::now(),
    };
    let plan = RollbackPlanner::new().plan(&ledger);
    store.save_plan(&plan).await.unwrap();

    RollbackExecutor::new(runner.clone(), store)
        .execute(&plan, "manual", "cleanup")
        .await
        .unwrap();

    let commands: Vec<String> = runner
        .invocations()
        .iter()
        .map(splice_core::CommandSpec::display_line)
        .collect();
    assert!(commands.iter().any(|c| c == "rm -f src/new.ts"));
}
