//! Property-based tests for splice-flow invariants.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use tokio_test::block_on;

use splice_core::{CommandSpec, FeatureId, FileStore, JobId, MemoryFiles, PlanId};
use splice_flow::change::{ChangeType, CodeChange};
use splice_flow::config::{merge_configurations, ConfigMerger, MergeStrategy};
use splice_flow::feature::{Complexity, RiskLevel};
use splice_flow::job::IntegrationResult;
use splice_flow::rollback::{
    RollbackPlanner, RollbackStepType, RollbackTrigger, TriggerCondition, TriggerMonitor,
    TriggerSeverity, TriggerSignals,
};
use splice_flow::validate::PerformanceDelta;

fn arb_change_type() -> impl Strategy<Value = ChangeType> {
    prop::sample::select(vec![
        ChangeType::FileAdded,
        ChangeType::FileModified,
        ChangeType::FileDeleted,
        ChangeType::DependencyAdded,
        ChangeType::ConfigUpdated,
    ])
}

fn arb_complexity() -> impl Strategy<Value = Complexity> {
    prop::sample::select(vec![Complexity::Low, Complexity::Medium, Complexity::High])
}

fn arb_risk() -> impl Strategy<Value = RiskLevel> {
    prop::sample::select(vec![
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ])
}

/// Generates an arbitrary change ledger with per-change unique inverses.
fn arb_ledger() -> impl Strategy<Value = Vec<CodeChange>> {
    prop::collection::vec((arb_change_type(), arb_complexity(), arb_risk()), 1..20).prop_map(
        |entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(i, (change_type, complexity, risk))| {
                    CodeChange::new(
                        change_type,
                        format!("src/file_{i}.ts"),
                        complexity,
                        risk,
                        CommandSpec::new(format!("revert-{i}")),
                    )
                })
                .collect()
        },
    )
}

fn ledger_result(changes: Vec<CodeChange>) -> IntegrationResult {
    IntegrationResult {
        job_id: JobId::generate(),
        feature_id: FeatureId::generate(),
        changes,
        test_results: Vec::new(),
        performance: PerformanceDelta::default(),
        validations: Vec::new(),
        completed_at: Utc::now(),
    }
}

proptest! {
    /// Plan steps are always the exact reverse of the change ledger.
    #[test]
    fn plan_steps_reverse_the_ledger(changes in arb_ledger()) {
        let result = ledger_result(changes);
        let plan = RollbackPlanner::new().plan(&result);

        prop_assert_eq!(plan.steps.len(), result.changes.len());
        for (i, step) in plan.steps.iter().enumerate() {
            let change = &result.changes[result.changes.len() - 1 - i];
            prop_assert_eq!(&step.commands[0].spec, &change.rollback_command);
        }
    }

    /// Every plan ends with exactly one critical validation step.
    #[test]
    fn plan_always_appends_validation(changes in arb_ledger()) {
        let plan = RollbackPlanner::new().plan(&ledger_result(changes));

        prop_assert_eq!(plan.validation_steps.len(), 1);
        let validation = &plan.validation_steps[0];
        prop_assert_eq!(validation.step_type, RollbackStepType::Validation);
        prop_assert!(validation.critical);
        prop_assert_eq!(plan.total_steps(), plan.steps.len() + 1);
    }

    /// Estimated duration is the sum of per-step estimates.
    #[test]
    fn plan_duration_sums_step_estimates(changes in arb_ledger()) {
        let plan = RollbackPlanner::new().plan(&ledger_result(changes));

        let step_minutes: u64 = plan
            .steps
            .iter()
            .chain(&plan.validation_steps)
            .map(|s| u64::from(s.estimated_minutes))
            .sum();
        prop_assert_eq!(plan.estimated_duration.as_secs(), step_minutes * 60);
    }

    /// A trigger never fires more than `max_triggers` times, and
    /// consecutive fires are at least one cooldown apart, no matter how
    /// often it is evaluated.
    #[test]
    fn trigger_honors_limits_under_any_schedule(
        offsets in prop::collection::vec(0i64..100_000, 1..200),
        cooldown_secs in 1u64..600,
        max_triggers in 1u32..5,
    ) {
        let mut ticks = offsets;
        ticks.sort_unstable();

        let trigger = RollbackTrigger::automatic(
            TriggerCondition::ErrorRateAbove { threshold: 0.05 },
            TriggerSeverity::High,
        )
        .with_cooldown(std::time::Duration::from_secs(cooldown_secs))
        .with_max_triggers(max_triggers);
        let mut monitor = TriggerMonitor::new(PlanId::generate(), vec![trigger]);

        let degraded = TriggerSignals {
            error_rate: 0.5,
            response_time_ms: 100.0,
            baseline_response_time_ms: 100.0,
        };
        let epoch = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let mut fires = Vec::new();
        for tick in ticks {
            let now = epoch + ChronoDuration::seconds(tick);
            fires.extend(monitor.evaluate(&degraded, now));
        }

        prop_assert!(fires.len() <= max_triggers as usize);
        for pair in fires.windows(2) {
            let spacing = pair[1].fired_at.signed_duration_since(pair[0].fired_at);
            prop_assert!(spacing >= ChronoDuration::seconds(cooldown_secs as i64));
        }
    }

    /// Merging keeps every incoming key and never loses a base key that
    /// the incoming map does not mention.
    #[test]
    fn merge_preserves_untouched_base_keys(
        base_keys in prop::collection::hash_set("[a-z]{1,8}", 0..10),
        incoming_keys in prop::collection::hash_set("[a-z]{1,8}", 0..10),
        strategy in prop::sample::select(vec![
            MergeStrategy::Override,
            MergeStrategy::Merge,
            MergeStrategy::Append,
        ]),
    ) {
        let base: serde_json::Map<String, serde_json::Value> = base_keys
            .iter()
            .map(|k| (k.clone(), serde_json::Value::from(1)))
            .collect();
        let incoming: serde_json::Map<String, serde_json::Value> = incoming_keys
            .iter()
            .map(|k| (k.clone(), serde_json::Value::from(2)))
            .collect();

        let merged = merge_configurations(&base, &incoming, strategy);

        for key in &incoming_keys {
            prop_assert_eq!(merged.get(key), incoming.get(key));
        }
        for key in base_keys.difference(&incoming_keys) {
            prop_assert_eq!(merged.get(key), base.get(key));
        }
    }

    /// Append concatenates arrays key by key, preserving base order first.
    #[test]
    fn append_concatenates_array_values(
        base_items in prop::collection::vec(0i64..100, 0..8),
        incoming_items in prop::collection::vec(0i64..100, 0..8),
    ) {
        let base: serde_json::Map<String, serde_json::Value> =
            [("list".to_string(), serde_json::Value::from(base_items.clone()))]
                .into_iter()
                .collect();
        let incoming: serde_json::Map<String, serde_json::Value> =
            [("list".to_string(), serde_json::Value::from(incoming_items.clone()))]
                .into_iter()
                .collect();

        let merged = merge_configurations(&base, &incoming, MergeStrategy::Append);

        let mut expected = base_items;
        expected.extend(incoming_items);
        prop_assert_eq!(merged.get("list"), Some(&serde_json::Value::from(expected)));
    }

    /// Restoring a backup returns the store to its exact pre-backup state,
    /// no matter what was written in between.
    #[test]
    fn backup_restore_roundtrip(
        original in prop::collection::vec(any::<u8>(), 0..256),
        scribble in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        block_on(async {
            let files = Arc::new(MemoryFiles::new());
            files.seed("config/app.json", original.clone());
            let merger = ConfigMerger::new(files.clone());

            let handle = merger.backup(["config/app.json"]).await.unwrap();
            files.write("config/app.json", &scribble).await.unwrap();
            merger.restore(&handle).await.unwrap();

            assert_eq!(files.read("config/app.json").await.unwrap(), original);
        });
    }
}
