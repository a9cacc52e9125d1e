//! Test tier execution.
//!
//! Each [`TestTier`] maps to one external command. Tiers run sequentially in
//! the order implied by the strategy's [`TestingApproach`]; the first tier
//! reporting failures aborts the job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use splice_core::{CommandRunner, CommandSpec};

use crate::error::{Error, Result};
use crate::strategy::{TestTier, TestingApproach};

/// Result of running one test tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunResult {
    /// The tier that ran.
    pub tier: TestTier,
    /// Whether the tier passed.
    pub passed: bool,
    /// Total cases, when the runner reported them.
    #[serde(default)]
    pub total: u32,
    /// Failed cases, when the runner reported them.
    #[serde(default)]
    pub failed: u32,
    /// Wall-clock duration in milliseconds.
    #[serde(default)]
    pub duration_ms: i64,
}

/// Runs test tiers through the command capability.
pub struct TestHarness {
    runner: Arc<dyn CommandRunner>,
    commands: HashMap<TestTier, CommandSpec>,
}

impl TestHarness {
    /// Creates a harness with conventional npm-style tier commands.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let mut commands = HashMap::new();
        commands.insert(
            TestTier::Unit,
            CommandSpec::new("npm").with_args(["run", "test:unit"]),
        );
        commands.insert(
            TestTier::Integration,
            CommandSpec::new("npm").with_args(["run", "test:integration"]),
        );
        commands.insert(
            TestTier::EndToEnd,
            CommandSpec::new("npm").with_args(["run", "test:e2e"]),
        );
        Self { runner, commands }
    }

    /// Overrides the command for one tier.
    #[must_use]
    pub fn with_command(mut self, tier: TestTier, spec: CommandSpec) -> Self {
        self.commands.insert(tier, spec);
        self
    }

    /// Runs every tier implied by the approach, in order, stopping at the
    /// first failing tier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TestFailure`] when a tier fails, carrying the
    /// parsed case counts.
    pub async fn run(&self, approach: TestingApproach) -> Result<Vec<TestRunResult>> {
        let mut results = Vec::new();
        for tier in approach.tiers() {
            results.push(self.run_tier(tier).await?);
        }
        Ok(results)
    }

    async fn run_tier(&self, tier: TestTier) -> Result<TestRunResult> {
        let spec = self
            .commands
            .get(&tier)
            .cloned()
            .unwrap_or_else(|| CommandSpec::new("true"));

        let started = Utc::now();
        let output = self.runner.run(&spec).await?;
        let duration_ms = (Utc::now() - started).num_milliseconds();

        let (total, failed) = parse_case_counts(&output.stdout);

        if output.success && failed == 0 {
            Ok(TestRunResult {
                tier,
                passed: true,
                total,
                failed: 0,
                duration_ms,
            })
        } else {
            Err(Error::TestFailure {
                tier: tier.to_string(),
                failed: failed.max(1),
                total: total.max(failed.max(1)),
            })
        }
    }
}

/// Parses `N passed`/`N failed` counts from runner output.
///
/// Unknown formats yield `(0, 0)`; the exit code remains authoritative.
fn parse_case_counts(stdout: &str) -> (u32, u32) {
    let mut passed = 0u32;
    let mut failed = 0u32;
    let tokens: Vec<&str> = stdout.split_whitespace().collect();
    for window in tokens.windows(2) {
        if let Ok(count) = window[0].parse::<u32>() {
            match window[1].trim_end_matches([',', '.']) {
                "passed" | "passing" => passed = count,
                "failed" | "failing" => failed = count,
                _ => {}
            }
        }
    }
    (passed + failed, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_core::{CommandOutput, ScriptedRunner};

    #[test]
    fn parses_jest_style_summary() {
        let (total, failed) = parse_case_counts("Tests: 2 failed, 38 passed, 40 total");
        assert_eq!(total, 40);
        assert_eq!(failed, 2);
    }

    #[test]
    fn unknown_output_yields_zero_counts() {
        assert_eq!(parse_case_counts("all good"), (0, 0));
    }

    #[tokio::test]
    async fn all_tiers_run_in_order() {
        let runner = Arc::new(ScriptedRunner::new());
        let harness = TestHarness::new(runner.clone());

        let results = harness.run(TestingApproach::All).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].tier, TestTier::Unit);
        assert_eq!(results[2].tier, TestTier::EndToEnd);

        let invocations = runner.invocations();
        assert_eq!(invocations[0].args, vec!["run", "test:unit"]);
        assert_eq!(invocations[2].args, vec!["run", "test:e2e"]);
    }

    #[tokio::test]
    async fn failing_tier_aborts_with_counts() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("npm", CommandOutput::ok("")); // unit passes
        runner.script(
            "npm",
            CommandOutput {
                exit_code: 1,
                stdout: "Tests: 3 failed, 37 passed, 40 total".into(),
                stderr: String::new(),
                success: false,
            },
        );

        let harness = TestHarness::new(runner.clone());
        let result = harness.run(TestingApproach::All).await;

        match result {
            Err(Error::TestFailure { tier, failed, total }) => {
                assert_eq!(tier, "integration");
                assert_eq!(failed, 3);
                assert_eq!(total, 40);
            }
            other => panic!("expected TestFailure, got {other:?}"),
        }
        // e2e tier never ran.
        assert_eq!(runner.invocations().len(), 2);
    }

    #[tokio::test]
    async fn single_tier_approach_runs_once() {
        let runner = Arc::new(ScriptedRunner::new());
        let harness = TestHarness::new(runner.clone());

        let results = harness.run(TestingApproach::Unit).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
    }
}
