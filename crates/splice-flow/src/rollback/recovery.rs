//! Recovery strategies for failed rollbacks.
//!
//! The recovery engine is the last rung of the failure ladder. It is
//! consulted only when the rollback executor itself fails, picks the first
//! registered strategy applicable to the failure scenario, and applies that
//! strategy's automated steps. A plan is never automatically retried beyond
//! this.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use splice_core::{CommandRunner, CommandSpec};

use crate::error::Result;
use crate::events::LogEvent;

/// The failure class a strategy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryScenario {
    /// The rollback execution failed partway through.
    RollbackFailure,
    /// A backup the rollback depends on is missing or unreadable.
    BackupMissing,
    /// Rollback commands keep timing out.
    CommandTimeout,
}

/// One recovery action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStep {
    /// What this step does.
    pub description: String,
    /// The command to run, when the step is automatable.
    pub command: Option<CommandSpec>,
    /// Automated steps run without operator involvement.
    pub automated: bool,
}

impl RecoveryStep {
    /// An automated step backed by a command.
    #[must_use]
    pub fn automated(description: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            description: description.into(),
            command: Some(command),
            automated: true,
        }
    }

    /// A manual step, recorded for the operator.
    #[must_use]
    pub fn manual(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            command: None,
            automated: false,
        }
    }
}

/// A registered way out of a failed rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStrategy {
    /// Strategy identifier.
    pub id: Ulid,
    /// Strategy name, for logs.
    pub name: String,
    /// Which failure classes this strategy handles.
    pub scenarios: Vec<RecoveryScenario>,
    /// Steps in application order.
    pub steps: Vec<RecoveryStep>,
    /// Expected wall-clock time to complete.
    #[serde(with = "humantime_serde")]
    pub estimated_time: Duration,
    /// Historical success rate, 0.0 to 1.0.
    pub success_rate: f64,
}

impl RecoveryStrategy {
    /// Creates a strategy.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        scenarios: Vec<RecoveryScenario>,
        steps: Vec<RecoveryStep>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            name: name.into(),
            scenarios,
            steps,
            estimated_time: Duration::from_secs(10 * 60),
            success_rate: 0.0,
        }
    }

    /// Whether the strategy applies to a scenario.
    #[must_use]
    pub fn applies_to(&self, scenario: RecoveryScenario) -> bool {
        self.scenarios.contains(&scenario)
    }
}

/// What applying a strategy did.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOutcome {
    /// Which strategy was applied.
    pub strategy_name: String,
    /// How many automated steps ran successfully.
    pub steps_succeeded: usize,
    /// How many automated steps failed.
    pub steps_failed: usize,
    /// Manual steps left for the operator.
    pub manual_steps: Vec<String>,
    /// Log trail of the recovery attempt.
    pub events: Vec<LogEvent>,
}

/// Matches failure scenarios to strategies and applies them.
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    strategies: Vec<RecoveryStrategy>,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self {
            strategies: vec![default_rollback_failure_strategy()],
        }
    }
}

impl RecoveryEngine {
    /// An engine with only the built-in strategies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine with an explicit strategy list, in match priority order.
    #[must_use]
    pub fn with_strategies(strategies: Vec<RecoveryStrategy>) -> Self {
        Self { strategies }
    }

    /// The first registered strategy applicable to the scenario.
    #[must_use]
    pub fn find(&self, scenario: RecoveryScenario) -> Option<&RecoveryStrategy> {
        self.strategies.iter().find(|s| s.applies_to(scenario))
    }

    /// Finds and applies a strategy for the scenario.
    ///
    /// Automated steps run in order through the runner; a failing step is
    /// recorded and the remaining steps still run. Manual steps are
    /// collected for the operator. Returns `None` when no strategy applies.
    ///
    /// # Errors
    ///
    /// Infrastructure errors from the runner (spawn failures) propagate.
    #[tracing::instrument(skip(self, runner))]
    pub async fn recover(
        &self,
        scenario: RecoveryScenario,
        runner: &Arc<dyn CommandRunner>,
    ) -> Result<Option<RecoveryOutcome>> {
        let Some(strategy) = self.find(scenario) else {
            return Ok(None);
        };

        let mut events = vec![LogEvent::warn(
            "recovery",
            format!("applying recovery strategy '{}'", strategy.name),
        )];
        let mut steps_succeeded = 0;
        let mut steps_failed = 0;
        let mut manual_steps = Vec::new();

        for step in &strategy.steps {
            if !step.automated {
                manual_steps.push(step.description.clone());
                events.push(LogEvent::info(
                    "recovery",
                    format!("manual step recorded: {}", step.description),
                ));
                continue;
            }
            let Some(spec) = &step.command else {
                continue;
            };
            let output = runner.run(spec).await?;
            if output.success {
                steps_succeeded += 1;
                events.push(LogEvent::info("recovery", step.description.clone()));
            } else {
                steps_failed += 1;
                events.push(LogEvent::error(
                    "recovery",
                    format!("recovery step failed: {}", step.description),
                ));
            }
        }

        Ok(Some(RecoveryOutcome {
            strategy_name: strategy.name.clone(),
            steps_succeeded,
            steps_failed,
            manual_steps,
            events,
        }))
    }
}

/// Built-in strategy for a rollback that failed partway.
fn default_rollback_failure_strategy() -> RecoveryStrategy {
    RecoveryStrategy {
        estimated_time: Duration::from_secs(15 * 60),
        success_rate: 0.85,
        ..RecoveryStrategy::new(
            "stabilize-and-escalate",
            vec![RecoveryScenario::RollbackFailure],
            vec![
                RecoveryStep::automated(
                    "capture working tree state",
                    CommandSpec::new("git").with_args(["stash", "push", "--include-untracked"]),
                ),
                RecoveryStep::automated(
                    "reset tracked files to last commit",
                    CommandSpec::new("git").with_args(["checkout", "--", "."]),
                ),
                RecoveryStep::manual("review stashed state and restore configuration backups"),
            ],
        )
    }
}
