//! Integration strategy configuration and validation.
//!
//! The apply approach is a closed tagged variant rather than a string field:
//! each variant carries exactly the payload its apply algorithm needs, so an
//! invalid combination (gradual without flags, parallel without groups) is
//! representable only long enough for [`IntegrationStrategy::validate`] to
//! reject it before anything runs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feature::{FeatureFlagConfig, FileGroup, PrioritizedFeature};

/// How code changes are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "approach")]
pub enum ApplyApproach {
    /// Apply each file change in a fixed order.
    Direct,
    /// Create feature flags first, then apply changes gated behind them.
    Gradual {
        /// Flags to create, in order.
        flags: Vec<FeatureFlagConfig>,
    },
    /// Apply disjoint file groups concurrently.
    Parallel {
        /// Independent file groups.
        groups: Vec<FileGroup>,
    },
}

impl ApplyApproach {
    /// Returns a label for logs and metrics.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Gradual { .. } => "gradual",
            Self::Parallel { .. } => "parallel",
        }
    }
}

/// Which test tiers run after apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestingApproach {
    /// Unit tests only.
    Unit,
    /// Integration tests only.
    Integration,
    /// End-to-end tests only.
    EndToEnd,
    /// All tiers, unit first.
    All,
}

impl TestingApproach {
    /// Returns the tiers implied by this approach, in execution order.
    #[must_use]
    pub fn tiers(&self) -> Vec<TestTier> {
        match self {
            Self::Unit => vec![TestTier::Unit],
            Self::Integration => vec![TestTier::Integration],
            Self::EndToEnd => vec![TestTier::EndToEnd],
            Self::All => vec![TestTier::Unit, TestTier::Integration, TestTier::EndToEnd],
        }
    }
}

/// One concrete test tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestTier {
    /// Unit test tier.
    Unit,
    /// Integration test tier.
    Integration,
    /// End-to-end test tier.
    EndToEnd,
}

impl std::fmt::Display for TestTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unit => write!(f, "unit"),
            Self::Integration => write!(f, "integration"),
            Self::EndToEnd => write!(f, "e2e"),
        }
    }
}

/// How the applied feature reaches users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStrategy {
    /// Live immediately. No automatic rollback on failure: immediate rollout
    /// is an explicit acceptance of the risk.
    Immediate,
    /// Ramped to users over time.
    Gradual,
    /// Small canary cohort first.
    Canary,
}

impl RolloutStrategy {
    /// Returns a label for logs and metrics.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Gradual => "gradual",
            Self::Canary => "canary",
        }
    }
}

/// Full strategy configuration for one integration job.
///
/// Created by the caller before the job starts; immutable for the job's
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStrategy {
    /// Apply algorithm and its payload.
    #[serde(flatten)]
    pub approach: ApplyApproach,
    /// Test tiers to run.
    pub testing: TestingApproach,
    /// Rollout strategy.
    pub rollout: RolloutStrategy,
    /// Whether files and config are backed up before apply.
    pub backup_required: bool,
    /// Whether final validation gates completion.
    pub validation_required: bool,
}

impl IntegrationStrategy {
    /// Creates a direct-apply strategy with full testing and backups.
    #[must_use]
    pub const fn direct() -> Self {
        Self {
            approach: ApplyApproach::Direct,
            testing: TestingApproach::All,
            rollout: RolloutStrategy::Gradual,
            backup_required: true,
            validation_required: true,
        }
    }

    /// Creates a gradual strategy behind the given flags.
    #[must_use]
    pub fn gradual(flags: Vec<FeatureFlagConfig>) -> Self {
        Self {
            approach: ApplyApproach::Gradual { flags },
            ..Self::direct()
        }
    }

    /// Creates a parallel strategy over the given groups.
    #[must_use]
    pub fn parallel(groups: Vec<FileGroup>) -> Self {
        Self {
            approach: ApplyApproach::Parallel { groups },
            ..Self::direct()
        }
    }

    /// Sets the testing approach.
    #[must_use]
    pub const fn with_testing(mut self, testing: TestingApproach) -> Self {
        self.testing = testing;
        self
    }

    /// Sets the rollout strategy.
    #[must_use]
    pub const fn with_rollout(mut self, rollout: RolloutStrategy) -> Self {
        self.rollout = rollout;
        self
    }

    /// Disables pre-apply backups.
    #[must_use]
    pub const fn without_backup(mut self) -> Self {
        self.backup_required = false;
        self
    }

    /// Validates this strategy against the feature it will apply.
    ///
    /// Pure: no side effects, safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStrategy`] when:
    /// - a gradual approach carries no feature flags
    /// - a parallel approach has no groups, an empty group, overlapping
    ///   groups, or groups naming files the feature does not touch
    /// - a canary rollout is combined with a direct apply
    pub fn validate(&self, feature: &PrioritizedFeature) -> Result<()> {
        match &self.approach {
            ApplyApproach::Direct => {}
            ApplyApproach::Gradual { flags } => {
                if flags.is_empty() {
                    return Err(Error::InvalidStrategy {
                        message: "gradual approach requires at least one feature flag".into(),
                    });
                }
            }
            ApplyApproach::Parallel { groups } => {
                Self::validate_groups(groups, feature)?;
            }
        }

        if self.rollout == RolloutStrategy::Canary
            && matches!(self.approach, ApplyApproach::Direct)
        {
            return Err(Error::InvalidStrategy {
                message: "canary rollout requires a gradual or parallel approach".into(),
            });
        }

        Ok(())
    }

    fn validate_groups(groups: &[FileGroup], feature: &PrioritizedFeature) -> Result<()> {
        if groups.is_empty() {
            return Err(Error::InvalidStrategy {
                message: "parallel approach requires at least one file group".into(),
            });
        }

        let known: HashSet<&str> = feature.files.iter().map(|f| f.path.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();

        for group in groups {
            if group.paths.is_empty() {
                return Err(Error::InvalidStrategy {
                    message: format!("file group '{}' is empty", group.name),
                });
            }
            for path in &group.paths {
                if !known.contains(path.as_str()) {
                    return Err(Error::InvalidStrategy {
                        message: format!(
                            "file group '{}' names '{path}' which the feature does not touch",
                            group.name
                        ),
                    });
                }
                if !seen.insert(path.as_str()) {
                    return Err(Error::InvalidStrategy {
                        message: format!("file '{path}' appears in more than one group"),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Complexity, FeatureFile};

    fn feature_with(paths: &[&str]) -> PrioritizedFeature {
        PrioritizedFeature::new(
            "test feature",
            paths
                .iter()
                .map(|p| FeatureFile::modified(*p, 10, 2, Complexity::Low))
                .collect(),
        )
    }

    #[test]
    fn direct_strategy_is_valid() {
        let feature = feature_with(&["src/a.ts"]);
        assert!(IntegrationStrategy::direct().validate(&feature).is_ok());
    }

    #[test]
    fn gradual_without_flags_is_rejected() {
        let feature = feature_with(&["src/a.ts"]);
        let strategy = IntegrationStrategy::gradual(vec![]);
        let result = strategy.validate(&feature);
        assert!(matches!(result, Err(Error::InvalidStrategy { .. })));
    }

    #[test]
    fn gradual_with_flag_is_valid() {
        let feature = feature_with(&["src/a.ts"]);
        let strategy = IntegrationStrategy::gradual(vec![FeatureFlagConfig::new("new-ui")]);
        assert!(strategy.validate(&feature).is_ok());
    }

    #[test]
    fn overlapping_groups_are_rejected() {
        let feature = feature_with(&["src/a.ts", "src/b.ts"]);
        let strategy = IntegrationStrategy::parallel(vec![
            FileGroup::new("one", ["src/a.ts", "src/b.ts"]),
            FileGroup::new("two", ["src/b.ts"]),
        ]);
        let result = strategy.validate(&feature);
        assert!(matches!(result, Err(Error::InvalidStrategy { .. })));
    }

    #[test]
    fn group_with_unknown_file_is_rejected() {
        let feature = feature_with(&["src/a.ts"]);
        let strategy =
            IntegrationStrategy::parallel(vec![FileGroup::new("one", ["src/missing.ts"])]);
        assert!(strategy.validate(&feature).is_err());
    }

    #[test]
    fn disjoint_groups_are_valid() {
        let feature = feature_with(&["src/a.ts", "src/b.ts", "src/c.ts"]);
        let strategy = IntegrationStrategy::parallel(vec![
            FileGroup::new("one", ["src/a.ts"]),
            FileGroup::new("two", ["src/b.ts", "src/c.ts"]),
        ]);
        assert!(strategy.validate(&feature).is_ok());
    }

    #[test]
    fn canary_requires_staged_approach() {
        let feature = feature_with(&["src/a.ts"]);
        let strategy = IntegrationStrategy::direct().with_rollout(RolloutStrategy::Canary);
        assert!(strategy.validate(&feature).is_err());

        let strategy = IntegrationStrategy::gradual(vec![FeatureFlagConfig::new("f")])
            .with_rollout(RolloutStrategy::Canary);
        assert!(strategy.validate(&feature).is_ok());
    }

    #[test]
    fn testing_approach_all_expands_in_order() {
        assert_eq!(
            TestingApproach::All.tiers(),
            vec![TestTier::Unit, TestTier::Integration, TestTier::EndToEnd]
        );
    }
}
