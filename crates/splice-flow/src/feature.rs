//! Feature inputs from the upstream analysis pipeline.
//!
//! A [`PrioritizedFeature`] arrives fully analyzed: files to touch,
//! dependencies to add, risk and effort already classified. Splice treats it
//! as immutable input and never re-scores it.

use serde::{Deserialize, Serialize};

use splice_core::FeatureId;

/// Risk classification shared by features, changes, and rollback plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Low risk.
    Low,
    /// Medium risk.
    Medium,
    /// High risk.
    High,
    /// Critical risk.
    Critical,
}

impl RiskLevel {
    /// Returns true for high or critical risk.
    #[must_use]
    pub const fn is_elevated(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Complexity classification for changes and rollback estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Simple, mechanical change.
    Low,
    /// Moderate change.
    Medium,
    /// Complex change requiring care to undo.
    High,
}

impl Complexity {
    /// Estimated minutes to undo a change of this complexity.
    #[must_use]
    pub const fn rollback_minutes(&self) -> u32 {
        match self {
            Self::Low => 2,
            Self::Medium => 5,
            Self::High => 10,
        }
    }
}

/// Category assigned by the upstream gap analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    /// User-facing functionality.
    Functional,
    /// Visual or layout work.
    Ui,
    /// Performance improvement.
    Performance,
    /// Security hardening.
    Security,
    /// Internal refactor or tooling.
    Infrastructure,
}

/// One file the feature will touch, with its analyzed shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFile {
    /// Store-relative path.
    pub path: String,
    /// Lines expected to be added.
    #[serde(default)]
    pub lines_added: u32,
    /// Lines expected to be removed.
    #[serde(default)]
    pub lines_removed: u32,
    /// Analyzed complexity of the change to this file.
    pub complexity: Complexity,
    /// True when the file does not exist yet.
    #[serde(default)]
    pub is_new: bool,
}

impl FeatureFile {
    /// Creates a new-file entry.
    #[must_use]
    pub fn added(path: impl Into<String>, lines: u32, complexity: Complexity) -> Self {
        Self {
            path: path.into(),
            lines_added: lines,
            lines_removed: 0,
            complexity,
            is_new: true,
        }
    }

    /// Creates a modified-file entry.
    #[must_use]
    pub fn modified(
        path: impl Into<String>,
        added: u32,
        removed: u32,
        complexity: Complexity,
    ) -> Self {
        Self {
            path: path.into(),
            lines_added: added,
            lines_removed: removed,
            complexity,
            is_new: false,
        }
    }
}

/// A feature flag created ahead of gradual apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagConfig {
    /// Flag name.
    pub name: String,
    /// Human-readable purpose.
    #[serde(default)]
    pub description: String,
    /// Whether the flag starts enabled.
    #[serde(default)]
    pub default_enabled: bool,
    /// Initial rollout percentage (0-100).
    #[serde(default)]
    pub rollout_percent: u8,
}

impl FeatureFlagConfig {
    /// Creates a disabled flag with 0% rollout.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            default_enabled: false,
            rollout_percent: 0,
        }
    }
}

/// A named group of files applied together under the parallel approach.
///
/// Groups must be pairwise disjoint; the strategy selector enforces this
/// before any mutation happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileGroup {
    /// Group name for logs.
    pub name: String,
    /// Paths belonging to this group.
    pub paths: Vec<String>,
}

impl FileGroup {
    /// Creates a named group.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// A prioritized unit of change produced by the upstream analysis pipeline.
///
/// Immutable once produced; Splice only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritizedFeature {
    /// Unique feature identifier.
    pub id: FeatureId,
    /// Short title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Files the feature touches.
    pub files: Vec<FeatureFile>,
    /// Package dependencies the feature introduces (`name@version`).
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Configuration keys the feature introduces or changes.
    #[serde(default)]
    pub config_updates: serde_json::Map<String, serde_json::Value>,
    /// Estimated effort in hours.
    #[serde(default)]
    pub estimated_effort_hours: u32,
    /// Analyzed risk level.
    pub risk: RiskLevel,
    /// Feature category.
    pub category: FeatureCategory,
}

impl PrioritizedFeature {
    /// Creates a minimal feature for the given files.
    #[must_use]
    pub fn new(title: impl Into<String>, files: Vec<FeatureFile>) -> Self {
        Self {
            id: FeatureId::generate(),
            title: title.into(),
            description: String::new(),
            files,
            dependencies: Vec::new(),
            config_updates: serde_json::Map::new(),
            estimated_effort_hours: 0,
            risk: RiskLevel::Low,
            category: FeatureCategory::Functional,
        }
    }

    /// Sets the risk level.
    #[must_use]
    pub const fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    /// Adds package dependencies.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Adds configuration updates.
    #[must_use]
    pub fn with_config_updates(
        mut self,
        updates: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.config_updates = updates;
        self
    }

    /// Returns true if any touched file is high complexity.
    #[must_use]
    pub fn has_high_complexity(&self) -> bool {
        self.files.iter().any(|f| f.complexity == Complexity::High)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert!(RiskLevel::High.is_elevated());
        assert!(!RiskLevel::Medium.is_elevated());
    }

    #[test]
    fn complexity_rollback_minutes() {
        assert_eq!(Complexity::High.rollback_minutes(), 10);
        assert_eq!(Complexity::Medium.rollback_minutes(), 5);
        assert_eq!(Complexity::Low.rollback_minutes(), 2);
    }

    #[test]
    fn feature_builder_collects_dependencies() {
        let feature = PrioritizedFeature::new(
            "dark mode",
            vec![FeatureFile::added("src/theme.ts", 120, Complexity::Medium)],
        )
        .with_risk(RiskLevel::Medium)
        .with_dependencies(["color-scheme@2.1.0"]);

        assert_eq!(feature.dependencies, vec!["color-scheme@2.1.0"]);
        assert_eq!(feature.risk, RiskLevel::Medium);
        assert!(!feature.has_high_complexity());
    }
}
