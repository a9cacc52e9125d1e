//! The append-only code change ledger.
//!
//! Every mutation the executor performs is recorded as a [`CodeChange`] with
//! a known inverse. Changes are never mutated after creation; the rollback
//! planner reads them in application order and reverses them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use splice_core::{ChangeId, CommandSpec};

use crate::feature::{Complexity, RiskLevel};

/// Kind of recorded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// A new file was created.
    FileAdded,
    /// An existing file was modified.
    FileModified,
    /// An existing file was deleted.
    FileDeleted,
    /// A package dependency was added.
    DependencyAdded,
    /// A configuration store was updated.
    ConfigUpdated,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileAdded => write!(f, "file_added"),
            Self::FileModified => write!(f, "file_modified"),
            Self::FileDeleted => write!(f, "file_deleted"),
            Self::DependencyAdded => write!(f, "dependency_added"),
            Self::ConfigUpdated => write!(f, "config_updated"),
        }
    }
}

/// One atomic, recorded mutation with a known inverse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    /// Unique change identifier.
    pub id: ChangeId,
    /// Kind of mutation.
    pub change_type: ChangeType,
    /// Store-relative path (file path, dependency name, or config key).
    pub path: String,
    /// Lines added.
    #[serde(default)]
    pub lines_added: u32,
    /// Lines removed.
    #[serde(default)]
    pub lines_removed: u32,
    /// Analyzed complexity.
    pub complexity: Complexity,
    /// Risk level of this individual change.
    pub risk: RiskLevel,
    /// The command that undoes this change.
    pub rollback_command: CommandSpec,
    /// Names of validation checks this change must pass.
    #[serde(default)]
    pub validation_checks: Vec<String>,
    /// When the change was applied.
    pub applied_at: DateTime<Utc>,
}

impl CodeChange {
    /// Records a change applied now, with its inverse.
    #[must_use]
    pub fn new(
        change_type: ChangeType,
        path: impl Into<String>,
        complexity: Complexity,
        risk: RiskLevel,
        rollback_command: CommandSpec,
    ) -> Self {
        Self {
            id: ChangeId::generate(),
            change_type,
            path: path.into(),
            lines_added: 0,
            lines_removed: 0,
            complexity,
            risk,
            rollback_command,
            validation_checks: Vec::new(),
            applied_at: Utc::now(),
        }
    }

    /// Sets the line counts.
    #[must_use]
    pub const fn with_lines(mut self, added: u32, removed: u32) -> Self {
        self.lines_added = added;
        self.lines_removed = removed;
        self
    }

    /// Adds validation check names.
    #[must_use]
    pub fn with_checks<I, S>(mut self, checks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validation_checks
            .extend(checks.into_iter().map(Into::into));
        self
    }
}
