//! Strategy-specific apply algorithms.
//!
//! The three apply approaches form a closed set dispatched on the
//! [`ApplyApproach`] variant:
//!
//! - `Direct`: file changes in fixed order
//! - `Gradual`: feature flags created first (order preserved, logged), then
//!   direct changes gated behind them
//! - `Parallel`: disjoint file groups applied concurrently, files within a
//!   group sequentially
//!
//! Apply never loses work on failure: the report always carries the changes
//! applied so far, so the executor can derive a rollback plan covering
//! exactly what happened.

use std::sync::Arc;

use futures::future::join_all;

use splice_core::{CommandRunner, CommandSpec, FileStore};

use crate::change::{ChangeType, CodeChange};
use crate::error::{Error, Result};
use crate::events::LogEvent;
use crate::feature::{FeatureFile, FeatureFlagConfig, FileGroup, PrioritizedFeature};
use crate::strategy::ApplyApproach;

/// Capabilities the apply algorithms run against.
#[derive(Clone)]
pub struct ApplyContext {
    /// Command execution capability.
    pub runner: Arc<dyn CommandRunner>,
    /// Scoped file capability.
    pub files: Arc<dyn FileStore>,
}

/// What an apply pass did, successful or not.
///
/// `changes` and `events` are populated even when `failure` is set; the
/// executor rolls back exactly the recorded changes.
pub struct ApplyReport {
    /// Changes applied, in application order (within a parallel group).
    pub changes: Vec<CodeChange>,
    /// Log events, in emission order (within a parallel group).
    pub events: Vec<LogEvent>,
    /// The first failure, when the pass did not complete.
    pub failure: Option<Error>,
}

impl ApplyReport {
    fn ok(changes: Vec<CodeChange>, events: Vec<LogEvent>) -> Self {
        Self {
            changes,
            events,
            failure: None,
        }
    }
}

/// Applies the feature under the given approach.
///
/// # Errors
///
/// Infrastructure errors (spawn failures, timeouts) propagate directly.
/// Command failures are reported through [`ApplyReport::failure`] together
/// with the changes applied so far.
pub async fn apply_feature(
    feature: &PrioritizedFeature,
    approach: &ApplyApproach,
    ctx: &ApplyContext,
) -> Result<ApplyReport> {
    match approach {
        ApplyApproach::Direct => apply_direct(feature, &feature.files, ctx).await,
        ApplyApproach::Gradual { flags } => apply_gradual(feature, flags, ctx).await,
        ApplyApproach::Parallel { groups } => apply_parallel(feature, groups, ctx).await,
    }
}

/// Applies file changes one at a time, in the feature's declared order.
async fn apply_direct(
    feature: &PrioritizedFeature,
    files: &[FeatureFile],
    ctx: &ApplyContext,
) -> Result<ApplyReport> {
    let mut changes = Vec::new();
    let mut events = Vec::new();

    for file in files {
        let apply_cmd = apply_command(feature, file);
        let output = ctx.runner.run(&apply_cmd).await?;
        if !output.success {
            events.push(LogEvent::error(
                "apply",
                format!("applying {} failed", file.path),
            ));
            return Ok(ApplyReport {
                changes,
                events,
                failure: Some(Error::command_failed(apply_cmd.display_line(), &output)),
            });
        }

        let change = record_file_change(feature, file);
        events.push(LogEvent::info("apply", format!("applied {}", file.path)));
        changes.push(change);
    }

    Ok(ApplyReport::ok(changes, events))
}

/// Creates every feature flag first, then applies direct changes behind them.
async fn apply_gradual(
    feature: &PrioritizedFeature,
    flags: &[FeatureFlagConfig],
    ctx: &ApplyContext,
) -> Result<ApplyReport> {
    let mut changes = Vec::new();
    let mut events = Vec::new();

    // All flags are created, in order, strictly before any file change.
    for flag in flags {
        let path = flag_path(&flag.name);
        let payload = serde_json::to_vec(flag).map_err(|e| Error::Serialization {
            message: format!("feature flag '{}': {e}", flag.name),
        })?;
        ctx.files.write(&path, &payload).await?;

        events.push(LogEvent::info(
            "flag_setup",
            format!("created feature flag '{}'", flag.name),
        ));
        changes.push(
            CodeChange::new(
                ChangeType::ConfigUpdated,
                path.clone(),
                crate::feature::Complexity::Low,
                crate::feature::RiskLevel::Low,
                CommandSpec::new("rm").with_args(["-f", &path]),
            )
            .with_checks(["flag_registered"]),
        );
    }

    let mut direct = apply_direct(feature, &feature.files, ctx).await?;
    changes.append(&mut direct.changes);
    events.append(&mut direct.events);

    Ok(ApplyReport {
        changes,
        events,
        failure: direct.failure,
    })
}

/// Applies disjoint groups concurrently; files within a group sequentially.
///
/// Cross-group change order is unspecified; intra-group order is preserved.
/// Group disjointness was established by strategy validation.
async fn apply_parallel(
    feature: &PrioritizedFeature,
    groups: &[FileGroup],
    ctx: &ApplyContext,
) -> Result<ApplyReport> {
    let group_files: Vec<(String, Vec<FeatureFile>)> = groups
        .iter()
        .map(|group| {
            let files = feature
                .files
                .iter()
                .filter(|f| group.paths.iter().any(|p| p == &f.path))
                .cloned()
                .collect();
            (group.name.clone(), files)
        })
        .collect();

    let reports = join_all(
        group_files
            .iter()
            .map(|(_, files)| apply_direct(feature, files, ctx)),
    )
    .await;

    let mut changes = Vec::new();
    let mut events = Vec::new();
    let mut failure = None;

    for ((name, _), report) in group_files.iter().zip(reports) {
        let mut report = report?;
        events.push(LogEvent::info(
            "apply",
            format!("group '{name}' applied {} change(s)", report.changes.len()),
        ));
        changes.append(&mut report.changes);
        events.append(&mut report.events);
        if failure.is_none() {
            failure = report.failure;
        }
    }

    Ok(ApplyReport {
        changes,
        events,
        failure,
    })
}

/// Store path for a feature flag definition.
fn flag_path(name: &str) -> String {
    format!("config/flags/{name}.json")
}

/// The forward mutation for one file.
fn apply_command(feature: &PrioritizedFeature, file: &FeatureFile) -> CommandSpec {
    CommandSpec::new("git").with_args([
        "apply".to_string(),
        format!("--include={}", file.path),
        format!(".splice/patches/{}.patch", feature.id),
    ])
}

/// Records the applied change with its inverse.
fn record_file_change(feature: &PrioritizedFeature, file: &FeatureFile) -> CodeChange {
    let (change_type, rollback) = if file.is_new {
        (
            ChangeType::FileAdded,
            CommandSpec::new("rm").with_args(["-f", &file.path]),
        )
    } else if file.lines_added == 0 && file.lines_removed > 0 {
        (
            ChangeType::FileDeleted,
            CommandSpec::new("git").with_args(["checkout", "--", &file.path]),
        )
    } else {
        (
            ChangeType::FileModified,
            CommandSpec::new("git").with_args(["checkout", "--", &file.path]),
        )
    };

    CodeChange::new(change_type, &file.path, file.complexity, feature.risk, rollback)
        .with_lines(file.lines_added, file.lines_removed)
        .with_checks(["compiles", "lints"])
}
