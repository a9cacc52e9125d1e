//! Performance thresholds and final validation checks.
//!
//! Performance validation compares measured deltas against fixed thresholds;
//! final validation runs compatibility, security, and branding checks. Both
//! gate job completion but neither mutates system state.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Allowed load-time regression in percent. Anything above is fatal.
pub const LOAD_TIME_THRESHOLD_PCT: f64 = 10.0;
/// Allowed bundle-size growth in percent.
pub const BUNDLE_SIZE_THRESHOLD_PCT: f64 = 15.0;
/// Allowed memory growth in percent.
pub const MEMORY_THRESHOLD_PCT: f64 = 20.0;
/// Allowed render-time regression in percent.
pub const RENDER_TIME_THRESHOLD_PCT: f64 = 10.0;

/// Measured performance deltas after integration, in percent change from
/// the pre-integration baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceDelta {
    /// Bundle size change.
    pub bundle_size_pct: f64,
    /// Load time change.
    pub load_time_pct: f64,
    /// Memory usage change.
    pub memory_pct: f64,
    /// Render time change.
    pub render_time_pct: f64,
}

impl PerformanceDelta {
    /// Checks every delta against its fixed threshold.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PerformanceRegression`] for the first metric over
    /// threshold, checked in severity order (load time first).
    pub fn check(&self) -> Result<()> {
        let checks = [
            ("load_time", self.load_time_pct, LOAD_TIME_THRESHOLD_PCT),
            ("render_time", self.render_time_pct, RENDER_TIME_THRESHOLD_PCT),
            ("bundle_size", self.bundle_size_pct, BUNDLE_SIZE_THRESHOLD_PCT),
            ("memory", self.memory_pct, MEMORY_THRESHOLD_PCT),
        ];
        for (metric, delta_pct, threshold_pct) in checks {
            if delta_pct > threshold_pct {
                return Err(Error::PerformanceRegression {
                    metric: metric.into(),
                    delta_pct,
                    threshold_pct,
                });
            }
        }
        Ok(())
    }
}

/// Outcome of one validation check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// Check name.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Whether a failure blocks completion.
    pub required: bool,
    /// Explanatory messages.
    #[serde(default)]
    pub messages: Vec<String>,
}

impl ValidationResult {
    /// Creates a passing result.
    #[must_use]
    pub fn pass(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            passed: true,
            required,
            messages: Vec::new(),
        }
    }

    /// Creates a failing result with a message.
    #[must_use]
    pub fn fail(name: impl Into<String>, required: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            required,
            messages: vec![message.into()],
        }
    }
}

/// Returns the first failing required validation, if any.
///
/// # Errors
///
/// Returns [`Error::Validation`] for the first required check that failed.
pub fn check_required(results: &[ValidationResult]) -> Result<()> {
    for result in results {
        if result.required && !result.passed {
            return Err(Error::Validation {
                check: result.name.clone(),
                message: result
                    .messages
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "check failed".into()),
            });
        }
    }
    Ok(())
}
