//! End-of-run report shared by every batch command.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{error, warn};

use crate::error::AppError;

/// One unit that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitError {
    pub unit: String,
    pub message: String,
}

/// Counts by decision plus everything that went wrong.
///
/// Validation errors skip their unit and are reported as warnings; any
/// other error marks the unit failed and makes the whole run fail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub operation: String,
    pub dry_run: bool,
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub decisions: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
    pub errors: Vec<UnitError>,
}

impl BatchSummary {
    pub fn new(operation: impl Into<String>, dry_run: bool) -> Self {
        Self {
            operation: operation.into(),
            dry_run,
            ..Self::default()
        }
    }

    /// Counts a processed unit under `decision`.
    pub fn record(&mut self, decision: &str) {
        self.total += 1;
        self.succeeded += 1;
        *self.decisions.entry(decision.to_string()).or_default() += 1;
    }

    /// Counts a unit that needed no work, e.g. an already imported row.
    pub fn record_skipped(&mut self, reason: &str) {
        self.total += 1;
        self.skipped += 1;
        *self.decisions.entry(reason.to_string()).or_default() += 1;
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(message);
    }

    /// Records a unit that raised `err`.
    pub fn record_error(&mut self, unit: impl Into<String>, err: &AppError) {
        let unit = unit.into();
        self.total += 1;
        if err.is_validation() {
            self.skipped += 1;
            self.warn(format!("{unit}: skipped: {err}"));
            return;
        }
        error!("{unit}: {err}");
        self.failed += 1;
        self.errors.push(UnitError {
            unit,
            message: err.to_string(),
        });
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// The decision count for `decision`, zero when never seen.
    pub fn count(&self, decision: &str) -> usize {
        self.decisions.get(decision).copied().unwrap_or(0)
    }

    /// Turns a run with failed units into [`AppError::BatchFailed`].
    pub fn into_result(self) -> Result<Self, AppError> {
        if self.has_failures() {
            return Err(AppError::BatchFailed {
                failed: self.failed,
                total: self.total,
            });
        }
        Ok(self)
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        writeln!(f, "{}{mode}", self.operation)?;
        writeln!(
            f,
            "  {} processed, {} ok, {} skipped, {} failed",
            self.total, self.succeeded, self.skipped, self.failed
        )?;
        for (decision, count) in &self.decisions {
            writeln!(f, "  {decision:<24} {count:>6}")?;
        }
        if !self.warnings.is_empty() {
            writeln!(f, "Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  - {warning}")?;
            }
        }
        if !self.errors.is_empty() {
            writeln!(f, "Errors:")?;
            for err in &self.errors {
                writeln!(f, "  - {}: {}", err.unit, err.message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_decision() {
        let mut summary = BatchSummary::new("import", false);
        summary.record("exact_match");
        summary.record("exact_match");
        summary.record("create_new");
        summary.record_skipped("already_resolved");

        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.count("exact_match"), 2);
        assert_eq!(summary.count("hyphen_variant"), 0);
        assert!(!summary.has_failures());
    }

    #[test]
    fn test_validation_errors_skip_instead_of_failing() {
        let mut summary = BatchSummary::new("mappings apply", false);
        summary.record_error("mapping 3", &AppError::validation("would orphan observations"));
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.warnings.len(), 1);
        assert!(summary.clone().into_result().is_ok());

        summary.record_error("mapping 4", &AppError::Custom("disk full".to_string()));
        assert!(summary.has_failures());
        let err = summary.into_result().unwrap_err();
        assert!(matches!(err, AppError::BatchFailed { failed: 1, total: 2 }));
    }

    #[test]
    fn test_display_and_json() {
        let mut summary = BatchSummary::new("consolidate case", true);
        summary.record("merged");
        summary.warn("renamed 'anna berg' to 'Anna Berg'");

        let text = summary.to_string();
        assert!(text.starts_with("consolidate case (dry run)"));
        assert!(text.contains("merged"));
        assert!(text.contains("Warnings:"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["decisions"]["merged"], 1);
    }
}
