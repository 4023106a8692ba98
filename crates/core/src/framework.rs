// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sequential suite runner.

use crate::details::ExecutionFailure;
use crate::model::{Status, ValidationReport, ValidationResult};
use crate::validator::{Validator, ValidatorSummary};
use chrono::Utc;
use std::fmt::Write as _;
use tracing::{error, info};

/// Default suite name.
pub const DEFAULT_SUITE_NAME: &str = "Memory System Validation";

/// Runs validators one after another and aggregates their results.
///
/// Validators share the same collaborators, so they never run concurrently.
pub struct ValidationFramework {
    name: String,
    validators: Vec<Box<dyn Validator>>,
}

impl Default for ValidationFramework {
    fn default() -> Self {
        Self::new(DEFAULT_SUITE_NAME)
    }
}

impl ValidationFramework {
    /// Empty suite.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            validators: Vec::new(),
        }
    }

    /// Suite name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a validator; validators run in insertion order.
    pub fn add_validator(&mut self, validator: Box<dyn Validator>) {
        info!(validator = %validator.name(), "Added validator");
        self.validators.push(validator);
    }

    /// Builder form of [`Self::add_validator`].
    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.add_validator(Box::new(validator));
        self
    }

    /// Number of registered validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether no validator is registered.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Run every validator and build the report.
    ///
    /// A validator returning an error contributes one failed
    /// `"{validator}_execution"` result and the suite continues.
    pub async fn run_all_validations(&self) -> ValidationReport {
        let start_time = Utc::now();
        info!(suite = %self.name, validators = self.validators.len(), "Starting validation suite");

        let mut all_results = Vec::new();
        for validator in &self.validators {
            let name = validator.name();
            info!(validator = %name, "Running validator");

            match validator.run_validation().await {
                Ok(results) => {
                    let summary = ValidatorSummary::from_results(name, &results);
                    info!(
                        validator = %name,
                        passed = summary.passed,
                        total = summary.total_tests,
                        success_rate = summary.success_rate,
                        "Validator completed"
                    );
                    all_results.extend(results);
                }
                Err(err) => {
                    error!(validator = %name, error = ?err, "Validator failed");
                    all_results.push(ValidationResult::failed(
                        format!("{name}_execution"),
                        0.0,
                        format!("Validator execution failed: {err}"),
                        ExecutionFailure {
                            validator: name.to_string(),
                        }
                        .into(),
                    ));
                }
            }
        }

        let report =
            ValidationReport::from_results(self.name.clone(), start_time, Utc::now(), all_results);
        info!(
            suite = %self.name,
            passed = report.summary.passed,
            total = report.summary.total_tests,
            duration_seconds = report.summary.duration_seconds,
            "Validation suite completed"
        );
        report
    }
}

/// Render the human-readable summary of a report.
pub fn render_summary(report: &ValidationReport) -> String {
    let rule = "=".repeat(60);
    let s = &report.summary;
    let mut out = String::new();

    let _ = writeln!(out, "\n{rule}");
    let _ = writeln!(out, "MEMORY SYSTEM VALIDATION REPORT");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Test Suite: {}", report.suite_name);
    let _ = writeln!(out, "Duration: {:.1} seconds", s.duration_seconds);
    let _ = writeln!(out, "Total Tests: {}", s.total_tests);
    let _ = writeln!(out, "Passed: {}", s.passed);
    let _ = writeln!(out, "Failed: {}", s.failed);
    let _ = writeln!(out, "Warnings: {}", s.warnings);
    let _ = writeln!(out, "Skipped: {}", s.skipped);
    let _ = writeln!(out, "Success Rate: {:.1}%", s.success_rate * 100.0);

    if s.failed > 0 {
        let _ = writeln!(out, "\nFAILED TESTS:");
        for result in report.with_status(Status::Failed) {
            let _ = writeln!(
                out,
                "   - {}: {}",
                result.test_name(),
                result.error_message().unwrap_or_default()
            );
        }
    }

    if s.warnings > 0 {
        let _ = writeln!(out, "\nWARNING TESTS:");
        for result in report.with_status(Status::Warning) {
            let _ = writeln!(
                out,
                "   - {}: {}",
                result.test_name(),
                result.warning_message().unwrap_or_default()
            );
        }
    }

    let _ = writeln!(out, "\n{rule}");
    out
}

/// Print [`render_summary`] to stdout.
pub fn print_summary(report: &ValidationReport) {
    print!("{}", render_summary(report));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidatorError;
    use crate::validator::{BaseValidator, CheckOutcome};
    use crate::error::CheckError;
    use async_trait::async_trait;

    struct Healthy;

    #[async_trait]
    impl Validator for Healthy {
        fn name(&self) -> &str {
            "healthy"
        }

        async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
            let mut base = BaseValidator::new(self.name());
            base.run_test("first", || async { Ok(CheckOutcome::pass()) }).await;
            base.run_test("second", || async {
                Ok(CheckOutcome::warning("slow", crate::details::Details::none()))
            })
            .await;
            base.run_test("third", || async { Err(CheckError::assertion("broken")) })
                .await;
            Ok(base.finish())
        }
    }

    struct Broken;

    #[async_trait]
    impl Validator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
            Err(ValidatorError::Setup {
                validator: "broken".into(),
                reason: "no pool".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_broken_validator_does_not_abort_suite() {
        let framework = ValidationFramework::new("suite")
            .with_validator(Broken)
            .with_validator(Healthy);

        let report = framework.run_all_validations().await;
        assert_eq!(report.summary.total_tests, 4);
        assert_eq!(report.results[0].test_name(), "broken_execution");
        assert_eq!(report.results[0].execution_time_ms(), 0.0);
        assert_eq!(
            report.results[0].error_message(),
            Some("Validator execution failed: broken setup failed: no pool")
        );
        assert_eq!(report.results[1].test_name(), "first");
        assert_eq!(report.summary.failed, 2);
        assert_eq!(report.summary.warnings, 1);
    }

    #[tokio::test]
    async fn test_empty_framework() {
        let framework = ValidationFramework::default();
        assert!(framework.is_empty());
        let report = framework.run_all_validations().await;
        assert_eq!(report.summary.total_tests, 0);
        assert_eq!(report.suite_name, DEFAULT_SUITE_NAME);
    }

    #[tokio::test]
    async fn test_render_summary_lists_failures_and_warnings() {
        let framework = ValidationFramework::new("suite").with_validator(Healthy);
        let report = framework.run_all_validations().await;
        let before = report.clone();

        let text = render_summary(&report);
        assert!(text.contains("Total Tests: 3"));
        assert!(text.contains("Success Rate: 33.3%"));
        assert!(text.contains("FAILED TESTS:"));
        assert!(text.contains("   - third: broken"));
        assert!(text.contains("   - second: slow"));
        assert_eq!(report, before);
    }
}
