// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! The validator abstraction.
//!
//! A check is an async closure returning [`CheckResult`]. [`run_test`] times
//! it and classifies the outcome into a [`ValidationResult`]; it never returns
//! an error. [`BaseValidator`] collects the results of one run, and the
//! [`Validator`] trait is the single entry point the framework calls.

use crate::details::Details;
use crate::error::{CheckError, ValidatorError};
use crate::model::{Status, ValidationResult};
use crate::stats::duration_ms;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Instant;
use tracing::{error, info, warn};

/// What a check concluded when it ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// All invariants held.
    Passed(Details),
    /// Functional but below target.
    Warning {
        /// Which targets were missed.
        message: String,
        /// Diagnostic payload.
        details: Details,
    },
    /// A hard threshold was breached. Assertion failures use
    /// [`CheckError::Assertion`] instead; this variant keeps the details.
    Failed {
        /// Which limits were breached.
        message: String,
        /// Diagnostic payload.
        details: Details,
    },
    /// The check decided not to run.
    Skipped {
        /// Why.
        reason: String,
    },
}

impl CheckOutcome {
    /// Passed with no details.
    pub fn pass() -> Self {
        CheckOutcome::Passed(Details::none())
    }

    /// Passed with details.
    pub fn passed(details: impl Into<Details>) -> Self {
        CheckOutcome::Passed(details.into())
    }

    /// Warning with details.
    pub fn warning(message: impl Into<String>, details: impl Into<Details>) -> Self {
        CheckOutcome::Warning {
            message: message.into(),
            details: details.into(),
        }
    }

    /// Failure with details.
    pub fn failed(message: impl Into<String>, details: impl Into<Details>) -> Self {
        CheckOutcome::Failed {
            message: message.into(),
            details: details.into(),
        }
    }

    /// Skipped.
    pub fn skipped(reason: impl Into<String>) -> Self {
        CheckOutcome::Skipped {
            reason: reason.into(),
        }
    }

    /// Pick passed, warning or failed from collected issue lists.
    ///
    /// Hard issues fail, soft issues warn; messages join the issues with
    /// `"; "` so every breached metric is named.
    pub fn from_issues(
        hard: &[String],
        soft: &[String],
        details: impl Into<Details>,
    ) -> Self {
        if !hard.is_empty() {
            CheckOutcome::failed(hard.join("; "), details)
        } else if !soft.is_empty() {
            CheckOutcome::warning(soft.join("; "), details)
        } else {
            CheckOutcome::passed(details)
        }
    }
}

/// Return type of every check.
pub type CheckResult = Result<CheckOutcome, CheckError>;

/// Run one check, time it and classify its outcome.
///
/// An assertion failure becomes a failed result carrying the assertion text.
/// Any other error becomes a failed result with `"Unexpected error: ..."`,
/// and the full error is logged.
pub async fn run_test<F, Fut>(test_name: &str, check: F) -> ValidationResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = CheckResult>,
{
    info!(test_name = %test_name, "Running test");
    let start = Instant::now();
    let outcome = check().await;
    let elapsed = duration_ms(start.elapsed());

    let result = match outcome {
        Ok(CheckOutcome::Passed(details)) => {
            info!(test_name = %test_name, execution_time_ms = elapsed, "Test passed");
            ValidationResult::passed(test_name, elapsed, details)
        }
        Ok(CheckOutcome::Warning { message, details }) => {
            warn!(test_name = %test_name, warning = %message, "Test passed with warnings");
            ValidationResult::warning(test_name, elapsed, message, details)
        }
        Ok(CheckOutcome::Failed { message, details }) => {
            error!(test_name = %test_name, error = %message, "Test failed");
            ValidationResult::failed(test_name, elapsed, message, details)
        }
        Ok(CheckOutcome::Skipped { reason }) => {
            info!(test_name = %test_name, reason = %reason, "Test skipped");
            ValidationResult::skipped(test_name, reason)
        }
        Err(CheckError::Assertion(message)) => {
            error!(test_name = %test_name, error = %message, "Test failed");
            ValidationResult::failed(test_name, elapsed, message, Details::none())
        }
        Err(err) => {
            error!(test_name = %test_name, error = ?err, "Test error");
            ValidationResult::failed(
                test_name,
                elapsed,
                format!("Unexpected error: {err}"),
                Details::none(),
            )
        }
    };

    metrics::counter!("validation_results_total", "status" => result.status().as_str())
        .increment(1);
    result
}

/// Run a teardown step, logging instead of raising on failure.
///
/// Returns the value on success so callers can report what was removed.
pub async fn best_effort<T, E, Fut>(what: &str, cleanup: Fut) -> Option<T>
where
    E: Display,
    Fut: Future<Output = Result<T, E>>,
{
    match cleanup.await {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(cleanup = %what, error = %err, "Cleanup failed");
            None
        }
    }
}

/// Counts derived from one validator's results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSummary {
    /// Validator name.
    pub validator: String,
    /// Results recorded.
    pub total_tests: usize,
    /// Passed results.
    pub passed: usize,
    /// Failed results.
    pub failed: usize,
    /// Warning results.
    pub warnings: usize,
    /// Skipped results.
    pub skipped: usize,
    /// `passed / total`.
    pub success_rate: f64,
    /// Mean execution time.
    pub avg_execution_time_ms: f64,
}

impl ValidatorSummary {
    /// Summarize `results` recorded by `validator`.
    pub fn from_results(validator: &str, results: &[ValidationResult]) -> Self {
        let count = |status: Status| results.iter().filter(|r| r.status() == status).count();
        let total = results.len();
        let passed = count(Status::Passed);
        let (success_rate, avg_execution_time_ms) = if total > 0 {
            (
                passed as f64 / total as f64,
                results.iter().map(|r| r.execution_time_ms()).sum::<f64>() / total as f64,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            validator: validator.to_string(),
            total_tests: total,
            passed,
            failed: count(Status::Failed),
            warnings: count(Status::Warning),
            skipped: count(Status::Skipped),
            success_rate,
            avg_execution_time_ms,
        }
    }
}

/// Result collector for one validator run.
#[derive(Debug)]
pub struct BaseValidator {
    name: String,
    results: Vec<ValidationResult>,
}

impl BaseValidator {
    /// Empty collector for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            results: Vec::new(),
        }
    }

    /// Validator name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run a check, record its result and return it.
    pub async fn run_test<F, Fut>(&mut self, test_name: &str, check: F) -> ValidationResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CheckResult>,
    {
        let result = run_test(test_name, check).await;
        self.results.push(result.clone());
        result
    }

    /// Record a result produced elsewhere (e.g. a mapped health check).
    pub fn record(&mut self, result: ValidationResult) -> ValidationResult {
        self.results.push(result.clone());
        result
    }

    /// Results so far.
    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    /// Summary over the results so far.
    pub fn summary(&self) -> ValidatorSummary {
        ValidatorSummary::from_results(&self.name, &self.results)
    }

    /// Hand over the results of this run.
    pub fn finish(self) -> Vec<ValidationResult> {
        self.results
    }
}

/// A themed bundle of checks.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Name used in logs and synthetic failure results.
    fn name(&self) -> &str;

    /// Run every check and return one result per check.
    async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::details::CountDetails;
    use crate::error::{ensure, StoreError};

    #[tokio::test]
    async fn test_passing_check() {
        let result = run_test("ok", || async { Ok(CheckOutcome::pass()) }).await;
        assert_eq!(result.status(), Status::Passed);
        assert!(result.execution_time_ms() >= 0.0);
        assert!(result.error_message().is_none());
    }

    #[tokio::test]
    async fn test_assertion_failure_keeps_text() {
        let result = run_test("dup", || async {
            ensure(false, || "Duplicate entity was created".to_string())?;
            Ok(CheckOutcome::pass())
        })
        .await;
        assert_eq!(result.status(), Status::Failed);
        assert_eq!(result.error_message(), Some("Duplicate entity was created"));
    }

    #[tokio::test]
    async fn test_unexpected_error_is_wrapped() {
        let result = run_test("db", || async {
            Err(StoreError::ConnectionLost("reset".into()).into())
        })
        .await;
        assert_eq!(result.status(), Status::Failed);
        assert_eq!(
            result.error_message(),
            Some("Unexpected error: Connection lost: reset")
        );
    }

    #[tokio::test]
    async fn test_warning_and_skip() {
        let warn = run_test("slow", || async {
            Ok(CheckOutcome::warning("p95 too high", CountDetails::new(1, 2)))
        })
        .await;
        assert_eq!(warn.status(), Status::Warning);
        assert_eq!(warn.warning_message(), Some("p95 too high"));

        let skip = run_test("skip", || async { Ok(CheckOutcome::skipped("no api")) }).await;
        assert_eq!(skip.status(), Status::Skipped);
    }

    #[tokio::test]
    async fn test_base_validator_records_every_run() {
        let mut base = BaseValidator::new("unit");
        base.run_test("a", || async { Ok(CheckOutcome::pass()) }).await;
        base.run_test("b", || async { Err(CheckError::assertion("no")) }).await;
        base.record(ValidationResult::warning("c", 4.0, "meh", Details::none()));

        let summary = base.summary();
        assert_eq!(summary.total_tests, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.warnings, 1);

        let results = base.finish();
        let names: Vec<_> = results.iter().map(|r| r.test_name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_outcome_from_issues() {
        let hard = vec!["error rate 60% > 50%".to_string()];
        let soft = vec!["p95 1200ms > 1000ms".to_string()];
        assert!(matches!(
            CheckOutcome::from_issues(&hard, &soft, Details::none()),
            CheckOutcome::Failed { ref message, .. } if message == "error rate 60% > 50%"
        ));
        assert!(matches!(
            CheckOutcome::from_issues(&[], &soft, Details::none()),
            CheckOutcome::Warning { .. }
        ));
        assert!(matches!(
            CheckOutcome::from_issues(&[], &[], Details::none()),
            CheckOutcome::Passed(_)
        ));
    }

    #[tokio::test]
    async fn test_best_effort_swallows_errors() {
        let removed = best_effort("rows", async { Ok::<_, StoreError>(3u64) }).await;
        assert_eq!(removed, Some(3));
        let failed = best_effort("rows", async {
            Err::<u64, _>(StoreError::Query("gone".into()))
        })
        .await;
        assert!(failed.is_none());
    }

    #[test]
    fn test_summary_of_nothing() {
        let summary = ValidatorSummary::from_results("empty", &[]);
        assert_eq!(summary.total_tests, 0);
        assert_eq!(summary.avg_execution_time_ms, 0.0);
    }
}
