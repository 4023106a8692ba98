// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Result and report records.
//!
//! Every record here is built once and never mutated afterwards. A
//! [`ValidationResult`] can only be constructed through the per-status
//! constructors, which keep `error_message` present exactly when the status is
//! failed and `warning_message` present exactly when it is a warning.

use crate::details::{Details, HealthFacts, SkipDetails};
use crate::resources::ResourceSnapshot;
use crate::stats::LatencyStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome class of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// All invariants held.
    Passed,
    /// An invariant did not hold or the check errored.
    Failed,
    /// Functional, but below a soft target.
    Warning,
    /// Not run.
    Skipped,
}

impl Status {
    /// Lowercase label used in reports and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Warning => "warning",
            Status::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    test_name: String,
    status: Status,
    execution_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    warning_message: Option<String>,
    #[serde(default)]
    details: Details,
    timestamp: DateTime<Utc>,
}

impl ValidationResult {
    fn build(
        test_name: impl Into<String>,
        status: Status,
        execution_time_ms: f64,
        error_message: Option<String>,
        warning_message: Option<String>,
        details: Details,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            status,
            execution_time_ms: execution_time_ms.max(0.0),
            error_message,
            warning_message,
            details,
            timestamp: Utc::now(),
        }
    }

    /// A passed result.
    pub fn passed(test_name: impl Into<String>, execution_time_ms: f64, details: Details) -> Self {
        Self::build(test_name, Status::Passed, execution_time_ms, None, None, details)
    }

    /// A failed result carrying `error_message`.
    pub fn failed(
        test_name: impl Into<String>,
        execution_time_ms: f64,
        error_message: impl Into<String>,
        details: Details,
    ) -> Self {
        Self::build(
            test_name,
            Status::Failed,
            execution_time_ms,
            Some(error_message.into()),
            None,
            details,
        )
    }

    /// A warning result carrying `warning_message`.
    pub fn warning(
        test_name: impl Into<String>,
        execution_time_ms: f64,
        warning_message: impl Into<String>,
        details: Details,
    ) -> Self {
        Self::build(
            test_name,
            Status::Warning,
            execution_time_ms,
            None,
            Some(warning_message.into()),
            details,
        )
    }

    /// A skipped result recording why.
    pub fn skipped(test_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::build(
            test_name,
            Status::Skipped,
            0.0,
            None,
            None,
            SkipDetails {
                skip_reason: reason.into(),
            }
            .into(),
        )
    }

    /// Check name, unique within one validator run.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Outcome class.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Wall-clock duration of the check.
    pub fn execution_time_ms(&self) -> f64 {
        self.execution_time_ms
    }

    /// Present iff the status is [`Status::Failed`].
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Present iff the status is [`Status::Warning`].
    pub fn warning_message(&self) -> Option<&str> {
        self.warning_message.as_deref()
    }

    /// Check-specific payload.
    pub fn details(&self) -> &Details {
        &self.details
    }

    /// When the check completed.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether the status is [`Status::Passed`].
    pub fn is_passed(&self) -> bool {
        self.status == Status::Passed
    }

    /// The failure or warning text, whichever applies.
    pub fn message(&self) -> Option<&str> {
        self.error_message().or(self.warning_message())
    }
}

/// Liveness level of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully functional.
    Healthy,
    /// Functional with reduced capability.
    Degraded,
    /// Not functional.
    Unhealthy,
}

/// Outcome of one liveness check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Component probed.
    pub component: String,
    /// Liveness level.
    pub status: HealthStatus,
    /// Probe duration.
    pub response_time_ms: f64,
    /// Why the component is not healthy.
    pub error_message: Option<String>,
    /// Probe facts.
    pub details: HealthFacts,
    /// When the probe completed.
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    /// Build a health record stamped now.
    pub fn new(
        component: impl Into<String>,
        status: HealthStatus,
        response_time_ms: f64,
        error_message: Option<String>,
        details: HealthFacts,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            response_time_ms: response_time_ms.max(0.0),
            error_message,
            details,
            timestamp: Utc::now(),
        }
    }

    /// Whether the component is healthy.
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Map onto a validation result named `health_check_{component}`.
    ///
    /// Healthy maps to passed, degraded to warning and unhealthy to failed.
    pub fn to_validation_result(&self) -> ValidationResult {
        let name = format!("health_check_{}", self.component);
        let details: Details = self.details.clone().into();
        match self.status {
            HealthStatus::Healthy => {
                ValidationResult::passed(name, self.response_time_ms, details)
            }
            HealthStatus::Degraded => ValidationResult::warning(
                name,
                self.response_time_ms,
                self.error_message
                    .clone()
                    .unwrap_or_else(|| format!("{} is degraded", self.component)),
                details,
            ),
            HealthStatus::Unhealthy => ValidationResult::failed(
                name,
                self.response_time_ms,
                self.error_message
                    .clone()
                    .unwrap_or_else(|| format!("{} is unhealthy", self.component)),
                details,
            ),
        }
    }
}

/// Per-scenario statistics inside a benchmark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioBreakdown {
    /// Latency over successful operations.
    pub latency: LatencyStats,
    /// Operations attempted.
    pub operations: u64,
    /// Operations that failed.
    pub errors: u64,
    /// `errors / operations`.
    pub error_rate: f64,
    /// Operations per second within the scenario.
    pub operations_per_second: f64,
    /// Payload size, for size-bucketed scenarios.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload_bytes: Option<usize>,
}

/// Diagnostic breakdown of a benchmark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BenchmarkBreakdown {
    /// Statistics per scenario.
    pub scenarios: BTreeMap<String, ScenarioBreakdown>,
    /// Failed operations across all scenarios.
    pub total_errors: u64,
    /// Simulated users, for concurrent benchmarks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent_users: Option<u32>,
    /// Operations per simulated user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations_per_user: Option<u32>,
    /// Rows seeded before measuring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_size: Option<u64>,
    /// Seeding duration, excluded from throughput.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_time_ms: Option<f64>,
    /// Teardown duration, excluded from throughput.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_time_ms: Option<f64>,
    /// Reading taken before the measured phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_before: Option<ResourceSnapshot>,
    /// Threshold breaches found.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// Outcome of one benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkResult {
    /// Benchmark name.
    pub test_name: String,
    /// Operations per second over the measured phase.
    pub operations_per_second: f64,
    /// Mean latency.
    pub avg_response_time_ms: f64,
    /// 95th percentile latency.
    pub p95_response_time_ms: f64,
    /// 99th percentile latency.
    pub p99_response_time_ms: f64,
    /// Failed / total, in `[0, 1]`.
    pub error_rate: f64,
    /// Operations attempted.
    pub total_operations: u64,
    /// Reading taken after the measured phase.
    pub resource_usage: ResourceSnapshot,
    /// Wall-clock duration including setup and teardown.
    pub execution_time_ms: f64,
    /// Per-scenario breakdown.
    pub details: BenchmarkBreakdown,
    /// When the run completed.
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counts of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// All results.
    pub total_tests: usize,
    /// Passed results.
    pub passed: usize,
    /// Failed results.
    pub failed: usize,
    /// Warning results.
    pub warnings: usize,
    /// Skipped results.
    pub skipped: usize,
    /// `passed / total`, zero for an empty report.
    pub success_rate: f64,
    /// Suite wall-clock duration.
    pub duration_seconds: f64,
}

impl ReportSummary {
    /// Count `results` by status.
    pub fn tally(results: &[ValidationResult], duration_seconds: f64) -> Self {
        let mut summary = ReportSummary {
            total_tests: results.len(),
            duration_seconds,
            ..Self::default()
        };
        for result in results {
            match result.status() {
                Status::Passed => summary.passed += 1,
                Status::Failed => summary.failed += 1,
                Status::Warning => summary.warnings += 1,
                Status::Skipped => summary.skipped += 1,
            }
        }
        if summary.total_tests > 0 {
            summary.success_rate = summary.passed as f64 / summary.total_tests as f64;
        }
        summary
    }
}

/// Aggregate of one suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Suite name.
    pub suite_name: String,
    /// When the suite started.
    pub start_time: DateTime<Utc>,
    /// When the suite finished.
    pub end_time: DateTime<Utc>,
    /// Counts derived from `results`.
    pub summary: ReportSummary,
    /// Results in execution order.
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    /// Finalize a report. Counts are always derived from `results`.
    pub fn from_results(
        suite_name: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        results: Vec<ValidationResult>,
    ) -> Self {
        let duration_seconds = (end_time - start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            suite_name: suite_name.into(),
            start_time,
            end_time,
            summary: ReportSummary::tally(&results, duration_seconds),
            results,
        }
    }

    /// Whether any result failed.
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    /// Results with the given status, in order.
    pub fn with_status(&self, status: Status) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(move |r| r.status() == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_results() -> Vec<ValidationResult> {
        vec![
            ValidationResult::passed("a", 1.0, Details::none()),
            ValidationResult::failed("b", 2.0, "boom", Details::none()),
            ValidationResult::warning("c", 3.0, "slow", Details::none()),
            ValidationResult::skipped("d", "no database"),
            ValidationResult::passed("e", 4.0, Details::none()),
        ]
    }

    #[test]
    fn test_messages_follow_status() {
        let results = sample_results();
        assert!(results[0].error_message().is_none());
        assert!(results[0].warning_message().is_none());
        assert_eq!(results[1].error_message(), Some("boom"));
        assert!(results[1].warning_message().is_none());
        assert_eq!(results[2].warning_message(), Some("slow"));
        assert!(results[2].error_message().is_none());
        assert!(results[3].message().is_none());
    }

    #[test]
    fn test_negative_time_is_clamped() {
        let result = ValidationResult::passed("t", -5.0, Details::none());
        assert_eq!(result.execution_time_ms(), 0.0);
    }

    #[test]
    fn test_report_counts_sum_to_total() {
        let start = Utc::now();
        let report = ValidationReport::from_results(
            "suite",
            start,
            start + Duration::seconds(2),
            sample_results(),
        );
        let s = report.summary;
        assert_eq!(s.total_tests, 5);
        assert_eq!(s.passed + s.failed + s.warnings + s.skipped, s.total_tests);
        assert_eq!(s.passed, 2);
        assert!((s.success_rate - 0.4).abs() < 1e-9);
        assert!((s.duration_seconds - 2.0).abs() < 1e-9);
        assert!(report.has_failures());
    }

    #[test]
    fn test_empty_report() {
        let now = Utc::now();
        let report = ValidationReport::from_results("empty", now, now, Vec::new());
        assert_eq!(report.summary.total_tests, 0);
        assert_eq!(report.summary.success_rate, 0.0);
        assert!(!report.has_failures());
    }

    #[test]
    fn test_report_json_shape() {
        let now = Utc::now();
        let report = ValidationReport::from_results("suite", now, now, sample_results());
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["suite_name"], "suite");
        assert_eq!(value["summary"]["total_tests"], 5);
        assert_eq!(value["summary"]["warnings"], 1);
        assert_eq!(value["results"][1]["status"], "failed");
        assert_eq!(value["results"][1]["error_message"], "boom");
        assert!(value["results"][0].get("error_message").is_none());
        assert_eq!(value["results"][3]["details"]["skip_reason"], "no database");
    }

    #[test]
    fn test_health_status_mapping() {
        let degraded = HealthCheckResult::new(
            "api_internal",
            HealthStatus::Degraded,
            12.0,
            Some("HTTP 503".into()),
            HealthFacts::default(),
        );
        let result = degraded.to_validation_result();
        assert_eq!(result.test_name(), "health_check_api_internal");
        assert_eq!(result.status(), Status::Warning);
        assert_eq!(result.warning_message(), Some("HTTP 503"));

        let down = HealthCheckResult::new(
            "database",
            HealthStatus::Unhealthy,
            1.0,
            None,
            HealthFacts::default(),
        );
        let result = down.to_validation_result();
        assert_eq!(result.status(), Status::Failed);
        assert_eq!(result.error_message(), Some("database is unhealthy"));

        let up = HealthCheckResult::new("mcp", HealthStatus::Healthy, 1.0, None, HealthFacts::default());
        assert!(up.is_healthy());
        assert!(up.to_validation_result().is_passed());
    }
}
