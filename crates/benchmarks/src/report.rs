//! The comprehensive report: one [`ValidationReport`] per suite component,
//! an overall assessment, risk buckets and recommendations.

use chrono::{DateTime, Utc};
use memory_validation_core::config::ValidationConfig;
use memory_validation_core::model::{ReportSummary, Status, ValidationReport, ValidationResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Headline verdict of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallStatus {
    /// Nothing failed.
    #[serde(rename = "PASSED")]
    Passed,
    /// A handful of failures.
    #[serde(rename = "PASSED WITH WARNINGS")]
    PassedWithWarnings,
    /// More than five failures.
    #[serde(rename = "FAILED")]
    Failed,
}

impl OverallStatus {
    /// Assess from the number of failed tests.
    pub fn assess(failed: usize) -> Self {
        match failed {
            0 => OverallStatus::Passed,
            1..=5 => OverallStatus::PassedWithWarnings,
            _ => OverallStatus::Failed,
        }
    }

    /// Report label.
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Passed => "PASSED",
            OverallStatus::PassedWithWarnings => "PASSED WITH WARNINGS",
            OverallStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Production readiness tier shown at the end of a console run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// No failures.
    Excellent,
    /// Up to three failures.
    Good,
    /// Up to ten failures.
    Moderate,
    /// More than ten failures.
    Critical,
}

impl Readiness {
    /// Tier for a failure count.
    pub fn from_failed(failed: usize) -> Self {
        match failed {
            0 => Readiness::Excellent,
            1..=3 => Readiness::Good,
            4..=10 => Readiness::Moderate,
            _ => Readiness::Critical,
        }
    }

    /// Tier name.
    pub fn label(&self) -> &'static str {
        match self {
            Readiness::Excellent => "EXCELLENT",
            Readiness::Good => "GOOD",
            Readiness::Moderate => "MODERATE",
            Readiness::Critical => "CRITICAL",
        }
    }

    /// Headline and guidance for the tier.
    pub fn verdict(&self) -> (&'static str, &'static str) {
        match self {
            Readiness::Excellent => (
                "All validation tests passed!",
                "The memory system is ready for production use.",
            ),
            Readiness::Good => (
                "Minor issues detected.",
                "Review failed tests and consider fixes before production.",
            ),
            Readiness::Moderate => (
                "Several issues detected.",
                "Address failed tests before production deployment.",
            ),
            Readiness::Critical => (
                "Significant issues detected.",
                "The memory system requires substantial fixes before production.",
            ),
        }
    }
}

/// Priority of a failed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Storage, security or integrity failures.
    High,
    /// Performance or concurrency failures.
    Medium,
    /// Everything else.
    Low,
}

impl RiskLevel {
    /// Bucket a failed test by its name.
    pub fn classify(test_name: &str) -> Self {
        let name = test_name.to_lowercase();
        if ["database", "security", "data_integrity"]
            .iter()
            .any(|k| name.contains(k))
        {
            RiskLevel::High
        } else if ["performance", "concurrent"].iter().any(|k| name.contains(k)) {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Section heading.
    pub fn heading(&self) -> &'static str {
        match self {
            RiskLevel::High => "High Priority Risks",
            RiskLevel::Medium => "Medium Priority Risks",
            RiskLevel::Low => "Low Priority Risks",
        }
    }
}

/// One failed test, bucketed.
#[derive(Debug, Clone, PartialEq)]
pub struct Risk {
    /// Bucket.
    pub level: RiskLevel,
    /// Component that produced the failure.
    pub component: String,
    /// Error message, or the test name when there is none.
    pub issue: String,
}

/// Where and how the run was executed. Secrets are never recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Harness version.
    pub harness_version: String,
    /// Host operating system.
    pub os: String,
    /// Whether a store connection URL was configured.
    pub store_configured: bool,
    /// Internal API base URL.
    pub internal_api_url: String,
    /// External API base URL.
    pub external_api_url: String,
    /// MCP-style API base URL.
    pub mcp_api_url: String,
    /// Large dataset target.
    pub large_dataset_size: u64,
    /// Large dataset cap.
    pub max_test_entities: u64,
    /// Bulk insert batch size.
    pub batch_size: u64,
    /// Whether large fixtures were torn down.
    pub cleanup_enabled: bool,
    /// Concurrency ladder.
    pub concurrency_levels: Vec<u32>,
}

impl Environment {
    /// Describe a run configured by `config`.
    pub fn from_config(config: &ValidationConfig) -> Self {
        Self {
            harness_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            store_configured: config.database_url.is_some(),
            internal_api_url: config.internal_api_url.clone(),
            external_api_url: config.external_api_url.clone(),
            mcp_api_url: config.mcp_api_url.clone(),
            large_dataset_size: config.large_dataset_size,
            max_test_entities: config.max_test_entities,
            batch_size: config.batch_size,
            cleanup_enabled: config.cleanup_enabled,
            concurrency_levels: config.concurrency_levels.clone(),
        }
    }
}

/// One suite component and the report it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentReport {
    /// Component display name, e.g. `Health Checks`.
    pub component: String,
    /// The component's report.
    pub report: ValidationReport,
}

impl ComponentReport {
    /// Pair a component name with its report.
    pub fn new(component: impl Into<String>, report: ValidationReport) -> Self {
        Self {
            component: component.into(),
            report,
        }
    }

    /// A component that could not run at all, recorded as one failed
    /// `{slug}_execution` result.
    pub fn crashed(
        component: impl Into<String>,
        slug: &str,
        error: impl fmt::Display,
        at: DateTime<Utc>,
    ) -> Self {
        let component = component.into();
        let result = ValidationResult::failed(
            format!("{slug}_execution"),
            0.0,
            error.to_string(),
            Default::default(),
        );
        let report = ValidationReport::from_results(component.clone(), at, at, vec![result]);
        Self { component, report }
    }
}

/// Aggregate of a comprehensive run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveReport {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the whole run.
    pub total_duration_seconds: f64,
    /// Headline verdict.
    pub overall_status: OverallStatus,
    /// Counts over every component.
    pub summary: ReportSummary,
    /// Components in execution order.
    pub components: Vec<ComponentReport>,
    /// Run environment.
    pub environment: Environment,
}

impl ComprehensiveReport {
    /// Build from component reports. Counts are derived from the components.
    pub fn assemble(
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
        components: Vec<ComponentReport>,
        environment: Environment,
    ) -> Self {
        let total_duration_seconds = (finished - started)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let all: Vec<ValidationResult> = components
            .iter()
            .flat_map(|c| c.report.results.iter().cloned())
            .collect();
        let summary = ReportSummary::tally(&all, total_duration_seconds);

        Self {
            timestamp: finished,
            total_duration_seconds,
            overall_status: OverallStatus::assess(summary.failed),
            summary,
            components,
            environment,
        }
    }

    /// Whether any test failed.
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    /// Console readiness tier.
    pub fn readiness(&self) -> Readiness {
        Readiness::from_failed(self.summary.failed)
    }

    /// Failed tests, bucketed by risk, in component order.
    pub fn risks(&self) -> Vec<Risk> {
        self.components
            .iter()
            .flat_map(|c| {
                c.report.with_status(Status::Failed).map(move |r| Risk {
                    level: RiskLevel::classify(r.test_name()),
                    component: c.component.clone(),
                    issue: r
                        .error_message()
                        .map(str::to_string)
                        .unwrap_or_else(|| r.test_name().to_string()),
                })
            })
            .collect()
    }

    /// Immediate and follow-up actions for the failure count.
    pub fn recommendations(&self) -> Recommendations {
        Recommendations::for_failed(self.summary.failed)
    }
}

/// Actions suggested by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recommendations {
    /// Do first.
    pub immediate: Vec<&'static str>,
    /// Do next.
    pub follow_up: Vec<&'static str>,
}

impl Recommendations {
    /// Pick the set for a failure count.
    pub fn for_failed(failed: usize) -> Self {
        match failed {
            0 => Self {
                immediate: vec![
                    "System is ready for production deployment",
                    "All validation tests passed successfully",
                ],
                follow_up: vec![
                    "Establish regular monitoring and maintenance procedures",
                    "Set up automated validation runs for continuous monitoring",
                ],
            },
            1..=3 => Self {
                immediate: vec![
                    "Address minor issues before production deployment",
                    "Fix failed validation tests",
                ],
                follow_up: vec![
                    "Re-run validation suite after fixes",
                    "Consider staging environment testing",
                ],
            },
            _ => Self {
                immediate: vec![
                    "System requires significant improvements before production",
                    "Address all critical failures immediately",
                ],
                follow_up: vec![
                    "Implement missing functionality",
                    "Conduct thorough code review",
                    "Re-run complete validation suite after fixes",
                ],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_validation_core::details::Details;

    fn report_with(component: &str, results: Vec<ValidationResult>) -> ComponentReport {
        let now = Utc::now();
        ComponentReport::new(
            component,
            ValidationReport::from_results(component, now, now, results),
        )
    }

    fn failed(name: &str, message: &str) -> ValidationResult {
        ValidationResult::failed(name, 1.0, message, Details::none())
    }

    #[test]
    fn test_overall_status_thresholds() {
        assert_eq!(OverallStatus::assess(0), OverallStatus::Passed);
        assert_eq!(OverallStatus::assess(5), OverallStatus::PassedWithWarnings);
        assert_eq!(OverallStatus::assess(6), OverallStatus::Failed);
        assert_eq!(
            serde_json::to_value(OverallStatus::PassedWithWarnings).unwrap(),
            serde_json::json!("PASSED WITH WARNINGS")
        );
    }

    #[test]
    fn test_readiness_tiers() {
        assert_eq!(Readiness::from_failed(0), Readiness::Excellent);
        assert_eq!(Readiness::from_failed(3), Readiness::Good);
        assert_eq!(Readiness::from_failed(10), Readiness::Moderate);
        assert_eq!(Readiness::from_failed(11), Readiness::Critical);
    }

    #[test]
    fn test_risk_classification_by_name() {
        assert_eq!(RiskLevel::classify("health_check_database"), RiskLevel::High);
        assert_eq!(RiskLevel::classify("search_performance"), RiskLevel::Medium);
        assert_eq!(RiskLevel::classify("concurrent_entity_creation"), RiskLevel::Medium);
        assert_eq!(RiskLevel::classify("entity_update"), RiskLevel::Low);
    }

    #[test]
    fn test_assemble_counts_across_components() {
        let started = Utc::now();
        let components = vec![
            report_with(
                "Health Checks",
                vec![
                    ValidationResult::passed("health_check_api_internal", 1.0, Details::none()),
                    failed("health_check_database", "connection refused"),
                ],
            ),
            report_with(
                "Performance Benchmarks",
                vec![ValidationResult::warning(
                    "search_performance",
                    1.0,
                    "slow",
                    Details::none(),
                )],
            ),
        ];
        let report = ComprehensiveReport::assemble(
            started,
            started + chrono::Duration::seconds(3),
            components,
            Environment::default(),
        );

        assert_eq!(report.summary.total_tests, 3);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.warnings, 1);
        assert_eq!(report.total_duration_seconds, 3.0);
        assert_eq!(report.overall_status, OverallStatus::PassedWithWarnings);
        assert!(report.has_failures());

        let risks = report.risks();
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].level, RiskLevel::High);
        assert_eq!(risks[0].component, "Health Checks");
        assert_eq!(risks[0].issue, "connection refused");
    }

    #[test]
    fn test_crashed_component_counts_as_one_failure() {
        let component = ComponentReport::crashed("Backup & Migration", "backup", "no pg_dump", Utc::now());
        assert_eq!(component.report.summary.failed, 1);
        assert_eq!(component.report.results[0].test_name(), "backup_execution");
        assert_eq!(component.report.results[0].error_message(), Some("no pg_dump"));
    }

    #[test]
    fn test_environment_omits_password() {
        let mut config = ValidationConfig::default();
        config.backup.password = "hunter2".to_string();
        let json = serde_json::to_string(&Environment::from_config(&config)).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_recommendations_follow_failure_count() {
        assert_eq!(Recommendations::for_failed(0).follow_up.len(), 2);
        assert_eq!(
            Recommendations::for_failed(2).immediate[0],
            "Address minor issues before production deployment"
        );
        assert_eq!(Recommendations::for_failed(9).follow_up.len(), 3);
    }
}
