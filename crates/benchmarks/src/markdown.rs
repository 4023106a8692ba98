//! Markdown rendering of validation reports.

use crate::report::{ComprehensiveReport, RiskLevel};
use memory_validation_core::model::{Status, ValidationReport};
use std::fmt::{self, Write};

/// Render the companion Markdown document of a comprehensive report.
pub fn generate_report(report: &ComprehensiveReport) -> String {
    let mut output = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut output, report);
    output
}

/// Render one suite report as a Markdown table.
pub fn generate_suite_summary(report: &ValidationReport) -> String {
    let mut output = String::new();
    let _ = write_suite(&mut output, report, "#");
    output
}

fn write_report(out: &mut String, report: &ComprehensiveReport) -> fmt::Result {
    let s = &report.summary;
    let failed_tests: Vec<_> = report
        .components
        .iter()
        .flat_map(|c| c.report.with_status(Status::Failed))
        .collect();

    writeln!(out, "# Memory System Validation Report")?;
    writeln!(out)?;
    writeln!(out, "## Executive Summary")?;
    writeln!(out)?;
    writeln!(
        out,
        "**Report Date:** {}",
        report.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(out)?;
    writeln!(out, "**Overall Assessment:** {}", report.overall_status)?;
    writeln!(out)?;
    writeln!(out, "**Test Coverage:**")?;
    writeln!(out, "- Total Tests Executed: {}", s.total_tests)?;
    writeln!(out, "- Tests Passed: {}", s.passed)?;
    writeln!(out, "- Tests Failed: {}", s.failed)?;
    writeln!(out, "- Warnings: {}", s.warnings)?;
    writeln!(out, "- Skipped: {}", s.skipped)?;
    writeln!(out, "- Success Rate: {:.1}%", s.success_rate * 100.0)?;
    writeln!(out, "- Duration: {:.1} seconds", report.total_duration_seconds)?;
    writeln!(out)?;
    writeln!(out, "**Critical Issues:** {}", failed_tests.len())?;
    writeln!(out)?;
    let recommendation = if s.failed == 0 {
        "System ready for production"
    } else {
        "Address critical issues before production deployment"
    };
    writeln!(out, "**Recommendation:** {recommendation}")?;
    writeln!(out)?;

    writeln!(out, "## Component Results")?;
    writeln!(out)?;
    writeln!(out, "| Component | Tests | Passed | Failed | Warnings | Skipped |")?;
    writeln!(out, "|-----------|-------|--------|--------|----------|---------|")?;
    for component in &report.components {
        let c = &component.report.summary;
        writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            component.component, c.total_tests, c.passed, c.failed, c.warnings, c.skipped
        )?;
    }
    writeln!(out)?;

    for component in &report.components {
        write_suite(out, &component.report, "###")?;
    }

    writeln!(out, "## Risk Assessment")?;
    let risks = report.risks();
    for level in [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low] {
        writeln!(out)?;
        writeln!(out, "### {}", level.heading())?;
        let mut any = false;
        for risk in risks.iter().filter(|r| r.level == level) {
            writeln!(out, "- **{}**: {}", risk.component, risk.issue)?;
            any = true;
        }
        if !any {
            writeln!(
                out,
                "- No {} priority risks identified",
                level.heading().split(' ').next().unwrap_or("").to_lowercase()
            )?;
        }
    }
    writeln!(out)?;

    let recommendations = report.recommendations();
    writeln!(out, "## Recommendations")?;
    writeln!(out)?;
    writeln!(out, "### Immediate Actions")?;
    for item in &recommendations.immediate {
        writeln!(out, "- {item}")?;
    }
    writeln!(out)?;
    writeln!(out, "### Follow-up Actions")?;
    for item in &recommendations.follow_up {
        writeln!(out, "- {item}")?;
    }
    writeln!(out)?;

    let env = &report.environment;
    writeln!(out, "## Environment")?;
    writeln!(out)?;
    writeln!(out, "- Harness version: {}", env.harness_version)?;
    writeln!(out, "- OS: {}", env.os)?;
    writeln!(
        out,
        "- Store: {}",
        if env.store_configured { "configured" } else { "in-process" }
    )?;
    writeln!(out, "- Internal API: {}", env.internal_api_url)?;
    writeln!(out, "- External API: {}", env.external_api_url)?;
    writeln!(out, "- MCP API: {}", env.mcp_api_url)?;
    writeln!(
        out,
        "- Large dataset: {} (cap {}, batch {})",
        env.large_dataset_size, env.max_test_entities, env.batch_size
    )?;
    writeln!(out)?;
    writeln!(out, "---")?;
    writeln!(out, "Total components: {}", report.components.len())?;
    Ok(())
}

fn write_suite(out: &mut String, report: &ValidationReport, heading: &str) -> fmt::Result {
    writeln!(out, "{heading} {}", report.suite_name)?;
    writeln!(out)?;
    writeln!(out, "| Test | Status | Time (ms) | Message |")?;
    writeln!(out, "|------|--------|-----------|---------|")?;
    for result in &report.results {
        writeln!(
            out,
            "| {} | {} | {:.1} | {} |",
            result.test_name(),
            result.status(),
            result.execution_time_ms(),
            escape_cell(result.message().unwrap_or(""))
        )?;
    }
    writeln!(out)?;
    Ok(())
}

fn escape_cell(text: &str) -> String {
    let flat = text.replace('|', "\\|").replace('\n', " ");
    if flat.chars().count() > 120 {
        let short: String = flat.chars().take(117).collect();
        format!("{short}...")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ComponentReport, Environment};
    use chrono::Utc;
    use memory_validation_core::details::Details;
    use memory_validation_core::model::ValidationResult;

    fn sample() -> ComprehensiveReport {
        let now = Utc::now();
        let results = vec![
            ValidationResult::passed("entity_create", 2.0, Details::none()),
            ValidationResult::failed(
                "search_performance",
                9.0,
                "Search performance issues: p95 | too high",
                Details::none(),
            ),
        ];
        ComprehensiveReport::assemble(
            now,
            now,
            vec![ComponentReport::new(
                "Data Integrity",
                ValidationReport::from_results("Data Integrity", now, now, results),
            )],
            Environment::default(),
        )
    }

    #[test]
    fn test_report_has_all_sections() {
        let markdown = generate_report(&sample());
        assert!(markdown.starts_with("# Memory System Validation Report"));
        assert!(markdown.contains("**Overall Assessment:** PASSED WITH WARNINGS"));
        assert!(markdown.contains("| Data Integrity | 2 | 1 | 1 | 0 | 0 |"));
        assert!(markdown.contains("### Medium Priority Risks\n- **Data Integrity**"));
        assert!(markdown.contains("- No high priority risks identified"));
        assert!(markdown.contains("### Immediate Actions"));
    }

    #[test]
    fn test_pipes_in_messages_are_escaped() {
        let markdown = generate_report(&sample());
        assert!(markdown.contains("p95 \\| too high"));
    }

    #[test]
    fn test_suite_summary_lists_every_result() {
        let report = sample().components.remove(0).report;
        let markdown = generate_suite_summary(&report);
        assert!(markdown.starts_with("# Data Integrity"));
        assert_eq!(markdown.matches("| entity_create |").count(), 1);
        assert_eq!(markdown.matches("| search_performance |").count(), 1);
    }

    #[test]
    fn test_long_messages_are_truncated() {
        let long = "x".repeat(300);
        assert_eq!(escape_cell(&long).chars().count(), 120);
    }
}
