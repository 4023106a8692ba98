//! Console progress and result lines.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use memory_validation_benchmarks::{ComprehensiveReport, Readiness};
use memory_validation_core::ValidationReport;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ";

/// Spinner shown while one component runs.
pub struct ComponentSpinner {
    bar: ProgressBar,
    component: String,
}

impl ComponentSpinner {
    /// Start spinning with `Running {component}...`.
    pub fn start(component: &str, position: usize, total: usize) -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICK_CHARS);
        bar.set_style(style);
        bar.set_message(format!("[{position}/{total}] Running {component}..."));
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            bar,
            component: component.to_string(),
        }
    }

    /// Stop and leave a one-line verdict behind.
    pub fn finish(self, report: &ValidationReport) {
        self.bar.finish_and_clear();
        println!("{}", component_line(&self.component, report));
    }

    /// Stop after the component could not run.
    pub fn abort(self, error: &str) {
        self.bar.finish_and_clear();
        println!("{} {}: {}", "✗".red().bold(), self.component.bold(), error.red());
    }
}

/// `✓ Health Checks: 5/5 passed (1.2s)` style line.
pub fn component_line(component: &str, report: &ValidationReport) -> String {
    let summary = &report.summary;
    let marker = if summary.failed > 0 {
        "✗".red().bold()
    } else if summary.warnings > 0 {
        "!".yellow().bold()
    } else {
        "✓".green().bold()
    };
    let mut line = format!(
        "{marker} {}: {}/{} passed ({:.1}s)",
        component.bold(),
        summary.passed,
        summary.total_tests,
        summary.duration_seconds
    );
    if summary.failed > 0 {
        line.push_str(&format!(", {}", format!("{} failed", summary.failed).red()));
    }
    if summary.warnings > 0 {
        line.push_str(&format!(", {}", format!("{} warnings", summary.warnings).yellow()));
    }
    line
}

/// Closing summary with readiness verdict, risks and recommendations.
pub fn print_final_summary(report: &ComprehensiveReport) {
    let summary = &report.summary;
    let rule = "=".repeat(60);

    println!();
    println!("{rule}");
    println!("{}", "MEMORY SYSTEM VALIDATION SUMMARY".bold());
    println!("{rule}");
    println!("Overall Status: {}", report.overall_status.as_str().bold());
    println!("Total Duration: {:.2}s", report.total_duration_seconds);
    println!("Total Tests: {}", summary.total_tests);
    println!("Passed: {}", summary.passed.to_string().green());
    println!("Failed: {}", summary.failed.to_string().red());
    println!("Warnings: {}", summary.warnings.to_string().yellow());
    println!("Skipped: {}", summary.skipped);
    println!("Success Rate: {:.1}%", summary.success_rate * 100.0);

    let readiness = report.readiness();
    let (headline, guidance) = readiness.verdict();
    let label = match readiness {
        Readiness::Excellent => readiness.label().green().bold(),
        Readiness::Good => readiness.label().cyan().bold(),
        Readiness::Moderate => readiness.label().yellow().bold(),
        Readiness::Critical => readiness.label().red().bold(),
    };
    println!();
    println!("Production Readiness: {label}");
    println!("  {headline}");
    println!("  {guidance}");

    let risks = report.risks();
    if !risks.is_empty() {
        println!();
        println!("{}", "Risks:".bold());
        for risk in &risks {
            println!("  [{}] {}: {}", risk.level.heading(), risk.component, risk.issue);
        }
    }

    let recommendations = report.recommendations();
    println!();
    println!("{}", "Recommendations:".bold());
    for item in recommendations
        .immediate
        .iter()
        .chain(recommendations.follow_up.iter())
    {
        println!("  - {item}");
    }
    println!("{rule}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use memory_validation_core::ValidationResult;

    #[test]
    fn test_component_line_counts() {
        colored::control::set_override(false);
        let now = Utc::now();
        let results = vec![
            ValidationResult::passed("a", 0.1, Default::default()),
            ValidationResult::failed("b", 0.1, "boom", Default::default()),
        ];
        let report = ValidationReport::from_results("Health Checks", now, now, results);

        let line = component_line("Health Checks", &report);
        assert!(line.starts_with("✗ Health Checks: 1/2 passed"));
        assert!(line.contains("1 failed"));
        assert!(!line.contains("warnings"));
    }
}
