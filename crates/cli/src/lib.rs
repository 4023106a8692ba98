//! Comprehensive validation runner for the memory system.
//!
//! Runs the selected suite components in a fixed order, prints a readiness
//! summary and optionally writes the JSON and Markdown reports.

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod logging;
pub mod progress;
pub mod suite;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use logging::LogFormat;
use memory_validation_benchmarks::io::{write_report, DEFAULT_REPORT_DIR};
use memory_validation_benchmarks::{ComponentReport, ComprehensiveReport, Environment};
use memory_validation_core::ValidationConfig;
use progress::ComponentSpinner;
use std::path::PathBuf;
use suite::{Collaborators, Component};
use tracing::info;

/// Memory system validation suite.
#[derive(Parser, Debug)]
#[command(name = "memory-validation")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Write JSON and Markdown reports to the report directory.
    #[arg(long)]
    pub save_report: bool,

    /// Configuration file (TOML, YAML or JSON) layered over the defaults.
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Debug logging unless `RUST_LOG` says otherwise.
    #[arg(short, long)]
    pub verbose: bool,

    /// Where reports are written.
    #[arg(long, value_name = "DIR", default_value = DEFAULT_REPORT_DIR)]
    pub report_dir: PathBuf,

    /// Log line format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Components to run, comma separated. Defaults to all of them.
    #[arg(long, value_enum, value_delimiter = ',')]
    pub components: Vec<Component>,

    /// Validate the in-process reference store instead of `DATABASE_URL`.
    #[arg(long)]
    pub in_process: bool,

    /// Target size of the large dataset.
    #[arg(long)]
    pub large_dataset_size: Option<u64>,

    /// Hard cap on the large dataset.
    #[arg(long)]
    pub max_test_entities: Option<u64>,

    /// Bulk insert batch size.
    #[arg(long)]
    pub batch_size: Option<u64>,

    /// Search benchmark dataset size.
    #[arg(long)]
    pub test_entity_count: Option<u32>,

    /// Keep the large dataset after the run.
    #[arg(long)]
    pub no_cleanup: bool,
}

impl Cli {
    /// Configuration from defaults, `--config-file` and the environment,
    /// with the sizing flags applied on top.
    pub fn load_config(&self) -> anyhow::Result<ValidationConfig> {
        let mut config = ValidationConfig::load(self.config_file.as_deref())
            .context("Failed to load configuration")?;
        self.apply_overrides(&mut config);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Apply the sizing flags.
    pub fn apply_overrides(&self, config: &mut ValidationConfig) {
        if let Some(size) = self.large_dataset_size {
            config.large_dataset_size = size;
        }
        if let Some(cap) = self.max_test_entities {
            config.max_test_entities = cap;
        }
        if let Some(batch) = self.batch_size {
            config.batch_size = batch;
        }
        if let Some(count) = self.test_entity_count {
            config.test_entity_count = count;
        }
        if self.no_cleanup {
            config.cleanup_enabled = false;
        }
    }
}

/// Run `components` in order and assemble the comprehensive report.
pub async fn run_suite(
    collaborators: &Collaborators,
    components: &[Component],
    config: &ValidationConfig,
) -> ComprehensiveReport {
    let started = Utc::now();
    let mut reports = Vec::with_capacity(components.len());

    for (index, component) in components.iter().copied().enumerate() {
        info!(component = component.title(), "Running component");
        let spinner = ComponentSpinner::start(component.title(), index + 1, components.len());
        let report = match collaborators.framework(component, config) {
            Ok(framework) => {
                let report = framework.run_all_validations().await;
                spinner.finish(&report);
                ComponentReport::new(component.title(), report)
            }
            Err(reason) => {
                spinner.abort(&reason);
                suite::crashed(component, &reason)
            }
        };
        reports.push(report);
    }

    ComprehensiveReport::assemble(started, Utc::now(), reports, Environment::from_config(config))
}

/// Load configuration, run the selected components, print the summary and
/// save the reports when asked.
pub async fn run(cli: &Cli) -> anyhow::Result<ComprehensiveReport> {
    let config = cli.load_config()?;
    let collaborators = if cli.in_process {
        Collaborators::in_process(&config)?
    } else {
        Collaborators::connect(&config).await?
    };

    let components = suite::select(&cli.components);
    info!(components = components.len(), "Starting comprehensive validation");

    let report = run_suite(&collaborators, &components, &config).await;
    progress::print_final_summary(&report);

    if cli.save_report {
        let path = write_report(&report, &cli.report_dir)
            .with_context(|| format!("Failed to write report to {}", cli.report_dir.display()))?;
        println!("\nReport saved to {}", path.display());
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_validation_core::{
        FixedResourceProbe, InMemoryStore, ResourceSnapshot, SnapshotBackupTool, StubHttpProbe,
    };
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["memory-validation"]).unwrap();

        assert!(!cli.save_report);
        assert!(!cli.verbose);
        assert!(!cli.in_process);
        assert_eq!(cli.report_dir, PathBuf::from("validation_reports"));
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(cli.components.is_empty());
    }

    #[test]
    fn test_components_are_comma_separated() {
        let cli = Cli::try_parse_from([
            "memory-validation",
            "--components",
            "backup,health,interfaces",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(
            cli.components,
            vec![Component::Backup, Component::Health, Component::Interfaces]
        );
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_component_is_rejected() {
        assert!(Cli::try_parse_from(["memory-validation", "--components", "everything"]).is_err());
    }

    #[test]
    fn test_sizing_flags_override_config() {
        let cli = Cli::try_parse_from([
            "memory-validation",
            "--large-dataset-size",
            "500",
            "--max-test-entities",
            "400",
            "--batch-size",
            "50",
            "--test-entity-count",
            "20",
            "--no-cleanup",
        ])
        .unwrap();
        let mut config = ValidationConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.large_dataset_size, 500);
        assert_eq!(config.max_test_entities, 400);
        assert_eq!(config.effective_large_dataset_size(), 400);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.test_entity_count, 20);
        assert!(!config.cleanup_enabled);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let cli = Cli::try_parse_from(["memory-validation"]).unwrap();
        let mut config = ValidationConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config, ValidationConfig::default());
    }

    #[tokio::test]
    async fn test_run_suite_keeps_component_order() {
        let store = Arc::new(InMemoryStore::new());
        let collaborators = Collaborators::new(
            Err("Database URL not configured".to_string()),
            Arc::new(StubHttpProbe::new()),
            Arc::new(FixedResourceProbe::new(ResourceSnapshot::default())),
            Arc::new(SnapshotBackupTool::new(store)),
        );
        let config = ValidationConfig::default();

        let report = run_suite(
            &collaborators,
            &suite::select(&[Component::Backup, Component::Integrity]),
            &config,
        )
        .await;

        let names: Vec<_> = report.components.iter().map(|c| c.component.as_str()).collect();
        assert_eq!(names, vec!["Data Integrity", "Backup & Migration"]);
        assert_eq!(report.summary.failed, 2);
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_in_process_run_saves_reports() {
        let dir = tempfile::tempdir().unwrap();
        let report_dir = dir.path().to_str().unwrap();
        let cli = Cli::try_parse_from([
            "memory-validation",
            "--in-process",
            "--components",
            "integrity",
            "--save-report",
            "--report-dir",
            report_dir,
        ])
        .unwrap();

        let report = run(&cli).await.unwrap();

        assert!(!report.has_failures());
        let saved = memory_validation_benchmarks::io::latest_report(dir.path())
            .unwrap()
            .unwrap();
        assert!(saved.with_extension("md").exists());
        let read_back = memory_validation_benchmarks::io::read_report_json(&saved).unwrap();
        assert_eq!(read_back.components.len(), 1);
        assert_eq!(read_back.components[0].component, "Data Integrity");
    }
}
