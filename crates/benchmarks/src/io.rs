//! Reading and writing reports on disk.

use crate::markdown;
use crate::report::ComprehensiveReport;
use chrono::{DateTime, Utc};
use memory_validation_core::model::ValidationReport;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default report directory.
pub const DEFAULT_REPORT_DIR: &str = "validation_reports";

/// File name prefix of comprehensive reports.
pub const REPORT_PREFIX: &str = "comprehensive_validation_report";

/// `comprehensive_validation_report_{YYYYMMDD_HHMMSS}` for `at`.
pub fn report_file_stem(at: DateTime<Utc>) -> String {
    format!("{REPORT_PREFIX}_{}", at.format("%Y%m%d_%H%M%S"))
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    fs::write(path, json)
}

/// Write a comprehensive report as pretty JSON.
pub fn write_report_json(report: &ComprehensiveReport, path: impl AsRef<Path>) -> io::Result<()> {
    write_json(report, path.as_ref())
}

/// Write a single suite report as pretty JSON.
pub fn write_suite_json(report: &ValidationReport, path: impl AsRef<Path>) -> io::Result<()> {
    write_json(report, path.as_ref())
}

/// Write the JSON report and its Markdown companion under `dir`, creating it
/// if needed. Returns the JSON path.
pub fn write_report(report: &ComprehensiveReport, dir: impl AsRef<Path>) -> io::Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let stem = report_file_stem(report.timestamp);
    let json_path = dir.join(format!("{stem}.json"));
    let markdown_path = dir.join(format!("{stem}.md"));

    write_report_json(report, &json_path)?;
    fs::write(&markdown_path, markdown::generate_report(report))?;

    info!(
        json = %json_path.display(),
        markdown = %markdown_path.display(),
        "Comprehensive validation report saved"
    );
    Ok(json_path)
}

/// Read a comprehensive report back.
pub fn read_report_json(path: impl AsRef<Path>) -> io::Result<ComprehensiveReport> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(io::Error::other)
}

/// The most recent comprehensive report in `dir`, by file name.
pub fn latest_report(dir: impl AsRef<Path>) -> io::Result<Option<PathBuf>> {
    let mut newest: Option<PathBuf> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_report = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(REPORT_PREFIX) && n.ends_with(".json"))
            .unwrap_or(false);
        if is_report && newest.as_ref().map_or(true, |n| path > *n) {
            newest = Some(path);
        }
    }
    Ok(newest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ComponentReport, Environment};
    use chrono::TimeZone;
    use memory_validation_core::details::Details;
    use memory_validation_core::model::ValidationResult;

    fn sample(at: DateTime<Utc>) -> ComprehensiveReport {
        let results = vec![ValidationResult::passed("entity_read", 1.5, Details::none())];
        ComprehensiveReport::assemble(
            at,
            at,
            vec![ComponentReport::new(
                "Data Integrity",
                ValidationReport::from_results("Data Integrity", at, at, results),
            )],
            Environment::default(),
        )
    }

    #[test]
    fn test_file_stem_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(
            report_file_stem(at),
            "comprehensive_validation_report_20250307_140509"
        );
    }

    #[test]
    fn test_write_report_creates_json_and_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested");
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

        let json_path = write_report(&sample(at), &target).unwrap();
        assert!(json_path.ends_with("comprehensive_validation_report_20250102_030405.json"));
        assert!(target
            .join("comprehensive_validation_report_20250102_030405.md")
            .exists());

        let loaded = read_report_json(&json_path).unwrap();
        assert_eq!(loaded.summary.total_tests, 1);
        assert_eq!(loaded.components[0].component, "Data Integrity");
    }

    #[test]
    fn test_report_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        write_report_json(&sample(Utc::now()), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        for key in [
            "timestamp",
            "total_duration_seconds",
            "overall_status",
            "summary",
            "components",
            "environment",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["overall_status"], "PASSED");
        assert_eq!(value["components"][0]["report"]["results"][0]["status"], "passed");
    }

    #[test]
    fn test_latest_report_picks_newest_name() {
        let dir = tempfile::tempdir().unwrap();
        let early = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        write_report(&sample(early), dir.path()).unwrap();
        let expected = write_report(&sample(late), dir.path()).unwrap();
        fs::write(dir.path().join("notes.json"), "{}").unwrap();

        assert_eq!(latest_report(dir.path()).unwrap(), Some(expected));
    }

    #[test]
    fn test_read_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "not json").unwrap();
        assert!(read_report_json(&path).is_err());
    }
}
