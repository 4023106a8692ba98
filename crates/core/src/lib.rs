// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core of the memory system validation harness.
//!
//! This crate holds everything the validators and benchmarks share:
//!
//! - [`model`] - result and report records
//! - [`details`] - typed, check-specific result payloads
//! - [`validator`] - the [`Validator`] trait, [`BaseValidator`] and [`run_test`]
//! - [`framework`] - the sequential [`ValidationFramework`]
//! - [`stats`] - percentile, throughput and error-rate helpers
//! - [`config`] - layered [`ValidationConfig`]
//! - [`store`], [`http`], [`resources`], [`backup`] - collaborator contracts
//!   with in-process doubles
//! - [`fixtures`] - synthetic entities, relations and payloads
//!
//! # Quick Start
//!
//! ```no_run
//! use memory_validation_core::{
//!     BaseValidator, CheckOutcome, ValidationFramework, ValidationResult, Validator,
//!     ValidatorError,
//! };
//!
//! struct Smoke;
//!
//! #[async_trait::async_trait]
//! impl Validator for Smoke {
//!     fn name(&self) -> &str {
//!         "smoke"
//!     }
//!
//!     async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
//!         let mut base = BaseValidator::new(self.name());
//!         base.run_test("always_passes", || async { Ok(CheckOutcome::pass()) }).await;
//!         Ok(base.finish())
//!     }
//! }
//!
//! # async fn demo() {
//! let report = ValidationFramework::default()
//!     .with_validator(Smoke)
//!     .run_all_validations()
//!     .await;
//! assert_eq!(report.summary.total_tests, 1);
//! # }
//! ```

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod backup;
pub mod config;
pub mod details;
pub mod error;
pub mod fixtures;
pub mod framework;
pub mod http;
pub mod model;
pub mod resources;
pub mod stats;
pub mod store;
pub mod validator;

pub use backup::{BackupOutcome, BackupTool, SnapshotBackupTool};
pub use config::{BackupConfig, ValidationConfig};
pub use details::Details;
pub use error::{
    ensure, BackupError, CheckError, ConfigError, HttpError, StoreError, ValidatorError,
};
pub use fixtures::{TestDataGenerator, TextSize};
pub use framework::{print_summary, render_summary, ValidationFramework, DEFAULT_SUITE_NAME};
pub use http::{HttpMethod, HttpProbe, HttpResponse, StubHttpProbe};
pub use model::{
    BenchmarkBreakdown, BenchmarkResult, HealthCheckResult, HealthStatus, ReportSummary,
    ScenarioBreakdown, Status, ValidationReport, ValidationResult,
};
pub use resources::{FixedResourceProbe, ResourceProbe, ResourceSnapshot};
pub use stats::LatencyStats;
pub use store::{InMemoryStore, MemoryStore, TenantRef};
pub use validator::{
    best_effort, run_test, BaseValidator, CheckOutcome, CheckResult, Validator, ValidatorSummary,
};
