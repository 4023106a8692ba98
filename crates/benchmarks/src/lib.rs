//! Benchmarks and reporting for memory system validation.
//!
//! The two load-driven validators live here, next to the code that turns a
//! finished run into JSON and Markdown reports.
//!
//! # Quick Start
//!
//! ```no_run
//! use memory_validation_benchmarks::{PerformanceBenchmarker, ScalabilityValidator};
//! use memory_validation_core::{
//!     FixedResourceProbe, InMemoryStore, ValidationConfig, ValidationFramework,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let config = ValidationConfig::default();
//! let store = Arc::new(InMemoryStore::new());
//! let probe = Arc::new(FixedResourceProbe::default());
//!
//! let report = ValidationFramework::new("Performance")
//!     .with_validator(PerformanceBenchmarker::new(store.clone(), probe.clone(), &config))
//!     .with_validator(ScalabilityValidator::new(store, probe, &config))
//!     .run_all_validations()
//!     .await;
//!
//! for result in &report.results {
//!     println!("{}: {}", result.test_name(), result.status());
//! }
//! # }
//! ```
//!
//! # Modules
//!
//! - [`performance`] - latency and throughput benchmarks with threshold verdicts
//! - [`scalability`] - dataset and concurrency escalation
//! - [`sampling`] - per-scenario latency samples
//! - [`report`] - the comprehensive report model
//! - [`io`] - reading and writing reports
//! - [`markdown`] - Markdown rendering

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod io;
pub mod markdown;
pub mod performance;
pub mod report;
pub mod sampling;
pub mod scalability;

pub use performance::{PerformanceBenchmarker, PerformanceThresholds};
pub use report::{ComponentReport, ComprehensiveReport, Environment, OverallStatus, Readiness};
pub use scalability::{escalate, ScalabilityThresholds, ScalabilityValidator};
