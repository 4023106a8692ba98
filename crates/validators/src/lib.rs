// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Specialized validators for the memory system.
//!
//! Each validator bundles the checks of one concern and runs them against
//! the collaborators in `memory_validation_core`: the [`MemoryStore`], the
//! [`HttpProbe`] and the [`BackupTool`]. Checks that write fixtures create
//! them under a freshly generated tenant and remove that tenant afterwards,
//! whether or not the check passed.
//!
//! # Quick Start
//!
//! ```no_run
//! use memory_validation_core::{InMemoryStore, StubHttpProbe, ValidationConfig, ValidationFramework};
//! use memory_validation_validators::{CrudValidator, DataIntegrityValidator, MemorySystemHealthChecker};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let config = ValidationConfig::default();
//! let store = Arc::new(InMemoryStore::new());
//!
//! let report = ValidationFramework::new("Data Integrity")
//!     .with_validator(MemorySystemHealthChecker::new(
//!         Some(store.clone()),
//!         Arc::new(StubHttpProbe::new()),
//!         &config,
//!     ))
//!     .with_validator(DataIntegrityValidator::new(store.clone(), &config))
//!     .with_validator(CrudValidator::new(store, &config))
//!     .run_all_validations()
//!     .await;
//! assert!(!report.has_failures());
//! # }
//! ```
//!
//! [`MemoryStore`]: memory_validation_core::MemoryStore
//! [`HttpProbe`]: memory_validation_core::HttpProbe
//! [`BackupTool`]: memory_validation_core::BackupTool

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

mod workspace;

pub mod backup;
pub mod cleanup;
pub mod crud;
pub mod faults;
pub mod health;
pub mod integrity;
pub mod interface;
pub mod migration;

pub use backup::BackupValidator;
pub use cleanup::CleanupValidator;
pub use crud::CrudValidator;
pub use faults::{
    backoff_delay, ErrorSimulator, FaultInjectingProbe, FaultInjectingResources,
    FaultInjectingStore, NetworkFault, ResourceFault, StoreFault,
};
pub use health::{HealthSummary, MemorySystemHealthChecker, OverallHealth};
pub use integrity::DataIntegrityValidator;
pub use interface::InterfaceConsistencyValidator;
pub use migration::MigrationValidator;
