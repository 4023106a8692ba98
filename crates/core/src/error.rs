// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types shared by the validation harness.
//!
//! Collaborator failures (`StoreError`, `HttpError`, `BackupError`) are kept
//! distinct from check failures (`CheckError`) so that a check can tell an
//! assertion that did not hold apart from an infrastructure problem.

use std::time::Duration;
use thiserror::Error;

/// Result alias defaulting to [`CheckError`], the error type of every check.
pub type Result<T, E = CheckError> = std::result::Result<T, E>;

/// Errors raised by a [`crate::store::MemoryStore`] implementation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The store is not configured (no connection URL).
    #[error("Database URL not configured")]
    NotConfigured,

    /// The connection to the store was lost or could not be established.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The operation did not complete in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store detected a deadlock and aborted the transaction.
    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    /// A resource (memory, connection pool, disk) is exhausted.
    #[error("Resource exhausted ({resource}): {message}")]
    ResourceExhausted {
        /// Which resource ran out.
        resource: String,
        /// Store-provided detail.
        message: String,
    },

    /// A write sequence was aborted and rolled back.
    #[error("Transaction aborted at step {step}: {reason}")]
    Aborted {
        /// One-based index of the failing step.
        step: usize,
        /// Why the step failed.
        reason: String,
    },

    /// The query itself failed.
    #[error("Query failed: {0}")]
    Query(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether this error is the store reporting resource pressure.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, StoreError::ResourceExhausted { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors raised by an [`crate::http::HttpProbe`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HttpError {
    /// The remote end refused the connection.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// No response within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Any other transport failure.
    #[error("Request failed: {0}")]
    Request(String),

    /// The response body could not be decoded.
    #[error("Invalid response body: {0}")]
    Decode(String),
}

/// Errors raised by a [`crate::backup::BackupTool`].
#[derive(Debug, Error)]
pub enum BackupError {
    /// The tool could not be started.
    #[error("Failed to launch {tool}: {source}")]
    Spawn {
        /// Executable name.
        tool: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The tool exited with a non-zero status.
    #[error("{tool} exited with status {code:?}: {stderr}")]
    ExitStatus {
        /// Executable name.
        tool: String,
        /// Exit code if the process was not killed by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// The tool succeeded but produced an empty file.
    #[error("Backup file {0} is empty")]
    EmptyOutput(String),

    /// Reading or writing a dump failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The in-process snapshot could not be (de)serialized.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// The store rejected the restored data.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while loading [`crate::config::ValidationConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be merged or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value was present but outside its allowed range.
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Failure of a single check.
///
/// `Assertion` is the expected failure path: the check ran and an invariant
/// did not hold. Every other variant is wrapped as an unexpected error by
/// [`crate::validator::run_test`].
#[derive(Debug, Error)]
pub enum CheckError {
    /// An invariant did not hold.
    #[error("{0}")]
    Assertion(String),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// HTTP failure.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Backup tool failure.
    #[error(transparent)]
    Backup(#[from] BackupError),

    /// File system failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A spawned task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),
}

impl CheckError {
    /// Build an assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        CheckError::Assertion(message.into())
    }

    /// Whether this is an assertion-style failure.
    pub fn is_assertion(&self) -> bool {
        matches!(self, CheckError::Assertion(_))
    }
}

impl From<tokio::task::JoinError> for CheckError {
    fn from(err: tokio::task::JoinError) -> Self {
        CheckError::Task(err.to_string())
    }
}

/// A whole validator could not run.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// A collaborator the validator depends on is unusable.
    #[error("{validator} setup failed: {reason}")]
    Setup {
        /// Validator name.
        validator: String,
        /// What went wrong.
        reason: String,
    },

    /// Store failure outside of any single check.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// File system failure outside of any single check.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fail the current check with `message` unless `condition` holds.
pub fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), CheckError> {
    if condition {
        Ok(())
    } else {
        Err(CheckError::Assertion(message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_passes_and_fails() {
        assert!(ensure(true, || "unused".to_string()).is_ok());
        let err = ensure(false, || "rows remain".to_string()).unwrap_err();
        assert!(err.is_assertion());
        assert_eq!(err.to_string(), "rows remain");
    }

    #[test]
    fn test_store_error_wraps_into_check_error() {
        let err: CheckError = StoreError::ConnectionLost("reset by peer".into()).into();
        assert!(!err.is_assertion());
        assert_eq!(err.to_string(), "Connection lost: reset by peer");
    }

    #[test]
    fn test_resource_exhaustion_flag() {
        let err = StoreError::ResourceExhausted {
            resource: "connections".into(),
            message: "Connection pool exhausted".into(),
        };
        assert!(err.is_resource_exhaustion());
        assert!(!StoreError::NotConfigured.is_resource_exhaustion());
    }
}
