// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scratch directories for validators that write dump and export files.

use memory_validation_core::validator::CheckOutcome;
use std::path::Path;
use tempfile::TempDir;
use tracing::error;

/// Create a fresh directory named `{prefix}...` under `root`.
///
/// Failure is logged and reported as `None`; the steps that need the
/// directory then skip.
pub fn create(root: &Path, prefix: &str) -> Option<TempDir> {
    let created = std::fs::create_dir_all(root)
        .and_then(|()| tempfile::Builder::new().prefix(prefix).tempdir_in(root));
    match created {
        Ok(dir) => Some(dir),
        Err(err) => {
            error!(error = %err, root = %root.display(), "Scratch directory unavailable");
            None
        }
    }
}

/// Path of the scratch directory, or the skip outcome when there is none.
pub fn require(workspace: &Option<TempDir>) -> Result<&Path, CheckOutcome> {
    workspace
        .as_ref()
        .map(TempDir::path)
        .ok_or_else(|| CheckOutcome::skipped("Scratch directory unavailable"))
}

/// Check closure running `$check` with the scratch directory bound to
/// `$dir`, or skipping when there is none.
macro_rules! with_workspace {
    ($workspace:expr, |$dir:ident| $check:expr) => {
        || async {
            match $crate::workspace::require($workspace) {
                Ok($dir) => $check.await,
                Err(skipped) => Ok(skipped),
            }
        }
    };
}

pub(crate) use with_workspace;
