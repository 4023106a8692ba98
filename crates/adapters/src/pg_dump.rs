// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! [`BackupTool`] that shells out to `pg_dump` and `psql`.

use async_trait::async_trait;
use memory_validation_core::backup::{BackupOutcome, BackupTool};
use memory_validation_core::config::BackupConfig;
use memory_validation_core::error::BackupError;
use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

const DUMP_TOOL: &str = "pg_dump";
const RESTORE_TOOL: &str = "psql";

/// Plain-SQL dumps via the Postgres client tools on `PATH`.
#[derive(Debug, Clone)]
pub struct PgDumpTool {
    config: BackupConfig,
}

impl PgDumpTool {
    /// Tool for the database described by `config`.
    pub fn new(config: BackupConfig) -> Self {
        Self { config }
    }

    fn connection_args(&self) -> Vec<String> {
        vec![
            "--host".to_string(),
            self.config.host.clone(),
            "--port".to_string(),
            self.config.port.to_string(),
            "--username".to_string(),
            self.config.user.clone(),
            "--dbname".to_string(),
            self.config.database.clone(),
            "--no-password".to_string(),
        ]
    }

    fn dump_args(&self, path: &Path) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend([
            "--clean".to_string(),
            "--if-exists".to_string(),
            "--file".to_string(),
            path.display().to_string(),
        ]);
        args
    }

    fn restore_args(&self, path: &Path) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend([
            "--quiet".to_string(),
            "--set".to_string(),
            "ON_ERROR_STOP=1".to_string(),
            "--file".to_string(),
            path.display().to_string(),
        ]);
        args
    }

    async fn run(&self, tool: &str, args: Vec<String>) -> Result<i32, BackupError> {
        let output = Command::new(tool)
            .args(&args)
            .env("PGPASSWORD", &self.config.password)
            .output()
            .await
            .map_err(|source| BackupError::Spawn {
                tool: tool.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(tool, code = ?output.status.code(), "Backup tool failed");
            return Err(BackupError::ExitStatus {
                tool: tool.to_string(),
                code: output.status.code(),
                stderr,
            });
        }
        Ok(output.status.code().unwrap_or(0))
    }
}

async fn file_size(path: &Path) -> Result<u64, BackupError> {
    let size = tokio::fs::metadata(path).await?.len();
    if size == 0 {
        return Err(BackupError::EmptyOutput(path.display().to_string()));
    }
    Ok(size)
}

#[async_trait]
impl BackupTool for PgDumpTool {
    async fn dump(&self, path: &Path) -> Result<BackupOutcome, BackupError> {
        let exit_code = self.run(DUMP_TOOL, self.dump_args(path)).await?;
        let bytes_written = file_size(path).await?;
        info!(file = %path.display(), bytes = bytes_written, "pg_dump finished");
        Ok(BackupOutcome {
            exit_code,
            bytes_written,
        })
    }

    async fn restore(&self, path: &Path) -> Result<BackupOutcome, BackupError> {
        let bytes_written = file_size(path).await?;
        let exit_code = self.run(RESTORE_TOOL, self.restore_args(path)).await?;
        info!(file = %path.display(), "Restore finished");
        Ok(BackupOutcome {
            exit_code,
            bytes_written,
        })
    }
}
