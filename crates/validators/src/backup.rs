// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Dump and restore procedures of the backup tool, run against a live store.
//!
//! Steps share one fixture tenant and one temporary directory, created by
//! `setup_test_environment` and removed by `cleanup_test_environment`.

use crate::workspace::{self, with_workspace};
use async_trait::async_trait;
use chrono::Utc;
use memory_validation_core::backup::{BackupOutcome, BackupTool};
use memory_validation_core::config::ValidationConfig;
use memory_validation_core::details::BackupDetails;
use memory_validation_core::error::ensure;
use memory_validation_core::model::ValidationResult;
use memory_validation_core::store::{
    purge_tenant, EntityFilter, EntityRecord, MemoryStore, RelationRecord, TenantRef,
};
use memory_validation_core::validator::{BaseValidator, CheckOutcome, CheckResult};
use memory_validation_core::{CheckError, Validator, ValidatorError};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const JOB_TYPE: &str = "crew_job";
const MEMORY_TYPE: &str = "memory";
const JOB_FIXTURES: u64 = 5;
const MEMORY_FIXTURES: u64 = 10;
const INCREMENTAL_RECORDS: usize = 3;
const CONCURRENT_WRITES: u32 = 10;
const CONCURRENT_WRITE_INTERVAL: Duration = Duration::from_millis(50);
const BACKGROUND_INTERVAL: Duration = Duration::from_millis(100);

/// Backup and restore validator.
pub struct BackupValidator {
    store: Arc<dyn MemoryStore>,
    tool: Arc<dyn BackupTool>,
    backup_dir: PathBuf,
    cleanup_batch_size: u64,
    head_start: Duration,
}

impl std::fmt::Debug for BackupValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupValidator")
            .field("backup_dir", &self.backup_dir)
            .field("head_start", &self.head_start)
            .finish()
    }
}

impl BackupValidator {
    /// Validator dumping `store` with `tool` into the configured backup directory.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        tool: Arc<dyn BackupTool>,
        config: &ValidationConfig,
    ) -> Self {
        Self {
            store,
            tool,
            backup_dir: config.backup_dir(),
            cleanup_batch_size: config.cleanup_batch_size,
            head_start: Duration::from_millis(500),
        }
    }

    /// How long background operations run before a dump starts.
    pub fn with_head_start(mut self, head_start: Duration) -> Self {
        self.head_start = head_start;
        self
    }

    async fn dump_to(&self, path: &Path, failure: &str) -> Result<BackupOutcome, CheckError> {
        let outcome = self.tool.dump(path).await?;
        ensure(outcome.exit_code == 0, || failure.to_string())?;
        Ok(outcome)
    }

    async fn count_type(&self, tenant: &TenantRef, entity_type: &str) -> Result<u64, CheckError> {
        Ok(self
            .store
            .count_entities(tenant, &EntityFilter::EntityType(entity_type.into()))
            .await?)
    }

    async fn data_counts(&self, tenant: &TenantRef) -> Result<BTreeMap<&'static str, u64>, CheckError> {
        let mut counts = BTreeMap::new();
        counts.insert(JOB_TYPE, self.count_type(tenant, JOB_TYPE).await?);
        counts.insert(MEMORY_TYPE, self.count_type(tenant, MEMORY_TYPE).await?);
        counts.insert(
            "relations",
            self.store.list_relations(tenant).await?.len() as u64,
        );
        Ok(counts)
    }

    /// Seed crew jobs, memories and the relations between them.
    pub async fn setup(&self, tenant: &TenantRef, workspace: Option<&Path>) -> CheckResult {
        let dir = workspace.ok_or_else(|| CheckError::assertion("Backup directory could not be created"))?;
        info!(dir = %dir.display(), "Created backup workspace");

        let jobs: Vec<EntityRecord> = (0..JOB_FIXTURES)
            .map(|i| {
                EntityRecord::new(tenant, format!("backup_test_crew_{i}"), JOB_TYPE).with_metadata(json!({
                    "job_status": "completed",
                    "job_input": {"test": format!("backup_test_input_{i}")},
                    "job_output": {"result": format!("backup_test_output_{i}")},
                }))
            })
            .collect();
        let memories: Vec<EntityRecord> = (0..MEMORY_FIXTURES)
            .map(|i| {
                EntityRecord::new(tenant, format!("Backup Memory {i}"), MEMORY_TYPE).with_metadata(json!({
                    "memory_content": format!("Test memory content {i} for backup validation"),
                    "test_index": i,
                    "backup_test": true,
                }))
            })
            .collect();
        self.store.insert_entities(&jobs).await?;
        self.store.insert_entities(&memories).await?;

        for (job, memory) in jobs.iter().zip(&memories) {
            let relation = RelationRecord::new(tenant, job.id, memory.id, "recorded");
            self.store.insert_relation(&relation).await?;
        }

        let records = jobs.len() + memories.len();
        info!(tenant = %tenant, records, "Created backup fixtures");
        Ok(CheckOutcome::passed(BackupDetails {
            file: dir.display().to_string(),
            records: Some(records),
            ..BackupDetails::default()
        }))
    }

    fn spawn_background_operations(&self, tenant: &TenantRef, stop: Arc<AtomicBool>) -> JoinHandle<u32> {
        let store = Arc::clone(&self.store);
        let tenant = tenant.clone();
        tokio::spawn(async move {
            let mut operations = 0;
            while !stop.load(Ordering::Relaxed) {
                if let Err(err) = store.count_entities(&tenant, &EntityFilter::All).await {
                    debug!(error = %err, "Background read failed");
                }
                let temp = EntityRecord::new(&tenant, "Temporary concurrent operation data", "temp")
                    .with_metadata(json!({"concurrent": true}));
                match store.insert_entity(&temp).await {
                    Ok(outcome) if outcome.is_inserted() => {
                        if let Err(err) = store.delete_entity(&tenant, temp.id).await {
                            debug!(error = %err, "Background delete failed");
                        }
                        operations += 1;
                    }
                    Ok(_) => {}
                    Err(err) => debug!(error = %err, "Background write failed"),
                }
                tokio::time::sleep(BACKGROUND_INTERVAL).await;
            }
            operations
        })
    }

    /// Dump while reads and writes keep running.
    pub async fn check_backup_during_operations(&self, tenant: &TenantRef, dir: &Path) -> CheckResult {
        let path = dir.join("active_backup.sql");
        let stop = Arc::new(AtomicBool::new(false));
        let background = self.spawn_background_operations(tenant, Arc::clone(&stop));
        tokio::time::sleep(self.head_start).await;

        let dumped = self.tool.dump(&path).await;
        stop.store(true, Ordering::Relaxed);
        let operations = background.await?;

        let outcome = dumped?;
        ensure(outcome.exit_code == 0, || {
            "Backup failed during concurrent operations".to_string()
        })?;
        ensure(path.exists(), || "Backup file was not created".to_string())?;
        let size = tokio::fs::metadata(&path).await?.len();
        ensure(size > 0, || "Backup file is empty".to_string())?;

        info!(bytes = size, operations, "Backup completed during operations");
        Ok(CheckOutcome::passed(BackupDetails {
            file: path.display().to_string(),
            bytes_written: size,
            concurrent_writes: Some(operations),
            ..BackupDetails::default()
        }))
    }

    /// The dump contains the fixture tenant and known fixture values.
    pub async fn check_backup_consistency(&self, tenant: &TenantRef, dir: &Path) -> CheckResult {
        let path = dir.join("consistency_backup.sql");
        let counts = self.data_counts(tenant).await?;
        let outcome = self.dump_to(&path, "Backup operation failed").await?;

        let content = tokio::fs::read_to_string(&path).await?;
        ensure(content.contains(&tenant.actor_id), || {
            "Test client ID not found in backup".to_string()
        })?;
        ensure(content.contains("backup_test_crew"), || {
            "Test crew jobs not found in backup".to_string()
        })?;
        ensure(content.contains("Test memory content"), || {
            "Test memory content not found in backup".to_string()
        })?;

        info!(?counts, "Backup consistency verified");
        Ok(CheckOutcome::passed(BackupDetails {
            file: path.display().to_string(),
            bytes_written: outcome.bytes_written,
            records: Some(counts.values().sum::<u64>() as usize),
            ..BackupDetails::default()
        }))
    }

    /// Delete the fixtures, restore the dump, and find them again.
    pub async fn check_backup_restoration(&self, tenant: &TenantRef, dir: &Path) -> CheckResult {
        let path = dir.join("restore_test_backup.sql");
        let outcome = self.dump_to(&path, "Initial backup failed").await?;

        purge_tenant(self.store.as_ref(), tenant, self.cleanup_batch_size).await?;
        let left = self.store.count_entities(tenant, &EntityFilter::All).await?;
        ensure(left == 0, || "Test data was not properly deleted".to_string())?;

        let restored = self.tool.restore(&path).await?;
        ensure(restored.exit_code == 0, || "Backup restoration failed".to_string())?;

        let present = self.store.count_entities(tenant, &EntityFilter::All).await?;
        ensure(present > 0, || "Client data was not restored".to_string())?;
        let jobs = self.count_type(tenant, JOB_TYPE).await?;
        ensure(jobs == JOB_FIXTURES, || {
            format!("Expected {JOB_FIXTURES} crew jobs, found {jobs}")
        })?;
        let memories = self.count_type(tenant, MEMORY_TYPE).await?;
        ensure(memories == MEMORY_FIXTURES, || {
            format!("Expected {MEMORY_FIXTURES} memory entries, found {memories}")
        })?;

        info!("Backup restoration completed successfully");
        Ok(CheckOutcome::passed(BackupDetails {
            file: path.display().to_string(),
            bytes_written: outcome.bytes_written,
            records: Some(present as usize),
            ..BackupDetails::default()
        }))
    }

    /// Taking a dump never removes rows.
    pub async fn check_no_data_loss(&self, tenant: &TenantRef, dir: &Path) -> CheckResult {
        let initial = self.data_counts(tenant).await?;
        let path = dir.join("no_loss_backup.sql");
        let outcome = self.dump_to(&path, "Backup operation failed").await?;
        let after = self.data_counts(tenant).await?;

        for (table, before) in &initial {
            let now = after.get(table).copied().unwrap_or(0);
            ensure(now >= *before, || {
                format!("Data loss detected in {table}: {before} -> {now}")
            })?;
        }
        Ok(CheckOutcome::passed(BackupDetails {
            file: path.display().to_string(),
            bytes_written: outcome.bytes_written,
            ..BackupDetails::default()
        }))
    }

    /// Full dump, then an export of only the rows written since.
    pub async fn check_incremental_backup(&self, tenant: &TenantRef, dir: &Path) -> CheckResult {
        let full = dir.join("full_backup.sql");
        self.dump_to(&full, "Full backup failed").await?;

        let added: Vec<EntityRecord> = (0..INCREMENTAL_RECORDS)
            .map(|i| {
                EntityRecord::new(tenant, format!("Incremental test memory {i}"), "incremental")
                    .with_metadata(json!({"incremental_test": true}))
            })
            .collect();
        self.store.insert_entities(&added).await?;

        let mut records = Vec::with_capacity(added.len());
        for entity in &added {
            if let Some(row) = self.store.get_entity(tenant, entity.id).await? {
                records.push(row);
            }
        }

        let mut content = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(content, "-- Incremental Backup");
        let _ = writeln!(content, "-- Created: {}", Utc::now().to_rfc3339());
        let _ = writeln!(content, "-- Records: {}", records.len());
        let _ = writeln!(content);
        for record in &records {
            let _ = writeln!(content, "{}", serde_json::to_string(record)?);
        }
        let path = dir.join("incremental_backup.sql");
        tokio::fs::write(&path, &content).await?;

        let written = tokio::fs::read_to_string(&path).await?;
        ensure(written.contains("Incremental test memory"), || {
            "New data not found in incremental backup".to_string()
        })?;

        for entity in &added {
            self.store.delete_entity(tenant, entity.id).await?;
        }
        info!(records = records.len(), "Incremental backup completed");
        Ok(CheckOutcome::passed(BackupDetails {
            file: path.display().to_string(),
            bytes_written: written.len() as u64,
            records: Some(records.len()),
            ..BackupDetails::default()
        }))
    }

    async fn concurrent_writes(&self, tenant: &TenantRef) -> u32 {
        let mut writes = 0;
        for i in 0..CONCURRENT_WRITES {
            let temp = EntityRecord::new(tenant, format!("Concurrent write {i}"), "concurrent_test")
                .with_metadata(json!({"concurrent_write": true}));
            match self.store.insert_entity(&temp).await {
                Ok(outcome) if outcome.is_inserted() => {
                    writes += 1;
                    if let Err(err) = self.store.delete_entity(tenant, temp.id).await {
                        debug!(error = %err, "Concurrent cleanup failed");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(error = %err, "Concurrent write failed");
                    break;
                }
            }
            tokio::time::sleep(CONCURRENT_WRITE_INTERVAL).await;
        }
        writes
    }

    /// Dump and a burst of writes run side by side.
    pub async fn check_concurrent_backup(&self, tenant: &TenantRef, dir: &Path) -> CheckResult {
        let path = dir.join("concurrent_backup.sql");
        let (dumped, writes) = tokio::join!(self.tool.dump(&path), self.concurrent_writes(tenant));

        let outcome = dumped?;
        ensure(outcome.exit_code == 0, || "Backup failed with concurrent writes".to_string())?;
        ensure(writes > 0, || "No concurrent writes were performed".to_string())?;
        ensure(path.exists(), || "Backup file was not created".to_string())?;

        info!(writes, "Concurrent backup completed");
        Ok(CheckOutcome::passed(BackupDetails {
            file: path.display().to_string(),
            bytes_written: outcome.bytes_written,
            concurrent_writes: Some(writes),
            ..BackupDetails::default()
        }))
    }

    /// Remove the fixtures and the backup directory.
    pub async fn cleanup(&self, tenant: &TenantRef, workspace: Option<TempDir>) -> CheckResult {
        let removed = purge_tenant(self.store.as_ref(), tenant, self.cleanup_batch_size).await?;
        if let Some(dir) = workspace {
            let path = dir.path().display().to_string();
            dir.close()?;
            info!(dir = %path, "Removed backup workspace");
        }
        info!(tenant = %tenant, removed, "Cleaned up backup fixtures");
        Ok(CheckOutcome::pass())
    }
}

#[async_trait]
impl Validator for BackupValidator {
    fn name(&self) -> &str {
        "BackupValidator"
    }

    async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
        let mut base = BaseValidator::new(self.name());
        let tenant = TenantRef::fresh("backup_test");
        let mut workspace = workspace::create(&self.backup_dir, "memory_backup_test_");

        base.run_test("setup_test_environment", || {
            self.setup(&tenant, workspace.as_ref().map(TempDir::path))
        })
        .await;
        base.run_test(
            "test_database_backup_during_operations",
            with_workspace!(&workspace, |dir| self.check_backup_during_operations(&tenant, dir)),
        )
        .await;
        base.run_test(
            "test_backup_data_consistency",
            with_workspace!(&workspace, |dir| self.check_backup_consistency(&tenant, dir)),
        )
        .await;
        base.run_test(
            "test_backup_restoration",
            with_workspace!(&workspace, |dir| self.check_backup_restoration(&tenant, dir)),
        )
        .await;
        base.run_test(
            "test_no_data_loss_during_backup",
            with_workspace!(&workspace, |dir| self.check_no_data_loss(&tenant, dir)),
        )
        .await;
        base.run_test(
            "test_incremental_backup",
            with_workspace!(&workspace, |dir| self.check_incremental_backup(&tenant, dir)),
        )
        .await;
        base.run_test(
            "test_backup_with_concurrent_writes",
            with_workspace!(&workspace, |dir| self.check_concurrent_backup(&tenant, dir)),
        )
        .await;
        base.run_test("cleanup_test_environment", || {
            self.cleanup(&tenant, workspace.take())
        })
        .await;

        Ok(base.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_validation_core::backup::SnapshotBackupTool;
    use memory_validation_core::model::Status;
    use memory_validation_core::store::InMemoryStore;
    use memory_validation_core::BackupError;

    fn validator(store: Arc<InMemoryStore>, dir: &Path) -> BackupValidator {
        let mut config = ValidationConfig::default();
        config.backup.backup_dir = Some(dir.to_path_buf());
        BackupValidator::new(store.clone(), Arc::new(SnapshotBackupTool::new(store)), &config)
            .with_head_start(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_every_step_passes_and_workspace_is_removed() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let results = validator(store.clone(), root.path()).run_validation().await.unwrap();

        assert_eq!(results.len(), 8);
        for result in &results {
            assert_eq!(result.status(), Status::Passed, "{}: {:?}", result.test_name(), result.message());
        }
        assert_eq!(results[0].test_name(), "setup_test_environment");
        assert_eq!(results[7].test_name(), "cleanup_test_environment");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        assert!(store.tenants().is_empty());
    }

    struct FailingTool;

    #[async_trait]
    impl BackupTool for FailingTool {
        async fn dump(&self, _path: &Path) -> Result<BackupOutcome, BackupError> {
            Ok(BackupOutcome {
                exit_code: 1,
                bytes_written: 0,
            })
        }

        async fn restore(&self, path: &Path) -> Result<BackupOutcome, BackupError> {
            Err(BackupError::EmptyOutput(path.display().to_string()))
        }
    }

    #[tokio::test]
    async fn test_failing_tool_fails_dump_steps() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let mut config = ValidationConfig::default();
        config.backup.backup_dir = Some(root.path().to_path_buf());
        let results = BackupValidator::new(store.clone(), Arc::new(FailingTool), &config)
            .with_head_start(Duration::from_millis(1))
            .run_validation()
            .await
            .unwrap();

        assert_eq!(results[0].status(), Status::Passed);
        assert_eq!(
            results[1].error_message(),
            Some("Backup failed during concurrent operations")
        );
        assert_eq!(results[2].error_message(), Some("Backup operation failed"));
        assert_eq!(results[3].error_message(), Some("Initial backup failed"));
        assert_eq!(results[7].status(), Status::Passed);
        assert!(store.tenants().is_empty());
    }

    #[tokio::test]
    async fn test_steps_skip_without_workspace() {
        let store = Arc::new(InMemoryStore::new());
        let tenant = TenantRef::fresh("backup_test");
        let v = validator(store, Path::new("."));
        let workspace: Option<TempDir> = None;

        let check = with_workspace!(&workspace, |dir| v.check_no_data_loss(&tenant, dir));
        let outcome = check().await.unwrap();
        assert_eq!(outcome, CheckOutcome::skipped("Scratch directory unavailable"));

        let setup = v.setup(&tenant, None).await;
        assert!(matches!(setup, Err(CheckError::Assertion(_))));
    }
}
