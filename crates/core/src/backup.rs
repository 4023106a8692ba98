// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! The dump/restore collaborator.

use crate::error::BackupError;
use crate::store::{purge_tenant, GraphSnapshot, InMemoryStore, MemoryStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// What a dump or restore run reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOutcome {
    /// Process exit code; 0 on success.
    pub exit_code: i32,
    /// Size of the dump file.
    pub bytes_written: u64,
}

/// External dump/restore tool.
///
/// A run succeeds when the tool exits with 0 and the dump file is non-empty;
/// anything else is a [`BackupError`].
#[async_trait]
pub trait BackupTool: Send + Sync {
    /// Dump the whole store to `path`.
    async fn dump(&self, path: &Path) -> Result<BackupOutcome, BackupError>;

    /// Restore the store from a dump at `path`.
    async fn restore(&self, path: &Path) -> Result<BackupOutcome, BackupError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDump {
    tenants: Vec<GraphSnapshot>,
}

/// Dumps an [`InMemoryStore`] as JSON, one graph snapshot per tenant.
///
/// Restoring replaces every tenant present in the dump; tenants absent from
/// the dump are left alone.
#[derive(Debug, Clone)]
pub struct SnapshotBackupTool {
    store: Arc<InMemoryStore>,
    purge_batch_size: u64,
}

impl SnapshotBackupTool {
    /// Tool over `store`.
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self {
            store,
            purge_batch_size: 500,
        }
    }
}

#[async_trait]
impl BackupTool for SnapshotBackupTool {
    async fn dump(&self, path: &Path) -> Result<BackupOutcome, BackupError> {
        let mut tenants = Vec::new();
        for tenant in self.store.tenants() {
            tenants.push(self.store.export_tenant(&tenant).await?);
        }
        let bytes = serde_json::to_vec_pretty(&StoreDump { tenants })?;
        tokio::fs::write(path, &bytes).await?;

        let bytes_written = tokio::fs::metadata(path).await?.len();
        if bytes_written == 0 {
            return Err(BackupError::EmptyOutput(path.display().to_string()));
        }
        info!(file = %path.display(), bytes = bytes_written, "Snapshot dump written");
        Ok(BackupOutcome {
            exit_code: 0,
            bytes_written,
        })
    }

    async fn restore(&self, path: &Path) -> Result<BackupOutcome, BackupError> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Err(BackupError::EmptyOutput(path.display().to_string()));
        }
        let dump: StoreDump = serde_json::from_slice(&bytes)?;

        for snapshot in &dump.tenants {
            let removed = purge_tenant(self.store.as_ref(), &snapshot.tenant, self.purge_batch_size).await?;
            let imported = self.store.import_snapshot(snapshot).await?;
            debug!(
                tenant = %snapshot.tenant,
                removed,
                entities = imported.entities,
                relations = imported.relations,
                "Tenant restored"
            );
        }
        Ok(BackupOutcome {
            exit_code: 0,
            bytes_written: bytes.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntityFilter, EntityRecord, TenantRef};

    #[tokio::test]
    async fn test_dump_then_restore_replaces_tenant_rows() {
        let store = Arc::new(InMemoryStore::new());
        let tenant = TenantRef::fresh("backup_test");
        let kept = EntityRecord::new(&tenant, "Backup Test Entity 0", "test_entity");
        store.insert_entity(&kept).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        let tool = SnapshotBackupTool::new(store.clone());

        let outcome = tool.dump(&path).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.bytes_written > 0);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Backup Test Entity 0"));

        store
            .insert_entity(&EntityRecord::new(&tenant, "written after dump", "test_entity"))
            .await
            .unwrap();
        assert_eq!(store.count_entities(&tenant, &EntityFilter::All).await.unwrap(), 2);

        tool.restore(&path).await.unwrap();
        let restored = store.count_entities(&tenant, &EntityFilter::All).await.unwrap();
        assert_eq!(restored, 1);
        assert!(store.get_entity(&tenant, kept.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restore_of_empty_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, b"").unwrap();

        let tool = SnapshotBackupTool::new(Arc::new(InMemoryStore::new()));
        assert!(matches!(
            tool.restore(&path).await,
            Err(BackupError::EmptyOutput(_))
        ));
    }
}
