// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Moving a tenant's graph between environments.
//!
//! A migration here is export, retarget to a new tenant, import. Rollback
//! purges the tenant and re-imports a snapshot taken beforehand.

use crate::workspace::{self, with_workspace};
use async_trait::async_trait;
use memory_validation_core::config::ValidationConfig;
use memory_validation_core::details::{MigrationDetails, RelationshipCensus};
use memory_validation_core::error::ensure;
use memory_validation_core::fixtures::{TestDataGenerator, TextSize};
use memory_validation_core::model::ValidationResult;
use memory_validation_core::store::{
    purge_tenant, EntityFilter, EntityPatch, EntityQuery, EntityRecord, GraphSnapshot,
    MemoryStore, RelationRecord, SchemaChange, TenantRef, ENTITIES_TABLE,
};
use memory_validation_core::validator::{best_effort, BaseValidator, CheckOutcome, CheckResult};
use memory_validation_core::{CheckError, Validator, ValidatorError};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

const USER_TYPE: &str = "user";
const JOB_TYPE: &str = "crew_job";
const MEMORY_TYPE: &str = "memory";
const USERS: usize = 3;
const JOBS: usize = 10;
const MEMORIES: usize = 20;
const MIGRATED_MARKER: &str = " [MIGRATED]";
const BACKFILL_COLUMN: &str = "migration_test_column";
const BACKFILL_VALUE: &str = "migrated_value";
const PARTIAL_ENTITIES: usize = 5;
const LARGE_DATASET_RECORDS: usize = 1000;
const LARGE_DATASET_BATCH: usize = 100;
const LARGE_EXPORT_MAX_SECONDS: f64 = 60.0;
const LARGE_EXPORT_MIN_BYTES: u64 = 100_000;

/// Migration procedure validator.
pub struct MigrationValidator {
    store: Arc<dyn MemoryStore>,
    scratch_root: PathBuf,
    cleanup_batch_size: u64,
    generator: Mutex<TestDataGenerator>,
}

impl std::fmt::Debug for MigrationValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationValidator")
            .field("scratch_root", &self.scratch_root)
            .finish()
    }
}

/// Per-type entity counts of one tenant.
type TypeCounts = BTreeMap<String, u64>;

impl MigrationValidator {
    /// Validator over `store`, writing export files under the backup directory.
    pub fn new(store: Arc<dyn MemoryStore>, config: &ValidationConfig) -> Self {
        Self {
            store,
            scratch_root: config.backup_dir(),
            cleanup_batch_size: config.cleanup_batch_size,
            generator: Mutex::new(TestDataGenerator::new(7)),
        }
    }

    fn filler(&self) -> String {
        match self.generator.lock() {
            Ok(mut generator) => generator.text_sample(TextSize::Small),
            Err(_) => TestDataGenerator::new(7).text_sample(TextSize::Small),
        }
    }

    async fn teardown(&self, tenant: &TenantRef) -> Option<u64> {
        best_effort(
            "migration fixtures",
            purge_tenant(self.store.as_ref(), tenant, self.cleanup_batch_size),
        )
        .await
    }

    /// Export `tenant` into `path` and read the file back.
    async fn export_to_file(&self, tenant: &TenantRef, path: &Path) -> Result<GraphSnapshot, CheckError> {
        let snapshot = self.store.export_tenant(tenant).await?;
        tokio::fs::write(path, serde_json::to_vec_pretty(&snapshot)?).await?;
        let written = tokio::fs::read(path).await?;
        debug!(
            tenant = %tenant,
            entities = snapshot.entities.len(),
            relations = snapshot.relations.len(),
            file = %path.display(),
            "Exported tenant"
        );
        Ok(serde_json::from_slice(&written)?)
    }

    async fn read_snapshot(path: &Path) -> Result<GraphSnapshot, CheckError> {
        Ok(serde_json::from_slice(&tokio::fs::read(path).await?)?)
    }

    async fn type_counts(&self, tenant: &TenantRef) -> Result<TypeCounts, CheckError> {
        let mut counts = TypeCounts::new();
        for entity_type in [USER_TYPE, JOB_TYPE, MEMORY_TYPE] {
            let n = self
                .store
                .count_entities(tenant, &EntityFilter::EntityType(entity_type.into()))
                .await?;
            counts.insert(entity_type.to_string(), n);
        }
        Ok(counts)
    }

    /// Relation totals plus per-type counts of one tenant's live graph.
    async fn census(&self, tenant: &TenantRef) -> Result<(RelationshipCensus, TypeCounts), CheckError> {
        let entities = self
            .store
            .query_entities(tenant, &EntityQuery::new(EntityFilter::All))
            .await?;
        let ids: HashSet<_> = entities.iter().map(|e| e.id).collect();
        let relations = self.store.list_relations(tenant).await?;

        let mut per_type = TypeCounts::new();
        let mut resolved = 0;
        for relation in &relations {
            *per_type.entry(relation.relationship_type.clone()).or_default() += 1;
            if ids.contains(&relation.source_id) && ids.contains(&relation.target_id) {
                resolved += 1;
            }
        }
        let census = RelationshipCensus {
            relations: relations.len() as u64,
            resolved_relations: resolved,
            dangling_relations: relations.len() as u64 - resolved,
            relationship_types: per_type.len() as u64,
        };
        Ok((census, per_type))
    }

    /// Users, crew jobs referencing users, and memories referencing jobs.
    pub async fn setup(&self, tenant: &TenantRef, workspace: Option<&Path>) -> CheckResult {
        let dir = workspace.ok_or_else(|| CheckError::assertion("Migration directory could not be created"))?;
        info!(dir = %dir.display(), "Created migration workspace");

        let users: Vec<EntityRecord> = (0..USERS)
            .map(|i| {
                EntityRecord::new(tenant, format!("migration_test_user_{i}"), USER_TYPE).with_metadata(json!({
                    "user_email": format!("migration.test.{i}@example.com"),
                }))
            })
            .collect();
        let jobs: Vec<EntityRecord> = (0..JOBS)
            .map(|i| {
                EntityRecord::new(tenant, format!("migration_test_crew_{i}"), JOB_TYPE).with_metadata(json!({
                    "job_status": if i % 2 == 0 { "completed" } else { "failed" },
                    "job_input": {
                        "test": format!("migration_test_input_{i}"),
                        "complex_data": {
                            "nested": {"value": i},
                            "array": [1, 2, 3, i],
                        },
                    },
                    "job_output": {
                        "result": format!("migration_test_output_{i}"),
                        "metrics": {"duration": i * 100, "success": i % 2 == 0},
                    },
                }))
            })
            .collect();
        let memories: Vec<EntityRecord> = (0..MEMORIES)
            .map(|i| {
                let job = &jobs[i % JOBS];
                EntityRecord::new(tenant, format!("Migration memory {i}"), MEMORY_TYPE).with_metadata(json!({
                    "memory_content": format!("Migration test memory content {i} with references to job {}", job.id),
                    "memory_type": if i % 3 == 0 { "entity" } else { "relationship" },
                    "test_index": i,
                    "migration_test": true,
                }))
            })
            .collect();

        self.store.insert_entities(&users).await?;
        self.store.insert_entities(&jobs).await?;
        self.store.insert_entities(&memories).await?;

        let mut relations = Vec::with_capacity(JOBS + MEMORIES * 3);
        for (i, job) in jobs.iter().enumerate() {
            relations.push(RelationRecord::new(tenant, job.id, users[i % USERS].id, "requested_by"));
        }
        for (i, memory) in memories.iter().enumerate() {
            relations.push(RelationRecord::new(tenant, memory.id, jobs[i % JOBS].id, "about"));
            for offset in [1, 2] {
                relations.push(RelationRecord::new(
                    tenant,
                    memory.id,
                    jobs[(i + offset) % JOBS].id,
                    "cross_reference",
                ));
            }
        }
        for relation in &relations {
            let outcome = self.store.insert_relation(relation).await?;
            ensure(outcome.is_inserted(), || "Fixture relation was not created".to_string())?;
        }

        info!(
            tenant = %tenant,
            entities = USERS + JOBS + MEMORIES,
            relations = relations.len(),
            "Created migration fixtures"
        );
        Ok(CheckOutcome::passed(MigrationDetails {
            source_tenant: Some(tenant.to_string()),
            entities_exported: (USERS + JOBS + MEMORIES) as u64,
            relations_exported: relations.len() as u64,
            ..MigrationDetails::default()
        }))
    }

    /// Export, retarget to a production tenant, import, and compare counts.
    pub async fn check_dev_to_prod(&self, tenant: &TenantRef, dir: &Path) -> CheckResult {
        let target = TenantRef::fresh("migration_prod");
        let outcome = self.dev_to_prod(tenant, &target, dir).await;
        self.teardown(&target).await;
        outcome
    }

    async fn dev_to_prod(&self, tenant: &TenantRef, target: &TenantRef, dir: &Path) -> CheckResult {
        let exported = self
            .export_to_file(tenant, &dir.join("dev_export.json"))
            .await
            .map_err(|e| CheckError::assertion(format!("Data export failed: {e}")))?;

        let count = |entity_type: &str| {
            exported
                .entities
                .iter()
                .filter(|e| e.entity_type == entity_type && !e.is_deleted())
                .count()
        };
        for (entity_type, label, expected) in [
            (USER_TYPE, "users", USERS),
            (JOB_TYPE, "jobs", JOBS),
            (MEMORY_TYPE, "memory entries", MEMORIES),
        ] {
            let found = count(entity_type);
            ensure(found == expected, || format!("Expected {expected} {label}, found {found}"))?;
        }

        let prepared = exported.retarget(target);
        let import_file = dir.join("prod_import.json");
        tokio::fs::write(&import_file, serde_json::to_vec_pretty(&prepared)?).await?;
        let to_import = Self::read_snapshot(&import_file).await?;
        self.store
            .import_snapshot(&to_import)
            .await
            .map_err(|e| CheckError::assertion(format!("Data import to production failed: {e}")))?;

        let source_counts = self.type_counts(tenant).await?;
        let target_counts = self.type_counts(target).await?;
        for (entity_type, expected) in &source_counts {
            let found = target_counts.get(entity_type).copied().unwrap_or(0);
            ensure(found == *expected, || {
                format!("{entity_type} count mismatch after migration: expected {expected}, found {found}")
            })?;
        }
        let relations_imported = self.store.list_relations(target).await?.len() as u64;

        info!(source = %tenant, target = %target, "Development to production migration completed");
        Ok(CheckOutcome::passed(MigrationDetails {
            source_tenant: Some(tenant.to_string()),
            target_tenant: Some(target.to_string()),
            entities_exported: exported.entities.len() as u64,
            relations_exported: exported.relations.len() as u64,
            entities_imported: target_counts.values().sum(),
            relations_imported,
            ..MigrationDetails::default()
        }))
    }

    /// Relation counts per type and endpoint resolution survive migration.
    pub async fn check_relationship_preservation(&self, tenant: &TenantRef, dir: &Path) -> CheckResult {
        let target = TenantRef::fresh("migration_relationships");
        let outcome = self.relationship_preservation(tenant, &target, dir).await;
        self.teardown(&target).await;
        outcome
    }

    async fn relationship_preservation(
        &self,
        tenant: &TenantRef,
        target: &TenantRef,
        dir: &Path,
    ) -> CheckResult {
        let exported = self
            .export_to_file(tenant, &dir.join("relationship_export.json"))
            .await
            .map_err(|e| CheckError::assertion(format!("Relationship export failed: {e}")))?;
        let (original, original_types) = self.census(tenant).await?;

        self.store
            .import_snapshot(&exported.retarget(target))
            .await
            .map_err(|e| CheckError::assertion(format!("Relationship import failed: {e}")))?;
        let (migrated, migrated_types) = self.census(target).await?;

        for (relationship_type, before) in &original_types {
            let after = migrated_types.get(relationship_type).copied().unwrap_or(0);
            ensure(after == *before, || {
                format!("{relationship_type} relationships not preserved: {before} -> {after}")
            })?;
        }
        ensure(migrated.relations == original.relations, || {
            format!(
                "Relationships not preserved: {} -> {}",
                original.relations, migrated.relations
            )
        })?;
        ensure(migrated.resolved_relations == original.resolved_relations, || {
            "Relationship endpoints not preserved".to_string()
        })?;

        Ok(CheckOutcome::passed(MigrationDetails {
            source_tenant: Some(tenant.to_string()),
            target_tenant: Some(target.to_string()),
            relations_exported: exported.relations.len() as u64,
            relations_imported: migrated.relations,
            original_relationships: Some(original),
            migrated_relationships: Some(migrated),
            ..MigrationDetails::default()
        }))
    }

    /// Version bump 1.0.0 to 1.1.0 adding a column, with a backfill.
    pub async fn check_schema_version_migration(&self, tenant: &TenantRef) -> CheckResult {
        let change = SchemaChange {
            from_version: "1.0.0".to_string(),
            to_version: "1.1.0".to_string(),
            column: BACKFILL_COLUMN.to_string(),
            description: "Add migration test column".to_string(),
        };
        let outcome = self.schema_version_migration(tenant, &change).await;
        best_effort("schema change", self.store.revert_schema_change(&change)).await;
        outcome
    }

    async fn schema_version_migration(&self, tenant: &TenantRef, change: &SchemaChange) -> CheckResult {
        self.store.apply_schema_change(change).await?;

        let columns = self.store.table_columns(ENTITIES_TABLE).await?;
        ensure(columns.iter().any(|c| c == BACKFILL_COLUMN), || {
            "Schema migration failed - new column not found".to_string()
        })?;
        let version = self.store.schema_version().await?;
        ensure(version.as_deref() == Some(change.to_version.as_str()), || {
            format!("Schema version not updated: {}", version.as_deref().unwrap_or("none"))
        })?;

        let expected = self.store.count_entities(tenant, &EntityFilter::All).await?;
        self.store.backfill_column(tenant, BACKFILL_COLUMN, BACKFILL_VALUE).await?;
        let migrated = self
            .store
            .count_backfilled(tenant, BACKFILL_COLUMN, BACKFILL_VALUE)
            .await?;
        ensure(migrated == expected, || {
            format!("Expected {expected} migrated records, found {migrated}")
        })?;

        info!(version = %change.to_version, migrated, "Schema version migration completed");
        Ok(CheckOutcome::passed(MigrationDetails {
            source_tenant: Some(tenant.to_string()),
            entities_imported: migrated,
            schema_version: version,
            ..MigrationDetails::default()
        }))
    }

    /// Exporting one tenant neither includes nor disturbs another.
    pub async fn check_client_isolation(&self, tenant: &TenantRef, dir: &Path) -> CheckResult {
        let other = TenantRef::fresh("migration_other");
        let outcome = self.client_isolation(tenant, &other, dir).await;
        self.teardown(&other).await;
        outcome
    }

    async fn client_isolation(&self, tenant: &TenantRef, other: &TenantRef, dir: &Path) -> CheckResult {
        let bystander = EntityRecord::new(other, "Other client data that should not be migrated", MEMORY_TYPE)
            .with_metadata(json!({"isolation_test": true}));
        self.store.insert_entity(&bystander).await?;

        let exported = self
            .export_to_file(tenant, &dir.join("isolation_export.json"))
            .await
            .map_err(|e| CheckError::assertion(format!("Isolation export failed: {e}")))?;
        ensure(
            exported.entities.iter().all(|e| e.tenant == *tenant)
                && exported.relations.iter().all(|r| r.tenant == *tenant),
            || "Other client data found in export".to_string(),
        )?;

        let remaining = self.store.count_entities(other, &EntityFilter::All).await?;
        ensure(remaining > 0, || "Other client data was affected by migration".to_string())?;
        Ok(CheckOutcome::passed(MigrationDetails {
            source_tenant: Some(tenant.to_string()),
            entities_exported: exported.entities.len() as u64,
            relations_exported: exported.relations.len() as u64,
            ..MigrationDetails::default()
        }))
    }

    /// Mark every memory as migrated, then restore the pre-migration snapshot.
    pub async fn check_migration_rollback(&self, tenant: &TenantRef, dir: &Path) -> CheckResult {
        let backup_file = dir.join("rollback_backup.json");
        let before = self
            .export_to_file(tenant, &backup_file)
            .await
            .map_err(|e| CheckError::assertion(format!("Pre-migration backup failed: {e}")))?;
        let live_before = self.store.count_entities(tenant, &EntityFilter::All).await?;

        let memories = self
            .store
            .query_entities(tenant, &EntityQuery::new(EntityFilter::EntityType(MEMORY_TYPE.into())))
            .await?;
        for memory in &memories {
            let patch = EntityPatch {
                name: Some(format!("{}{MIGRATED_MARKER}", memory.name)),
                ..EntityPatch::default()
            };
            self.store.update_entity(tenant, memory.id, &patch).await?;
        }
        let marked = EntityFilter::NamePattern(format!("%{}%", MIGRATED_MARKER.trim()));
        let migrated = self.store.count_entities(tenant, &marked).await?;
        ensure(migrated == MEMORIES as u64, || "Migration changes not applied".to_string())?;

        let backup = Self::read_snapshot(&backup_file).await?;
        self.rollback(tenant, &backup)
            .await
            .map_err(|e| CheckError::assertion(format!("Migration rollback failed: {e}")))?;

        let remaining = self.store.count_entities(tenant, &marked).await?;
        ensure(remaining == 0, || "Rollback did not restore original data".to_string())?;
        let live_after = self.store.count_entities(tenant, &EntityFilter::All).await?;
        ensure(live_after == live_before, || {
            format!("Rollback changed row count: {live_before} -> {live_after}")
        })?;

        info!(tenant = %tenant, rows = live_after, "Migration rollback completed");
        Ok(CheckOutcome::passed(MigrationDetails {
            source_tenant: Some(tenant.to_string()),
            entities_exported: before.entities.len() as u64,
            relations_exported: before.relations.len() as u64,
            entities_imported: live_after,
            ..MigrationDetails::default()
        }))
    }

    async fn rollback(&self, tenant: &TenantRef, backup: &GraphSnapshot) -> Result<(), CheckError> {
        purge_tenant(self.store.as_ref(), tenant, self.cleanup_batch_size).await?;
        self.store.import_snapshot(backup).await?;
        Ok(())
    }

    /// An import that breaks halfway leaves nothing behind and can be retried.
    pub async fn check_partial_migration_recovery(&self, tenant: &TenantRef) -> CheckResult {
        let target = TenantRef::fresh("partial_migration");
        let outcome = self.partial_migration_recovery(tenant, &target).await;
        self.teardown(&target).await;
        outcome
    }

    async fn partial_migration_recovery(&self, tenant: &TenantRef, target: &TenantRef) -> CheckResult {
        let exported = self.store.export_tenant(tenant).await?;
        let mut partial = exported.retarget(target);
        partial.entities.truncate(PARTIAL_ENTITIES);
        partial.relations.clear();

        // A source row keeps its id, so the import trips the primary key.
        let mut broken = partial.clone();
        if let Some(existing) = exported.entities.first() {
            broken.entities.push(EntityRecord {
                tenant: target.clone(),
                ..existing.clone()
            });
        }

        let first_attempt = self.store.import_snapshot(&broken).await;
        let left_behind = self.store.count_entities(target, &EntityFilter::All).await?;
        let outcome = match first_attempt {
            Err(err) => {
                info!(error = %err, "Partial migration failed as expected");
                ensure(left_behind == 0, || {
                    format!("Failed import left {left_behind} partial rows behind")
                })?;
                self.store.import_snapshot(&partial).await.map_err(|e| {
                    CheckError::assertion(format!("Retried import failed: {e}"))
                })?;
                let recovered = self.store.count_entities(target, &EntityFilter::All).await?;
                ensure(recovered == partial.entities.len() as u64, || {
                    format!(
                        "Retried import wrote {recovered} of {} entities",
                        partial.entities.len()
                    )
                })?;
                CheckOutcome::passed(MigrationDetails {
                    source_tenant: Some(tenant.to_string()),
                    target_tenant: Some(target.to_string()),
                    entities_exported: partial.entities.len() as u64,
                    entities_imported: recovered,
                    ..MigrationDetails::default()
                })
            }
            Ok(summary) => {
                warn!(entities = summary.entities, "Import with a duplicate key was accepted");
                CheckOutcome::warning(
                    "Import with a duplicate key was accepted",
                    MigrationDetails {
                        target_tenant: Some(target.to_string()),
                        entities_imported: left_behind,
                        ..MigrationDetails::default()
                    },
                )
            }
        };
        Ok(outcome)
    }

    /// Export a thousand-row tenant within a minute.
    pub async fn check_large_dataset_migration(&self, dir: &Path) -> CheckResult {
        let tenant = TenantRef::fresh("large_migration");
        let outcome = self.large_dataset_migration(&tenant, dir).await;
        self.teardown(&tenant).await;
        outcome
    }

    async fn large_dataset_migration(&self, tenant: &TenantRef, dir: &Path) -> CheckResult {
        let filler = self.filler();
        for batch_start in (0..LARGE_DATASET_RECORDS).step_by(LARGE_DATASET_BATCH) {
            let batch: Vec<EntityRecord> = (batch_start..batch_start + LARGE_DATASET_BATCH)
                .map(|i| {
                    EntityRecord::new(tenant, format!("Large dataset memory {i}"), MEMORY_TYPE).with_metadata(json!({
                        "memory_content": format!("Large dataset memory content {i}: {filler}"),
                        "index": i,
                        "batch": batch_start / LARGE_DATASET_BATCH,
                        "large_dataset_test": true,
                    }))
                })
                .collect();
            self.store.insert_entities(&batch).await?;
            debug!(created = batch_start + LARGE_DATASET_BATCH, "Created large dataset records");
        }

        let path = dir.join("large_export.json");
        let start = Instant::now();
        let exported = self
            .export_to_file(tenant, &path)
            .await
            .map_err(|e| CheckError::assertion(format!("Large dataset export failed: {e}")))?;
        let export_seconds = start.elapsed().as_secs_f64();
        ensure(export_seconds < LARGE_EXPORT_MAX_SECONDS, || {
            format!("Export took too long: {export_seconds:.2}s")
        })?;

        let file_size = tokio::fs::metadata(&path).await?.len();
        ensure(file_size > LARGE_EXPORT_MIN_BYTES, || {
            format!("Export file too small: {file_size} bytes")
        })?;
        ensure(exported.entities.len() == LARGE_DATASET_RECORDS, || {
            format!(
                "Expected {LARGE_DATASET_RECORDS} records, found {}",
                exported.entities.len()
            )
        })?;

        info!(
            records = LARGE_DATASET_RECORDS,
            seconds = export_seconds,
            bytes = file_size,
            "Large dataset migration completed"
        );
        Ok(CheckOutcome::passed(MigrationDetails {
            source_tenant: Some(tenant.to_string()),
            entities_exported: exported.entities.len() as u64,
            ..MigrationDetails::default()
        }))
    }

    /// Remove the fixture tenant and the scratch directory.
    pub async fn cleanup(&self, tenant: &TenantRef, workspace: Option<TempDir>) -> CheckResult {
        let removed = purge_tenant(self.store.as_ref(), tenant, self.cleanup_batch_size).await?;
        if let Some(dir) = workspace {
            dir.close()?;
        }
        info!(tenant = %tenant, removed, "Cleaned up migration fixtures");
        Ok(CheckOutcome::pass())
    }
}

#[async_trait]
impl Validator for MigrationValidator {
    fn name(&self) -> &str {
        "MigrationValidator"
    }

    async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
        let mut base = BaseValidator::new(self.name());
        let tenant = TenantRef::fresh("migration_test");
        let mut workspace = workspace::create(&self.scratch_root, "memory_migration_test_");

        base.run_test("setup_migration_test_environment", || {
            self.setup(&tenant, workspace.as_ref().map(TempDir::path))
        })
        .await;
        base.run_test(
            "test_development_to_production_migration",
            with_workspace!(&workspace, |dir| self.check_dev_to_prod(&tenant, dir)),
        )
        .await;
        base.run_test(
            "test_relationship_preservation",
            with_workspace!(&workspace, |dir| self.check_relationship_preservation(&tenant, dir)),
        )
        .await;
        base.run_test("test_schema_version_migration", || {
            self.check_schema_version_migration(&tenant)
        })
        .await;
        base.run_test(
            "test_client_isolation_during_migration",
            with_workspace!(&workspace, |dir| self.check_client_isolation(&tenant, dir)),
        )
        .await;
        base.run_test(
            "test_migration_rollback",
            with_workspace!(&workspace, |dir| self.check_migration_rollback(&tenant, dir)),
        )
        .await;
        base.run_test("test_partial_migration_recovery", || {
            self.check_partial_migration_recovery(&tenant)
        })
        .await;
        base.run_test(
            "test_large_dataset_migration",
            with_workspace!(&workspace, |dir| self.check_large_dataset_migration(dir)),
        )
        .await;
        base.run_test("cleanup_migration_test_environment", || {
            self.cleanup(&tenant, workspace.take())
        })
        .await;

        Ok(base.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_validation_core::model::Status;
    use memory_validation_core::store::InMemoryStore;

    fn validator(store: Arc<InMemoryStore>, root: &Path) -> MigrationValidator {
        let mut config = ValidationConfig::default();
        config.backup.backup_dir = Some(root.to_path_buf());
        MigrationValidator::new(store, &config)
    }

    #[tokio::test]
    async fn test_every_step_passes_and_leaves_nothing_behind() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::builder().enforce_foreign_keys(true).build());
        let results = validator(store.clone(), root.path()).run_validation().await.unwrap();

        let names: Vec<_> = results.iter().map(|r| r.test_name()).collect();
        assert_eq!(
            names,
            vec![
                "setup_migration_test_environment",
                "test_development_to_production_migration",
                "test_relationship_preservation",
                "test_schema_version_migration",
                "test_client_isolation_during_migration",
                "test_migration_rollback",
                "test_partial_migration_recovery",
                "test_large_dataset_migration",
                "cleanup_migration_test_environment",
            ]
        );
        for result in &results {
            assert_eq!(result.status(), Status::Passed, "{}: {:?}", result.test_name(), result.message());
        }
        assert!(store.tenants().is_empty());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        assert_eq!(store.schema_version().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_relationship_census_survives_retarget() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let v = validator(store.clone(), root.path());
        let tenant = TenantRef::fresh("migration_test");
        v.setup(&tenant, Some(root.path())).await.unwrap();

        let outcome = v.check_relationship_preservation(&tenant, root.path()).await.unwrap();
        let CheckOutcome::Passed(memory_validation_core::Details::Migration(details)) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        let original = details.original_relationships.unwrap();
        assert_eq!(original.relations, 70);
        assert_eq!(original.relationship_types, 3);
        assert_eq!(original.dangling_relations, 0);
        assert_eq!(details.migrated_relationships, Some(original));
        assert_eq!(store.tenants(), vec![tenant]);
    }

    #[tokio::test]
    async fn test_schema_change_is_reverted_even_on_failure() {
        let store = Arc::new(InMemoryStore::new());
        let v = validator(store.clone(), Path::new("."));
        let tenant = TenantRef::fresh("migration_test");

        let blocking = SchemaChange {
            from_version: "0.9.0".into(),
            to_version: "2.0.0".into(),
            column: "other_column".into(),
            description: "unrelated".into(),
        };
        store.apply_schema_change(&blocking).await.unwrap();

        let result = v.check_schema_version_migration(&tenant).await;
        assert!(matches!(result, Err(CheckError::Store(_))));
        assert_eq!(store.schema_version().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_partial_import_rolls_back_then_retries() {
        let store = Arc::new(InMemoryStore::new());
        let v = validator(store.clone(), Path::new("."));
        let tenant = TenantRef::fresh("migration_test");
        v.setup(&tenant, Some(Path::new("."))).await.unwrap();

        let outcome = v.check_partial_migration_recovery(&tenant).await.unwrap();
        let CheckOutcome::Passed(memory_validation_core::Details::Migration(details)) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(details.entities_imported, PARTIAL_ENTITIES as u64);
        assert_eq!(store.tenants(), vec![tenant]);
    }
}
