// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-process [`MemoryStore`] used by tests and dry runs.

use super::{
    ConstraintViolation, EntityFilter, EntityOrder, EntityPatch, EntityQuery, EntityRecord,
    GraphSnapshot, ImportSummary, InsertOutcome, MaintenanceOp, MemoryStore, RelationPatch,
    RelationRecord, SchemaChange, StoreResult, TenantRef, WriteStep, ENTITIES_TABLE,
    RELATIONS_TABLE,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

const SCHEMA_VERSIONS_TABLE: &str = "schema_versions";

const ENTITY_COLUMNS: [&str; 10] = [
    "id",
    "actor_type",
    "actor_id",
    "name",
    "entity_type",
    "grade",
    "metadata",
    "created_at",
    "updated_at",
    "deleted_at",
];

const RELATION_COLUMNS: [&str; 10] = [
    "id",
    "actor_type",
    "actor_id",
    "source_id",
    "target_id",
    "relationship_type",
    "metadata",
    "created_at",
    "updated_at",
    "deleted_at",
];

#[derive(Debug, Clone)]
struct EntityRow {
    record: EntityRecord,
    columns: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct SchemaState {
    version: Option<String>,
    columns: Vec<String>,
}

/// Builder for [`InMemoryStore`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryStoreBuilder {
    enforce_foreign_keys: bool,
    cascade_deletes: bool,
    autocommit: bool,
    latency: Option<Duration>,
}

impl InMemoryStoreBuilder {
    /// Reject relations whose endpoints do not exist.
    pub fn enforce_foreign_keys(mut self, enabled: bool) -> Self {
        self.enforce_foreign_keys = enabled;
        self
    }

    /// Remove relations together with a hard-deleted endpoint.
    pub fn cascade_deletes(mut self, enabled: bool) -> Self {
        self.cascade_deletes = enabled;
        self
    }

    /// Commit write sequences step by step like a store without
    /// transactions. Abort steps are skipped and earlier rows stay.
    pub fn autocommit(mut self, enabled: bool) -> Self {
        self.autocommit = enabled;
        self
    }

    /// Sleep this long in every operation.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Build the store.
    pub fn build(self) -> InMemoryStore {
        InMemoryStore {
            entities: DashMap::new(),
            relations: DashMap::new(),
            schema: Mutex::new(SchemaState::default()),
            write_lock: Mutex::new(()),
            enforce_foreign_keys: self.enforce_foreign_keys,
            cascade_deletes: self.cascade_deletes,
            autocommit: self.autocommit,
            latency: self.latency,
        }
    }
}

/// Thread-safe store backed by concurrent maps.
///
/// Multi-row writes take an internal lock so they are all-or-nothing with
/// respect to each other. By default relations may dangle and deletes do
/// not cascade, matching the permissive production schema.
#[derive(Debug)]
pub struct InMemoryStore {
    entities: DashMap<Uuid, EntityRow>,
    relations: DashMap<Uuid, RelationRecord>,
    schema: Mutex<SchemaState>,
    write_lock: Mutex<()>,
    enforce_foreign_keys: bool,
    cascade_deletes: bool,
    autocommit: bool,
    latency: Option<Duration>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Permissive store with no latency.
    pub fn new() -> Self {
        InMemoryStoreBuilder::default().build()
    }

    /// Builder.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Entity rows across all tenants, including soft-deleted ones.
    pub fn entity_rows(&self) -> usize {
        self.entities.len()
    }

    /// Relation rows across all tenants, including soft-deleted ones.
    pub fn relation_rows(&self) -> usize {
        self.relations.len()
    }

    /// Every tenant that owns at least one row.
    pub fn tenants(&self) -> Vec<TenantRef> {
        let mut seen = HashSet::new();
        for row in self.entities.iter() {
            seen.insert(row.record.tenant.clone());
        }
        for rel in self.relations.iter() {
            seen.insert(rel.tenant.clone());
        }
        seen.into_iter().collect()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn lock_writes(&self) -> StoreResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Query("write lock poisoned".to_string()))
    }

    fn schema(&self) -> StoreResult<std::sync::MutexGuard<'_, SchemaState>> {
        self.schema
            .lock()
            .map_err(|_| StoreError::Query("schema lock poisoned".to_string()))
    }

    fn entity_exists(&self, id: &Uuid) -> bool {
        self.entities.contains_key(id)
    }

    fn matching(&self, tenant: &TenantRef, filter: &EntityFilter) -> StoreResult<Vec<EntityRecord>> {
        let pattern = match filter {
            EntityFilter::NamePattern(p) => Some(like_to_regex(p)?),
            _ => None,
        };

        Ok(self
            .entities
            .iter()
            .filter(|row| row.record.tenant == *tenant && !row.record.is_deleted())
            .filter(|row| {
                let e = &row.record;
                match filter {
                    EntityFilter::All => true,
                    EntityFilter::Id(id) => e.id == *id,
                    EntityFilter::NamePattern(_) => {
                        pattern.as_ref().is_some_and(|re| re.is_match(&e.name))
                    }
                    EntityFilter::EntityType(t) => e.entity_type == *t,
                    EntityFilter::MetadataKey(k) => e.metadata.get(k).is_some(),
                    EntityFilter::MetadataEquals { path, value } => {
                        metadata_text(&e.metadata, path).as_deref() == Some(value.as_str())
                    }
                }
            })
            .map(|row| row.record.clone())
            .collect())
    }

    fn relation_violation(&self, relation: &RelationRecord, staged: &HashSet<Uuid>) -> Option<ConstraintViolation> {
        if !self.enforce_foreign_keys {
            return None;
        }
        for endpoint in [relation.source_id, relation.target_id] {
            if !self.entity_exists(&endpoint) && !staged.contains(&endpoint) {
                return Some(ConstraintViolation::ForeignKey(format!(
                    "entity {endpoint} referenced by relation {} does not exist",
                    relation.id
                )));
            }
        }
        None
    }
}

/// Translate a SQL `LIKE` pattern into an anchored regex.
fn like_to_regex(pattern: &str) -> StoreResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| StoreError::Query(format!("invalid LIKE pattern: {e}")))
}

/// Text value at `path`, the way `metadata #>> path` renders it.
fn metadata_text(metadata: &serde_json::Value, path: &[String]) -> Option<String> {
    let mut node = metadata;
    for key in path {
        node = match node {
            serde_json::Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            other => other.get(key)?,
        };
    }
    match node {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// A timestamp strictly after `previous`, normally now.
fn bumped(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.pause().await;
        Ok(())
    }

    async fn check_tables(&self, tables: &[&str]) -> StoreResult<Vec<String>> {
        self.pause().await;
        let versioned = self.schema()?.version.is_some();
        tables
            .iter()
            .map(|table| match *table {
                ENTITIES_TABLE | RELATIONS_TABLE => Ok(table.to_string()),
                SCHEMA_VERSIONS_TABLE if versioned => Ok(table.to_string()),
                other => Err(StoreError::Query(format!("relation \"{other}\" does not exist"))),
            })
            .collect()
    }

    async fn table_columns(&self, table: &str) -> StoreResult<Vec<String>> {
        self.pause().await;
        match table {
            ENTITIES_TABLE => {
                let mut columns: Vec<String> = ENTITY_COLUMNS.iter().map(|c| c.to_string()).collect();
                columns.extend(self.schema()?.columns.iter().cloned());
                Ok(columns)
            }
            RELATIONS_TABLE => Ok(RELATION_COLUMNS.iter().map(|c| c.to_string()).collect()),
            other => Err(StoreError::Query(format!("relation \"{other}\" does not exist"))),
        }
    }

    async fn insert_entity(&self, entity: &EntityRecord) -> StoreResult<InsertOutcome> {
        self.pause().await;
        let _guard = self.lock_writes()?;
        match self.entities.entry(entity.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(InsertOutcome::Violation(
                ConstraintViolation::DuplicateKey(format!("memory_entities_pkey ({})", entity.id)),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(EntityRow {
                    record: entity.clone(),
                    columns: HashMap::new(),
                });
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn insert_entities(&self, entities: &[EntityRecord]) -> StoreResult<u64> {
        self.pause().await;
        let _guard = self.lock_writes()?;
        let mut staged = HashSet::with_capacity(entities.len());
        for entity in entities {
            if self.entity_exists(&entity.id) || !staged.insert(entity.id) {
                return Err(StoreError::Query(
                    ConstraintViolation::DuplicateKey(format!("memory_entities_pkey ({})", entity.id))
                        .to_string(),
                ));
            }
        }
        for entity in entities {
            self.entities.insert(
                entity.id,
                EntityRow {
                    record: entity.clone(),
                    columns: HashMap::new(),
                },
            );
        }
        Ok(entities.len() as u64)
    }

    async fn get_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<Option<EntityRecord>> {
        self.pause().await;
        Ok(self
            .entities
            .get(&id)
            .filter(|row| row.record.tenant == *tenant)
            .map(|row| row.record.clone()))
    }

    async fn update_entity(
        &self,
        tenant: &TenantRef,
        id: Uuid,
        patch: &EntityPatch,
    ) -> StoreResult<Option<EntityRecord>> {
        self.pause().await;
        let Some(mut row) = self.entities.get_mut(&id) else {
            return Ok(None);
        };
        if row.record.tenant != *tenant {
            return Ok(None);
        }
        let e = &mut row.record;
        if let Some(name) = &patch.name {
            e.name = name.clone();
        }
        if let Some(entity_type) = &patch.entity_type {
            e.entity_type = entity_type.clone();
        }
        if let Some(metadata) = &patch.metadata {
            e.metadata = metadata.clone();
        }
        if let Some(grade) = patch.grade {
            e.grade = grade;
        }
        e.updated_at = bumped(e.updated_at);
        Ok(Some(e.clone()))
    }

    async fn soft_delete_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool> {
        self.pause().await;
        match self.entities.get_mut(&id) {
            Some(mut row) if row.record.tenant == *tenant && !row.record.is_deleted() => {
                let at = bumped(row.record.updated_at);
                row.record.deleted_at = Some(at);
                row.record.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool> {
        self.pause().await;
        let removed = self
            .entities
            .remove_if(&id, |_, row| row.record.tenant == *tenant)
            .is_some();
        if removed && self.cascade_deletes {
            self.relations
                .retain(|_, r| r.source_id != id && r.target_id != id);
        }
        Ok(removed)
    }

    async fn query_entities(
        &self,
        tenant: &TenantRef,
        query: &EntityQuery,
    ) -> StoreResult<Vec<EntityRecord>> {
        self.pause().await;
        let mut rows = self.matching(tenant, &query.filter)?;
        match query.order {
            EntityOrder::Unordered => {}
            EntityOrder::CreatedDesc => rows.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            EntityOrder::NameAsc => rows.sort_by(|a, b| a.name.cmp(&b.name)),
        }
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_entities(&self, tenant: &TenantRef, filter: &EntityFilter) -> StoreResult<u64> {
        self.pause().await;
        Ok(self.matching(tenant, filter)?.len() as u64)
    }

    async fn insert_relation(&self, relation: &RelationRecord) -> StoreResult<InsertOutcome> {
        self.pause().await;
        let _guard = self.lock_writes()?;
        if self.relations.contains_key(&relation.id) {
            return Ok(InsertOutcome::Violation(ConstraintViolation::DuplicateKey(
                format!("memory_relations_pkey ({})", relation.id),
            )));
        }
        if let Some(violation) = self.relation_violation(relation, &HashSet::new()) {
            return Ok(InsertOutcome::Violation(violation));
        }
        self.relations.insert(relation.id, relation.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_relation(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<Option<RelationRecord>> {
        self.pause().await;
        Ok(self
            .relations
            .get(&id)
            .filter(|r| r.tenant == *tenant)
            .map(|r| r.clone()))
    }

    async fn update_relation(
        &self,
        tenant: &TenantRef,
        id: Uuid,
        patch: &RelationPatch,
    ) -> StoreResult<Option<RelationRecord>> {
        self.pause().await;
        let Some(mut rel) = self.relations.get_mut(&id) else {
            return Ok(None);
        };
        if rel.tenant != *tenant {
            return Ok(None);
        }
        if let Some(kind) = &patch.relationship_type {
            rel.relationship_type = kind.clone();
        }
        if let Some(metadata) = &patch.metadata {
            rel.metadata = metadata.clone();
        }
        rel.updated_at = bumped(rel.updated_at);
        Ok(Some(rel.clone()))
    }

    async fn soft_delete_relation(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool> {
        self.pause().await;
        match self.relations.get_mut(&id) {
            Some(mut rel) if rel.tenant == *tenant && rel.deleted_at.is_none() => {
                let at = bumped(rel.updated_at);
                rel.deleted_at = Some(at);
                rel.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_relations(&self, tenant: &TenantRef) -> StoreResult<Vec<RelationRecord>> {
        self.pause().await;
        Ok(self
            .relations
            .iter()
            .filter(|r| r.tenant == *tenant && r.deleted_at.is_none())
            .map(|r| r.clone())
            .collect())
    }

    async fn count_orphaned_relations(&self, tenant: &TenantRef) -> StoreResult<u64> {
        self.pause().await;
        Ok(self
            .relations
            .iter()
            .filter(|r| r.tenant == *tenant)
            .filter(|r| !self.entity_exists(&r.source_id) || !self.entity_exists(&r.target_id))
            .count() as u64)
    }

    async fn delete_tenant_batch(&self, tenant: &TenantRef, limit: u64) -> StoreResult<u64> {
        self.pause().await;
        let _guard = self.lock_writes()?;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);

        let relation_ids: Vec<Uuid> = self
            .relations
            .iter()
            .filter(|r| r.tenant == *tenant)
            .map(|r| r.id)
            .take(limit)
            .collect();
        let remaining = limit - relation_ids.len();
        let entity_ids: Vec<Uuid> = self
            .entities
            .iter()
            .filter(|row| row.record.tenant == *tenant)
            .map(|row| row.record.id)
            .take(remaining)
            .collect();

        for id in &relation_ids {
            self.relations.remove(id);
        }
        for id in &entity_ids {
            self.entities.remove(id);
        }
        Ok((relation_ids.len() + entity_ids.len()) as u64)
    }

    async fn purge_stale_entities(
        &self,
        tenant: &TenantRef,
        entity_type: &str,
        grade_below: f64,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.pause().await;
        let _guard = self.lock_writes()?;
        let before = self.entities.len();
        self.entities.retain(|_, row| {
            let e = &row.record;
            !(e.tenant == *tenant
                && e.entity_type == entity_type
                && e.grade < grade_below
                && e.updated_at < updated_before)
        });
        Ok((before - self.entities.len()) as u64)
    }

    async fn decay_grades(
        &self,
        tenant: &TenantRef,
        factor: f64,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.pause().await;
        let mut touched = 0;
        for mut row in self.entities.iter_mut() {
            let e = &mut row.record;
            if e.tenant == *tenant && e.updated_at < updated_before {
                e.grade *= factor;
                e.updated_at = bumped(e.updated_at);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn atomic_write(&self, steps: &[WriteStep]) -> StoreResult<u64> {
        self.pause().await;
        let _guard = self.lock_writes()?;
        let mut staged: Vec<&EntityRecord> = Vec::new();
        let mut staged_ids = HashSet::new();

        for (index, step) in steps.iter().enumerate() {
            match step {
                WriteStep::Insert(entity) => {
                    if self.entity_exists(&entity.id) || !staged_ids.insert(entity.id) {
                        return Err(StoreError::Aborted {
                            step: index + 1,
                            reason: ConstraintViolation::DuplicateKey(entity.id.to_string())
                                .to_string(),
                        });
                    }
                    staged.push(entity);
                }
                WriteStep::Abort(_) if self.autocommit => {}
                WriteStep::Abort(reason) => {
                    return Err(StoreError::Aborted {
                        step: index + 1,
                        reason: reason.clone(),
                    });
                }
            }
        }

        for entity in &staged {
            self.entities.insert(
                entity.id,
                EntityRow {
                    record: (*entity).clone(),
                    columns: HashMap::new(),
                },
            );
        }
        Ok(staged.len() as u64)
    }

    async fn schema_version(&self) -> StoreResult<Option<String>> {
        self.pause().await;
        Ok(self.schema()?.version.clone())
    }

    async fn apply_schema_change(&self, change: &SchemaChange) -> StoreResult<()> {
        self.pause().await;
        let mut schema = self.schema()?;
        if let Some(current) = &schema.version {
            if *current != change.from_version {
                return Err(StoreError::Query(format!(
                    "schema is at {current}, change expects {}",
                    change.from_version
                )));
            }
        }
        if !schema.columns.contains(&change.column) {
            schema.columns.push(change.column.clone());
        }
        schema.version = Some(change.to_version.clone());
        Ok(())
    }

    async fn revert_schema_change(&self, change: &SchemaChange) -> StoreResult<()> {
        self.pause().await;
        {
            let mut schema = self.schema()?;
            schema.columns.retain(|c| *c != change.column);
            schema.version = None;
        }
        for mut row in self.entities.iter_mut() {
            row.columns.remove(&change.column);
        }
        Ok(())
    }

    async fn backfill_column(&self, tenant: &TenantRef, column: &str, value: &str) -> StoreResult<u64> {
        self.pause().await;
        if !self.schema()?.columns.iter().any(|c| c == column) {
            return Err(StoreError::Query(format!("column \"{column}\" does not exist")));
        }
        let mut touched = 0;
        for mut row in self.entities.iter_mut() {
            if row.record.tenant == *tenant && !row.record.is_deleted() {
                row.columns.insert(column.to_string(), value.to_string());
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn count_backfilled(&self, tenant: &TenantRef, column: &str, value: &str) -> StoreResult<u64> {
        self.pause().await;
        if !self.schema()?.columns.iter().any(|c| c == column) {
            return Err(StoreError::Query(format!("column \"{column}\" does not exist")));
        }
        Ok(self
            .entities
            .iter()
            .filter(|row| row.record.tenant == *tenant)
            .filter(|row| row.columns.get(column).map(String::as_str) == Some(value))
            .count() as u64)
    }

    async fn maintenance_probe(&self, op: MaintenanceOp) -> StoreResult<u64> {
        self.pause().await;
        Ok(match op {
            MaintenanceOp::VacuumStatistics => 2,
            MaintenanceOp::AnalyzeStatistics => (self.entities.len() + self.relations.len()) as u64,
            MaintenanceOp::IndexStatistics => 2,
        })
    }

    async fn export_tenant(&self, tenant: &TenantRef) -> StoreResult<GraphSnapshot> {
        self.pause().await;
        let mut entities: Vec<EntityRecord> = self
            .entities
            .iter()
            .filter(|row| row.record.tenant == *tenant)
            .map(|row| row.record.clone())
            .collect();
        entities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let mut relations: Vec<RelationRecord> = self
            .relations
            .iter()
            .filter(|r| r.tenant == *tenant)
            .map(|r| r.clone())
            .collect();
        relations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        Ok(GraphSnapshot {
            tenant: tenant.clone(),
            exported_at: Utc::now(),
            entities,
            relations,
        })
    }

    async fn import_snapshot(&self, snapshot: &GraphSnapshot) -> StoreResult<ImportSummary> {
        self.pause().await;
        let _guard = self.lock_writes()?;

        let mut staged = HashSet::with_capacity(snapshot.entities.len());
        for entity in &snapshot.entities {
            if self.entity_exists(&entity.id) || !staged.insert(entity.id) {
                return Err(StoreError::Query(
                    ConstraintViolation::DuplicateKey(format!("memory_entities_pkey ({})", entity.id))
                        .to_string(),
                ));
            }
        }
        let mut staged_relations = HashSet::with_capacity(snapshot.relations.len());
        for relation in &snapshot.relations {
            if self.relations.contains_key(&relation.id) || !staged_relations.insert(relation.id) {
                return Err(StoreError::Query(
                    ConstraintViolation::DuplicateKey(format!("memory_relations_pkey ({})", relation.id))
                        .to_string(),
                ));
            }
            if let Some(violation) = self.relation_violation(relation, &staged) {
                return Err(StoreError::Query(violation.to_string()));
            }
        }

        for entity in &snapshot.entities {
            self.entities.insert(
                entity.id,
                EntityRow {
                    record: entity.clone(),
                    columns: HashMap::new(),
                },
            );
        }
        for relation in &snapshot.relations {
            self.relations.insert(relation.id, relation.clone());
        }

        Ok(ImportSummary {
            entities: snapshot.entities.len() as u64,
            relations: snapshot.relations.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{purge_tenant, REQUIRED_TABLES};
    use serde_json::json;

    fn person(tenant: &TenantRef, name: &str) -> EntityRecord {
        EntityRecord::new(tenant, name, "person")
    }

    #[tokio::test]
    async fn test_duplicate_id_is_a_violation() {
        let store = InMemoryStore::new();
        let tenant = TenantRef::fresh("dup");
        let entity = person(&tenant, "Alice");

        assert!(store.insert_entity(&entity).await.unwrap().is_inserted());
        let again = store.insert_entity(&entity).await.unwrap();
        assert!(matches!(
            again,
            InsertOutcome::Violation(ConstraintViolation::DuplicateKey(_))
        ));
        assert_eq!(store.count_entities(&tenant, &EntityFilter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let store = InMemoryStore::new();
        let a = TenantRef::fresh("a");
        let b = TenantRef::fresh("b");
        let entity = person(&a, "Alice");
        store.insert_entity(&entity).await.unwrap();

        assert!(store.get_entity(&b, entity.id).await.unwrap().is_none());
        assert_eq!(store.count_entities(&b, &EntityFilter::All).await.unwrap(), 0);
        assert!(!store.delete_entity(&b, entity.id).await.unwrap());
        assert!(store.update_entity(&b, entity.id, &EntityPatch::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_filters() {
        let store = InMemoryStore::new();
        let tenant = TenantRef::fresh("filters");
        let alice = person(&tenant, "Alice Smith")
            .with_metadata(json!({"personal_info": {"age": 30}, "skills": ["rust"]}));
        let bob = EntityRecord::new(&tenant, "Bob Jones", "company").with_metadata(json!({}));
        store.insert_entities(&[alice.clone(), bob.clone()]).await.unwrap();

        let count = |f: EntityFilter| {
            let store = &store;
            let tenant = &tenant;
            async move { store.count_entities(tenant, &f).await.unwrap() }
        };
        assert_eq!(count(EntityFilter::NamePattern("Alice%".into())).await, 1);
        assert_eq!(count(EntityFilter::NamePattern("%o_ %".into())).await, 1);
        assert_eq!(count(EntityFilter::EntityType("company".into())).await, 1);
        assert_eq!(count(EntityFilter::MetadataKey("skills".into())).await, 1);
        assert_eq!(
            count(EntityFilter::MetadataEquals {
                path: vec!["personal_info".into(), "age".into()],
                value: "30".into(),
            })
            .await,
            1
        );
        assert_eq!(count(EntityFilter::Id(bob.id)).await, 1);
    }

    #[tokio::test]
    async fn test_update_bumps_timestamp_and_soft_delete_hides_row() {
        let store = InMemoryStore::new();
        let tenant = TenantRef::fresh("crud");
        let entity = person(&tenant, "Carol");
        store.insert_entity(&entity).await.unwrap();

        let patch = EntityPatch {
            name: Some("Carol Updated".into()),
            ..EntityPatch::default()
        };
        let updated = store.update_entity(&tenant, entity.id, &patch).await.unwrap().unwrap();
        assert_eq!(updated.name, "Carol Updated");
        assert!(updated.updated_at > entity.updated_at);
        assert_eq!(updated.created_at, entity.created_at);

        assert!(store.soft_delete_entity(&tenant, entity.id).await.unwrap());
        assert!(!store.soft_delete_entity(&tenant, entity.id).await.unwrap());
        let fetched = store.get_entity(&tenant, entity.id).await.unwrap().unwrap();
        assert!(fetched.is_deleted());
        assert_eq!(store.count_entities(&tenant, &EntityFilter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_atomic_write_rolls_back() {
        let store = InMemoryStore::new();
        let tenant = TenantRef::fresh("rollback");
        let steps = vec![
            WriteStep::Insert(person(&tenant, "one")),
            WriteStep::Insert(person(&tenant, "two")),
            WriteStep::Abort("forced failure".into()),
            WriteStep::Insert(person(&tenant, "four")),
            WriteStep::Insert(person(&tenant, "five")),
        ];

        let err = store.atomic_write(&steps).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Aborted {
                step: 3,
                reason: "forced failure".into()
            }
        );
        assert_eq!(store.count_entities(&tenant, &EntityFilter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_autocommit_keeps_rows_past_an_abort() {
        let store = InMemoryStore::builder().autocommit(true).build();
        let tenant = TenantRef::fresh("autocommit");
        let steps = vec![
            WriteStep::Insert(person(&tenant, "one")),
            WriteStep::Abort("forced failure".into()),
            WriteStep::Insert(person(&tenant, "three")),
        ];

        assert_eq!(store.atomic_write(&steps).await.unwrap(), 2);
        assert_eq!(store.count_entities(&tenant, &EntityFilter::All).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dangling_relations_and_cascade() {
        let permissive = InMemoryStore::new();
        let tenant = TenantRef::fresh("rel");
        let a = person(&tenant, "A");
        permissive.insert_entity(&a).await.unwrap();
        let dangling = RelationRecord::new(&tenant, a.id, Uuid::new_v4(), "knows");
        assert!(permissive.insert_relation(&dangling).await.unwrap().is_inserted());
        assert_eq!(permissive.count_orphaned_relations(&tenant).await.unwrap(), 1);

        let strict = InMemoryStore::builder()
            .enforce_foreign_keys(true)
            .cascade_deletes(true)
            .build();
        strict.insert_entity(&a).await.unwrap();
        let outcome = strict.insert_relation(&dangling).await.unwrap();
        assert!(matches!(
            outcome,
            InsertOutcome::Violation(ConstraintViolation::ForeignKey(_))
        ));

        let b = person(&tenant, "B");
        strict.insert_entity(&b).await.unwrap();
        strict
            .insert_relation(&RelationRecord::new(&tenant, a.id, b.id, "knows"))
            .await
            .unwrap();
        strict.delete_entity(&tenant, b.id).await.unwrap();
        assert_eq!(strict.count_orphaned_relations(&tenant).await.unwrap(), 0);
        assert!(strict.list_relations(&tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_and_decay() {
        let store = InMemoryStore::new();
        let tenant = TenantRef::fresh("cleanup");
        let old = Utc::now() - chrono::Duration::days(31);
        let recent = Utc::now() - chrono::Duration::days(1);
        let mut rows = Vec::new();
        for i in 0..4 {
            rows.push(
                EntityRecord::new(&tenant, format!("Generic {i}"), "generic")
                    .with_grade(0.05)
                    .aged_to(old),
            );
        }
        rows.push(
            EntityRecord::new(&tenant, "Fresh", "generic")
                .with_grade(0.05)
                .aged_to(recent),
        );
        rows.push(
            EntityRecord::new(&tenant, "Graded", "generic")
                .with_grade(0.8)
                .aged_to(old),
        );
        rows.push(person(&tenant, "Keep").with_grade(0.8).aged_to(recent));
        rows.push(person(&tenant, "Current").with_grade(0.6));
        store.insert_entities(&rows).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        let removed = store
            .purge_stale_entities(&tenant, "generic", 0.1, cutoff)
            .await
            .unwrap();
        assert_eq!(removed, 4);

        let decayed = store
            .decay_grades(&tenant, 0.9, Utc::now() - chrono::Duration::hours(12))
            .await
            .unwrap();
        assert_eq!(decayed, 3);
        let left: HashMap<String, f64> = store
            .query_entities(&tenant, &EntityQuery::new(EntityFilter::All))
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.grade))
            .collect();
        assert_eq!(left.len(), 4);
        assert!((left["Fresh"] - 0.045).abs() < 1e-9);
        assert!((left["Graded"] - 0.72).abs() < 1e-9);
        assert!((left["Keep"] - 0.72).abs() < 1e-9);
        assert_eq!(left["Current"], 0.6);
    }

    #[tokio::test]
    async fn test_purge_tenant_in_batches_is_idempotent() {
        let store = InMemoryStore::new();
        let tenant = TenantRef::fresh("bulk");
        let rows: Vec<_> = (0..250).map(|i| person(&tenant, &format!("p{i}"))).collect();
        store.insert_entities(&rows).await.unwrap();

        assert_eq!(purge_tenant(&store, &tenant, 100).await.unwrap(), 250);
        assert_eq!(purge_tenant(&store, &tenant, 100).await.unwrap(), 0);
        assert_eq!(store.entity_rows(), 0);
    }

    #[tokio::test]
    async fn test_schema_change_and_backfill() {
        let store = InMemoryStore::new();
        let tenant = TenantRef::fresh("schema");
        store.insert_entity(&person(&tenant, "x")).await.unwrap();
        let change = SchemaChange {
            from_version: "1.0.0".into(),
            to_version: "1.1.0".into(),
            column: "migration_test_column".into(),
            description: "Added migration test column".into(),
        };

        assert!(store.backfill_column(&tenant, &change.column, "v").await.is_err());
        store.apply_schema_change(&change).await.unwrap();
        assert_eq!(store.schema_version().await.unwrap().as_deref(), Some("1.1.0"));
        assert!(store
            .table_columns(ENTITIES_TABLE)
            .await
            .unwrap()
            .contains(&change.column));
        assert_eq!(store.backfill_column(&tenant, &change.column, "v").await.unwrap(), 1);
        assert_eq!(store.count_backfilled(&tenant, &change.column, "v").await.unwrap(), 1);

        store.revert_schema_change(&change).await.unwrap();
        assert!(store.schema_version().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let store = InMemoryStore::new();
        let source = TenantRef::fresh("export");
        let a = person(&source, "A");
        let b = person(&source, "B");
        store.insert_entities(&[a.clone(), b.clone()]).await.unwrap();
        store
            .insert_relation(&RelationRecord::new(&source, a.id, b.id, "knows"))
            .await
            .unwrap();

        let snapshot = store.export_tenant(&source).await.unwrap();
        assert!(store.import_snapshot(&snapshot).await.is_err());

        let target = TenantRef::fresh("import");
        let summary = store.import_snapshot(&snapshot.retarget(&target)).await.unwrap();
        assert_eq!(summary, ImportSummary { entities: 2, relations: 1 });
        assert_eq!(store.list_relations(&target).await.unwrap().len(), 1);
        assert_eq!(store.count_orphaned_relations(&target).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_check_tables() {
        let store = InMemoryStore::new();
        let checked = store.check_tables(&REQUIRED_TABLES).await.unwrap();
        assert_eq!(checked.len(), 2);
        assert!(store.check_tables(&["object_schemas"]).await.is_err());
    }
}
