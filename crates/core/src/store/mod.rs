// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! The persistence collaborator.
//!
//! Checks reach the memory store only through [`MemoryStore`]. Every
//! operation is scoped by a [`TenantRef`], and expected constraint
//! violations come back as [`InsertOutcome::Violation`] rather than as
//! errors.

mod memory;

pub use memory::{InMemoryStore, InMemoryStoreBuilder};

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Entity table name.
pub const ENTITIES_TABLE: &str = "memory_entities";
/// Relation table name.
pub const RELATIONS_TABLE: &str = "memory_relations";
/// Tables every deployment must expose.
pub const REQUIRED_TABLES: [&str; 2] = [ENTITIES_TABLE, RELATIONS_TABLE];

/// Kind of actor owning a memory graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A client organisation.
    Client,
    /// A human user.
    Human,
    /// A synthetic agent.
    Synth,
    /// A class of synthetic agents.
    SynthClass,
}

impl ActorType {
    /// Column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Client => "client",
            ActorType::Human => "human",
            ActorType::Synth => "synth",
            ActorType::SynthClass => "synth_class",
        }
    }

    /// Parse a column value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "client" => Some(ActorType::Client),
            "human" => Some(ActorType::Human),
            "synth" => Some(ActorType::Synth),
            "synth_class" => Some(ActorType::SynthClass),
            _ => None,
        }
    }
}

/// Tenant boundary: every row belongs to exactly one actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantRef {
    /// Kind of actor.
    pub actor_type: ActorType,
    /// Actor identifier.
    pub actor_id: String,
}

impl TenantRef {
    /// Tenant of the given kind.
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
        }
    }

    /// Client tenant.
    pub fn client(actor_id: impl Into<String>) -> Self {
        Self::new(ActorType::Client, actor_id)
    }

    /// Fresh client tenant named `{prefix}_{8 hex chars}`.
    pub fn fresh(prefix: &str) -> Self {
        Self::fresh_of(ActorType::Client, prefix)
    }

    /// Fresh tenant of the given kind named `{prefix}_{8 hex chars}`.
    pub fn fresh_of(actor_type: ActorType, prefix: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self::new(actor_type, format!("{prefix}_{}", &suffix[..8]))
    }
}

impl fmt::Display for TenantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.actor_type.as_str(), self.actor_id)
    }
}

/// A memory entity row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Primary key.
    pub id: Uuid,
    /// Owner.
    pub tenant: TenantRef,
    /// Display name.
    pub name: String,
    /// Entity kind (`person`, `generic`, ...).
    pub entity_type: String,
    /// Structured payload.
    pub metadata: serde_json::Value,
    /// Relevance score in `[0, 1]`.
    pub grade: f64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EntityRecord {
    /// New entity stamped now, graded 1.0, with empty metadata.
    pub fn new(tenant: &TenantRef, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.clone(),
            name: name.into(),
            entity_type: entity_type.into(),
            metadata: serde_json::json!({}),
            grade: 1.0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Replace the metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Replace the grade.
    pub fn with_grade(mut self, grade: f64) -> Self {
        self.grade = grade;
        self
    }

    /// Set both timestamps to `at`.
    pub fn aged_to(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    /// Whether the row is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A relation row between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    /// Primary key.
    pub id: Uuid,
    /// Owner.
    pub tenant: TenantRef,
    /// Source entity.
    pub source_id: Uuid,
    /// Target entity.
    pub target_id: Uuid,
    /// Relation kind.
    pub relationship_type: String,
    /// Structured payload.
    pub metadata: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RelationRecord {
    /// New relation stamped now.
    pub fn new(
        tenant: &TenantRef,
        source_id: Uuid,
        target_id: Uuid,
        relationship_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.clone(),
            source_id,
            target_id,
            relationship_type: relationship_type.into(),
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Replace the metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Constraint the store rejected an insert with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ConstraintViolation {
    /// Primary or unique key already taken.
    DuplicateKey(String),
    /// Referenced row does not exist.
    ForeignKey(String),
    /// Required column missing.
    NotNull(String),
    /// Check constraint failed.
    Check(String),
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintViolation::DuplicateKey(d) => write!(f, "duplicate key: {d}"),
            ConstraintViolation::ForeignKey(d) => write!(f, "foreign key violation: {d}"),
            ConstraintViolation::NotNull(d) => write!(f, "not-null violation: {d}"),
            ConstraintViolation::Check(d) => write!(f, "check violation: {d}"),
        }
    }
}

/// Outcome of a single-row insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row written.
    Inserted,
    /// Row rejected by a constraint; nothing written.
    Violation(ConstraintViolation),
}

impl InsertOutcome {
    /// Whether the row was written.
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

/// Row predicate for entity queries. Soft-deleted rows never match.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityFilter {
    /// Every live row of the tenant.
    All,
    /// Exact primary key.
    Id(Uuid),
    /// SQL `LIKE` pattern on the name.
    NamePattern(String),
    /// Exact entity type.
    EntityType(String),
    /// Top-level metadata key present.
    MetadataKey(String),
    /// Text value at a metadata path equals `value`.
    MetadataEquals {
        /// Path from the metadata root.
        path: Vec<String>,
        /// Expected text value.
        value: String,
    },
}

/// Result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityOrder {
    /// Store order.
    #[default]
    Unordered,
    /// Newest first by creation time.
    CreatedDesc,
    /// Name ascending.
    NameAsc,
}

/// Entity query.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityQuery {
    /// Row predicate.
    pub filter: EntityFilter,
    /// Ordering.
    pub order: EntityOrder,
    /// Maximum rows returned.
    pub limit: Option<u64>,
    /// Rows skipped.
    pub offset: u64,
}

impl EntityQuery {
    /// Unordered, unlimited query.
    pub fn new(filter: EntityFilter) -> Self {
        Self {
            filter,
            order: EntityOrder::Unordered,
            limit: None,
            offset: 0,
        }
    }

    /// Set ordering.
    pub fn order_by(mut self, order: EntityOrder) -> Self {
        self.order = order;
        self
    }

    /// Set the row limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// Partial entity update. `None` leaves the column unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPatch {
    /// New name.
    pub name: Option<String>,
    /// New type.
    pub entity_type: Option<String>,
    /// New metadata.
    pub metadata: Option<serde_json::Value>,
    /// New grade.
    pub grade: Option<f64>,
}

/// Partial relation update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationPatch {
    /// New relation kind.
    pub relationship_type: Option<String>,
    /// New metadata.
    pub metadata: Option<serde_json::Value>,
}

/// One step of an all-or-nothing write sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteStep {
    /// Insert an entity.
    Insert(EntityRecord),
    /// Fail the sequence at this point.
    Abort(String),
}

/// A versioned schema change with one added entity column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    /// Version the change applies to.
    pub from_version: String,
    /// Version after the change.
    pub to_version: String,
    /// Column added to the entity table.
    pub column: String,
    /// Human-readable description.
    pub description: String,
}

/// Read-only statistics probe used by maintenance checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaintenanceOp {
    /// Per-table vacuum statistics.
    VacuumStatistics,
    /// Per-table tuple counters.
    AnalyzeStatistics,
    /// Index usage counters.
    IndexStatistics,
}

impl MaintenanceOp {
    /// Every probe, in execution order.
    pub const ALL: [MaintenanceOp; 3] = [
        MaintenanceOp::VacuumStatistics,
        MaintenanceOp::AnalyzeStatistics,
        MaintenanceOp::IndexStatistics,
    ];

    /// Report name.
    pub fn name(&self) -> &'static str {
        match self {
            MaintenanceOp::VacuumStatistics => "vacuum_simulation",
            MaintenanceOp::AnalyzeStatistics => "analyze_simulation",
            MaintenanceOp::IndexStatistics => "index_maintenance_simulation",
        }
    }
}

/// Entities and relations of one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Owner of every row.
    pub tenant: TenantRef,
    /// When the export ran.
    pub exported_at: DateTime<Utc>,
    /// Entity rows.
    pub entities: Vec<EntityRecord>,
    /// Relation rows.
    pub relations: Vec<RelationRecord>,
}

impl GraphSnapshot {
    /// Copy of the graph owned by `tenant`, with fresh ids.
    ///
    /// Relation endpoints are remapped to the new entity ids; endpoints that
    /// point outside the snapshot are kept as they are.
    pub fn retarget(&self, tenant: &TenantRef) -> GraphSnapshot {
        let mut ids: HashMap<Uuid, Uuid> = HashMap::with_capacity(self.entities.len());
        let entities = self
            .entities
            .iter()
            .map(|e| {
                let id = Uuid::new_v4();
                ids.insert(e.id, id);
                EntityRecord {
                    id,
                    tenant: tenant.clone(),
                    ..e.clone()
                }
            })
            .collect();
        let relations = self
            .relations
            .iter()
            .map(|r| RelationRecord {
                id: Uuid::new_v4(),
                tenant: tenant.clone(),
                source_id: ids.get(&r.source_id).copied().unwrap_or(r.source_id),
                target_id: ids.get(&r.target_id).copied().unwrap_or(r.target_id),
                ..r.clone()
            })
            .collect();

        GraphSnapshot {
            tenant: tenant.clone(),
            exported_at: Utc::now(),
            entities,
            relations,
        }
    }
}

/// Rows written by an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Entities written.
    pub entities: u64,
    /// Relations written.
    pub relations: u64,
}

/// Tenant-scoped persistence used by every store-backed check.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Round trip to the store.
    async fn ping(&self) -> StoreResult<()>;

    /// Verify each table is accessible; returns the tables checked.
    async fn check_tables(&self, tables: &[&str]) -> StoreResult<Vec<String>>;

    /// Column names of `table`, in ordinal order.
    async fn table_columns(&self, table: &str) -> StoreResult<Vec<String>>;

    /// Insert one entity.
    async fn insert_entity(&self, entity: &EntityRecord) -> StoreResult<InsertOutcome>;

    /// Insert a batch in one transaction; any violation writes nothing.
    async fn insert_entities(&self, entities: &[EntityRecord]) -> StoreResult<u64>;

    /// Fetch one entity, including soft-deleted rows.
    async fn get_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<Option<EntityRecord>>;

    /// Apply a patch and bump `updated_at`.
    async fn update_entity(
        &self,
        tenant: &TenantRef,
        id: Uuid,
        patch: &EntityPatch,
    ) -> StoreResult<Option<EntityRecord>>;

    /// Mark an entity deleted.
    async fn soft_delete_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool>;

    /// Remove an entity row.
    async fn delete_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool>;

    /// Live entities matching the query.
    async fn query_entities(
        &self,
        tenant: &TenantRef,
        query: &EntityQuery,
    ) -> StoreResult<Vec<EntityRecord>>;

    /// Count of live entities matching the filter.
    async fn count_entities(&self, tenant: &TenantRef, filter: &EntityFilter) -> StoreResult<u64>;

    /// Insert one relation.
    async fn insert_relation(&self, relation: &RelationRecord) -> StoreResult<InsertOutcome>;

    /// Fetch one relation, including soft-deleted rows.
    async fn get_relation(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<Option<RelationRecord>>;

    /// Apply a patch and bump `updated_at`.
    async fn update_relation(
        &self,
        tenant: &TenantRef,
        id: Uuid,
        patch: &RelationPatch,
    ) -> StoreResult<Option<RelationRecord>>;

    /// Mark a relation deleted.
    async fn soft_delete_relation(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool>;

    /// Live relations of the tenant.
    async fn list_relations(&self, tenant: &TenantRef) -> StoreResult<Vec<RelationRecord>>;

    /// Relations of the tenant whose source or target row is missing.
    async fn count_orphaned_relations(&self, tenant: &TenantRef) -> StoreResult<u64>;

    /// Remove up to `limit` rows of the tenant, relations first. Returns rows removed.
    async fn delete_tenant_batch(&self, tenant: &TenantRef, limit: u64) -> StoreResult<u64>;

    /// Remove entities of `entity_type` graded below `grade_below` and last
    /// updated before `updated_before`.
    async fn purge_stale_entities(
        &self,
        tenant: &TenantRef,
        entity_type: &str,
        grade_below: f64,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Multiply the grade of entities updated before `updated_before` by
    /// `factor`, bumping `updated_at`.
    async fn decay_grades(
        &self,
        tenant: &TenantRef,
        factor: f64,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Run the steps in one transaction. A failing step rolls back all of
    /// them and returns [`StoreError::Aborted`].
    async fn atomic_write(&self, steps: &[WriteStep]) -> StoreResult<u64>;

    /// Current schema version, if versioning is set up.
    async fn schema_version(&self) -> StoreResult<Option<String>>;

    /// Apply a schema change.
    async fn apply_schema_change(&self, change: &SchemaChange) -> StoreResult<()>;

    /// Undo a schema change.
    async fn revert_schema_change(&self, change: &SchemaChange) -> StoreResult<()>;

    /// Set `column` to `value` on every live entity of the tenant.
    async fn backfill_column(&self, tenant: &TenantRef, column: &str, value: &str) -> StoreResult<u64>;

    /// Entities of the tenant whose `column` equals `value`.
    async fn count_backfilled(&self, tenant: &TenantRef, column: &str, value: &str) -> StoreResult<u64>;

    /// Run a statistics probe; returns rows examined.
    async fn maintenance_probe(&self, op: MaintenanceOp) -> StoreResult<u64>;

    /// Every entity and relation of the tenant, including soft-deleted rows.
    async fn export_tenant(&self, tenant: &TenantRef) -> StoreResult<GraphSnapshot>;

    /// Write a snapshot in one transaction.
    async fn import_snapshot(&self, snapshot: &GraphSnapshot) -> StoreResult<ImportSummary>;
}

/// Remove every row of the tenant in batches. Returns rows removed.
pub async fn purge_tenant(
    store: &dyn MemoryStore,
    tenant: &TenantRef,
    batch_size: u64,
) -> StoreResult<u64> {
    let batch_size = batch_size.max(1);
    let mut removed = 0;
    loop {
        let deleted = store.delete_tenant_batch(tenant, batch_size).await?;
        removed += deleted;
        if deleted < batch_size {
            return Ok(removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_tenants_are_distinct() {
        let a = TenantRef::fresh("integrity_test");
        let b = TenantRef::fresh("integrity_test");
        assert_ne!(a, b);
        assert!(a.actor_id.starts_with("integrity_test_"));
        assert_eq!(a.actor_id.len(), "integrity_test_".len() + 8);
        assert_eq!(a.to_string(), format!("client:{}", a.actor_id));
    }

    #[test]
    fn test_actor_type_round_trip() {
        for kind in [
            ActorType::Client,
            ActorType::Human,
            ActorType::Synth,
            ActorType::SynthClass,
        ] {
            assert_eq!(ActorType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActorType::parse("robot"), None);
    }

    #[test]
    fn test_retarget_remaps_relation_endpoints() {
        let source = TenantRef::client("source");
        let target = TenantRef::client("target");
        let a = EntityRecord::new(&source, "A", "person");
        let b = EntityRecord::new(&source, "B", "person");
        let outside = Uuid::new_v4();
        let snapshot = GraphSnapshot {
            tenant: source.clone(),
            exported_at: Utc::now(),
            relations: vec![
                RelationRecord::new(&source, a.id, b.id, "knows"),
                RelationRecord::new(&source, a.id, outside, "mentions"),
            ],
            entities: vec![a.clone(), b.clone()],
        };

        let moved = snapshot.retarget(&target);
        assert_eq!(moved.tenant, target);
        assert!(moved.entities.iter().all(|e| e.tenant == target));
        assert!(moved.entities.iter().all(|e| e.id != a.id && e.id != b.id));

        let new_ids: Vec<Uuid> = moved.entities.iter().map(|e| e.id).collect();
        assert!(new_ids.contains(&moved.relations[0].source_id));
        assert!(new_ids.contains(&moved.relations[0].target_id));
        assert_eq!(moved.relations[1].target_id, outside);
    }
}
