// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Data integrity checks: keys, references, tenant boundaries, payload
//! fidelity, timestamps and concurrent inserts.

use async_trait::async_trait;
use futures::future::join_all;
use memory_validation_core::config::ValidationConfig;
use memory_validation_core::details::CountDetails;
use memory_validation_core::error::ensure;
use memory_validation_core::fixtures::TestDataGenerator;
use memory_validation_core::model::ValidationResult;
use memory_validation_core::store::{
    purge_tenant, ActorType, ConstraintViolation, EntityFilter, EntityPatch, EntityQuery,
    EntityRecord, InsertOutcome, MemoryStore, RelationRecord, TenantRef, ENTITIES_TABLE,
    RELATIONS_TABLE, REQUIRED_TABLES,
};
use memory_validation_core::validator::{best_effort, BaseValidator, CheckOutcome, CheckResult};
use memory_validation_core::{CheckError, Validator, ValidatorError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

const REQUIRED_ENTITY_COLUMNS: [&str; 8] = [
    "id",
    "actor_type",
    "actor_id",
    "name",
    "entity_type",
    "metadata",
    "created_at",
    "updated_at",
];

const REQUIRED_RELATION_COLUMNS: [&str; 8] = [
    "id",
    "actor_type",
    "actor_id",
    "source_id",
    "target_id",
    "relationship_type",
    "metadata",
    "created_at",
];

/// Entities each isolation tenant owns.
const ENTITIES_PER_ACTOR: usize = 3;

/// Parallel inserts in the race check.
const CONCURRENT_INSERTS: usize = 5;

/// Integrity checks under one `integrity_test_*` tenant per run.
pub struct DataIntegrityValidator {
    store: Arc<dyn MemoryStore>,
    cleanup_batch_size: u64,
    generator: Mutex<TestDataGenerator>,
}

impl std::fmt::Debug for DataIntegrityValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataIntegrityValidator")
            .field("cleanup_batch_size", &self.cleanup_batch_size)
            .finish()
    }
}

impl DataIntegrityValidator {
    /// Validator over `store`.
    pub fn new(store: Arc<dyn MemoryStore>, config: &ValidationConfig) -> Self {
        Self {
            store,
            cleanup_batch_size: config.cleanup_batch_size,
            generator: Mutex::new(TestDataGenerator::new(123)),
        }
    }

    fn with_generator<T>(&self, f: impl FnOnce(&mut TestDataGenerator) -> T) -> T {
        match self.generator.lock() {
            Ok(mut generator) => f(&mut generator),
            Err(_) => f(&mut TestDataGenerator::new(123)),
        }
    }

    fn people(&self, tenant: &TenantRef, count: usize) -> Vec<EntityRecord> {
        self.with_generator(|g| g.people(tenant, count))
    }

    async fn insert_all(&self, entities: &[EntityRecord]) -> Result<(), CheckError> {
        for entity in entities {
            let outcome = self.store.insert_entity(entity).await?;
            ensure(outcome.is_inserted(), || {
                format!("Entity {} was not created: {outcome:?}", entity.id)
            })?;
        }
        Ok(())
    }

    async fn teardown(&self, tenant: &TenantRef) -> Option<u64> {
        best_effort(
            "integrity fixtures",
            purge_tenant(self.store.as_ref(), tenant, self.cleanup_batch_size),
        )
        .await
    }

    /// Required tables and columns exist.
    pub async fn check_table_schema(&self) -> CheckResult {
        self.store.check_tables(&REQUIRED_TABLES).await?;
        for (table, required) in [
            (ENTITIES_TABLE, &REQUIRED_ENTITY_COLUMNS),
            (RELATIONS_TABLE, &REQUIRED_RELATION_COLUMNS),
        ] {
            let columns = self.store.table_columns(table).await?;
            for column in required.iter() {
                ensure(columns.iter().any(|c| c == column), || {
                    format!("Missing column: {column} in {table}")
                })?;
            }
        }
        Ok(CheckOutcome::pass())
    }

    /// Re-inserting an existing id is rejected.
    pub async fn check_entity_uniqueness(&self, tenant: &TenantRef) -> CheckResult {
        let entity = self.with_generator(|g| g.person(tenant));
        self.insert_all(std::slice::from_ref(&entity)).await?;

        let second = self.store.insert_entity(&entity).await?;
        if let InsertOutcome::Violation(ConstraintViolation::DuplicateKey(detail)) = &second {
            info!(detail = %detail, "Duplicate entity rejected");
        }

        let copies = self
            .store
            .count_entities(tenant, &EntityFilter::Id(entity.id))
            .await?;
        ensure(copies == 1, || {
            format!("Duplicate entity created - found {copies} entities with same ID")
        })?;
        Ok(CheckOutcome::passed(CountDetails::new(1, copies)))
    }

    /// A valid relation is stored; a relation to a missing entity is either
    /// rejected or reported as a warning.
    pub async fn check_referential_integrity(&self, tenant: &TenantRef) -> CheckResult {
        let pair = self.people(tenant, 2);
        self.insert_all(&pair).await?;

        let valid = RelationRecord::new(tenant, pair[0].id, pair[1].id, "knows");
        self.store.insert_relation(&valid).await?;
        let stored = self.store.get_relation(tenant, valid.id).await?;
        ensure(stored.is_some(), || "Valid relation was not created".to_string())?;

        let dangling = RelationRecord::new(tenant, pair[0].id, Uuid::new_v4(), "knows");
        match self.store.insert_relation(&dangling).await? {
            InsertOutcome::Inserted => {
                warn!("System allows relationships to non-existent entities");
                Ok(CheckOutcome::warning(
                    "System allows relationships to non-existent entities",
                    CountDetails::default().note(format!("dangling relation {}", dangling.id)),
                ))
            }
            InsertOutcome::Violation(ConstraintViolation::ForeignKey(detail)) => {
                info!(detail = %detail, "Dangling relation rejected");
                Ok(CheckOutcome::pass())
            }
            InsertOutcome::Violation(other) => Err(CheckError::assertion(format!(
                "Dangling relation rejected for the wrong reason: {other}"
            ))),
        }
    }

    /// Client and human tenants each see exactly their own rows.
    pub async fn check_client_isolation(&self) -> CheckResult {
        let tenants = [
            TenantRef::fresh_of(ActorType::Client, "client"),
            TenantRef::fresh_of(ActorType::Client, "client"),
            TenantRef::fresh_of(ActorType::Human, "human"),
            TenantRef::fresh_of(ActorType::Human, "human"),
        ];
        let outcome = self.isolation_across(&tenants).await;
        for tenant in &tenants {
            self.teardown(tenant).await;
        }
        outcome
    }

    async fn isolation_across(&self, tenants: &[TenantRef]) -> CheckResult {
        let mut owned = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            let entities = self.people(tenant, ENTITIES_PER_ACTOR);
            self.insert_all(&entities).await?;
            owned.push(entities);
        }

        for tenant in tenants {
            let seen = self.store.count_entities(tenant, &EntityFilter::All).await?;
            ensure(seen == ENTITIES_PER_ACTOR as u64, || {
                format!(
                    "Actor {}:{} should see exactly {ENTITIES_PER_ACTOR} entities, saw {seen}",
                    tenant.actor_type.as_str(),
                    tenant.actor_id
                )
            })?;
        }

        // A relation across tenants is recorded, not judged.
        let cross = RelationRecord::new(&tenants[0], owned[0][0].id, owned[1][0].id, "knows");
        match self.store.insert_relation(&cross).await {
            Ok(InsertOutcome::Inserted) => {
                warn!("Cross-actor relationship was accepted")
            }
            Ok(InsertOutcome::Violation(v)) => info!(violation = %v, "Cross-actor relationship rejected"),
            Err(err) => info!(error = %err, "Cross-actor relationship failed"),
        }

        Ok(CheckOutcome::passed(CountDetails::new(
            ENTITIES_PER_ACTOR as u64,
            ENTITIES_PER_ACTOR as u64,
        )))
    }

    /// Nested metadata reads back intact and is queryable by path.
    pub async fn check_json_metadata(&self, tenant: &TenantRef) -> CheckResult {
        let metadata = self.with_generator(|g| g.complex_metadata());
        let entity = EntityRecord::new(tenant, "Metadata Subject", "person").with_metadata(metadata);
        self.insert_all(std::slice::from_ref(&entity)).await?;

        let row = self
            .store
            .get_entity(tenant, entity.id)
            .await?
            .ok_or_else(|| CheckError::assertion("Entity with complex metadata not found"))?;
        let m = &row.metadata;
        ensure(m["personal_info"]["age"] == json!(30), || {
            "Nested age not preserved".to_string()
        })?;
        let has_python = m["personal_info"]["skills"]
            .as_array()
            .is_some_and(|skills| skills.iter().any(|s| s == "Python"));
        ensure(has_python, || "Skills array not preserved".to_string())?;
        ensure(
            m["personal_info"]["preferences"]["work_style"] == json!("remote"),
            || "Nested preferences not preserved".to_string(),
        )?;
        ensure(m["metrics"]["engagement_score"] == json!(0.85), || {
            "Metrics not preserved".to_string()
        })?;

        let by_age = EntityQuery::new(EntityFilter::MetadataEquals {
            path: vec!["personal_info".into(), "age".into()],
            value: "30".into(),
        });
        let found = self.store.query_entities(tenant, &by_age).await?;
        let typed = self
            .store
            .count_entities(tenant, &EntityFilter::MetadataKey("entity_type".into()))
            .await?;
        ensure(found.iter().any(|e| e.id == entity.id) && typed >= 1, || {
            "JSON querying not working correctly".to_string()
        })?;
        Ok(CheckOutcome::pass())
    }

    /// `created_at` survives an update and `updated_at` moves past it.
    pub async fn check_timestamps(&self, tenant: &TenantRef) -> CheckResult {
        let entity = self.with_generator(|g| g.person(tenant));
        self.insert_all(std::slice::from_ref(&entity)).await?;
        let original = self
            .store
            .get_entity(tenant, entity.id)
            .await?
            .ok_or_else(|| CheckError::assertion("Entity not found"))?;

        let patch = EntityPatch {
            name: Some(format!("{} (renamed)", entity.name)),
            ..EntityPatch::default()
        };
        let updated = self
            .store
            .update_entity(tenant, entity.id, &patch)
            .await?
            .ok_or_else(|| CheckError::assertion("Entity not found after update"))?;

        ensure(updated.created_at == original.created_at, || {
            "Created timestamp was modified".to_string()
        })?;
        ensure(updated.updated_at > updated.created_at, || {
            "Updated timestamp should be after created timestamp".to_string()
        })?;
        Ok(CheckOutcome::pass())
    }

    /// Same-name entities under fresh ids: whether the store merges them is
    /// recorded.
    pub async fn check_deduplication(&self, tenant: &TenantRef) -> CheckResult {
        let base = self.with_generator(|g| g.person(tenant));
        let mut metadata = base.metadata.clone();
        if let Some(fields) = metadata.as_object_mut() {
            fields.insert("additional_info".into(), json!("This is a duplicate"));
        }
        let duplicate =
            EntityRecord::new(tenant, base.name.clone(), base.entity_type.clone()).with_metadata(metadata);

        self.insert_all(std::slice::from_ref(&base)).await?;
        let second = self.store.insert_entity(&duplicate).await?;

        let same_name = self
            .store
            .count_entities(tenant, &EntityFilter::NamePattern(base.name.clone()))
            .await?;
        let note = if same_name > 1 {
            warn!(count = same_name, "System allows duplicate entities with same identifiers");
            "duplicates allowed"
        } else {
            info!(outcome = ?second, "System prevents duplicate entities with same identifiers");
            "duplicates prevented"
        };
        Ok(CheckOutcome::passed(CountDetails::new(1, same_name).note(note)))
    }

    /// Parallel inserts never create more rows than requested.
    pub async fn check_concurrent_creation(&self, tenant: &TenantRef) -> CheckResult {
        let before = self.store.count_entities(tenant, &EntityFilter::All).await?;
        let entities = self.people(tenant, CONCURRENT_INSERTS);

        let tasks = entities.into_iter().map(|entity| {
            let store = Arc::clone(&self.store);
            tokio::spawn(async move { store.insert_entity(&entity).await })
        });
        let outcomes = join_all(tasks).await;

        let mut successful = 0u64;
        for outcome in outcomes {
            match outcome? {
                Ok(InsertOutcome::Inserted) => successful += 1,
                Ok(InsertOutcome::Violation(v)) => warn!(violation = %v, "Concurrent insert rejected"),
                Err(err) => warn!(error = %err, "Concurrent insert failed"),
            }
        }
        info!(
            successful,
            failed = CONCURRENT_INSERTS as u64 - successful,
            "Concurrent entity creation finished"
        );

        let created = self.store.count_entities(tenant, &EntityFilter::All).await? - before;
        ensure(created <= CONCURRENT_INSERTS as u64, || {
            format!("More entities created than expected: {created} > {CONCURRENT_INSERTS}")
        })?;
        Ok(CheckOutcome::passed(CountDetails::new(
            CONCURRENT_INSERTS as u64,
            created,
        )))
    }

    /// Hard-delete an entity with relations and count what is left dangling.
    pub async fn check_cascade(&self) -> CheckResult {
        let tenant = TenantRef::fresh("cascade_test");
        let outcome = self.cascade_in(&tenant).await;
        self.teardown(&tenant).await;
        outcome
    }

    async fn cascade_in(&self, tenant: &TenantRef) -> CheckResult {
        let entities = self.people(tenant, 3);
        self.insert_all(&entities).await?;
        let relations = self.with_generator(|g| g.relationships(tenant, &entities, 3));
        for relation in &relations {
            self.store.insert_relation(relation).await?;
        }

        self.store.delete_entity(tenant, entities[0].id).await?;
        let remaining = self.store.list_relations(tenant).await?.len() as u64;
        let orphaned = self.store.count_orphaned_relations(tenant).await?;

        let note = if orphaned > 0 {
            warn!(orphaned, "Found orphaned relationships after entity deletion");
            format!("{orphaned} orphaned relationships")
        } else {
            info!("No orphaned relationships found after entity deletion");
            "no orphaned relationships".to_string()
        };
        Ok(CheckOutcome::passed(
            CountDetails::new(relations.len() as u64, remaining).note(note),
        ))
    }

    /// A ~100 KB payload reads back intact and stays queryable.
    pub async fn check_large_metadata(&self, tenant: &TenantRef) -> CheckResult {
        let metadata = self.with_generator(|g| g.large_metadata());
        let payload_bytes = metadata.to_string().len();
        let entity = self
            .with_generator(|g| g.person(tenant))
            .with_metadata(metadata.clone());

        let start = Instant::now();
        self.insert_all(std::slice::from_ref(&entity)).await?;
        let insert_ms = start.elapsed().as_secs_f64() * 1000.0;

        let row = self
            .store
            .get_entity(tenant, entity.id)
            .await?
            .ok_or_else(|| CheckError::assertion("Entity with large metadata not found"))?;
        let m = &row.metadata;
        let len_of = |v: &Value| v.as_array().map(Vec::len).or(v.as_object().map(|o| o.len()));
        ensure(len_of(&m["history"]) == Some(100), || {
            "History entries not preserved".to_string()
        })?;
        ensure(len_of(&m["tags"]) == Some(1000), || "Tags not preserved".to_string())?;
        ensure(len_of(&m["metrics"]) == Some(500), || "Metrics not preserved".to_string())?;
        ensure(m["description"] == metadata["description"], || {
            "Large text not preserved".to_string()
        })?;

        let first_event = metadata["history"][0]["event"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let query = EntityQuery::new(EntityFilter::MetadataEquals {
            path: vec!["history".into(), "0".into(), "event".into()],
            value: first_event.clone(),
        });
        let found = self.store.query_entities(tenant, &query).await?;
        ensure(
            first_event.starts_with("Event 0:") && found.iter().any(|e| e.name == entity.name),
            || "JSON querying on large metadata failed".to_string(),
        )?;

        info!(payload_bytes, insert_ms, "Large metadata handled");
        Ok(CheckOutcome::passed(CountDetails {
            payload_bytes: Some(payload_bytes),
            ..CountDetails::default()
        }))
    }
}

#[async_trait]
impl Validator for DataIntegrityValidator {
    fn name(&self) -> &str {
        "DataIntegrityValidator"
    }

    async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
        let mut base = BaseValidator::new(self.name());
        let tenant = TenantRef::fresh("integrity_test");

        base.run_test("table_schema_validation", || self.check_table_schema()).await;
        base.run_test("entity_uniqueness_constraints", || {
            self.check_entity_uniqueness(&tenant)
        })
        .await;
        base.run_test("relationship_referential_integrity", || {
            self.check_referential_integrity(&tenant)
        })
        .await;
        base.run_test("client_data_isolation", || self.check_client_isolation()).await;
        base.run_test("json_metadata_integrity", || self.check_json_metadata(&tenant))
            .await;
        base.run_test("timestamp_consistency", || self.check_timestamps(&tenant)).await;
        base.run_test("entity_deduplication_logic", || self.check_deduplication(&tenant))
            .await;
        base.run_test("concurrent_entity_creation", || {
            self.check_concurrent_creation(&tenant)
        })
        .await;
        base.run_test("relationship_cascade_behavior", || self.check_cascade()).await;
        base.run_test("large_metadata_handling", || self.check_large_metadata(&tenant))
            .await;

        self.teardown(&tenant).await;
        Ok(base.finish())
    }
}
