// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Create/read/update/delete lifecycle of entities and relations.

use async_trait::async_trait;
use memory_validation_core::config::ValidationConfig;
use memory_validation_core::details::CountDetails;
use memory_validation_core::error::ensure;
use memory_validation_core::fixtures::TestDataGenerator;
use memory_validation_core::model::ValidationResult;
use memory_validation_core::store::{
    purge_tenant, ActorType, EntityFilter, EntityPatch, EntityRecord, MemoryStore,
    RelationPatch, RelationRecord, TenantRef,
};
use memory_validation_core::validator::{best_effort, BaseValidator, CheckOutcome, CheckResult};
use memory_validation_core::{CheckError, Validator, ValidatorError};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Lifecycle checks over one freshly generated human tenant per run.
pub struct CrudValidator {
    store: Arc<dyn MemoryStore>,
    cleanup_batch_size: u64,
    generator: Mutex<TestDataGenerator>,
}

impl std::fmt::Debug for CrudValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrudValidator")
            .field("cleanup_batch_size", &self.cleanup_batch_size)
            .finish()
    }
}

impl CrudValidator {
    /// Validator over `store`.
    pub fn new(store: Arc<dyn MemoryStore>, config: &ValidationConfig) -> Self {
        Self {
            store,
            cleanup_batch_size: config.cleanup_batch_size,
            generator: Mutex::new(TestDataGenerator::new(42)),
        }
    }

    fn person(&self, tenant: &TenantRef) -> EntityRecord {
        match self.generator.lock() {
            Ok(mut generator) => generator.person(tenant),
            Err(_) => TestDataGenerator::new(42).person(tenant),
        }
    }

    async fn insert(&self, entity: &EntityRecord) -> Result<(), CheckError> {
        let outcome = self.store.insert_entity(entity).await?;
        ensure(outcome.is_inserted(), || "Entity was not created".to_string())
    }

    async fn teardown(&self, tenant: &TenantRef) -> Option<u64> {
        best_effort(
            "crud fixtures",
            purge_tenant(self.store.as_ref(), tenant, self.cleanup_batch_size),
        )
        .await
    }

    /// Insert an entity and read it back by id.
    pub async fn check_entity_create(&self, tenant: &TenantRef) -> CheckResult {
        let entity = self.person(tenant);
        self.insert(&entity).await?;

        let row = self.store.get_entity(tenant, entity.id).await?;
        let row = row.ok_or_else(|| CheckError::assertion("Entity was not created"))?;
        ensure(row.id == entity.id, || "Entity ID mismatch".to_string())?;
        ensure(row.name == entity.name, || "Entity name mismatch".to_string())?;
        ensure(row.entity_type == entity.entity_type, || {
            "Entity type mismatch".to_string()
        })?;
        Ok(CheckOutcome::pass())
    }

    /// Every stored field reads back unchanged, metadata included.
    pub async fn check_entity_read(&self, tenant: &TenantRef) -> CheckResult {
        let entity = EntityRecord::new(tenant, "Acme Analytics", "company").with_metadata(json!({
            "industry": "software",
            "size": "medium",
            "locations": ["Berlin", "Austin"],
        }));
        self.insert(&entity).await?;

        let row = self
            .store
            .get_entity(tenant, entity.id)
            .await?
            .ok_or_else(|| CheckError::assertion("Entity not found"))?;
        ensure(row.tenant == *tenant, || "Entity actor mismatch".to_string())?;
        ensure(row.name == entity.name, || "Entity name mismatch".to_string())?;
        ensure(row.entity_type == entity.entity_type, || {
            "Entity type mismatch".to_string()
        })?;
        ensure(row.metadata == entity.metadata, || "Metadata mismatch".to_string())?;
        Ok(CheckOutcome::pass())
    }

    /// Rename an entity and merge a flag into its metadata.
    pub async fn check_entity_update(&self, tenant: &TenantRef) -> CheckResult {
        let entity = self.person(tenant).with_grade(0.3);
        self.insert(&entity).await?;

        let new_name = format!("Updated {}", entity.name);
        let mut metadata = entity.metadata.clone();
        if let Some(fields) = metadata.as_object_mut() {
            fields.insert("updated".into(), json!(true));
            fields.insert("update_time".into(), json!(chrono::Utc::now().to_rfc3339()));
        }
        let patch = EntityPatch {
            name: Some(new_name.clone()),
            metadata: Some(metadata),
            ..EntityPatch::default()
        };
        self.store.update_entity(tenant, entity.id, &patch).await?;

        let row = self
            .store
            .get_entity(tenant, entity.id)
            .await?
            .ok_or_else(|| CheckError::assertion("Entity not found after update"))?;
        ensure(row.name == new_name, || "Name was not updated".to_string())?;
        ensure(row.metadata["updated"] == json!(true), || {
            "Metadata was not updated".to_string()
        })?;
        Ok(CheckOutcome::pass())
    }

    /// A soft delete hides the row from queries but keeps it stored.
    pub async fn check_entity_delete(&self, tenant: &TenantRef) -> CheckResult {
        let entity = self.person(tenant).with_grade(0.05);
        self.insert(&entity).await?;

        let by_id = EntityFilter::Id(entity.id);
        let live = self.store.count_entities(tenant, &by_id).await?;
        ensure(live == 1, || "Entity was not created".to_string())?;

        ensure(self.store.soft_delete_entity(tenant, entity.id).await?, || {
            "Entity was not soft deleted".to_string()
        })?;

        let live = self.store.count_entities(tenant, &by_id).await?;
        ensure(live == 0, || "Entity was not soft deleted".to_string())?;

        let stored = self.store.get_entity(tenant, entity.id).await?;
        ensure(stored.is_some_and(|e| e.is_deleted()), || {
            "Entity was hard deleted instead of soft deleted".to_string()
        })?;
        Ok(CheckOutcome::pass())
    }

    /// Create, read, update and soft-delete one relation.
    pub async fn check_relationship_crud(&self, tenant: &TenantRef) -> CheckResult {
        let person = self.person(tenant);
        let company = EntityRecord::new(tenant, "Initech", "company");
        self.insert(&person).await?;
        self.insert(&company).await?;

        let relation = RelationRecord::new(tenant, person.id, company.id, "works_for")
            .with_metadata(json!({"test": true, "strength": "strong"}));
        let outcome = self.store.insert_relation(&relation).await?;
        ensure(outcome.is_inserted(), || "Relationship was not created".to_string())?;

        let row = self
            .store
            .get_relation(tenant, relation.id)
            .await?
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| CheckError::assertion("Relationship not found"))?;
        ensure(
            row.source_id == person.id
                && row.target_id == company.id
                && row.relationship_type == "works_for",
            || "Relationship fields mismatch".to_string(),
        )?;

        let patch = RelationPatch {
            metadata: Some(json!({"test": true, "strength": "medium", "updated": true})),
            ..RelationPatch::default()
        };
        self.store.update_relation(tenant, relation.id, &patch).await?;
        let updated = self.store.get_relation(tenant, relation.id).await?;
        ensure(
            updated.is_some_and(|r| r.metadata["updated"] == json!(true)),
            || "Relationship metadata was not updated".to_string(),
        )?;

        self.store.soft_delete_relation(tenant, relation.id).await?;
        let live = self.store.list_relations(tenant).await?;
        ensure(live.iter().all(|r| r.id != relation.id), || {
            "Relationship was not soft deleted".to_string()
        })?;
        Ok(CheckOutcome::pass())
    }

    /// Two tenants each see only their own row.
    pub async fn check_actor_isolation(&self) -> CheckResult {
        let first = TenantRef::fresh_of(ActorType::Human, "crud_actor");
        let second = TenantRef::fresh_of(ActorType::Human, "crud_actor");
        let outcome = self.isolation_between(&first, &second).await;
        self.teardown(&first).await;
        self.teardown(&second).await;
        outcome
    }

    async fn isolation_between(&self, first: &TenantRef, second: &TenantRef) -> CheckResult {
        let own = self.person(first);
        let other = self.person(second);
        self.insert(&own).await?;
        self.insert(&other).await?;

        let seen_first = self.store.count_entities(first, &EntityFilter::All).await?;
        ensure(seen_first == 1, || {
            format!("Actor1 should see exactly 1 entity, saw {seen_first}")
        })?;
        let seen_second = self.store.count_entities(second, &EntityFilter::All).await?;
        ensure(seen_second == 1, || {
            format!("Actor2 should see exactly 1 entity, saw {seen_second}")
        })?;

        let cross = self
            .store
            .count_entities(first, &EntityFilter::Id(other.id))
            .await?;
        ensure(cross == 0, || {
            "Actor isolation violated - cross-actor access detected".to_string()
        })?;
        Ok(CheckOutcome::passed(CountDetails::new(1, seen_first)))
    }
}

#[async_trait]
impl Validator for CrudValidator {
    fn name(&self) -> &str {
        "CRUDValidator"
    }

    async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
        let mut base = BaseValidator::new(self.name());
        let tenant = TenantRef::fresh_of(ActorType::Human, "crud_test");

        base.run_test("entity_create", || self.check_entity_create(&tenant)).await;
        base.run_test("entity_read", || self.check_entity_read(&tenant)).await;
        base.run_test("entity_update", || self.check_entity_update(&tenant)).await;
        base.run_test("entity_delete", || self.check_entity_delete(&tenant)).await;
        base.run_test("relationship_crud", || self.check_relationship_crud(&tenant))
            .await;
        base.run_test("actor_isolation", || self.check_actor_isolation()).await;

        if let Some(removed) = self.teardown(&tenant).await {
            debug!(tenant = %tenant, removed, "CRUD fixtures removed");
        }
        Ok(base.finish())
    }
}
