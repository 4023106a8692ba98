// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Postgres-backed [`MemoryStore`].
//!
//! Every statement is parameterized. The only interpolated identifiers are
//! table and column names, which are checked against [`IDENTIFIER`] first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memory_validation_core::error::StoreError;
use memory_validation_core::store::{
    ActorType, ConstraintViolation, EntityFilter, EntityOrder, EntityPatch, EntityQuery,
    EntityRecord, GraphSnapshot, ImportSummary, InsertOutcome, MaintenanceOp, MemoryStore,
    RelationPatch, RelationRecord, SchemaChange, StoreResult, TenantRef, WriteStep,
    ENTITIES_TABLE, RELATIONS_TABLE,
};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Identifiers allowed in interpolated DDL.
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("valid identifier pattern")
});

const ENTITY_COLUMNS: &str =
    "id, actor_type, actor_id, name, entity_type, metadata, grade, created_at, updated_at, deleted_at";
const RELATION_COLUMNS: &str = "id, actor_type, actor_id, source_id, target_id, relationship_type, \
     metadata, created_at, updated_at, deleted_at";

const MAINTAINED_TABLES: &str = "('memory_entities', 'memory_relations')";

/// Pool settings.
#[derive(Debug, Clone)]
pub struct PgStoreOptions {
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PgStoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Store over a Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PgMemoryStore {
    pool: PgPool,
}

impl PgMemoryStore {
    /// Connect to `url`.
    pub async fn connect(url: &str, options: PgStoreOptions) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(url)
            .await
            .map_err(map_error)?;
        info!(max_connections = options.max_connections, "Connected to Postgres");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(map_error)
    }
}

/// Classify a driver error.
pub fn map_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            match db.code().as_deref() {
                Some("40P01") => StoreError::Deadlock(message),
                Some("53100") => StoreError::ResourceExhausted {
                    resource: "disk".to_string(),
                    message,
                },
                Some("53200") => StoreError::ResourceExhausted {
                    resource: "memory".to_string(),
                    message,
                },
                Some("53300") => StoreError::ResourceExhausted {
                    resource: "connections".to_string(),
                    message,
                },
                Some("57014") => StoreError::Query(format!("statement cancelled: {message}")),
                _ => StoreError::Query(message),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::ResourceExhausted {
            resource: "connection_pool".to_string(),
            message: err.to_string(),
        },
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::ConnectionLost(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(err.to_string())
        }
        _ => StoreError::Query(err.to_string()),
    }
}

/// The constraint a driver error reports, if it is a constraint violation.
pub fn constraint_violation(err: &sqlx::Error) -> Option<ConstraintViolation> {
    let sqlx::Error::Database(db) = err else {
        return None;
    };
    let detail = db
        .constraint()
        .map(str::to_string)
        .unwrap_or_else(|| db.message().to_string());
    match db.code().as_deref() {
        Some("23505") => Some(ConstraintViolation::DuplicateKey(detail)),
        Some("23503") => Some(ConstraintViolation::ForeignKey(detail)),
        Some("23502") => Some(ConstraintViolation::NotNull(detail)),
        Some("23514") => Some(ConstraintViolation::Check(detail)),
        _ => None,
    }
}

fn violation_or_error(err: sqlx::Error) -> StoreError {
    match constraint_violation(&err) {
        Some(violation) => StoreError::Query(violation.to_string()),
        None => map_error(err),
    }
}

fn identifier(name: &str) -> StoreResult<&str> {
    if IDENTIFIER.is_match(name) {
        Ok(name)
    } else {
        Err(StoreError::Query(format!("invalid identifier: {name:?}")))
    }
}

fn tenant_from_row(row: &PgRow) -> StoreResult<TenantRef> {
    let actor_type: String = row.try_get("actor_type").map_err(map_error)?;
    let actor_type = ActorType::parse(&actor_type)
        .ok_or_else(|| StoreError::Serialization(format!("unknown actor_type {actor_type:?}")))?;
    Ok(TenantRef::new(
        actor_type,
        row.try_get::<String, _>("actor_id").map_err(map_error)?,
    ))
}

fn entity_from_row(row: &PgRow) -> StoreResult<EntityRecord> {
    let metadata: Json<serde_json::Value> = row.try_get("metadata").map_err(map_error)?;
    Ok(EntityRecord {
        id: row.try_get("id").map_err(map_error)?,
        tenant: tenant_from_row(row)?,
        name: row.try_get("name").map_err(map_error)?,
        entity_type: row.try_get("entity_type").map_err(map_error)?,
        metadata: metadata.0,
        grade: row.try_get("grade").map_err(map_error)?,
        created_at: row.try_get("created_at").map_err(map_error)?,
        updated_at: row.try_get("updated_at").map_err(map_error)?,
        deleted_at: row.try_get("deleted_at").map_err(map_error)?,
    })
}

fn relation_from_row(row: &PgRow) -> StoreResult<RelationRecord> {
    let metadata: Json<serde_json::Value> = row.try_get("metadata").map_err(map_error)?;
    Ok(RelationRecord {
        id: row.try_get("id").map_err(map_error)?,
        tenant: tenant_from_row(row)?,
        source_id: row.try_get("source_id").map_err(map_error)?,
        target_id: row.try_get("target_id").map_err(map_error)?,
        relationship_type: row.try_get("relationship_type").map_err(map_error)?,
        metadata: metadata.0,
        created_at: row.try_get("created_at").map_err(map_error)?,
        updated_at: row.try_get("updated_at").map_err(map_error)?,
        deleted_at: row.try_get("deleted_at").map_err(map_error)?,
    })
}

fn insert_entity_query(entity: &EntityRecord) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        "INSERT INTO memory_entities \
         (id, actor_type, actor_id, name, entity_type, metadata, grade, created_at, updated_at, deleted_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(entity.id)
    .bind(entity.tenant.actor_type.as_str())
    .bind(&entity.tenant.actor_id)
    .bind(&entity.name)
    .bind(&entity.entity_type)
    .bind(Json(&entity.metadata))
    .bind(entity.grade)
    .bind(entity.created_at)
    .bind(entity.updated_at)
    .bind(entity.deleted_at)
}

fn insert_relation_query(
    relation: &RelationRecord,
) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        "INSERT INTO memory_relations \
         (id, actor_type, actor_id, source_id, target_id, relationship_type, metadata, created_at, updated_at, deleted_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(relation.id)
    .bind(relation.tenant.actor_type.as_str())
    .bind(&relation.tenant.actor_id)
    .bind(relation.source_id)
    .bind(relation.target_id)
    .bind(&relation.relationship_type)
    .bind(Json(&relation.metadata))
    .bind(relation.created_at)
    .bind(relation.updated_at)
    .bind(relation.deleted_at)
}

fn push_tenant<'a>(builder: &mut QueryBuilder<'a, Postgres>, tenant: &'a TenantRef) {
    builder
        .push(" WHERE actor_type = ")
        .push_bind(tenant.actor_type.as_str())
        .push(" AND actor_id = ")
        .push_bind(tenant.actor_id.as_str());
}

fn push_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a EntityFilter) {
    builder.push(" AND deleted_at IS NULL");
    match filter {
        EntityFilter::All => {}
        EntityFilter::Id(id) => {
            builder.push(" AND id = ").push_bind(*id);
        }
        EntityFilter::NamePattern(pattern) => {
            builder.push(" AND name LIKE ").push_bind(pattern.as_str());
        }
        EntityFilter::EntityType(kind) => {
            builder.push(" AND entity_type = ").push_bind(kind.as_str());
        }
        EntityFilter::MetadataKey(key) => {
            builder.push(" AND jsonb_exists(metadata, ").push_bind(key.as_str()).push(")");
        }
        EntityFilter::MetadataEquals { path, value } => {
            builder
                .push(" AND metadata #>> ")
                .push_bind(path.clone())
                .push(" = ")
                .push_bind(value.as_str());
        }
    }
}

#[async_trait]
impl MemoryStore for PgMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn check_tables(&self, tables: &[&str]) -> StoreResult<Vec<String>> {
        let mut checked = Vec::with_capacity(tables.len());
        for table in tables {
            let table = identifier(table)?;
            sqlx::query(&format!("SELECT COUNT(*) FROM {table} LIMIT 1"))
                .execute(&self.pool)
                .await
                .map_err(map_error)?;
            checked.push(table.to_string());
        }
        Ok(checked)
    }

    async fn table_columns(&self, table: &str) -> StoreResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT column_name::TEXT FROM information_schema.columns \
             WHERE table_name = $1 ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(map_error)
    }

    async fn insert_entity(&self, entity: &EntityRecord) -> StoreResult<InsertOutcome> {
        match insert_entity_query(entity).execute(&self.pool).await {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) => match constraint_violation(&err) {
                Some(violation) => {
                    debug!(entity_id = %entity.id, %violation, "Insert rejected");
                    Ok(InsertOutcome::Violation(violation))
                }
                None => Err(map_error(err)),
            },
        }
    }

    async fn insert_entities(&self, entities: &[EntityRecord]) -> StoreResult<u64> {
        let mut tx = self.begin().await?;
        for entity in entities {
            insert_entity_query(entity)
                .execute(&mut *tx)
                .await
                .map_err(violation_or_error)?;
        }
        tx.commit().await.map_err(map_error)?;
        Ok(entities.len() as u64)
    }

    async fn get_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<Option<EntityRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM memory_entities \
             WHERE id = $1 AND actor_type = $2 AND actor_id = $3"
        ))
        .bind(id)
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_error)?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn update_entity(
        &self,
        tenant: &TenantRef,
        id: Uuid,
        patch: &EntityPatch,
    ) -> StoreResult<Option<EntityRecord>> {
        let row = sqlx::query(&format!(
            "UPDATE memory_entities SET \
             name = COALESCE($4, name), \
             entity_type = COALESCE($5, entity_type), \
             metadata = COALESCE($6, metadata), \
             grade = COALESCE($7, grade), \
             updated_at = GREATEST(NOW(), updated_at + INTERVAL '1 microsecond') \
             WHERE id = $1 AND actor_type = $2 AND actor_id = $3 \
             RETURNING {ENTITY_COLUMNS}"
        ))
        .bind(id)
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .bind(patch.name.as_deref())
        .bind(patch.entity_type.as_deref())
        .bind(patch.metadata.as_ref().map(Json))
        .bind(patch.grade)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_error)?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn soft_delete_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE memory_entities SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND actor_type = $2 AND actor_id = $3 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .execute(&self.pool)
        .await
        .map_err(map_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM memory_entities WHERE id = $1 AND actor_type = $2 AND actor_id = $3",
        )
        .bind(id)
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .execute(&self.pool)
        .await
        .map_err(map_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_entities(
        &self,
        tenant: &TenantRef,
        query: &EntityQuery,
    ) -> StoreResult<Vec<EntityRecord>> {
        let mut builder =
            QueryBuilder::new(format!("SELECT {ENTITY_COLUMNS} FROM memory_entities"));
        push_tenant(&mut builder, tenant);
        push_filter(&mut builder, &query.filter);
        match query.order {
            EntityOrder::Unordered => {}
            EntityOrder::CreatedDesc => {
                builder.push(" ORDER BY created_at DESC");
            }
            EntityOrder::NameAsc => {
                builder.push(" ORDER BY name ASC");
            }
        }
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if query.offset > 0 {
            builder
                .push(" OFFSET ")
                .push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
        }

        let rows = builder.build().fetch_all(&self.pool).await.map_err(map_error)?;
        rows.iter().map(entity_from_row).collect()
    }

    async fn count_entities(&self, tenant: &TenantRef, filter: &EntityFilter) -> StoreResult<u64> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM memory_entities");
        push_tenant(&mut builder, tenant);
        push_filter(&mut builder, filter);
        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(map_error)?;
        Ok(count.max(0) as u64)
    }

    async fn insert_relation(&self, relation: &RelationRecord) -> StoreResult<InsertOutcome> {
        match insert_relation_query(relation).execute(&self.pool).await {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) => match constraint_violation(&err) {
                Some(violation) => Ok(InsertOutcome::Violation(violation)),
                None => Err(map_error(err)),
            },
        }
    }

    async fn get_relation(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<Option<RelationRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RELATION_COLUMNS} FROM memory_relations \
             WHERE id = $1 AND actor_type = $2 AND actor_id = $3"
        ))
        .bind(id)
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_error)?;
        row.as_ref().map(relation_from_row).transpose()
    }

    async fn update_relation(
        &self,
        tenant: &TenantRef,
        id: Uuid,
        patch: &RelationPatch,
    ) -> StoreResult<Option<RelationRecord>> {
        let row = sqlx::query(&format!(
            "UPDATE memory_relations SET \
             relationship_type = COALESCE($4, relationship_type), \
             metadata = COALESCE($5, metadata), \
             updated_at = GREATEST(NOW(), updated_at + INTERVAL '1 microsecond') \
             WHERE id = $1 AND actor_type = $2 AND actor_id = $3 \
             RETURNING {RELATION_COLUMNS}"
        ))
        .bind(id)
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .bind(patch.relationship_type.as_deref())
        .bind(patch.metadata.as_ref().map(Json))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_error)?;
        row.as_ref().map(relation_from_row).transpose()
    }

    async fn soft_delete_relation(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE memory_relations SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND actor_type = $2 AND actor_id = $3 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .execute(&self.pool)
        .await
        .map_err(map_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_relations(&self, tenant: &TenantRef) -> StoreResult<Vec<RelationRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RELATION_COLUMNS} FROM memory_relations \
             WHERE actor_type = $1 AND actor_id = $2 AND deleted_at IS NULL \
             ORDER BY created_at"
        ))
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_error)?;
        rows.iter().map(relation_from_row).collect()
    }

    async fn count_orphaned_relations(&self, tenant: &TenantRef) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM memory_relations r \
             LEFT JOIN memory_entities e1 ON r.source_id = e1.id \
             LEFT JOIN memory_entities e2 ON r.target_id = e2.id \
             WHERE r.actor_type = $1 AND r.actor_id = $2 AND (e1.id IS NULL OR e2.id IS NULL)",
        )
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_error)?;
        Ok(count.max(0) as u64)
    }

    async fn delete_tenant_batch(&self, tenant: &TenantRef, limit: u64) -> StoreResult<u64> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut tx = self.begin().await?;

        let relations = sqlx::query(
            "DELETE FROM memory_relations WHERE id IN ( \
             SELECT id FROM memory_relations WHERE actor_type = $1 AND actor_id = $2 LIMIT $3)",
        )
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .bind(limit)
        .execute(&mut *tx)
        .await
        .map_err(map_error)?
        .rows_affected();

        let remaining = limit - i64::try_from(relations).unwrap_or(i64::MAX);
        let entities = if remaining > 0 {
            sqlx::query(
                "DELETE FROM memory_entities WHERE id IN ( \
                 SELECT id FROM memory_entities WHERE actor_type = $1 AND actor_id = $2 LIMIT $3)",
            )
            .bind(tenant.actor_type.as_str())
            .bind(&tenant.actor_id)
            .bind(remaining)
            .execute(&mut *tx)
            .await
            .map_err(map_error)?
            .rows_affected()
        } else {
            0
        };

        tx.commit().await.map_err(map_error)?;
        Ok(relations + entities)
    }

    async fn purge_stale_entities(
        &self,
        tenant: &TenantRef,
        entity_type: &str,
        grade_below: f64,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM memory_entities \
             WHERE actor_type = $1 AND actor_id = $2 AND entity_type = $3 \
             AND grade < $4 AND updated_at < $5",
        )
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .bind(entity_type)
        .bind(grade_below)
        .bind(updated_before)
        .execute(&self.pool)
        .await
        .map_err(map_error)?;
        Ok(result.rows_affected())
    }

    async fn decay_grades(
        &self,
        tenant: &TenantRef,
        factor: f64,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE memory_entities SET grade = grade * $3, updated_at = NOW() \
             WHERE actor_type = $1 AND actor_id = $2 AND updated_at < $4",
        )
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .bind(factor)
        .bind(updated_before)
        .execute(&self.pool)
        .await
        .map_err(map_error)?;
        Ok(result.rows_affected())
    }

    async fn atomic_write(&self, steps: &[WriteStep]) -> StoreResult<u64> {
        let mut tx = self.begin().await?;
        let mut written = 0;
        for (index, step) in steps.iter().enumerate() {
            match step {
                WriteStep::Insert(entity) => {
                    if let Err(err) = insert_entity_query(entity).execute(&mut *tx).await {
                        tx.rollback().await.map_err(map_error)?;
                        return Err(StoreError::Aborted {
                            step: index + 1,
                            reason: violation_or_error(err).to_string(),
                        });
                    }
                    written += 1;
                }
                WriteStep::Abort(reason) => {
                    tx.rollback().await.map_err(map_error)?;
                    return Err(StoreError::Aborted {
                        step: index + 1,
                        reason: reason.clone(),
                    });
                }
            }
        }
        tx.commit().await.map_err(map_error)?;
        Ok(written)
    }

    async fn schema_version(&self) -> StoreResult<Option<String>> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT to_regclass('public.schema_versions') IS NOT NULL")
            .fetch_one(&self.pool)
            .await
            .map_err(map_error)?;
        if !exists {
            return Ok(None);
        }
        sqlx::query_scalar::<_, String>(
            "SELECT version FROM schema_versions ORDER BY applied_at DESC, version DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
            .await
            .map_err(map_error)
    }

    async fn apply_schema_change(&self, change: &SchemaChange) -> StoreResult<()> {
        let column = identifier(&change.column)?;
        let mut tx = self.begin().await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_versions ( \
             version TEXT PRIMARY KEY, \
             applied_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(), \
             description TEXT)",
        )
        .execute(&mut *tx)
        .await
        .map_err(map_error)?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT version FROM schema_versions ORDER BY applied_at DESC, version DESC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_error)?;
        match current {
            Some(version) if version != change.from_version => {
                return Err(StoreError::Query(format!(
                    "schema is at {version}, change expects {}",
                    change.from_version
                )));
            }
            Some(_) => {}
            None => {
                sqlx::query("INSERT INTO schema_versions (version, description) VALUES ($1, 'Initial schema')")
                    .bind(&change.from_version)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_error)?;
            }
        }

        sqlx::query(&format!(
            "ALTER TABLE {ENTITIES_TABLE} ADD COLUMN IF NOT EXISTS {column} TEXT"
        ))
        .execute(&mut *tx)
        .await
        .map_err(map_error)?;
        sqlx::query("INSERT INTO schema_versions (version, description) VALUES ($1, $2)")
            .bind(&change.to_version)
            .bind(&change.description)
            .execute(&mut *tx)
            .await
            .map_err(violation_or_error)?;

        tx.commit().await.map_err(map_error)?;
        info!(from = %change.from_version, to = %change.to_version, "Schema change applied");
        Ok(())
    }

    async fn revert_schema_change(&self, change: &SchemaChange) -> StoreResult<()> {
        let column = identifier(&change.column)?;
        let mut tx = self.begin().await?;
        sqlx::query(&format!("ALTER TABLE {ENTITIES_TABLE} DROP COLUMN IF EXISTS {column}"))
            .execute(&mut *tx)
            .await
            .map_err(map_error)?;
        sqlx::query("DROP TABLE IF EXISTS schema_versions")
            .execute(&mut *tx)
            .await
            .map_err(map_error)?;
        tx.commit().await.map_err(map_error)
    }

    async fn backfill_column(&self, tenant: &TenantRef, column: &str, value: &str) -> StoreResult<u64> {
        let column = identifier(column)?;
        let result = sqlx::query(&format!(
            "UPDATE {ENTITIES_TABLE} SET {column} = $3 \
             WHERE actor_type = $1 AND actor_id = $2 AND deleted_at IS NULL"
        ))
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(map_error)?;
        Ok(result.rows_affected())
    }

    async fn count_backfilled(&self, tenant: &TenantRef, column: &str, value: &str) -> StoreResult<u64> {
        let column = identifier(column)?;
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {ENTITIES_TABLE} \
             WHERE actor_type = $1 AND actor_id = $2 AND {column} = $3"
        ))
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .bind(value)
        .fetch_one(&self.pool)
        .await
        .map_err(map_error)?;
        Ok(count.max(0) as u64)
    }

    async fn maintenance_probe(&self, op: MaintenanceOp) -> StoreResult<u64> {
        let sql = match op {
            MaintenanceOp::VacuumStatistics => format!(
                "SELECT COUNT(*) FROM pg_stat_user_tables WHERE relname IN {MAINTAINED_TABLES}"
            ),
            MaintenanceOp::AnalyzeStatistics => format!(
                "SELECT COALESCE(SUM(n_live_tup + n_dead_tup), 0)::BIGINT \
                 FROM pg_stat_user_tables WHERE relname IN {MAINTAINED_TABLES}"
            ),
            MaintenanceOp::IndexStatistics => format!(
                "SELECT COUNT(*) FROM pg_stat_user_indexes WHERE relname IN {MAINTAINED_TABLES}"
            ),
        };
        let rows: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(map_error)?;
        Ok(rows.max(0) as u64)
    }

    async fn export_tenant(&self, tenant: &TenantRef) -> StoreResult<GraphSnapshot> {
        let entity_rows = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM {ENTITIES_TABLE} \
             WHERE actor_type = $1 AND actor_id = $2 ORDER BY created_at, id"
        ))
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_error)?;
        let relation_rows = sqlx::query(&format!(
            "SELECT {RELATION_COLUMNS} FROM {RELATIONS_TABLE} \
             WHERE actor_type = $1 AND actor_id = $2 ORDER BY created_at, id"
        ))
        .bind(tenant.actor_type.as_str())
        .bind(&tenant.actor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_error)?;

        Ok(GraphSnapshot {
            tenant: tenant.clone(),
            exported_at: Utc::now(),
            entities: entity_rows
                .iter()
                .map(entity_from_row)
                .collect::<StoreResult<_>>()?,
            relations: relation_rows
                .iter()
                .map(relation_from_row)
                .collect::<StoreResult<_>>()?,
        })
    }

    async fn import_snapshot(&self, snapshot: &GraphSnapshot) -> StoreResult<ImportSummary> {
        let mut tx = self.begin().await?;
        for entity in &snapshot.entities {
            insert_entity_query(entity)
                .execute(&mut *tx)
                .await
                .map_err(violation_or_error)?;
        }
        for relation in &snapshot.relations {
            insert_relation_query(relation)
                .execute(&mut *tx)
                .await
                .map_err(violation_or_error)?;
        }
        tx.commit().await.map_err(map_error)?;
        Ok(ImportSummary {
            entities: snapshot.entities.len() as u64,
            relations: snapshot.relations.len() as u64,
        })
    }
}
