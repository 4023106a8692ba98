// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scoped fault injection and recovery testing.
//!
//! Faults are injected by wrapping a collaborator: [`FaultInjectingStore`],
//! [`FaultInjectingProbe`] and [`FaultInjectingResources`] forward every call
//! to the wrapped implementation unless a fault is armed in their
//! [`FaultSlot`]. Arming returns a [`FaultGuard`]; the fault is active until
//! the guard is dropped, so the scope of a fault is the scope of a binding.
//!
//! An armed fault may carry a failure budget. Once the budget is spent the
//! wrapper stops failing, which lets a retry loop observe recovery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memory_validation_core::config::ValidationConfig;
use memory_validation_core::details::{
    ConflictDetails, Details, ExecutionFailure, ExhaustionDetails, ExhaustionObservation,
    RecoveryMetrics, RollbackDetails,
};
use memory_validation_core::error::{CheckError, HttpError, StoreError};
use memory_validation_core::fixtures::TestDataGenerator;
use memory_validation_core::http::{HttpMethod, HttpProbe, HttpResponse};
use memory_validation_core::model::ValidationResult;
use memory_validation_core::resources::{ResourceProbe, ResourceSnapshot};
use memory_validation_core::stats::duration_ms;
use memory_validation_core::store::{
    purge_tenant, EntityFilter, EntityPatch, EntityQuery, EntityRecord, GraphSnapshot,
    ImportSummary, InsertOutcome, MaintenanceOp, MemoryStore, RelationPatch, RelationRecord,
    SchemaChange, StoreResult, TenantRef, WriteStep,
};
use memory_validation_core::validator::{
    best_effort, BaseValidator, CheckOutcome, CheckResult, Validator,
};
use memory_validation_core::ValidatorError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Probability that a call fails while an intermittent network fault is armed.
pub const INTERMITTENT_FAILURE_PROBABILITY: f64 = 0.5;

/// Utilization every exhaustion fault reports.
pub const EXHAUSTED_UTILIZATION_PERCENT: f64 = 95.0;

/// Store failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// Every call fails as if the connection dropped.
    ConnectionLost,
    /// Every call stalls past the timeout, then fails.
    Timeout,
    /// Every call is chosen as a deadlock victim.
    Deadlock,
    /// Every call is refused for lack of a pooled connection.
    PoolExhausted,
}

impl StoreFault {
    /// Mode name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreFault::ConnectionLost => "connection_lost",
            StoreFault::Timeout => "timeout",
            StoreFault::Deadlock => "deadlock",
            StoreFault::PoolExhausted => "pool_exhausted",
        }
    }
}

/// Network failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFault {
    /// Every request is refused.
    ConnectionRefused,
    /// Every request stalls past the timeout, then fails.
    Timeout,
    /// Each request fails with [`INTERMITTENT_FAILURE_PROBABILITY`].
    Intermittent,
}

impl NetworkFault {
    /// Mode name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkFault::ConnectionRefused => "connection_refused",
            NetworkFault::Timeout => "timeout",
            NetworkFault::Intermittent => "intermittent",
        }
    }
}

/// Resource exhaustion modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFault {
    /// System memory reads as nearly full.
    Memory,
    /// The store's connection pool is exhausted.
    Connections,
    /// The disk reads as nearly full.
    Disk,
}

impl ResourceFault {
    /// Every mode, in test order.
    pub const ALL: [ResourceFault; 3] = [
        ResourceFault::Memory,
        ResourceFault::Connections,
        ResourceFault::Disk,
    ];

    /// Mode name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceFault::Memory => "memory",
            ResourceFault::Connections => "connections",
            ResourceFault::Disk => "disk",
        }
    }

    /// Utilization of the exhausted resource in `reading`.
    pub fn utilization(&self, reading: &ResourceSnapshot) -> f64 {
        match self {
            ResourceFault::Memory => reading.system_memory_percent,
            ResourceFault::Connections => 100.0,
            ResourceFault::Disk => reading.disk_percent,
        }
    }
}

#[derive(Debug)]
struct Armed<F> {
    fault: F,
    remaining: Option<u32>,
}

/// Holder of at most one armed fault.
#[derive(Debug)]
pub struct FaultSlot<F> {
    armed: Mutex<Option<Armed<F>>>,
}

impl<F> Default for FaultSlot<F> {
    fn default() -> Self {
        Self {
            armed: Mutex::new(None),
        }
    }
}

impl<F: Copy> FaultSlot<F> {
    /// Arm `fault` until the returned guard is dropped.
    ///
    /// With `Some(n)` the fault fires at most `n` times and is harmless
    /// afterwards; with `None` it fires for the whole scope.
    pub fn arm(&self, fault: F, budget: Option<u32>) -> FaultGuard<'_, F> {
        if let Ok(mut slot) = self.armed.lock() {
            *slot = Some(Armed {
                fault,
                remaining: budget,
            });
        }
        FaultGuard { slot: self }
    }

    /// The armed fault, spent or not.
    pub fn armed(&self) -> Option<F> {
        self.armed
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|a| a.fault))
    }

    /// Fire the armed fault if its budget allows and `fires` agrees.
    fn trip_with(&self, fires: impl FnOnce(F) -> bool) -> Option<F> {
        let mut slot = self.armed.lock().ok()?;
        let armed = slot.as_mut()?;
        if armed.remaining == Some(0) || !fires(armed.fault) {
            return None;
        }
        if let Some(remaining) = armed.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(armed.fault)
    }

    fn trip(&self) -> Option<F> {
        self.trip_with(|_| true)
    }

    fn disarm(&self) {
        if let Ok(mut slot) = self.armed.lock() {
            *slot = None;
        }
    }
}

/// Keeps a fault armed while alive.
#[must_use = "the fault is disarmed as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FaultGuard<'a, F: Copy> {
    slot: &'a FaultSlot<F>,
}

impl<F: Copy> Drop for FaultGuard<'_, F> {
    fn drop(&mut self) {
        self.slot.disarm();
    }
}

/// [`MemoryStore`] wrapper that fails every call while a fault is armed.
pub struct FaultInjectingStore {
    inner: Arc<dyn MemoryStore>,
    faults: FaultSlot<StoreFault>,
    stall: Duration,
}

impl std::fmt::Debug for FaultInjectingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjectingStore")
            .field("faults", &self.faults)
            .field("stall", &self.stall)
            .finish()
    }
}

impl FaultInjectingStore {
    /// Wrap `inner`; timeouts stall for `stall` before failing.
    pub fn new(inner: Arc<dyn MemoryStore>, stall: Duration) -> Self {
        Self {
            inner,
            faults: FaultSlot::default(),
            stall,
        }
    }

    /// The fault slot.
    pub fn faults(&self) -> &FaultSlot<StoreFault> {
        &self.faults
    }

    async fn gate(&self) -> StoreResult<()> {
        let Some(fault) = self.faults.trip() else {
            return Ok(());
        };
        debug!(fault = fault.as_str(), "Injecting store fault");
        match fault {
            StoreFault::ConnectionLost => Err(StoreError::ConnectionLost(
                "server closed the connection unexpectedly".to_string(),
            )),
            StoreFault::Timeout => {
                tokio::time::sleep(self.stall).await;
                Err(StoreError::Timeout(self.stall))
            }
            StoreFault::Deadlock => Err(StoreError::Deadlock(
                "process was chosen as deadlock victim".to_string(),
            )),
            StoreFault::PoolExhausted => Err(StoreError::ResourceExhausted {
                resource: "connections".to_string(),
                message: "Connection pool exhausted".to_string(),
            }),
        }
    }
}

#[async_trait]
impl MemoryStore for FaultInjectingStore {
    async fn ping(&self) -> StoreResult<()> {
        self.gate().await?;
        self.inner.ping().await
    }

    async fn check_tables(&self, tables: &[&str]) -> StoreResult<Vec<String>> {
        self.gate().await?;
        self.inner.check_tables(tables).await
    }

    async fn table_columns(&self, table: &str) -> StoreResult<Vec<String>> {
        self.gate().await?;
        self.inner.table_columns(table).await
    }

    async fn insert_entity(&self, entity: &EntityRecord) -> StoreResult<InsertOutcome> {
        self.gate().await?;
        self.inner.insert_entity(entity).await
    }

    async fn insert_entities(&self, entities: &[EntityRecord]) -> StoreResult<u64> {
        self.gate().await?;
        self.inner.insert_entities(entities).await
    }

    async fn get_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<Option<EntityRecord>> {
        self.gate().await?;
        self.inner.get_entity(tenant, id).await
    }

    async fn update_entity(
        &self,
        tenant: &TenantRef,
        id: Uuid,
        patch: &EntityPatch,
    ) -> StoreResult<Option<EntityRecord>> {
        self.gate().await?;
        self.inner.update_entity(tenant, id, patch).await
    }

    async fn soft_delete_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.soft_delete_entity(tenant, id).await
    }

    async fn delete_entity(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.delete_entity(tenant, id).await
    }

    async fn query_entities(
        &self,
        tenant: &TenantRef,
        query: &EntityQuery,
    ) -> StoreResult<Vec<EntityRecord>> {
        self.gate().await?;
        self.inner.query_entities(tenant, query).await
    }

    async fn count_entities(&self, tenant: &TenantRef, filter: &EntityFilter) -> StoreResult<u64> {
        self.gate().await?;
        self.inner.count_entities(tenant, filter).await
    }

    async fn insert_relation(&self, relation: &RelationRecord) -> StoreResult<InsertOutcome> {
        self.gate().await?;
        self.inner.insert_relation(relation).await
    }

    async fn get_relation(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<Option<RelationRecord>> {
        self.gate().await?;
        self.inner.get_relation(tenant, id).await
    }

    async fn update_relation(
        &self,
        tenant: &TenantRef,
        id: Uuid,
        patch: &RelationPatch,
    ) -> StoreResult<Option<RelationRecord>> {
        self.gate().await?;
        self.inner.update_relation(tenant, id, patch).await
    }

    async fn soft_delete_relation(&self, tenant: &TenantRef, id: Uuid) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.soft_delete_relation(tenant, id).await
    }

    async fn list_relations(&self, tenant: &TenantRef) -> StoreResult<Vec<RelationRecord>> {
        self.gate().await?;
        self.inner.list_relations(tenant).await
    }

    async fn count_orphaned_relations(&self, tenant: &TenantRef) -> StoreResult<u64> {
        self.gate().await?;
        self.inner.count_orphaned_relations(tenant).await
    }

    async fn delete_tenant_batch(&self, tenant: &TenantRef, limit: u64) -> StoreResult<u64> {
        self.gate().await?;
        self.inner.delete_tenant_batch(tenant, limit).await
    }

    async fn purge_stale_entities(
        &self,
        tenant: &TenantRef,
        entity_type: &str,
        grade_below: f64,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.gate().await?;
        self.inner
            .purge_stale_entities(tenant, entity_type, grade_below, updated_before)
            .await
    }

    async fn decay_grades(
        &self,
        tenant: &TenantRef,
        factor: f64,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.gate().await?;
        self.inner.decay_grades(tenant, factor, updated_before).await
    }

    async fn atomic_write(&self, steps: &[WriteStep]) -> StoreResult<u64> {
        self.gate().await?;
        self.inner.atomic_write(steps).await
    }

    async fn schema_version(&self) -> StoreResult<Option<String>> {
        self.gate().await?;
        self.inner.schema_version().await
    }

    async fn apply_schema_change(&self, change: &SchemaChange) -> StoreResult<()> {
        self.gate().await?;
        self.inner.apply_schema_change(change).await
    }

    async fn revert_schema_change(&self, change: &SchemaChange) -> StoreResult<()> {
        self.gate().await?;
        self.inner.revert_schema_change(change).await
    }

    async fn backfill_column(&self, tenant: &TenantRef, column: &str, value: &str) -> StoreResult<u64> {
        self.gate().await?;
        self.inner.backfill_column(tenant, column, value).await
    }

    async fn count_backfilled(&self, tenant: &TenantRef, column: &str, value: &str) -> StoreResult<u64> {
        self.gate().await?;
        self.inner.count_backfilled(tenant, column, value).await
    }

    async fn maintenance_probe(&self, op: MaintenanceOp) -> StoreResult<u64> {
        self.gate().await?;
        self.inner.maintenance_probe(op).await
    }

    async fn export_tenant(&self, tenant: &TenantRef) -> StoreResult<GraphSnapshot> {
        self.gate().await?;
        self.inner.export_tenant(tenant).await
    }

    async fn import_snapshot(&self, snapshot: &GraphSnapshot) -> StoreResult<ImportSummary> {
        self.gate().await?;
        self.inner.import_snapshot(snapshot).await
    }
}

/// [`HttpProbe`] wrapper that fails requests while a fault is armed.
///
/// While an intermittent fault is armed, requests it lets through are
/// answered locally with `200 {"status": "success"}`, so the outcome depends
/// only on the injected failures.
pub struct FaultInjectingProbe {
    inner: Arc<dyn HttpProbe>,
    faults: FaultSlot<NetworkFault>,
    stall: Duration,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for FaultInjectingProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjectingProbe")
            .field("faults", &self.faults)
            .field("stall", &self.stall)
            .finish()
    }
}

impl FaultInjectingProbe {
    /// Wrap `inner`; the intermittent mode draws from a generator seeded with `seed`.
    pub fn new(inner: Arc<dyn HttpProbe>, stall: Duration, seed: u64) -> Self {
        Self {
            inner,
            faults: FaultSlot::default(),
            stall,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// The fault slot.
    pub fn faults(&self) -> &FaultSlot<NetworkFault> {
        &self.faults
    }

    fn coin_flip(&self) -> bool {
        self.rng
            .lock()
            .map(|mut rng| rng.gen_bool(INTERMITTENT_FAILURE_PROBABILITY))
            .unwrap_or(true)
    }

    /// `Some` when the request is answered by the fault layer.
    async fn gate(&self, url: &str) -> Option<Result<HttpResponse, HttpError>> {
        let fired = self.faults.trip_with(|fault| match fault {
            NetworkFault::Intermittent => self.coin_flip(),
            _ => true,
        });
        match fired {
            Some(NetworkFault::ConnectionRefused) | Some(NetworkFault::Intermittent) => {
                debug!(url, "Injecting connection refusal");
                Some(Err(HttpError::ConnectionRefused(url.to_string())))
            }
            Some(NetworkFault::Timeout) => {
                tokio::time::sleep(self.stall).await;
                Some(Err(HttpError::Timeout(self.stall)))
            }
            None if self.faults.armed() == Some(NetworkFault::Intermittent) => Some(Ok(
                HttpResponse::json(200, &json!({"status": "success"})),
            )),
            None => None,
        }
    }
}

#[async_trait]
impl HttpProbe for FaultInjectingProbe {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, HttpError> {
        match self.gate(url).await {
            Some(answer) => answer,
            None => self.inner.get(url, headers).await,
        }
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, HttpError> {
        match self.gate(url).await {
            Some(answer) => answer,
            None => self.inner.post_json(url, body).await,
        }
    }

    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<HttpResponse, HttpError> {
        match self.gate(url).await {
            Some(answer) => answer,
            None => self.inner.request(method, url, body).await,
        }
    }
}

/// [`ResourceProbe`] wrapper reporting an exhausted resource while a fault is armed.
pub struct FaultInjectingResources {
    inner: Arc<dyn ResourceProbe>,
    faults: FaultSlot<ResourceFault>,
}

impl std::fmt::Debug for FaultInjectingResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjectingResources")
            .field("faults", &self.faults)
            .finish()
    }
}

impl FaultInjectingResources {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn ResourceProbe>) -> Self {
        Self {
            inner,
            faults: FaultSlot::default(),
        }
    }

    /// The fault slot.
    pub fn faults(&self) -> &FaultSlot<ResourceFault> {
        &self.faults
    }
}

impl ResourceProbe for FaultInjectingResources {
    fn snapshot(&self) -> ResourceSnapshot {
        let mut reading = self.inner.snapshot();
        match self.faults.armed() {
            Some(ResourceFault::Memory) => {
                reading.system_memory_percent = EXHAUSTED_UTILIZATION_PERCENT;
                reading.memory_percent = EXHAUSTED_UTILIZATION_PERCENT;
            }
            Some(ResourceFault::Disk) => reading.disk_percent = EXHAUSTED_UTILIZATION_PERCENT,
            Some(ResourceFault::Connections) | None => {}
        }
        reading
    }
}

/// Backoff slept before `attempt` (zero-based): `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Retry `operation` up to `max_attempts` times with exponential backoff.
///
/// No delay precedes the first attempt; attempt `i > 0` is preceded by
/// [`backoff_delay`]`(base_delay, i)`. Stops at the first success.
pub async fn recover_with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut operation: F,
) -> (RecoveryMetrics, Option<T>)
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let mut metrics = RecoveryMetrics {
        recovery_attempts: 0,
        recovery_successful: false,
        recovery_time_ms: 0.0,
        max_attempts,
        backoff_delays_ms: Vec::new(),
        last_error: None,
    };
    let mut value = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = backoff_delay(base_delay, attempt);
            metrics.backoff_delays_ms.push(duration_ms(delay));
            tokio::time::sleep(delay).await;
        }
        metrics.recovery_attempts += 1;
        match operation(attempt).await {
            Ok(v) => {
                metrics.recovery_successful = true;
                value = Some(v);
                break;
            }
            Err(err) => {
                warn!(attempt = attempt + 1, error = %err, "Recovery attempt failed");
                metrics.last_error = Some(err.to_string());
            }
        }
    }

    metrics.recovery_time_ms = duration_ms(start.elapsed());
    (metrics, value)
}

/// Fault-injection validator.
///
/// Runs its checks against fault-injecting wrappers of the collaborators it
/// is given and keeps the metrics of every scenario for later reporting.
pub struct ErrorSimulator {
    store: Arc<FaultInjectingStore>,
    http: Arc<FaultInjectingProbe>,
    resources: Arc<FaultInjectingResources>,
    health_url: String,
    max_attempts: u32,
    retry_delay: Duration,
    failure_budget: Option<u32>,
    conflict_writers: u32,
    conflict_hold: Duration,
    exhaustion_batch: usize,
    cleanup_batch_size: u64,
    generator: Mutex<TestDataGenerator>,
    recovery_metrics: Mutex<BTreeMap<String, Details>>,
}

impl std::fmt::Debug for ErrorSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSimulator")
            .field("health_url", &self.health_url)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("failure_budget", &self.failure_budget)
            .finish()
    }
}

impl ErrorSimulator {
    /// Simulator over the given collaborators, configured from `config`.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        http: Arc<dyn HttpProbe>,
        resources: Arc<dyn ResourceProbe>,
        config: &ValidationConfig,
    ) -> Self {
        let stall = config.timeout() + Duration::from_secs(1);
        Self {
            store: Arc::new(FaultInjectingStore::new(store, stall)),
            http: Arc::new(FaultInjectingProbe::new(http, stall, 17)),
            resources: Arc::new(FaultInjectingResources::new(resources)),
            health_url: format!("{}/health", config.internal_api_url.trim_end_matches('/')),
            max_attempts: config.max_retry_attempts,
            retry_delay: config.retry_delay(),
            failure_budget: Some(1),
            conflict_writers: 3,
            conflict_hold: Duration::from_millis(100),
            exhaustion_batch: 10,
            cleanup_batch_size: config.cleanup_batch_size,
            generator: Mutex::new(TestDataGenerator::new(99)),
            recovery_metrics: Mutex::new(BTreeMap::new()),
        }
    }

    /// Failures each recovery fault injects before healing; `None` never heals.
    pub fn with_failure_budget(mut self, budget: Option<u32>) -> Self {
        self.failure_budget = budget;
        self
    }

    /// Reseed the intermittent network fault.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.http = Arc::new(FaultInjectingProbe::new(
            Arc::clone(&self.http.inner),
            self.http.stall,
            seed,
        ));
        self
    }

    /// The fault-injecting store the checks run against.
    pub fn store(&self) -> &Arc<FaultInjectingStore> {
        &self.store
    }

    /// The fault-injecting HTTP probe the checks run against.
    pub fn http(&self) -> &Arc<FaultInjectingProbe> {
        &self.http
    }

    /// The fault-injecting resource probe the checks run against.
    pub fn resources(&self) -> &Arc<FaultInjectingResources> {
        &self.resources
    }

    /// Metrics of every scenario run so far, keyed by scenario.
    pub fn recovery_metrics(&self) -> BTreeMap<String, Details> {
        self.recovery_metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn record_metrics(&self, scenario: &str, details: impl Into<Details>) {
        if let Ok(mut metrics) = self.recovery_metrics.lock() {
            metrics.insert(scenario.to_string(), details.into());
        }
    }

    fn people(&self, tenant: &TenantRef, count: usize) -> Vec<EntityRecord> {
        match self.generator.lock() {
            Ok(mut generator) => generator.people(tenant, count),
            Err(_) => TestDataGenerator::new(99).people(tenant, count),
        }
    }

    async fn teardown(&self, tenant: &TenantRef) -> Option<u64> {
        best_effort(
            "error simulation fixtures",
            purge_tenant(self.store.as_ref(), tenant, self.cleanup_batch_size),
        )
        .await
    }

    fn judge_recovery(metrics: RecoveryMetrics) -> CheckOutcome {
        if metrics.recovery_successful {
            CheckOutcome::passed(metrics)
        } else {
            let message = format!(
                "Failed to recover after {} attempts: {}",
                metrics.recovery_attempts,
                metrics.last_error.as_deref().unwrap_or("no attempt was made")
            );
            CheckOutcome::failed(message, metrics)
        }
    }

    /// Retry a ping through a lost connection.
    pub async fn test_database_connection_recovery(&self) -> CheckResult {
        self.store.ping().await?;

        let metrics = {
            let _fault = self
                .store
                .faults()
                .arm(StoreFault::ConnectionLost, self.failure_budget);
            let store = Arc::clone(&self.store);
            let (metrics, _) = recover_with_backoff(self.max_attempts, self.retry_delay, |_| {
                let store = Arc::clone(&store);
                async move { store.ping().await }
            })
            .await;
            metrics
        };

        info!(
            attempts = metrics.recovery_attempts,
            recovered = metrics.recovery_successful,
            "Database connection recovery finished"
        );
        self.record_metrics("database_connection", metrics.clone());
        Ok(Self::judge_recovery(metrics))
    }

    /// Retry the health endpoint over an intermittent network.
    pub async fn test_network_failure_recovery(&self) -> CheckResult {
        let metrics = {
            let _fault = self
                .http
                .faults()
                .arm(NetworkFault::Intermittent, self.failure_budget);
            let http = Arc::clone(&self.http);
            let url = self.health_url.clone();
            let (metrics, _) = recover_with_backoff(self.max_attempts, self.retry_delay, |_| {
                let http = Arc::clone(&http);
                let url = url.clone();
                async move {
                    let response = http.get(&url, &[]).await?;
                    if response.status == 200 {
                        Ok::<_, HttpError>(response)
                    } else {
                        Err(HttpError::Request(format!("HTTP {}", response.status)))
                    }
                }
            })
            .await;
            metrics
        };

        self.record_metrics("network_failure", metrics.clone());
        Ok(Self::judge_recovery(metrics))
    }

    /// Run a small write batch under each exhaustion mode.
    ///
    /// Completing the work or refusing it with a resource error both pass;
    /// any other error counts as a crash.
    pub async fn test_resource_exhaustion_handling(&self) -> CheckResult {
        let mut scenarios = BTreeMap::new();

        for mode in ResourceFault::ALL {
            let tenant = TenantRef::fresh("resource_test");
            let entities = self.people(&tenant, self.exhaustion_batch);

            let (reading, outcome) = {
                let _pressure = self.resources.faults().arm(mode, None);
                let _pool = (mode == ResourceFault::Connections)
                    .then(|| self.store.faults().arm(StoreFault::PoolExhausted, None));
                let reading = self.resources.snapshot();
                (reading, self.store.insert_entities(&entities).await)
            };
            self.teardown(&tenant).await;

            let observation = match outcome {
                Ok(_) => ExhaustionObservation {
                    graceful_degradation: true,
                    error_handling_correct: false,
                    system_crashed: false,
                    reported_utilization_percent: mode.utilization(&reading),
                    error: None,
                },
                Err(err) => ExhaustionObservation {
                    graceful_degradation: false,
                    error_handling_correct: err.is_resource_exhaustion(),
                    system_crashed: !err.is_resource_exhaustion(),
                    reported_utilization_percent: mode.utilization(&reading),
                    error: Some(err.to_string()),
                },
            };
            debug!(mode = mode.as_str(), ?observation, "Exhaustion scenario finished");
            scenarios.insert(mode.as_str().to_string(), observation);
        }

        let crashed: Vec<String> = scenarios
            .iter()
            .filter(|(_, o)| !(o.graceful_degradation || o.error_handling_correct))
            .map(|(mode, _)| mode.clone())
            .collect();
        let details = ExhaustionDetails { scenarios };
        self.record_metrics("resource_exhaustion", details.clone());

        if crashed.is_empty() {
            Ok(CheckOutcome::passed(details))
        } else {
            Ok(CheckOutcome::failed(
                format!(
                    "System did not handle resource exhaustion gracefully: {}",
                    crashed.join(", ")
                ),
                details,
            ))
        }
    }

    /// Force a failure in the middle of a write sequence and expect nothing to persist.
    pub async fn test_transaction_rollback_on_failure(&self) -> CheckResult {
        const STEPS: usize = 5;
        const FAILING_STEP: usize = 3;

        let tenant = TenantRef::fresh("rollback_test");
        let steps: Vec<WriteStep> = self
            .people(&tenant, STEPS)
            .into_iter()
            .enumerate()
            .map(|(i, entity)| {
                if i + 1 == FAILING_STEP {
                    WriteStep::Abort(format!("Simulated failure at step {FAILING_STEP}"))
                } else {
                    WriteStep::Insert(entity)
                }
            })
            .collect();

        let result = self.verify_rollback(&tenant, &steps).await;
        self.teardown(&tenant).await;
        let details = match result {
            Ok(details) => details,
            Err(err) => {
                self.record_metrics(
                    "transaction_rollback",
                    ExecutionFailure {
                        validator: self.name().to_string(),
                    },
                );
                return Err(err);
            }
        };
        self.record_metrics("transaction_rollback", details.clone());

        if details.store_error.is_empty() {
            return Ok(CheckOutcome::failed(
                format!(
                    "Write sequence committed despite the injected failure - {} entities remain",
                    details.remaining_rows
                ),
                details,
            ));
        }
        if details.remaining_rows == 0 {
            Ok(CheckOutcome::passed(details))
        } else {
            Ok(CheckOutcome::failed(
                format!("Rollback failed - {} entities remain", details.remaining_rows),
                details,
            ))
        }
    }

    async fn verify_rollback(
        &self,
        tenant: &TenantRef,
        steps: &[WriteStep],
    ) -> Result<RollbackDetails, CheckError> {
        let failed_step = steps
            .iter()
            .position(|s| matches!(s, WriteStep::Abort(_)))
            .map_or(0, |i| i + 1);
        let store_error = match self.store.atomic_write(steps).await {
            Ok(written) => {
                warn!(written, "Write sequence committed despite the injected failure");
                String::new()
            }
            Err(err) => err.to_string(),
        };
        let remaining_rows = self.store.count_entities(tenant, &EntityFilter::All).await?;

        Ok(RollbackDetails {
            batch_id: tenant.actor_id.clone(),
            steps_planned: steps.len(),
            failed_step,
            remaining_rows,
            store_error,
        })
    }

    /// Several writers read, hold and rewrite the same record.
    pub async fn test_concurrent_operation_conflicts(&self) -> CheckResult {
        let tenant = TenantRef::fresh("conflict_test");
        let entity = EntityRecord::new(&tenant, "Conflict Test Entity", "test")
            .with_metadata(json!({"version": 1}));

        let result = self.run_conflicting_writers(&tenant, &entity).await;
        self.teardown(&tenant).await;
        let details = result?;
        self.record_metrics("concurrent_conflicts", details.clone());

        if !details.record_intact {
            return Ok(CheckOutcome::failed(
                "Record was unreadable or malformed after concurrent updates",
                details,
            ));
        }
        if details.conflict_detected && !details.conflict_resolved {
            return Ok(CheckOutcome::failed(
                format!(
                    "All {} concurrent updates failed",
                    details.failed_updates
                ),
                details,
            ));
        }
        if details.lost_updates > 0 {
            info!(lost_updates = details.lost_updates, "Concurrent writers overwrote each other");
        }
        Ok(CheckOutcome::passed(details))
    }

    async fn run_conflicting_writers(
        &self,
        tenant: &TenantRef,
        entity: &EntityRecord,
    ) -> Result<ConflictDetails, CheckError> {
        self.store.insert_entity(entity).await?;

        let handles: Vec<_> = (0..self.conflict_writers)
            .map(|i| {
                let store = Arc::clone(&self.store);
                let tenant = tenant.clone();
                let id = entity.id;
                let hold = self.conflict_hold;
                tokio::spawn(async move {
                    let current = store
                        .get_entity(&tenant, id)
                        .await?
                        .ok_or_else(|| StoreError::Query(format!("entity {id} vanished")))?;
                    let mut metadata = current.metadata;
                    if let Some(fields) = metadata.as_object_mut() {
                        fields.insert(format!("update_{i}"), json!(format!("value_{i}")));
                    }
                    tokio::time::sleep(hold).await;
                    let patch = EntityPatch {
                        metadata: Some(metadata),
                        ..EntityPatch::default()
                    };
                    store
                        .update_entity(&tenant, id, &patch)
                        .await?
                        .ok_or_else(|| StoreError::Query(format!("entity {id} vanished")))?;
                    Ok::<u32, StoreError>(i)
                })
            })
            .collect();

        let mut committed = Vec::new();
        let mut failed_updates = 0;
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Ok(writer)) => committed.push(writer),
                Ok(Err(err)) => {
                    warn!(error = %err, "Concurrent update failed");
                    failed_updates += 1;
                }
                Err(err) => {
                    warn!(error = %err, "Concurrent update task failed");
                    failed_updates += 1;
                }
            }
        }

        let final_record = self.store.get_entity(tenant, entity.id).await?;
        let record_intact = final_record
            .as_ref()
            .is_some_and(|e| !e.is_deleted() && e.metadata.is_object());
        let lost_updates = match &final_record {
            Some(record) => committed
                .iter()
                .filter(|w| record.metadata.get(format!("update_{w}")).is_none())
                .count() as u32,
            None => committed.len() as u32,
        };
        let successful_updates = committed.len() as u32;

        Ok(ConflictDetails {
            successful_updates,
            failed_updates,
            lost_updates,
            conflict_detected: failed_updates > 0,
            conflict_resolved: successful_updates > 0,
            record_intact,
        })
    }
}

#[async_trait]
impl Validator for ErrorSimulator {
    fn name(&self) -> &str {
        "ErrorSimulator"
    }

    async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
        let mut base = BaseValidator::new(self.name());

        base.run_test("database_connection_recovery", || {
            self.test_database_connection_recovery()
        })
        .await;
        base.run_test("transaction_rollback_on_failure", || {
            self.test_transaction_rollback_on_failure()
        })
        .await;
        base.run_test("network_failure_recovery", || self.test_network_failure_recovery())
            .await;
        base.run_test("resource_exhaustion_handling", || {
            self.test_resource_exhaustion_handling()
        })
        .await;
        base.run_test("concurrent_operation_conflicts", || {
            self.test_concurrent_operation_conflicts()
        })
        .await;

        Ok(base.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_validation_core::http::StubHttpProbe;
    use memory_validation_core::model::Status;
    use memory_validation_core::resources::FixedResourceProbe;
    use memory_validation_core::store::InMemoryStore;

    fn config() -> ValidationConfig {
        ValidationConfig {
            max_retry_attempts: 3,
            retry_delay_seconds: 1.0,
            ..ValidationConfig::default()
        }
    }

    fn simulator(store: Arc<dyn MemoryStore>) -> ErrorSimulator {
        ErrorSimulator::new(
            store,
            Arc::new(StubHttpProbe::new()),
            Arc::new(FixedResourceProbe::default()),
            &config(),
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(250);
        let delays: Vec<_> = (0..4).map(|i| backoff_delay(base, i)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ]
        );
    }

    #[test]
    fn test_fault_slot_budget_and_guard() {
        let slot = FaultSlot::default();
        {
            let _guard = slot.arm(StoreFault::Deadlock, Some(2));
            assert_eq!(slot.trip(), Some(StoreFault::Deadlock));
            assert_eq!(slot.trip(), Some(StoreFault::Deadlock));
            assert_eq!(slot.trip(), None);
            assert_eq!(slot.armed(), Some(StoreFault::Deadlock));
        }
        assert_eq!(slot.armed(), None);
        assert_eq!(slot.trip(), None);
    }

    #[tokio::test]
    async fn test_store_faults_are_scoped() {
        let store = FaultInjectingStore::new(Arc::new(InMemoryStore::new()), Duration::from_secs(1));
        {
            let _fault = store.faults().arm(StoreFault::ConnectionLost, None);
            assert!(matches!(store.ping().await, Err(StoreError::ConnectionLost(_))));
            assert!(matches!(store.ping().await, Err(StoreError::ConnectionLost(_))));
        }
        assert!(store.ping().await.is_ok());

        let _fault = store.faults().arm(StoreFault::PoolExhausted, None);
        let err = store.ping().await.unwrap_err();
        assert!(err.is_resource_exhaustion());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_stalls_before_failing() {
        let stall = Duration::from_secs(31);
        let store = FaultInjectingStore::new(Arc::new(InMemoryStore::new()), stall);
        let _fault = store.faults().arm(StoreFault::Timeout, Some(1));

        let start = tokio::time::Instant::now();
        assert_eq!(store.ping().await, Err(StoreError::Timeout(stall)));
        assert!(start.elapsed() >= stall);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_records_backoff_and_stops_on_success() {
        let start = tokio::time::Instant::now();
        let (metrics, value) =
            recover_with_backoff(5, Duration::from_secs(1), |attempt| async move {
                if attempt < 2 {
                    Err(format!("attempt {attempt} refused"))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(value, Some(2));
        assert!(metrics.recovery_successful);
        assert_eq!(metrics.recovery_attempts, 3);
        assert_eq!(metrics.backoff_delays_ms, vec![2000.0, 4000.0]);
        assert_eq!(metrics.last_error.as_deref(), Some("attempt 1 refused"));
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_gives_up_after_max_attempts() {
        let (metrics, value) = recover_with_backoff(3, Duration::from_millis(10), |_| async {
            Err::<(), _>(StoreError::ConnectionLost("gone".into()))
        })
        .await;
        assert!(value.is_none());
        assert!(!metrics.recovery_successful);
        assert_eq!(metrics.recovery_attempts, 3);
        assert_eq!(metrics.max_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_recovery_heals_after_budget() {
        let sim = simulator(Arc::new(InMemoryStore::new()));
        let outcome = sim.test_database_connection_recovery().await.unwrap();
        match outcome {
            CheckOutcome::Passed(Details::Recovery(metrics)) => {
                assert!(metrics.recovery_successful);
                assert_eq!(metrics.recovery_attempts, 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(sim.recovery_metrics().contains_key("database_connection"));
        assert!(sim.store().ping().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_recovery_fails_when_fault_never_heals() {
        let sim = simulator(Arc::new(InMemoryStore::new())).with_failure_budget(None);
        let outcome = sim.test_database_connection_recovery().await.unwrap();
        match outcome {
            CheckOutcome::Failed { message, details: Details::Recovery(metrics) } => {
                assert!(message.starts_with("Failed to recover after 3 attempts"));
                assert_eq!(metrics.recovery_attempts, 3);
                assert!(!metrics.recovery_successful);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_recovery_over_intermittent_link() {
        for seed in 0..8 {
            let sim = simulator(Arc::new(InMemoryStore::new())).with_seed(seed);
            let outcome = sim.test_network_failure_recovery().await.unwrap();
            assert!(matches!(outcome, CheckOutcome::Passed(_)), "seed {seed}");
        }
    }

    #[tokio::test]
    async fn test_rollback_leaves_no_rows() {
        let store = Arc::new(InMemoryStore::new());
        let sim = simulator(store.clone());
        let outcome = sim.test_transaction_rollback_on_failure().await.unwrap();
        match outcome {
            CheckOutcome::Passed(Details::Rollback(details)) => {
                assert_eq!(details.remaining_rows, 0);
                assert_eq!(details.failed_step, 3);
                assert_eq!(details.steps_planned, 5);
                assert!(details.store_error.contains("step 3"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.entity_rows(), 0);
    }

    #[tokio::test]
    async fn test_committed_write_sequence_is_recorded_as_failure() {
        let store = Arc::new(InMemoryStore::builder().autocommit(true).build());
        let sim = simulator(store.clone());
        let outcome = sim.test_transaction_rollback_on_failure().await.unwrap();
        match outcome {
            CheckOutcome::Failed { message, details } => {
                assert!(message.contains("committed despite the injected failure"));
                let Details::Rollback(details) = details else {
                    panic!("expected rollback details");
                };
                assert_eq!(details.remaining_rows, 4);
                assert!(details.store_error.is_empty());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(matches!(
            sim.recovery_metrics().get("transaction_rollback"),
            Some(Details::Rollback(_))
        ));
        assert_eq!(store.entity_rows(), 0);
    }

    #[tokio::test]
    async fn test_failed_rollback_check_still_records_metrics() {
        let inner = Arc::new(InMemoryStore::new());
        let store = Arc::new(FaultInjectingStore::new(inner, Duration::from_millis(1)));
        let _guard = store.faults().arm(StoreFault::ConnectionLost, None);
        let sim = simulator(store.clone());

        assert!(sim.test_transaction_rollback_on_failure().await.is_err());
        assert!(matches!(
            sim.recovery_metrics().get("transaction_rollback"),
            Some(Details::Execution(_))
        ));
    }

    #[tokio::test]
    async fn test_exhaustion_modes_are_classified() {
        let store = Arc::new(InMemoryStore::new());
        let sim = simulator(store.clone());
        let outcome = sim.test_resource_exhaustion_handling().await.unwrap();
        let CheckOutcome::Passed(Details::Exhaustion(details)) = outcome else {
            panic!("expected a pass");
        };
        let memory = &details.scenarios["memory"];
        assert!(memory.graceful_degradation);
        assert_eq!(memory.reported_utilization_percent, 95.0);
        let connections = &details.scenarios["connections"];
        assert!(connections.error_handling_correct);
        assert!(!connections.system_crashed);
        assert_eq!(details.scenarios["disk"].reported_utilization_percent, 95.0);
        assert_eq!(store.entity_rows(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicting_writers_lose_updates_but_keep_record() {
        let store = Arc::new(InMemoryStore::new());
        let sim = simulator(store.clone());
        let outcome = sim.test_concurrent_operation_conflicts().await.unwrap();
        let CheckOutcome::Passed(Details::Conflict(details)) = outcome else {
            panic!("expected a pass");
        };
        assert_eq!(details.successful_updates, 3);
        assert_eq!(details.failed_updates, 0);
        assert_eq!(details.lost_updates, 2);
        assert!(details.record_intact);
        assert_eq!(store.entity_rows(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_validation_reports_every_scenario() {
        let sim = simulator(Arc::new(InMemoryStore::new()));
        let results = sim.run_validation().await.unwrap();
        let names: Vec<_> = results.iter().map(|r| r.test_name()).collect();
        assert_eq!(
            names,
            vec![
                "database_connection_recovery",
                "transaction_rollback_on_failure",
                "network_failure_recovery",
                "resource_exhaustion_handling",
                "concurrent_operation_conflicts",
            ]
        );
        assert!(results.iter().all(|r| r.status() == Status::Passed));
        assert_eq!(sim.recovery_metrics().len(), 5);
    }
}
