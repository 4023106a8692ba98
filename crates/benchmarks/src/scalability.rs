//! Load escalation: large datasets, concurrency ladders and memory growth.
//!
//! Both procedures follow one pattern: increase load, measure, stop at a
//! breaking point. [`escalate`] holds the ladder logic on its own so it can
//! be driven by any level runner.

use crate::sampling::{timed, Measurements};
use async_trait::async_trait;
use memory_validation_core::config::ValidationConfig;
use memory_validation_core::details::{
    BreakingPoint, LevelOutcome, MemorySnapshot, ResourceCheckpoint, ResourceLimitDetails,
    ScalabilityBreakdown, ScalabilityResult,
};
use memory_validation_core::error::StoreError;
use memory_validation_core::fixtures::TestDataGenerator;
use memory_validation_core::model::ValidationResult;
use memory_validation_core::resources::ResourceProbe;
use memory_validation_core::stats::{duration_ms, error_rate, throughput, LatencyStats};
use memory_validation_core::store::{
    purge_tenant, EntityFilter, EntityOrder, EntityQuery, MemoryStore, TenantRef,
};
use memory_validation_core::validator::{best_effort, BaseValidator, CheckOutcome, Validator};
use memory_validation_core::ValidatorError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Capacity targets.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalabilityThresholds {
    /// Largest dataset one tenant may hold.
    pub max_entities_per_client: u64,
    /// Concurrent users the store must sustain.
    pub max_concurrent_users: u32,
    /// p95 search latency with a large dataset.
    pub search_response_ms_large: f64,
    /// Process memory ceiling.
    pub memory_usage_limit_mb: f64,
    /// Process CPU ceiling.
    pub cpu_usage_limit_percent: f64,
    /// Error rate ceiling under load.
    pub max_error_rate: f64,
}

impl Default for ScalabilityThresholds {
    fn default() -> Self {
        Self {
            max_entities_per_client: 1_000_000,
            max_concurrent_users: 1000,
            search_response_ms_large: 1000.0,
            memory_usage_limit_mb: 8192.0,
            cpu_usage_limit_percent: 80.0,
            max_error_rate: 0.05,
        }
    }
}

/// What one rung of the ladder produced.
#[derive(Debug, Default)]
pub struct LevelRun {
    /// Operations that succeeded.
    pub successful: u64,
    /// Operations that failed.
    pub failed: u64,
    /// Latency samples for the rung.
    pub samples: Measurements,
}

/// Outcome of a full ladder.
#[derive(Debug, Default)]
pub struct Escalation {
    /// Every rung run, in order.
    pub levels: Vec<LevelOutcome>,
    /// First rung over tolerance.
    pub breaking_point: Option<BreakingPoint>,
    /// Highest rung cleared; 0 when the first rung broke.
    pub max_supported: u32,
    /// Samples across rungs.
    pub samples: Measurements,
}

/// Climb `levels` until a rung's failure rate exceeds `tolerance`.
///
/// A rung with a failure rate equal to the tolerance still counts as cleared.
pub async fn escalate<F, Fut>(levels: &[u32], tolerance: f64, mut run_level: F) -> Escalation
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = LevelRun>,
{
    let mut escalation = Escalation::default();
    for &users in levels {
        info!(concurrent_users = users, "Testing concurrency level");
        let run = run_level(users).await;
        let rate = error_rate(run.failed, run.successful + run.failed);
        escalation.levels.push(LevelOutcome {
            concurrent_users: users,
            successful_operations: run.successful,
            failed_operations: run.failed,
            failure_rate: rate,
        });
        escalation.samples.merge(run.samples);

        if rate > tolerance {
            warn!(concurrent_users = users, failure_rate = rate, "Breaking point reached");
            escalation.breaking_point = Some(BreakingPoint {
                concurrent_users: users,
                failure_rate: rate,
                successful_operations: run.successful,
                failed_operations: run.failed,
            });
            break;
        }
        escalation.max_supported = users;
    }
    escalation
}

const QUERY_SHAPES: [&str; 7] = [
    "exact_lookup",
    "name_pattern",
    "type_filter",
    "structured_predicate",
    "aggregate_count",
    "recency_order",
    "offset_pagination",
];

const MEMORY_TEST_SIZES: [u64; 5] = [100, 500, 1000, 5000, 10_000];

/// Runs the scalability procedures as one validator.
pub struct ScalabilityValidator {
    store: Arc<dyn MemoryStore>,
    resources: Arc<dyn ResourceProbe>,
    thresholds: ScalabilityThresholds,
    target_dataset_size: u64,
    max_test_entities: u64,
    batch_size: u64,
    cleanup_enabled: bool,
    cleanup_batch_size: u64,
    concurrency_levels: Vec<u32>,
    failure_rate_tolerance: f64,
    query_iterations: usize,
    concurrent_readers: usize,
    reads_per_reader: usize,
    level_pause: Duration,
    memory_sizes: Vec<u64>,
}

impl std::fmt::Debug for ScalabilityValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalabilityValidator")
            .field("thresholds", &self.thresholds)
            .field("target_dataset_size", &self.target_dataset_size)
            .field("concurrency_levels", &self.concurrency_levels)
            .finish()
    }
}

impl ScalabilityValidator {
    /// Validator over `store`, sized from `config`.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        resources: Arc<dyn ResourceProbe>,
        config: &ValidationConfig,
    ) -> Self {
        Self {
            store,
            resources,
            thresholds: ScalabilityThresholds::default(),
            target_dataset_size: config.large_dataset_size,
            max_test_entities: config.max_test_entities,
            batch_size: config.batch_size,
            cleanup_enabled: config.cleanup_enabled,
            cleanup_batch_size: config.cleanup_batch_size,
            concurrency_levels: config.concurrency_levels.clone(),
            failure_rate_tolerance: config.failure_rate_tolerance,
            query_iterations: 10,
            concurrent_readers: 20,
            reads_per_reader: 3,
            level_pause: Duration::from_secs(1),
            memory_sizes: MEMORY_TEST_SIZES.to_vec(),
        }
    }

    /// Replace the thresholds.
    pub fn with_thresholds(mut self, thresholds: ScalabilityThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Pause between ladder rungs.
    pub fn with_level_pause(mut self, pause: Duration) -> Self {
        self.level_pause = pause;
        self
    }

    /// Dataset sizes for the memory usage pattern.
    pub fn with_memory_sizes(mut self, sizes: Vec<u64>) -> Self {
        self.memory_sizes = sizes;
        self
    }

    /// Concurrent read phase shape.
    pub fn with_concurrent_reads(mut self, readers: usize, reads_per_reader: usize) -> Self {
        self.concurrent_readers = readers;
        self.reads_per_reader = reads_per_reader;
        self
    }

    fn checkpoint(&self, phase: &str) -> ResourceCheckpoint {
        ResourceCheckpoint {
            phase: phase.to_string(),
            snapshot: self.resources.snapshot(),
        }
    }

    /// Load `count` entities for `tenant` in batches. Returns rows written
    /// and up to 100 ids for point lookups.
    async fn bulk_load(
        &self,
        tenant: &TenantRef,
        count: u64,
    ) -> Result<(u64, Vec<Uuid>), StoreError> {
        let mut generator = TestDataGenerator::new(count);
        let batch_size = self.batch_size.max(1);
        let mut loaded = 0;
        let mut sample_ids = Vec::new();
        let mut batch_number = 0u64;

        while loaded < count {
            let size = batch_size.min(count - loaded) as usize;
            let batch = generator.people(tenant, size);
            if sample_ids.len() < 100 {
                let room = 100 - sample_ids.len();
                sample_ids.extend(batch.iter().take(room).map(|e| e.id));
            }
            loaded += self.store.insert_entities(&batch).await?;
            batch_number += 1;
            if batch_number % 10 == 0 {
                info!(tenant = %tenant, loaded, target = count, "Bulk load progress");
            }
        }
        Ok((loaded, sample_ids))
    }

    async fn run_shape(
        &self,
        shape: &str,
        tenant: &TenantRef,
        sample_ids: &[Uuid],
        loaded: u64,
        iteration: usize,
    ) -> Result<(), StoreError> {
        let store = self.store.as_ref();
        match shape {
            "exact_lookup" => {
                let id = sample_ids
                    .get(iteration % sample_ids.len().max(1))
                    .copied()
                    .unwrap_or_else(Uuid::new_v4);
                store.get_entity(tenant, id).await.map(|_| ())
            }
            "aggregate_count" => store.count_entities(tenant, &EntityFilter::All).await.map(|_| ()),
            other => {
                let query = match other {
                    "name_pattern" => {
                        EntityQuery::new(EntityFilter::NamePattern("%Smith%".to_string())).limit(10)
                    }
                    "type_filter" => {
                        EntityQuery::new(EntityFilter::EntityType("person".to_string())).limit(100)
                    }
                    "structured_predicate" => EntityQuery::new(EntityFilter::MetadataEquals {
                        path: vec!["preferences".to_string(), "work_style".to_string()],
                        value: "remote".to_string(),
                    })
                    .limit(100),
                    "recency_order" => EntityQuery::new(EntityFilter::All)
                        .order_by(EntityOrder::CreatedDesc)
                        .limit(50),
                    _ => {
                        let offset = (iteration as u64 * 50) % loaded.max(1);
                        EntityQuery::new(EntityFilter::All)
                            .order_by(EntityOrder::NameAsc)
                            .offset(offset)
                            .limit(50)
                    }
                };
                store.query_entities(tenant, &query).await.map(|_| ())
            }
        }
    }

    async fn concurrent_reads(&self, tenant: &TenantRef, sample_ids: &[Uuid]) -> Measurements {
        let handles: Vec<_> = (0..self.concurrent_readers)
            .map(|reader| {
                let store = Arc::clone(&self.store);
                let tenant = tenant.clone();
                let ids = sample_ids.to_vec();
                let reads = self.reads_per_reader;
                tokio::spawn(async move {
                    let mut samples = Measurements::new();
                    for op in 0..reads {
                        let (elapsed, outcome) = timed(async {
                            if op % 2 == 0 && !ids.is_empty() {
                                let id = ids[(reader + op) % ids.len()];
                                store.get_entity(&tenant, id).await.map(|_| ())
                            } else {
                                let query =
                                    EntityQuery::new(EntityFilter::EntityType("person".to_string()))
                                        .limit(10);
                                store.query_entities(&tenant, &query).await.map(|_| ())
                            }
                        })
                        .await;
                        samples
                            .scenario("concurrent_read")
                            .record("concurrent_read", elapsed, outcome.is_ok());
                    }
                    samples
                })
            })
            .collect();

        let mut samples = Measurements::new();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(reader) => samples.merge(reader),
                Err(err) => {
                    warn!(error = %err, "Concurrent reader task failed");
                    for _ in 0..self.reads_per_reader {
                        samples.scenario("concurrent_read").failure(Duration::ZERO);
                    }
                }
            }
        }
        samples
    }

    /// Load a large dataset, run the read battery and concurrent reads, then
    /// tear down.
    pub async fn large_dataset_performance(&self, dataset_size: u64) -> ScalabilityResult {
        let start = Instant::now();
        let tenant = TenantRef::fresh("scale_test");
        let mut breakdown = ScalabilityBreakdown::default();
        breakdown.resource_timeline.push(self.checkpoint("start"));

        let load_start = Instant::now();
        let load = self.bulk_load(&tenant, dataset_size).await;
        let insert_time = load_start.elapsed();
        let (loaded, sample_ids) = match load {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(error = %err, "Bulk load failed");
                breakdown.error = Some(format!("Bulk load failed: {err}"));
                best_effort(
                    "scale fixtures",
                    purge_tenant(self.store.as_ref(), &tenant, self.cleanup_batch_size),
                )
                .await;
                return failed_run("large_dataset_performance", dataset_size, start, breakdown);
            }
        };
        breakdown.insert_time_ms = Some(duration_ms(insert_time));
        breakdown.insert_rate_per_second = Some(throughput(loaded, insert_time));
        breakdown.resource_timeline.push(self.checkpoint("after_load"));
        info!(loaded, insert_time_ms = duration_ms(insert_time), "Bulk load finished");

        let search_start = Instant::now();
        let mut measurements = Measurements::new();
        for shape in QUERY_SHAPES {
            for i in 0..self.query_iterations {
                let (elapsed, outcome) =
                    timed(self.run_shape(shape, &tenant, &sample_ids, loaded, i)).await;
                if let Err(err) = &outcome {
                    warn!(shape, error = %err, "Query failed");
                }
                measurements.scenario(shape).record(shape, elapsed, outcome.is_ok());
            }
        }
        let search_time = search_start.elapsed();
        breakdown.search_time_ms = Some(duration_ms(search_time));
        breakdown.query_stats = measurements
            .breakdowns()
            .into_iter()
            .map(|(shape, b)| (shape, b.latency))
            .collect();
        breakdown.resource_timeline.push(self.checkpoint("after_search"));

        let concurrent_start = Instant::now();
        let concurrent = self.concurrent_reads(&tenant, &sample_ids).await;
        let concurrent_time = concurrent_start.elapsed();
        breakdown.concurrent_time_ms = Some(duration_ms(concurrent_time));
        measurements.merge(concurrent);
        breakdown.resource_timeline.push(self.checkpoint("after_concurrency"));

        if self.cleanup_enabled {
            let cleanup_start = Instant::now();
            breakdown.rows_removed = best_effort(
                "scale fixtures",
                purge_tenant(self.store.as_ref(), &tenant, self.cleanup_batch_size),
            )
            .await;
            breakdown.cleanup_time_ms = Some(duration_ms(cleanup_start.elapsed()));
            if let Ok(remaining) = self.store.count_entities(&tenant, &EntityFilter::All).await {
                if remaining > 0 {
                    breakdown.error = Some(format!("{remaining} rows remain after cleanup"));
                }
            }
        }

        let latency = LatencyStats::from_millis(&measurements.pooled_latencies());
        let total_operations = measurements.total_operations();
        let errors = measurements.total_errors();
        breakdown.total_operations = Some(total_operations);
        breakdown.error_count = Some(errors);

        let peak_memory = breakdown
            .resource_timeline
            .iter()
            .map(|c| c.snapshot.memory_mb)
            .fold(0.0, f64::max);
        let cpu = breakdown
            .resource_timeline
            .last()
            .map(|c| c.snapshot.cpu_percent)
            .unwrap_or(0.0);

        ScalabilityResult {
            test_name: "large_dataset_performance".to_string(),
            dataset_size: loaded,
            max_concurrent_users: self.concurrent_readers as u32,
            operations_per_second: throughput(total_operations, search_time + concurrent_time),
            avg_response_time_ms: latency.avg_ms,
            p95_response_time_ms: latency.p95_ms,
            p99_response_time_ms: latency.p99_ms,
            memory_usage_mb: peak_memory,
            cpu_usage_percent: cpu,
            error_rate: error_rate(errors, total_operations),
            execution_time_ms: duration_ms(start.elapsed()),
            breaking_point: None,
            details: breakdown,
        }
    }

    /// Climb the concurrency ladder with one round trip per simulated user.
    pub async fn maximum_concurrent_users(&self) -> ScalabilityResult {
        let start = Instant::now();
        let pause = self.level_pause;
        let mut first = true;

        let escalation = escalate(&self.concurrency_levels, self.failure_rate_tolerance, |users| {
            let store = Arc::clone(&self.store);
            let wait = if first { Duration::ZERO } else { pause };
            first = false;
            async move {
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                run_ping_level(store, users).await
            }
        })
        .await;

        let elapsed = start.elapsed();
        let latency = LatencyStats::from_millis(&escalation.samples.pooled_latencies());
        let total = escalation.samples.total_operations();
        let errors = escalation.samples.total_errors();
        let resources = self.resources.snapshot();

        ScalabilityResult {
            test_name: "maximum_concurrent_users".to_string(),
            dataset_size: 0,
            max_concurrent_users: escalation.max_supported,
            operations_per_second: throughput(total, elapsed),
            avg_response_time_ms: latency.avg_ms,
            p95_response_time_ms: latency.p95_ms,
            p99_response_time_ms: latency.p99_ms,
            memory_usage_mb: resources.memory_mb,
            cpu_usage_percent: resources.cpu_percent,
            error_rate: error_rate(errors, total),
            execution_time_ms: duration_ms(elapsed),
            breaking_point: escalation.breaking_point,
            details: ScalabilityBreakdown {
                levels_tested: escalation.levels,
                max_users_without_failure: Some(escalation.max_supported),
                total_operations: Some(total),
                error_count: Some(errors),
                ..ScalabilityBreakdown::default()
            },
        }
    }

    /// Record memory before and after loading increasingly large datasets.
    pub async fn memory_usage_patterns(&self) -> ScalabilityResult {
        let start = Instant::now();
        let mut breakdown = ScalabilityBreakdown::default();
        let mut measurements = Measurements::new();
        let mut largest = 0;

        let sizes: Vec<u64> = self
            .memory_sizes
            .iter()
            .copied()
            .filter(|size| *size <= self.max_test_entities)
            .collect();

        for size in sizes {
            let tenant = TenantRef::fresh("memory_test");
            let initial = self.resources.snapshot();
            if let Err(err) = self.bulk_load(&tenant, size).await {
                breakdown.error = Some(format!("Loading {size} entities failed: {err}"));
                best_effort(
                    "memory fixtures",
                    purge_tenant(self.store.as_ref(), &tenant, self.cleanup_batch_size),
                )
                .await;
                break;
            }
            let after_creation = self.resources.snapshot();

            for i in 0..self.query_iterations {
                let (elapsed, outcome) = timed(async {
                    if i % 2 == 0 {
                        self.store.count_entities(&tenant, &EntityFilter::All).await.map(|_| ())
                    } else {
                        let query =
                            EntityQuery::new(EntityFilter::EntityType("person".to_string())).limit(100);
                        self.store.query_entities(&tenant, &query).await.map(|_| ())
                    }
                })
                .await;
                measurements
                    .scenario("memory_read")
                    .record("memory_read", elapsed, outcome.is_ok());
            }

            let last = self.resources.snapshot();
            breakdown.memory_snapshots.push(MemorySnapshot {
                dataset_size: size,
                initial_memory_mb: initial.memory_mb,
                after_creation_memory_mb: after_creation.memory_mb,
                final_memory_mb: last.memory_mb,
                memory_increase_mb: last.memory_mb - initial.memory_mb,
                system_memory_percent: last.system_memory_percent,
            });
            largest = size;

            best_effort(
                "memory fixtures",
                purge_tenant(self.store.as_ref(), &tenant, self.cleanup_batch_size),
            )
            .await;
        }

        let efficiencies: Vec<f64> = breakdown
            .memory_snapshots
            .iter()
            .filter(|s| s.memory_increase_mb > 0.0)
            .map(|s| s.dataset_size as f64 / s.memory_increase_mb)
            .collect();
        if !efficiencies.is_empty() {
            breakdown.avg_memory_efficiency_entities_per_mb =
                Some(efficiencies.iter().sum::<f64>() / efficiencies.len() as f64);
        }

        let peak = breakdown
            .memory_snapshots
            .iter()
            .map(|s| s.after_creation_memory_mb.max(s.final_memory_mb))
            .fold(0.0, f64::max);
        let latency = LatencyStats::from_millis(&measurements.pooled_latencies());
        let total = measurements.total_operations();
        let errors = measurements.total_errors();
        let elapsed = start.elapsed();
        breakdown.total_operations = Some(total);
        breakdown.error_count = Some(errors);

        ScalabilityResult {
            test_name: "memory_usage_patterns".to_string(),
            dataset_size: largest,
            max_concurrent_users: 1,
            operations_per_second: throughput(total, measurements.active_time()),
            avg_response_time_ms: latency.avg_ms,
            p95_response_time_ms: latency.p95_ms,
            p99_response_time_ms: latency.p99_ms,
            memory_usage_mb: peak,
            cpu_usage_percent: self.resources.snapshot().cpu_percent,
            error_rate: error_rate(errors, total),
            execution_time_ms: duration_ms(elapsed),
            breaking_point: None,
            details: breakdown,
        }
    }
}

async fn run_ping_level(store: Arc<dyn MemoryStore>, users: u32) -> LevelRun {
    let handles: Vec<_> = (0..users)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { timed(store.ping()).await })
        })
        .collect();

    let mut run = LevelRun::default();
    for joined in futures::future::join_all(handles).await {
        match joined {
            Ok((elapsed, Ok(()))) => {
                run.successful += 1;
                run.samples.scenario("ping").success("ping", elapsed);
            }
            Ok((elapsed, Err(_))) => {
                run.failed += 1;
                run.samples.scenario("ping").failure(elapsed);
            }
            Err(_) => {
                run.failed += 1;
                run.samples.scenario("ping").failure(Duration::ZERO);
            }
        }
    }
    run
}

fn failed_run(
    test_name: &str,
    dataset_size: u64,
    start: Instant,
    details: ScalabilityBreakdown,
) -> ScalabilityResult {
    ScalabilityResult {
        test_name: test_name.to_string(),
        dataset_size,
        max_concurrent_users: 0,
        operations_per_second: 0.0,
        avg_response_time_ms: 0.0,
        p95_response_time_ms: 0.0,
        p99_response_time_ms: 0.0,
        memory_usage_mb: 0.0,
        cpu_usage_percent: 0.0,
        error_rate: 1.0,
        execution_time_ms: duration_ms(start.elapsed()),
        breaking_point: None,
        details,
    }
}

/// Verdict for the large dataset run against its target size.
pub fn judge_large_dataset(
    result: ScalabilityResult,
    target_size: u64,
    t: &ScalabilityThresholds,
) -> CheckOutcome {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    if let Some(error) = &result.details.error {
        issues.push(error.clone());
    }
    if result.dataset_size < target_size {
        warnings.push(format!(
            "Dataset size limited to {} (target: {target_size})",
            result.dataset_size
        ));
    }
    if result.dataset_size > t.max_entities_per_client {
        issues.push(format!(
            "Dataset exceeds per-client limit: {} > {}",
            result.dataset_size, t.max_entities_per_client
        ));
    }
    if result.p95_response_time_ms > t.search_response_ms_large {
        issues.push(format!(
            "Search too slow with large dataset: {:.1}ms > {:.0}ms",
            result.p95_response_time_ms, t.search_response_ms_large
        ));
    }
    if result.memory_usage_mb > t.memory_usage_limit_mb {
        issues.push(format!(
            "Memory usage too high: {:.1}MB > {:.0}MB",
            result.memory_usage_mb, t.memory_usage_limit_mb
        ));
    }
    if result.error_rate > t.max_error_rate {
        issues.push(format!(
            "High error rate with large dataset: {:.1}%",
            result.error_rate * 100.0
        ));
    }
    if result.cpu_usage_percent > t.cpu_usage_limit_percent {
        warnings.push(format!(
            "CPU usage high: {:.1}% > {:.0}%",
            result.cpu_usage_percent, t.cpu_usage_limit_percent
        ));
    }
    if result.details.error.is_none() && result.operations_per_second < 5.0 {
        warnings.push(format!(
            "Low throughput with large dataset: {:.1} ops/sec",
            result.operations_per_second
        ));
    }

    let hard = prefixed("Large dataset performance issues", &issues);
    let soft = prefixed("Large dataset performance warnings", &warnings);
    CheckOutcome::from_issues(&hard, &soft, result)
}

/// Verdict over the concurrency ladder and the memory usage pattern.
pub fn judge_resource_limits(
    concurrent: ScalabilityResult,
    memory: ScalabilityResult,
    t: &ScalabilityThresholds,
) -> CheckOutcome {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    if let Some(point) = &concurrent.breaking_point {
        let supported = concurrent.details.max_users_without_failure.unwrap_or(0);
        if supported < t.max_concurrent_users {
            issues.push(format!(
                "Concurrent user limit too low: {supported} < {} (broke at {} users, {:.1}% failures)",
                t.max_concurrent_users,
                point.concurrent_users,
                point.failure_rate * 100.0
            ));
        }
    }
    if memory.memory_usage_mb > t.memory_usage_limit_mb {
        issues.push(format!(
            "Memory usage too high: {:.1}MB > {:.0}MB",
            memory.memory_usage_mb, t.memory_usage_limit_mb
        ));
    }
    if concurrent.error_rate > t.max_error_rate {
        issues.push(format!(
            "High error rate under load: {:.1}%",
            concurrent.error_rate * 100.0
        ));
    }
    if let Some(error) = &memory.details.error {
        issues.push(error.clone());
    }
    if concurrent.cpu_usage_percent > t.cpu_usage_limit_percent {
        warnings.push(format!(
            "CPU usage high under load: {:.1}% > {:.0}%",
            concurrent.cpu_usage_percent, t.cpu_usage_limit_percent
        ));
    }

    let hard = prefixed("Resource limit issues", &issues);
    let soft = prefixed("Resource limit warnings", &warnings);
    let details = ResourceLimitDetails {
        concurrent_test: concurrent,
        memory_test: memory,
        issues,
        warnings,
    };
    CheckOutcome::from_issues(&hard, &soft, details)
}

fn prefixed(prefix: &str, items: &[String]) -> Vec<String> {
    if items.is_empty() {
        Vec::new()
    } else {
        vec![format!("{prefix}: {}", items.join("; "))]
    }
}

#[async_trait]
impl Validator for ScalabilityValidator {
    fn name(&self) -> &str {
        "ScalabilityValidator"
    }

    async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
        let mut base = BaseValidator::new(self.name());
        let t = &self.thresholds;
        let size = self.target_dataset_size.min(self.max_test_entities);

        base.run_test("large_dataset_performance", || async {
            let result = self.large_dataset_performance(size).await;
            Ok(judge_large_dataset(result, self.target_dataset_size, t))
        })
        .await;
        base.run_test("system_resource_limits", || async {
            let concurrent = self.maximum_concurrent_users().await;
            let memory = self.memory_usage_patterns().await;
            Ok(judge_resource_limits(concurrent, memory, t))
        })
        .await;

        Ok(base.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_validation_core::details::Details;
    use memory_validation_core::model::Status;
    use memory_validation_core::resources::{FixedResourceProbe, ResourceSnapshot};
    use memory_validation_core::store::InMemoryStore;
    use proptest::prelude::*;

    fn validator(store: Arc<InMemoryStore>, config: &ValidationConfig) -> ScalabilityValidator {
        ScalabilityValidator::new(
            store,
            Arc::new(FixedResourceProbe::new(ResourceSnapshot {
                memory_mb: 256.0,
                ..ResourceSnapshot::default()
            })),
            config,
        )
        .with_level_pause(Duration::ZERO)
        .with_memory_sizes(vec![50, 100, 100_000])
        .with_concurrent_reads(4, 3)
    }

    fn small_config() -> ValidationConfig {
        ValidationConfig {
            large_dataset_size: 1000,
            max_test_entities: 2000,
            batch_size: 100,
            concurrency_levels: vec![5, 10, 20],
            ..ValidationConfig::default()
        }
    }

    fn level(successful: u64, failed: u64) -> LevelRun {
        LevelRun {
            successful,
            failed,
            samples: Measurements::new(),
        }
    }

    #[tokio::test]
    async fn test_escalation_stops_at_first_breach() {
        let escalation = escalate(&[10, 25, 50, 100], 0.2, |users| async move {
            match users {
                10 | 25 => level(users as u64, 0),
                50 => level(35, 15),
                _ => unreachable!("ladder must stop at 50"),
            }
        })
        .await;

        assert_eq!(escalation.levels.len(), 3);
        assert_eq!(escalation.max_supported, 25);
        let point = escalation.breaking_point.unwrap();
        assert_eq!(point.concurrent_users, 50);
        assert_eq!(point.failed_operations, 15);
        assert!((point.failure_rate - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failure_rate_at_tolerance_clears() {
        let escalation = escalate(&[10, 20], 0.2, |users| async move {
            level(users as u64 * 4 / 5, users as u64 / 5)
        })
        .await;
        assert!(escalation.breaking_point.is_none());
        assert_eq!(escalation.max_supported, 20);
    }

    #[tokio::test]
    async fn test_first_level_breaking_supports_zero() {
        let escalation = escalate(&[10, 20], 0.2, |_| async { level(0, 10) }).await;
        assert_eq!(escalation.max_supported, 0);
        assert_eq!(escalation.levels.len(), 1);
    }

    proptest! {
        #[test]
        fn test_max_supported_is_below_breaking_level(
            failures in prop::collection::vec(0u64..=10, 1..7)
        ) {
            let ladder: Vec<u32> = (1..=failures.len() as u32).map(|i| i * 10).collect();
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let escalation = runtime.block_on(escalate(&ladder, 0.2, |users| {
                let failed = failures[(users / 10 - 1) as usize];
                async move { level(10 - failed, failed) }
            }));

            if let Some(point) = &escalation.breaking_point {
                prop_assert!(point.failure_rate > 0.2);
                prop_assert!(escalation.max_supported < point.concurrent_users);
                prop_assert_eq!(escalation.levels.last().map(|l| l.concurrent_users), Some(point.concurrent_users));
            } else {
                prop_assert_eq!(escalation.levels.len(), ladder.len());
            }
            for cleared in &escalation.levels[..escalation.levels.len().saturating_sub(1)] {
                prop_assert!(cleared.failure_rate <= 0.2);
            }
        }
    }

    #[tokio::test]
    async fn test_large_dataset_loads_queries_and_cleans_up() {
        let store = Arc::new(InMemoryStore::new());
        let config = small_config();
        let result = validator(Arc::clone(&store), &config)
            .large_dataset_performance(1000)
            .await;

        assert_eq!(result.dataset_size, 1000);
        assert!(result.details.insert_rate_per_second.unwrap() > 0.0);
        assert_eq!(result.details.query_stats.len(), 7);
        assert_eq!(result.details.total_operations, Some(7 * 10 + 4 * 3));
        assert_eq!(result.error_rate, 0.0);
        let phases: Vec<_> = result
            .details
            .resource_timeline
            .iter()
            .map(|c| c.phase.as_str())
            .collect();
        assert_eq!(phases, vec!["start", "after_load", "after_search", "after_concurrency"]);
        assert_eq!(result.details.rows_removed, Some(1000));
        assert_eq!(store.entity_rows(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_can_be_disabled() {
        let store = Arc::new(InMemoryStore::new());
        let config = ValidationConfig {
            cleanup_enabled: false,
            ..small_config()
        };
        let result = validator(Arc::clone(&store), &config)
            .large_dataset_performance(200)
            .await;
        assert!(result.details.rows_removed.is_none());
        assert_eq!(store.entity_rows(), 200);
    }

    #[tokio::test]
    async fn test_in_memory_store_clears_the_whole_ladder() {
        let store = Arc::new(InMemoryStore::new());
        let result = validator(store, &small_config()).maximum_concurrent_users().await;
        assert!(result.breaking_point.is_none());
        assert_eq!(result.max_concurrent_users, 20);
        assert_eq!(result.details.max_users_without_failure, Some(20));
        assert_eq!(result.details.total_operations, Some(35));
    }

    #[tokio::test]
    async fn test_headline_users_stop_below_a_failing_first_rung() {
        use memory_validation_validators::{FaultInjectingStore, StoreFault};

        let store = Arc::new(FaultInjectingStore::new(
            Arc::new(InMemoryStore::new()),
            Duration::ZERO,
        ));
        let _fault = store.faults().arm(StoreFault::PoolExhausted, Some(15));
        let config = ValidationConfig {
            concurrency_levels: vec![10, 25, 50],
            ..small_config()
        };
        let validator = ScalabilityValidator::new(
            store.clone(),
            Arc::new(FixedResourceProbe::default()),
            &config,
        )
        .with_level_pause(Duration::ZERO);

        let result = validator.maximum_concurrent_users().await;
        let point = result.breaking_point.as_ref().unwrap();
        assert_eq!(point.concurrent_users, 10);
        assert_eq!(result.max_concurrent_users, 0);
        assert_eq!(result.details.max_users_without_failure, Some(0));
        assert!(result.max_concurrent_users < point.concurrent_users);
    }

    #[tokio::test]
    async fn test_memory_sizes_respect_the_cap() {
        let store = Arc::new(InMemoryStore::new());
        let result = validator(Arc::clone(&store), &small_config())
            .memory_usage_patterns()
            .await;
        let sizes: Vec<u64> = result
            .details
            .memory_snapshots
            .iter()
            .map(|s| s.dataset_size)
            .collect();
        assert_eq!(sizes, vec![50, 100]);
        assert!(result.details.avg_memory_efficiency_entities_per_mb.is_none());
        assert_eq!(store.entity_rows(), 0);
    }

    #[tokio::test]
    async fn test_capped_dataset_warns() {
        let store = Arc::new(InMemoryStore::new());
        let config = ValidationConfig {
            large_dataset_size: 5000,
            max_test_entities: 300,
            ..small_config()
        };
        let results = validator(store, &config).run_validation().await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].test_name(), "large_dataset_performance");
        assert_eq!(results[0].status(), Status::Warning);
        assert!(results[0]
            .warning_message()
            .unwrap()
            .contains("Dataset size limited to 300 (target: 5000)"));
    }

    #[test]
    fn test_low_capacity_fails_resource_limits() {
        let t = ScalabilityThresholds::default();
        let concurrent = ScalabilityResult {
            test_name: "maximum_concurrent_users".into(),
            dataset_size: 0,
            max_concurrent_users: 200,
            operations_per_second: 100.0,
            avg_response_time_ms: 1.0,
            p95_response_time_ms: 1.0,
            p99_response_time_ms: 1.0,
            memory_usage_mb: 100.0,
            cpu_usage_percent: 10.0,
            error_rate: 0.01,
            execution_time_ms: 1.0,
            breaking_point: Some(BreakingPoint {
                concurrent_users: 200,
                failure_rate: 0.4,
                successful_operations: 120,
                failed_operations: 80,
            }),
            details: ScalabilityBreakdown {
                max_users_without_failure: Some(100),
                ..ScalabilityBreakdown::default()
            },
        };
        let memory = ScalabilityResult {
            test_name: "memory_usage_patterns".into(),
            breaking_point: None,
            details: ScalabilityBreakdown::default(),
            ..concurrent.clone()
        };

        match judge_resource_limits(concurrent, memory, &t) {
            CheckOutcome::Failed { message, details } => {
                assert!(message.contains("Concurrent user limit too low: 100 < 1000"));
                let Details::ResourceLimits(d) = details else { panic!("wrong details") };
                assert_eq!(d.issues.len(), 1);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
