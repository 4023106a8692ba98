//! Latency and throughput benchmarks over the memory store.
//!
//! Each benchmark measures first and judges second: the `benchmark_*`
//! methods return a [`BenchmarkResult`], and the `judge_*` functions turn it
//! into a [`CheckOutcome`] against [`PerformanceThresholds`].

use crate::sampling::{timed, Measurements};
use async_trait::async_trait;
use memory_validation_core::config::ValidationConfig;
use memory_validation_core::error::StoreError;
use memory_validation_core::fixtures::{TestDataGenerator, TextSize};
use memory_validation_core::model::{BenchmarkBreakdown, BenchmarkResult, ValidationResult};
use memory_validation_core::resources::ResourceProbe;
use memory_validation_core::stats::duration_ms;
use memory_validation_core::store::{
    purge_tenant, EntityFilter, EntityOrder, EntityQuery, EntityRecord, InsertOutcome,
    MemoryStore, TenantRef,
};
use memory_validation_core::validator::{best_effort, BaseValidator, CheckOutcome, Validator};
use memory_validation_core::ValidatorError;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Latency and throughput targets.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceThresholds {
    /// p95 for payloads under 1 KB.
    pub small_text_ms: f64,
    /// p95 for payloads of 1-10 KB.
    pub medium_text_ms: f64,
    /// p95 for payloads of 10-50 KB.
    pub large_text_ms: f64,
    /// Average search latency.
    pub search_ms: f64,
    /// Concurrent user capacity.
    pub concurrent_users: u32,
    /// Minimum operations per second.
    pub min_ops_per_second: f64,
    /// A latency this many times over its threshold fails the check.
    pub severe_multiplier: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            small_text_ms: 200.0,
            medium_text_ms: 500.0,
            large_text_ms: 2000.0,
            search_ms: 1000.0,
            concurrent_users: 100,
            min_ops_per_second: 10.0,
            severe_multiplier: 5.0,
        }
    }
}

impl PerformanceThresholds {
    /// p95 target for a payload size.
    pub fn text_threshold_ms(&self, size: TextSize) -> f64 {
        match size {
            TextSize::Small => self.small_text_ms,
            TextSize::Medium => self.medium_text_ms,
            TextSize::Large => self.large_text_ms,
        }
    }
}

/// Iteration counts per benchmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iterations {
    /// Per small and medium payload size.
    pub text: usize,
    /// For the large payload size.
    pub large_text: usize,
    /// Per search scenario.
    pub search: usize,
    /// Operations per simulated user.
    pub operations_per_user: usize,
    /// Upper bound on simulated users.
    pub max_concurrent_users: u32,
}

impl Default for Iterations {
    fn default() -> Self {
        Self {
            text: 20,
            large_text: 10,
            search: 20,
            operations_per_user: 5,
            max_concurrent_users: 50,
        }
    }
}

const SEARCH_SCENARIOS: [&str; 6] = [
    "exact_id_search",
    "name_pattern_search",
    "entity_type_search",
    "metadata_search",
    "count_search",
    "recent_entities",
];

const NAME_PATTERNS: [&str; 4] = ["%Alice%", "%Smith%", "%1%", "%Grace%"];

/// Runs the performance benchmarks as one validator.
pub struct PerformanceBenchmarker {
    store: Arc<dyn MemoryStore>,
    resources: Arc<dyn ResourceProbe>,
    thresholds: PerformanceThresholds,
    iterations: Iterations,
    search_dataset_size: usize,
    cleanup_batch_size: u64,
    generator: Mutex<TestDataGenerator>,
}

impl std::fmt::Debug for PerformanceBenchmarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceBenchmarker")
            .field("thresholds", &self.thresholds)
            .field("iterations", &self.iterations)
            .field("search_dataset_size", &self.search_dataset_size)
            .finish()
    }
}

impl PerformanceBenchmarker {
    /// Benchmarker over `store`, sized from `config`.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        resources: Arc<dyn ResourceProbe>,
        config: &ValidationConfig,
    ) -> Self {
        Self {
            store,
            resources,
            thresholds: PerformanceThresholds::default(),
            iterations: Iterations::default(),
            search_dataset_size: config.test_entity_count as usize,
            cleanup_batch_size: config.cleanup_batch_size,
            generator: Mutex::new(TestDataGenerator::new(42)),
        }
    }

    /// Replace the thresholds.
    pub fn with_thresholds(mut self, thresholds: PerformanceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Replace the iteration counts.
    pub fn with_iterations(mut self, iterations: Iterations) -> Self {
        self.iterations = iterations;
        self
    }

    /// Thresholds in use.
    pub fn thresholds(&self) -> &PerformanceThresholds {
        &self.thresholds
    }

    fn text_for(&self, size: TextSize) -> String {
        match self.generator.lock() {
            Ok(mut generator) => generator.text_sample(size),
            Err(_) => "x".repeat(size.target_bytes()),
        }
    }

    fn people(&self, tenant: &TenantRef, count: usize) -> Vec<EntityRecord> {
        match self.generator.lock() {
            Ok(mut generator) => generator.people(tenant, count),
            Err(_) => TestDataGenerator::new(42).people(tenant, count),
        }
    }

    async fn teardown(&self, tenant: &TenantRef) -> Option<u64> {
        best_effort(
            "performance fixtures",
            purge_tenant(self.store.as_ref(), tenant, self.cleanup_batch_size),
        )
        .await
    }

    /// Insert then query payloads of each size class.
    pub async fn benchmark_text_processing(&self) -> Result<BenchmarkResult, StoreError> {
        let start = Instant::now();
        let tenant = TenantRef::fresh("perf_text_test");
        let resource_before = self.resources.snapshot();
        let mut measurements = Measurements::new();

        for size in TextSize::ALL {
            let scenario = format!("{}_text", size.label());
            let iterations = match size {
                TextSize::Large => self.iterations.large_text,
                _ => self.iterations.text,
            };
            let content = self.text_for(size);
            measurements.scenario(&scenario).set_payload_bytes(content.len());

            for i in 0..iterations {
                let entity = EntityRecord::new(&tenant, format!("text_{}_{i}", size.label()), "document")
                    .with_metadata(json!({
                        "content": content,
                        "size_class": size.label(),
                        "iteration": i,
                    }));
                let query = EntityQuery::new(EntityFilter::MetadataEquals {
                    path: vec!["size_class".to_string()],
                    value: size.label().to_string(),
                })
                .limit(10);

                let (elapsed, outcome) = timed(async {
                    let inserted = self.store.insert_entity(&entity).await?;
                    self.store.query_entities(&tenant, &query).await?;
                    Ok::<_, StoreError>(inserted)
                })
                .await;

                let ok = matches!(outcome, Ok(InsertOutcome::Inserted));
                if !ok {
                    warn!(scenario = %scenario, iteration = i, outcome = ?outcome, "Text processing operation failed");
                }
                measurements.scenario(&scenario).record(&scenario, elapsed, ok);
            }
        }

        let active = measurements.active_time();
        let resource_usage = self.resources.snapshot();
        let cleanup_start = Instant::now();
        self.teardown(&tenant).await;

        let breakdown = BenchmarkBreakdown {
            resource_before: Some(resource_before),
            cleanup_time_ms: Some(duration_ms(cleanup_start.elapsed())),
            ..BenchmarkBreakdown::default()
        };
        Ok(measurements.into_result(
            "text_processing_performance",
            active,
            resource_usage,
            start.elapsed(),
            breakdown,
        ))
    }

    /// Simulated users each inserting and counting in parallel.
    pub async fn benchmark_concurrent_operations(&self) -> Result<BenchmarkResult, StoreError> {
        let start = Instant::now();
        let users = self
            .iterations
            .max_concurrent_users
            .min(self.thresholds.concurrent_users);
        let per_user = self.iterations.operations_per_user;
        let base = TenantRef::fresh("concurrent_test");
        let tenants: Vec<TenantRef> = (0..users)
            .map(|u| TenantRef::client(format!("{}_user_{u}", base.actor_id)))
            .collect();
        let resource_before = self.resources.snapshot();

        let batch_start = Instant::now();
        let handles: Vec<_> = tenants
            .iter()
            .map(|tenant| {
                let store = Arc::clone(&self.store);
                let entities = self.people(tenant, per_user);
                let tenant = tenant.clone();
                tokio::spawn(async move {
                    let mut measurements = Measurements::new();
                    for entity in entities {
                        let (elapsed, outcome) = timed(async {
                            let inserted = store.insert_entity(&entity).await?;
                            store.count_entities(&tenant, &EntityFilter::All).await?;
                            Ok::<_, StoreError>(inserted)
                        })
                        .await;
                        let ok = matches!(outcome, Ok(InsertOutcome::Inserted));
                        measurements
                            .scenario("insert_and_count")
                            .record("insert_and_count", elapsed, ok);
                    }
                    measurements
                })
            })
            .collect();

        let mut measurements = Measurements::new();
        for (user, joined) in futures::future::join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(user_measurements) => measurements.merge(user_measurements),
                Err(err) => {
                    warn!(user, error = %err, "Simulated user task failed");
                    let lost = measurements.scenario("insert_and_count");
                    for _ in 0..per_user {
                        lost.failure(Duration::ZERO);
                    }
                }
            }
        }
        let active = batch_start.elapsed();
        let resource_usage = self.resources.snapshot();

        let cleanup_start = Instant::now();
        for tenant in &tenants {
            self.teardown(tenant).await;
        }

        let breakdown = BenchmarkBreakdown {
            concurrent_users: Some(users),
            operations_per_user: Some(per_user as u32),
            resource_before: Some(resource_before),
            cleanup_time_ms: Some(duration_ms(cleanup_start.elapsed())),
            ..BenchmarkBreakdown::default()
        };
        info!(users, per_user, elapsed_ms = duration_ms(active), "Concurrent batch finished");
        Ok(measurements.into_result(
            "concurrent_operation_handling",
            active,
            resource_usage,
            start.elapsed(),
            breakdown,
        ))
    }

    /// Six read shapes over a seeded dataset.
    ///
    /// Seeding and cleanup are timed separately and excluded from throughput.
    pub async fn benchmark_search(&self) -> Result<BenchmarkResult, StoreError> {
        let start = Instant::now();
        let tenant = TenantRef::fresh("search_perf_test");
        let entities = self.people(&tenant, self.search_dataset_size.max(1));
        let resource_before = self.resources.snapshot();

        let setup_start = Instant::now();
        if let Err(err) = self.store.insert_entities(&entities).await {
            self.teardown(&tenant).await;
            return Err(err);
        }
        let setup_time = setup_start.elapsed();

        let mut measurements = Measurements::new();
        for scenario in SEARCH_SCENARIOS {
            for i in 0..self.iterations.search {
                let (elapsed, outcome) = timed(async {
                    match scenario {
                        "exact_id_search" => {
                            let id = entities[i % entities.len()].id;
                            self.store.get_entity(&tenant, id).await.map(|_| ())
                        }
                        "count_search" => self
                            .store
                            .count_entities(&tenant, &EntityFilter::All)
                            .await
                            .map(|_| ()),
                        other => {
                            let query = search_query(other, i);
                            self.store.query_entities(&tenant, &query).await.map(|_| ())
                        }
                    }
                })
                .await;
                if let Err(err) = &outcome {
                    warn!(scenario, error = %err, "Search failed");
                }
                measurements.scenario(scenario).record(scenario, elapsed, outcome.is_ok());
            }
        }
        let active = measurements.active_time();
        let resource_usage = self.resources.snapshot();

        let cleanup_start = Instant::now();
        self.teardown(&tenant).await;

        let breakdown = BenchmarkBreakdown {
            dataset_size: Some(entities.len() as u64),
            setup_time_ms: Some(duration_ms(setup_time)),
            cleanup_time_ms: Some(duration_ms(cleanup_start.elapsed())),
            resource_before: Some(resource_before),
            ..BenchmarkBreakdown::default()
        };
        Ok(measurements.into_result(
            "search_performance",
            active,
            resource_usage,
            start.elapsed(),
            breakdown,
        ))
    }
}

fn search_query(scenario: &str, iteration: usize) -> EntityQuery {
    match scenario {
        "name_pattern_search" => EntityQuery::new(EntityFilter::NamePattern(
            NAME_PATTERNS[iteration % NAME_PATTERNS.len()].to_string(),
        ))
        .limit(10),
        "entity_type_search" => {
            EntityQuery::new(EntityFilter::EntityType("person".to_string())).limit(20)
        }
        "metadata_search" => {
            EntityQuery::new(EntityFilter::MetadataKey("skills".to_string())).limit(15)
        }
        _ => EntityQuery::new(EntityFilter::All)
            .order_by(EntityOrder::CreatedDesc)
            .limit(25),
    }
}

fn attach(mut result: BenchmarkResult, hard: &[String], soft: &[String]) -> BenchmarkResult {
    result.details.issues = hard.iter().chain(soft).cloned().collect();
    result
}

/// Verdict for the text processing benchmark.
pub fn judge_text_processing(result: BenchmarkResult, t: &PerformanceThresholds) -> CheckOutcome {
    let mut hard = Vec::new();
    let mut soft = Vec::new();

    if result.error_rate > 0.05 {
        hard.push(format!("High error rate: {:.1}%", result.error_rate * 100.0));
    }
    for size in TextSize::ALL {
        let Some(scenario) = result.details.scenarios.get(&format!("{}_text", size.label())) else {
            continue;
        };
        let threshold = t.text_threshold_ms(size);
        let p95 = scenario.latency.p95_ms;
        if p95 > threshold * t.severe_multiplier {
            hard.push(format!(
                "{} text processing far too slow: {p95:.1}ms > {:.0}ms",
                size.label(),
                threshold * t.severe_multiplier
            ));
        } else if p95 > threshold {
            soft.push(format!(
                "{} text processing too slow: {p95:.1}ms > {threshold:.0}ms",
                size.label()
            ));
        }
    }
    if result.operations_per_second < t.min_ops_per_second {
        soft.push(format!(
            "Low throughput: {:.1} ops/sec",
            result.operations_per_second
        ));
    }
    verdict("Performance issues", result, &hard, &soft)
}

/// Verdict for the concurrent load benchmark.
pub fn judge_concurrent(result: BenchmarkResult, t: &PerformanceThresholds) -> CheckOutcome {
    const P95_LIMIT_MS: f64 = 1000.0;
    let mut hard = Vec::new();
    let mut soft = Vec::new();

    if result.error_rate > 0.5 {
        hard.push(format!(
            "Most operations failed under concurrent load: {:.1}%",
            result.error_rate * 100.0
        ));
    } else if result.error_rate > 0.1 {
        soft.push(format!(
            "High error rate under concurrent load: {:.1}%",
            result.error_rate * 100.0
        ));
    }
    if result.p95_response_time_ms > P95_LIMIT_MS * t.severe_multiplier {
        hard.push(format!(
            "Response under load far too slow: {:.1}ms p95",
            result.p95_response_time_ms
        ));
    } else if result.p95_response_time_ms > P95_LIMIT_MS {
        soft.push(format!(
            "Slow response under load: {:.1}ms p95",
            result.p95_response_time_ms
        ));
    }
    if result.operations_per_second < 5.0 {
        soft.push(format!(
            "Low concurrent throughput: {:.1} ops/sec",
            result.operations_per_second
        ));
    }
    verdict("Concurrent performance issues", result, &hard, &soft)
}

/// Verdict for the search benchmark.
pub fn judge_search(result: BenchmarkResult, t: &PerformanceThresholds) -> CheckOutcome {
    let mut hard = Vec::new();
    let mut soft = Vec::new();

    if result.avg_response_time_ms > t.search_ms * t.severe_multiplier {
        hard.push(format!(
            "Search far too slow: {:.1}ms average",
            result.avg_response_time_ms
        ));
    } else if result.avg_response_time_ms > t.search_ms {
        soft.push(format!(
            "Slow search performance: {:.1}ms average",
            result.avg_response_time_ms
        ));
    }
    if result.error_rate > 0.05 {
        hard.push(format!(
            "Search error rate too high: {:.1}%",
            result.error_rate * 100.0
        ));
    } else if result.error_rate > 0.02 {
        soft.push(format!(
            "Search error rate too high: {:.1}%",
            result.error_rate * 100.0
        ));
    }
    if result.operations_per_second < 20.0 {
        soft.push(format!(
            "Low search throughput: {:.1} searches/sec",
            result.operations_per_second
        ));
    }
    verdict("Search performance issues", result, &hard, &soft)
}

fn verdict(prefix: &str, result: BenchmarkResult, hard: &[String], soft: &[String]) -> CheckOutcome {
    let result = attach(result, hard, soft);
    let prefixed = |issues: &[String]| {
        if issues.is_empty() {
            Vec::new()
        } else {
            vec![format!("{prefix}: {}", issues.join("; "))]
        }
    };
    CheckOutcome::from_issues(&prefixed(hard), &prefixed(soft), result)
}

#[async_trait]
impl Validator for PerformanceBenchmarker {
    fn name(&self) -> &str {
        "PerformanceBenchmarker"
    }

    async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
        let mut base = BaseValidator::new(self.name());
        let t = &self.thresholds;

        base.run_test("text_processing_performance", || async {
            Ok(judge_text_processing(self.benchmark_text_processing().await?, t))
        })
        .await;
        base.run_test("concurrent_operation_handling", || async {
            Ok(judge_concurrent(self.benchmark_concurrent_operations().await?, t))
        })
        .await;
        base.run_test("search_performance", || async {
            Ok(judge_search(self.benchmark_search().await?, t))
        })
        .await;

        Ok(base.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_validation_core::details::Details;
    use memory_validation_core::model::{ScenarioBreakdown, Status};
    use memory_validation_core::resources::{FixedResourceProbe, ResourceSnapshot};
    use memory_validation_core::stats::LatencyStats;
    use memory_validation_core::store::InMemoryStore;
    use std::collections::BTreeMap;

    fn small_iterations() -> Iterations {
        Iterations {
            text: 4,
            large_text: 2,
            search: 3,
            operations_per_user: 2,
            max_concurrent_users: 5,
        }
    }

    fn benchmarker(store: Arc<InMemoryStore>) -> PerformanceBenchmarker {
        let config = ValidationConfig {
            test_entity_count: 30,
            ..ValidationConfig::default()
        };
        PerformanceBenchmarker::new(store, Arc::new(FixedResourceProbe::default()), &config)
            .with_iterations(small_iterations())
    }

    fn result_with(p95: f64, avg: f64, error_rate: f64, ops: f64) -> BenchmarkResult {
        BenchmarkResult {
            test_name: "t".into(),
            operations_per_second: ops,
            avg_response_time_ms: avg,
            p95_response_time_ms: p95,
            p99_response_time_ms: p95,
            error_rate,
            total_operations: 100,
            resource_usage: ResourceSnapshot::default(),
            execution_time_ms: 1.0,
            details: BenchmarkBreakdown::default(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_text_processing_covers_every_size() {
        let store = Arc::new(InMemoryStore::new());
        let result = benchmarker(Arc::clone(&store))
            .benchmark_text_processing()
            .await
            .unwrap();

        assert_eq!(result.total_operations, 4 + 4 + 2);
        assert_eq!(result.error_rate, 0.0);
        let large = &result.details.scenarios["large_text"];
        assert_eq!(large.operations, 2);
        assert!(large.payload_bytes.unwrap() > 10 * 1024);
        assert_eq!(store.entity_rows(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_users_are_capped_and_cleaned() {
        let store = Arc::new(InMemoryStore::new());
        let result = benchmarker(Arc::clone(&store))
            .benchmark_concurrent_operations()
            .await
            .unwrap();

        assert_eq!(result.details.concurrent_users, Some(5));
        assert_eq!(result.total_operations, 10);
        assert_eq!(result.details.total_errors, 0);
        assert!(result.operations_per_second > 0.0);
        assert_eq!(store.entity_rows(), 0);
    }

    #[tokio::test]
    async fn test_search_excludes_setup_from_breakdown() {
        let store = Arc::new(InMemoryStore::new());
        let result = benchmarker(Arc::clone(&store)).benchmark_search().await.unwrap();

        assert_eq!(result.details.scenarios.len(), 6);
        assert_eq!(result.total_operations, 18);
        assert_eq!(result.details.dataset_size, Some(30));
        assert!(result.details.setup_time_ms.is_some());
        assert_eq!(store.entity_rows(), 0);
    }

    #[test]
    fn test_text_verdicts() {
        let t = PerformanceThresholds::default();
        let mut scenarios = BTreeMap::new();
        scenarios.insert(
            "small_text".to_string(),
            ScenarioBreakdown {
                latency: LatencyStats {
                    p95_ms: 250.0,
                    ..LatencyStats::default()
                },
                ..ScenarioBreakdown::default()
            },
        );
        let mut slow = result_with(250.0, 100.0, 0.0, 50.0);
        slow.details.scenarios = scenarios.clone();
        match judge_text_processing(slow, &t) {
            CheckOutcome::Warning { message, details } => {
                assert!(message.contains("small text processing too slow"));
                let Details::Benchmark(b) = details else { panic!("wrong details") };
                assert_eq!(b.details.issues.len(), 1);
            }
            other => panic!("expected warning, got {other:?}"),
        }

        scenarios.get_mut("small_text").unwrap().latency.p95_ms = 1500.0;
        let mut severe = result_with(1500.0, 100.0, 0.0, 50.0);
        severe.details.scenarios = scenarios;
        assert!(matches!(judge_text_processing(severe, &t), CheckOutcome::Failed { .. }));

        let errors = result_with(10.0, 10.0, 0.06, 50.0);
        assert!(matches!(judge_text_processing(errors, &t), CheckOutcome::Failed { .. }));
    }

    #[test]
    fn test_concurrent_verdicts() {
        let t = PerformanceThresholds::default();
        assert!(matches!(
            judge_concurrent(result_with(100.0, 50.0, 0.0, 100.0), &t),
            CheckOutcome::Passed(_)
        ));
        assert!(matches!(
            judge_concurrent(result_with(100.0, 50.0, 0.2, 100.0), &t),
            CheckOutcome::Warning { .. }
        ));
        assert!(matches!(
            judge_concurrent(result_with(100.0, 50.0, 0.6, 100.0), &t),
            CheckOutcome::Failed { .. }
        ));
        assert!(matches!(
            judge_concurrent(result_with(100.0, 50.0, 0.0, 2.0), &t),
            CheckOutcome::Warning { .. }
        ));
    }

    #[test]
    fn test_search_verdicts() {
        let t = PerformanceThresholds::default();
        assert!(matches!(
            judge_search(result_with(10.0, 10.0, 0.0, 100.0), &t),
            CheckOutcome::Passed(_)
        ));
        assert!(matches!(
            judge_search(result_with(10.0, 1200.0, 0.0, 100.0), &t),
            CheckOutcome::Warning { .. }
        ));
        assert!(matches!(
            judge_search(result_with(10.0, 10.0, 0.03, 100.0), &t),
            CheckOutcome::Warning { .. }
        ));
        assert!(matches!(
            judge_search(result_with(10.0, 10.0, 0.08, 100.0), &t),
            CheckOutcome::Failed { .. }
        ));
        assert!(matches!(
            judge_search(result_with(10.0, 6000.0, 0.0, 100.0), &t),
            CheckOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_validator_reports_three_checks() {
        let store = Arc::new(InMemoryStore::new());
        let results = benchmarker(store).run_validation().await.unwrap();
        let names: Vec<_> = results.iter().map(|r| r.test_name()).collect();
        assert_eq!(
            names,
            vec![
                "text_processing_performance",
                "concurrent_operation_handling",
                "search_performance"
            ]
        );
        assert!(results.iter().all(|r| r.status() != Status::Failed));
    }
}
