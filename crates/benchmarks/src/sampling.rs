//! Latency sampling shared by the benchmarks.

use memory_validation_core::model::{BenchmarkBreakdown, BenchmarkResult, ScenarioBreakdown};
use memory_validation_core::resources::ResourceSnapshot;
use memory_validation_core::stats::{duration_ms, error_rate, throughput, LatencyStats};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

/// Time one future.
pub async fn timed<T, Fut>(operation: Fut) -> (Duration, T)
where
    Fut: Future<Output = T>,
{
    let start = Instant::now();
    let value = operation.await;
    (start.elapsed(), value)
}

/// Samples of one named scenario.
#[derive(Debug, Clone, Default)]
pub struct ScenarioSamples {
    latencies_ms: Vec<f64>,
    errors: u64,
    active: Duration,
    payload_bytes: Option<usize>,
}

impl ScenarioSamples {
    /// Record a successful operation.
    pub fn success(&mut self, scenario: &str, elapsed: Duration) {
        let ms = duration_ms(elapsed);
        metrics::histogram!("validation_operation_latency_ms", "scenario" => scenario.to_string())
            .record(ms);
        self.latencies_ms.push(ms);
        self.active += elapsed;
    }

    /// Record a failed operation. Its time still counts as active.
    pub fn failure(&mut self, elapsed: Duration) {
        self.errors += 1;
        self.active += elapsed;
    }

    /// Record an operation either way.
    pub fn record(&mut self, scenario: &str, elapsed: Duration, ok: bool) {
        if ok {
            self.success(scenario, elapsed);
        } else {
            self.failure(elapsed);
        }
    }

    /// Tag the scenario with a payload size.
    pub fn set_payload_bytes(&mut self, bytes: usize) {
        self.payload_bytes = Some(bytes);
    }

    /// Operations recorded.
    pub fn operations(&self) -> u64 {
        self.latencies_ms.len() as u64 + self.errors
    }

    /// Failed operations.
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Latencies of successful operations.
    pub fn latencies_ms(&self) -> &[f64] {
        &self.latencies_ms
    }

    /// Reduce to a report breakdown.
    pub fn breakdown(&self) -> ScenarioBreakdown {
        ScenarioBreakdown {
            latency: LatencyStats::from_millis(&self.latencies_ms),
            operations: self.operations(),
            errors: self.errors,
            error_rate: error_rate(self.errors, self.operations()),
            operations_per_second: throughput(self.operations(), self.active),
            payload_bytes: self.payload_bytes,
        }
    }
}

/// Scenario samples of one benchmark, keyed by scenario name.
#[derive(Debug, Clone, Default)]
pub struct Measurements {
    scenarios: BTreeMap<String, ScenarioSamples>,
}

impl Measurements {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples of `name`, created on first use.
    pub fn scenario(&mut self, name: &str) -> &mut ScenarioSamples {
        self.scenarios.entry(name.to_string()).or_default()
    }

    /// Fold another set in, appending samples per scenario.
    pub fn merge(&mut self, other: Measurements) {
        for (name, samples) in other.scenarios {
            let target = self.scenarios.entry(name).or_default();
            target.latencies_ms.extend(samples.latencies_ms);
            target.errors += samples.errors;
            target.active += samples.active;
            if target.payload_bytes.is_none() {
                target.payload_bytes = samples.payload_bytes;
            }
        }
    }

    /// Every successful latency across scenarios.
    pub fn pooled_latencies(&self) -> Vec<f64> {
        self.scenarios
            .values()
            .flat_map(|s| s.latencies_ms.iter().copied())
            .collect()
    }

    /// Operations across scenarios.
    pub fn total_operations(&self) -> u64 {
        self.scenarios.values().map(ScenarioSamples::operations).sum()
    }

    /// Failures across scenarios.
    pub fn total_errors(&self) -> u64 {
        self.scenarios.values().map(ScenarioSamples::errors).sum()
    }

    /// Sum of per-scenario active time.
    pub fn active_time(&self) -> Duration {
        self.scenarios.values().map(|s| s.active).sum()
    }

    /// Per-scenario breakdowns.
    pub fn breakdowns(&self) -> BTreeMap<String, ScenarioBreakdown> {
        self.scenarios
            .iter()
            .map(|(name, samples)| (name.clone(), samples.breakdown()))
            .collect()
    }

    /// Build the benchmark record.
    ///
    /// Throughput is computed over `active`, which callers set to the measured
    /// phase only.
    pub fn into_result(
        self,
        test_name: &str,
        active: Duration,
        resource_usage: ResourceSnapshot,
        execution_time: Duration,
        mut breakdown: BenchmarkBreakdown,
    ) -> BenchmarkResult {
        let latency = LatencyStats::from_millis(&self.pooled_latencies());
        let total_operations = self.total_operations();
        let total_errors = self.total_errors();
        breakdown.scenarios = self.breakdowns();
        breakdown.total_errors = total_errors;

        BenchmarkResult {
            test_name: test_name.to_string(),
            operations_per_second: throughput(total_operations, active),
            avg_response_time_ms: latency.avg_ms,
            p95_response_time_ms: latency.p95_ms,
            p99_response_time_ms: latency.p99_ms,
            error_rate: error_rate(total_errors, total_operations),
            total_operations,
            resource_usage,
            execution_time_ms: duration_ms(execution_time),
            details: breakdown,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_counts_failures_as_operations() {
        let mut samples = ScenarioSamples::default();
        samples.success("exact_id", Duration::from_millis(10));
        samples.success("exact_id", Duration::from_millis(30));
        samples.failure(Duration::from_millis(60));

        let breakdown = samples.breakdown();
        assert_eq!(breakdown.operations, 3);
        assert_eq!(breakdown.errors, 1);
        assert!((breakdown.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(breakdown.latency.sample_count, 2);
        assert_eq!(breakdown.latency.avg_ms, 20.0);
        // 3 operations over 100 ms of active time
        assert!((breakdown.operations_per_second - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_into_result_pools_scenarios() {
        let mut measurements = Measurements::new();
        measurements.scenario("a").success("a", Duration::from_millis(5));
        measurements.scenario("b").success("b", Duration::from_millis(15));
        measurements.scenario("b").failure(Duration::from_millis(1));

        let result = measurements.into_result(
            "bench",
            Duration::from_secs(1),
            ResourceSnapshot::default(),
            Duration::from_secs(2),
            BenchmarkBreakdown::default(),
        );
        assert_eq!(result.total_operations, 3);
        assert_eq!(result.details.total_errors, 1);
        assert_eq!(result.details.scenarios.len(), 2);
        assert_eq!(result.avg_response_time_ms, 10.0);
        assert_eq!(result.operations_per_second, 3.0);
        assert_eq!(result.execution_time_ms, 2000.0);
    }

    #[test]
    fn test_merge_appends_samples() {
        let mut left = Measurements::new();
        left.scenario("read").success("read", Duration::from_millis(2));
        let mut right = Measurements::new();
        right.scenario("read").failure(Duration::from_millis(2));
        right.scenario("write").success("write", Duration::from_millis(4));

        left.merge(right);
        assert_eq!(left.total_operations(), 3);
        assert_eq!(left.total_errors(), 1);
        assert_eq!(left.pooled_latencies().len(), 2);
    }

    #[tokio::test]
    async fn test_timed_returns_value() {
        let (elapsed, value) = timed(async { 7 }).await;
        assert_eq!(value, 7);
        assert!(elapsed < Duration::from_secs(1));
    }
}
