// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed detail records attached to each [`crate::model::ValidationResult`].
//!
//! Each check category has its own record type. [`Details`] is untagged, so a
//! result serializes to the bare record (`{"entities_created": 15, ...}`) and
//! reports keep the flat JSON shape consumers already read.
//!
//! Records deny unknown fields so that reading a report back picks the
//! variant whose fields actually match.

use crate::model::BenchmarkResult;
use crate::resources::ResourceSnapshot;
use crate::stats::LatencyStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured, check-specific payload of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Details {
    /// No details (`{}`).
    Empty(EmptyDetails),
    /// Why a check was skipped.
    Skipped(SkipDetails),
    /// A validator failed outside of any check.
    Execution(ExecutionFailure),
    /// Liveness facts for one component.
    Health(HealthFacts),
    /// Performance benchmark record.
    Benchmark(Box<BenchmarkResult>),
    /// Scalability run record.
    Scalability(Box<ScalabilityResult>),
    /// Capacity judgment over concurrency and memory runs.
    ResourceLimits(Box<ResourceLimitDetails>),
    /// Retry/backoff recovery metrics.
    Recovery(RecoveryMetrics),
    /// Transaction rollback outcome.
    Rollback(RollbackDetails),
    /// Concurrent read-modify-write outcome.
    Conflict(ConflictDetails),
    /// Behaviour under simulated resource exhaustion.
    Exhaustion(ExhaustionDetails),
    /// Cross-interface comparison.
    Interface(InterfaceDetails),
    /// Age/score gated cleanup outcome.
    Cleanup(CleanupDetails),
    /// Grade decay outcome.
    Decay(DecayDetails),
    /// Maintenance statistics probes.
    Maintenance(MaintenanceDetails),
    /// Cleanup cost measurement.
    CleanupImpact(CleanupImpactDetails),
    /// Export/transform/import round trip.
    Migration(MigrationDetails),
    /// Dump or restore outcome.
    Backup(BackupDetails),
    /// Expected versus observed counts.
    Counts(CountDetails),
    /// Per-interface availability, keyed by interface name.
    Availability(AvailabilityDetails),
}

impl Default for Details {
    fn default() -> Self {
        Details::Empty(EmptyDetails {})
    }
}

impl Details {
    /// The empty record.
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether this is the empty record.
    pub fn is_empty(&self) -> bool {
        matches!(self, Details::Empty(_))
    }
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmptyDetails {}

/// Reason a check did not run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkipDetails {
    /// Human-readable reason.
    pub skip_reason: String,
}

/// Synthetic record for a validator that raised out of `run_validation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionFailure {
    /// Name of the validator that failed.
    pub validator: String,
}

/// Facts gathered by a health probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HealthFacts {
    /// URL that answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// HTTP status observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Body size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_size: Option<usize>,
    /// Tables verified as accessible.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables_checked: Vec<String>,
    /// Operations exercised.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operations_tested: Vec<String>,
    /// Whether a connection was established.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_successful: Option<bool>,
}

/// A concurrency level at which the failure rate exceeded tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakingPoint {
    /// Simulated concurrent users at this level.
    pub concurrent_users: u32,
    /// Failed / launched at this level.
    pub failure_rate: f64,
    /// Successful operations at this level.
    pub successful_operations: u64,
    /// Failed operations at this level.
    pub failed_operations: u64,
}

/// One rung of the concurrency ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelOutcome {
    /// Simulated concurrent users.
    pub concurrent_users: u32,
    /// Successful operations.
    pub successful_operations: u64,
    /// Failed operations.
    pub failed_operations: u64,
    /// Failed / launched.
    pub failure_rate: f64,
}

/// Resource reading taken at a named phase boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceCheckpoint {
    /// Phase name (`start`, `after_load`, ...).
    pub phase: String,
    /// Reading.
    pub snapshot: ResourceSnapshot,
}

/// Memory reading around one dataset size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemorySnapshot {
    /// Entities loaded for this step.
    pub dataset_size: u64,
    /// Process memory before loading.
    pub initial_memory_mb: f64,
    /// Process memory right after loading.
    pub after_creation_memory_mb: f64,
    /// Process memory after the read operations.
    pub final_memory_mb: f64,
    /// `final - initial`.
    pub memory_increase_mb: f64,
    /// System memory utilization.
    pub system_memory_percent: f64,
}

/// Breakdown of a scalability run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScalabilityBreakdown {
    /// Latency statistics per query shape.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub query_stats: BTreeMap<String, LatencyStats>,
    /// Resource timeline.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_timeline: Vec<ResourceCheckpoint>,
    /// Bulk load duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_time_ms: Option<f64>,
    /// Bulk load rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_rate_per_second: Option<f64>,
    /// Read battery duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_time_ms: Option<f64>,
    /// Concurrent read phase duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent_time_ms: Option<f64>,
    /// Teardown duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_time_ms: Option<f64>,
    /// Rows removed during teardown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_removed: Option<u64>,
    /// Total operations in the measured phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_operations: Option<u64>,
    /// Failed operations in the measured phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u64>,
    /// Concurrency ladder outcome per level.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub levels_tested: Vec<LevelOutcome>,
    /// Highest level cleared without breaching tolerance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_users_without_failure: Option<u32>,
    /// Memory usage pattern.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub memory_snapshots: Vec<MemorySnapshot>,
    /// Entities per MB of memory growth, averaged over the steps that grew.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_memory_efficiency_entities_per_mb: Option<f64>,
    /// Failure that aborted the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one scalability procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalabilityResult {
    /// Procedure name.
    pub test_name: String,
    /// Entities loaded.
    pub dataset_size: u64,
    /// Highest concurrency level cleared; 0 when the first level broke.
    pub max_concurrent_users: u32,
    /// Operations per second over the measured phases.
    pub operations_per_second: f64,
    /// Mean latency.
    pub avg_response_time_ms: f64,
    /// 95th percentile latency.
    pub p95_response_time_ms: f64,
    /// 99th percentile latency.
    pub p99_response_time_ms: f64,
    /// Peak process memory observed.
    pub memory_usage_mb: f64,
    /// Process CPU at the end of the run.
    pub cpu_usage_percent: f64,
    /// Failed / total operations.
    pub error_rate: f64,
    /// Wall-clock duration including setup and teardown.
    pub execution_time_ms: f64,
    /// First level that breached tolerance.
    pub breaking_point: Option<BreakingPoint>,
    /// Breakdown.
    pub details: ScalabilityBreakdown,
}

/// Capacity verdict inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLimitDetails {
    /// Concurrency escalation run.
    pub concurrent_test: ScalabilityResult,
    /// Memory usage pattern run.
    pub memory_test: ScalabilityResult,
    /// Hard-limit breaches.
    pub issues: Vec<String>,
    /// Soft shortfalls.
    pub warnings: Vec<String>,
}

/// Metrics of one retry/backoff recovery attempt sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecoveryMetrics {
    /// Attempts made.
    pub recovery_attempts: u32,
    /// Whether any attempt succeeded.
    pub recovery_successful: bool,
    /// Time from the first attempt to the outcome.
    pub recovery_time_ms: f64,
    /// Configured attempt limit.
    pub max_attempts: u32,
    /// Backoff slept before each attempt after the first.
    pub backoff_delays_ms: Vec<f64>,
    /// Message of the last failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Outcome of the forced-abort write sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollbackDetails {
    /// Tenant used for the batch.
    pub batch_id: String,
    /// Steps in the sequence.
    pub steps_planned: usize,
    /// One-based step forced to fail.
    pub failed_step: usize,
    /// Rows left for the batch after rollback.
    pub remaining_rows: u64,
    /// Error the store reported for the sequence.
    pub store_error: String,
}

/// Outcome of concurrent read-modify-write on one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConflictDetails {
    /// Writers that committed.
    pub successful_updates: u32,
    /// Writers that failed.
    pub failed_updates: u32,
    /// Committed writes whose key is missing from the final record.
    pub lost_updates: u32,
    /// Whether any writer failed.
    pub conflict_detected: bool,
    /// Whether at least one writer succeeded despite a conflict.
    pub conflict_resolved: bool,
    /// Whether the record was still readable and well-formed afterwards.
    pub record_intact: bool,
}

/// Behaviour observed under one exhaustion mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExhaustionObservation {
    /// Work completed despite the pressure.
    pub graceful_degradation: bool,
    /// Work was refused with a resource-exhaustion error.
    pub error_handling_correct: bool,
    /// Work failed with an unrelated error.
    pub system_crashed: bool,
    /// Utilization reported while the fault was active.
    pub reported_utilization_percent: f64,
    /// Error observed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Exhaustion observations keyed by mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExhaustionDetails {
    /// Mode name to observation.
    pub scenarios: BTreeMap<String, ExhaustionObservation>,
}

/// What one interface answered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InterfaceResponse {
    /// HTTP status, absent on transport failure.
    pub status_code: Option<u16>,
    /// Content type header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Parsed body of a successful response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error text or non-200 body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// For auth probes: whether the interface answered 401/403.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_unauthorized: Option<bool>,
}

/// Comparison of several interfaces answering the same request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InterfaceDetails {
    /// Response per interface (or per `interface/scenario`).
    pub interface_responses: BTreeMap<String, InterfaceResponse>,
    /// Differences found.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub consistency_issues: Vec<String>,
    /// Interfaces that answered 200.
    pub successful_interfaces: usize,
}

/// Availability of one interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointAvailability {
    /// Answered 200 on its health path.
    pub available: bool,
    /// Status observed.
    pub status_code: Option<u16>,
    /// Probe latency.
    pub response_time_ms: f64,
    /// Transport error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Availability keyed by interface name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvailabilityDetails(pub BTreeMap<String, EndpointAvailability>);

/// Outcome of age/score gated cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupDetails {
    /// Fixture rows inserted.
    pub entities_created: u64,
    /// Rows the cleanup removed.
    pub entities_cleaned: u64,
    /// Rows expected to be removed.
    pub expected_cleaned: u64,
    /// Rows left for the tenant.
    pub remaining_entities: u64,
    /// Non-generic rows left.
    pub remaining_specific: u64,
    /// Non-generic rows expected to survive.
    pub expected_remaining: u64,
    /// Generic rows left.
    pub remaining_generic: u64,
    /// Generic rows that miss one of the cleanup conditions.
    pub expected_remaining_generic: u64,
    /// Cleanup statement duration.
    pub cleanup_time_ms: f64,
    /// Cleaned / created.
    pub cleanup_efficiency: f64,
}

/// One decayed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecayObservation {
    /// Grade before decay.
    pub initial_grade: f64,
    /// Last touched before the decay cutoff.
    pub past_cutoff: bool,
    /// Grade read back.
    pub current_grade: f64,
    /// `initial * factor` past the cutoff, `initial` otherwise.
    pub expected_grade: f64,
    /// Within tolerance.
    pub decay_correct: bool,
}

/// Outcome of multiplicative grade decay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecayDetails {
    /// Rows the decay statement touched.
    pub entities_processed: u64,
    /// Decay factor applied.
    pub decay_factor: f64,
    /// Per-row comparison.
    pub decay_results: Vec<DecayObservation>,
    /// Decay statement duration.
    pub decay_time_ms: f64,
}

/// One maintenance statistics probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaintenanceOperation {
    /// Probe name.
    pub operation: String,
    /// Whether the probe ran.
    pub success: bool,
    /// Rows examined by the probe.
    pub rows_examined: u64,
    /// Probe duration.
    pub time_ms: f64,
    /// Failure text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Maintenance probes summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaintenanceDetails {
    /// Probes in execution order.
    pub operations: Vec<MaintenanceOperation>,
    /// Probes that ran.
    pub successful_operations: usize,
    /// Probes attempted.
    pub total_operations: usize,
    /// Sum of probe durations.
    pub total_maintenance_time_ms: f64,
}

/// Cost of cleanup on a larger dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupImpactDetails {
    /// Rows inserted.
    pub entities_created: u64,
    /// Rows removed.
    pub entities_cleaned: u64,
    /// Rows counted before cleanup.
    pub count_before: u64,
    /// Rows counted after cleanup.
    pub count_after: u64,
    /// Load duration.
    pub baseline_time_ms: f64,
    /// Cleanup duration.
    pub cleanup_time_ms: f64,
    /// Count query duration before cleanup.
    pub query_before_time_ms: f64,
    /// Count query duration after cleanup.
    pub query_after_time_ms: f64,
    /// Relative query speed-up (negative is a slowdown).
    pub performance_improvement_percent: f64,
    /// Cleaned / created.
    pub cleanup_efficiency: f64,
    /// Within the cleanup time and degradation limits.
    pub acceptable_performance: bool,
}

/// Relationship shape of one tenant's graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationshipCensus {
    /// Live relations.
    pub relations: u64,
    /// Relations whose endpoints both resolve inside the tenant.
    pub resolved_relations: u64,
    /// Relations pointing at a missing entity.
    pub dangling_relations: u64,
    /// Distinct relationship types.
    pub relationship_types: u64,
}

/// Outcome of a migration step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MigrationDetails {
    /// Tenant exported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tenant: Option<String>,
    /// Tenant imported into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_tenant: Option<String>,
    /// Entities in the export.
    pub entities_exported: u64,
    /// Relations in the export.
    pub relations_exported: u64,
    /// Entities found after import.
    pub entities_imported: u64,
    /// Relations found after import.
    pub relations_imported: u64,
    /// Source graph census.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_relationships: Option<RelationshipCensus>,
    /// Migrated graph census.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_relationships: Option<RelationshipCensus>,
    /// Schema version after the step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

/// Outcome of a dump or restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BackupDetails {
    /// Dump file.
    pub file: String,
    /// Bytes in the dump.
    pub bytes_written: u64,
    /// Writes performed while the dump ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent_writes: Option<u32>,
    /// Records in an incremental dump.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
}

/// Expected versus observed counts with free-form notes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CountDetails {
    /// Expected count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<u64>,
    /// Observed count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<u64>,
    /// Payload size involved, in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_bytes: Option<usize>,
    /// Observations worth keeping in the report.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl CountDetails {
    /// Expected/observed pair.
    pub fn new(expected: u64, observed: u64) -> Self {
        Self {
            expected: Some(expected),
            observed: Some(observed),
            ..Self::default()
        }
    }

    /// Append a note.
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

macro_rules! impl_from_details {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Details {
                fn from(value: $ty) -> Self {
                    Details::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_details! {
    SkipDetails => Skipped,
    ExecutionFailure => Execution,
    HealthFacts => Health,
    BenchmarkResult => Benchmark,
    ScalabilityResult => Scalability,
    ResourceLimitDetails => ResourceLimits,
    RecoveryMetrics => Recovery,
    RollbackDetails => Rollback,
    ConflictDetails => Conflict,
    ExhaustionDetails => Exhaustion,
    InterfaceDetails => Interface,
    CleanupDetails => Cleanup,
    DecayDetails => Decay,
    MaintenanceDetails => Maintenance,
    CleanupImpactDetails => CleanupImpact,
    MigrationDetails => Migration,
    BackupDetails => Backup,
    CountDetails => Counts,
    AvailabilityDetails => Availability,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_details_serialize_as_empty_object() {
        let value = serde_json::to_value(Details::none()).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_details_serialize_flat() {
        let details: Details = RollbackDetails {
            batch_id: "rollback_test_1".into(),
            steps_planned: 5,
            failed_step: 3,
            remaining_rows: 0,
            store_error: "Transaction aborted at step 3: forced".into(),
        }
        .into();

        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["remaining_rows"], json!(0));
        assert_eq!(value["failed_step"], json!(3));
        assert!(value.get("Rollback").is_none());
    }

    #[test]
    fn test_availability_is_a_plain_map() {
        let mut map = BTreeMap::new();
        map.insert(
            "internal_api".to_string(),
            EndpointAvailability {
                available: true,
                status_code: Some(200),
                response_time_ms: 3.0,
                error: None,
            },
        );
        let value = serde_json::to_value(Details::from(AvailabilityDetails(map))).unwrap();
        assert_eq!(value["internal_api"]["available"], json!(true));
    }

    #[test]
    fn test_empty_object_reads_back_as_empty() {
        let details: Details = serde_json::from_value(json!({})).unwrap();
        assert!(details.is_empty());
    }

    #[test]
    fn test_rollback_reads_back_as_rollback() {
        let original: Details = RollbackDetails {
            batch_id: "b".into(),
            steps_planned: 5,
            failed_step: 3,
            remaining_rows: 0,
            store_error: "aborted".into(),
        }
        .into();
        let text = serde_json::to_string(&original).unwrap();
        let parsed: Details = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, original);
    }
}
