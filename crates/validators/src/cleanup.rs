// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stale-entity cleanup, grade decay and maintenance probes.
//!
//! Cleanup removes only rows that are `generic`, graded below
//! [`ValidationConfig::grade_decay_threshold`] **and** untouched for longer
//! than [`ValidationConfig::generic_entity_age_days`]. Decay multiplies the
//! grade of every row older than a day by [`ValidationConfig::decay_factor`].

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use memory_validation_core::config::ValidationConfig;
use memory_validation_core::details::{
    CleanupDetails, CleanupImpactDetails, DecayDetails, DecayObservation, MaintenanceDetails,
    MaintenanceOperation,
};
use memory_validation_core::model::ValidationResult;
use memory_validation_core::stats::duration_ms;
use memory_validation_core::store::{
    purge_tenant, EntityFilter, EntityQuery, EntityRecord, MaintenanceOp, MemoryStore, TenantRef,
};
use memory_validation_core::validator::{best_effort, BaseValidator, CheckOutcome, CheckResult};
use memory_validation_core::{StoreError, Validator, ValidatorError};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Entity type cleanup is allowed to remove.
pub const GENERIC_ENTITY_TYPE: &str = "generic";

const GENERIC_FIXTURES: u64 = 10;
const SPECIFIC_FIXTURES: u64 = 5;
const CONTROL_FIXTURES: u64 = 2;
const DECAY_GRADES: [f64; 5] = [0.9, 0.7, 0.5, 0.3, 0.1];
const RECENT_DECAY_GRADES: [f64; 2] = [0.8, 0.4];
const DECAY_TOLERANCE: f64 = 0.01;
const IMPACT_FIXTURES: u64 = 1000;
const IMPACT_STALE_AGE_DAYS: i64 = 35;
const ACCEPTABLE_CLEANUP_MS: f64 = 5000.0;
const ACCEPTABLE_DEGRADATION_PERCENT: f64 = -10.0;

/// Cleanup and decay checks.
#[derive(Clone)]
pub struct CleanupValidator {
    store: Arc<dyn MemoryStore>,
    grade_threshold: f64,
    age_days: i64,
    decay_factor: f64,
    batch_size: u64,
}

impl std::fmt::Debug for CleanupValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupValidator")
            .field("grade_threshold", &self.grade_threshold)
            .field("age_days", &self.age_days)
            .field("decay_factor", &self.decay_factor)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl CleanupValidator {
    /// Validator over `store` with thresholds from `config`.
    pub fn new(store: Arc<dyn MemoryStore>, config: &ValidationConfig) -> Self {
        Self {
            store,
            grade_threshold: config.grade_decay_threshold,
            age_days: config.generic_entity_age_days,
            decay_factor: config.decay_factor,
            batch_size: config.cleanup_batch_size.max(1),
        }
    }

    async fn teardown(&self, tenant: &TenantRef) -> Option<u64> {
        best_effort(
            "cleanup fixtures",
            purge_tenant(self.store.as_ref(), tenant, self.batch_size),
        )
        .await
    }

    async fn purge_stale(&self, tenant: &TenantRef) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - ChronoDuration::days(self.age_days);
        self.store
            .purge_stale_entities(tenant, GENERIC_ENTITY_TYPE, self.grade_threshold, cutoff)
            .await
    }

    /// Old low-grade generic rows go. Specific rows stay, and so do generic
    /// rows that are recent or graded above the threshold.
    pub async fn check_generic_entity_cleanup(&self) -> CheckResult {
        let tenant = TenantRef::fresh("cleanup_test");
        let outcome = self.generic_cleanup_in(&tenant).await;
        self.teardown(&tenant).await;
        outcome
    }

    async fn generic_cleanup_in(&self, tenant: &TenantRef) -> CheckResult {
        let now = Utc::now();
        let stale_at = now - ChronoDuration::days(self.age_days + 1);
        let recent_at = now - ChronoDuration::days(1);

        let mut fixtures: Vec<EntityRecord> = (0..GENERIC_FIXTURES)
            .map(|i| {
                EntityRecord::new(tenant, format!("Generic Entity {i}"), GENERIC_ENTITY_TYPE)
                    .with_grade(0.05)
                    .with_metadata(json!({"type": "generic", "test": true}))
                    .aged_to(stale_at)
            })
            .collect();
        fixtures.extend((0..SPECIFIC_FIXTURES).map(|i| {
            EntityRecord::new(tenant, format!("Specific Entity {i}"), "person")
                .with_grade(0.8)
                .with_metadata(json!({"type": "specific", "test": true}))
                .aged_to(recent_at)
        }));
        fixtures.extend((0..CONTROL_FIXTURES).map(|i| {
            EntityRecord::new(tenant, format!("Recent Generic Entity {i}"), GENERIC_ENTITY_TYPE)
                .with_grade(0.05)
                .with_metadata(json!({"type": "generic", "control": "recent", "test": true}))
                .aged_to(recent_at)
        }));
        fixtures.extend((0..CONTROL_FIXTURES).map(|i| {
            EntityRecord::new(tenant, format!("Graded Generic Entity {i}"), GENERIC_ENTITY_TYPE)
                .with_grade(0.8)
                .with_metadata(json!({"type": "generic", "control": "graded", "test": true}))
                .aged_to(stale_at)
        }));
        self.store.insert_entities(&fixtures).await?;

        let start = Instant::now();
        let cleaned = self.purge_stale(tenant).await?;
        let cleanup_time_ms = duration_ms(start.elapsed());

        let remaining = self.store.count_entities(tenant, &EntityFilter::All).await?;
        let remaining_generic = self
            .store
            .count_entities(tenant, &EntityFilter::EntityType(GENERIC_ENTITY_TYPE.into()))
            .await?;
        let remaining_specific = remaining - remaining_generic;
        let created = fixtures.len() as u64;

        let details = CleanupDetails {
            entities_created: created,
            entities_cleaned: cleaned,
            expected_cleaned: GENERIC_FIXTURES,
            remaining_entities: remaining,
            remaining_specific,
            expected_remaining: SPECIFIC_FIXTURES,
            remaining_generic,
            expected_remaining_generic: 2 * CONTROL_FIXTURES,
            cleanup_time_ms,
            cleanup_efficiency: cleaned as f64 / created as f64,
        };
        if cleaned == GENERIC_FIXTURES
            && remaining_specific == SPECIFIC_FIXTURES
            && remaining_generic == 2 * CONTROL_FIXTURES
        {
            Ok(CheckOutcome::passed(details))
        } else {
            Ok(CheckOutcome::failed(
                format!(
                    "Cleanup did not work as expected. Cleaned: {cleaned}, Expected: {GENERIC_FIXTURES}"
                ),
                details,
            ))
        }
    }

    /// Week-old rows are decayed by the configured factor; rows touched
    /// within the last day keep their grade.
    pub async fn check_entity_grade_decay(&self) -> CheckResult {
        let tenant = TenantRef::fresh("decay_test");
        let outcome = self.decay_in(&tenant).await;
        self.teardown(&tenant).await;
        outcome
    }

    async fn decay_in(&self, tenant: &TenantRef) -> CheckResult {
        let now = Utc::now();
        let week_ago = now - ChronoDuration::days(7);
        let hour_ago = now - ChronoDuration::hours(1);
        let mut fixtures: Vec<EntityRecord> = DECAY_GRADES
            .iter()
            .enumerate()
            .map(|(i, grade)| {
                EntityRecord::new(tenant, format!("Decay Test Entity {i}"), "person")
                    .with_grade(*grade)
                    .with_metadata(json!({"initial_grade": grade, "past_cutoff": true, "test": true}))
                    .aged_to(week_ago)
            })
            .collect();
        fixtures.extend(RECENT_DECAY_GRADES.iter().enumerate().map(|(i, grade)| {
            EntityRecord::new(tenant, format!("Recent Decay Entity {i}"), "person")
                .with_grade(*grade)
                .with_metadata(json!({"initial_grade": grade, "past_cutoff": false, "test": true}))
                .aged_to(hour_ago)
        }));
        self.store.insert_entities(&fixtures).await?;

        let start = Instant::now();
        let cutoff = Utc::now() - ChronoDuration::days(1);
        let touched = self.store.decay_grades(tenant, self.decay_factor, cutoff).await?;
        let decay_time_ms = duration_ms(start.elapsed());

        let rows = self
            .store
            .query_entities(tenant, &EntityQuery::new(EntityFilter::All))
            .await?;
        let decay_results: Vec<DecayObservation> = rows
            .iter()
            .map(|row| {
                let initial_grade = row.metadata["initial_grade"].as_f64().unwrap_or(f64::NAN);
                let past_cutoff = row.metadata["past_cutoff"].as_bool().unwrap_or(true);
                let expected_grade = if past_cutoff {
                    initial_grade * self.decay_factor
                } else {
                    initial_grade
                };
                DecayObservation {
                    initial_grade,
                    past_cutoff,
                    current_grade: row.grade,
                    expected_grade,
                    decay_correct: (row.grade - expected_grade).abs() < DECAY_TOLERANCE,
                }
            })
            .collect();
        let all_correct = decay_results.len() == fixtures.len()
            && touched == DECAY_GRADES.len() as u64
            && decay_results.iter().all(|o| o.decay_correct);

        let details = DecayDetails {
            entities_processed: touched,
            decay_factor: self.decay_factor,
            decay_results,
            decay_time_ms,
        };
        if all_correct {
            Ok(CheckOutcome::passed(details))
        } else {
            Ok(CheckOutcome::failed(
                "Grade decay did not work correctly for all entities",
                details,
            ))
        }
    }

    /// Every maintenance statistics probe answers.
    pub async fn check_maintenance_operations(&self) -> CheckResult {
        let mut operations = Vec::with_capacity(MaintenanceOp::ALL.len());
        for op in MaintenanceOp::ALL {
            let start = Instant::now();
            let probe = self.store.maintenance_probe(op).await;
            let time_ms = duration_ms(start.elapsed());
            operations.push(match probe {
                Ok(rows_examined) => MaintenanceOperation {
                    operation: op.name().to_string(),
                    success: true,
                    rows_examined,
                    time_ms,
                    error: None,
                },
                Err(err) => MaintenanceOperation {
                    operation: op.name().to_string(),
                    success: false,
                    rows_examined: 0,
                    time_ms,
                    error: Some(err.to_string()),
                },
            });
        }

        let successful_operations = operations.iter().filter(|o| o.success).count();
        let total_operations = operations.len();
        let details = MaintenanceDetails {
            total_maintenance_time_ms: operations.iter().map(|o| o.time_ms).sum(),
            operations,
            successful_operations,
            total_operations,
        };
        if successful_operations == total_operations {
            Ok(CheckOutcome::passed(details))
        } else {
            Ok(CheckOutcome::warning(
                format!(
                    "Some maintenance operations failed: {}/{total_operations}",
                    total_operations - successful_operations
                ),
                details,
            ))
        }
    }

    /// Cleanup over 1000 rows is fast and does not slow queries down.
    pub async fn check_cleanup_performance_impact(&self) -> CheckResult {
        let tenant = TenantRef::fresh("performance_test");
        let outcome = self.impact_in(&tenant).await;
        self.teardown(&tenant).await;
        outcome
    }

    async fn impact_in(&self, tenant: &TenantRef) -> CheckResult {
        let now = Utc::now();
        let fixtures: Vec<EntityRecord> = (0..IMPACT_FIXTURES)
            .map(|i| {
                let stale = i % 2 == 0;
                let (kind, grade, age) = if stale {
                    (GENERIC_ENTITY_TYPE, 0.05, IMPACT_STALE_AGE_DAYS)
                } else {
                    ("person", 0.8, 1)
                };
                EntityRecord::new(tenant, format!("Performance Test Entity {i}"), kind)
                    .with_grade(grade)
                    .with_metadata(json!({"test": true, "index": i}))
                    .aged_to(now - ChronoDuration::days(age))
            })
            .collect();

        let baseline = Instant::now();
        for batch in fixtures.chunks(self.batch_size as usize) {
            self.store.insert_entities(batch).await?;
        }
        let baseline_time_ms = duration_ms(baseline.elapsed());

        let query_before = Instant::now();
        let count_before = self.store.count_entities(tenant, &EntityFilter::All).await?;
        let query_before_time_ms = duration_ms(query_before.elapsed());

        let cleanup = Instant::now();
        let cleaned = self.purge_stale(tenant).await?;
        let cleanup_time_ms = duration_ms(cleanup.elapsed());

        let query_after = Instant::now();
        let count_after = self.store.count_entities(tenant, &EntityFilter::All).await?;
        let query_after_time_ms = duration_ms(query_after.elapsed());

        let performance_improvement_percent = if query_before_time_ms > 0.0 {
            (query_before_time_ms - query_after_time_ms) / query_before_time_ms * 100.0
        } else {
            0.0
        };
        let acceptable_performance = cleanup_time_ms <= ACCEPTABLE_CLEANUP_MS
            && performance_improvement_percent >= ACCEPTABLE_DEGRADATION_PERCENT;
        info!(
            cleaned,
            cleanup_time_ms,
            performance_improvement_percent,
            "Cleanup performance measured"
        );

        let details = CleanupImpactDetails {
            entities_created: IMPACT_FIXTURES,
            entities_cleaned: cleaned,
            count_before,
            count_after,
            baseline_time_ms,
            cleanup_time_ms,
            query_before_time_ms,
            query_after_time_ms,
            performance_improvement_percent,
            cleanup_efficiency: cleaned as f64 / IMPACT_FIXTURES as f64,
            acceptable_performance,
        };
        if acceptable_performance {
            Ok(CheckOutcome::passed(details))
        } else {
            Ok(CheckOutcome::warning(
                format!(
                    "Cleanup performance may be suboptimal. Time: {cleanup_time_ms:.1}ms, Performance change: {performance_improvement_percent:.1}%"
                ),
                details,
            ))
        }
    }
}

#[async_trait]
impl Validator for CleanupValidator {
    fn name(&self) -> &str {
        "CleanupValidator"
    }

    async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
        let mut base = BaseValidator::new(self.name());
        base.run_test("generic_entity_cleanup", || self.check_generic_entity_cleanup())
            .await;
        base.run_test("entity_grade_decay", || self.check_entity_grade_decay()).await;
        base.run_test("database_maintenance_operations", || {
            self.check_maintenance_operations()
        })
        .await;
        base.run_test("cleanup_performance_impact", || {
            self.check_cleanup_performance_impact()
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
    use memory_validation_core::store::InMemoryStore;

    fn validator(store: Arc<InMemoryStore>) -> CleanupValidator {
        CleanupValidator::new(store, &ValidationConfig::default())
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_stale_generic_rows() {
        let store = Arc::new(InMemoryStore::new());
        let outcome = validator(store.clone()).check_generic_entity_cleanup().await.unwrap();

        let CheckOutcome::Passed(Details::Cleanup(details)) = outcome else {
            panic!("cleanup should pass with cleanup details, got {outcome:?}");
        };
        assert_eq!(details.entities_created, 19);
        assert_eq!(details.entities_cleaned, 10);
        assert_eq!(details.remaining_entities, 9);
        assert_eq!(details.remaining_specific, 5);
        assert_eq!(details.remaining_generic, 4);
        assert!((details.cleanup_efficiency - 10.0 / 19.0).abs() < 1e-9);
        assert_eq!(store.entity_rows(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_fails_when_high_grade_generic_rows_are_removed() {
        let store = Arc::new(InMemoryStore::new());
        let config = ValidationConfig {
            grade_decay_threshold: 0.9,
            ..ValidationConfig::default()
        };
        let outcome = CleanupValidator::new(store, &config)
            .check_generic_entity_cleanup()
            .await
            .unwrap();

        let CheckOutcome::Failed { message, details: Details::Cleanup(details) } = outcome else {
            panic!("cleanup should fail");
        };
        assert_eq!(message, "Cleanup did not work as expected. Cleaned: 12, Expected: 10");
        assert_eq!(details.remaining_generic, 2);
    }

    #[tokio::test]
    async fn test_cleanup_fails_when_recent_generic_rows_are_removed() {
        let store = Arc::new(InMemoryStore::new());
        let config = ValidationConfig {
            generic_entity_age_days: 0,
            ..ValidationConfig::default()
        };
        let outcome = CleanupValidator::new(store, &config)
            .check_generic_entity_cleanup()
            .await
            .unwrap();

        let CheckOutcome::Failed { details: Details::Cleanup(details), .. } = outcome else {
            panic!("cleanup should fail");
        };
        assert_eq!(details.entities_cleaned, 12);
        assert_eq!(details.remaining_specific, 5);
    }

    #[tokio::test]
    async fn test_wrong_threshold_fails_with_counts() {
        let store = Arc::new(InMemoryStore::new());
        let config = ValidationConfig {
            grade_decay_threshold: 0.01,
            ..ValidationConfig::default()
        };
        let outcome = CleanupValidator::new(store, &config)
            .check_generic_entity_cleanup()
            .await
            .unwrap();
        let CheckOutcome::Failed { message, .. } = outcome else {
            panic!("cleanup should fail");
        };
        assert_eq!(message, "Cleanup did not work as expected. Cleaned: 0, Expected: 10");
    }

    #[tokio::test]
    async fn test_decay_applies_factor_to_every_row() {
        let store = Arc::new(InMemoryStore::new());
        let outcome = validator(store).check_entity_grade_decay().await.unwrap();

        let CheckOutcome::Passed(Details::Decay(details)) = outcome else {
            panic!("decay should pass");
        };
        assert_eq!(details.entities_processed, 5);
        assert_eq!(details.decay_results.len(), 7);
        assert!(details.decay_results.iter().all(|o| o.decay_correct));
        let kept: Vec<_> = details.decay_results.iter().filter(|o| !o.past_cutoff).collect();
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|o| o.current_grade == o.initial_grade));
    }

    #[tokio::test]
    async fn test_validator_runs_four_checks_without_failures() {
        let store = Arc::new(InMemoryStore::new());
        let results = validator(store.clone()).run_validation().await.unwrap();

        let names: Vec<_> = results.iter().map(|r| r.test_name()).collect();
        assert_eq!(
            names,
            vec![
                "generic_entity_cleanup",
                "entity_grade_decay",
                "database_maintenance_operations",
                "cleanup_performance_impact"
            ]
        );
        assert!(results.iter().all(|r| r.status() != Status::Failed));
        assert_eq!(results[2].status(), Status::Passed);
        assert!(store.tenants().is_empty());
    }
}
