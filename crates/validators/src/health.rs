// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Liveness checks for the store, the three APIs and a basic CRUD round trip.

use async_trait::async_trait;
use memory_validation_core::config::ValidationConfig;
use memory_validation_core::details::HealthFacts;
use memory_validation_core::error::StoreError;
use memory_validation_core::http::HttpProbe;
use memory_validation_core::model::{HealthCheckResult, HealthStatus, ValidationResult};
use memory_validation_core::stats::duration_ms;
use memory_validation_core::store::{
    EntityPatch, EntityRecord, MemoryStore, TenantRef, REQUIRED_TABLES,
};
use memory_validation_core::validator::{best_effort, BaseValidator};
use memory_validation_core::{Validator, ValidatorError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Paths tried in order on each API; the first answering 200 or 404 wins.
pub const HEALTH_PATHS: [&str; 3] = ["/health", "/", "/docs"];

const HEALTH_ENTITY_NAME: &str = "Health Check Entity";
const UPDATED_HEALTH_ENTITY_NAME: &str = "Updated Health Check Entity";

/// Aggregate liveness over every component checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    /// Every component is healthy.
    Healthy,
    /// Some components are healthy.
    Degraded,
    /// No component is healthy.
    Unhealthy,
    /// Nothing was checked.
    NotRun,
}

/// One line of the health summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name.
    pub name: String,
    /// Liveness level.
    pub status: HealthStatus,
    /// Probe duration.
    pub response_time_ms: f64,
    /// Why the component is not healthy.
    pub error: Option<String>,
}

/// Summary of one health run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Aggregate liveness.
    pub status: OverallHealth,
    /// Components reporting healthy.
    pub healthy_components: usize,
    /// Components checked.
    pub total_components: usize,
    /// Per-component lines, in check order.
    pub components: Vec<ComponentHealth>,
}

impl HealthSummary {
    /// Summarize health records.
    pub fn from_checks(checks: &[HealthCheckResult]) -> Self {
        let healthy_components = checks.iter().filter(|c| c.is_healthy()).count();
        let total_components = checks.len();
        let status = if total_components == 0 {
            OverallHealth::NotRun
        } else if healthy_components == total_components {
            OverallHealth::Healthy
        } else if healthy_components > 0 {
            OverallHealth::Degraded
        } else {
            OverallHealth::Unhealthy
        };

        Self {
            status,
            healthy_components,
            total_components,
            components: checks
                .iter()
                .map(|c| ComponentHealth {
                    name: c.component.clone(),
                    status: c.status,
                    response_time_ms: c.response_time_ms,
                    error: c.error_message.clone(),
                })
                .collect(),
        }
    }
}

/// Health checks over the store and the API interfaces.
pub struct MemorySystemHealthChecker {
    store: Option<Arc<dyn MemoryStore>>,
    http: Arc<dyn HttpProbe>,
    interfaces: Vec<(String, String)>,
}

impl std::fmt::Debug for MemorySystemHealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySystemHealthChecker")
            .field("store_configured", &self.store.is_some())
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

impl MemorySystemHealthChecker {
    /// Checker over `store` (absent when no store is configured) and the
    /// interfaces named in `config`.
    pub fn new(
        store: Option<Arc<dyn MemoryStore>>,
        http: Arc<dyn HttpProbe>,
        config: &ValidationConfig,
    ) -> Self {
        let interfaces = [
            ("internal", &config.internal_api_url),
            ("external", &config.external_api_url),
            ("mcp", &config.mcp_api_url),
        ]
        .into_iter()
        .map(|(name, url)| (name.to_string(), url.trim_end_matches('/').to_string()))
        .collect();

        Self {
            store,
            http,
            interfaces,
        }
    }

    /// Ping the store and verify the required tables.
    pub async fn check_database_health(&self) -> HealthCheckResult {
        let Some(store) = &self.store else {
            return HealthCheckResult::new(
                "database",
                HealthStatus::Unhealthy,
                0.0,
                Some("DATABASE_URL not configured".to_string()),
                HealthFacts::default(),
            );
        };
        let start = Instant::now();

        if let Err(err) = store.ping().await {
            return HealthCheckResult::new(
                "database",
                HealthStatus::Unhealthy,
                duration_ms(start.elapsed()),
                Some(err.to_string()),
                HealthFacts {
                    connection_successful: Some(false),
                    ..HealthFacts::default()
                },
            );
        }

        let mut tables_checked = Vec::with_capacity(REQUIRED_TABLES.len());
        for table in REQUIRED_TABLES {
            if let Err(err) = store.check_tables(&[table]).await {
                return HealthCheckResult::new(
                    "database",
                    HealthStatus::Unhealthy,
                    duration_ms(start.elapsed()),
                    Some(format!("Table {table} not accessible: {err}")),
                    HealthFacts {
                        connection_successful: Some(true),
                        tables_checked,
                        ..HealthFacts::default()
                    },
                );
            }
            tables_checked.push(table.to_string());
        }

        HealthCheckResult::new(
            "database",
            HealthStatus::Healthy,
            duration_ms(start.elapsed()),
            None,
            HealthFacts {
                connection_successful: Some(true),
                tables_checked,
                ..HealthFacts::default()
            },
        )
    }

    /// Probe one API on each of [`HEALTH_PATHS`].
    pub async fn check_api_endpoint(&self, name: &str, base_url: &str) -> HealthCheckResult {
        let component = format!("api_{name}");
        if base_url.is_empty() {
            return HealthCheckResult::new(
                component,
                HealthStatus::Unhealthy,
                0.0,
                Some(format!("URL not configured for {name} API")),
                HealthFacts::default(),
            );
        }

        let start = Instant::now();
        let mut last_error = String::from("no endpoint tried");
        for path in HEALTH_PATHS {
            let endpoint = format!("{base_url}{path}");
            match self.http.get(&endpoint, &[]).await {
                Ok(response) if matches!(response.status, 200 | 404) => {
                    return HealthCheckResult::new(
                        component,
                        HealthStatus::Healthy,
                        duration_ms(start.elapsed()),
                        None,
                        HealthFacts {
                            endpoint: Some(endpoint),
                            status_code: Some(response.status),
                            response_size: Some(response.body.len()),
                            ..HealthFacts::default()
                        },
                    );
                }
                Ok(response) => last_error = format!("HTTP {}", response.status),
                Err(err) => last_error = err.to_string(),
            }
        }

        HealthCheckResult::new(
            component,
            HealthStatus::Unhealthy,
            duration_ms(start.elapsed()),
            Some(format!("All endpoints failed. Last error: {last_error}")),
            HealthFacts::default(),
        )
    }

    /// Probe every configured API.
    pub async fn check_api_endpoints(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(self.interfaces.len());
        for (name, url) in &self.interfaces {
            results.push(self.check_api_endpoint(name, url).await);
        }
        results
    }

    /// Create, read, update and delete one throwaway entity.
    pub async fn check_basic_operations(&self) -> HealthCheckResult {
        let Some(store) = &self.store else {
            return HealthCheckResult::new(
                "basic_operations",
                HealthStatus::Unhealthy,
                0.0,
                Some("Database not configured".to_string()),
                HealthFacts::default(),
            );
        };
        let start = Instant::now();
        let tenant = TenantRef::fresh("health_check");
        let entity = EntityRecord::new(&tenant, HEALTH_ENTITY_NAME, "test")
            .with_metadata(json!({"test": true}));

        let outcome = crud_round_trip(store.as_ref(), &tenant, &entity).await;
        // The round trip deletes the entity; this only matters when it stopped early.
        if outcome.is_err() {
            best_effort("health check fixture", store.delete_entity(&tenant, entity.id)).await;
        }
        let elapsed = duration_ms(start.elapsed());

        match outcome {
            Ok(()) => HealthCheckResult::new(
                "basic_operations",
                HealthStatus::Healthy,
                elapsed,
                None,
                HealthFacts {
                    operations_tested: ["CREATE", "READ", "UPDATE", "DELETE"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                    ..HealthFacts::default()
                },
            ),
            Err(message) => HealthCheckResult::new(
                "basic_operations",
                HealthStatus::Unhealthy,
                elapsed,
                Some(message),
                HealthFacts::default(),
            ),
        }
    }

    /// Every health record: database, APIs, then basic operations (only
    /// attempted when the database is healthy).
    pub async fn check_all(&self) -> Vec<HealthCheckResult> {
        let database = self.check_database_health().await;
        let database_healthy = database.is_healthy();

        let mut checks = vec![database];
        checks.extend(self.check_api_endpoints().await);
        if database_healthy {
            checks.push(self.check_basic_operations().await);
        } else {
            checks.push(HealthCheckResult::new(
                "basic_operations",
                HealthStatus::Unhealthy,
                0.0,
                Some("Skipped due to database health issues".to_string()),
                HealthFacts::default(),
            ));
        }
        checks
    }
}

async fn crud_round_trip(
    store: &dyn MemoryStore,
    tenant: &TenantRef,
    entity: &EntityRecord,
) -> Result<(), String> {
    let fail = |err: StoreError| err.to_string();

    let inserted = store.insert_entity(entity).await.map_err(fail)?;
    if let memory_validation_core::store::InsertOutcome::Violation(v) = inserted {
        return Err(format!("Entity create test failed: {v}"));
    }

    let read = store.get_entity(tenant, entity.id).await.map_err(fail)?;
    if read.map(|e| e.name).as_deref() != Some(HEALTH_ENTITY_NAME) {
        return Err("Entity read test failed".to_string());
    }

    let patch = EntityPatch {
        name: Some(UPDATED_HEALTH_ENTITY_NAME.to_string()),
        ..EntityPatch::default()
    };
    let updated = store
        .update_entity(tenant, entity.id, &patch)
        .await
        .map_err(fail)?;
    if updated.map(|e| e.name).as_deref() != Some(UPDATED_HEALTH_ENTITY_NAME) {
        return Err("Entity update test failed".to_string());
    }

    if !store.delete_entity(tenant, entity.id).await.map_err(fail)? {
        return Err("Entity delete test failed".to_string());
    }
    Ok(())
}

#[async_trait]
impl Validator for MemorySystemHealthChecker {
    fn name(&self) -> &str {
        "MemorySystemHealthChecker"
    }

    async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
        info!("Starting memory system health checks");
        let checks = self.check_all().await;

        let summary = HealthSummary::from_checks(&checks);
        match summary.status {
            OverallHealth::Healthy => info!(
                healthy = summary.healthy_components,
                total = summary.total_components,
                "All components healthy"
            ),
            status => warn!(
                ?status,
                healthy = summary.healthy_components,
                total = summary.total_components,
                "Some components are not healthy"
            ),
        }

        let mut base = BaseValidator::new(self.name());
        for check in &checks {
            base.record(check.to_validation_result());
        }
        Ok(base.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_validation_core::error::HttpError;
    use memory_validation_core::http::{HttpMethod, HttpResponse, StubHttpProbe};
    use memory_validation_core::model::Status;
    use memory_validation_core::store::InMemoryStore;

    fn config() -> ValidationConfig {
        ValidationConfig {
            internal_api_url: "http://internal".into(),
            external_api_url: "http://external/".into(),
            mcp_api_url: "http://mcp".into(),
            ..ValidationConfig::default()
        }
    }

    fn healthy_probe() -> StubHttpProbe {
        StubHttpProbe::new()
            .route_json(HttpMethod::Get, "http://internal/health", 200, json!({"ok": true}))
            .route(HttpMethod::Get, "http://external/health", HttpResponse::status(503))
            .route(HttpMethod::Get, "http://external/", HttpResponse::status(404))
            .route_json(HttpMethod::Get, "http://mcp/health", 200, json!({}))
    }

    #[tokio::test]
    async fn test_every_component_healthy() {
        let store = Arc::new(InMemoryStore::new());
        let checker = MemorySystemHealthChecker::new(
            Some(store.clone()),
            Arc::new(healthy_probe()),
            &config(),
        );

        let checks = checker.check_all().await;
        let components: Vec<_> = checks.iter().map(|c| c.component.as_str()).collect();
        assert_eq!(
            components,
            vec!["database", "api_internal", "api_external", "api_mcp", "basic_operations"]
        );
        assert!(checks.iter().all(|c| c.is_healthy()));
        assert_eq!(checks[0].details.tables_checked.len(), 2);
        assert_eq!(checks[2].details.endpoint.as_deref(), Some("http://external/"));
        assert_eq!(checks[2].details.status_code, Some(404));
        assert_eq!(checks[4].details.operations_tested.len(), 4);
        assert_eq!(store.entity_rows(), 0);

        assert_eq!(HealthSummary::from_checks(&checks).status, OverallHealth::Healthy);
    }

    #[tokio::test]
    async fn test_unreachable_api_reports_last_error() {
        let probe = StubHttpProbe::new()
            .route(HttpMethod::Get, "http://internal/health", HttpResponse::status(500))
            .route(HttpMethod::Get, "http://internal/", HttpResponse::status(502))
            .fail(
                HttpMethod::Get,
                "http://internal/docs",
                HttpError::ConnectionRefused("http://internal/docs".into()),
            );
        let checker =
            MemorySystemHealthChecker::new(None, Arc::new(probe), &config());

        let result = checker.check_api_endpoint("internal", "http://internal").await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(
            result.error_message.as_deref(),
            Some("All endpoints failed. Last error: Connection refused: http://internal/docs")
        );
    }

    #[tokio::test]
    async fn test_missing_store_skips_basic_operations() {
        let checker =
            MemorySystemHealthChecker::new(None, Arc::new(healthy_probe()), &config());
        let results = checker.run_validation().await.unwrap();

        assert_eq!(results[0].test_name(), "health_check_database");
        assert_eq!(results[0].status(), Status::Failed);
        assert_eq!(results[0].error_message(), Some("DATABASE_URL not configured"));

        let ops = results.last().unwrap();
        assert_eq!(ops.test_name(), "health_check_basic_operations");
        assert_eq!(ops.error_message(), Some("Skipped due to database health issues"));
        assert_eq!(results[1].status(), Status::Passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_round_trip_removes_fixture() {
        use crate::faults::{FaultInjectingStore, StoreFault};
        use std::time::Duration;

        let inner = Arc::new(InMemoryStore::builder().latency(Duration::from_millis(10)).build());
        let store = Arc::new(FaultInjectingStore::new(inner.clone(), Duration::ZERO));
        let checker =
            MemorySystemHealthChecker::new(Some(store.clone()), Arc::new(healthy_probe()), &config());

        // Connection drops once, after the insert and before the update.
        let (result, ()) = tokio::join!(checker.check_basic_operations(), async {
            tokio::time::sleep(Duration::from_millis(15)).await;
            let _fault = store.faults().arm(StoreFault::ConnectionLost, Some(1));
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("server closed the connection")));
        assert_eq!(inner.entity_rows(), 0);
    }

    #[tokio::test]
    async fn test_failed_fixture_cleanup_keeps_original_error() {
        use crate::faults::{FaultInjectingStore, StoreFault};
        use std::time::Duration;

        let inner = Arc::new(InMemoryStore::new());
        let store = Arc::new(FaultInjectingStore::new(inner, Duration::ZERO));
        let _fault = store.faults().arm(StoreFault::Deadlock, None);
        let checker =
            MemorySystemHealthChecker::new(Some(store.clone()), Arc::new(healthy_probe()), &config());

        let result = checker.check_basic_operations().await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("deadlock victim")));
    }

    #[test]
    fn test_summary_levels() {
        let healthy = HealthCheckResult::new("a", HealthStatus::Healthy, 1.0, None, HealthFacts::default());
        let sick = HealthCheckResult::new(
            "b",
            HealthStatus::Unhealthy,
            1.0,
            Some("down".into()),
            HealthFacts::default(),
        );

        assert_eq!(HealthSummary::from_checks(&[]).status, OverallHealth::NotRun);
        let mixed = HealthSummary::from_checks(&[healthy.clone(), sick.clone()]);
        assert_eq!(mixed.status, OverallHealth::Degraded);
        assert_eq!(mixed.healthy_components, 1);
        assert_eq!(mixed.components[1].error.as_deref(), Some("down"));
        assert_eq!(HealthSummary::from_checks(&[sick]).status, OverallHealth::Unhealthy);
        assert_eq!(HealthSummary::from_checks(&[healthy]).status, OverallHealth::Healthy);
    }
}
