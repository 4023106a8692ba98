// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cross-interface consistency: the internal, external and MCP APIs should
//! answer the same request the same way.

use async_trait::async_trait;
use memory_validation_core::config::ValidationConfig;
use memory_validation_core::details::{
    AvailabilityDetails, EndpointAvailability, InterfaceDetails, InterfaceResponse,
};
use memory_validation_core::error::HttpError;
use memory_validation_core::fixtures::TestDataGenerator;
use memory_validation_core::http::{HttpMethod, HttpProbe, HttpResponse};
use memory_validation_core::model::ValidationResult;
use memory_validation_core::stats::duration_ms;
use memory_validation_core::store::{purge_tenant, EntityRecord, MemoryStore, TenantRef};
use memory_validation_core::validator::{best_effort, BaseValidator, CheckOutcome, CheckResult};
use memory_validation_core::{Validator, ValidatorError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

const INTERNAL: &str = "internal_api";
const EXTERNAL: &str = "external_api";
const MCP: &str = "mcp_api";

/// Interfaces serving the REST entity routes.
const REST_INTERFACES: [&str; 2] = [INTERNAL, EXTERNAL];

/// Error scenarios: name, path, method.
const ERROR_SCENARIOS: [(&str, &str, HttpMethod); 3] = [
    ("invalid_endpoint", "/nonexistent", HttpMethod::Get),
    ("invalid_method", "/entities", HttpMethod::Patch),
    ("malformed_data", "/entities", HttpMethod::Post),
];

const SEARCH_FIXTURES: usize = 3;

/// Consistency checks across the configured API interfaces.
pub struct InterfaceConsistencyValidator {
    http: Arc<dyn HttpProbe>,
    store: Option<Arc<dyn MemoryStore>>,
    interfaces: Vec<(String, String)>,
    cleanup_batch_size: u64,
    generator: Mutex<TestDataGenerator>,
}

impl std::fmt::Debug for InterfaceConsistencyValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceConsistencyValidator")
            .field("interfaces", &self.interfaces)
            .field("store_configured", &self.store.is_some())
            .finish()
    }
}

fn record(result: Result<HttpResponse, HttpError>) -> InterfaceResponse {
    match result {
        Ok(response) => {
            let ok = response.status == 200;
            InterfaceResponse {
                status_code: Some(response.status),
                content_type: response.content_type.clone(),
                data: if ok { response.body_json().ok() } else { None },
                error: if ok { None } else { Some(response.body) },
                expected_unauthorized: None,
            }
        }
        Err(err) => InterfaceResponse {
            error: Some(err.to_string()),
            ..InterfaceResponse::default()
        },
    }
}

/// Row count of a search answer, counted the way a JSON `len` would.
fn result_count(data: Option<&Value>) -> usize {
    match data {
        None | Some(Value::Null) => 0,
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(fields)) => fields.len(),
        Some(_) => 1,
    }
}

/// Failed with every issue listed after `prefix`, or passed when there are none.
fn conclude(prefix: &str, details: InterfaceDetails) -> CheckOutcome {
    if details.consistency_issues.is_empty() {
        CheckOutcome::passed(details)
    } else {
        let message = format!("{prefix}: {}", details.consistency_issues.join("; "));
        CheckOutcome::failed(message, details)
    }
}

impl InterfaceConsistencyValidator {
    /// Validator over the interfaces in `config`. Search fixtures need a
    /// store; without one that check fails.
    pub fn new(
        http: Arc<dyn HttpProbe>,
        store: Option<Arc<dyn MemoryStore>>,
        config: &ValidationConfig,
    ) -> Self {
        let interfaces = config
            .interfaces()
            .into_iter()
            .map(|(name, url)| (name.to_string(), url.trim_end_matches('/').to_string()))
            .collect();
        Self {
            http,
            store,
            interfaces,
            cleanup_batch_size: config.cleanup_batch_size,
            generator: Mutex::new(TestDataGenerator::new(42)),
        }
    }

    fn base_url(&self, interface: &str) -> &str {
        self.interfaces
            .iter()
            .find(|(name, _)| name == interface)
            .map(|(_, url)| url.as_str())
            .unwrap_or_default()
    }

    fn people(&self, tenant: &TenantRef, count: usize) -> Vec<EntityRecord> {
        match self.generator.lock() {
            Ok(mut generator) => generator.people(tenant, count),
            Err(_) => TestDataGenerator::new(42).people(tenant, count),
        }
    }

    /// Every interface answers 200 on its health path (`/status` for MCP).
    pub async fn check_interface_availability(&self) -> CheckResult {
        let mut availability = BTreeMap::new();
        for (name, base_url) in &self.interfaces {
            let path = if name == MCP { "/status" } else { "/health" };
            let start = Instant::now();
            let result = self.http.get(&format!("{base_url}{path}"), &[]).await;
            let response_time_ms = duration_ms(start.elapsed());
            let entry = match result {
                Ok(response) => EndpointAvailability {
                    available: response.status == 200,
                    status_code: Some(response.status),
                    response_time_ms,
                    error: None,
                },
                Err(err) => EndpointAvailability {
                    available: false,
                    status_code: None,
                    response_time_ms,
                    error: Some(err.to_string()),
                },
            };
            availability.insert(name.clone(), entry);
        }

        let available = availability.values().filter(|a| a.available).count();
        let total = availability.len();
        let details = AvailabilityDetails(availability);
        Ok(if available == 0 {
            CheckOutcome::failed("No interfaces are available", details)
        } else if available < total {
            CheckOutcome::warning(
                format!("Only {available}/{total} interfaces available"),
                details,
            )
        } else {
            CheckOutcome::passed(details)
        })
    }

    /// POST the same entity to every REST interface and compare what comes back.
    pub async fn check_entity_creation_consistency(&self) -> CheckResult {
        let tenant = TenantRef::fresh("interface_test");
        let Some(entity) = self.people(&tenant, 1).pop() else {
            return Ok(CheckOutcome::skipped("No fixture entity"));
        };
        let body = json!({
            "name": entity.name,
            "entity_type": entity.entity_type,
            "metadata": entity.metadata,
            "client_user_id": tenant.actor_id,
        });

        let mut responses = BTreeMap::new();
        for interface in REST_INTERFACES {
            let url = format!("{}/entities", self.base_url(interface));
            responses.insert(interface.to_string(), record(self.http.post_json(&url, &body).await));
        }
        responses.insert(
            MCP.to_string(),
            InterfaceResponse {
                error: Some("MCP testing requires protocol implementation".to_string()),
                ..InterfaceResponse::default()
            },
        );

        let successful: Vec<&InterfaceResponse> = responses
            .values()
            .filter(|r| r.status_code == Some(200))
            .collect();
        let mut details = InterfaceDetails {
            successful_interfaces: successful.len(),
            ..InterfaceDetails::default()
        };
        if successful.len() < 2 {
            details.interface_responses = responses;
            return Ok(CheckOutcome::failed(
                "Not enough interfaces responded successfully to compare consistency",
                details,
            ));
        }

        let mut issues = Vec::new();
        if let Some(Value::Object(first)) = successful[0].data.as_ref() {
            for other in &successful[1..] {
                if let Some(Value::Object(data)) = other.data.as_ref() {
                    for key in ["name", "entity_type"] {
                        if first.get(key) != data.get(key) {
                            issues.push(format!("Field '{key}' differs between interfaces"));
                        }
                    }
                }
            }
        }
        details.interface_responses = responses;
        details.consistency_issues = issues;
        Ok(conclude("Consistency issues found", details))
    }

    /// Seed entities, search for them on each REST interface, compare counts.
    pub async fn check_search_consistency(&self) -> CheckResult {
        let Some(store) = &self.store else {
            return Ok(CheckOutcome::failed("Database URL not configured", InterfaceDetails::default()));
        };
        let tenant = TenantRef::fresh("search_test");
        let outcome = self.search_consistency(store.as_ref(), &tenant).await;
        best_effort(
            "search fixtures",
            purge_tenant(store.as_ref(), &tenant, self.cleanup_batch_size),
        )
        .await;
        outcome
    }

    async fn search_consistency(&self, store: &dyn MemoryStore, tenant: &TenantRef) -> CheckResult {
        store.insert_entities(&self.people(tenant, SEARCH_FIXTURES)).await?;

        let mut responses = BTreeMap::new();
        for interface in REST_INTERFACES {
            let url = format!(
                "{}/entities/search?client_user_id={}&entity_type=person",
                self.base_url(interface),
                tenant.actor_id
            );
            responses.insert(interface.to_string(), record(self.http.get(&url, &[]).await));
        }

        let counts: Vec<usize> = responses
            .values()
            .filter(|r| r.status_code == Some(200))
            .map(|r| result_count(r.data.as_ref()))
            .collect();
        let mut details = InterfaceDetails {
            successful_interfaces: counts.len(),
            interface_responses: responses,
            ..InterfaceDetails::default()
        };
        if counts.len() < 2 {
            return Ok(CheckOutcome::warning(
                "Not enough interfaces responded successfully to compare search consistency",
                details,
            ));
        }

        details.consistency_issues = counts[1..]
            .iter()
            .filter(|n| **n != counts[0])
            .map(|n| format!("Different result counts: {} vs {n}", counts[0]))
            .collect();
        Ok(conclude("Search consistency issues", details))
    }

    /// Requests without a token, or with an invalid one, are rejected.
    pub async fn check_authentication_consistency(&self) -> CheckResult {
        let mut responses = BTreeMap::new();
        let mut issues = Vec::new();
        let invalid = vec![("Authorization".to_string(), "Bearer invalid_token".to_string())];

        for interface in REST_INTERFACES {
            let url = format!("{}/entities", self.base_url(interface));
            for (probe, headers, rejection) in [
                ("no_auth", &[][..], "without authentication"),
                ("invalid_auth", &invalid[..], "with invalid authentication"),
            ] {
                match self.http.get(&url, headers).await {
                    Ok(response) => {
                        let rejected = matches!(response.status, 401 | 403);
                        if !rejected {
                            issues.push(format!(
                                "{interface} does not properly reject requests {rejection}"
                            ));
                        }
                        responses.insert(
                            format!("{interface}_{probe}"),
                            InterfaceResponse {
                                status_code: Some(response.status),
                                content_type: response.content_type,
                                error: Some(response.body),
                                expected_unauthorized: Some(rejected),
                                ..InterfaceResponse::default()
                            },
                        );
                    }
                    Err(err) => {
                        debug!(interface, error = %err, "Authentication probe failed");
                        responses.insert(format!("{interface}_error"), record(Err(err)));
                        break;
                    }
                }
            }
        }

        let details = InterfaceDetails {
            interface_responses: responses,
            consistency_issues: issues,
            successful_interfaces: 0,
        };
        Ok(conclude("Authentication consistency issues", details))
    }

    /// Each error scenario gets the same status and media type everywhere.
    pub async fn check_error_response_consistency(&self) -> CheckResult {
        let mut responses = BTreeMap::new();
        let mut issues = Vec::new();

        for (scenario, path, method) in ERROR_SCENARIOS {
            let mut statuses = Vec::new();
            let mut media_types = Vec::new();
            for interface in REST_INTERFACES {
                let url = format!("{}{path}", self.base_url(interface));
                let body = (method == HttpMethod::Post).then(|| json!({"invalid": "data structure"}));
                let result = self.http.request(method, &url, body).await;
                if let Ok(response) = &result {
                    statuses.push(response.status);
                    media_types.push(response.media_type().unwrap_or_default().to_string());
                }
                responses.insert(format!("{interface}/{scenario}"), record(result));
            }

            if statuses.windows(2).any(|w| w[0] != w[1]) {
                issues.push(format!("Inconsistent status codes for {scenario}: {statuses:?}"));
            }
            if media_types.windows(2).any(|w| w[0] != w[1]) {
                issues.push(format!("Inconsistent content types for {scenario}: {media_types:?}"));
            }
        }

        let details = InterfaceDetails {
            interface_responses: responses,
            consistency_issues: issues,
            successful_interfaces: 0,
        };
        Ok(conclude("Error response consistency issues", details))
    }
}

#[async_trait]
impl Validator for InterfaceConsistencyValidator {
    fn name(&self) -> &str {
        "InterfaceConsistencyValidator"
    }

    async fn run_validation(&self) -> Result<Vec<ValidationResult>, ValidatorError> {
        info!(interfaces = self.interfaces.len(), "Starting interface consistency validation");
        let mut base = BaseValidator::new(self.name());

        base.run_test("interface_availability", || self.check_interface_availability())
            .await;
        base.run_test("entity_creation_consistency", || {
            self.check_entity_creation_consistency()
        })
        .await;
        base.run_test("search_consistency", || self.check_search_consistency())
            .await;
        base.run_test("authentication_consistency", || {
            self.check_authentication_consistency()
        })
        .await;
        base.run_test("error_response_consistency", || {
            self.check_error_response_consistency()
        })
        .await;

        Ok(base.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_validation_core::model::Status;
    use memory_validation_core::store::InMemoryStore;
    use memory_validation_core::StubHttpProbe;

    fn config() -> ValidationConfig {
        ValidationConfig {
            internal_api_url: "http://internal".into(),
            external_api_url: "http://external".into(),
            mcp_api_url: "http://mcp".into(),
            ..ValidationConfig::default()
        }
    }

    fn validator(probe: StubHttpProbe, store: Option<Arc<dyn MemoryStore>>) -> InterfaceConsistencyValidator {
        InterfaceConsistencyValidator::new(Arc::new(probe), store, &config())
    }

    fn consistent_probe() -> StubHttpProbe {
        let created = json!({"name": "Alice", "entity_type": "person"});
        let mut probe = StubHttpProbe::new()
            .route_json(HttpMethod::Get, "http://internal/health", 200, json!({}))
            .route_json(HttpMethod::Get, "http://external/health", 200, json!({}))
            .route_json(HttpMethod::Get, "http://mcp/status", 200, json!({}))
            .route_json(HttpMethod::Post, "http://internal/entities", 200, created.clone())
            .route_json(HttpMethod::Post, "http://external/entities", 200, created);
        for host in ["internal", "external"] {
            probe = probe
                .route_json(HttpMethod::Get, format!("http://{host}/entities"), 401, json!({"detail": "Not authenticated"}))
                .route_json(HttpMethod::Get, format!("http://{host}/nonexistent"), 404, json!({"detail": "Not Found"}))
                .route_json(HttpMethod::Patch, format!("http://{host}/entities"), 405, json!({"detail": "Method Not Allowed"}));
        }
        probe
    }

    #[tokio::test]
    async fn test_consistent_interfaces_pass() {
        let results = validator(consistent_probe(), None).run_validation().await.unwrap();

        let names: Vec<_> = results.iter().map(|r| r.test_name()).collect();
        assert_eq!(
            names,
            vec![
                "interface_availability",
                "entity_creation_consistency",
                "search_consistency",
                "authentication_consistency",
                "error_response_consistency"
            ]
        );
        assert_eq!(results[0].status(), Status::Passed);
        assert_eq!(results[1].status(), Status::Passed);
        assert_eq!(results[2].error_message(), Some("Database URL not configured"));
        assert_eq!(results[3].status(), Status::Passed);
        assert_eq!(results[4].status(), Status::Passed);
    }

    #[tokio::test]
    async fn test_nothing_reachable() {
        let memory = Arc::new(InMemoryStore::new());
        let results = validator(StubHttpProbe::new(), Some(memory.clone())).run_validation().await.unwrap();

        assert_eq!(results[0].error_message(), Some("No interfaces are available"));
        assert_eq!(
            results[1].error_message(),
            Some("Not enough interfaces responded successfully to compare consistency")
        );
        assert_eq!(results[2].status(), Status::Warning);
        assert!(memory.tenants().is_empty());
    }

    #[tokio::test]
    async fn test_partial_availability_is_a_warning() {
        let probe = StubHttpProbe::new().route_json(HttpMethod::Get, "http://internal/health", 200, json!({}));
        let outcome = validator(probe, None).check_interface_availability().await.unwrap();

        let CheckOutcome::Warning { message, details } = outcome else {
            panic!("expected a warning");
        };
        assert_eq!(message, "Only 1/3 interfaces available");
        let memory_validation_core::Details::Availability(availability) = details else {
            panic!("expected availability details");
        };
        assert!(availability.0["internal_api"].available);
        assert!(availability.0["mcp_api"].error.is_some());
    }

    #[tokio::test]
    async fn test_created_entity_mismatch() {
        let probe = consistent_probe().route_json(
            HttpMethod::Post,
            "http://external/entities",
            200,
            json!({"name": "Bob", "entity_type": "person"}),
        );
        let outcome = validator(probe, None).check_entity_creation_consistency().await.unwrap();
        assert!(matches!(
            outcome,
            CheckOutcome::Failed { ref message, .. }
                if message == "Consistency issues found: Field 'name' differs between interfaces"
        ));
    }

    #[tokio::test]
    async fn test_unprotected_interface_is_reported() {
        let probe = consistent_probe().route_json(HttpMethod::Get, "http://external/entities", 200, json!([]));
        let outcome = validator(probe, None).check_authentication_consistency().await.unwrap();
        let CheckOutcome::Failed { message, .. } = outcome else {
            panic!("expected a failure");
        };
        assert!(message.contains("external_api does not properly reject requests without authentication"));
        assert!(message.contains("external_api does not properly reject requests with invalid authentication"));
    }

    #[tokio::test]
    async fn test_error_content_type_mismatch() {
        let probe = consistent_probe().route(
            HttpMethod::Get,
            "http://external/nonexistent",
            HttpResponse {
                status: 404,
                content_type: Some("text/html; charset=utf-8".into()),
                body: "<h1>Not Found</h1>".into(),
            },
        );
        let outcome = validator(probe, None).check_error_response_consistency().await.unwrap();
        let CheckOutcome::Failed { message, .. } = outcome else {
            panic!("expected a failure");
        };
        assert_eq!(
            message,
            "Error response consistency issues: Inconsistent content types for invalid_endpoint: [\"application/json\", \"text/html\"]"
        );
    }

    #[test]
    fn test_result_count() {
        assert_eq!(result_count(None), 0);
        assert_eq!(result_count(Some(&json!([1, 2, 3]))), 3);
        assert_eq!(result_count(Some(&json!({"a": 1}))), 1);
    }
}
