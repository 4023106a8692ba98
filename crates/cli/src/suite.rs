//! Suite components and the collaborators they run against.

use anyhow::Context;
use chrono::Utc;
use clap::ValueEnum;
use memory_validation_adapters::{PgDumpTool, PgMemoryStore, PgStoreOptions, ReqwestProbe, SysinfoProbe};
use memory_validation_benchmarks::{ComponentReport, PerformanceBenchmarker, ScalabilityValidator};
use memory_validation_core::{
    BackupTool, HttpProbe, InMemoryStore, MemoryStore, ResourceProbe, SnapshotBackupTool,
    ValidationConfig, ValidationFramework,
};
use memory_validation_validators::{
    BackupValidator, CleanupValidator, CrudValidator, DataIntegrityValidator, ErrorSimulator,
    InterfaceConsistencyValidator, MemorySystemHealthChecker, MigrationValidator,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// One section of the comprehensive run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum Component {
    /// Store and API health.
    Health,
    /// Integrity, CRUD lifecycle and cleanup.
    Integrity,
    /// Latency and throughput benchmarks.
    Performance,
    /// Fault injection and recovery.
    Errors,
    /// Cross-interface consistency.
    Interfaces,
    /// Load escalation and large datasets.
    Scalability,
    /// Backup, restore and migration.
    Backup,
}

impl Component {
    /// Every component in execution order.
    pub const ALL: [Component; 7] = [
        Component::Health,
        Component::Integrity,
        Component::Performance,
        Component::Errors,
        Component::Interfaces,
        Component::Scalability,
        Component::Backup,
    ];

    /// Display name used in reports.
    pub fn title(self) -> &'static str {
        match self {
            Component::Health => "Health Checks",
            Component::Integrity => "Data Integrity",
            Component::Performance => "Performance Benchmarks",
            Component::Errors => "Error Simulation",
            Component::Interfaces => "Interface Consistency",
            Component::Scalability => "Scalability Testing",
            Component::Backup => "Backup & Migration",
        }
    }

    /// Prefix of the `{slug}_execution` result recorded when the component
    /// cannot run.
    pub fn slug(self) -> &'static str {
        match self {
            Component::Health => "health_checks",
            Component::Integrity => "data_integrity",
            Component::Performance => "performance_benchmarks",
            Component::Errors => "error_simulation",
            Component::Interfaces => "interface_consistency",
            Component::Scalability => "scalability_testing",
            Component::Backup => "backup_migration",
        }
    }
}

/// Requested components in execution order; nothing requested means all.
pub fn select(requested: &[Component]) -> Vec<Component> {
    if requested.is_empty() {
        return Component::ALL.to_vec();
    }
    let mut selected = requested.to_vec();
    selected.sort();
    selected.dedup();
    selected
}

/// Shared collaborators for every component.
pub struct Collaborators {
    store: Result<Arc<dyn MemoryStore>, String>,
    http: Arc<dyn HttpProbe>,
    resources: Arc<dyn ResourceProbe>,
    backup: Arc<dyn BackupTool>,
}

impl Collaborators {
    /// Explicit collaborators. `store` carries the reason when there is none.
    pub fn new(
        store: Result<Arc<dyn MemoryStore>, String>,
        http: Arc<dyn HttpProbe>,
        resources: Arc<dyn ResourceProbe>,
        backup: Arc<dyn BackupTool>,
    ) -> Self {
        Self {
            store,
            http,
            resources,
            backup,
        }
    }

    /// Production collaborators: Postgres when a URL is configured, live
    /// HTTP and host resource sampling.
    ///
    /// A store that cannot be reached is not fatal; components that need it
    /// are recorded as crashed and the health checks report the outage.
    pub async fn connect(config: &ValidationConfig) -> anyhow::Result<Self> {
        let http = ReqwestProbe::new(config.timeout()).context("Failed to build HTTP client")?;

        let store: Result<Arc<dyn MemoryStore>, String> = match config.database_url.as_deref() {
            Some(url) => match PgMemoryStore::connect(url, PgStoreOptions::default()).await {
                Ok(store) => {
                    info!("Connected to memory store");
                    Ok(Arc::new(store))
                }
                Err(err) => {
                    error!(error = %err, "Store connection failed");
                    Err(format!("Store connection failed: {err}"))
                }
            },
            None => {
                warn!("DATABASE_URL not set; store-backed components will not run");
                Err("Database URL not configured".to_string())
            }
        };

        Ok(Self::new(
            store,
            Arc::new(http),
            Arc::new(SysinfoProbe::new()),
            Arc::new(PgDumpTool::new(config.backup.clone())),
        ))
    }

    /// Collaborators over the in-process reference store. HTTP and resource
    /// sampling stay live.
    pub fn in_process(config: &ValidationConfig) -> anyhow::Result<Self> {
        let http = ReqwestProbe::new(config.timeout()).context("Failed to build HTTP client")?;
        let store = Arc::new(InMemoryStore::new());
        info!("Validating the in-process store");

        Ok(Self::new(
            Ok(store.clone()),
            Arc::new(http),
            Arc::new(SysinfoProbe::new()),
            Arc::new(SnapshotBackupTool::new(store)),
        ))
    }

    fn store(&self) -> Result<Arc<dyn MemoryStore>, String> {
        self.store.clone()
    }

    /// Validators making up `component`.
    pub fn framework(
        &self,
        component: Component,
        config: &ValidationConfig,
    ) -> Result<ValidationFramework, String> {
        let framework = ValidationFramework::new(component.title());
        let framework = match component {
            Component::Health => framework.with_validator(MemorySystemHealthChecker::new(
                self.store().ok(),
                self.http.clone(),
                config,
            )),
            Component::Integrity => {
                let store = self.store()?;
                framework
                    .with_validator(DataIntegrityValidator::new(store.clone(), config))
                    .with_validator(CrudValidator::new(store.clone(), config))
                    .with_validator(CleanupValidator::new(store, config))
            }
            Component::Performance => framework.with_validator(PerformanceBenchmarker::new(
                self.store()?,
                self.resources.clone(),
                config,
            )),
            Component::Errors => framework.with_validator(ErrorSimulator::new(
                self.store()?,
                self.http.clone(),
                self.resources.clone(),
                config,
            )),
            Component::Interfaces => framework.with_validator(InterfaceConsistencyValidator::new(
                self.http.clone(),
                self.store().ok(),
                config,
            )),
            Component::Scalability => framework.with_validator(ScalabilityValidator::new(
                self.store()?,
                self.resources.clone(),
                config,
            )),
            Component::Backup => {
                let store = self.store()?;
                framework
                    .with_validator(BackupValidator::new(store.clone(), self.backup.clone(), config))
                    .with_validator(MigrationValidator::new(store, config))
            }
        };
        Ok(framework)
    }
}

/// Single failed `{slug}_execution` result for a component that could not
/// be assembled.
pub fn crashed(component: Component, reason: &str) -> ComponentReport {
    error!(component = component.title(), reason = %reason, "Component could not run");
    ComponentReport::crashed(component.title(), component.slug(), reason, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_validation_core::{FixedResourceProbe, ResourceSnapshot, StubHttpProbe};
    use memory_validation_core::{Status, ValidationResult};

    fn collaborators(store: Result<Arc<dyn MemoryStore>, String>) -> Collaborators {
        let backing = Arc::new(InMemoryStore::new());
        Collaborators::new(
            store,
            Arc::new(StubHttpProbe::new()),
            Arc::new(FixedResourceProbe::new(ResourceSnapshot::default())),
            Arc::new(SnapshotBackupTool::new(backing)),
        )
    }

    #[test]
    fn test_select_defaults_to_all_in_order() {
        assert_eq!(select(&[]), Component::ALL.to_vec());
    }

    #[test]
    fn test_select_orders_and_dedups() {
        let selected = select(&[Component::Backup, Component::Health, Component::Backup]);
        assert_eq!(selected, vec![Component::Health, Component::Backup]);
    }

    #[test]
    fn test_titles_follow_execution_order() {
        let titles: Vec<_> = Component::ALL.iter().map(|c| c.title()).collect();
        assert_eq!(
            titles,
            vec![
                "Health Checks",
                "Data Integrity",
                "Performance Benchmarks",
                "Error Simulation",
                "Interface Consistency",
                "Scalability Testing",
                "Backup & Migration",
            ]
        );
    }

    #[test]
    fn test_store_components_need_a_store() {
        let collaborators = collaborators(Err("Database URL not configured".to_string()));
        let config = ValidationConfig::default();

        assert!(collaborators.framework(Component::Health, &config).is_ok());
        assert!(collaborators.framework(Component::Interfaces, &config).is_ok());
        for component in [
            Component::Integrity,
            Component::Performance,
            Component::Errors,
            Component::Scalability,
            Component::Backup,
        ] {
            assert_eq!(
                collaborators.framework(component, &config).err().as_deref(),
                Some("Database URL not configured")
            );
        }
    }

    #[test]
    fn test_component_validator_counts() {
        let collaborators = collaborators(Ok(Arc::new(InMemoryStore::new())));
        let config = ValidationConfig::default();

        let count = |c| collaborators.framework(c, &config).map(|f| f.len()).unwrap();
        assert_eq!(count(Component::Integrity), 3);
        assert_eq!(count(Component::Backup), 2);
        assert_eq!(count(Component::Health), 1);
    }

    #[test]
    fn test_crashed_component_records_execution_failure() {
        let component = crashed(Component::Integrity, "Database URL not configured");

        assert_eq!(component.component, "Data Integrity");
        let results: &[ValidationResult] = &component.report.results;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].test_name(), "data_integrity_execution");
        assert_eq!(results[0].status(), Status::Failed);
        assert_eq!(results[0].error_message(), Some("Database URL not configured"));
    }

    #[tokio::test]
    async fn test_run_integrity_in_process() {
        let collaborators = collaborators(Ok(Arc::new(InMemoryStore::new())));
        let config = ValidationConfig::default();

        let framework = collaborators.framework(Component::Integrity, &config).unwrap();
        let report = framework.run_all_validations().await;
        let component = ComponentReport::new(Component::Integrity.title(), report);

        assert_eq!(component.report.suite_name, "Data Integrity");
        assert!(!component.report.results.is_empty());
        assert_eq!(component.report.summary.failed, 0);
    }
}
