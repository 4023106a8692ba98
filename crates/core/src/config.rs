// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Harness configuration.
//!
//! Sources are layered lowest to highest: compiled-in defaults, an optional
//! file (format picked from its extension), then environment variables.

use crate::error::ConfigError;
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parameters for the external dump/restore tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Database user.
    pub user: String,
    /// Database password, passed through `PGPASSWORD`.
    pub password: String,
    /// Where dumps are written; the system temp dir when unset.
    pub backup_dir: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "memory".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            backup_dir: None,
        }
    }
}

/// Complete harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Store connection URL.
    pub database_url: Option<String>,
    /// Internal API base URL.
    pub internal_api_url: String,
    /// External API base URL.
    pub external_api_url: String,
    /// MCP-style API base URL.
    pub mcp_api_url: String,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// Tenants used by isolation checks.
    pub test_client_count: u32,
    /// Rows seeded for the search benchmark.
    pub test_entity_count: u32,
    /// Recovery attempts.
    pub max_retry_attempts: u32,
    /// Exponential backoff base.
    pub retry_delay_seconds: f64,
    /// Large dataset target.
    pub large_dataset_size: u64,
    /// Hard cap on any generated dataset.
    pub max_test_entities: u64,
    /// Bulk insert batch size.
    pub batch_size: u64,
    /// Tear down the large dataset afterwards.
    pub cleanup_enabled: bool,
    /// Ascending concurrency ladder for breaking-point search.
    pub concurrency_levels: Vec<u32>,
    /// Batch failure rate above which a level counts as broken.
    pub failure_rate_tolerance: f64,
    /// Cleanup removes rows graded below this.
    pub grade_decay_threshold: f64,
    /// Cleanup removes rows older than this many days.
    pub generic_entity_age_days: i64,
    /// Cleanup batch size.
    pub cleanup_batch_size: u64,
    /// Multiplicative grade decay.
    pub decay_factor: f64,
    /// Dump/restore tool parameters.
    pub backup: BackupConfig,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            internal_api_url: "http://localhost:8001".to_string(),
            external_api_url: "http://localhost:8443".to_string(),
            mcp_api_url: "http://localhost:8002".to_string(),
            timeout_seconds: 30,
            test_client_count: 3,
            test_entity_count: 100,
            max_retry_attempts: 3,
            retry_delay_seconds: 1.0,
            large_dataset_size: 10_000,
            max_test_entities: 100_000,
            batch_size: 1000,
            cleanup_enabled: true,
            concurrency_levels: vec![10, 25, 50, 100, 200, 500, 1000],
            failure_rate_tolerance: 0.2,
            grade_decay_threshold: 0.1,
            generic_entity_age_days: 30,
            cleanup_batch_size: 100,
            decay_factor: 0.9,
            backup: BackupConfig::default(),
        }
    }
}

/// Environment variable to configuration key. Later entries win, so the
/// direct database URL overrides the pooled one.
const ENV_MAPPINGS: &[(&str, &str)] = &[
    ("DATABASE_URL", "database_url"),
    ("DATABASE_URL_DIRECT", "database_url"),
    ("MEMORY_INTERNAL_API_URL", "internal_api_url"),
    ("MEMORY_EXTERNAL_API_URL", "external_api_url"),
    ("MEMORY_MCP_API_URL", "mcp_api_url"),
    ("VALIDATION_TIMEOUT", "timeout_seconds"),
    ("TEST_CLIENT_COUNT", "test_client_count"),
    ("TEST_ENTITY_COUNT", "test_entity_count"),
    ("MAX_RETRY_ATTEMPTS", "max_retry_attempts"),
    ("RETRY_DELAY_SECONDS", "retry_delay_seconds"),
    ("LARGE_DATASET_SIZE", "large_dataset_size"),
    ("MAX_TEST_ENTITIES", "max_test_entities"),
    ("BATCH_SIZE", "batch_size"),
    ("CLEANUP_ENABLED", "cleanup_enabled"),
    ("FAILURE_RATE_TOLERANCE", "failure_rate_tolerance"),
    ("GRADE_DECAY_THRESHOLD", "grade_decay_threshold"),
    ("GENERIC_ENTITY_AGE_DAYS", "generic_entity_age_days"),
    ("CLEANUP_BATCH_SIZE", "cleanup_batch_size"),
    ("DECAY_FACTOR", "decay_factor"),
    ("DATABASE_HOST", "backup.host"),
    ("DATABASE_PORT", "backup.port"),
    ("DATABASE_NAME", "backup.database"),
    ("DATABASE_USER", "backup.user"),
    ("DATABASE_PASSWORD", "backup.password"),
    ("BACKUP_DIR", "backup.backup_dir"),
];

const CONCURRENCY_LEVELS_VAR: &str = "CONCURRENCY_LEVELS";

impl ValidationConfig {
    /// Load from defaults, `file` and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(file, |name| std::env::var(name).ok())
    }

    /// Load with an explicit environment lookup.
    pub fn load_with<F>(file: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = file {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }

        for (var, key) in ENV_MAPPINGS {
            if let Some(value) = env(var).filter(|v| !v.trim().is_empty()) {
                builder = builder.set_override(*key, value.trim().to_string())?;
            }
        }

        if let Some(raw) = env(CONCURRENCY_LEVELS_VAR) {
            let levels = parse_levels(&raw)?;
            builder = builder.set_override("concurrency_levels", levels)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no check can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: reason.to_string(),
            })
        };

        if !(self.retry_delay_seconds >= 0.0 && self.retry_delay_seconds.is_finite()) {
            return invalid("retry_delay_seconds", "must be a non-negative number");
        }
        if self.max_retry_attempts == 0 {
            return invalid("max_retry_attempts", "must be at least 1");
        }
        if !(self.failure_rate_tolerance > 0.0 && self.failure_rate_tolerance <= 1.0) {
            return invalid("failure_rate_tolerance", "must be in (0, 1]");
        }
        if self.concurrency_levels.is_empty() {
            return invalid("concurrency_levels", "must not be empty");
        }
        if self.concurrency_levels.windows(2).any(|w| w[0] >= w[1]) {
            return invalid("concurrency_levels", "must be strictly ascending");
        }
        if self.concurrency_levels[0] == 0 {
            return invalid("concurrency_levels", "levels must be positive");
        }
        if self.batch_size == 0 {
            return invalid("batch_size", "must be at least 1");
        }
        if self.cleanup_batch_size == 0 {
            return invalid("cleanup_batch_size", "must be at least 1");
        }
        if !(self.decay_factor > 0.0 && self.decay_factor <= 1.0) {
            return invalid("decay_factor", "must be in (0, 1]");
        }
        if !(0.0..=1.0).contains(&self.grade_decay_threshold) {
            return invalid("grade_decay_threshold", "must be in [0, 1]");
        }
        if self.generic_entity_age_days < 0 {
            return invalid("generic_entity_age_days", "must not be negative");
        }
        if self.timeout_seconds == 0 {
            return invalid("timeout_seconds", "must be at least 1");
        }
        Ok(())
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Exponential backoff base.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_seconds)
    }

    /// Large dataset size after applying the hard cap.
    pub fn effective_large_dataset_size(&self) -> u64 {
        self.large_dataset_size.min(self.max_test_entities)
    }

    /// Directory for dumps.
    pub fn backup_dir(&self) -> PathBuf {
        self.backup
            .backup_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// API base URLs keyed by interface name.
    pub fn interfaces(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("internal_api", self.internal_api_url.as_str()),
            ("external_api", self.external_api_url.as_str()),
            ("mcp_api", self.mcp_api_url.as_str()),
        ]
    }
}

fn parse_levels(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| ConfigError::InvalidValue {
                key: "concurrency_levels".to_string(),
                reason: format!("'{s}' is not an integer"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ValidationConfig::load_with(None, env_of(&[])).unwrap();
        assert_eq!(config, ValidationConfig::default());
        assert_eq!(config.concurrency_levels, vec![10, 25, 50, 100, 200, 500, 1000]);
        assert_eq!(config.failure_rate_tolerance, 0.2);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = ValidationConfig::load_with(
            None,
            env_of(&[
                ("DATABASE_URL", "postgres://pooled/db"),
                ("DATABASE_URL_DIRECT", "postgres://direct/db"),
                ("MAX_RETRY_ATTEMPTS", "5"),
                ("RETRY_DELAY_SECONDS", "0.5"),
                ("CLEANUP_ENABLED", "false"),
                ("CONCURRENCY_LEVELS", "5, 10,20"),
                ("DATABASE_PORT", "6543"),
            ]),
        )
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://direct/db"));
        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.retry_delay(), Duration::from_millis(500));
        assert!(!config.cleanup_enabled);
        assert_eq!(config.concurrency_levels, vec![5, 10, 20]);
        assert_eq!(config.backup.port, 6543);
    }

    #[test]
    fn test_file_then_env() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "batch_size = 250\nlarge_dataset_size = 2000\n[backup]\nhost = \"db\"").unwrap();

        let config = ValidationConfig::load_with(
            Some(file.path()),
            env_of(&[("LARGE_DATASET_SIZE", "500")]),
        )
        .unwrap();
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.large_dataset_size, 500);
        assert_eq!(config.backup.host, "db");
        assert_eq!(config.backup.user, "postgres");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ValidationConfig::load_with(None, env_of(&[("FAILURE_RATE_TOLERANCE", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "failure_rate_tolerance"));

        let err = ValidationConfig::load_with(None, env_of(&[("CONCURRENCY_LEVELS", "50,10")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "concurrency_levels"));

        let err = ValidationConfig::load_with(None, env_of(&[("CONCURRENCY_LEVELS", "ten")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = ValidationConfig::load_with(None, env_of(&[("RETRY_DELAY_SECONDS", "-1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "retry_delay_seconds"));
    }

    #[test]
    fn test_dataset_cap() {
        let config = ValidationConfig {
            large_dataset_size: 50_000,
            max_test_entities: 20_000,
            ..ValidationConfig::default()
        };
        assert_eq!(config.effective_large_dataset_size(), 20_000);
    }
}
