//! Reporter settings, read from a TOML file.
//!
//! Every key is optional:
//!
//! ```toml
//! query_timeout_secs = 10
//! health_disabled_lifecycles = ["dev"]
//!
//! [store]
//! backend = "memory"
//! seed = "test_data/store"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::ResponseCache;
use crate::health::HealthSettings;
use crate::ingest::IngestSettings;
use crate::report::ReportSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Where documents are kept.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In process, optionally seeded from JSON lines.
    Memory {
        #[serde(default)]
        seed: Option<PathBuf>,
    },
    /// A MongoDB database. Needs the `mongo` feature.
    Mongo { uri: String, database: String },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory { seed: None }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReporterConfig {
    pub store: StoreConfig,
    /// Deadline for aggregation queries and updates.
    pub query_timeout_secs: u64,
    /// Deadline for single document reads.
    pub point_lookup_timeout_millis: u64,
    /// Writes are skipped for this long after a store timeout.
    pub store_cooldown_secs: u64,
    pub worker_threads: usize,
    pub queue_capacity: usize,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub max_health_changes_per_day: usize,
    pub health_disabled_lifecycles: Vec<String>,
    pub trend_samples_per_day: i64,
    /// Host recorded on events this process creates. Defaults to `$HOSTNAME`.
    pub host_name: Option<String>,
    pub lifecycle: String,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            query_timeout_secs: 10,
            point_lookup_timeout_millis: 1000,
            store_cooldown_secs: 25,
            worker_threads: 4,
            queue_capacity: 64,
            cache_capacity: 256,
            cache_ttl_secs: 300,
            max_health_changes_per_day: 21,
            health_disabled_lifecycles: Vec::new(),
            trend_samples_per_day: 48,
            host_name: None,
            lifecycle: "prod".to_string(),
        }
    }
}

impl ReporterConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        log::debug!("Loaded config from {}: {config:?}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("worker_threads", self.worker_threads as i64),
            ("queue_capacity", self.queue_capacity as i64),
            ("cache_capacity", self.cache_capacity as i64),
            ("max_health_changes_per_day", self.max_health_changes_per_day as i64),
            ("trend_samples_per_day", self.trend_samples_per_day),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value <= 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
        }
        if let StoreConfig::Mongo { uri, database } = &self.store {
            if uri.trim().is_empty() || database.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "a mongo store needs both uri and database".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn health_settings(&self) -> HealthSettings {
        HealthSettings {
            max_changes_per_day: self.max_health_changes_per_day,
            disabled_lifecycles: self.health_disabled_lifecycles.clone(),
            lookup_timeout: Duration::from_millis(self.point_lookup_timeout_millis),
        }
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        let defaults = IngestSettings::default();
        IngestSettings {
            host_name: self.host_name.clone().unwrap_or(defaults.host_name),
            lifecycle: self.lifecycle.clone(),
            cooldown: Duration::from_secs(self.store_cooldown_secs),
        }
    }

    pub fn report_settings(&self) -> ReportSettings {
        ReportSettings {
            trend_samples_per_day: self.trend_samples_per_day,
        }
    }

    pub fn response_cache(&self) -> ResponseCache {
        ResponseCache::new(self.cache_capacity, Duration::from_secs(self.cache_ttl_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_config(content: &str) -> anyhow::Result<tempfile::NamedTempFile> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(content.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn empty_file_uses_defaults() -> anyhow::Result<()> {
        let file = write_config("")?;
        assert_eq!(ReporterConfig::default(), ReporterConfig::load(file.path())?);
        Ok(())
    }

    #[test]
    fn reads_settings_and_store() -> anyhow::Result<()> {
        let file = write_config(
            r#"
            query_timeout_secs = 3
            max_health_changes_per_day = 5
            health_disabled_lifecycles = ["dev"]
            host_name = "reporter-1"

            [store]
            backend = "mongo"
            uri = "mongodb://localhost:27017"
            database = "event"
            "#,
        )?;

        let config = ReporterConfig::load(file.path())?;

        assert_eq!(Duration::from_secs(3), config.query_timeout());
        assert_eq!(
            StoreConfig::Mongo {
                uri: "mongodb://localhost:27017".to_string(),
                database: "event".to_string(),
            },
            config.store
        );
        let health = config.health_settings();
        assert_eq!(5, health.max_changes_per_day);
        assert!(!health.is_enabled_for("DEV"));
        assert_eq!("reporter-1", config.ingest_settings().host_name);
        Ok(())
    }

    #[test]
    fn memory_store_seed() -> anyhow::Result<()> {
        let file = write_config("[store]\nbackend = \"memory\"\nseed = \"data\"\n")?;
        assert_eq!(
            StoreConfig::Memory {
                seed: Some(PathBuf::from("data"))
            },
            ReporterConfig::load(file.path())?.store
        );
        Ok(())
    }

    #[test]
    fn rejects_unknown_keys() -> anyhow::Result<()> {
        let file = write_config("query_timeout = 3\n")?;
        assert!(matches!(
            ReporterConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
        Ok(())
    }

    #[test]
    fn rejects_zero_workers() -> anyhow::Result<()> {
        let file = write_config("worker_threads = 0\n")?;
        let err = ReporterConfig::load(file.path()).unwrap_err();
        assert_eq!("Invalid config: worker_threads must be greater than 0", err.to_string());
        Ok(())
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            ReporterConfig::load(Path::new("does/not/exist.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
