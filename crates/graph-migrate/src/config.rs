//! Migration configuration, usually read from a TOML file:
//!
//! ```toml
//! model_name = "Notes"
//! search_paths = ["models", "/usr/share/notes/models"]
//! backup_dir = "backups"
//!
//! [cache]
//! capacity = 32
//! ttl_secs = 600
//! cleanup_interval_secs = 60
//!
//! [executor]
//! max_retries = 5
//! retry_backoff_ms = 50
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::{MigrateError, Result};
use crate::executor::ExecutorConfig;
use crate::provider::ResourceProvider;
use crate::version::ModelVersion;

fn default_extension() -> String {
    "toml".to_string()
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_capacity() -> usize {
    64
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Model name used in artifact file names.
    pub model_name: String,
    /// Artifact locations, searched in order.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
    #[serde(default = "default_extension")]
    pub model_extension: String,
    #[serde(default = "default_extension")]
    pub mapping_extension: String,
    /// Pin the destination version instead of migrating to the latest.
    #[serde(default)]
    pub destination: Option<ModelVersion>,
    /// Where file-backed snapshots are written.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
}

/// `[cache]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Entry lifetime in seconds; unset keeps entries until evicted.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// Janitor interval in seconds; unset disables the janitor.
    #[serde(default)]
    pub cleanup_interval_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            ttl_secs: None,
            cleanup_interval_secs: None,
        }
    }
}

/// `[executor]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl MigrationConfig {
    /// Defaults for `model_name` searching `search_path`.
    pub fn new(model_name: impl Into<String>, search_path: impl Into<PathBuf>) -> Self {
        Self {
            model_name: model_name.into(),
            search_paths: vec![search_path.into()],
            model_extension: default_extension(),
            mapping_extension: default_extension(),
            destination: None,
            backup_dir: default_backup_dir(),
            cache: CacheSettings::default(),
            executor: ExecutorSettings::default(),
        }
    }

    /// Parse and validate.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| MigrateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| MigrateError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(MigrateError::Config(msg));
        if self.model_name.trim().is_empty() {
            return invalid("model_name must not be empty".into());
        }
        if self.model_name.contains(['/', '\\']) {
            return invalid(format!("model_name {:?} must not contain a path separator", self.model_name));
        }
        if self.search_paths.is_empty() {
            return invalid("at least one search path is required".into());
        }
        for (key, ext) in [
            ("model_extension", &self.model_extension),
            ("mapping_extension", &self.mapping_extension),
        ] {
            if ext.is_empty() || ext.starts_with('.') {
                return invalid(format!("{key} must be a non-empty extension without a dot"));
            }
        }
        if self.cache.capacity == 0 {
            return invalid("cache.capacity must be at least 1".into());
        }
        if self.cache.cleanup_interval_secs == Some(0) {
            return invalid("cache.cleanup_interval_secs must be positive".into());
        }
        Ok(())
    }

    /// Provider over the configured search paths.
    pub fn provider(&self) -> Result<ResourceProvider> {
        let mut paths = self.search_paths.iter();
        let primary = paths
            .next()
            .ok_or_else(|| MigrateError::Config("at least one search path is required".into()))?;
        let mut provider = ResourceProvider::new(self.model_name.clone(), primary.clone())
            .with_extensions(self.model_extension.clone(), self.mapping_extension.clone());
        for path in paths {
            provider = provider.with_location(path.clone());
        }
        if let Some(destination) = &self.destination {
            provider = provider.with_destination(destination.clone());
        }
        Ok(provider)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.cache.capacity,
            ttl: self.cache.ttl_secs.map(Duration::from_secs),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_retries: self.executor.max_retries,
            retry_backoff: Duration::from_millis(self.executor.retry_backoff_ms),
        }
    }

    /// Janitor interval, if enabled.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        self.cache.cleanup_interval_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_uses_defaults() {
        let config = MigrationConfig::from_toml_str(
            "model_name = \"Notes\"\nsearch_paths = [\"models\"]\n",
        )
        .unwrap();
        assert_eq!(config, MigrationConfig::new("Notes", "models"));
        assert_eq!(config.cache_config(), CacheConfig::default());
        assert_eq!(config.executor_config(), ExecutorConfig::default());
        assert!(config.cleanup_interval().is_none());
    }

    #[test]
    fn full() {
        let config = MigrationConfig::from_toml_str(
            r#"
model_name = "Notes"
search_paths = ["models", "shared/models"]
model_extension = "model"
destination = "V2_1"
backup_dir = "/var/backups/notes"

[cache]
capacity = 8
ttl_secs = 600
cleanup_interval_secs = 30

[executor]
max_retries = 5
retry_backoff_ms = 20
"#,
        )
        .unwrap();
        assert_eq!(config.destination, Some(ModelVersion::new(2, 1, 0)));
        assert_eq!(config.cache_config().ttl, Some(Duration::from_secs(600)));
        assert_eq!(config.cleanup_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.executor_config().retry_backoff, Duration::from_millis(20));

        let provider = config.provider().unwrap();
        assert_eq!(provider.locations().len(), 2);
        assert_eq!(provider.destination(), Some(&ModelVersion::new(2, 1, 0)));
    }

    #[test]
    fn rejects_invalid() {
        let cases = [
            ("model_name = \"\"\nsearch_paths = [\"m\"]", "model_name must not be empty"),
            ("model_name = \"a/b\"\nsearch_paths = [\"m\"]", "path separator"),
            ("model_name = \"Notes\"", "search path"),
            ("model_name = \"Notes\"\nsearch_paths = [\"m\"]\nmodel_extension = \".toml\"", "model_extension"),
            ("model_name = \"Notes\"\nsearch_paths = [\"m\"]\n[cache]\ncapacity = 0", "cache.capacity"),
            ("model_name = \"Notes\"\nsearch_paths = [\"m\"]\ndestination = \"2.0\"", "invalid version identifier"),
        ];
        for (text, expected) in cases {
            let err = MigrationConfig::from_toml_str(text).unwrap_err();
            assert!(matches!(err, MigrateError::Config(_)));
            assert!(err.to_string().contains(expected), "{err} should mention {expected}");
        }
    }

    #[test]
    fn load_missing_file() {
        let err = MigrationConfig::load(Path::new("/nonexistent/migrate.toml")).unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}
