//! Cache configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Where the persistent store lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLocation {
    /// Private in-memory database, lost on drop
    #[default]
    Memory,
    /// Database file inside this directory
    Directory(PathBuf),
}

/// Hierarchy cache settings, usually read from `navtree.yml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub location: CacheLocation,

    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// Byte budget enforced by compaction; unlimited when absent
    #[serde(default)]
    pub size_limit_bytes: Option<u64>,

    #[serde(default = "default_provider_quick_cache_size")]
    pub provider_quick_cache_size: usize,

    #[serde(default = "default_node_quick_cache_size")]
    pub node_quick_cache_size: usize,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Discard stores that were created without instance update tracking
    #[serde(default)]
    pub require_update_tracking: bool,
}

fn default_file_name() -> String {
    String::from("hierarchy-cache.db")
}

fn default_provider_quick_cache_size() -> usize {
    50
}

fn default_node_quick_cache_size() -> usize {
    500
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            location: CacheLocation::Memory,
            file_name: default_file_name(),
            size_limit_bytes: None,
            provider_quick_cache_size: default_provider_quick_cache_size(),
            node_quick_cache_size: default_node_quick_cache_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            require_update_tracking: false,
        }
    }
}

impl CacheConfig {
    /// In-memory store with default limits
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// On-disk store in `directory`
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            location: CacheLocation::Directory(directory.into()),
            ..Self::default()
        }
    }

    pub fn with_size_limit(mut self, bytes: u64) -> Self {
        self.size_limit_bytes = Some(bytes);
        self
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: CacheConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.file_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "file_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.provider_quick_cache_size == 0 || self.node_quick_cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "quick_cache_size",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Full path of the database file, `None` for in-memory stores
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.location {
            CacheLocation::Memory => None,
            CacheLocation::Directory(dir) => Some(dir.join(&self.file_name)),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.location, CacheLocation::Memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: CacheConfig = serde_yaml::from_str("location: memory\n").unwrap();
        assert!(config.is_memory());
        assert_eq!(config.provider_quick_cache_size, 50);
        assert_eq!(config.node_quick_cache_size, 500);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.database_path(), None);
    }

    #[test]
    fn test_from_file_directory_location() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "location:\n  directory: /tmp/navtree\nfile_name: cache.db\nsize_limit_bytes: 1048576"
        )
        .unwrap();

        let config = CacheConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config.database_path(),
            Some(PathBuf::from("/tmp/navtree/cache.db"))
        );
        assert_eq!(config.size_limit_bytes, Some(1_048_576));
    }

    #[test]
    fn test_rejects_empty_file_name() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "file_name: ''").unwrap();
        assert!(matches!(
            CacheConfig::from_file(file.path()),
            Err(ConfigError::InvalidValue { field: "file_name", .. })
        ));
    }
}
