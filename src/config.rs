//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::storage::{CubeStore, MemoryStore, SqliteStore, StorageResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cube: CubeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which cell store to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("spendcube").to_string_lossy().to_string())
        .unwrap_or_else(|| "./spendcube_data".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Data directory with a leading `~` expanded to the home directory
    pub fn data_path(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    /// File holding the dataset registry
    pub fn registry_path(&self) -> PathBuf {
        self.data_path().join("datasets.json")
    }

    /// Open the configured cell store
    pub fn open_store(&self) -> StorageResult<Arc<dyn CubeStore>> {
        Ok(match self.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Sqlite => Arc::new(SqliteStore::open(&self.data_path())?),
        })
    }
}

fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') || rest.starts_with('\\') => &rest[1..],
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Cube query configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CubeConfig {
    /// Page size of queries that do not set one
    #[serde(default = "default_pagesize")]
    pub default_pagesize: usize,
}

fn default_pagesize() -> usize {
    10_000
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            default_pagesize: default_pagesize(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("spendcube").join("config.toml")),
            Some(PathBuf::from("/etc/spendcube/config.toml")),
            Some(PathBuf::from("./spendcube.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Storage overrides
        if let Some(data_dir) = lookup("SPENDCUBE_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Some(backend) = lookup("SPENDCUBE_STORE") {
            match backend.parse() {
                Ok(backend) => self.storage.backend = backend,
                Err(e) => tracing::warn!("Ignoring SPENDCUBE_STORE: {}", e),
            }
        }

        // Cube overrides
        if let Some(pagesize) = lookup("SPENDCUBE_PAGESIZE") {
            match pagesize.parse::<usize>() {
                Ok(p) if p > 0 => self.cube.default_pagesize = p,
                _ => tracing::warn!("Ignoring SPENDCUBE_PAGESIZE: {:?}", pagesize),
            }
        }

        // Logging overrides
        if let Some(level) = lookup("SPENDCUBE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("SPENDCUBE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    DEFAULT_CONFIG.replace("{data_dir}", &default_data_dir())
}

const DEFAULT_CONFIG: &str = r#"# Spendcube Configuration
#
# Environment variables override these settings:
# - SPENDCUBE_DATA_DIR
# - SPENDCUBE_STORE
# - SPENDCUBE_PAGESIZE
# - SPENDCUBE_LOG_LEVEL
# - SPENDCUBE_LOG_FORMAT

[storage]
# Cell store: sqlite (durable) or memory (lost on exit)
backend = "sqlite"

# Directory for the cube database and the dataset registry
data_dir = '{data_dir}'

[cube]
# Page size of queries that do not set one
default_pagesize = 10000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/spendcube/spendcube.log"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.storage.backend, StoreBackend::Sqlite);
        assert_eq!(config.cube.default_pagesize, 10_000);
        assert_eq!(config.logging.format, "pretty");
        assert!(config.logging.file.is_none());
        assert_eq!(config.storage.data_dir, default_data_dir());
        assert!(!config.storage.data_dir.starts_with('~'));
    }

    #[test]
    fn test_home_relative_data_dir() {
        let config = StorageConfig {
            backend: StoreBackend::Sqlite,
            data_dir: "~/cubes".to_string(),
        };
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.data_path(), home.join("cubes"));
            assert_eq!(config.registry_path(), home.join("cubes").join("datasets.json"));
        }

        assert_eq!(expand_home("/srv/cubes"), PathBuf::from("/srv/cubes"));
        assert_eq!(expand_home("~cubes"), PathBuf::from("~cubes"));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spendcube.toml");
        std::fs::write(&path, "[storage]\nbackend = \"memory\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.backend, StoreBackend::Memory);
        assert_eq!(config.cube.default_pagesize, 10_000);
        assert_eq!(config.logging.level, "info");

        std::fs::write(&path, "[storage\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("SPENDCUBE_DATA_DIR", "/tmp/cubes"),
            ("SPENDCUBE_STORE", "Memory"),
            ("SPENDCUBE_PAGESIZE", "0"),
            ("SPENDCUBE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.data_dir, "/tmp/cubes");
        assert_eq!(config.storage.backend, StoreBackend::Memory);
        assert_eq!(config.cube.default_pagesize, 10_000);
        assert_eq!(config.logging.format, "json");
        assert_eq!(
            config.storage.registry_path(),
            PathBuf::from("/tmp/cubes/datasets.json")
        );
    }

    #[tokio::test]
    async fn test_open_store() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            backend: StoreBackend::Sqlite,
            data_dir: dir.path().to_string_lossy().to_string(),
        };
        let store = config.open_store().unwrap();
        store.create_collection("cubes.cra.default").await.unwrap();
        assert!(dir.path().join("cubes.db").exists());
    }
}
