//! Configuration management for salesboard
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Room left under the document ceiling for the chunk envelope and encoding
pub const CHUNK_ENCODING_MARGIN: usize = 4096;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity recorded on every published deployment
    #[serde(default = "default_author_id")]
    pub author_id: String,

    /// Shared document store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Spreadsheet column mapping
    #[serde(default)]
    pub columns: ColumnConfig,

    /// Publish/subscribe tuning
    #[serde(default)]
    pub sync: SyncConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Shared document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend: "fs", "http" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Root directory for the fs backend
    #[serde(default = "default_store_root")]
    pub root: PathBuf,

    /// Base URL for the http backend
    #[serde(default)]
    pub url: Option<String>,

    /// Environment variable holding the http backend's bearer token
    #[serde(default = "default_store_token_env")]
    pub token_env: String,

    /// Largest document the store accepts
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,

    /// Bytes of payload per chunk document, counted after JSON escaping
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,

    /// Request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

/// Which spreadsheet columns feed the engine; everything else is ignored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnConfig {
    #[serde(default = "default_column_product_id")]
    pub product_id: String,

    #[serde(default = "default_column_name")]
    pub name: String,

    #[serde(default = "default_column_revenue")]
    pub revenue: String,

    #[serde(default = "default_column_views")]
    pub views: String,

    #[serde(default = "default_column_units_sold")]
    pub units_sold: String,
}

/// Publish/subscribe tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Chunk writes in flight during a publish
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Attempts before a fetch gives up chasing a moving deployment
    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,

    /// Seconds between metadata polls in watch mode
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Keep the last applied snapshot in the local cache
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for salesboard data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the SQLite snapshot cache
    pub cache_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            author_id: default_author_id(),
            store: StoreConfig::default(),
            columns: ColumnConfig::default(),
            sync: SyncConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            root: default_store_root(),
            url: None,
            token_env: default_store_token_env(),
            max_document_bytes: default_max_document_bytes(),
            chunk_bytes: default_chunk_bytes(),
            timeout_secs: default_store_timeout(),
        }
    }
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            product_id: default_column_product_id(),
            name: default_column_name(),
            revenue: default_column_revenue(),
            views: default_column_views(),
            units_sold: default_column_units_sold(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: default_upload_concurrency(),
            max_fetch_attempts: default_max_fetch_attempts(),
            poll_interval_secs: default_poll_interval(),
            use_cache: default_use_cache(),
        }
    }
}

impl StoreConfig {
    /// Get the HTTP store token from environment
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok()
    }
}

impl Config {
    /// Get the default base directory for salesboard (~/.salesboard)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".salesboard")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            cache_file: base.join("cache.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            cache_file: base.join("cache.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if salesboard is initialized (config and cache exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.cache_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.author_id.trim().is_empty() {
            return Err(Error::Config("author_id must not be empty".to_string()));
        }

        match self.store.backend.as_str() {
            "fs" | "memory" => {}
            "http" => {
                if self.store.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    return Err(Error::Config(
                        "store.url is required for the http backend".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::Config(format!("Unknown store backend: {}", other)));
            }
        }

        if self.store.chunk_bytes == 0 {
            return Err(Error::Config("store.chunk_bytes must be positive".to_string()));
        }

        if self.store.chunk_bytes + CHUNK_ENCODING_MARGIN > self.store.max_document_bytes {
            return Err(Error::Config(format!(
                "store.chunk_bytes must leave {} bytes under store.max_document_bytes",
                CHUNK_ENCODING_MARGIN
            )));
        }

        if self.sync.upload_concurrency == 0 {
            return Err(Error::Config(
                "sync.upload_concurrency must be at least 1".to_string(),
            ));
        }

        if self.sync.max_fetch_attempts == 0 {
            return Err(Error::Config(
                "sync.max_fetch_attempts must be at least 1".to_string(),
            ));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(Error::Config(
                "sync.poll_interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Get the database URL for sqlx
pub fn database_url(config: &Config) -> String {
    format!("sqlite://{}?mode=rwc", config.paths.cache_file.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.max_document_bytes, 1_048_576);
        assert_eq!(config.columns.product_id, "상품ID");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.author_id = "team-a".to_string();
        config.store.chunk_bytes = 1000;

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.author_id, "team-a");
        assert_eq!(loaded.store.chunk_bytes, 1000);
        assert_eq!(loaded.paths.cache_file, tmp.path().join("cache.db"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            author_id = "ops"

            [columns]
            product_id = "id"
            "#,
        )
        .unwrap();

        assert_eq!(config.columns.product_id, "id");
        assert_eq!(config.columns.name, "상품명");
        assert_eq!(config.sync.max_fetch_attempts, 3);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Invalid: chunk leaves no room under the ceiling
        config.store.chunk_bytes = config.store.max_document_bytes;
        assert!(config.validate().is_err());

        config.store.chunk_bytes = 64 * 1024;
        assert!(config.validate().is_ok());

        config.store.backend = "http".to_string();
        assert!(config.validate().is_err());
        config.store.url = Some("http://127.0.0.1:8080".to_string());
        assert!(config.validate().is_ok());

        config.store.backend = "ftp".to_string();
        assert!(config.validate().is_err());
        config.store.backend = "memory".to_string();

        config.sync.upload_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
