//! Init command implementation

use crate::cache::SnapshotCache;
use crate::config::Config;
use crate::error::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub force: bool,
    /// Author id to record on publishes; generated when absent
    pub author_id: Option<String>,
    /// Store backend to configure; the default when absent
    pub backend: Option<String>,
    pub store_url: Option<String>,
}

/// What init created
#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub base_dir: String,
    pub config_path: String,
    pub cache_path: String,
    pub author_id: String,
    pub backend: String,
}

/// Initialize salesboard configuration and snapshot cache
pub async fn cmd_init(options: InitOptions) -> Result<InitResult> {
    let mut config = Config::default();
    config.init_paths(Some(options.base_dir));

    if config.paths.config_file.exists() && !options.force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.author_id = options
        .author_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Some(backend) = options.backend {
        config.store.backend = backend;
    }
    if options.store_url.is_some() {
        config.store.url = options.store_url;
    }
    if config.store.backend == "fs" {
        config.store.root = config.paths.base_dir.join("store");
    }

    config.validate()?;
    config.save()?;
    info!("Created config at {:?}", config.paths.config_file);

    SnapshotCache::connect(&config).await?;
    info!("Created snapshot cache at {:?}", config.paths.cache_file);

    Ok(InitResult {
        base_dir: config.paths.base_dir.display().to_string(),
        config_path: config.paths.config_file.display().to_string(),
        cache_path: config.paths.cache_file.display().to_string(),
        author_id: config.author_id,
        backend: config.store.backend,
    })
}

/// Print init result to console
pub fn print_init_result(result: &InitResult) {
    println!("✓ Initialized salesboard at {}", result.base_dir);
    println!("\nConfiguration: {}", result.config_path);
    println!("Snapshot cache: {}", result.cache_path);
    println!("Author id: {}", result.author_id);
    println!("Store backend: {}", result.backend);
    println!("\nNext steps:");
    println!("  salesboard ingest ./exports        # Merge daily exports and publish");
    println!("  salesboard fetch                   # Show the latest dashboard");
    println!("  salesboard products --name-changed # Products that were renamed");
}
