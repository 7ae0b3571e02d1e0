//! Status command implementation

use crate::cache::{PublishRecord, SnapshotCache};
use crate::config::Config;
use crate::error::Result;
use crate::store::{open_store, SnapshotMetadata, StoreSession};
use serde::Serialize;
use tracing::{debug, info};

/// Publishes shown in status output
const RECENT_PUBLISHES: usize = 5;

/// Status information
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub cache_path: String,
    pub author_id: String,
    pub backend: String,
    pub store: String,
    pub store_connected: bool,
    pub principal: Option<String>,
    pub store_error: Option<String>,
    pub current: Option<SnapshotMetadata>,
    pub cached_deployment: Option<String>,
    pub recent_publishes: Vec<PublishRecord>,
}

/// Get system status. Store problems are reported, not returned as errors.
pub async fn cmd_status(config: &Config) -> Result<StatusInfo> {
    info!("Getting status");

    let store = open_store(config)?;
    let describe = store.describe();
    let session = StoreSession::new(store);

    let (principal, current, store_error) = match session.connect().await {
        Ok(identity) => match session.get_metadata().await {
            Ok(current) => (Some(identity.principal), current, None),
            Err(e) => {
                debug!("Metadata read failed: {:?}", e);
                (Some(identity.principal), None, Some(e.to_string()))
            }
        },
        Err(e) => {
            debug!("Store connection failed: {:?}", e);
            (None, None, Some(e.to_string()))
        }
    };

    let (cached_deployment, recent_publishes) = if config.paths.cache_file.exists() {
        let cache = SnapshotCache::connect(config).await?;
        (
            cache.cached_deployment().await?.map(|id| id.to_string()),
            cache.recent_publishes(RECENT_PUBLISHES).await?,
        )
    } else {
        (None, Vec::new())
    };

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        cache_path: config.paths.cache_file.display().to_string(),
        author_id: config.author_id.clone(),
        backend: config.store.backend.clone(),
        store: describe,
        store_connected: principal.is_some(),
        principal,
        store_error,
        current,
        cached_deployment,
        recent_publishes,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 salesboard Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Snapshot cache: {}", status.cache_path);
    println!("Author id: {}", status.author_id);

    println!("\nStore ({}):", status.backend);
    println!("  Location: {}", status.store);
    let connection_status = match (&status.principal, &status.store_error) {
        (Some(principal), None) => format!("✓ Connected as {}", principal),
        (Some(principal), Some(err)) => format!("⚠ Connected as {} ({})", principal, err),
        (None, Some(err)) => format!("✗ Not connected: {}", err),
        (None, None) => "✗ Not connected".to_string(),
    };
    println!("  Status: {}", connection_status);

    match &status.current {
        Some(current) => {
            println!("\nCurrent deployment: {}", current.deployment_id);
            println!("  Chunks: {}", current.chunk_count);
            println!("  Published: {} by {}", current.published_at, current.author_id);
            if let Some(bytes) = current.payload_bytes {
                println!("  Size: {} bytes", bytes);
            }
        }
        None => println!("\nCurrent deployment: none"),
    }

    let in_sync = match (&status.current, &status.cached_deployment) {
        (Some(current), Some(cached)) => current.deployment_id.to_string() == *cached,
        _ => false,
    };
    println!(
        "Cached deployment: {}{}",
        status.cached_deployment.as_deref().unwrap_or("none"),
        if in_sync { " (up to date)" } else { "" }
    );

    if !status.recent_publishes.is_empty() {
        println!("\nRecent publishes from this machine:");
        for record in &status.recent_publishes {
            println!(
                "  {}  {}  {} files, {} rows, {} chunks",
                record.deployment_id,
                record.published_at,
                record.files_merged,
                record.rows_merged,
                record.chunk_count
            );
        }
    }
}
