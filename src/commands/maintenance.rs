//! Clear and garbage-collection commands

use super::PublishSummary;
use crate::cache::SnapshotCache;
use crate::config::Config;
use crate::error::Result;
use crate::store::StoreSession;
use crate::sync::{collect_garbage, GcStats, Publisher};
use tracing::{info, warn};

/// Publish an empty aggregate, discarding everything merged so far
pub async fn cmd_clear(config: &Config, session: &StoreSession) -> Result<PublishSummary> {
    let publisher = Publisher::new(session.clone(), config)?;
    let publication = publisher.clear().await?;

    let gc = publication.gc.await.unwrap_or_else(|e| {
        warn!("Garbage collection task failed: {}", e);
        GcStats::default()
    });

    if config.sync.use_cache {
        let cache = SnapshotCache::connect(config).await?;
        cache.clear().await?;
    }

    info!("Cleared all data as deployment {}", publication.metadata.deployment_id);
    Ok(PublishSummary::new(
        &publication.metadata,
        publication.payload.len(),
        &gc,
    ))
}

/// Reclaim chunks of superseded deployments now
pub async fn cmd_gc(session: &StoreSession) -> Result<GcStats> {
    collect_garbage(session).await
}

/// Print a clear result to console
pub fn print_clear_result(summary: &PublishSummary) {
    println!("\n🧹 Cleared\n");
    println!("Published empty deployment {}", summary.deployment_id);
    if summary.gc_chunks_deleted > 0 {
        println!("Reclaimed {} old chunks", summary.gc_chunks_deleted);
    }
}

/// Print garbage collection stats to console
pub fn print_gc_stats(stats: &GcStats) {
    println!("\n🗑  Garbage Collection\n");
    match stats.current {
        Some(current) => println!("Current deployment: {}", current),
        None => {
            println!("Nothing published; no chunks removed.");
            return;
        }
    }
    println!("Chunks scanned: {}", stats.chunks_scanned);
    println!(
        "Chunks deleted: {} (from {} deployments)",
        stats.chunks_deleted, stats.deployments_reclaimed
    );
    if stats.chunks_retained > 0 {
        println!("Newer chunks kept: {}", stats.chunks_retained);
    }
    if stats.delete_failures > 0 {
        println!("⚠ Failed deletes: {}", stats.delete_failures);
    }
}
