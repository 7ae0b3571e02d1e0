//! Reclaiming chunks of superseded deployments

use crate::error::Result;
use crate::store::{DeploymentId, StoreSession};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Deletes in flight during a collection
const DELETE_CONCURRENCY: usize = 8;

/// Statistics from a garbage collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub current: Option<DeploymentId>,
    pub chunks_scanned: usize,
    pub chunks_deleted: usize,
    /// Chunks of deployments newer than current, possibly mid-publish
    pub chunks_retained: usize,
    pub delete_failures: usize,
    pub deployments_reclaimed: usize,
}

/// Delete every chunk belonging to a deployment older than the current one.
///
/// The current deployment is re-read from metadata on every pass. Chunks of
/// newer deployments are kept, since another publisher may still be writing
/// them. With nothing published yet no chunk is deleted. Individual delete
/// failures are counted and left for a later pass.
pub async fn collect_garbage(session: &StoreSession) -> Result<GcStats> {
    let mut stats = GcStats::default();

    let Some(metadata) = session.get_metadata().await? else {
        debug!("No published deployment; skipping garbage collection");
        return Ok(stats);
    };
    let current = metadata.deployment_id;
    stats.current = Some(current);

    let keys = session.list_chunks().await?;
    stats.chunks_scanned = keys.len();

    let mut stale = Vec::new();
    for key in keys {
        if key.deployment_id < current {
            stale.push(key);
        } else if key.deployment_id > current {
            stats.chunks_retained += 1;
        }
    }

    let reclaimed: BTreeSet<DeploymentId> = stale.iter().map(|k| k.deployment_id).collect();

    let results: Vec<_> = stream::iter(stale)
        .map(|key| async move { (key, session.delete_chunk(key).await) })
        .buffer_unordered(DELETE_CONCURRENCY)
        .collect()
        .await;

    for (key, result) in results {
        match result {
            Ok(()) => stats.chunks_deleted += 1,
            Err(e) => {
                warn!("Failed to delete chunk {}: {}", key, e);
                stats.delete_failures += 1;
            }
        }
    }
    stats.deployments_reclaimed = reclaimed.len();

    if stats.chunks_deleted > 0 || stats.delete_failures > 0 {
        info!(
            current = %current,
            deleted = stats.chunks_deleted,
            failed = stats.delete_failures,
            deployments = stats.deployments_reclaimed,
            "Garbage collection finished"
        );
    }

    Ok(stats)
}

/// Run [`collect_garbage`] as a background task; failures are logged
pub fn spawn_garbage_collection(session: StoreSession) -> JoinHandle<GcStats> {
    tokio::spawn(async move {
        match collect_garbage(&session).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Garbage collection failed, will retry on next publish: {}", e);
                GcStats::default()
            }
        }
    })
}
