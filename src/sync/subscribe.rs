//! Following the published deployment

use super::decode_snapshot;
use crate::aggregate::Aggregate;
use crate::cache::{CachedSnapshot, SnapshotCache};
use crate::chunk::{compute_payload_hash, Joiner};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{DeploymentId, SnapshotMetadata, StoreSession};
use futures::future::try_join_all;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where an applied snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    Store,
    Cache,
}

/// Result of one synchronization pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The store has no metadata document yet
    NothingPublished,
    /// Already on the current deployment
    Unchanged { deployment_id: DeploymentId },
    /// A new deployment was applied
    Applied {
        deployment_id: DeploymentId,
        source: SnapshotSource,
        chunk_count: usize,
    },
}

impl SyncOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SyncOutcome::Applied { .. })
    }
}

/// Counters from a watch loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchStats {
    pub polls: usize,
    pub applied: usize,
    pub failures: usize,
}

/// A reader that keeps an in-memory aggregate in step with the store.
///
/// The aggregate is only ever replaced wholesale by a fully fetched and
/// verified deployment; any failure leaves the previous one in place.
pub struct Subscriber {
    session: StoreSession,
    cache: Option<SnapshotCache>,
    max_attempts: u32,
    aggregate: Aggregate,
    applied: Option<SnapshotMetadata>,
}

impl Subscriber {
    pub fn new(session: StoreSession, cache: Option<SnapshotCache>, max_attempts: u32) -> Self {
        Self {
            session,
            cache,
            max_attempts: max_attempts.max(1),
            aggregate: Aggregate::new(),
            applied: None,
        }
    }

    /// Build a subscriber from configuration, using the cache when enabled
    pub async fn from_config(session: StoreSession, config: &Config) -> Result<Self> {
        let cache = if config.sync.use_cache {
            Some(SnapshotCache::connect(config).await?)
        } else {
            None
        };
        Ok(Self::new(session, cache, config.sync.max_fetch_attempts))
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    pub fn into_aggregate(self) -> Aggregate {
        self.aggregate
    }

    pub fn cache(&self) -> Option<&SnapshotCache> {
        self.cache.as_ref()
    }

    pub fn applied_metadata(&self) -> Option<&SnapshotMetadata> {
        self.applied.as_ref()
    }

    pub fn applied_deployment(&self) -> Option<DeploymentId> {
        self.applied.as_ref().map(|m| m.deployment_id)
    }

    /// Show the last cached snapshot before any network round-trip
    pub async fn restore_from_cache(&mut self) -> Result<Option<DeploymentId>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let Some(cached) = cache.load().await? else {
            return Ok(None);
        };

        let deployment_id = cached.deployment()?;
        let aggregate = match decode_snapshot(&cached.payload) {
            Ok(aggregate) => aggregate,
            Err(e) => {
                warn!("Ignoring unreadable cached snapshot: {}", e);
                return Ok(None);
            }
        };

        debug!(deployment = %deployment_id, "Restored snapshot from cache");
        self.aggregate = aggregate;
        self.applied = Some(SnapshotMetadata {
            deployment_id,
            chunk_count: 0,
            published_at: cached.published_at,
            author_id: String::new(),
            payload_bytes: Some(cached.payload.len()),
            payload_hash: None,
        });
        Ok(Some(deployment_id))
    }

    /// Record a deployment this process published itself, so the next pass
    /// does not download it again
    pub async fn adopt(&mut self, metadata: SnapshotMetadata, aggregate: Aggregate, payload: &str) {
        self.remember(&metadata, payload).await;
        self.aggregate = aggregate;
        self.applied = Some(metadata);
    }

    /// Bring the in-memory aggregate up to the current deployment.
    ///
    /// Skips the download when the current deployment is already applied.
    /// A chunk that disappears mid-fetch means the deployment was superseded
    /// and collected; the pass re-reads metadata and fetches the newer one.
    /// After applying, metadata is checked again so a reader never stays on
    /// a deployment that moved on during the download.
    pub async fn sync_once(&mut self) -> Result<SyncOutcome> {
        let mut attempts = 0;
        let mut outcome = None;

        loop {
            let Some(metadata) = self.session.get_metadata().await? else {
                return Ok(outcome.unwrap_or(SyncOutcome::NothingPublished));
            };

            if self.applied_deployment() == Some(metadata.deployment_id) {
                return Ok(outcome.unwrap_or(SyncOutcome::Unchanged {
                    deployment_id: metadata.deployment_id,
                }));
            }

            if attempts >= self.max_attempts {
                return match outcome {
                    Some(applied) => {
                        debug!("Deployment moved again; catching up on the next pass");
                        Ok(applied)
                    }
                    None => Err(Error::Transport(format!(
                        "deployment kept changing during fetch; gave up after {} attempts",
                        attempts
                    ))),
                };
            }
            attempts += 1;

            match self.load(&metadata).await {
                Ok((aggregate, payload, source)) => {
                    if source == SnapshotSource::Store {
                        self.remember(&metadata, &payload).await;
                    }
                    info!(
                        deployment = %metadata.deployment_id,
                        source = ?source,
                        products = aggregate.products.len(),
                        "Applied snapshot"
                    );
                    outcome = Some(SyncOutcome::Applied {
                        deployment_id: metadata.deployment_id,
                        source,
                        chunk_count: metadata.chunk_count,
                    });
                    self.aggregate = aggregate;
                    self.applied = Some(metadata);
                }
                Err(Error::ChunkNotFound {
                    deployment_id,
                    index,
                }) => {
                    warn!(
                        "Deployment {} lost chunk {} mid-fetch; re-reading metadata",
                        deployment_id, index
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll [`Subscriber::sync_once`] every `interval` until `shutdown`
    /// resolves. Transport failures are logged and retried on the next
    /// tick; an authentication failure ends the loop.
    pub async fn watch<S, F>(
        &mut self,
        interval: Duration,
        shutdown: S,
        mut on_apply: F,
    ) -> Result<WatchStats>
    where
        S: Future<Output = ()>,
        F: FnMut(&Aggregate, &SyncOutcome),
    {
        let mut stats = WatchStats::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Watch stopped");
                    return Ok(stats);
                }
                _ = ticker.tick() => {
                    stats.polls += 1;
                    match self.sync_once().await {
                        Ok(outcome) => {
                            if outcome.is_applied() {
                                stats.applied += 1;
                                on_apply(&self.aggregate, &outcome);
                            }
                        }
                        Err(e) if e.is_auth() => return Err(e),
                        Err(e) => {
                            stats.failures += 1;
                            warn!("Sync failed, keeping last good snapshot: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Produce the aggregate for `metadata`, from the cache when it holds the
    /// same deployment, otherwise from the store
    async fn load(&self, metadata: &SnapshotMetadata) -> Result<(Aggregate, String, SnapshotSource)> {
        if let Some(payload) = self.cached_payload(metadata.deployment_id).await {
            match decode_snapshot(&payload) {
                Ok(aggregate) => return Ok((aggregate, payload, SnapshotSource::Cache)),
                Err(e) => warn!("Cached snapshot unreadable, downloading: {}", e),
            }
        }

        let payload = self.fetch(metadata).await?;
        let aggregate = decode_snapshot(&payload)?;
        Ok((aggregate, payload, SnapshotSource::Store))
    }

    /// Download and reassemble every chunk of one deployment
    async fn fetch(&self, metadata: &SnapshotMetadata) -> Result<String> {
        debug!(
            deployment = %metadata.deployment_id,
            chunks = metadata.chunk_count,
            "Fetching deployment"
        );

        let session = &self.session;
        let pieces = try_join_all(metadata.chunk_keys().map(|key| async move {
            session
                .get_chunk(key)
                .await
                .map(|chunk| (key.index, chunk.data))
        }))
        .await?;

        let payload = Joiner::new(metadata.chunk_count).join(pieces)?;
        verify_payload(metadata, &payload)?;
        Ok(payload)
    }

    async fn cached_payload(&self, deployment_id: DeploymentId) -> Option<String> {
        let cache = self.cache.as_ref()?;
        match cache.load().await {
            Ok(Some(cached)) if cached.deployment_id == deployment_id.to_string() => {
                Some(cached.payload)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Snapshot cache unavailable: {}", e);
                None
            }
        }
    }

    async fn remember(&self, metadata: &SnapshotMetadata, payload: &str) {
        let Some(cache) = &self.cache else {
            return;
        };
        let snapshot = CachedSnapshot::new(
            metadata.deployment_id,
            payload.to_string(),
            metadata.published_at.clone(),
        );
        if let Err(e) = cache.store(&snapshot).await {
            warn!("Failed to cache snapshot: {}", e);
        }
    }
}

fn verify_payload(metadata: &SnapshotMetadata, payload: &str) -> Result<()> {
    if let Some(expected) = metadata.payload_bytes {
        if expected != payload.len() {
            return Err(Error::Integrity(format!(
                "deployment {} is {} bytes, metadata says {}",
                metadata.deployment_id,
                payload.len(),
                expected
            )));
        }
    }
    if let Some(expected) = &metadata.payload_hash {
        if *expected != compute_payload_hash(payload) {
            return Err(Error::Integrity(format!(
                "deployment {} payload hash mismatch",
                metadata.deployment_id
            )));
        }
    }
    Ok(())
}
