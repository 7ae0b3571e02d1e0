//! Publishing aggregates as chunked deployments

use super::{encode_snapshot, spawn_garbage_collection, GcStats};
use crate::aggregate::Aggregate;
use crate::chunk::{compute_payload_hash, Splitter};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{ChunkDocument, ChunkKey, DeploymentId, SnapshotMetadata, StoreSession};
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Attempts at landing a deployment while others keep superseding it
const MAX_PUBLISH_ATTEMPTS: usize = 3;

/// A completed publish
#[derive(Debug)]
pub struct Publication {
    /// The metadata document that was flipped in
    pub metadata: SnapshotMetadata,
    /// The serialized aggregate that was published
    pub payload: String,
    /// Background collection of superseded deployments
    pub gc: JoinHandle<GcStats>,
}

/// Writes aggregates to the store as new deployments
#[derive(Clone)]
pub struct Publisher {
    session: StoreSession,
    splitter: Splitter,
    author_id: String,
    upload_concurrency: usize,
}

impl Publisher {
    pub fn new(session: StoreSession, config: &Config) -> Result<Self> {
        Ok(Self::with_settings(
            session,
            Splitter::for_json_documents(config.store.chunk_bytes)?,
            &config.author_id,
            config.sync.upload_concurrency,
        ))
    }

    pub fn with_settings(
        session: StoreSession,
        splitter: Splitter,
        author_id: &str,
        upload_concurrency: usize,
    ) -> Self {
        Self {
            session,
            splitter,
            author_id: author_id.to_string(),
            upload_concurrency: upload_concurrency.max(1),
        }
    }

    /// Publish `aggregate` as the new current deployment.
    ///
    /// Last write wins: a concurrent publisher's deployment is replaced
    /// without merging. If a newer deployment lands while chunks are being
    /// written, this one is re-minted above it, so the current deployment id
    /// only moves forward and never points at collected chunks.
    pub async fn publish(&self, aggregate: &Aggregate) -> Result<Publication> {
        let current = self.session.get_metadata().await?;
        self.publish_over(aggregate, current, None).await
    }

    /// Publish only if the current deployment is still `expected`
    /// (`None` meaning nothing published yet). Fails with
    /// [`Error::Conflict`] otherwise, leaving the current deployment alone.
    pub async fn publish_expecting(
        &self,
        aggregate: &Aggregate,
        expected: Option<DeploymentId>,
    ) -> Result<Publication> {
        let current = self.session.get_metadata().await?;
        check_expected(expected, current.as_ref())?;
        self.publish_over(aggregate, current, Some(expected)).await
    }

    /// Publish an empty aggregate
    pub async fn clear(&self) -> Result<Publication> {
        info!("Publishing empty aggregate");
        self.publish(&Aggregate::new()).await
    }

    async fn publish_over(
        &self,
        aggregate: &Aggregate,
        current: Option<SnapshotMetadata>,
        mut expected: Option<Option<DeploymentId>>,
    ) -> Result<Publication> {
        let payload = encode_snapshot(aggregate)?;
        let pieces: Vec<String> = self
            .splitter
            .split(&payload)
            .into_iter()
            .map(str::to_string)
            .collect();
        let payload_hash = compute_payload_hash(&payload);
        let mut floor = current.map(|m| m.deployment_id);

        for attempt in 1..=MAX_PUBLISH_ATTEMPTS {
            let deployment_id = DeploymentId::mint(floor)?;

            debug!(
                deployment = %deployment_id,
                chunks = pieces.len(),
                bytes = payload.len(),
                attempt,
                "Writing deployment chunks"
            );

            if let Err(e) = self.write_chunks(deployment_id, &pieces).await {
                warn!(
                    deployment = %deployment_id,
                    "Publish aborted before metadata flip: {}", e
                );
                return Err(e);
            }

            // The current deployment may have moved while chunks were written
            let latest = self.session.get_metadata().await?;
            if let Some(expected) = expected {
                check_expected(expected, latest.as_ref())?;
            }
            if let Some(newer) = latest
                .map(|m| m.deployment_id)
                .filter(|id| *id >= deployment_id)
            {
                warn!(
                    deployment = %deployment_id,
                    current = %newer,
                    "Deployment {} landed while writing; republishing above it", newer
                );
                floor = Some(newer);
                continue;
            }

            let metadata = SnapshotMetadata {
                deployment_id,
                chunk_count: pieces.len(),
                published_at: Utc::now().to_rfc3339(),
                author_id: self.author_id.clone(),
                payload_bytes: Some(payload.len()),
                payload_hash: Some(payload_hash.clone()),
            };
            self.session.put_metadata(&metadata).await?;

            // A newer publisher's collection can reach our chunks between the
            // check above and the flip
            let (surviving, newest) = self.surviving_chunks(deployment_id).await?;
            if surviving != pieces.len() {
                warn!(
                    deployment = %deployment_id,
                    surviving,
                    chunks = pieces.len(),
                    "Chunks were collected during the metadata flip; republishing"
                );
                floor = newest.max(Some(deployment_id));
                if expected.is_some() {
                    expected = Some(Some(deployment_id));
                }
                continue;
            }

            info!(
                deployment = %deployment_id,
                chunks = metadata.chunk_count,
                bytes = payload.len(),
                products = aggregate.products.len(),
                "Published deployment"
            );

            let gc = spawn_garbage_collection(self.session.clone());

            return Ok(Publication {
                metadata,
                payload,
                gc,
            });
        }

        Err(Error::Transport(format!(
            "deployment kept being superseded; gave up publishing after {} attempts",
            MAX_PUBLISH_ATTEMPTS
        )))
    }

    /// Write every piece as a chunk of `deployment_id`, a bounded number at a time
    async fn write_chunks(&self, deployment_id: DeploymentId, pieces: &[String]) -> Result<()> {
        let writes: Vec<_> = pieces
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, data)| {
                let session = self.session.clone();
                async move {
                    let key = ChunkKey::new(deployment_id, index);
                    session.put_chunk(key, &ChunkDocument { data }).await
                }
            })
            .collect();

        stream::iter(writes)
            .buffer_unordered(self.upload_concurrency)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    /// Chunks of `deployment_id` still stored, and the newest deployment with any chunk
    async fn surviving_chunks(
        &self,
        deployment_id: DeploymentId,
    ) -> Result<(usize, Option<DeploymentId>)> {
        let keys = self.session.list_chunks().await?;
        let surviving = keys
            .iter()
            .filter(|key| key.deployment_id == deployment_id)
            .count();
        let newest = keys.iter().map(|key| key.deployment_id).max();
        Ok((surviving, newest))
    }
}

fn check_expected(expected: Option<DeploymentId>, found: Option<&SnapshotMetadata>) -> Result<()> {
    let found = found.map(|m| m.deployment_id);
    if found != expected {
        return Err(Error::Conflict {
            expected: expected.map(|id| id.to_string()),
            found: found.map(|id| id.to_string()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{day, row, sample_files};
    use crate::store::{MemoryContents, MemoryStore, StoreFaults};
    use crate::sync::{decode_snapshot, Subscriber};
    use std::sync::{mpsc, Arc};

    fn aggregate() -> Aggregate {
        let mut aggregate = Aggregate::new();
        for (date, rows) in sample_files() {
            aggregate.merge_file(date, rows);
        }
        aggregate
    }

    async fn publisher(store: &MemoryStore, chunk_bytes: usize) -> Publisher {
        let session = StoreSession::open(Arc::new(store.clone())).await.unwrap();
        Publisher::with_settings(
            session,
            Splitter::for_json_documents(chunk_bytes).unwrap(),
            "tester",
            4,
        )
    }

    /// Another publisher lands `aggregate` above every stored deployment and
    /// collects everything older
    fn land_rival(contents: &mut MemoryContents, aggregate: &Aggregate) -> DeploymentId {
        let newest = contents
            .chunks
            .keys()
            .map(|k| k.deployment_id.value())
            .chain(contents.metadata.iter().map(|m| m.deployment_id.value()))
            .max()
            .unwrap_or(0);
        let id = DeploymentId::new(newest + 1_000);

        let payload = encode_snapshot(aggregate).unwrap();
        contents.chunks.insert(
            ChunkKey::new(id, 0),
            ChunkDocument {
                data: payload.clone(),
            },
        );
        contents.metadata = Some(SnapshotMetadata {
            deployment_id: id,
            chunk_count: 1,
            published_at: Utc::now().to_rfc3339(),
            author_id: "rival".to_string(),
            payload_bytes: Some(payload.len()),
            payload_hash: Some(compute_payload_hash(&payload)),
        });
        contents.chunks.retain(|key, _| key.deployment_id >= id);
        id
    }

    async fn read_back(store: &MemoryStore) -> Aggregate {
        let session = StoreSession::open(Arc::new(store.clone())).await.unwrap();
        let mut subscriber = Subscriber::new(session, None, 3);
        subscriber.sync_once().await.unwrap();
        subscriber.aggregate().clone()
    }

    fn stored_payload(store: &MemoryStore) -> String {
        let contents = store.contents();
        let metadata = contents.metadata.unwrap();
        metadata
            .chunk_keys()
            .map(|key| contents.chunks[&key].data.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_publish_writes_chunks_then_metadata() {
        let store = MemoryStore::default();
        let publisher = publisher(&store, 64).await;
        let aggregate = aggregate();

        let publication = publisher.publish(&aggregate).await.unwrap();
        let metadata = &publication.metadata;

        assert_eq!(
            metadata.chunk_count,
            publisher.splitter.split(&publication.payload).len()
        );
        assert!(metadata.chunk_count > 1);
        assert_eq!(metadata.author_id, "tester");
        assert_eq!(metadata.payload_bytes, Some(publication.payload.len()));
        assert_eq!(store.contents().metadata.as_ref(), Some(metadata));
        assert_eq!(decode_snapshot(&stored_payload(&store)).unwrap(), aggregate);

        let stats = publication.gc.await.unwrap();
        assert_eq!(stats.chunks_deleted, 0);
    }

    #[tokio::test]
    async fn test_republish_reclaims_previous_deployment() {
        let store = MemoryStore::default();
        let publisher = publisher(&store, 32).await;

        let first = publisher.publish(&aggregate()).await.unwrap();
        first.gc.await.unwrap();

        let mut next = aggregate();
        next.merge_file(day("2024-02-02"), vec![row("D", "Thing", 1.0, 1, 1)]);
        let second = publisher.publish(&next).await.unwrap();
        assert!(second.metadata.deployment_id > first.metadata.deployment_id);

        let stats = second.gc.await.unwrap();
        assert_eq!(stats.chunks_deleted, first.metadata.chunk_count);
        assert!(store
            .contents()
            .chunks
            .keys()
            .all(|k| k.deployment_id == second.metadata.deployment_id));
    }

    #[tokio::test]
    async fn test_failed_chunk_write_keeps_previous_snapshot() {
        let store = MemoryStore::default();
        let publisher = publisher(&store, 32).await;

        let first = publisher.publish(&aggregate()).await.unwrap();
        first.gc.await.unwrap();
        let before = store.contents().metadata;

        store.reset_stats();
        store.set_faults(StoreFaults {
            fail_chunk_writes_after: Some(1),
            ..Default::default()
        });

        let mut next = aggregate();
        next.merge_file(day("2024-03-01"), vec![row("E", "New", 9.0, 9, 9)]);
        let err = publisher.publish(&next).await.unwrap_err();
        assert!(err.is_transport());

        assert_eq!(store.contents().metadata, before);
        assert_eq!(store.stats().metadata_writes, 0);
        assert_eq!(decode_snapshot(&stored_payload(&store)).unwrap(), aggregate());
    }

    #[tokio::test]
    async fn test_clear_publishes_empty_aggregate() {
        let store = MemoryStore::default();
        let publisher = publisher(&store, 1024).await;

        publisher.publish(&aggregate()).await.unwrap();
        let cleared = publisher.clear().await.unwrap();

        assert_eq!(cleared.metadata.chunk_count, 1);
        assert!(decode_snapshot(&stored_payload(&store)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_expecting_detects_conflict() {
        let store = MemoryStore::default();
        let publisher = publisher(&store, 1024).await;

        let first = publisher.publish_expecting(&aggregate(), None).await.unwrap();
        let first_id = first.metadata.deployment_id;

        // Someone else publishes in between
        let other = publisher.publish(&Aggregate::new()).await.unwrap();

        let err = publisher
            .publish_expecting(&aggregate(), Some(first_id))
            .await
            .unwrap_err();
        match err {
            Error::Conflict { expected, found } => {
                assert_eq!(expected, Some(first_id.to_string()));
                assert_eq!(found, Some(other.metadata.deployment_id.to_string()));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(
            store.contents().metadata.unwrap().deployment_id,
            other.metadata.deployment_id
        );
    }

    #[tokio::test]
    async fn test_escape_heavy_aggregate_fits_default_ceiling() {
        let config = Config::default();
        let store = MemoryStore::default();
        let session = StoreSession::open(Arc::new(store.clone())).await.unwrap();
        let publisher = Publisher::new(session, &config).unwrap();

        let rows: Vec<_> = (0..20_000)
            .map(|i| row(&format!("P{}", i), r#""q""q""q"\한\n"#, 1.5, 10, 1))
            .collect();
        let mut aggregate = Aggregate::new();
        aggregate.merge_file(day("2024-01-05"), rows);

        let publication = publisher.publish(&aggregate).await.unwrap();
        assert!(publication.metadata.chunk_count > 1);

        for chunk in store.contents().chunks.values() {
            let body = serde_json::to_string(chunk).unwrap();
            assert!(body.len() <= config.store.max_document_bytes);
        }
        assert_eq!(read_back(&store).await, aggregate);
    }

    #[tokio::test]
    async fn test_multibyte_payload_round_trips_through_small_ceiling() {
        let store = MemoryStore::new(64);
        let publisher = publisher(&store, 40).await;

        let mut aggregate = Aggregate::new();
        aggregate.merge_file(
            day("2024-01-05"),
            vec![
                row("A", "가방 \"특가\"", 12.5, 30, 2),
                row("B", "tab\there\u{01}", 3.0, 4, 1),
                row("C", "😀 emoji", 1.0, 1, 1),
            ],
        );

        publisher.publish(&aggregate).await.unwrap();
        assert_eq!(read_back(&store).await, aggregate);
    }

    #[tokio::test]
    async fn test_deployment_landing_mid_write_is_superseded() {
        let store = MemoryStore::default();
        let publisher = publisher(&store, 32).await;

        let mut rival_aggregate = Aggregate::new();
        rival_aggregate.merge_file(day("2024-02-01"), vec![row("R", "Rival", 5.0, 5, 5)]);
        let (tx, rx) = mpsc::channel();
        store.on_chunk_writes(1, move |contents| {
            tx.send(land_rival(contents, &rival_aggregate)).unwrap();
        });

        let ours = aggregate();
        let publication = publisher.publish(&ours).await.unwrap();
        let rival = rx.recv().unwrap();

        assert!(publication.metadata.deployment_id > rival);
        assert_eq!(store.contents().metadata.as_ref(), Some(&publication.metadata));
        assert_eq!(read_back(&store).await, ours);

        publication.gc.await.unwrap();
        assert!(store
            .contents()
            .chunks
            .keys()
            .all(|k| k.deployment_id == publication.metadata.deployment_id));
    }

    #[tokio::test]
    async fn test_chunks_collected_during_flip_are_republished() {
        let store = MemoryStore::default();
        let publisher = publisher(&store, 32).await;

        let mut rival_aggregate = Aggregate::new();
        rival_aggregate.merge_file(day("2024-02-01"), vec![row("R", "Rival", 5.0, 5, 5)]);
        let (tx, rx) = mpsc::channel();
        // Second read is the check just before the flip; the rival lands right after it
        store.on_metadata_reads(2, move |contents| {
            tx.send(land_rival(contents, &rival_aggregate)).unwrap();
        });

        let ours = aggregate();
        let publication = publisher.publish(&ours).await.unwrap();
        let rival = rx.recv().unwrap();

        assert!(publication.metadata.deployment_id > rival);
        assert_eq!(store.stats().metadata_writes, 2);
        assert_eq!(store.contents().metadata.as_ref(), Some(&publication.metadata));
        assert_eq!(read_back(&store).await, ours);
    }

    #[tokio::test]
    async fn test_publish_can_run_as_spawned_task() {
        let store = MemoryStore::default();
        let publisher = publisher(&store, 32).await;
        let aggregate = aggregate();

        let expected = aggregate.clone();
        let handle = tokio::spawn(async move { publisher.publish(&aggregate).await });
        let publication = handle.await.unwrap().unwrap();

        publication.gc.await.unwrap();
        assert_eq!(read_back(&store).await, expected);
    }
}
