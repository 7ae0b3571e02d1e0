//! In-process document store
//!
//! Used by the `memory` backend and throughout the test suite. Faults can be
//! injected per operation class, and one-shot hooks can rewrite the store
//! after a given number of reads or writes to simulate a concurrent publisher.

use super::{
    check_document_size, ChunkDocument, ChunkKey, DocumentStore, Identity, SnapshotMetadata,
    METADATA_PATH,
};
use crate::config::default_max_document_bytes;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Failures to inject into a [`MemoryStore`]
#[derive(Debug, Clone, Default)]
pub struct StoreFaults {
    /// Refuse `connect` with an authentication error
    pub reject_auth: bool,
    /// Fail every call with an authentication error, as if a token expired
    pub revoke_auth: bool,
    /// Let this many chunk writes through, then fail the rest
    pub fail_chunk_writes_after: Option<usize>,
    pub fail_chunk_reads: bool,
    pub fail_metadata_reads: bool,
    pub fail_metadata_writes: bool,
    pub fail_deletes: bool,
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub connects: usize,
    pub metadata_reads: usize,
    pub metadata_writes: usize,
    pub chunk_reads: usize,
    pub chunk_writes: usize,
    pub chunk_deletes: usize,
}

/// Everything the store holds
#[derive(Debug, Clone, Default)]
pub struct MemoryContents {
    pub metadata: Option<SnapshotMetadata>,
    pub chunks: BTreeMap<ChunkKey, ChunkDocument>,
}

type Hook = Box<dyn FnOnce(&mut MemoryContents) + Send>;

/// Operation a hook is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookPoint {
    ChunkReads,
    ChunkWrites,
    MetadataReads,
}

#[derive(Default)]
struct Inner {
    contents: MemoryContents,
    faults: StoreFaults,
    stats: StoreStats,
    hooks: Vec<(HookPoint, usize, Hook)>,
}

impl Inner {
    /// Run every hook at `point` whose count has been reached
    fn fire_hooks(&mut self, point: HookPoint) {
        let count = match point {
            HookPoint::ChunkReads => self.stats.chunk_reads,
            HookPoint::ChunkWrites => self.stats.chunk_writes,
            HookPoint::MetadataReads => self.stats.metadata_reads,
        };
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.hooks)
            .into_iter()
            .partition(|(p, after, _)| *p == point && count >= *after);
        self.hooks = pending;
        for (_, _, hook) in due {
            hook(&mut self.contents);
        }
    }
}

/// Document store held in process memory. Clones share contents.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    max_document_bytes: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(default_max_document_bytes())
    }
}

impl MemoryStore {
    pub fn new(max_document_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            max_document_bytes,
        }
    }

    pub fn set_faults(&self, faults: StoreFaults) {
        self.lock().faults = faults;
    }

    pub fn stats(&self) -> StoreStats {
        self.lock().stats
    }

    pub fn reset_stats(&self) {
        self.lock().stats = StoreStats::default();
    }

    /// Copy of the current contents
    pub fn contents(&self) -> MemoryContents {
        self.lock().contents.clone()
    }

    /// Apply `f` to the contents directly, bypassing faults and counters
    pub fn with_contents<R>(&self, f: impl FnOnce(&mut MemoryContents) -> R) -> R {
        f(&mut self.lock().contents)
    }

    /// Run `hook` once, right after the `after`-th chunk read completes
    pub fn on_chunk_reads(&self, after: usize, hook: impl FnOnce(&mut MemoryContents) + Send + 'static) {
        self.add_hook(HookPoint::ChunkReads, after, Box::new(hook));
    }

    /// Run `hook` once, right after the `after`-th chunk write lands
    pub fn on_chunk_writes(&self, after: usize, hook: impl FnOnce(&mut MemoryContents) + Send + 'static) {
        self.add_hook(HookPoint::ChunkWrites, after, Box::new(hook));
    }

    /// Run `hook` once, right after the `after`-th metadata read has taken
    /// its copy. The reader sees the contents from before the hook ran.
    pub fn on_metadata_reads(&self, after: usize, hook: impl FnOnce(&mut MemoryContents) + Send + 'static) {
        self.add_hook(HookPoint::MetadataReads, after, Box::new(hook));
    }

    fn add_hook(&self, point: HookPoint, after: usize, hook: Hook) {
        self.lock().hooks.push((point, after, hook));
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_revoked(inner: &Inner) -> Result<()> {
        if inner.faults.revoke_auth {
            return Err(Error::Auth("token expired".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn connect(&self) -> Result<Identity> {
        let mut inner = self.lock();
        inner.stats.connects += 1;
        if inner.faults.reject_auth || inner.faults.revoke_auth {
            return Err(Error::Auth("credentials rejected".to_string()));
        }
        Ok(Identity {
            principal: "memory".to_string(),
        })
    }

    async fn get_metadata(&self) -> Result<Option<SnapshotMetadata>> {
        let mut inner = self.lock();
        Self::check_revoked(&inner)?;
        if inner.faults.fail_metadata_reads {
            return Err(Error::Transport("metadata read failed".to_string()));
        }
        inner.stats.metadata_reads += 1;
        let metadata = inner.contents.metadata.clone();
        inner.fire_hooks(HookPoint::MetadataReads);
        Ok(metadata)
    }

    async fn put_metadata(&self, metadata: &SnapshotMetadata) -> Result<()> {
        let body = serde_json::to_string(metadata)?;
        check_document_size(METADATA_PATH, body.len(), self.max_document_bytes)?;

        let mut inner = self.lock();
        Self::check_revoked(&inner)?;
        if inner.faults.fail_metadata_writes {
            return Err(Error::Transport("metadata write failed".to_string()));
        }
        inner.stats.metadata_writes += 1;
        inner.contents.metadata = Some(metadata.clone());
        Ok(())
    }

    async fn put_chunk(&self, key: ChunkKey, chunk: &ChunkDocument) -> Result<()> {
        let body = serde_json::to_string(chunk)?;
        check_document_size(&key.path(), body.len(), self.max_document_bytes)?;

        let mut inner = self.lock();
        Self::check_revoked(&inner)?;
        if let Some(limit) = inner.faults.fail_chunk_writes_after {
            if inner.stats.chunk_writes >= limit {
                return Err(Error::Transport(format!("write of {} failed", key)));
            }
        }
        inner.stats.chunk_writes += 1;
        inner.contents.chunks.insert(key, chunk.clone());
        inner.fire_hooks(HookPoint::ChunkWrites);
        Ok(())
    }

    async fn get_chunk(&self, key: ChunkKey) -> Result<ChunkDocument> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        Self::check_revoked(inner)?;
        if inner.faults.fail_chunk_reads {
            return Err(Error::Transport(format!("read of {} failed", key)));
        }

        let result = inner
            .contents
            .chunks
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::ChunkNotFound {
                deployment_id: key.deployment_id.to_string(),
                index: key.index,
            });
        inner.stats.chunk_reads += 1;
        inner.fire_hooks(HookPoint::ChunkReads);

        result
    }

    async fn list_chunks(&self) -> Result<Vec<ChunkKey>> {
        let inner = self.lock();
        Self::check_revoked(&inner)?;
        Ok(inner.contents.chunks.keys().copied().collect())
    }

    async fn delete_chunk(&self, key: ChunkKey) -> Result<()> {
        let mut inner = self.lock();
        Self::check_revoked(&inner)?;
        if inner.faults.fail_deletes {
            return Err(Error::Transport(format!("delete of {} failed", key)));
        }
        inner.stats.chunk_deletes += 1;
        inner.contents.chunks.remove(&key);
        Ok(())
    }

    fn max_document_bytes(&self) -> usize {
        self.max_document_bytes
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DeploymentId;

    fn chunk(data: &str) -> ChunkDocument {
        ChunkDocument {
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn test_chunk_crud() {
        let store = MemoryStore::default();
        let key = ChunkKey::new(DeploymentId::new(7), 0);

        assert!(matches!(
            store.get_chunk(key).await,
            Err(Error::ChunkNotFound { index: 0, .. })
        ));

        store.put_chunk(key, &chunk("abc")).await.unwrap();
        assert_eq!(store.get_chunk(key).await.unwrap().data, "abc");
        assert_eq!(store.list_chunks().await.unwrap(), vec![key]);

        store.delete_chunk(key).await.unwrap();
        store.delete_chunk(key).await.unwrap();
        assert!(store.list_chunks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_document_ceiling() {
        let store = MemoryStore::new(32);
        let key = ChunkKey::new(DeploymentId::new(1), 0);

        let err = store.put_chunk(key, &chunk(&"x".repeat(64))).await.unwrap_err();
        assert!(matches!(err, Error::DocumentTooLarge { limit: 32, .. }));
        assert!(store.contents().chunks.is_empty());
    }

    #[tokio::test]
    async fn test_write_fault_after_count() {
        let store = MemoryStore::default();
        store.set_faults(StoreFaults {
            fail_chunk_writes_after: Some(2),
            ..Default::default()
        });

        for index in 0..2 {
            let key = ChunkKey::new(DeploymentId::new(1), index);
            store.put_chunk(key, &chunk("ok")).await.unwrap();
        }
        let key = ChunkKey::new(DeploymentId::new(1), 2);
        assert!(store.put_chunk(key, &chunk("no")).await.unwrap_err().is_transport());
        assert_eq!(store.stats().chunk_writes, 2);
    }

    #[tokio::test]
    async fn test_read_hook_fires_once() {
        let store = MemoryStore::default();
        let key = ChunkKey::new(DeploymentId::new(1), 0);
        store.put_chunk(key, &chunk("a")).await.unwrap();

        store.on_chunk_reads(1, move |contents| {
            contents.chunks.clear();
        });

        assert!(store.get_chunk(key).await.is_ok());
        assert!(store.get_chunk(key).await.is_err());
    }

    #[tokio::test]
    async fn test_metadata_hook_runs_after_the_read() {
        let store = MemoryStore::default();
        store.on_metadata_reads(1, |contents| {
            contents.metadata = Some(SnapshotMetadata {
                deployment_id: DeploymentId::new(9),
                chunk_count: 1,
                published_at: "2024-01-01T00:00:00+00:00".to_string(),
                author_id: "other".to_string(),
                payload_bytes: None,
                payload_hash: None,
            });
        });

        assert!(store.get_metadata().await.unwrap().is_none());
        assert_eq!(
            store.get_metadata().await.unwrap().unwrap().deployment_id,
            DeploymentId::new(9)
        );
    }

    #[tokio::test]
    async fn test_write_hook_fires_after_count() {
        let store = MemoryStore::default();
        store.on_chunk_writes(2, |contents| contents.chunks.clear());

        let first = ChunkKey::new(DeploymentId::new(1), 0);
        store.put_chunk(first, &chunk("a")).await.unwrap();
        assert_eq!(store.contents().chunks.len(), 1);

        let second = ChunkKey::new(DeploymentId::new(1), 1);
        store.put_chunk(second, &chunk("b")).await.unwrap();
        assert!(store.contents().chunks.is_empty());
    }
}
