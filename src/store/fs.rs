//! Directory-backed document store
//!
//! Layout under the root:
//! - `metadata.json`
//! - `chunks/<deployment>/<index>.json`
//!
//! Every document is written to a temporary sibling and renamed into place,
//! so readers never observe a half-written metadata flip.

use super::{
    check_document_size, ChunkDocument, ChunkKey, DeploymentId, DocumentStore, Identity,
    SnapshotMetadata, METADATA_PATH,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

pub struct FsStore {
    root: PathBuf,
    max_document_bytes: usize,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, max_document_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_document_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_path(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    fn chunks_dir(&self) -> PathBuf {
        self.root.join("chunks")
    }

    fn chunk_path(&self, key: ChunkKey) -> PathBuf {
        self.chunks_dir()
            .join(key.deployment_id.to_string())
            .join(format!("{}.json", key.index))
    }

    async fn write_document(&self, path: &Path, body: &str) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
        fs::create_dir_all(parent).await.map_err(transport)?;

        let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, body).await.map_err(transport)?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(transport(e));
        }
        Ok(())
    }

    async fn read_document<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let body = match fs::read_to_string(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(transport(e)),
        };
        let doc = serde_json::from_str(&body).map_err(|e| {
            Error::Transport(format!("Corrupt document {}: {}", path.display(), e))
        })?;
        Ok(Some(doc))
    }
}

fn transport(e: std::io::Error) -> Error {
    Error::Transport(e.to_string())
}

#[async_trait]
impl DocumentStore for FsStore {
    async fn connect(&self) -> Result<Identity> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            if e.kind() == ErrorKind::PermissionDenied {
                Error::Auth(format!("{}: {}", self.root.display(), e))
            } else {
                transport(e)
            }
        })?;
        debug!("Filesystem store ready at {:?}", self.root);

        let principal = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "local".to_string());
        Ok(Identity { principal })
    }

    async fn get_metadata(&self) -> Result<Option<SnapshotMetadata>> {
        self.read_document(&self.metadata_path()).await
    }

    async fn put_metadata(&self, metadata: &SnapshotMetadata) -> Result<()> {
        let body = serde_json::to_string_pretty(metadata)?;
        check_document_size(METADATA_PATH, body.len(), self.max_document_bytes)?;
        self.write_document(&self.metadata_path(), &body).await
    }

    async fn put_chunk(&self, key: ChunkKey, chunk: &ChunkDocument) -> Result<()> {
        let body = serde_json::to_string(chunk)?;
        check_document_size(&key.path(), body.len(), self.max_document_bytes)?;
        self.write_document(&self.chunk_path(key), &body).await
    }

    async fn get_chunk(&self, key: ChunkKey) -> Result<ChunkDocument> {
        self.read_document(&self.chunk_path(key))
            .await?
            .ok_or_else(|| Error::ChunkNotFound {
                deployment_id: key.deployment_id.to_string(),
                index: key.index,
            })
    }

    async fn list_chunks(&self) -> Result<Vec<ChunkKey>> {
        let mut keys = Vec::new();

        let mut deployments = match fs::read_dir(self.chunks_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(transport(e)),
        };

        while let Some(entry) = deployments.next_entry().await.map_err(transport)? {
            let Some(deployment_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<DeploymentId>().ok())
            else {
                continue;
            };

            let mut chunks = fs::read_dir(entry.path()).await.map_err(transport)?;
            while let Some(chunk) = chunks.next_entry().await.map_err(transport)? {
                let file_name = chunk.file_name();
                let index = file_name
                    .to_str()
                    .and_then(|name| name.strip_suffix(".json"))
                    .and_then(|stem| stem.parse::<usize>().ok());
                if let Some(index) = index {
                    keys.push(ChunkKey::new(deployment_id, index));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete_chunk(&self, key: ChunkKey) -> Result<()> {
        let path = self.chunk_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(transport(e)),
        }

        // Drop the deployment directory once its last chunk is gone
        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir(dir).await;
        }
        Ok(())
    }

    fn max_document_bytes(&self) -> usize {
        self.max_document_bytes
    }

    fn describe(&self) -> String {
        format!("fs:{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> FsStore {
        FsStore::new(tmp.path().join("store"), 1024)
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.connect().await.unwrap();

        assert!(store.get_metadata().await.unwrap().is_none());

        let metadata = SnapshotMetadata {
            deployment_id: DeploymentId::new(42),
            chunk_count: 2,
            published_at: "2024-01-01T00:00:00+00:00".to_string(),
            author_id: "ops".to_string(),
            payload_bytes: Some(10),
            payload_hash: None,
        };
        store.put_metadata(&metadata).await.unwrap();
        assert_eq!(store.get_metadata().await.unwrap(), Some(metadata));

        // No temp files left behind
        let mut entries = std::fs::read_dir(store.root()).unwrap();
        assert!(entries.all(|e| !e.unwrap().file_name().to_string_lossy().ends_with(".tmp")));
    }

    #[tokio::test]
    async fn test_chunks_list_and_delete() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.connect().await.unwrap();

        let a = ChunkKey::new(DeploymentId::new(1), 0);
        let b = ChunkKey::new(DeploymentId::new(1), 1);
        let c = ChunkKey::new(DeploymentId::new(2), 0);
        for key in [c, b, a] {
            let chunk = ChunkDocument {
                data: key.path(),
            };
            store.put_chunk(key, &chunk).await.unwrap();
        }

        assert_eq!(store.list_chunks().await.unwrap(), vec![a, b, c]);
        assert_eq!(store.get_chunk(b).await.unwrap().data, "chunks/1/1");

        store.delete_chunk(a).await.unwrap();
        store.delete_chunk(b).await.unwrap();
        store.delete_chunk(b).await.unwrap();
        assert_eq!(store.list_chunks().await.unwrap(), vec![c]);
        assert!(!store.chunks_dir().join("1").exists());
        assert!(matches!(
            store.get_chunk(a).await,
            Err(Error::ChunkNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_chunk_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.connect().await.unwrap();

        let key = ChunkKey::new(DeploymentId::new(1), 0);
        let chunk = ChunkDocument {
            data: "x".repeat(2048),
        };
        assert!(matches!(
            store.put_chunk(key, &chunk).await,
            Err(Error::DocumentTooLarge { .. })
        ));
        assert!(store.list_chunks().await.unwrap().is_empty());
    }
}
