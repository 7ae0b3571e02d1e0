//! Shared document store integration
//!
//! This module defines the injected store client and provides:
//! - The metadata and chunk document shapes
//! - A [`DocumentStore`] trait with in-memory, filesystem and HTTP backends
//! - A [`StoreSession`] that owns the connect/disconnect lifecycle and
//!   suppresses all traffic after an authentication failure

mod fs;
mod http;
mod memory;

pub use fs::*;
pub use http::*;
pub use memory::*;

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Identifier of one published deployment.
///
/// Minted from the wall clock in milliseconds and always greater than the
/// deployment it replaces, so ordering by id is ordering by publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeploymentId(u64);

impl DeploymentId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Mint an id greater than `previous` and no earlier than now.
    ///
    /// Fails if `previous` is already the largest representable id.
    pub fn mint(previous: Option<DeploymentId>) -> Result<Self> {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        match previous {
            Some(prev) if prev.0 >= now => prev.0.checked_add(1).map(Self).ok_or_else(|| {
                Error::Integrity(format!("deployment id {} cannot be advanced", prev))
            }),
            _ => Ok(Self(now)),
        }
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeploymentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| Error::Parse(format!("Invalid deployment id: {}", s)))
    }
}

impl Serialize for DeploymentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeploymentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The pointer document: which deployment is current and how to read it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub deployment_id: DeploymentId,
    pub chunk_count: usize,
    /// RFC 3339 publish time
    pub published_at: String,
    pub author_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_bytes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<String>,
}

impl SnapshotMetadata {
    /// Keys of every chunk this deployment consists of
    pub fn chunk_keys(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        (0..self.chunk_count).map(|index| ChunkKey::new(self.deployment_id, index))
    }
}

/// Address of one chunk document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkKey {
    pub deployment_id: DeploymentId,
    pub index: usize,
}

impl ChunkKey {
    pub fn new(deployment_id: DeploymentId, index: usize) -> Self {
        Self {
            deployment_id,
            index,
        }
    }

    /// Document path, `chunks/<deployment>/<index>`
    pub fn path(&self) -> String {
        format!("{}{}/{}", CHUNK_PREFIX, self.deployment_id, self.index)
    }

    pub fn parse_path(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(CHUNK_PREFIX)?;
        let (deployment, index) = rest.split_once('/')?;
        Some(Self {
            deployment_id: deployment.parse().ok()?,
            index: index.parse().ok()?,
        })
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Path of the metadata document
pub const METADATA_PATH: &str = "metadata";

/// Path prefix shared by all chunk documents
pub const CHUNK_PREFIX: &str = "chunks/";

/// Body of a chunk document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDocument {
    pub data: String,
}

/// Who the store recognized us as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub principal: String,
}

/// Client for a document store with a per-document size ceiling.
///
/// Implementations report missing chunks as [`Error::ChunkNotFound`],
/// rejected credentials as [`Error::Auth`] and every other failure as a
/// transport-level error.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Establish identity with the store
    async fn connect(&self) -> Result<Identity>;

    /// Release any session resources
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Read the metadata document, `None` if nothing was ever published
    async fn get_metadata(&self) -> Result<Option<SnapshotMetadata>>;

    /// Overwrite the metadata document in a single write
    async fn put_metadata(&self, metadata: &SnapshotMetadata) -> Result<()>;

    async fn put_chunk(&self, key: ChunkKey, chunk: &ChunkDocument) -> Result<()>;

    async fn get_chunk(&self, key: ChunkKey) -> Result<ChunkDocument>;

    /// Every chunk key currently stored, across all deployments
    async fn list_chunks(&self) -> Result<Vec<ChunkKey>>;

    /// Delete a chunk; deleting a missing chunk is not an error
    async fn delete_chunk(&self, key: ChunkKey) -> Result<()>;

    /// Largest document body the store accepts
    fn max_document_bytes(&self) -> usize;

    /// Human-readable location for logs and status output
    fn describe(&self) -> String;
}

/// Reject a document body over the store ceiling
pub(crate) fn check_document_size(key: &str, size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(Error::DocumentTooLarge {
            key: key.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

/// Create the store backend named in configuration
pub fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match config.store.backend.as_str() {
        "fs" => Arc::new(FsStore::new(
            &config.store.root,
            config.store.max_document_bytes,
        )),
        "http" => Arc::new(HttpStore::new(&config.store)?),
        "memory" => Arc::new(MemoryStore::new(config.store.max_document_bytes)),
        other => {
            return Err(Error::Config(format!("Unknown store backend: {}", other)));
        }
    };
    Ok(store)
}

#[derive(Debug, Clone)]
enum SessionState {
    Disconnected,
    Connected(Identity),
    AuthFailed(String),
}

/// A store handle with an explicit connection lifecycle.
///
/// Cheap to clone; clones share the session state. Once the store rejects
/// our credentials every call fails fast with [`Error::Auth`] until
/// [`StoreSession::connect`] succeeds again.
#[derive(Clone)]
pub struct StoreSession {
    store: Arc<dyn DocumentStore>,
    state: Arc<Mutex<SessionState>>,
}

impl StoreSession {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(SessionState::Disconnected)),
        }
    }

    /// Create a session and connect it
    pub async fn open(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let session = Self::new(store);
        session.connect().await?;
        Ok(session)
    }

    pub async fn connect(&self) -> Result<Identity> {
        debug!("Connecting to store at {}", self.store.describe());

        match self.store.connect().await {
            Ok(identity) => {
                info!(principal = %identity.principal, store = %self.store.describe(), "Store session established");
                self.set_state(SessionState::Connected(identity.clone()));
                Ok(identity)
            }
            Err(e) => {
                if let Error::Auth(msg) = &e {
                    warn!("Store rejected credentials: {}", msg);
                    self.set_state(SessionState::AuthFailed(msg.clone()));
                }
                Err(e)
            }
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.set_state(SessionState::Disconnected);
        self.store.disconnect().await
    }

    pub fn identity(&self) -> Option<Identity> {
        match &*self.lock_state() {
            SessionState::Connected(identity) => Some(identity.clone()),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.identity().is_some()
    }

    pub fn max_document_bytes(&self) -> usize {
        self.store.max_document_bytes()
    }

    pub fn describe(&self) -> String {
        self.store.describe()
    }

    pub async fn get_metadata(&self) -> Result<Option<SnapshotMetadata>> {
        self.ensure_connected()?;
        let result = self.store.get_metadata().await;
        self.observe(result)
    }

    pub async fn put_metadata(&self, metadata: &SnapshotMetadata) -> Result<()> {
        self.ensure_connected()?;
        let result = self.store.put_metadata(metadata).await;
        self.observe(result)
    }

    pub async fn put_chunk(&self, key: ChunkKey, chunk: &ChunkDocument) -> Result<()> {
        self.ensure_connected()?;
        let result = self.store.put_chunk(key, chunk).await;
        self.observe(result)
    }

    pub async fn get_chunk(&self, key: ChunkKey) -> Result<ChunkDocument> {
        self.ensure_connected()?;
        let result = self.store.get_chunk(key).await;
        self.observe(result)
    }

    pub async fn list_chunks(&self) -> Result<Vec<ChunkKey>> {
        self.ensure_connected()?;
        let result = self.store.list_chunks().await;
        self.observe(result)
    }

    pub async fn delete_chunk(&self, key: ChunkKey) -> Result<()> {
        self.ensure_connected()?;
        let result = self.store.delete_chunk(key).await;
        self.observe(result)
    }

    fn ensure_connected(&self) -> Result<()> {
        match &*self.lock_state() {
            SessionState::Connected(_) => Ok(()),
            SessionState::AuthFailed(msg) => Err(Error::Auth(format!(
                "session suspended after authentication failure: {}",
                msg
            ))),
            SessionState::Disconnected => {
                Err(Error::Auth("store session is not connected".to_string()))
            }
        }
    }

    /// Latch an authentication failure seen mid-session
    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(Error::Auth(msg)) = &result {
            warn!("Store session lost authentication: {}", msg);
            self.set_state(SessionState::AuthFailed(msg.clone()));
        }
        result
    }

    fn set_state(&self, state: SessionState) {
        *self.lock_state() = state;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        // The state is a plain enum; a poisoned lock still holds a valid value
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
