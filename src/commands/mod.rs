//! CLI commands implementation

pub mod fetch;
pub mod ingest;
pub mod init;
pub mod maintenance;
pub mod products;
pub mod status;

pub use fetch::*;
pub use ingest::*;
pub use init::*;
pub use maintenance::*;
pub use products::*;
pub use status::*;

use crate::config::Config;
use crate::error::Result;
use crate::store::{open_store, StoreSession};
use crate::sync::Subscriber;
use tracing::warn;

/// Open and connect a session to the configured store
pub async fn open_session(config: &Config) -> Result<StoreSession> {
    let store = open_store(config)?;
    StoreSession::open(store).await
}

/// A subscriber holding the freshest aggregate available, for read-only views.
///
/// Starts from the local cache, then syncs with the store. If the store is
/// unreachable but a cached snapshot exists, the cached one is used.
pub async fn load_latest(config: &Config, session: &StoreSession) -> Result<Subscriber> {
    let mut subscriber = Subscriber::from_config(session.clone(), config).await?;
    let restored = subscriber.restore_from_cache().await?;

    if let Err(e) = subscriber.sync_once().await {
        match restored {
            Some(deployment) if e.is_transport() => {
                warn!(
                    "Could not reach the store, showing cached deployment {}: {}",
                    deployment, e
                );
            }
            _ => return Err(e),
        }
    }

    Ok(subscriber)
}

/// A subscriber holding exactly the store's current deployment, for writers.
///
/// The cache only saves the download when it already holds that deployment;
/// any failure to read the current deployment is returned.
pub async fn load_current(config: &Config, session: &StoreSession) -> Result<Subscriber> {
    let mut subscriber = Subscriber::from_config(session.clone(), config).await?;
    subscriber.restore_from_cache().await?;
    subscriber.sync_once().await?;
    Ok(subscriber)
}
