//! Local snapshot cache using SQLite
//!
//! Remembers the last applied deployment and its serialized payload so a
//! reader can skip redundant downloads and render before the first network
//! round-trip. Nothing here is required for correctness: a missing or empty
//! cache only costs a download.
//!
//! Also keeps a small log of publishes made from this machine.

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::Result;
use crate::store::DeploymentId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use tracing::{debug, info};

/// The cached copy of one applied deployment
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub deployment_id: String,
    pub payload: String,
    pub published_at: String,
    pub cached_at: String,
}

impl CachedSnapshot {
    pub fn new(deployment_id: DeploymentId, payload: String, published_at: String) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            payload,
            published_at,
            cached_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn deployment(&self) -> Result<DeploymentId> {
        self.deployment_id.parse()
    }
}

/// One publish made from this machine
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PublishRecord {
    pub deployment_id: String,
    pub published_at: String,
    pub chunk_count: i64,
    pub payload_bytes: i64,
    pub files_merged: i64,
    pub rows_merged: i64,
}

/// Snapshot cache handle
#[derive(Clone)]
pub struct SnapshotCache {
    pool: SqlitePool,
}

impl SnapshotCache {
    /// Connect to the cache database named in configuration
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.cache_file).await
    }

    /// Open (creating if missing) a cache database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to snapshot cache at {:?}", path);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        let cache = Self { pool };
        cache.init_schema().await?;
        Ok(cache)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// The cached snapshot, if any
    pub async fn load(&self) -> Result<Option<CachedSnapshot>> {
        let snapshot = sqlx::query_as::<_, CachedSnapshot>(
            "SELECT deployment_id, payload, published_at, cached_at FROM snapshot WHERE slot = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(snapshot)
    }

    /// Deployment id of the cached snapshot without loading the payload
    pub async fn cached_deployment(&self) -> Result<Option<DeploymentId>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT deployment_id FROM snapshot WHERE slot = 1")
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(id,)| id.parse()).transpose()
    }

    /// Replace the cached snapshot
    pub async fn store(&self, snapshot: &CachedSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshot (slot, deployment_id, payload, published_at, cached_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(slot) DO UPDATE SET
                deployment_id = excluded.deployment_id,
                payload = excluded.payload,
                published_at = excluded.published_at,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(&snapshot.deployment_id)
        .bind(&snapshot.payload)
        .bind(&snapshot.published_at)
        .bind(&snapshot.cached_at)
        .execute(&self.pool)
        .await?;

        debug!(
            deployment = %snapshot.deployment_id,
            bytes = snapshot.payload.len(),
            "Cached snapshot"
        );
        Ok(())
    }

    /// Forget the cached snapshot
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM snapshot").execute(&self.pool).await?;
        info!("Cleared snapshot cache");
        Ok(())
    }

    // ===== Publish Log =====

    pub async fn record_publish(&self, record: &PublishRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO publish_log
                (deployment_id, published_at, chunk_count, payload_bytes, files_merged, rows_merged)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.deployment_id)
        .bind(&record.published_at)
        .bind(record.chunk_count)
        .bind(record.payload_bytes)
        .bind(record.files_merged)
        .bind(record.rows_merged)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent publishes first
    pub async fn recent_publishes(&self, limit: usize) -> Result<Vec<PublishRecord>> {
        let records = sqlx::query_as::<_, PublishRecord>(
            r#"
            SELECT deployment_id, published_at, chunk_count, payload_bytes, files_merged, rows_merged
            FROM publish_log
            ORDER BY published_at DESC, deployment_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_test_cache() -> (SnapshotCache, TempDir) {
        let tmp = TempDir::new().unwrap();
        let cache = SnapshotCache::open(&tmp.path().join("cache.db"))
            .await
            .unwrap();
        (cache, tmp)
    }

    #[tokio::test]
    async fn test_snapshot_replace() {
        let (cache, _tmp) = setup_test_cache().await;
        assert!(cache.load().await.unwrap().is_none());
        assert!(cache.cached_deployment().await.unwrap().is_none());

        let first = CachedSnapshot::new(DeploymentId::new(100), "{}".to_string(), "t0".to_string());
        cache.store(&first).await.unwrap();
        assert_eq!(cache.load().await.unwrap(), Some(first));

        let second = CachedSnapshot::new(DeploymentId::new(101), "[]".to_string(), "t1".to_string());
        cache.store(&second).await.unwrap();
        assert_eq!(
            cache.cached_deployment().await.unwrap(),
            Some(DeploymentId::new(101))
        );
        assert_eq!(cache.load().await.unwrap().unwrap().payload, "[]");

        cache.clear().await.unwrap();
        assert!(cache.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("cache.db");

        {
            let cache = SnapshotCache::open(&path).await.unwrap();
            let snapshot =
                CachedSnapshot::new(DeploymentId::new(7), "payload".to_string(), "t".to_string());
            cache.store(&snapshot).await.unwrap();
        }

        let cache = SnapshotCache::open(&path).await.unwrap();
        assert_eq!(
            cache.cached_deployment().await.unwrap(),
            Some(DeploymentId::new(7))
        );
    }

    #[tokio::test]
    async fn test_publish_log_order() {
        let (cache, _tmp) = setup_test_cache().await;

        for (id, at) in [("1", "2024-01-01T00:00:00Z"), ("2", "2024-01-02T00:00:00Z")] {
            cache
                .record_publish(&PublishRecord {
                    deployment_id: id.to_string(),
                    published_at: at.to_string(),
                    chunk_count: 1,
                    payload_bytes: 10,
                    files_merged: 1,
                    rows_merged: 3,
                })
                .await
                .unwrap();
        }

        let recent = cache.recent_publishes(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].deployment_id, "2");
    }
}
