//! SQLite schema definition

/// SQL schema for the local snapshot cache
pub const SCHEMA_SQL: &str = r#"
-- Snapshot: the last applied deployment, at most one row
CREATE TABLE IF NOT EXISTS snapshot (
    slot INTEGER PRIMARY KEY CHECK (slot = 1),
    deployment_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    published_at TEXT NOT NULL,
    cached_at TEXT NOT NULL
);

-- Publishes made from this machine
CREATE TABLE IF NOT EXISTS publish_log (
    deployment_id TEXT PRIMARY KEY,
    published_at TEXT NOT NULL,
    chunk_count INTEGER NOT NULL,
    payload_bytes INTEGER NOT NULL,
    files_merged INTEGER NOT NULL DEFAULT 0,
    rows_merged INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_publish_log_time ON publish_log(published_at);
"#;
