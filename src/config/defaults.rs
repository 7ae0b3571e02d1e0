//! Default values for configuration

use std::path::PathBuf;

/// Default author id (replaced by a generated id at init)
pub fn default_author_id() -> String {
    "anonymous".to_string()
}

/// Default store backend
pub fn default_store_backend() -> String {
    std::env::var("SALESBOARD_STORE").unwrap_or_else(|_| "fs".to_string())
}

/// Default root directory for the filesystem store
pub fn default_store_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".salesboard")
        .join("store")
}

/// Default environment variable name for the HTTP store token
pub fn default_store_token_env() -> String {
    "SALESBOARD_STORE_TOKEN".to_string()
}

/// Default per-document size ceiling (1 MiB, the common document-store limit)
pub fn default_max_document_bytes() -> usize {
    1_048_576
}

/// Default escaped chunk payload size, leaving margin under the ceiling for the document envelope
pub fn default_chunk_bytes() -> usize {
    900_000
}

/// Default request timeout in seconds
pub fn default_store_timeout() -> u64 {
    30
}

/// Default product id column
pub fn default_column_product_id() -> String {
    "상품ID".to_string()
}

/// Default product name column
pub fn default_column_name() -> String {
    "상품명".to_string()
}

/// Default payment amount column
pub fn default_column_revenue() -> String {
    "결제금액".to_string()
}

/// Default detail-page view count column
pub fn default_column_views() -> String {
    "상품상세조회수".to_string()
}

/// Default units sold column
pub fn default_column_units_sold() -> String {
    "결제상품수량".to_string()
}

/// Default number of chunk writes in flight during a publish
pub fn default_upload_concurrency() -> usize {
    8
}

/// Default number of fetch attempts when the deployment moves mid-download
pub fn default_max_fetch_attempts() -> u32 {
    3
}

/// Default metadata poll interval in seconds
pub fn default_poll_interval() -> u64 {
    30
}

/// Default: use the local snapshot cache
pub fn default_use_cache() -> bool {
    true
}
