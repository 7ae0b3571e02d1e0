//! Custom error types for salesboard

use thiserror::Error;

/// Main error type for salesboard operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Chunk {index} of deployment {deployment_id} not found")]
    ChunkNotFound { deployment_id: String, index: usize },

    #[error("Publish conflict: expected deployment {expected:?}, found {found:?}")]
    Conflict {
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("Snapshot integrity check failed: {0}")]
    Integrity(String),

    #[error("Document too large: {key} is {size} bytes (limit {limit})")]
    DocumentTooLarge { key: String, size: usize, limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Not initialized: run 'salesboard init' first")]
    NotInitialized,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Store-level failures a caller may retry after backing off
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Http(_)
                | Error::ChunkNotFound { .. }
                | Error::Integrity(_)
                | Error::DocumentTooLarge { .. }
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

/// Result type alias for salesboard
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Transport("timeout".to_string()).is_transport());
        assert!(Error::ChunkNotFound {
            deployment_id: "1".to_string(),
            index: 0
        }
        .is_transport());
        assert!(!Error::Auth("denied".to_string()).is_transport());
        assert!(Error::Auth("denied".to_string()).is_auth());
        assert!(!Error::Parse("bad row".to_string()).is_auth());
    }
}
