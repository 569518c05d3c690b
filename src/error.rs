//! Error types for skyfollow
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in skyfollow
#[derive(Debug, Error)]
pub enum FollowError {
    /// Login failed or session rejected
    #[error("Auth error: {0}")]
    Auth(String),

    /// Remote API returned a non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure talking to the API
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// A handle was pushed while already present in the queue
    #[error("Handle already queued: {0}")]
    DuplicateHandle(String),

    /// A handle was expected in the queue but is not there
    #[error("Handle not queued: {0}")]
    NotQueued(String),

    /// Invalid or missing configuration
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl FollowError {
    /// Whether a dispatch that failed with this error may be retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            FollowError::Api { status, .. } => *status == 429 || *status >= 500,
            FollowError::Network(_) => true,
            FollowError::Storage(_) => true,
            FollowError::Sqlite(_) => true,
            FollowError::Io(_) => true,
            FollowError::Auth(_) => false,
            FollowError::DuplicateHandle(_) => false,
            FollowError::NotQueued(_) => false,
            FollowError::Config(_) => false,
            FollowError::Json(_) => false,
        }
    }
}

/// Result type alias for skyfollow operations
pub type Result<T> = std::result::Result<T, FollowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = FollowError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "API error 502: bad gateway");
    }

    #[test]
    fn test_duplicate_handle_error() {
        let err = FollowError::DuplicateHandle("alice.bsky.social".to_string());
        assert_eq!(err.to_string(), "Handle already queued: alice.bsky.social");
    }

    #[test]
    fn test_storage_error() {
        let err = FollowError::Storage("database is locked".to_string());
        assert_eq!(err.to_string(), "Storage error: database is locked");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(
            FollowError::Api {
                status: 500,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            FollowError::Api {
                status: 429,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !FollowError::Api {
                status: 401,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(FollowError::Storage("x".into()).is_retryable());
        assert!(!FollowError::Auth("expired".into()).is_retryable());
        assert!(!FollowError::DuplicateHandle("a".into()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FollowError = io_err.into();
        assert!(matches!(err, FollowError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: FollowError = json_err.into();
        assert!(matches!(err, FollowError::Json(_)));
    }
}
