//! Storage error types.

use thiserror::Error;

/// Error type shared by every storage backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Snapshot not found: {id}")]
    SnapshotNotFound { id: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Create a generic backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a deserialization error
    pub fn deserialization<S: Into<String>>(msg: S) -> Self {
        Self::Deserialization(msg.into())
    }

    /// Check if the error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_) | Self::Backend(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(StorageError::Unavailable("offline".to_string()).is_retryable());
        assert!(StorageError::backend("locked").is_retryable());
        assert!(!StorageError::deserialization("bad row").is_retryable());
        assert!(!StorageError::SnapshotNotFound {
            id: "abc".to_string()
        }
        .is_retryable());
    }
}
