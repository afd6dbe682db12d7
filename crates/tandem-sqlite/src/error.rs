//! Error types for SQLite storage

use thiserror::Error;

/// SQLite storage error type
#[derive(Error, Debug)]
pub enum SqliteError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Schema/migration error
    #[error("Schema error: {0}")]
    Schema(String),

    /// A stored row could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Underlying rusqlite error
    #[error("SQLite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

/// Result type for SQLite operations
pub type SqliteResult<T> = Result<T, SqliteError>;

impl From<SqliteError> for tandem_core::StorageError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Connection(msg) => Self::Unavailable(msg),
            SqliteError::Schema(msg) => Self::Backend(msg),
            SqliteError::Corrupt(msg) => Self::Deserialization(msg),
            SqliteError::Rusqlite(e) => Self::Backend(e.to_string()),
        }
    }
}
