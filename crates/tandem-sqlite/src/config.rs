//! SQLite connection settings

use std::path::{Path, PathBuf};
use tandem_config::StorageConfig;

/// Connection settings for [`SqlitePool`](crate::SqlitePool)
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`
    pub path: PathBuf,
    /// Use write-ahead logging
    pub wal_mode: bool,
    /// Enforce foreign keys
    pub foreign_keys: bool,
    /// How long to wait on a locked database
    pub busy_timeout_ms: u64,
    /// Page cache size (negative values are KiB)
    pub cache_size: i64,
}

impl SqliteConfig {
    /// File-backed database with default pragmas
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            wal_mode: true,
            foreign_keys: true,
            busy_timeout_ms: 5_000,
            cache_size: -16_000,
        }
    }

    /// Private in-memory database
    pub fn memory() -> Self {
        Self {
            wal_mode: false,
            ..Self::new(":memory:")
        }
    }
}

impl From<&StorageConfig> for SqliteConfig {
    fn from(storage: &StorageConfig) -> Self {
        Self {
            busy_timeout_ms: storage.busy_timeout_ms,
            ..Self::new(&storage.database_path)
        }
    }
}
