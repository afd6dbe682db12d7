//! Storage configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// On-device storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding state records, snapshots and the local cache
    pub database_path: PathBuf,
    /// How long SQLite waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./tandem.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl StorageConfig {
    #[allow(missing_docs)]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
