//! Storage abstractions.
//!
//! Three stores back a synchronized document:
//!
//! - [`StateStore`] - the authoritative merged state, one record per document,
//!   guarded by a strictly increasing revision
//! - [`SnapshotStore`] - append-only checkpoints
//! - [`LocalCache`] - the on-device copy used for instant reloads and offline
//!   editing; never authoritative
//!
//! In-memory implementations live in [`memory`]; the SQLite implementations
//! live in the `tandem-sqlite` crate.

mod error;
pub mod memory;

pub use error::{StorageError, StorageResult};
pub use memory::{MemoryCache, MemorySnapshotStore, MemoryStateStore};

use crate::types::{CacheEntry, DocumentKey, DurableStateRecord, SnapshotId, SnapshotRecord};
use async_trait::async_trait;

/// Result of a conditional write to the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The record was written at `revision`.
    Written { revision: u64 },
    /// A record with an equal or higher revision already exists; nothing was
    /// written.
    Stale { current_revision: u64 },
}

impl UpsertOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, UpsertOutcome::Written { .. })
    }
}

/// Durable state records, one per document.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the record for `key`, or `None` on first open.
    async fn load(&self, key: &DocumentKey) -> StorageResult<Option<DurableStateRecord>>;

    /// Write `record` only if its revision is strictly greater than the stored
    /// one. Inserting a missing row always succeeds.
    async fn upsert(&self, record: DurableStateRecord) -> StorageResult<UpsertOutcome>;
}

/// Append-only snapshot history.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn append(&self, record: SnapshotRecord) -> StorageResult<()>;

    /// All snapshots of a document, oldest first.
    async fn list(&self, key: &DocumentKey) -> StorageResult<Vec<SnapshotRecord>>;

    async fn get(&self, key: &DocumentKey, id: SnapshotId)
        -> StorageResult<Option<SnapshotRecord>>;
}

/// On-device cache of the last known-good document state.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn load(&self, key: &DocumentKey) -> StorageResult<Option<CacheEntry>>;

    /// Replace the entry for `entry.key`.
    async fn store(&self, entry: CacheEntry) -> StorageResult<()>;
}
