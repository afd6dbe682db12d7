//! In-memory storage backends.
//!
//! Used for tests and for ephemeral sessions that never touch disk. Each
//! backend can be told to fail, so retry paths can be exercised without a
//! real outage.

use super::{LocalCache, SnapshotStore, StateStore, StorageError, StorageResult, UpsertOutcome};
use crate::types::{CacheEntry, DocumentKey, DurableStateRecord, SnapshotId, SnapshotRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// Consume one pending injected failure, if any.
fn take_failure(pending: &AtomicUsize) -> bool {
    pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory [`StateStore`].
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<DocumentKey, DurableStateRecord>>,
    offline: AtomicBool,
    fail_writes: AtomicUsize,
    attempts: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` upserts fail with a backend error.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// While offline every call fails with [`StorageError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Upserts attempted, including failed and stale ones.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Upserts that actually wrote a record.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current record, bypassing failure injection.
    pub fn get(&self, key: &DocumentKey) -> Option<DurableStateRecord> {
        self.records.lock().get(key).cloned()
    }

    /// Overwrite a record unconditionally, as another writer would.
    pub fn put(&self, record: DurableStateRecord) {
        self.records.lock().insert(record.key.clone(), record);
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("state store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &DocumentKey) -> StorageResult<Option<DurableStateRecord>> {
        self.check_online()?;
        Ok(self.records.lock().get(key).cloned())
    }

    async fn upsert(&self, record: DurableStateRecord) -> StorageResult<UpsertOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if take_failure(&self.fail_writes) {
            debug!(document = %record.key, "Injected state write failure");
            return Err(StorageError::backend("injected write failure"));
        }

        let mut records = self.records.lock();
        if let Some(current) = records.get(&record.key) {
            if record.revision <= current.revision {
                debug!(
                    document = %record.key,
                    revision = record.revision,
                    current = current.revision,
                    "Rejecting stale upsert"
                );
                return Ok(UpsertOutcome::Stale {
                    current_revision: current.revision,
                });
            }
        }

        let revision = record.revision;
        records.insert(record.key.clone(), record);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(UpsertOutcome::Written { revision })
    }
}

/// In-memory [`SnapshotStore`].
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    records: Mutex<Vec<SnapshotRecord>>,
    fail_appends: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` appends fail with a backend error.
    pub fn fail_next_appends(&self, n: usize) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn append(&self, record: SnapshotRecord) -> StorageResult<()> {
        if take_failure(&self.fail_appends) {
            debug!(document = %record.key, "Injected snapshot append failure");
            return Err(StorageError::backend("injected append failure"));
        }
        self.records.lock().push(record);
        Ok(())
    }

    async fn list(&self, key: &DocumentKey) -> StorageResult<Vec<SnapshotRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| &r.key == key)
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        key: &DocumentKey,
        id: SnapshotId,
    ) -> StorageResult<Option<SnapshotRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .find(|r| &r.key == key && r.id == id)
            .cloned())
    }
}

/// In-memory [`LocalCache`].
///
/// Share one instance (behind an `Arc`) between provider lifetimes to model a
/// tab reload on the same device.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<DocumentKey, CacheEntry>>,
    fail_stores: AtomicUsize,
    stores: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` stores fail with an I/O error.
    pub fn fail_next_stores(&self, n: usize) {
        self.fail_stores.store(n, Ordering::SeqCst);
    }

    /// Successful stores so far.
    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &DocumentKey) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn load(&self, key: &DocumentKey) -> StorageResult<Option<CacheEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn store(&self, entry: CacheEntry) -> StorageResult<()> {
        if take_failure(&self.fail_stores) {
            debug!(document = %entry.key, "Injected cache store failure");
            return Err(StorageError::Io("injected cache failure".into()));
        }
        self.entries.lock().insert(entry.key.clone(), entry);
        self.stores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticipantId;
    use chrono::Utc;
    use tracing_test::traced_test;

    fn record(key: &DocumentKey, revision: u64, state: &[u8]) -> DurableStateRecord {
        DurableStateRecord {
            key: key.clone(),
            state: state.to_vec(),
            revision,
            updated_by: ParticipantId::new(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_missing_record_loads_as_none() {
        let store = MemoryStateStore::new();
        let key = DocumentKey::new("notes-1", "2026");
        assert_eq!(store.load(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_revision_never_overwrites() {
        let store = MemoryStateStore::new();
        let key = DocumentKey::new("notes-1", "2026");

        let outcome = store.upsert(record(&key, 2, b"newer")).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Written { revision: 2 });

        let outcome = store.upsert(record(&key, 1, b"older")).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Stale { current_revision: 2 });

        let outcome = store.upsert(record(&key, 2, b"same")).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Stale { current_revision: 2 });

        assert_eq!(store.get(&key).unwrap().state, b"newer");
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.attempt_count(), 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStateStore::new();
        let key = DocumentKey::new("notes-1", "2026");
        store.fail_next_writes(2);

        assert!(store.upsert(record(&key, 1, b"a")).await.is_err());
        assert!(store.upsert(record(&key, 1, b"a")).await.is_err());
        assert!(store.upsert(record(&key, 1, b"a")).await.is_ok());
        assert!(logs_contain("Injected state write failure"));

        store.upsert(record(&key, 1, b"b")).await.unwrap();
        assert!(logs_contain("Rejecting stale upsert"));
    }

    #[tokio::test]
    async fn test_offline_store_rejects_everything() {
        let store = MemoryStateStore::new();
        let key = DocumentKey::new("notes-1", "2026");
        store.set_offline(true);

        assert!(matches!(
            store.load(&key).await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.upsert(record(&key, 1, b"a")).await.is_err());

        store.set_offline(false);
        assert!(store.upsert(record(&key, 1, b"a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_snapshots_list_oldest_first_per_document() {
        let store = MemorySnapshotStore::new();
        let key = DocumentKey::new("notes-1", "2026");
        let other = DocumentKey::new("notes-2", "2026");

        for (k, label) in [(&key, "first"), (&other, "elsewhere"), (&key, "second")] {
            store
                .append(SnapshotRecord {
                    id: SnapshotId::new(),
                    key: k.clone(),
                    payload: label.as_bytes().to_vec(),
                    label: label.to_string(),
                    created_at: Utc::now(),
                    created_by: ParticipantId::new(),
                })
                .await
                .unwrap();
        }

        let labels: Vec<_> = store
            .list(&key)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.label)
            .collect();
        assert_eq!(labels, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_cache_replaces_entry() {
        let cache = MemoryCache::new();
        let key = DocumentKey::new("notes-1", "2026");

        for (state, modified) in [(b"one", true), (b"two", false)] {
            cache
                .store(CacheEntry {
                    key: key.clone(),
                    state: state.to_vec(),
                    locally_modified: modified,
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let entry = cache.load(&key).await.unwrap().unwrap();
        assert_eq!(entry.state, b"two");
        assert!(!entry.locally_modified);
        assert_eq!(cache.store_count(), 2);
    }
}
