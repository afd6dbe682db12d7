//! StateStore implementation for SQLite

use crate::connection::SqlitePool;
use crate::rows;
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tandem_core::{DocumentKey, DurableStateRecord, StateStore, StorageResult, UpsertOutcome};
use tracing::debug;

/// SQLite implementation of [`StateStore`]
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Create a store over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self, key: &DocumentKey) -> StorageResult<Option<DurableStateRecord>> {
        let key = key.clone();

        self.pool
            .interact(move |conn| {
                let record = conn
                    .query_row(
                        r#"
                        SELECT state, revision, updated_by, updated_at
                        FROM document_states
                        WHERE document_id = ?1 AND partition = ?2
                        "#,
                        params![key.document_id, key.partition],
                        |row| {
                            Ok(DurableStateRecord {
                                key: key.clone(),
                                state: row.get(0)?,
                                revision: rows::revision(row, 1)?,
                                updated_by: rows::participant(row, 2)?,
                                updated_at: rows::timestamp(row, 3)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(record)
            })
            .await
    }

    async fn upsert(&self, record: DurableStateRecord) -> StorageResult<UpsertOutcome> {
        self.pool
            .interact(move |conn| {
                let tx = conn.transaction()?;

                // The WHERE clause turns the conflict update into a no-op for
                // revisions that are not strictly newer.
                let changed = tx.execute(
                    r#"
                    INSERT INTO document_states (document_id, partition, state, revision, updated_by, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(document_id, partition) DO UPDATE SET
                        state = excluded.state,
                        revision = excluded.revision,
                        updated_by = excluded.updated_by,
                        updated_at = excluded.updated_at
                    WHERE excluded.revision > document_states.revision
                    "#,
                    params![
                        record.key.document_id,
                        record.key.partition,
                        record.state,
                        record.revision as i64,
                        record.updated_by.to_string(),
                        record.updated_at.to_rfc3339(),
                    ],
                )?;

                let outcome = if changed == 1 {
                    UpsertOutcome::Written {
                        revision: record.revision,
                    }
                } else {
                    let current_revision = tx.query_row(
                        "SELECT revision FROM document_states WHERE document_id = ?1 AND partition = ?2",
                        params![record.key.document_id, record.key.partition],
                        |row| rows::revision(row, 0),
                    )?;
                    UpsertOutcome::Stale { current_revision }
                };

                tx.commit()?;
                debug!(document = %record.key, ?outcome, "State upsert");
                Ok(outcome)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tandem_core::ParticipantId;

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
    async fn test_first_open_has_no_record() {
        let store = SqliteStateStore::new(SqlitePool::memory().unwrap());
        let key = DocumentKey::new("agenda-7", "2026");
        assert!(store.load(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_round_trip() {
        let store = SqliteStateStore::new(SqlitePool::memory().unwrap());
        let key = DocumentKey::new("agenda-7", "2026");
        let written = record(&key, 1, b"state-1");

        let outcome = store.upsert(written.clone()).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Written { revision: 1 });

        let loaded = store.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded.state, b"state-1");
        assert_eq!(loaded.revision, 1);
        assert_eq!(loaded.updated_by, written.updated_by);
    }

    #[tokio::test]
    async fn test_stale_revision_is_skipped() {
        let store = SqliteStateStore::new(SqlitePool::memory().unwrap());
        let key = DocumentKey::new("agenda-7", "2026");

        store.upsert(record(&key, 5, b"five")).await.unwrap();

        let outcome = store.upsert(record(&key, 3, b"three")).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Stale { current_revision: 5 });
        let outcome = store.upsert(record(&key, 5, b"also five")).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Stale { current_revision: 5 });

        let loaded = store.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded.state, b"five");

        let outcome = store.upsert(record(&key, 6, b"six")).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Written { revision: 6 });
    }

    #[tokio::test]
    async fn test_partitions_are_separate_documents() {
        let store = SqliteStateStore::new(SqlitePool::memory().unwrap());
        let this_year = DocumentKey::new("agenda-7", "2026");
        let last_year = DocumentKey::new("agenda-7", "2025");

        store.upsert(record(&this_year, 1, b"new")).await.unwrap();
        assert!(store.load(&last_year).await.unwrap().is_none());
    }
}
