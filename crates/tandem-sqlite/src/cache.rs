//! LocalCache implementation for SQLite

use crate::connection::SqlitePool;
use crate::rows;
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tandem_core::{CacheEntry, DocumentKey, LocalCache, StorageResult};

/// SQLite implementation of [`LocalCache`]
///
/// Survives process restarts, which is what makes a reload after a crash
/// show the last local state before the network answers.
#[derive(Debug, Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Create a cache over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocalCache for SqliteCache {
    async fn load(&self, key: &DocumentKey) -> StorageResult<Option<CacheEntry>> {
        let key = key.clone();

        self.pool
            .interact(move |conn| {
                let entry = conn
                    .query_row(
                        r#"
                        SELECT state, locally_modified, updated_at
                        FROM cache_entries
                        WHERE document_id = ?1 AND partition = ?2
                        "#,
                        params![key.document_id, key.partition],
                        |row| {
                            Ok(CacheEntry {
                                key: key.clone(),
                                state: row.get(0)?,
                                locally_modified: row.get(1)?,
                                updated_at: rows::timestamp(row, 2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(entry)
            })
            .await
    }

    async fn store(&self, entry: CacheEntry) -> StorageResult<()> {
        self.pool
            .interact(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO cache_entries (document_id, partition, state, locally_modified, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(document_id, partition) DO UPDATE SET
                        state = excluded.state,
                        locally_modified = excluded.locally_modified,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        entry.key.document_id,
                        entry.key.partition,
                        entry.state,
                        entry.locally_modified,
                        entry.updated_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_cache_entry_replaced_in_place() {
        let cache = SqliteCache::new(SqlitePool::memory().unwrap());
        let key = DocumentKey::new("notes-1", "2026");

        cache
            .store(CacheEntry {
                key: key.clone(),
                state: b"draft".to_vec(),
                locally_modified: true,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        cache
            .store(CacheEntry {
                key: key.clone(),
                state: b"draft text".to_vec(),
                locally_modified: false,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let entry = cache.load(&key).await.unwrap().unwrap();
        assert_eq!(entry.state, b"draft text");
        assert!(!entry.locally_modified);
    }
}
