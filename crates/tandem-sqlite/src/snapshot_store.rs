//! SnapshotStore implementation for SQLite

use crate::connection::SqlitePool;
use crate::error::SqliteError;
use crate::rows;
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tandem_core::{DocumentKey, SnapshotId, SnapshotRecord, SnapshotStore, StorageResult};
use uuid::Uuid;

/// SQLite implementation of [`SnapshotStore`]
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    /// Create a store over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_snapshot(key: &DocumentKey, row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(SnapshotRecord {
        id: SnapshotId::from_uuid(id),
        key: key.clone(),
        payload: row.get(1)?,
        label: row.get(2)?,
        created_at: rows::timestamp(row, 3)?,
        created_by: rows::participant(row, 4)?,
    })
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn append(&self, record: SnapshotRecord) -> StorageResult<()> {
        self.pool
            .interact(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO snapshots (id, document_id, partition, payload, label, created_at, created_by)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        record.id.to_string(),
                        record.key.document_id,
                        record.key.partition,
                        record.payload,
                        record.label,
                        record.created_at.to_rfc3339(),
                        record.created_by.to_string(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn list(&self, key: &DocumentKey) -> StorageResult<Vec<SnapshotRecord>> {
        let key = key.clone();

        self.pool
            .interact(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, payload, label, created_at, created_by
                    FROM snapshots
                    WHERE document_id = ?1 AND partition = ?2
                    ORDER BY seq ASC
                    "#,
                )?;
                let snapshots = stmt
                    .query_map(params![key.document_id, key.partition], |row| {
                        row_to_snapshot(&key, row)
                    })?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(SqliteError::from)?;
                Ok(snapshots)
            })
            .await
    }

    async fn get(
        &self,
        key: &DocumentKey,
        id: SnapshotId,
    ) -> StorageResult<Option<SnapshotRecord>> {
        let key = key.clone();

        self.pool
            .interact(move |conn| {
                let snapshot = conn
                    .query_row(
                        r#"
                        SELECT id, payload, label, created_at, created_by
                        FROM snapshots
                        WHERE document_id = ?1 AND partition = ?2 AND id = ?3
                        "#,
                        params![key.document_id, key.partition, id.to_string()],
                        |row| row_to_snapshot(&key, row),
                    )
                    .optional()?;
                Ok(snapshot)
            })
            .await
    }
}
