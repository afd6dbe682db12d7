//! Everything written through the stores survives closing and reopening the
//! database file.

use chrono::Utc;
use tandem_core::{
    CacheEntry, DocumentKey, DurableStateRecord, LocalCache, ParticipantId, SnapshotId,
    SnapshotRecord, SnapshotStore, StateStore, UpsertOutcome,
};
use tandem_sqlite::{SqliteCache, SqliteConfig, SqlitePool, SqliteSnapshotStore, SqliteStateStore};
use tempfile::TempDir;

#[tokio::test]
async fn stores_survive_reopen() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("tandem.db");
    let key = DocumentKey::new("meeting-42", "2026");
    let author = ParticipantId::new();

    {
        let pool = SqlitePool::new(SqliteConfig::new(&path)).expect("Failed to open database");

        SqliteCache::new(pool.clone())
            .store(CacheEntry {
                key: key.clone(),
                state: b"draft text".to_vec(),
                locally_modified: true,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let outcome = SqliteStateStore::new(pool.clone())
            .upsert(DurableStateRecord {
                key: key.clone(),
                state: b"merged".to_vec(),
                revision: 3,
                updated_by: author,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(outcome.is_written());

        SqliteSnapshotStore::new(pool)
            .append(SnapshotRecord {
                id: SnapshotId::new(),
                key: key.clone(),
                payload: b"merged".to_vec(),
                label: "manual save".to_string(),
                created_at: Utc::now(),
                created_by: author,
            })
            .await
            .unwrap();
    }

    let pool = SqlitePool::new(SqliteConfig::new(&path)).expect("Failed to reopen database");

    let entry = SqliteCache::new(pool.clone()).load(&key).await.unwrap().unwrap();
    assert_eq!(entry.state, b"draft text");
    assert!(entry.locally_modified);

    let states = SqliteStateStore::new(pool.clone());
    let record = states.load(&key).await.unwrap().unwrap();
    assert_eq!(record.revision, 3);
    assert_eq!(record.updated_by, author);

    let stale = states
        .upsert(DurableStateRecord {
            revision: 2,
            state: b"older".to_vec(),
            ..record
        })
        .await
        .unwrap();
    assert_eq!(stale, UpsertOutcome::Stale { current_revision: 3 });

    let history = SqliteSnapshotStore::new(pool).list(&key).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].label, "manual save");
}

#[tokio::test]
async fn storage_config_maps_to_sqlite_config() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let storage = tandem_config::StorageConfig {
        database_path: dir.path().join("from-config.db"),
        busy_timeout_ms: 1_234,
    };

    let config = SqliteConfig::from(&storage);
    assert_eq!(config.busy_timeout_ms, 1_234);

    let pool = SqlitePool::new(config).expect("Failed to open database");
    pool.with_connection(|conn| {
        let timeout: i64 = conn.query_row("PRAGMA busy_timeout;", [], |row| row.get(0))?;
        assert_eq!(timeout, 1_234);
        Ok(())
    })
    .unwrap();
}
