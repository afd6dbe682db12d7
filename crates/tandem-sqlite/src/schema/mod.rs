//! Schema management and migrations

use crate::error::{SqliteError, SqliteResult};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 1;

/// Apply all pending migrations
pub fn apply_migrations(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version = current_version(conn)?;
    debug!(current_version, target_version = SCHEMA_VERSION, "Checking migrations");

    if current_version < SCHEMA_VERSION {
        info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Applying schema migrations"
        );
        apply_migration_v1(conn)?;
    }

    Ok(())
}

fn current_version(conn: &Connection) -> SqliteResult<i32> {
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();

    Ok(version.unwrap_or(0))
}

fn record_migration(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version) VALUES (?)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: state records, snapshots and the local cache
fn apply_migration_v1(conn: &Connection) -> SqliteResult<()> {
    debug!("Applying migration v1: initial sync schema");

    conn.execute_batch(SCHEMA_V1)
        .map_err(|e| SqliteError::Schema(format!("Failed to apply v1 schema: {}", e)))?;

    record_migration(conn, 1)?;
    info!("Migration v1 applied successfully");
    Ok(())
}

const SCHEMA_V1: &str = r#"
-- ============================================================================
-- TABLE: document_states
-- ============================================================================
-- One fully merged state per document; revision only ever increases

CREATE TABLE IF NOT EXISTS document_states (
    document_id TEXT NOT NULL,
    partition TEXT NOT NULL,
    state BLOB NOT NULL,
    revision INTEGER NOT NULL CHECK (revision >= 0),
    updated_by TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (document_id, partition)
);

-- ============================================================================
-- TABLE: snapshots
-- ============================================================================
-- Append-only checkpoints; seq gives insertion order

CREATE TABLE IF NOT EXISTS snapshots (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    document_id TEXT NOT NULL,
    partition TEXT NOT NULL,
    payload BLOB NOT NULL,
    label TEXT NOT NULL,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_document ON snapshots(document_id, partition, seq);

-- ============================================================================
-- TABLE: cache_entries
-- ============================================================================
-- Last known-good local state per document on this device

CREATE TABLE IF NOT EXISTS cache_entries (
    document_id TEXT NOT NULL,
    partition TEXT NOT NULL,
    state BLOB NOT NULL,
    locally_modified INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (document_id, partition)
);
"#;
