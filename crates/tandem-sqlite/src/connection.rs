//! SQLite connection management
//!
//! Uses a simple Arc<Mutex<Connection>> pattern; SQLite has a single writer,
//! so a pool of connections would only contend on the file lock.

use crate::config::SqliteConfig;
use crate::error::{SqliteError, SqliteResult};
use crate::schema;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;
use tandem_core::{StorageError, StorageResult};
use tracing::{debug, info};

/// Thread-safe SQLite connection wrapper
#[derive(Clone)]
pub struct SqlitePool {
    conn: Arc<Mutex<Connection>>,
    config: SqliteConfig,
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("path", &self.config.path)
            .finish()
    }
}

impl SqlitePool {
    /// Open (or create) the database and apply migrations
    pub fn new(config: SqliteConfig) -> SqliteResult<Self> {
        info!(path = ?config.path, "Opening SQLite database");

        let conn = if config.path.to_str() == Some(":memory:") {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        SqliteError::Connection(format!("Failed to create directory: {}", e))
                    })?;
                }
            }
            Connection::open(&config.path)?
        };

        let pool = Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        };
        pool.initialize()?;

        Ok(pool)
    }

    /// Create an in-memory pool for testing
    pub fn memory() -> SqliteResult<Self> {
        Self::new(SqliteConfig::memory())
    }

    /// Execute a closure with the connection
    pub fn with_connection<F, T>(&self, f: F) -> SqliteResult<T>
    where
        F: FnOnce(&Connection) -> SqliteResult<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a closure with mutable access to the connection
    pub fn with_connection_mut<F, T>(&self, f: F) -> SqliteResult<T>
    where
        F: FnOnce(&mut Connection) -> SqliteResult<T>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    /// Run a closure on the blocking pool and surface its result as a storage
    /// result.
    pub(crate) async fn interact<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> SqliteResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.with_connection_mut(f))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .map_err(Into::into)
    }

    fn initialize(&self) -> SqliteResult<()> {
        self.with_connection(|conn| {
            self.configure_pragmas(conn)?;
            schema::apply_migrations(conn)?;

            info!("SQLite database initialized");
            Ok(())
        })
    }

    fn configure_pragmas(&self, conn: &Connection) -> SqliteResult<()> {
        debug!("Configuring SQLite pragmas");

        if self.config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        }

        if self.config.foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }

        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};",
            self.config.busy_timeout_ms
        ))?;
        conn.execute_batch(&format!("PRAGMA cache_size = {};", self.config.cache_size))?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;

        Ok(())
    }
}
