//! SQLite storage backend for Tandem
//!
//! Implements the three storage traits from `tandem-core` on one SQLite file:
//!
//! - **SqliteStateStore**: durable state records with revision-guarded upserts
//! - **SqliteSnapshotStore**: append-only checkpoint history
//! - **SqliteCache**: the on-device cache used for instant reloads and offline edits
//!
//! All three share a [`SqlitePool`]. Queries run on tokio's blocking pool.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tandem_sqlite::{SqliteConfig, SqlitePool, SqliteStateStore};
//!
//! let pool = SqlitePool::new(SqliteConfig::new("./tandem.db"))?;
//! let states = SqliteStateStore::new(pool.clone());
//! let record = states.load(&key).await?;
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod schema;
pub mod snapshot_store;
pub mod state_store;

mod rows;

// Re-exports
pub use cache::SqliteCache;
pub use config::SqliteConfig;
pub use connection::SqlitePool;
pub use error::{SqliteError, SqliteResult};
pub use snapshot_store::SqliteSnapshotStore;
pub use state_store::SqliteStateStore;
