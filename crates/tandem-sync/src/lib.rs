//! # Tandem Sync
//!
//! Keeps a replicated document consistent across participants, survives
//! disconnects and persists durable history.
//!
//! ## Key Components
//!
//! - **SyncProvider**: per-document actor bridging the document, its sync
//!   channel, the durable state record and the local cache
//! - **SnapshotManager**: automatic and manual checkpoints
//! - **PresenceTracker**: ephemeral who-is-online, cursors and typing
//! - **Transports**: [`MemoryHub`] for in-process topics, [`WsTransport`] for
//!   `tandem-relay`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tandem_config::SyncConfig;
//! use tandem_core::{
//!     DocumentKey, MemoryCache, MemorySnapshotStore, MemoryStateStore, ParticipantId,
//!     TextEdit, YrsDocument,
//! };
//! use tandem_sync::{MemoryHub, SyncProvider, SyncServices};
//!
//! # async fn demo() -> tandem_sync::SyncResult<()> {
//! let services = SyncServices::new(
//!     Arc::new(MemoryStateStore::new()),
//!     Arc::new(MemorySnapshotStore::new()),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(MemoryHub::new()),
//! );
//! let provider = SyncProvider::new(ParticipantId::new(), services, SyncConfig::default());
//!
//! let doc = provider.attach(
//!     DocumentKey::new("meeting-42", "2026"),
//!     Box::new(YrsDocument::new()),
//! );
//! doc.ready().await?;
//! doc.apply_local_edit(TextEdit::insert(0, "hello"))?;
//! doc.flush().await?;
//! doc.detach().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod error;
pub mod presence;
pub mod provider;
pub mod snapshot;
pub mod status;
pub mod transport;

pub use backoff::Backoff;
pub use error::{SyncError, SyncResult};
pub use presence::{PresenceEntry, PresenceHandle, PresenceTracker};
pub use provider::{DocumentHandle, SyncProvider, SyncServices};
pub use snapshot::{SnapshotManager, MANUAL_LABEL};
pub use status::{
    ConnectionStatus, DocumentEvent, ProviderState, ProviderStats, SaveState, SaveStatus,
};
pub use transport::{MemoryHub, RelayFrame, WsTransport};
