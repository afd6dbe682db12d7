//! # Tandem Core
//!
//! Shared vocabulary for the Tandem synchronization engine.
//!
//! ## Key Components
//!
//! - **ReplicatedDocument**: capability trait over a mergeable document state,
//!   with a `yrs` text implementation and a last-writer-wins implementation
//! - **Storage traits**: durable state records, append-only snapshots and the
//!   on-device cache, plus in-memory backends for tests and ephemeral sessions
//! - **Channel contract**: per-document topics carrying update frames and
//!   presence messages
//! - **Clock**: injectable wall clock for record stamps
//!
//! Higher-level crates (`tandem-sync`, `tandem-sqlite`, `tandem-relay`) depend
//! on these abstractions rather than on each other.

pub mod channel;
pub mod clock;
pub mod document;
pub mod presence;
pub mod storage;
pub mod types;

pub use channel::{
    ChannelConnection, ChannelError, ChannelEvent, ChannelMessage, ChannelResult, ChannelSink,
    ChannelTransport, Envelope, PresenceMessage,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{
    DocumentError, DocumentResult, LwwDocument, ReplicatedDocument, TextEdit, YrsDocument,
};
pub use presence::{CursorPosition, PresenceState};
pub use storage::{
    LocalCache, MemoryCache, MemorySnapshotStore, MemoryStateStore, SnapshotStore, StateStore,
    StorageError, StorageResult, UpsertOutcome,
};
pub use types::{
    CacheEntry, DocumentKey, DurableStateRecord, Identity, ParticipantId, SnapshotId,
    SnapshotRecord, UpdateFrame,
};
