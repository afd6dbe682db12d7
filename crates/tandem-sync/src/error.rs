use tandem_core::{ChannelError, DocumentError, SnapshotId, StorageError};
use thiserror::Error;

/// Errors surfaced by a document handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The provider task for this document has stopped
    #[error("Document is detached")]
    Detached,

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    /// The session hit an unrecoverable channel error and must be reattached
    #[error("Session failed: {0}")]
    Fatal(String),

    /// Every flush attempt failed
    #[error("Save failed: {0}")]
    SaveFailed(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
