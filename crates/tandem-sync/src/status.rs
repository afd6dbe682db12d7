//! Caller-visible status and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_core::{ParticipantId, SnapshotId, UpdateFrame};

/// Lifecycle of one attached document.
///
/// ```text
/// Connecting -> Hydrating -> Synced <-> Reconnecting
///      \____________\__________\____________\______-> Error (terminal)
/// ```
///
/// Every state can move to `Detached`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderState {
    /// Subscribing to the channel for the first time
    Connecting,
    /// Subscribed; loading the durable record
    Hydrating,
    Synced,
    /// Lost the channel after having been synced
    Reconnecting,
    /// Unrecoverable channel failure; only a new attach recovers
    Error,
    Detached,
}

impl ProviderState {
    pub fn can_transition_to(&self, next: ProviderState) -> bool {
        use ProviderState::*;

        match (*self, next) {
            (Detached, _) => false,
            (_, Detached) => true,
            (Error, _) => false,
            (_, Error) => true,
            (Connecting, Hydrating)
            | (Hydrating, Synced)
            | (Hydrating, Connecting)
            | (Synced, Reconnecting)
            | (Reconnecting, Synced) => true,
            _ => false,
        }
    }

    /// Status shown to the host UI; `None` once detached.
    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        match self {
            ProviderState::Connecting | ProviderState::Hydrating => {
                Some(ConnectionStatus::Connecting)
            }
            ProviderState::Synced => Some(ConnectionStatus::Synced),
            ProviderState::Reconnecting => Some(ConnectionStatus::Reconnecting),
            ProviderState::Error => Some(ConnectionStatus::Error),
            ProviderState::Detached => None,
        }
    }
}

/// Connection indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Synced,
    Reconnecting,
    Error,
}

/// Save indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
}

/// Save indicator with the detail a status badge needs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SaveState {
    pub status: SaveStatus,
    /// Last durable revision this replica knows of.
    pub revision: u64,
    /// Most recent flush error, kept while retrying.
    pub last_error: Option<String>,
    pub saved_at: Option<DateTime<Utc>>,
}

/// Outcome of waiting for the initial hydration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

/// Things that happen to an attached document, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// The cached local state was merged before hydration.
    CacheRestored { locally_modified: bool },
    /// Initial hydration finished. Emitted exactly once per attach.
    Ready { revision: u64 },
    StateChanged(ProviderState),
    /// A peer's frame was merged; the editor should re-render.
    RemoteUpdate {
        origin: ParticipantId,
        frame: UpdateFrame,
    },
    /// A newer durable record was merged (reconnect or stale flush).
    StateMerged { revision: u64 },
    /// A frame could not be merged and was dropped.
    FrameDropped {
        origin: ParticipantId,
        reason: String,
    },
    Flushed { revision: u64 },
    /// One flush attempt failed; more may follow.
    FlushFailed { attempt: u32, error: String },
    /// Every attempt failed; the next edit or manual save tries again.
    SaveFailed { error: String },
    SnapshotCreated { id: SnapshotId, label: String },
    SnapshotFailed { label: String, error: String },
}

/// Counters for one attached document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub local_updates: u64,
    pub remote_updates: u64,
    pub frames_dropped: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub stale_rebases: u64,
    pub snapshots: u64,
    pub reconnects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProviderState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Connecting.can_transition_to(Hydrating));
        assert!(Hydrating.can_transition_to(Synced));
        assert!(Synced.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Synced));
    }

    #[test]
    fn test_error_is_terminal() {
        for state in [Connecting, Hydrating, Synced, Reconnecting] {
            assert!(state.can_transition_to(Error));
        }
        for next in [Connecting, Hydrating, Synced, Reconnecting] {
            assert!(!Error.can_transition_to(next));
        }
        assert!(Error.can_transition_to(Detached));
        assert!(!Detached.can_transition_to(Connecting));
    }

    #[test]
    fn test_no_shortcuts() {
        assert!(!Connecting.can_transition_to(Synced));
        assert!(!Synced.can_transition_to(Hydrating));
        assert!(!Reconnecting.can_transition_to(Hydrating));
    }

    #[test]
    fn test_status_mapping_and_wire_names() {
        assert_eq!(Hydrating.connection_status(), Some(ConnectionStatus::Connecting));
        assert_eq!(Detached.connection_status(), None);
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
        assert_eq!(serde_json::to_string(&SaveStatus::Saved).unwrap(), "\"saved\"");
    }
}
