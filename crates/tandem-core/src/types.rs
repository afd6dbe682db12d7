//! Domain types shared across the engine.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifies one shared document.
///
/// The external id (meeting-notes id, agenda-block id, ...) is scoped by a
/// partition key such as the year, so the same id may exist in several
/// partitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    pub document_id: String,
    pub partition: String,
}

impl DocumentKey {
    pub fn new(document_id: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            partition: partition.into(),
        }
    }

    /// Name of the realtime topic carrying this document's frames.
    pub fn topic(&self) -> String {
        format!("{}/{}", self.partition, self.document_id)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.document_id)
    }
}

/// Unique identifier for one connected participant (one editing session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    /// Create a new random participant ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ParticipantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Display identity of a participant, as shown by presence indicators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub participant_id: ParticipantId,
    pub display_name: String,
    /// CSS-style color used for the participant's cursor.
    pub color: String,
}

impl Identity {
    pub fn new(
        participant_id: ParticipantId,
        display_name: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            participant_id,
            display_name: display_name.into(),
            color: color.into(),
        }
    }
}

/// One opaque, immutable delta of a document's replicated state.
///
/// Cloning is cheap: the bytes are shared. On JSON wires the frame is carried
/// as a base64 string.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UpdateFrame(Arc<[u8]>);

impl UpdateFrame {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for UpdateFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateFrame({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for UpdateFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl Serialize for UpdateFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for UpdateFrame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(UpdateFrame::from)
            .map_err(serde::de::Error::custom)
    }
}

/// The authoritative persisted state of a document.
///
/// Exactly one record exists per document. It is only ever written by a
/// provider flush, and every write carries a strictly greater revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableStateRecord {
    pub key: DocumentKey,
    /// Fully merged replicated state.
    pub state: Vec<u8>,
    pub revision: u64,
    pub updated_by: ParticipantId,
    pub updated_at: DateTime<Utc>,
}

/// Unique identifier for a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable historical checkpoint of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub id: SnapshotId,
    pub key: DocumentKey,
    pub payload: Vec<u8>,
    /// Human label, e.g. "manual save" or "5-minute checkpoint".
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub created_by: ParticipantId,
}

/// Last known-good local state of a document on this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: DocumentKey,
    pub state: Vec<u8>,
    /// Local edits in `state` have not yet been confirmed durable.
    pub locally_modified: bool,
    pub updated_at: DateTime<Utc>,
}
