//! Sync channel contract.
//!
//! A channel is a named realtime topic per document. Every subscriber receives
//! what the others publish, wrapped in an [`Envelope`] stamped with the
//! publisher. Delivery is ordered per publisher and nothing else is promised.

use crate::presence::PresenceState;
use crate::types::{ParticipantId, UpdateFrame};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by a channel transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Network blip, server restart; worth retrying
    #[error("Transient channel error: {0}")]
    Transient(String),

    /// The participant may not use this topic
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The connection is gone
    #[error("Channel closed")]
    Closed,

    /// A payload could not be decoded
    #[error("Malformed channel payload: {0}")]
    Malformed(String),
}

impl ChannelError {
    /// Fatal errors end the session; everything else is retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChannelError::PermissionDenied(_))
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Presence sub-protocol carried next to document updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PresenceMessage {
    /// A participant arrived; peers reply with their own `State`.
    Join { state: PresenceState },
    /// Heartbeat or change of cursor/typing.
    State { state: PresenceState },
    /// Graceful departure.
    Leave,
}

/// Payloads exchanged on a document topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// An update frame, either a local delta or a full state.
    Update { frame: UpdateFrame },
    /// Ask peers to answer with their full state.
    SyncRequest,
    Presence { event: PresenceMessage },
}

/// A message together with the participant that published it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: ParticipantId,
    pub message: ChannelMessage,
}

/// Something that happened on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(Envelope),
    /// The subscription ended; no further events follow.
    Closed(ChannelError),
}

/// Publishing half of a subscription.
pub trait ChannelSink: Send + Sync {
    /// Queue a message for every other subscriber of the topic.
    ///
    /// Messages from one sink are delivered in call order.
    fn publish(&self, message: ChannelMessage) -> ChannelResult<()>;
}

/// An open subscription to one topic.
pub struct ChannelConnection {
    pub sink: Arc<dyn ChannelSink>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl std::fmt::Debug for ChannelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConnection").finish_non_exhaustive()
    }
}

/// Opens subscriptions to document topics.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn subscribe(
        &self,
        topic: &str,
        participant: ParticipantId,
    ) -> ChannelResult<ChannelConnection>;
}
