//! Topic registry and fan-out.
//!
//! Each subscriber owns a bounded outbound queue. A subscriber whose queue is
//! full is dropped from its topic; its session then tells the client to
//! reconnect, and the client catches up with a sync request.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tandem_core::{Envelope, ParticipantId};
use tandem_sync::RelayFrame;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

#[derive(Debug)]
struct Subscriber {
    id: u64,
    participant: ParticipantId,
    outbound: mpsc::Sender<RelayFrame>,
}

/// A registered subscriber's receiving end.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub frames: mpsc::Receiver<RelayFrame>,
}

/// Live subscribers, keyed by topic.
#[derive(Debug)]
pub struct Topics {
    next_id: AtomicU64,
    buffer: usize,
    subscribers: DashMap<String, Vec<Subscriber>>,
}

impl Topics {
    /// `buffer` is the outbound queue length per subscriber.
    pub fn new(buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            subscribers: DashMap::new(),
        }
    }

    pub fn subscribe(&self, topic: &str, participant: ParticipantId) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, frames) = mpsc::channel(self.buffer);
        self.subscribers
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                id,
                participant,
                outbound,
            });
        debug!(topic, %participant, id, "Registered subscriber");
        Subscription { id, frames }
    }

    pub fn unsubscribe(&self, topic: &str, id: u64) {
        if let Some(mut subscribers) = self.subscribers.get_mut(topic) {
            subscribers.retain(|subscriber| subscriber.id != id);
        }
        self.subscribers
            .remove_if(topic, |_, subscribers| subscribers.is_empty());
    }

    /// Queue `envelope` for every subscriber of `topic` except the sender and
    /// other connections of the same participant. Returns the deliveries.
    pub fn broadcast(&self, topic: &str, sender: u64, envelope: &Envelope) -> usize {
        let mut delivered = 0;
        if let Some(mut subscribers) = self.subscribers.get_mut(topic) {
            subscribers.retain(|subscriber| {
                if subscriber.id == sender || subscriber.participant == envelope.origin {
                    return true;
                }
                match subscriber
                    .outbound
                    .try_send(RelayFrame::Envelope(envelope.clone()))
                {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!(topic, participant = %subscriber.participant, "Dropping lagging subscriber");
                        false
                    }
                    Err(TrySendError::Closed(_)) => false,
                }
            });
        }
        self.subscribers
            .remove_if(topic, |_, subscribers| subscribers.is_empty());
        delivered
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .get(topic)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::ChannelMessage;

    fn envelope(origin: ParticipantId) -> Envelope {
        Envelope {
            origin,
            message: ChannelMessage::SyncRequest,
        }
    }

    #[test]
    fn broadcast_skips_sender_and_its_participant() {
        let topics = Topics::new(8);
        let alice = ParticipantId::new();
        let bob = ParticipantId::new();

        let sender = topics.subscribe("2026/notes", alice);
        let mut alice_presence = topics.subscribe("2026/notes", alice);
        let mut receiver = topics.subscribe("2026/notes", bob);

        assert_eq!(topics.broadcast("2026/notes", sender.id, &envelope(alice)), 1);
        assert!(alice_presence.frames.try_recv().is_err());
        assert_eq!(
            receiver.frames.try_recv().unwrap(),
            RelayFrame::Envelope(envelope(alice))
        );
    }

    #[test]
    fn lagging_subscriber_is_dropped() {
        let topics = Topics::new(1);
        let alice = ParticipantId::new();
        let sender = topics.subscribe("t", alice);
        let mut slow = topics.subscribe("t", ParticipantId::new());

        assert_eq!(topics.broadcast("t", sender.id, &envelope(alice)), 1);
        assert_eq!(topics.broadcast("t", sender.id, &envelope(alice)), 0);
        assert_eq!(topics.subscriber_count("t"), 1);

        // The queued frame is still delivered, then the queue reports closed.
        assert!(slow.frames.try_recv().is_ok());
        assert!(matches!(
            slow.frames.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn empty_topics_are_removed() {
        let topics = Topics::new(4);
        let subscription = topics.subscribe("t", ParticipantId::new());
        topics.unsubscribe("t", subscription.id);
        assert_eq!(topics.subscriber_count("t"), 0);
        assert!(topics.subscribers.is_empty());
    }
}
