//! In-process sync channel.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tandem_core::{
    ChannelConnection, ChannelError, ChannelEvent, ChannelMessage, ChannelResult, ChannelSink,
    ChannelTransport, Envelope, ParticipantId,
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Topics shared by every transport handle cloned from the same hub.
///
/// Besides plain fan-out the hub can simulate the failures a real relay
/// produces: dropped connections, participants going offline, and revoked
/// permissions.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

#[derive(Debug, Default)]
struct HubState {
    next_id: u64,
    topics: HashMap<String, Vec<Subscriber>>,
    offline: HashSet<ParticipantId>,
    denied: HashSet<(ParticipantId, String)>,
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    participant: ParticipantId,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl HubState {
    /// Remove matching subscribers, telling each one why.
    fn close_where<F>(&mut self, error: &ChannelError, mut matches: F) -> usize
    where
        F: FnMut(&str, &Subscriber) -> bool,
    {
        let mut closed = 0;
        for (topic, subscribers) in self.topics.iter_mut() {
            subscribers.retain(|subscriber| {
                if matches(topic, subscriber) {
                    let _ = subscriber
                        .events
                        .send(ChannelEvent::Closed(error.clone()));
                    closed += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.topics.retain(|_, subscribers| !subscribers.is_empty());
        closed
    }

    fn deliver(&mut self, topic: &str, envelope: &Envelope, skip: Option<u64>) {
        let Some(subscribers) = self.topics.get_mut(topic) else {
            return;
        };
        subscribers.retain(|subscriber| {
            if Some(subscriber.id) == skip || subscriber.participant == envelope.origin {
                return true;
            }
            subscriber
                .events
                .send(ChannelEvent::Message(envelope.clone()))
                .is_ok()
        });
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Drop every subscription of `participant` with a transient error, as a
    /// network blip would. The participant may resubscribe right away.
    pub fn disconnect(&self, participant: ParticipantId) -> usize {
        let error = ChannelError::Transient("connection reset".to_string());
        let closed = self
            .state
            .lock()
            .close_where(&error, |_, subscriber| subscriber.participant == participant);
        debug!(%participant, closed, "Disconnected participant");
        closed
    }

    /// Take `participant` off the network. While offline its subscriptions
    /// are dropped and new ones fail transiently.
    pub fn set_offline(&self, participant: ParticipantId, offline: bool) {
        let mut state = self.state.lock();
        if offline {
            state.offline.insert(participant);
            let error = ChannelError::Transient("participant offline".to_string());
            state.close_where(&error, |_, subscriber| subscriber.participant == participant);
        } else {
            state.offline.remove(&participant);
        }
        debug!(%participant, offline, "Changed participant connectivity");
    }

    /// Withdraw `participant`'s access to `topic`: current subscriptions end
    /// with a fatal error and future ones are refused.
    pub fn revoke(&self, participant: ParticipantId, topic: &str) {
        let mut state = self.state.lock();
        state.denied.insert((participant, topic.to_string()));
        let error = ChannelError::PermissionDenied(format!("access to {topic} revoked"));
        state.close_where(&error, |name, subscriber| {
            name == topic && subscriber.participant == participant
        });
        debug!(%participant, topic, "Revoked topic access");
    }

    /// Deliver `envelope` to every subscriber of `topic` except its origin,
    /// bypassing any sink. Lets tests put arbitrary frames on the wire.
    pub fn inject(&self, topic: &str, envelope: Envelope) {
        self.state.lock().deliver(topic, &envelope, None);
    }
}

#[async_trait]
impl ChannelTransport for MemoryHub {
    async fn subscribe(
        &self,
        topic: &str,
        participant: ParticipantId,
    ) -> ChannelResult<ChannelConnection> {
        let mut state = self.state.lock();
        if state.offline.contains(&participant) {
            return Err(ChannelError::Transient("participant offline".to_string()));
        }
        if state.denied.contains(&(participant, topic.to_string())) {
            return Err(ChannelError::PermissionDenied(format!(
                "access to {topic} denied"
            )));
        }

        let id = state.next_id;
        state.next_id += 1;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                id,
                participant,
                events: events_tx,
            });
        trace!(topic, %participant, id, "Subscribed");

        let sink = HubSink {
            state: self.state.clone(),
            topic: topic.to_string(),
            id,
            participant,
        };
        Ok(ChannelConnection {
            sink: Arc::new(sink),
            events: events_rx,
        })
    }
}

/// Publishing half of a hub subscription; unsubscribes on drop.
struct HubSink {
    state: Arc<Mutex<HubState>>,
    topic: String,
    id: u64,
    participant: ParticipantId,
}

impl ChannelSink for HubSink {
    fn publish(&self, message: ChannelMessage) -> ChannelResult<()> {
        let mut state = self.state.lock();
        let subscribed = state
            .topics
            .get(&self.topic)
            .is_some_and(|subscribers| subscribers.iter().any(|s| s.id == self.id));
        if !subscribed {
            return Err(ChannelError::Closed);
        }

        let envelope = Envelope {
            origin: self.participant,
            message,
        };
        state.deliver(&self.topic, &envelope, Some(self.id));
        Ok(())
    }
}

impl Drop for HubSink {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(subscribers) = state.topics.get_mut(&self.topic) {
            subscribers.retain(|subscriber| subscriber.id != self.id);
            if subscribers.is_empty() {
                state.topics.remove(&self.topic);
            }
        }
    }
}
