//! Presence tracker.
//!
//! Who is looking at a document, where their cursor is and whether they are
//! typing. Presence rides on the document's topic but is never persisted:
//! entries are refreshed by heartbeats and disappear when they stop.

use crate::backoff::{sleep_until_opt, Backoff};
use crate::transport::next_event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tandem_config::{PresenceConfig, ReconnectConfig};
use tandem_core::{
    ChannelConnection, ChannelEvent, ChannelMessage, ChannelTransport, CursorPosition,
    DocumentKey, Envelope, Identity, ParticipantId, PresenceMessage, PresenceState,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info_span, trace, warn, Instrument};

/// A peer as last heard from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub state: PresenceState,
    pub last_seen: Instant,
}

impl PresenceEntry {
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) <= ttl
    }
}

#[derive(Debug)]
struct Roster {
    local: PresenceState,
    peers: HashMap<ParticipantId, PresenceEntry>,
}

impl Roster {
    /// Local participant first, then fresh peers ordered by name.
    fn online(&self, now: Instant, ttl: Duration) -> Vec<PresenceState> {
        let mut peers: Vec<_> = self
            .peers
            .values()
            .filter(|entry| entry.is_fresh(now, ttl))
            .map(|entry| entry.state.clone())
            .collect();
        peers.sort_by(|a, b| {
            a.identity
                .display_name
                .cmp(&b.identity.display_name)
                .then(a.participant_id().cmp(&b.participant_id()))
        });

        let mut online = Vec::with_capacity(peers.len() + 1);
        online.push(self.local.clone());
        online.extend(peers);
        online
    }
}

/// Starts presence sessions over a channel transport.
#[derive(Clone)]
pub struct PresenceTracker {
    transport: Arc<dyn ChannelTransport>,
    config: PresenceConfig,
    reconnect: ReconnectConfig,
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PresenceTracker {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        config: PresenceConfig,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            transport,
            config,
            reconnect,
        }
    }

    /// Announce `identity` on the document and start heartbeating.
    ///
    /// Must be called from within a tokio runtime.
    pub fn join(&self, key: &DocumentKey, identity: Identity) -> PresenceHandle {
        let participant = identity.participant_id;
        let roster = Arc::new(Mutex::new(Roster {
            local: PresenceState::new(identity),
            peers: HashMap::new(),
        }));
        let now = Instant::now();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (online_tx, online_rx) =
            watch::channel(roster.lock().online(now, self.config.ttl()));

        let session = PresenceSession {
            topic: key.topic(),
            participant,
            transport: self.transport.clone(),
            config: self.config.clone(),
            roster: roster.clone(),
            commands: commands_rx,
            online: online_tx,
            channel: None,
            reconnect: Backoff::for_reconnect(&self.reconnect),
            reconnect_at: Some(now),
            typing_until: None,
            stopped: false,
        };
        let span = info_span!("presence", document = %key, %participant);
        tokio::spawn(session.run().instrument(span));

        PresenceHandle {
            participant,
            ttl: self.config.ttl(),
            roster,
            commands: commands_tx,
            online: online_rx,
        }
    }
}

enum PresenceCommand {
    Changed,
    Typing(bool),
    Leave(oneshot::Sender<()>),
}

/// One participant's presence on one document.
///
/// Dropping the handle leaves, like [`leave`](Self::leave) without waiting.
#[derive(Debug)]
pub struct PresenceHandle {
    participant: ParticipantId,
    ttl: Duration,
    roster: Arc<Mutex<Roster>>,
    commands: mpsc::UnboundedSender<PresenceCommand>,
    online: watch::Receiver<Vec<PresenceState>>,
}

impl std::fmt::Debug for PresenceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceCommand::Changed => write!(f, "Changed"),
            PresenceCommand::Typing(typing) => write!(f, "Typing({typing})"),
            PresenceCommand::Leave(_) => write!(f, "Leave"),
        }
    }
}

impl PresenceHandle {
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Move the local cursor or selection; `None` hides it.
    pub fn update_cursor(&self, cursor: Option<CursorPosition>) {
        self.roster.lock().local.cursor = cursor;
        let _ = self.commands.send(PresenceCommand::Changed);
    }

    /// Report a keystroke (`true`) or an explicit stop (`false`).
    ///
    /// Typing clears by itself shortly after the last keystroke.
    pub fn update_typing(&self, typing: bool) {
        let _ = self.commands.send(PresenceCommand::Typing(typing));
    }

    /// Our own advertised state.
    pub fn local_state(&self) -> PresenceState {
        self.roster.lock().local.clone()
    }

    /// Everyone heard from within the TTL, ourselves first.
    pub fn online(&self) -> Vec<PresenceState> {
        self.roster.lock().online(Instant::now(), self.ttl)
    }

    /// [`online`](Self::online) without ourselves.
    pub fn peers(&self) -> Vec<PresenceState> {
        let mut online = self.online();
        online.retain(|state| state.participant_id() != self.participant);
        online
    }

    /// Roster updates as they happen.
    pub fn watch(&self) -> watch::Receiver<Vec<PresenceState>> {
        self.online.clone()
    }

    /// Tell peers we are gone and stop heartbeating.
    pub async fn leave(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(PresenceCommand::Leave(reply)).is_ok() {
            let _ = done.await;
        }
    }
}

struct PresenceSession {
    topic: String,
    participant: ParticipantId,
    transport: Arc<dyn ChannelTransport>,
    config: PresenceConfig,
    roster: Arc<Mutex<Roster>>,
    commands: mpsc::UnboundedReceiver<PresenceCommand>,
    online: watch::Sender<Vec<PresenceState>>,
    channel: Option<ChannelConnection>,
    reconnect: Backoff,
    reconnect_at: Option<Instant>,
    typing_until: Option<Instant>,
    /// Set after a fatal channel error.
    stopped: bool,
}

impl PresenceSession {
    async fn run(mut self) {
        let period = self.config.heartbeat();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(PresenceCommand::Changed) => self.announce_state(),
                    Some(PresenceCommand::Typing(typing)) => self.set_typing(typing),
                    Some(PresenceCommand::Leave(reply)) => {
                        self.leave();
                        let _ = reply.send(());
                        return;
                    }
                    None => {
                        self.leave();
                        return;
                    }
                },
                event = next_event(&mut self.channel) => match event {
                    ChannelEvent::Message(envelope) => self.handle_envelope(envelope),
                    ChannelEvent::Closed(error) if error.is_fatal() => {
                        error!(error = %error, "Presence channel failed");
                        self.channel = None;
                        self.stopped = true;
                    }
                    ChannelEvent::Closed(error) => {
                        warn!(error = %error, "Presence channel lost");
                        self.channel = None;
                        self.schedule_reconnect();
                    }
                },
                _ = heartbeat.tick() => {
                    self.announce_state();
                    self.prune();
                }
                _ = sleep_until_opt(self.typing_until) => {
                    self.typing_until = None;
                    self.roster.lock().local.typing = false;
                    self.announce_state();
                }
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
            }
        }
    }

    async fn connect(&mut self) {
        if self.stopped {
            return;
        }
        match self.transport.subscribe(&self.topic, self.participant).await {
            Ok(connection) => {
                self.reconnect.reset();
                self.channel = Some(connection);
                let state = self.roster.lock().local.clone();
                self.publish(PresenceMessage::Join { state });
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Presence subscription refused");
                self.stopped = true;
            }
            Err(e) => {
                warn!(error = %e, "Presence subscribe failed");
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.reconnect.next_delay();
        debug!(delay = ?delay, "Scheduling presence resubscribe");
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        let Envelope { origin, message } = envelope;
        if origin == self.participant {
            return;
        }
        let ChannelMessage::Presence { event } = message else {
            return;
        };

        match event {
            PresenceMessage::Join { state } => {
                if self.upsert(origin, state) {
                    // Let the newcomer see us without waiting for a heartbeat.
                    self.announce_state();
                }
            }
            PresenceMessage::State { state } => {
                self.upsert(origin, state);
            }
            PresenceMessage::Leave => {
                let removed = self.roster.lock().peers.remove(&origin).is_some();
                if removed {
                    trace!(%origin, "Peer left");
                    self.publish_roster();
                }
            }
        }
    }

    /// Record a peer's state; false if it was rejected.
    fn upsert(&mut self, origin: ParticipantId, state: PresenceState) -> bool {
        if state.participant_id() != origin {
            warn!(%origin, claimed = %state.participant_id(), "Dropping presence for another participant");
            return false;
        }
        self.roster.lock().peers.insert(
            origin,
            PresenceEntry {
                state,
                last_seen: Instant::now(),
            },
        );
        self.publish_roster();
        true
    }

    fn set_typing(&mut self, typing: bool) {
        let was_typing = {
            let mut roster = self.roster.lock();
            std::mem::replace(&mut roster.local.typing, typing)
        };
        self.typing_until = typing.then(|| Instant::now() + self.config.typing_timeout());
        if was_typing != typing {
            self.announce_state();
        }
    }

    fn prune(&mut self) {
        let now = Instant::now();
        let ttl = self.config.ttl();
        let expired = {
            let mut roster = self.roster.lock();
            let before = roster.peers.len();
            roster.peers.retain(|_, entry| entry.is_fresh(now, ttl));
            before - roster.peers.len()
        };
        if expired > 0 {
            debug!(expired, "Expired silent peers");
            self.publish_roster();
        }
    }

    fn announce_state(&mut self) {
        let state = self.roster.lock().local.clone();
        self.publish(PresenceMessage::State { state });
        self.publish_roster();
    }

    fn leave(&mut self) {
        self.publish(PresenceMessage::Leave);
        self.channel = None;
        debug!("Left presence");
    }

    fn publish(&self, event: PresenceMessage) {
        if let Some(channel) = &self.channel {
            if let Err(e) = channel.sink.publish(ChannelMessage::Presence { event }) {
                trace!(error = %e, "Presence publish failed");
            }
        }
    }

    fn publish_roster(&self) {
        let online = self
            .roster
            .lock()
            .online(Instant::now(), self.config.ttl());
        self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}
