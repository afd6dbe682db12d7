//! Sync provider.
//!
//! One [`SyncProvider`] per participant. Every [`attach`](SyncProvider::attach)
//! spawns a document actor that owns the document's channel subscription,
//! durable flushes, cache writes and checkpoints. The returned
//! [`DocumentHandle`] is the editor binding's side: local edits are applied to
//! the shared document synchronously and queued for the actor.

mod actor;
mod cache;
mod flush;

use crate::error::{SyncError, SyncResult};
use crate::presence::{PresenceHandle, PresenceTracker};
use crate::status::{
    ConnectionStatus, DocumentEvent, ProviderState, ProviderStats, Readiness, SaveState,
};
use actor::{ActorOutputs, DocumentActor};
use parking_lot::Mutex;
use std::sync::Arc;
use tandem_config::SyncConfig;
use tandem_core::{
    ChannelTransport, Clock, DocumentKey, Identity, LocalCache, ParticipantId,
    ReplicatedDocument, SnapshotId, SnapshotRecord, SnapshotStore, StateStore, SystemClock,
    TextEdit, UpdateFrame,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, info_span, Instrument};

pub(crate) type SharedDocument = Arc<Mutex<Box<dyn ReplicatedDocument>>>;

/// Backends a provider talks to.
#[derive(Clone)]
pub struct SyncServices {
    pub state_store: Arc<dyn StateStore>,
    pub snapshot_store: Arc<dyn SnapshotStore>,
    pub cache: Arc<dyn LocalCache>,
    pub transport: Arc<dyn ChannelTransport>,
    pub clock: Arc<dyn Clock>,
}

impl SyncServices {
    pub fn new(
        state_store: Arc<dyn StateStore>,
        snapshot_store: Arc<dyn SnapshotStore>,
        cache: Arc<dyn LocalCache>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        Self {
            state_store,
            snapshot_store,
            cache,
            transport,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp records with `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for SyncServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServices")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Attaches documents for one participant.
#[derive(Debug, Clone)]
pub struct SyncProvider {
    participant: ParticipantId,
    services: SyncServices,
    config: SyncConfig,
}

impl SyncProvider {
    pub fn new(participant: ParticipantId, services: SyncServices, config: SyncConfig) -> Self {
        Self {
            participant,
            services,
            config,
        }
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Start synchronizing `document` under `key`.
    ///
    /// Returns immediately; await [`DocumentHandle::ready`] for hydration.
    /// Must be called from within a tokio runtime.
    pub fn attach(&self, key: DocumentKey, document: Box<dyn ReplicatedDocument>) -> DocumentHandle {
        let kind = document.kind();
        let document: SharedDocument = Arc::new(Mutex::new(document));

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ProviderState::Connecting);
        let (connection_tx, connection_rx) = watch::channel(ConnectionStatus::Connecting);
        let (save_tx, save_rx) = watch::channel(SaveState::default());
        let (readiness_tx, readiness_rx) = watch::channel(Readiness::Pending);
        let (events_tx, first_events) = broadcast::channel(self.config.event_buffer);
        let stats = Arc::new(Mutex::new(ProviderStats::default()));

        let outputs = ActorOutputs {
            state: state_tx,
            connection: connection_tx,
            save: save_tx,
            readiness: readiness_tx,
            events: events_tx.clone(),
            stats: stats.clone(),
        };
        let actor = DocumentActor::new(
            key.clone(),
            self.participant,
            document.clone(),
            self.services.clone(),
            self.config.clone(),
            commands_rx,
            outputs,
        );

        info!(document = %key, kind, "Attaching document");
        let span = info_span!("document", document = %key, participant = %self.participant);
        tokio::spawn(actor.run().instrument(span));

        DocumentHandle {
            key,
            participant: self.participant,
            document,
            commands: commands_tx,
            state: state_rx,
            connection: connection_rx,
            save: save_rx,
            readiness: readiness_rx,
            events: events_tx,
            first_events: Mutex::new(Some(first_events)),
            stats,
            snapshot_store: self.services.snapshot_store.clone(),
        }
    }

    /// Join the presence layer of `key` as `identity`.
    pub fn join_presence(&self, key: &DocumentKey, identity: Identity) -> PresenceHandle {
        PresenceTracker::new(
            self.services.transport.clone(),
            self.config.presence.clone(),
            self.config.reconnect.clone(),
        )
        .join(key, identity)
    }
}

/// Requests from a handle to its document actor.
pub(crate) enum Command {
    LocalUpdate(UpdateFrame),
    Flush(oneshot::Sender<SyncResult<u64>>),
    Snapshot {
        label: String,
        reply: oneshot::Sender<SyncResult<SnapshotRecord>>,
    },
    Detach(oneshot::Sender<()>),
}

/// Editor-facing handle to an attached document.
///
/// Dropping the handle detaches the document, as [`detach`](Self::detach)
/// does, without waiting for it.
pub struct DocumentHandle {
    key: DocumentKey,
    participant: ParticipantId,
    document: SharedDocument,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ProviderState>,
    connection: watch::Receiver<ConnectionStatus>,
    save: watch::Receiver<SaveState>,
    readiness: watch::Receiver<Readiness>,
    events: broadcast::Sender<DocumentEvent>,
    first_events: Mutex<Option<broadcast::Receiver<DocumentEvent>>>,
    stats: Arc<Mutex<ProviderStats>>,
    snapshot_store: Arc<dyn SnapshotStore>,
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("key", &self.key)
            .field("participant", &self.participant)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl DocumentHandle {
    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Wait until the durable record has been merged.
    ///
    /// Fails if the session hit a fatal channel error first, or was detached.
    pub async fn ready(&self) -> SyncResult<()> {
        let mut readiness = self.readiness.clone();
        let settled = readiness
            .wait_for(|r| !matches!(r, Readiness::Pending))
            .await
            .map_err(|_| SyncError::Detached)?;
        match &*settled {
            Readiness::Ready => Ok(()),
            Readiness::Failed(reason) => Err(SyncError::Fatal(reason.clone())),
            Readiness::Pending => Err(SyncError::Detached),
        }
    }

    /// Apply an edit from the editor and return its frame.
    ///
    /// The document changes before this returns; propagation, caching and
    /// the durable flush happen in the background.
    pub fn apply_local_edit(&self, edit: TextEdit) -> SyncResult<UpdateFrame> {
        if self.commands.is_closed() {
            return Err(SyncError::Detached);
        }
        let frame = self.document.lock().apply_local_change(&edit)?;
        self.commands
            .send(Command::LocalUpdate(frame.clone()))
            .map_err(|_| SyncError::Detached)?;
        Ok(frame)
    }

    /// Current rendered text.
    pub fn content(&self) -> String {
        self.document.lock().content()
    }

    /// Full encoded state of the local replica.
    pub fn encode_state(&self) -> SyncResult<Vec<u8>> {
        Ok(self.document.lock().serialize()?)
    }

    /// Manual save: flush now and return the durable revision that covers
    /// every edit made before the call.
    pub async fn flush(&self) -> SyncResult<u64> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Flush(reply))
            .map_err(|_| SyncError::Detached)?;
        response.await.map_err(|_| SyncError::Detached)?
    }

    /// Checkpoint the current state under `label`.
    pub async fn create_snapshot(&self, label: impl Into<String>) -> SyncResult<SnapshotRecord> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Snapshot {
                label: label.into(),
                reply,
            })
            .map_err(|_| SyncError::Detached)?;
        response.await.map_err(|_| SyncError::Detached)?
    }

    /// Snapshot history of this document, oldest first.
    pub async fn list_snapshots(&self) -> SyncResult<Vec<SnapshotRecord>> {
        Ok(self.snapshot_store.list(&self.key).await?)
    }

    /// Bring back the content of a snapshot as a new local edit.
    pub async fn restore_snapshot(&self, id: SnapshotId) -> SyncResult<UpdateFrame> {
        let record = self
            .snapshot_store
            .get(&self.key, id)
            .await?
            .ok_or(SyncError::SnapshotNotFound(id))?;
        if self.commands.is_closed() {
            return Err(SyncError::Detached);
        }
        let frame = self.document.lock().restore_from(&record.payload)?;
        self.commands
            .send(Command::LocalUpdate(frame.clone()))
            .map_err(|_| SyncError::Detached)?;
        Ok(frame)
    }

    pub fn state(&self) -> ProviderState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ProviderState> {
        self.state.clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.clone()
    }

    pub fn save_status(&self) -> SaveState {
        self.save.borrow().clone()
    }

    pub fn watch_save(&self) -> watch::Receiver<SaveState> {
        self.save.clone()
    }

    /// Subscribe to document events.
    ///
    /// The first call receives every event since attach, `Ready` included.
    /// Later calls only see events from the moment they subscribe.
    pub fn events(&self) -> broadcast::Receiver<DocumentEvent> {
        self.first_events
            .lock()
            .take()
            .unwrap_or_else(|| self.events.subscribe())
    }

    /// [`events`](Self::events) as a `Stream`.
    pub fn event_stream(&self) -> BroadcastStream<DocumentEvent> {
        BroadcastStream::new(self.events())
    }

    pub fn stats(&self) -> ProviderStats {
        self.stats.lock().clone()
    }

    /// Stop synchronizing: settle pending saves, drain the cache writer and
    /// leave the channel. Durable state is kept.
    pub async fn detach(&self) -> SyncResult<()> {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Detach(reply)).is_err() {
            return Ok(());
        }
        let _ = done.await;
        Ok(())
    }
}
