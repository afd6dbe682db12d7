//! Per-document actor.
//!
//! All provider work for one document runs on this task, so the channel,
//! flush scheduling and checkpoints never race each other. The document
//! itself is shared with the handle behind a mutex that is never held across
//! an await.

use super::cache::spawn_cache_writer;
use super::flush::{write_state, FlushOutcome, FlushScheduler};
use super::{Command, SharedDocument, SyncServices};
use crate::backoff::{sleep_until_opt, Backoff};
use crate::error::{SyncError, SyncResult};
use crate::snapshot::{append_snapshot, checkpoint, SnapshotManager};
use crate::status::{
    ConnectionStatus, DocumentEvent, ProviderState, ProviderStats, Readiness, SaveState,
    SaveStatus,
};
use crate::transport::next_event;
use parking_lot::Mutex;
use std::future::pending;
use std::sync::Arc;
use tandem_config::SyncConfig;
use tandem_core::{
    CacheEntry, ChannelConnection, ChannelError, ChannelEvent, ChannelMessage, DocumentKey,
    DurableStateRecord, Envelope, ParticipantId, SnapshotRecord, StorageError, StorageResult,
    UpdateFrame,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Everything the actor reports back to handles.
pub(crate) struct ActorOutputs {
    pub(crate) state: watch::Sender<ProviderState>,
    pub(crate) connection: watch::Sender<ConnectionStatus>,
    pub(crate) save: watch::Sender<SaveState>,
    pub(crate) readiness: watch::Sender<Readiness>,
    pub(crate) events: broadcast::Sender<DocumentEvent>,
    pub(crate) stats: Arc<Mutex<ProviderStats>>,
}

type FlushWaiter = (u64, oneshot::Sender<SyncResult<u64>>);

/// A finished checkpoint write.
struct SnapshotJob {
    label: String,
    result: StorageResult<SnapshotRecord>,
    reply: Option<oneshot::Sender<SyncResult<SnapshotRecord>>>,
}

pub(crate) struct DocumentActor {
    key: DocumentKey,
    topic: String,
    participant: ParticipantId,
    document: SharedDocument,
    services: SyncServices,
    config: SyncConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    outputs: ActorOutputs,

    state: ProviderState,
    channel: Option<ChannelConnection>,
    reconnect: Backoff,
    reconnect_at: Option<Instant>,
    hydrate_at: Option<Instant>,
    hydrated: bool,

    /// Last durable revision known to this replica.
    revision: u64,
    /// Counts local edits; everything up to `flushed_generation` is durable.
    local_generation: u64,
    flushed_generation: u64,
    flight: Option<JoinHandle<FlushOutcome>>,
    flight_generation: u64,
    flush: FlushScheduler,
    flush_waiters: Vec<FlushWaiter>,

    snapshots: SnapshotManager,
    snapshot_jobs: JoinSet<SnapshotJob>,

    cache_tx: Option<watch::Sender<Option<CacheEntry>>>,
    cache_task: Option<JoinHandle<()>>,
}

impl DocumentActor {
    pub(crate) fn new(
        key: DocumentKey,
        participant: ParticipantId,
        document: SharedDocument,
        services: SyncServices,
        config: SyncConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        outputs: ActorOutputs,
    ) -> Self {
        Self {
            topic: key.topic(),
            key,
            participant,
            document,
            commands,
            outputs,
            state: ProviderState::Connecting,
            channel: None,
            reconnect: Backoff::for_reconnect(&config.reconnect),
            reconnect_at: None,
            hydrate_at: None,
            hydrated: false,
            revision: 0,
            local_generation: 0,
            flushed_generation: 0,
            flight: None,
            flight_generation: 0,
            flush: FlushScheduler::new(config.flush.clone()),
            flush_waiters: Vec::new(),
            snapshots: SnapshotManager::new(config.snapshot.clone(), Instant::now()),
            snapshot_jobs: JoinSet::new(),
            cache_tx: None,
            cache_task: None,
            services,
            config,
        }
    }

    pub(crate) async fn run(mut self) {
        let (cache_tx, cache_rx) = watch::channel(None);
        self.cache_task = Some(spawn_cache_writer(self.services.cache.clone(), cache_rx));
        self.cache_tx = Some(cache_tx);

        self.restore_cache().await;
        self.reconnect_at = Some(Instant::now());

        loop {
            let flush_at = self.flush_deadline();
            let snapshot_at = self.snapshot_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Detach(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All handles dropped");
                        self.shutdown().await;
                        return;
                    }
                },
                event = next_event(&mut self.channel) => match event {
                    ChannelEvent::Message(envelope) => self.handle_envelope(envelope),
                    ChannelEvent::Closed(error) => self.channel_closed(error),
                },
                outcome = join_flight(&mut self.flight) => self.handle_flush_outcome(outcome),
                Some(joined) = self.snapshot_jobs.join_next() => self.snapshot_finished(joined),
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
                _ = sleep_until_opt(self.hydrate_at) => {
                    self.hydrate_at = None;
                    self.hydrate().await;
                }
                _ = sleep_until_opt(flush_at) => self.start_flush(),
                _ = sleep_until_opt(snapshot_at) => self.snapshot_due(),
            }
        }
    }

    // --- lifecycle ---------------------------------------------------------

    async fn restore_cache(&mut self) {
        let entry = match self.services.cache.load(&self.key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to read cache entry");
                return;
            }
        };

        let merged = self.document.lock().merge(&entry.state);
        match merged {
            Ok(()) => {
                if entry.locally_modified {
                    // Unsaved edits from an earlier session; flushed once hydrated.
                    self.local_generation += 1;
                }
                debug!(locally_modified = entry.locally_modified, "Restored cached state");
                self.emit(DocumentEvent::CacheRestored {
                    locally_modified: entry.locally_modified,
                });
            }
            Err(e) => warn!(error = %e, "Ignoring unreadable cache entry"),
        }
    }

    async fn connect(&mut self) {
        if self.is_stopped() {
            return;
        }

        match self
            .services
            .transport
            .subscribe(&self.topic, self.participant)
            .await
        {
            Ok(connection) => {
                self.reconnect.reset();
                self.channel = Some(connection);
                if self.hydrated {
                    self.outputs.stats.lock().reconnects += 1;
                    self.merge_durable().await;
                    self.transition(ProviderState::Synced);
                    info!(revision = self.revision, "Reconnected");
                    self.announce();
                } else {
                    self.transition(ProviderState::Hydrating);
                    self.hydrate().await;
                }
            }
            Err(e) if e.is_fatal() => self.fail(e),
            Err(e) => {
                warn!(error = %e, "Subscribe failed");
                self.schedule_reconnect();
            }
        }
    }

    async fn hydrate(&mut self) {
        if self.hydrated || self.channel.is_none() || self.state != ProviderState::Hydrating {
            return;
        }

        let record = match self.services.state_store.load(&self.key).await {
            Ok(record) => record,
            Err(e) => {
                let delay = self.reconnect.next_delay();
                warn!(error = %e, retry_in = ?delay, "Failed to load durable state");
                self.hydrate_at = Some(Instant::now() + delay);
                return;
            }
        };

        if let Some(record) = &record {
            let merged = self.document.lock().merge(&record.state);
            if let Err(e) = merged {
                warn!(revision = record.revision, error = %e, "Durable state could not be merged");
            }
        }
        self.revision = record.map(|r| r.revision).unwrap_or(0);
        self.hydrated = true;
        self.reconnect.reset();

        let revision = self.revision;
        self.outputs.save.send_modify(|save| save.revision = revision);
        self.transition(ProviderState::Synced);
        self.outputs.readiness.send_replace(Readiness::Ready);
        info!(revision, "Document ready");
        self.emit(DocumentEvent::Ready { revision });

        self.announce();
        self.write_cache();
        self.snapshots.checkpoint_taken(Instant::now());

        if self.dirty() {
            self.flush.request_now(Instant::now());
        } else {
            self.resolve_waiters();
        }
    }

    /// Merge the durable record if a peer flushed while we were away.
    async fn merge_durable(&mut self) {
        match self.services.state_store.load(&self.key).await {
            Ok(Some(record)) if record.revision > self.revision => self.absorb_record(record),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to re-read durable state"),
        }
    }

    fn absorb_record(&mut self, record: DurableStateRecord) {
        let merged = self.document.lock().merge(&record.state);
        if let Err(e) = merged {
            warn!(revision = record.revision, error = %e, "Durable state could not be merged");
            return;
        }
        self.revision = self.revision.max(record.revision);
        let revision = self.revision;
        self.outputs.save.send_modify(|save| save.revision = revision);
        self.emit(DocumentEvent::StateMerged { revision });
        self.write_cache();
    }

    fn channel_closed(&mut self, error: ChannelError) {
        self.channel = None;
        if error.is_fatal() {
            self.fail(error);
            return;
        }

        warn!(error = %error, "Channel lost");
        if self.hydrated {
            self.transition(ProviderState::Reconnecting);
        } else {
            self.hydrate_at = None;
            self.transition(ProviderState::Connecting);
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.reconnect.next_delay();
        debug!(attempt = self.reconnect.attempt(), delay = ?delay, "Scheduling reconnect");
        self.reconnect_at = Some(Instant::now() + delay);
    }

    /// Unrecoverable channel failure: stop talking to the network, keep
    /// editing locally.
    fn fail(&mut self, error: ChannelError) {
        error!(error = %error, "Session failed");
        let reason = error.to_string();

        self.channel = None;
        self.reconnect_at = None;
        self.hydrate_at = None;
        self.transition(ProviderState::Error);

        if !self.hydrated {
            self.outputs
                .readiness
                .send_replace(Readiness::Failed(reason.clone()));
        }
        for (_, reply) in self.flush_waiters.drain(..) {
            let _ = reply.send(Err(SyncError::Fatal(reason.clone())));
        }
    }

    async fn shutdown(&mut self) {
        if let Some(flight) = self.flight.take() {
            // Settle the write, but trust only what the final flush reports.
            let _ = flight.await;
        }
        if self.config.flush.flush_on_detach && self.can_flush() && self.dirty() {
            self.final_flush().await;
        }
        self.channel = None;

        self.write_cache();
        self.cache_tx = None;
        if let Some(writer) = self.cache_task.take() {
            if let Err(e) = writer.await {
                warn!(error = %e, "Cache writer stopped abnormally");
            }
        }

        while let Some(joined) = self.snapshot_jobs.join_next().await {
            self.snapshot_finished(joined);
        }
        for (_, reply) in self.flush_waiters.drain(..) {
            let _ = reply.send(Err(SyncError::Detached));
        }

        self.transition(ProviderState::Detached);
        info!("Document detached");
    }

    async fn final_flush(&mut self) {
        for _ in 0..=self.config.flush.stale_retries {
            let record = match self.next_record() {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "Final flush could not encode state");
                    return;
                }
            };
            match write_state(self.services.state_store.clone(), record).await {
                FlushOutcome::Written { revision } => {
                    self.flushed_generation = self.local_generation;
                    self.flush_written(revision);
                    return;
                }
                FlushOutcome::Stale {
                    current_revision,
                    current,
                } => {
                    self.outputs.stats.lock().stale_rebases += 1;
                    self.revision = self.revision.max(current_revision);
                    if let Some(record) = current {
                        self.absorb_record(record);
                    }
                }
                FlushOutcome::Failed(e) => {
                    warn!(error = %e, "Final flush failed; edits remain in the cache");
                    return;
                }
            }
        }
        warn!("Final flush kept losing to newer revisions; edits remain in the cache");
    }

    // --- commands and channel ---------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::LocalUpdate(frame) => self.local_update(frame),
            Command::Flush(reply) => self.manual_flush(reply),
            Command::Snapshot { label, reply } => self.start_snapshot(label, Some(reply)),
            // Handled by the run loop.
            Command::Detach(reply) => {
                let _ = reply.send(());
            }
        }
    }

    fn local_update(&mut self, frame: UpdateFrame) {
        self.outputs.stats.lock().local_updates += 1;
        self.local_generation += 1;

        self.publish(ChannelMessage::Update { frame });
        self.write_cache();
        self.flush.note_edit(Instant::now());
        self.outputs.save.send_modify(|save| {
            if save.status == SaveStatus::Saved {
                save.status = SaveStatus::Idle;
            }
        });
        self.count_operation();
    }

    fn manual_flush(&mut self, reply: oneshot::Sender<SyncResult<u64>>) {
        if self.state == ProviderState::Error {
            let _ = reply.send(Err(SyncError::Fatal(
                "session failed; reattach to save".to_string(),
            )));
            return;
        }
        if self.hydrated && !self.dirty() {
            let _ = reply.send(Ok(self.revision));
            return;
        }
        self.flush_waiters.push((self.local_generation, reply));
        if self.dirty() {
            self.flush.request_now(Instant::now());
        }
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        let Envelope { origin, message } = envelope;
        if origin == self.participant {
            return;
        }

        match message {
            ChannelMessage::Update { frame } => {
                let applied = self.document.lock().apply_remote_frame(&frame);
                match applied {
                    Ok(()) => {
                        self.outputs.stats.lock().remote_updates += 1;
                        self.emit(DocumentEvent::RemoteUpdate { origin, frame });
                        self.write_cache();
                        self.count_operation();
                    }
                    Err(e) => {
                        warn!(%origin, error = %e, "Dropping malformed frame");
                        self.outputs.stats.lock().frames_dropped += 1;
                        self.emit(DocumentEvent::FrameDropped {
                            origin,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            ChannelMessage::SyncRequest => {
                debug!(%origin, "Answering sync request");
                self.publish_full_state();
            }
            ChannelMessage::Presence { .. } => {}
        }
    }

    /// Send our full state and ask peers for theirs.
    fn announce(&mut self) {
        self.publish_full_state();
        self.publish(ChannelMessage::SyncRequest);
    }

    fn publish_full_state(&mut self) {
        let state = self.document.lock().serialize();
        match state {
            Ok(state) => self.publish(ChannelMessage::Update {
                frame: UpdateFrame::from(state),
            }),
            Err(e) => warn!(error = %e, "Failed to encode state for peers"),
        }
    }

    fn publish(&self, message: ChannelMessage) {
        if let Some(channel) = &self.channel {
            // A broken sink is reported through the event stream as well.
            if let Err(e) = channel.sink.publish(message) {
                debug!(error = %e, "Publish failed");
            }
        }
    }

    // --- durable flushes ----------------------------------------------------

    fn dirty(&self) -> bool {
        self.local_generation > self.flushed_generation
    }

    fn is_stopped(&self) -> bool {
        matches!(self.state, ProviderState::Error | ProviderState::Detached)
    }

    fn can_flush(&self) -> bool {
        self.hydrated && !self.is_stopped()
    }

    fn flush_deadline(&self) -> Option<Instant> {
        if self.flight.is_some() || !self.can_flush() {
            return None;
        }
        self.flush.deadline()
    }

    fn next_record(&self) -> SyncResult<DurableStateRecord> {
        let state = self.document.lock().serialize()?;
        Ok(DurableStateRecord {
            key: self.key.clone(),
            state,
            revision: self.revision + 1,
            updated_by: self.participant,
            updated_at: self.services.clock.now(),
        })
    }

    fn start_flush(&mut self) {
        if self.flight.is_some() || !self.can_flush() {
            return;
        }
        if !self.dirty() {
            self.flush.started();
            self.resolve_waiters();
            return;
        }

        let record = match self.next_record() {
            Ok(record) => record,
            Err(e) => {
                self.flush.started();
                self.flush_failed(e.to_string());
                return;
            }
        };

        debug!(revision = record.revision, "Flushing durable state");
        self.flight_generation = self.local_generation;
        self.flush.started();
        self.outputs.save.send_modify(|save| save.status = SaveStatus::Saving);
        self.flight = Some(tokio::spawn(write_state(
            self.services.state_store.clone(),
            record,
        )));
    }

    fn handle_flush_outcome(&mut self, outcome: FlushOutcome) {
        match outcome {
            FlushOutcome::Written { revision } => {
                self.flushed_generation = self.flushed_generation.max(self.flight_generation);
                self.flush_written(revision);
            }
            FlushOutcome::Stale {
                current_revision,
                current,
            } => {
                debug!(current_revision, "Flush lost to a newer revision; rebasing");
                self.outputs.stats.lock().stale_rebases += 1;
                self.revision = self.revision.max(current_revision);
                if let Some(record) = current {
                    self.absorb_record(record);
                }
                if !self.can_flush() {
                    return;
                }
                if self.flush.rebase() {
                    self.start_flush();
                } else {
                    self.flush_failed(format!(
                        "revision {current_revision} kept superseding local writes"
                    ));
                }
            }
            FlushOutcome::Failed(e) => self.flush_failed(e.to_string()),
        }
    }

    fn flush_written(&mut self, revision: u64) {
        self.outputs.stats.lock().flushes += 1;
        self.flush.succeeded();
        self.revision = self.revision.max(revision);
        debug!(revision, "Flushed");

        let clean = !self.dirty();
        let saved_at = self.services.clock.now();
        self.outputs.save.send_modify(|save| {
            save.revision = revision;
            save.last_error = None;
            save.saved_at = Some(saved_at);
            save.status = if clean {
                SaveStatus::Saved
            } else {
                SaveStatus::Idle
            };
        });
        self.emit(DocumentEvent::Flushed { revision });

        if clean {
            self.write_cache();
        }
        self.resolve_waiters();
    }

    fn flush_failed(&mut self, error: String) {
        self.outputs.stats.lock().failed_flushes += 1;
        let (attempt, retrying) = self.flush.failed(Instant::now());
        warn!(attempt, retrying, error = %error, "Flush failed");
        self.emit(DocumentEvent::FlushFailed {
            attempt,
            error: error.clone(),
        });

        let status = if retrying {
            SaveStatus::Saving
        } else {
            SaveStatus::Error
        };
        let last_error = error.clone();
        self.outputs.save.send_modify(|save| {
            save.status = status;
            save.last_error = Some(last_error);
        });

        if !retrying {
            error!(attempts = attempt, "Giving up on saving until the next edit");
            self.emit(DocumentEvent::SaveFailed {
                error: error.clone(),
            });
            for (_, reply) in self.flush_waiters.drain(..) {
                let _ = reply.send(Err(SyncError::SaveFailed(error.clone())));
            }
        }
    }

    fn resolve_waiters(&mut self) {
        if !self.hydrated {
            return;
        }
        let flushed = self.flushed_generation;
        let revision = self.revision;
        let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.flush_waiters)
            .into_iter()
            .partition(|(target, _)| *target <= flushed);
        self.flush_waiters = waiting;
        for (_, reply) in done {
            let _ = reply.send(Ok(revision));
        }
    }

    // --- cache and snapshots -----------------------------------------------

    fn write_cache(&self) {
        let Some(cache) = &self.cache_tx else {
            return;
        };
        let state = self.document.lock().serialize();
        match state {
            Ok(state) => {
                cache.send_replace(Some(CacheEntry {
                    key: self.key.clone(),
                    state,
                    locally_modified: self.dirty(),
                    updated_at: self.services.clock.now(),
                }));
            }
            Err(e) => warn!(error = %e, "Failed to encode state for the cache"),
        }
    }

    fn count_operation(&mut self) {
        if let Some(label) = self.snapshots.record_operation() {
            if self.hydrated {
                self.start_snapshot(label, None);
            }
        }
    }

    fn snapshot_deadline(&self) -> Option<Instant> {
        if !self.hydrated {
            return None;
        }
        self.snapshots.deadline()
    }

    fn snapshot_due(&mut self) {
        if let Some(label) = self.snapshots.on_deadline(Instant::now()) {
            self.start_snapshot(label, None);
        }
    }

    fn start_snapshot(
        &mut self,
        label: String,
        reply: Option<oneshot::Sender<SyncResult<SnapshotRecord>>>,
    ) {
        self.snapshots.checkpoint_taken(Instant::now());

        let payload = self.document.lock().serialize();
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                warn!(label = %label, error = %e, "Snapshot could not encode state");
                self.emit(DocumentEvent::SnapshotFailed {
                    label,
                    error: e.to_string(),
                });
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e.into()));
                }
                return;
            }
        };

        let record = checkpoint(
            &self.key,
            payload,
            label,
            self.participant,
            self.services.clock.now(),
        );
        let store = self.services.snapshot_store.clone();
        self.snapshot_jobs.spawn(async move {
            let label = record.label.clone();
            SnapshotJob {
                label,
                result: append_snapshot(store, record).await,
                reply,
            }
        });
    }

    fn snapshot_finished(&mut self, joined: Result<SnapshotJob, JoinError>) {
        let job = match joined {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Snapshot task stopped abnormally");
                return;
            }
        };

        let result = match job.result {
            Ok(record) => {
                self.outputs.stats.lock().snapshots += 1;
                info!(id = %record.id, label = %record.label, "Snapshot created");
                self.emit(DocumentEvent::SnapshotCreated {
                    id: record.id,
                    label: record.label.clone(),
                });
                Ok(record)
            }
            Err(e) => {
                warn!(label = %job.label, error = %e, "Snapshot failed");
                self.emit(DocumentEvent::SnapshotFailed {
                    label: job.label,
                    error: e.to_string(),
                });
                Err(SyncError::from(e))
            }
        };
        if let Some(reply) = job.reply {
            let _ = reply.send(result);
        }
    }

    // --- outputs ------------------------------------------------------------

    fn transition(&mut self, next: ProviderState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            debug!(from = ?self.state, to = ?next, "Ignoring invalid transition");
            return;
        }

        debug!(from = ?self.state, to = ?next, "State transition");
        self.state = next;
        self.outputs.state.send_replace(next);
        if let Some(status) = next.connection_status() {
            self.outputs.connection.send_replace(status);
        }
        self.emit(DocumentEvent::StateChanged(next));
    }

    fn emit(&self, event: DocumentEvent) {
        // No subscribers is fine.
        let _ = self.outputs.events.send(event);
    }
}

async fn join_flight(flight: &mut Option<JoinHandle<FlushOutcome>>) -> FlushOutcome {
    let Some(handle) = flight else {
        return pending().await;
    };
    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => FlushOutcome::Failed(StorageError::backend(e.to_string())),
    };
    *flight = None;
    outcome
}
