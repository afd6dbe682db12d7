//! Shared fixtures for sync integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tandem_config::SyncConfig;
use tandem_core::{
    DocumentKey, ManualClock, MemoryCache, MemorySnapshotStore, MemoryStateStore, ParticipantId,
    ReplicatedDocument, YrsDocument,
};
use tandem_sync::{DocumentEvent, SyncProvider, SyncServices};
use tokio::sync::broadcast;

/// The document every scenario edits.
pub fn key() -> DocumentKey {
    DocumentKey::new("meeting-42", "2026")
}

/// Short timers so scenarios settle quickly on the paused clock.
pub fn fast_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.flush.debounce_ms = 100;
    config.flush.max_wait_ms = 1_000;
    config.flush.retry_base_ms = 50;
    config.flush.retry_max_ms = 200;
    config.reconnect.base_ms = 50;
    config.reconnect.max_ms = 400;
    config.snapshot.enabled = false;
    config
}

/// Backends shared by every participant, like one server deployment.
pub struct World {
    pub hub: tandem_sync::MemoryHub,
    pub state_store: Arc<MemoryStateStore>,
    pub snapshots: Arc<MemorySnapshotStore>,
    pub clock: ManualClock,
}

impl World {
    pub fn new() -> Self {
        Self {
            hub: tandem_sync::MemoryHub::new(),
            state_store: Arc::new(MemoryStateStore::new()),
            snapshots: Arc::new(MemorySnapshotStore::new()),
            clock: ManualClock::default(),
        }
    }

    /// A provider for `participant` on its own device cache.
    pub fn provider_with_cache(
        &self,
        participant: ParticipantId,
        cache: Arc<MemoryCache>,
        config: SyncConfig,
    ) -> SyncProvider {
        let services = SyncServices::new(
            self.state_store.clone(),
            self.snapshots.clone(),
            cache,
            Arc::new(self.hub.clone()),
        )
        .with_clock(Arc::new(self.clock.clone()));
        SyncProvider::new(participant, services, config)
    }

    pub fn provider(&self, config: SyncConfig) -> SyncProvider {
        self.provider_with_cache(ParticipantId::new(), Arc::new(MemoryCache::new()), config)
    }

    /// Content of the durable record, decoded as text.
    pub fn durable_content(&self) -> Option<String> {
        self.state_store
            .get(&key())
            .map(|record| decode(&record.state))
    }
}

/// Render an encoded yrs state.
pub fn decode(state: &[u8]) -> String {
    YrsDocument::from_state(state)
        .map(|doc| doc.content())
        .unwrap_or_default()
}

/// Poll `check` on the (possibly paused) clock until it holds.
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..1_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Receive events until one matches.
pub async fn next_matching<F>(
    events: &mut broadcast::Receiver<DocumentEvent>,
    what: &str,
    matches: F,
) -> DocumentEvent
where
    F: Fn(&DocumentEvent) -> bool,
{
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event stream closed while waiting for {what}")
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}
