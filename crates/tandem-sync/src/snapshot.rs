//! Snapshot manager.
//!
//! Decides when an automatic checkpoint is due and writes checkpoints to the
//! append-only snapshot store. Two thresholds run side by side, whichever is
//! reached first: a number of merged frames, and a time interval that only
//! fires when something was merged since the last checkpoint.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tandem_config::SnapshotConfig;
use tandem_core::{
    DocumentKey, ParticipantId, SnapshotId, SnapshotRecord, SnapshotStore, StorageResult,
};
use tokio::time::Instant;
use tracing::debug;

/// Label used for checkpoints requested by the user.
pub const MANUAL_LABEL: &str = "manual save";

#[derive(Debug)]
pub struct SnapshotManager {
    config: SnapshotConfig,
    operations: u64,
    due_at: Instant,
}

impl SnapshotManager {
    pub fn new(config: SnapshotConfig, now: Instant) -> Self {
        let due_at = now + config.interval();
        Self {
            config,
            operations: 0,
            due_at,
        }
    }

    /// Frames merged since the last checkpoint.
    pub fn pending_operations(&self) -> u64 {
        self.operations
    }

    /// Count one merged frame. Returns a label when the operation threshold
    /// is reached.
    pub fn record_operation(&mut self) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        self.operations += 1;
        (self.config.max_operations > 0 && self.operations >= self.config.max_operations)
            .then(|| format!("{}-operation checkpoint", self.operations))
    }

    /// When the time threshold fires next.
    pub fn deadline(&self) -> Option<Instant> {
        (self.config.enabled && self.config.interval_secs > 0).then_some(self.due_at)
    }

    /// The time threshold fired. Returns a label when there is something new
    /// to checkpoint; otherwise waits another interval.
    pub fn on_deadline(&mut self, now: Instant) -> Option<String> {
        if self.operations == 0 {
            self.due_at = now + self.config.interval();
            return None;
        }
        let minutes = (self.config.interval_secs / 60).max(1);
        Some(format!("{minutes}-minute checkpoint"))
    }

    /// A checkpoint was taken (automatic or manual); both thresholds restart.
    pub fn checkpoint_taken(&mut self, now: Instant) {
        self.operations = 0;
        self.due_at = now + self.config.interval();
    }
}

/// Build the record for a checkpoint of `payload`.
pub fn checkpoint(
    key: &DocumentKey,
    payload: Vec<u8>,
    label: impl Into<String>,
    created_by: ParticipantId,
    created_at: DateTime<Utc>,
) -> SnapshotRecord {
    SnapshotRecord {
        id: SnapshotId::new(),
        key: key.clone(),
        payload,
        label: label.into(),
        created_at,
        created_by,
    }
}

/// Append a checkpoint to the store and hand the record back.
pub async fn append_snapshot(
    store: Arc<dyn SnapshotStore>,
    record: SnapshotRecord,
) -> StorageResult<SnapshotRecord> {
    store.append(record.clone()).await?;
    debug!(document = %record.key, id = %record.id, label = %record.label, "Snapshot created");
    Ok(record)
}
