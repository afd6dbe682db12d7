//! Durable flush scheduling.
//!
//! A flush is due `debounce` after the last local edit, but never later than
//! `max_wait` after the first edit that is not yet flushed. Failed attempts
//! are retried with backoff until `max_attempts` is reached; after that
//! nothing is retried until the next edit or manual save.

use crate::backoff::Backoff;
use std::sync::Arc;
use tandem_config::FlushConfig;
use tandem_core::{DurableStateRecord, StateStore, StorageError, UpsertOutcome};
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct FlushScheduler {
    config: FlushConfig,
    backoff: Backoff,
    dirty_since: Option<Instant>,
    debounce_at: Option<Instant>,
    retry_at: Option<Instant>,
    attempt: u32,
    stale_rebases: u32,
}

impl FlushScheduler {
    pub(crate) fn new(config: FlushConfig) -> Self {
        Self {
            backoff: Backoff::for_flush(&config),
            config,
            dirty_since: None,
            debounce_at: None,
            retry_at: None,
            attempt: 0,
            stale_rebases: 0,
        }
    }

    /// A local edit happened at `now`.
    pub(crate) fn note_edit(&mut self, now: Instant) {
        if self.exhausted() {
            self.restart();
        }
        let first = *self.dirty_since.get_or_insert(now);
        let debounced = now + self.config.debounce();
        let capped = first + self.config.max_wait();
        self.debounce_at = Some(debounced.min(capped));
    }

    /// Flush as soon as possible, starting a fresh attempt sequence if the
    /// previous one gave up.
    pub(crate) fn request_now(&mut self, now: Instant) {
        if self.exhausted() {
            self.restart();
        }
        self.retry_at = None;
        self.debounce_at = Some(now);
    }

    /// When the next flush should start, if one is wanted.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        if self.exhausted() {
            return None;
        }
        self.retry_at.or(self.debounce_at)
    }

    /// A flush covering every edit so far was spawned.
    pub(crate) fn started(&mut self) {
        self.dirty_since = None;
        self.debounce_at = None;
        self.retry_at = None;
    }

    pub(crate) fn succeeded(&mut self) {
        self.attempt = 0;
        self.stale_rebases = 0;
        self.backoff.reset();
    }

    /// Record a failed attempt. Returns the attempt number and whether a retry
    /// was scheduled.
    pub(crate) fn failed(&mut self, now: Instant) -> (u32, bool) {
        self.attempt += 1;
        self.stale_rebases = 0;
        if self.attempt < self.config.max_attempts {
            self.retry_at = Some(now + self.backoff.next_delay());
            (self.attempt, true)
        } else {
            self.retry_at = None;
            self.debounce_at = None;
            (self.attempt, false)
        }
    }

    /// A write lost to a newer revision. Returns whether another immediate
    /// rebase is allowed within this attempt.
    pub(crate) fn rebase(&mut self) -> bool {
        self.stale_rebases += 1;
        self.stale_rebases <= self.config.stale_retries
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }

    fn restart(&mut self) {
        self.attempt = 0;
        self.stale_rebases = 0;
        self.backoff.reset();
    }
}

/// Result of one conditional write.
#[derive(Debug)]
pub(crate) enum FlushOutcome {
    Written {
        revision: u64,
    },
    /// A newer record exists; it is returned so it can be merged.
    Stale {
        current_revision: u64,
        current: Option<DurableStateRecord>,
    },
    Failed(StorageError),
}

pub(crate) async fn write_state(
    store: Arc<dyn StateStore>,
    record: DurableStateRecord,
) -> FlushOutcome {
    match store.upsert(record.clone()).await {
        Ok(UpsertOutcome::Written { revision }) => FlushOutcome::Written { revision },
        Ok(UpsertOutcome::Stale { current_revision }) => {
            let current = store.load(&record.key).await.ok().flatten();
            FlushOutcome::Stale {
                current_revision,
                current,
            }
        }
        Err(e) => FlushOutcome::Failed(e),
    }
}
