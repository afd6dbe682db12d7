//! Write-behind cache writer.
//!
//! The actor publishes the newest entry into a watch slot; this task writes
//! whatever is newest when it gets to it, so bursts coalesce into one write.
//! Dropping the sender drains the last unseen entry and stops the task.

use std::sync::Arc;
use tandem_core::{CacheEntry, LocalCache};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

pub(crate) fn spawn_cache_writer(
    cache: Arc<dyn LocalCache>,
    mut pending: watch::Receiver<Option<CacheEntry>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while pending.changed().await.is_ok() {
            let Some(entry) = pending.borrow_and_update().clone() else {
                continue;
            };
            let key = entry.key.clone();
            match cache.store(entry).await {
                Ok(()) => trace!(document = %key, "Cache entry written"),
                Err(e) => warn!(document = %key, error = %e, "Failed to write cache entry"),
            }
        }
    })
}
