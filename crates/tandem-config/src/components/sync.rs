//! Sync engine configuration
//!
//! Timing policies for the sync provider: when to flush, how to retry, how
//! to reconnect, when to checkpoint and how presence ages out.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Durable flush policy
    pub flush: FlushConfig,
    /// Channel reconnect backoff
    pub reconnect: ReconnectConfig,
    /// Automatic checkpoints
    pub snapshot: SnapshotConfig,
    /// Presence heartbeat and expiry
    pub presence: PresenceConfig,
    /// Capacity of each document's event stream; slow subscribers lag
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            flush: FlushConfig::default(),
            reconnect: ReconnectConfig::default(),
            snapshot: SnapshotConfig::default(),
            presence: PresenceConfig::default(),
            event_buffer: 256,
        }
    }
}

impl SyncConfig {
    /// Check cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.flush.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "sync.flush.max_attempts",
                "must be at least 1",
            ));
        }
        if self.flush.max_wait_ms < self.flush.debounce_ms {
            return Err(ConfigError::invalid(
                "sync.flush.max_wait_ms",
                "must not be shorter than debounce_ms",
            ));
        }
        if self.reconnect.base_ms == 0 || self.reconnect.max_ms < self.reconnect.base_ms {
            return Err(ConfigError::invalid(
                "sync.reconnect",
                "base_ms must be non-zero and not exceed max_ms",
            ));
        }
        if self.presence.heartbeat_ms == 0 {
            return Err(ConfigError::invalid(
                "sync.presence.heartbeat_ms",
                "must be non-zero",
            ));
        }
        if self.presence.ttl_ms == 0 {
            return Err(ConfigError::invalid("sync.presence.ttl_ms", "must be non-zero"));
        }
        if self.presence.ttl_ms <= self.presence.heartbeat_ms {
            return Err(ConfigError::invalid(
                "sync.presence.ttl_ms",
                format!(
                    "{} must exceed heartbeat_ms ({})",
                    self.presence.ttl_ms, self.presence.heartbeat_ms
                ),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::invalid("sync.event_buffer", "must be non-zero"));
        }
        Ok(())
    }
}

/// Debounced durable flush
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Quiet period after the last edit before flushing
    pub debounce_ms: u64,
    /// Upper bound from the first unflushed edit, so continuous typing still saves
    pub max_wait_ms: u64,
    /// Attempts per flush before reporting "save failed"
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub retry_base_ms: u64,
    /// Retry delay cap
    pub retry_max_ms: u64,
    /// Consecutive stale-revision rebases allowed within one attempt
    pub stale_retries: u32,
    /// Attempt a final flush on detach when edits are unsaved
    pub flush_on_detach: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2_000,
            max_wait_ms: 10_000,
            max_attempts: 3,
            retry_base_ms: 500,
            retry_max_ms: 8_000,
            stale_retries: 3,
            flush_on_detach: true,
        }
    }
}

impl FlushConfig {
    #[allow(missing_docs)]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[allow(missing_docs)]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    #[allow(missing_docs)]
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    #[allow(missing_docs)]
    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

/// Capped exponential reconnect backoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First delay
    pub base_ms: u64,
    /// Delay cap
    pub max_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: 250,
            max_ms: 10_000,
        }
    }
}

impl ReconnectConfig {
    #[allow(missing_docs)]
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    #[allow(missing_docs)]
    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

/// Automatic checkpoints; whichever threshold is reached first wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Take automatic checkpoints at all
    pub enabled: bool,
    /// Time-based checkpoint interval
    pub interval_secs: u64,
    /// Merged frames per operation-count checkpoint
    pub max_operations: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            max_operations: 200,
        }
    }
}

impl SnapshotConfig {
    #[allow(missing_docs)]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Presence heartbeat and expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// How often a participant re-announces itself
    pub heartbeat_ms: u64,
    /// Entries older than this are not online
    pub ttl_ms: u64,
    /// Typing clears after this long without keystrokes
    pub typing_timeout_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 5_000,
            ttl_ms: 15_000,
            typing_timeout_ms: 1_000,
        }
    }
}

impl PresenceConfig {
    #[allow(missing_docs)]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    #[allow(missing_docs)]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    #[allow(missing_docs)]
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flush.debounce(), Duration::from_secs(2));
        assert_eq!(config.presence.ttl(), Duration::from_secs(15));
        assert_eq!(config.snapshot.interval(), Duration::from_secs(300));
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = SyncConfig::default();
        config.flush.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn ttl_must_exceed_heartbeat() {
        let mut config = SyncConfig::default();
        config.presence.ttl_ms = config.presence.heartbeat_ms;
        assert!(config.validate().is_err());

        config.presence.heartbeat_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_wait_shorter_than_debounce_rejected() {
        let mut config = SyncConfig::default();
        config.flush.max_wait_ms = 100;
        assert!(config.validate().is_err());
    }
}
