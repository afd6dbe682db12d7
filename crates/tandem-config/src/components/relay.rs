//! Relay server configuration

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// Relay server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Topic prefixes that are refused with 403
    pub denied_topics: Vec<String>,
    /// Outbound queue per subscriber before it is considered lagging
    pub subscriber_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4455,
            denied_topics: Vec::new(),
            subscriber_buffer: 1024,
        }
    }
}

impl RelayConfig {
    /// `host:port` for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check that the relay can start with these settings.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("relay.host", "must not be empty"));
        }
        if self.subscriber_buffer == 0 {
            return Err(ConfigError::invalid(
                "relay.subscriber_buffer",
                "must be non-zero",
            ));
        }
        Ok(())
    }

    /// Whether `topic` falls under a denied prefix.
    pub fn is_denied(&self, topic: &str) -> bool {
        self.denied_topics
            .iter()
            .any(|prefix| !prefix.is_empty() && topic.starts_with(prefix.as_str()))
    }
}
