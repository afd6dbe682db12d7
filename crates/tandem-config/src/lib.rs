//! # Tandem Configuration
//!
//! Typed configuration for the Tandem sync engine and relay, loaded in layers:
//!
//! 1. Built-in defaults
//! 2. Global config (`~/.config/tandem/config.toml`)
//! 3. An explicit file (`--config`)
//! 4. `TANDEM_*` environment overrides
//!
//! Files may be TOML, YAML (feature `yaml`) or JSON, chosen by extension.
//! Tables merge deeply, so a file only needs the keys it changes.
//!
//! ```rust,no_run
//! use tandem_config::ConfigLoader;
//!
//! let config = ConfigLoader::new().with_file("tandem.toml").load()?;
//! println!("debounce: {:?}", config.sync.flush.debounce());
//! # Ok::<(), tandem_config::ConfigError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod components;
mod error;
mod loader;

pub use components::*;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    /// Sync provider, snapshot and presence timing
    pub sync: SyncConfig,
    /// On-device storage
    pub storage: StorageConfig,
    /// Relay server
    pub relay: RelayConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl TandemConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        self.sync.validate()?;
        self.relay.validate()?;
        Ok(())
    }
}
