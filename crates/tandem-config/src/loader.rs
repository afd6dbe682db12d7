//! Layered configuration loading
//!
//! Resolution order, later layers winning:
//! 1. Built-in defaults
//! 2. Global config (`~/.config/tandem/config.toml`), if present
//! 3. An explicit file, which must exist
//! 4. `TANDEM_*` environment variables

use crate::{ConfigError, ConfigResult, TandemConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variables understood by [`ConfigLoader`].
const ENV_LOG_LEVEL: &str = "TANDEM_LOG_LEVEL";
const ENV_RELAY_HOST: &str = "TANDEM_RELAY_HOST";
const ENV_RELAY_PORT: &str = "TANDEM_RELAY_PORT";
const ENV_DATABASE_PATH: &str = "TANDEM_DATABASE_PATH";

/// Builds a [`TandemConfig`] from defaults, files and the environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    global: Option<PathBuf>,
    explicit: Option<PathBuf>,
    use_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader with the global config file and environment overrides enabled.
    pub fn new() -> Self {
        Self {
            global: Self::global_config_path(),
            explicit: None,
            use_env: true,
        }
    }

    /// Default location of the global config file.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tandem").join("config.toml"))
    }

    /// Add an explicit config file on top of the global one.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    /// Use a different global config file (tests, portable installs).
    pub fn with_global_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.global = Some(path.into());
        self
    }

    /// Skip the global config file.
    pub fn without_global(mut self) -> Self {
        self.global = None;
        self
    }

    /// Skip `TANDEM_*` environment overrides.
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Resolve and validate the configuration, reading the process environment.
    pub fn load(&self) -> ConfigResult<TandemConfig> {
        self.load_with_env(|name| std::env::var(name).ok())
    }

    /// Resolve and validate the configuration with a custom variable lookup.
    pub fn load_with_env<F>(&self, lookup: F) -> ConfigResult<TandemConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = toml::Value::try_from(TandemConfig::default()).map_err(|e| {
            ConfigError::Parse {
                path: PathBuf::from("<defaults>"),
                message: e.to_string(),
            }
        })?;

        if let Some(global) = &self.global {
            if global.exists() {
                debug!(path = %global.display(), "Loading global config");
                merge_toml_values(&mut merged, &read_file(global)?);
            }
        }

        if let Some(explicit) = &self.explicit {
            debug!(path = %explicit.display(), "Loading config file");
            merge_toml_values(&mut merged, &read_file(explicit)?);
        }

        let mut config: TandemConfig = merged.try_into().map_err(|e: toml::de::Error| {
            ConfigError::Parse {
                path: self
                    .explicit
                    .clone()
                    .or_else(|| self.global.clone())
                    .unwrap_or_else(|| PathBuf::from("<defaults>")),
                message: e.to_string(),
            }
        })?;

        if self.use_env {
            apply_env_overrides(&mut config, lookup)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn apply_env_overrides<F>(config: &mut TandemConfig, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.logging.level = level;
    }
    if let Some(host) = lookup(ENV_RELAY_HOST) {
        config.relay.host = host;
    }
    if let Some(port) = lookup(ENV_RELAY_PORT) {
        config.relay.port = port
            .parse()
            .map_err(|_| ConfigError::invalid(ENV_RELAY_PORT, port.clone()))?;
    }
    if let Some(path) = lookup(ENV_DATABASE_PATH) {
        config.storage.database_path = PathBuf::from(path);
    }
    Ok(())
}

/// Read a config file into a TOML value, whatever its on-disk format.
fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("toml") => toml::from_str(&contents).map_err(|e| parse_err(e.to_string())),
        Some("json") => {
            let value: serde_json::Value =
                serde_json::from_str(&contents).map_err(|e| parse_err(e.to_string()))?;
            toml::Value::try_from(value).map_err(|e| parse_err(e.to_string()))
        }
        #[cfg(feature = "yaml")]
        Some("yaml") | Some("yml") => {
            let value: serde_yaml::Value =
                serde_yaml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?;
            toml::Value::try_from(value).map_err(|e| parse_err(e.to_string()))
        }
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Deep-merge `source` into `target`.
///
/// Tables merge key by key, arrays append, anything else is replaced.
fn merge_toml_values(target: &mut toml::Value, source: &toml::Value) {
    match (target, source) {
        (toml::Value::Table(target_table), toml::Value::Table(source_table)) => {
            for (key, source_value) in source_table {
                if let Some(target_value) = target_table.get_mut(key) {
                    merge_toml_values(target_value, source_value);
                } else {
                    target_table.insert(key.clone(), source_value.clone());
                }
            }
        }
        (toml::Value::Array(target_array), toml::Value::Array(source_array)) => {
            target_array.extend(source_array.iter().cloned());
        }
        (target, source) => {
            *target = source.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn merge_overrides_scalars_and_keeps_siblings() {
        let mut base: toml::Value = toml::from_str(
            r#"
[sync.flush]
debounce_ms = 2000
max_attempts = 3
"#,
        )
        .unwrap();
        let layer: toml::Value = toml::from_str(
            r#"
[sync.flush]
debounce_ms = 500
"#,
        )
        .unwrap();

        merge_toml_values(&mut base, &layer);
        let flush = &base["sync"]["flush"];
        assert_eq!(flush["debounce_ms"].as_integer(), Some(500));
        assert_eq!(flush["max_attempts"].as_integer(), Some(3));
    }

    #[test]
    fn merge_appends_arrays() {
        let mut base: toml::Value = toml::from_str(r#"denied = ["a/"]"#).unwrap();
        let layer: toml::Value = toml::from_str(r#"denied = ["b/"]"#).unwrap();
        merge_toml_values(&mut base, &layer);
        assert_eq!(base["denied"].as_array().map(|a| a.len()), Some(2));
    }

    #[test]
    fn defaults_load_without_files() {
        let config = ConfigLoader::new()
            .without_global()
            .load_with_env(no_env)
            .unwrap();
        assert_eq!(config, TandemConfig::default());
    }

    #[test]
    fn env_overrides_apply_last() {
        let config = ConfigLoader::new()
            .without_global()
            .load_with_env(|name| match name {
                "TANDEM_RELAY_PORT" => Some("9000".to_string()),
                "TANDEM_LOG_LEVEL" => Some("debug".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.relay.port, 9000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn invalid_port_in_env_is_rejected() {
        let result = ConfigLoader::new()
            .without_global()
            .load_with_env(|name| (name == "TANDEM_RELAY_PORT").then(|| "not-a-port".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn env_ignored_when_disabled() {
        let config = ConfigLoader::new()
            .without_global()
            .without_env()
            .load_with_env(|_| Some("debug".to_string()))
            .unwrap();
        assert_eq!(config.logging.level, "info");
    }
}
