use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A config file could not be read
    #[error("Failed to read {path}: {message}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// A config file could not be parsed
    #[error("Failed to parse {path}: {message}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// The file extension does not name a supported format
    #[error("Unsupported config format: {path}")]
    UnsupportedFormat {
        /// Offending file
        path: PathBuf,
    },

    /// A value is out of range or inconsistent with another
    #[error("Invalid value for {field}: {value}")]
    InvalidValue {
        /// Dotted key of the field
        field: String,
        /// Why it was rejected
        value: String,
    },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }
}
