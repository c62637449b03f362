//! Error types for backstream

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using BackstreamError
pub type Result<T> = std::result::Result<T, BackstreamError>;

/// Main error type for backstream core operations
#[derive(Debug, Error)]
pub enum BackstreamError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Schedule-related errors
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// File extension does not map to a known format
    #[error("Unsupported configuration file {0}: expected .toml, .json, .yaml or .yml")]
    UnsupportedFormat(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Missing required field
    #[error("Missing required configuration field: {0}")]
    MissingField(String),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Schedule-related errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The expression is not a valid cron expression or shortcut
    #[error("invalid schedule expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}

impl BackstreamError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidValue`]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}
