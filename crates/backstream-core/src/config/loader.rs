//! Configuration loading

use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::types::Config;
use super::validation::validate_config;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Detect the format from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    /// Parse configuration text in this format
    pub fn parse(self, content: &str) -> std::result::Result<Config, ConfigError> {
        let config = match self {
            Self::Toml => toml::from_str(content)?,
            Self::Json => serde_json::from_str(content)?,
            Self::Yaml => serde_yaml::from_str(content)?,
        };
        Ok(config)
    }
}

/// Load and validate configuration from a file
pub fn load_config(path: &Path) -> Result<Config> {
    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
    info!(path = %path.display(), format = ?format, "loading config");

    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()).into());
    }

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config = format.parse(&content)?;

    validate_config(&config)?;
    debug!(path = %path.display(), tasks = config.len(), "config loaded and validated");
    Ok(config)
}
