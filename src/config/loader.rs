//! Configuration loading from disk.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::RelayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// A missing file is not an error: the defaults are used instead. An empty
/// file is treated the same way.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            String::new()
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    let config: RelayConfig = toml::from_str(&content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}
