//! Transfer configuration.
//!
//! Stored as camelCase JSON. A missing file means defaults; a file that does
//! not parse is logged and replaced by defaults. Values are validated either
//! way.

use std::path::Path;

use endpoint_transfer::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use serde::{Deserialize, Serialize};

/// Errors produced while loading or saving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferConfig {
    /// Chunk size used when a transfer does not ask for one.
    pub default_chunk_size: usize,
    /// Upper bound for any requested chunk size.
    pub max_chunk_size: usize,
    /// Capacity of entry event channels.
    pub event_buffer: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            event_buffer: 256,
        }
    }
}

impl TransferConfig {
    /// Loads configuration from `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str::<Self>(&content) {
                Ok(file) => config = file,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to parse transfer config, using defaults"
                    );
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Writes configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "transfer configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chunk_size == 0 || self.max_chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "maxChunkSize must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.max_chunk_size
            )));
        }
        if self.default_chunk_size == 0 || self.default_chunk_size > self.max_chunk_size {
            return Err(ConfigError::Invalid(format!(
                "defaultChunkSize must be between 1 and {}, got {}",
                self.max_chunk_size, self.default_chunk_size
            )));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("eventBuffer must be at least 1".into()));
        }
        Ok(())
    }
}
