//! Settings file handling
//!
//! Settings are optional: every section and key has a default, and command
//! line flags override whatever the file provides.

use crate::error::{IndexerError, Result};
use serde::Deserialize;
use std::path::Path;

mod validator;

pub use validator::ConfigValidator;

/// Index name used when none is given
pub const DEFAULT_INDEX_NAME: &str = "default";

/// Truncation threshold the driver passes when the caller gives none.
/// Well above typical encoder defaults so domain passages are not cut short.
pub const DEFAULT_MAX_PASSAGE_LENGTH: usize = 1000;

/// Main settings structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub run: RunSettings,
    pub index: IndexSettings,
    pub embedding: EmbeddingSettings,
}

/// Run scope settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Number of cooperating encoder workers
    pub nranks: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self { nranks: 1 }
    }
}

/// Index construction settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub max_passage_length: usize,
    pub quantization_bits: u8,
    pub index_name: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            max_passage_length: DEFAULT_MAX_PASSAGE_LENGTH,
            quantization_bits: 2,
            index_name: DEFAULT_INDEX_NAME.to_string(),
        }
    }
}

/// Encoder batching settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Windows embedded per encoder call
    pub batch_size: usize,
    /// Tokens per embedded window
    pub window_tokens: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            window_tokens: 32,
        }
    }
}

impl Settings {
    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IndexerError::Configuration(format!(
                "Settings file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path).map_err(|e| IndexerError::Io {
            source: e,
            context: format!("Failed to read settings file: {:?}", path),
        })?;
        let settings: Settings = toml::from_str(&content)?;

        ConfigValidator::validate(&settings)?;

        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load from `path` when given, otherwise fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
