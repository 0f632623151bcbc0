use crate::embedding::EmbeddingError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for indexing runs
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Bad paths or parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Settings file validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Index already present and overwrite was not requested
    #[error("Index already exists at {path} (pass --overwrite to replace it)")]
    AlreadyExists { path: PathBuf },

    /// Malformed or missing collection, unreadable checkpoint
    #[error("Input error: {0}")]
    Input(String),

    /// Disk or memory exhaustion while building
    #[error("Resource exhausted: {context}: {source}")]
    Resource {
        source: std::io::Error,
        context: String,
    },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Encoder failures
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IndexerError {
    /// Wrap an IO error, promoting out-of-space and out-of-memory conditions
    /// to [`IndexerError::Resource`].
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        let context = context.into();
        if is_exhaustion(&source) {
            IndexerError::Resource { source, context }
        } else {
            IndexerError::Io { source, context }
        }
    }

    /// Process exit code for this error category
    pub fn exit_code(&self) -> u8 {
        match self {
            IndexerError::Configuration(_)
            | IndexerError::ConfigValidation { .. }
            | IndexerError::Toml(_) => 2,
            IndexerError::Input(_) => 3,
            IndexerError::AlreadyExists { .. } => 4,
            IndexerError::Resource { .. } => 5,
            _ => 1,
        }
    }
}

fn is_exhaustion(err: &std::io::Error) -> bool {
    use nix::errno::Errno;

    if err.kind() == std::io::ErrorKind::OutOfMemory {
        return true;
    }
    matches!(
        err.raw_os_error().map(Errno::from_raw),
        Some(Errno::ENOSPC | Errno::EDQUOT | Errno::ENOMEM)
    )
}

/// Settings validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the settings key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for indexing operations
pub type Result<T> = std::result::Result<T, IndexerError>;
