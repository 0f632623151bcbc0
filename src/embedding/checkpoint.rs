use super::provider::CHECKPOINT_FILES;
use super::{EmbeddingProvider, FastEmbedProvider};
use crate::error::{IndexerError, Result};
use std::path::Path;
use std::sync::Arc;

/// Resolves a checkpoint reference into a ready encoder
pub trait CheckpointLoader: Send + Sync {
    fn load(&self, checkpoint: &Path) -> Result<Arc<dyn EmbeddingProvider>>;
}

/// Loads checkpoints with fastembed.
///
/// A directory holding an exported ONNX model and its tokenizer files is
/// loaded directly; a bare built-in model name such as `bge-small-en-v1.5`
/// is loaded (and downloaded if needed) by name.
#[derive(Debug, Default, Clone, Copy)]
pub struct FastEmbedLoader;

impl CheckpointLoader for FastEmbedLoader {
    fn load(&self, checkpoint: &Path) -> Result<Arc<dyn EmbeddingProvider>> {
        if checkpoint.is_dir() {
            let missing: Vec<&str> = CHECKPOINT_FILES
                .iter()
                .copied()
                .filter(|f| !checkpoint.join(f).is_file())
                .collect();
            if !missing.is_empty() {
                return Err(IndexerError::Input(format!(
                    "Checkpoint {} is missing {}",
                    checkpoint.display(),
                    missing.join(", ")
                )));
            }

            let provider = FastEmbedProvider::from_checkpoint_dir(checkpoint)
                .map_err(|e| IndexerError::Input(format!("Unreadable checkpoint: {}", e)))?;
            return Ok(Arc::new(provider));
        }

        let name = checkpoint.to_string_lossy();
        if FastEmbedProvider::builtin(&name).is_some() {
            let provider = FastEmbedProvider::new(&name)?;
            return Ok(Arc::new(provider));
        }

        Err(IndexerError::Input(format!(
            "Checkpoint not found: {}",
            checkpoint.display()
        )))
    }
}
