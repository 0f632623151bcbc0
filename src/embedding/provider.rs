/// Embedding provider trait and FastEmbed implementation
use fastembed::{
    EmbeddingModel, InitOptions, InitOptionsUserDefined, TextEmbedding, TokenizerFiles,
    UserDefinedEmbeddingModel,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// Allows abstraction over different embedding backends. Implementations
/// must be shareable across encoder workers.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for multiple texts, one per input, in order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Files a local checkpoint directory must contain
pub(crate) const CHECKPOINT_FILES: [&str; 5] = [
    "model.onnx",
    "tokenizer.json",
    "config.json",
    "special_tokens_map.json",
    "tokenizer_config.json",
];

/// FastEmbed provider for local embedding generation
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Create a provider for one of the built-in fastembed models
    ///
    /// **Important**: built-in models are downloaded on first use to the
    /// fastembed cache directory.
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (embedding_model, dimension) =
            Self::builtin(model_name).ok_or_else(|| {
                EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: {}",
                    model_name,
                    Self::SUPPORTED.join(", ")
                ))
            })?;

        tracing::info!(
            "Initializing embedding model: {} ({}D, downloaded if not cached)",
            model_name,
            dimension
        );

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }

    /// Load an exported ONNX checkpoint from a local directory
    pub fn from_checkpoint_dir(dir: &Path) -> Result<Self, EmbeddingError> {
        let read = |name: &str| {
            std::fs::read(dir.join(name)).map_err(|e| {
                EmbeddingError::InitializationError(format!(
                    "Cannot read {}: {}",
                    dir.join(name).display(),
                    e
                ))
            })
        };

        let onnx_file = read(CHECKPOINT_FILES[0])?;
        let tokenizer_files = TokenizerFiles {
            tokenizer_file: read(CHECKPOINT_FILES[1])?,
            config_file: read(CHECKPOINT_FILES[2])?,
            special_tokens_map_file: read(CHECKPOINT_FILES[3])?,
            tokenizer_config_file: read(CHECKPOINT_FILES[4])?,
        };

        tracing::info!("Loading checkpoint from {}", dir.display());

        let model = TextEmbedding::try_new_from_user_defined(
            UserDefinedEmbeddingModel::new(onnx_file, tokenizer_files),
            InitOptionsUserDefined::default(),
        )
        .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        // Exported checkpoints do not declare their width; measure it
        let sample = model
            .embed(vec!["dimension check".to_string()], None)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;
        let dimension = sample.first().map(Vec::len).unwrap_or(0);
        if dimension == 0 {
            return Err(EmbeddingError::InitializationError(
                "Checkpoint produced an empty embedding".to_string(),
            ));
        }

        Ok(Self {
            model: Arc::new(model),
            model_name: dir.display().to_string(),
            dimension,
        })
    }

    const SUPPORTED: [&'static str; 3] =
        ["all-MiniLM-L6-v2", "bge-small-en-v1.5", "bge-base-en-v1.5"];

    pub(crate) fn builtin(model_name: &str) -> Option<(EmbeddingModel, usize)> {
        match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => Some((EmbeddingModel::AllMiniLML6V2, 384)),
            "bge-small-en-v1.5" => Some((EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Some((EmbeddingModel::BGEBaseENV15, 768)),
            _ => None,
        }
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "Cannot embed empty text".to_string(),
            ));
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
