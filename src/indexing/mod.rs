//! Index construction
//!
//! [`IndexingEngine`] is the seam between the run orchestration and
//! whatever turns a passage collection into an index artifact.
//! [`LocalIndexer`] is the bundled implementation: it encodes windows of
//! each passage with an [`EmbeddingProvider`](crate::embedding::EmbeddingProvider),
//! compresses every component with a bucket quantizer and publishes the
//! artifact atomically under the run's index root.

mod artifact;
mod codec;
mod local;

pub use artifact::{IndexArtifact, IndexMetadata, FORMAT_VERSION};
pub use codec::BucketQuantizer;
pub use local::LocalIndexer;

use crate::error::{IndexerError, Result};
use crate::run::RunContext;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bit widths the quantizer can pack without straddling bytes
pub const SUPPORTED_QUANTIZATION_BITS: [u8; 4] = [1, 2, 4, 8];

/// Parameters that shape the artifact. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    max_passage_length: usize,
    quantization_bits: u8,
    index_name: String,
}

impl IndexConfig {
    /// The truncation threshold has no default on purpose: callers state
    /// how many tokens of each passage they are prepared to keep.
    pub fn new(
        max_passage_length: usize,
        quantization_bits: u8,
        index_name: impl Into<String>,
    ) -> Result<Self> {
        let index_name = index_name.into();

        if max_passage_length == 0 {
            return Err(IndexerError::Configuration(
                "max_passage_length must be greater than 0".to_string(),
            ));
        }

        if !SUPPORTED_QUANTIZATION_BITS.contains(&quantization_bits) {
            return Err(IndexerError::Configuration(format!(
                "quantization_bits must be one of {:?}, got {}",
                SUPPORTED_QUANTIZATION_BITS, quantization_bits
            )));
        }

        validate_index_name(&index_name)?;

        Ok(Self {
            max_passage_length,
            quantization_bits,
            index_name,
        })
    }

    /// Passages longer than this many tokens are truncated before encoding
    pub fn max_passage_length(&self) -> usize {
        self.max_passage_length
    }

    /// Bits per compressed embedding dimension
    pub fn quantization_bits(&self) -> u8 {
        self.quantization_bits
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }
}

fn validate_index_name(name: &str) -> Result<()> {
    let invalid = |why: &str| {
        Err(IndexerError::Configuration(format!(
            "Invalid index name {:?}: {}",
            name, why
        )))
    };

    if name.trim().is_empty() {
        return invalid("must not be empty");
    }
    if name.contains(['/', '\\']) {
        return invalid("must not contain path separators");
    }
    if name.starts_with('.') {
        return invalid("must not start with '.'");
    }
    Ok(())
}

/// What a successful build produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub index_path: PathBuf,
    pub num_passages: usize,
    pub num_embeddings: usize,
    pub dimension: usize,
    pub num_truncated: usize,
    /// An older artifact was replaced
    pub replaced_existing: bool,
}

/// Builds an index artifact for a passage collection.
///
/// Contract for implementations:
/// - when `index_root/index_name` exists and `overwrite` is false, fail
///   with [`IndexerError::AlreadyExists`] without writing anything;
/// - when `overwrite` is true, replace the old artifact so readers see
///   either the old or the new directory, never a mix;
/// - never modify the collection;
/// - report malformed input or unreadable checkpoints as
///   [`IndexerError::Input`] and exhaustion as [`IndexerError::Resource`].
pub trait IndexingEngine {
    fn index(
        &self,
        run: &RunContext,
        checkpoint: &Path,
        config: &IndexConfig,
        collection: &Path,
        overwrite: bool,
    ) -> Result<IndexSummary>;
}
