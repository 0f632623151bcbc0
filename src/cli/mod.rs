//! CLI argument definitions and parsing
use crate::config::Settings;
use crate::error::{IndexerError, Result};
use crate::pipeline::PipelineOptions;
use clap::Parser;
use std::path::{Path, PathBuf};

/// Checkpoint used when `--model_path` is not given
pub const DEFAULT_MODEL_PATH: &str = "../../data/models/colbertv2.0";

#[derive(Parser, Debug)]
#[command(
    name = "passage-indexer",
    version,
    about = "Encode a passage collection and build a compressed retrieval index",
    long_about = "Reads a tab-separated passage collection, encodes every passage into \
                  multi-vector embeddings, compresses them and writes an index directory \
                  under OUT_DIR. A DONE file is created next to OUT_DIR when the run succeeds."
)]
pub struct Cli {
    /// Path to input tsv file with passages (id<TAB>text[<TAB>title])
    pub in_file: PathBuf,

    /// Path to output directory; the index is written to OUT_DIR/<index_name>
    pub out_dir: PathBuf,

    /// Path to the encoder checkpoint
    #[arg(long = "model_path", value_name = "PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    /// Overwrite index if it already exists
    #[arg(long)]
    pub overwrite: bool,

    /// Name of the index directory inside OUT_DIR
    #[arg(long = "index_name", value_name = "NAME")]
    pub index_name: Option<String>,

    /// Passages longer than this many tokens are truncated
    #[arg(long = "max_passage_length", value_name = "TOKENS")]
    pub max_passage_length: Option<usize>,

    /// Bits per compressed embedding dimension (1, 2, 4 or 8)
    #[arg(long, value_name = "BITS")]
    pub nbits: Option<u8>,

    /// Number of encoder workers
    #[arg(long, value_name = "N")]
    pub nranks: Option<usize>,

    /// Settings file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Combine flags with settings; flags that were given take precedence
    pub fn to_options(&self, settings: &Settings) -> Result<PipelineOptions> {
        Ok(PipelineOptions {
            in_file: expand_path(&self.in_file)?,
            out_dir: expand_path(&self.out_dir)?,
            model_path: expand_path(&self.model_path)?,
            overwrite: self.overwrite,
            nranks: self.nranks.unwrap_or(settings.run.nranks),
            max_passage_length: self
                .max_passage_length
                .unwrap_or(settings.index.max_passage_length),
            quantization_bits: self.nbits.unwrap_or(settings.index.quantization_bits),
            index_name: self
                .index_name
                .clone()
                .unwrap_or_else(|| settings.index.index_name.clone()),
        })
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let Some(path_str) = path.to_str() else {
        return Ok(path.to_path_buf());
    };

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            IndexerError::Configuration("Cannot determine home directory".to_string())
        })?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
