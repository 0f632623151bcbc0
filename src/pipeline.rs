//! End-to-end indexing run
//!
//! Validates the request, opens a [`RunContext`] over the output
//! directory, hands the collection to an [`IndexingEngine`] and writes
//! the [`CompletionMarker`] once the engine returns successfully.

use crate::error::{IndexerError, Result};
use crate::indexing::{IndexConfig, IndexSummary, IndexingEngine};
use crate::marker::CompletionMarker;
use crate::run::{RunConfig, RunContext};
use std::path::PathBuf;

/// Everything one run needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub in_file: PathBuf,
    pub out_dir: PathBuf,
    pub model_path: PathBuf,
    pub overwrite: bool,
    pub nranks: usize,
    pub max_passage_length: usize,
    pub quantization_bits: u8,
    pub index_name: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub summary: IndexSummary,
    pub marker: PathBuf,
}

/// Run the pipeline with the given engine.
///
/// Errors from the run scope or the engine are returned unchanged; the
/// completion marker exists only if this returns `Ok`.
pub fn run_pipeline(
    options: &PipelineOptions,
    engine: &dyn IndexingEngine,
) -> Result<PipelineOutcome> {
    if !options.in_file.is_file() {
        return Err(IndexerError::Input(format!(
            "Input file not found: {}",
            options.in_file.display()
        )));
    }

    let marker = CompletionMarker::for_output_dir(&options.out_dir)?;
    let config = IndexConfig::new(
        options.max_passage_length,
        options.quantization_bits,
        options.index_name.clone(),
    )?;

    let run_config = RunConfig::single_root(options.nranks, options.out_dir.clone());
    let summary = RunContext::scope(run_config, |run| {
        engine.index(
            run,
            &options.model_path,
            &config,
            &options.in_file,
            options.overwrite,
        )
    })?;

    marker.touch()?;

    Ok(PipelineOutcome {
        summary,
        marker: marker.path().to_path_buf(),
    })
}
