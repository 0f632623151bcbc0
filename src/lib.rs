//! passage-indexer - offline dense-retrieval indexing
//!
//! Turns a tab-separated passage collection into an index directory: every
//! passage is encoded into one embedding per token window, the embeddings
//! are quantized, and the artifact is published atomically. A `DONE` file
//! next to the output directory tells downstream jobs the run succeeded.

pub mod cli;
pub mod collection;
pub mod config;
pub mod embedding;
pub mod error;
pub mod indexing;
pub mod marker;
pub mod pipeline;
pub mod run;

pub use error::{IndexerError, Result};
