//! Passage encoding
//!
//! - [`EmbeddingProvider`] abstracts the encoder backend
//! - [`FastEmbedProvider`] runs ONNX models locally through fastembed
//! - [`CheckpointLoader`] turns a checkpoint reference into a provider
//! - [`PassageTokenizer`] truncates passages and cuts them into windows,
//!   one embedding per window
mod checkpoint;
mod provider;
mod tokenizer;

pub use checkpoint::{CheckpointLoader, FastEmbedLoader};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use tokenizer::{PassageTokenizer, TokenizedPassage};
