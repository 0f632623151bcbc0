//! Passage collection reader
//!
//! Collections are tab-separated files with one passage per row:
//! `id<TAB>text` or `id<TAB>text<TAB>title`. Columns past the title are
//! ignored, and the first non-blank row may be an `id<TAB>text` header.

use crate::error::{IndexerError, Result};
use ahash::{HashSet, HashSetExt};
use std::path::Path;

/// A single passage to be indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub id: String,
    pub text: String,
}

/// Ordered, validated set of passages
#[derive(Debug, Clone)]
pub struct Collection {
    passages: Vec<Passage>,
    digest: String,
}

impl Collection {
    /// Read and validate a collection file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(IndexerError::Input(format!(
                "Collection file not found: {}",
                path.display()
            )));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| IndexerError::io(e, format!("Failed to read collection: {:?}", path)))?;
        let digest = blake3::hash(&bytes).to_hex().to_string();

        let content = String::from_utf8(bytes).map_err(|e| {
            IndexerError::Input(format!(
                "Collection {} is not valid UTF-8 (byte {})",
                path.display(),
                e.utf8_error().valid_up_to()
            ))
        })?;

        let passages = parse_tsv(&content)?;
        tracing::info!(
            "Loaded {} passages from {}",
            passages.len(),
            path.display()
        );

        Ok(Self { passages, digest })
    }

    pub fn into_passages(self) -> Vec<Passage> {
        self.passages
    }

    /// BLAKE3 hex digest of the raw collection file
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

fn parse_tsv(content: &str) -> Result<Vec<Passage>> {
    let mut passages = Vec::new();
    let mut seen = HashSet::new();
    let mut first_row = true;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        let header = first_row && is_header(&fields);
        first_row = false;
        if header {
            continue;
        }

        let (id, text, title) = match fields.as_slice() {
            [id, text, rest @ ..] => (*id, *text, rest.first().copied()),
            _ => {
                return Err(IndexerError::Input(format!(
                    "Line {}: expected at least 2 tab-separated fields, found {}",
                    line_no,
                    fields.len()
                )));
            }
        };

        let id = id.trim();
        if id.is_empty() {
            return Err(IndexerError::Input(format!(
                "Line {}: passage id is empty",
                line_no
            )));
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(IndexerError::Input(format!(
                "Line {}: passage {} has no text",
                line_no, id
            )));
        }

        if !seen.insert(id.to_string()) {
            return Err(IndexerError::Input(format!(
                "Line {}: duplicate passage id {}",
                line_no, id
            )));
        }

        let text = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => format!("{} | {}", title, text),
            None => text.to_string(),
        };

        passages.push(Passage {
            id: id.to_string(),
            text,
        });
    }

    if passages.is_empty() {
        return Err(IndexerError::Input(
            "Collection contains no passages".to_string(),
        ));
    }

    Ok(passages)
}

fn is_header(fields: &[&str]) -> bool {
    fields.len() >= 2
        && fields[0].trim().eq_ignore_ascii_case("id")
        && fields[1].trim().eq_ignore_ascii_case("text")
}
