//! Completion sentinel for downstream automation
//!
//! The marker is an empty `DONE` file next to the output directory. Its
//! presence is the only positive signal a run finished; it is written
//! after the index is published and never on a failure path.

use crate::error::{IndexerError, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub const MARKER_FILE: &str = "DONE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionMarker {
    path: PathBuf,
}

impl CompletionMarker {
    /// Marker for a run writing into `out_dir`: `parent(out_dir)/DONE`
    pub fn for_output_dir(out_dir: &Path) -> Result<Self> {
        let parent = out_dir.parent().ok_or_else(|| {
            IndexerError::Configuration(format!(
                "Output directory {} has no parent for the completion marker",
                out_dir.display()
            ))
        })?;

        // `Path::new("out").parent()` is the empty path
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };

        Ok(Self {
            path: parent.join(MARKER_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create the marker if absent. An existing marker is left untouched.
    pub fn touch(&self) -> Result<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                IndexerError::io(
                    e,
                    format!("Failed to create completion marker {:?}", self.path),
                )
            })?;

        tracing::debug!("Touched {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_marker_sits_next_to_output() {
        let marker = CompletionMarker::for_output_dir(Path::new("/data/run1/index")).unwrap();
        assert_eq!(marker.path(), Path::new("/data/run1/DONE"));
    }

    #[test]
    fn test_relative_output_without_parent() {
        let marker = CompletionMarker::for_output_dir(Path::new("index")).unwrap();
        assert_eq!(marker.path(), Path::new("./DONE"));

        let marker = CompletionMarker::for_output_dir(Path::new("index/")).unwrap();
        assert_eq!(marker.path(), Path::new("./DONE"));
    }

    #[test]
    fn test_root_has_no_parent() {
        assert!(matches!(
            CompletionMarker::for_output_dir(Path::new("/")),
            Err(IndexerError::Configuration(_))
        ));
    }

    #[test]
    fn test_touch_is_idempotent_and_empty() {
        let temp = TempDir::new().unwrap();
        let marker = CompletionMarker::for_output_dir(&temp.path().join("out")).unwrap();
        assert!(!marker.exists());

        marker.touch().unwrap();
        marker.touch().unwrap();

        assert!(marker.exists());
        assert_eq!(std::fs::metadata(marker.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_touch_does_not_truncate() {
        let temp = TempDir::new().unwrap();
        let marker = CompletionMarker::for_output_dir(&temp.path().join("out")).unwrap();
        std::fs::write(marker.path(), b"written by someone else").unwrap();

        marker.touch().unwrap();
        assert_eq!(
            std::fs::read(marker.path()).unwrap(),
            b"written by someone else"
        );
    }
}
