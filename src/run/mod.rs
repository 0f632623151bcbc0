//! Run scope for a single indexing invocation
//!
//! A [`RunContext`] carries the parallelism degree and the output/index
//! roots explicitly. It is passed by reference to the engine instead of
//! living in process-wide state, so contexts can nest and tests need no
//! global setup. Dropping the context removes any staging directories the
//! run left behind.

use crate::error::{IndexerError, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use uuid::Uuid;

mod lock;

pub use lock::IndexLock;

/// Parameters of one indexing run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of cooperating encoder workers
    pub nranks: usize,
    /// Output root directory
    pub root: PathBuf,
    /// Directory under which named index artifacts are placed
    pub index_root: PathBuf,
}

impl RunConfig {
    /// Config where output root and index root are the same directory
    pub fn single_root(nranks: usize, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            nranks,
            index_root: root.clone(),
            root,
        }
    }
}

/// Scoped run parameters with teardown on drop
#[derive(Debug)]
pub struct RunContext {
    config: RunConfig,
    run_id: Uuid,
}

impl RunContext {
    /// Open a run: validate parameters, create the roots and check that
    /// they are writable.
    pub fn open(config: RunConfig) -> Result<Self> {
        if config.nranks == 0 {
            return Err(IndexerError::Configuration(
                "nranks must be at least 1".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        for dir in [&config.root, &config.index_root] {
            prepare_dir(dir, &run_id)?;
        }

        tracing::debug!(
            "Opened run {} (nranks={}, root={}, index_root={})",
            run_id,
            config.nranks,
            config.root.display(),
            config.index_root.display()
        );

        Ok(Self { config, run_id })
    }

    /// Run `f` inside a freshly opened context.
    ///
    /// The context is torn down before this returns, whether `f` succeeded
    /// or not, and the result of `f` is passed through unchanged.
    pub fn scope<T, F>(config: RunConfig, f: F) -> Result<T>
    where
        F: FnOnce(&RunContext) -> Result<T>,
    {
        let ctx = Self::open(config)?;
        let result = f(&ctx);
        drop(ctx);
        result
    }

    pub fn nranks(&self) -> usize {
        self.config.nranks
    }

    pub fn index_root(&self) -> &Path {
        &self.config.index_root
    }

    /// Final location of a named index
    pub fn index_path(&self, index_name: &str) -> PathBuf {
        self.config.index_root.join(index_name)
    }

    /// Run-private build directory for a named index
    pub fn staging_path(&self, index_name: &str) -> PathBuf {
        self.config
            .index_root
            .join(format!(".{}.staging-{}", index_name, self.run_id))
    }

    /// Where a replaced index is parked until the new one is in place
    pub fn retired_path(&self, index_name: &str) -> PathBuf {
        self.config
            .index_root
            .join(format!(".{}.old-{}", index_name, self.run_id))
    }

    /// Take the cross-run lock for a named index
    pub fn lock_index(&self, index_name: &str) -> Result<IndexLock> {
        IndexLock::acquire(
            self.config
                .index_root
                .join(format!(".{}.lock", index_name)),
        )
    }

    /// Remove staging and retired directories of `index_name` left by runs
    /// that died before tearing down. Holding the index lock guarantees no
    /// live run still owns them.
    pub fn sweep_leftovers(&self, index_name: &str, _lock: &IndexLock) {
        let prefixes = [
            format!(".{}.staging-", index_name),
            format!(".{}.old-", index_name),
        ];
        let own = self.run_id.to_string();

        let entries = match fs::read_dir(&self.config.index_root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Skipping leftover scan of index root: {}", e);
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let foreign = prefixes
                .iter()
                .any(|p| name.strip_prefix(p.as_str()).is_some_and(|id| id != own));
            if !foreign {
                continue;
            }

            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => tracing::info!("Removed leftover of an earlier run: {}", path.display()),
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }

    fn teardown(&self) {
        let staging_suffix = format!(".staging-{}", self.run_id);
        let retired_suffix = format!(".old-{}", self.run_id);

        let entries = match fs::read_dir(&self.config.index_root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Skipping teardown scan of index root: {}", e);
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(&staging_suffix) || name.ends_with(&retired_suffix) {
                let path = entry.path();
                match fs::remove_dir_all(&path) {
                    Ok(()) => tracing::debug!("Removed leftover {}", path.display()),
                    Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
                }
            }
        }

        tracing::debug!("Closed run {}", self.run_id);
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn prepare_dir(dir: &Path, run_id: &Uuid) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        IndexerError::Configuration(format!(
            "Cannot create directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let probe = dir.join(format!(".write-probe-{}", run_id));
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)
        .map_err(|e| {
            IndexerError::Configuration(format!(
                "Directory {} is not writable: {}",
                dir.display(),
                e
            ))
        })?;
    fs::remove_file(&probe).map_err(|e| IndexerError::Io {
        source: e,
        context: format!("Failed to remove write probe: {}", probe.display()),
    })?;

    Ok(())
}
