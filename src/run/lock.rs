// Lock files guarding an index name against concurrent runs

use crate::error::{IndexerError, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Exclusive advisory lock on one index name.
///
/// The lock file itself stays on disk; only the `flock` on it matters.
/// The kernel drops the lock when the holder exits, so a crashed run never
/// leaves the index locked. The holder's PID is written into the file for
/// diagnostics.
pub struct IndexLock {
    path: PathBuf,
    _file: Flock<File>,
}

impl IndexLock {
    /// Take the lock without waiting; fails if another run holds it
    pub fn acquire(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| IndexerError::io(e, format!("Failed to open lock file: {:?}", path)))?;

        let locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_, Errno::EWOULDBLOCK)) => {
                let holder = fs::read_to_string(&path)
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(IndexerError::Configuration(format!(
                    "Index is locked by another run (PID {}): {}",
                    holder,
                    path.display()
                )));
            }
            Err((_, errno)) => {
                return Err(IndexerError::io(
                    std::io::Error::from(errno),
                    format!("Failed to lock {:?}", path),
                ));
            }
        };

        let mut handle: &File = &locked;
        handle
            .set_len(0)
            .and_then(|_| handle.write_all(std::process::id().to_string().as_bytes()))
            .map_err(|e| IndexerError::io(e, format!("Failed to write lock file: {:?}", path)))?;

        tracing::debug!("Acquired index lock {}", path.display());
        Ok(Self {
            path,
            _file: locked,
        })
    }
}

impl std::fmt::Debug for IndexLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexLock").field("path", &self.path).finish()
    }
}
