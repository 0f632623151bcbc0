//! On-disk index artifact
//!
//! Layout of `index_root/<index_name>/`:
//!
//! | file            | contents                                          |
//! |-----------------|---------------------------------------------------|
//! | `metadata.json` | [`IndexMetadata`]                                  |
//! | `pids.json`     | passage ids in collection order                   |
//! | `doclens.json`  | vectors per passage, same order                   |
//! | `buckets.json`  | quantizer cutoffs and weights                     |
//! | `codes.zst`     | zstd-compressed bit-packed codes, row-major       |

use super::codec::BucketQuantizer;
use super::{IndexConfig, SUPPORTED_QUANTIZATION_BITS};
use crate::error::{IndexerError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

const METADATA_FILE: &str = "metadata.json";
const PIDS_FILE: &str = "pids.json";
const DOCLENS_FILE: &str = "doclens.json";
const BUCKETS_FILE: &str = "buckets.json";
const CODES_FILE: &str = "codes.zst";

const ZSTD_LEVEL: i32 = 3;

/// Description of a built index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub format_version: u32,
    pub index_name: String,
    pub checkpoint: String,
    pub model_name: String,
    pub dimension: usize,
    pub config: IndexConfig,
    pub num_passages: usize,
    pub num_embeddings: usize,
    pub num_truncated: usize,
    /// BLAKE3 digest of the collection file the index was built from
    pub collection_blake3: String,
    pub created_at: DateTime<Utc>,
}

/// Everything that makes up an artifact, in memory
#[derive(Debug, Clone)]
pub struct IndexArtifact {
    pub metadata: IndexMetadata,
    pub pids: Vec<String>,
    pub doclens: Vec<usize>,
    pub quantizer: BucketQuantizer,
    /// Packed codes, `num_embeddings * dimension` entries
    pub packed_codes: Vec<u8>,
}

impl IndexArtifact {
    /// Write every file into `dir` (which must exist) and sync it
    pub fn write(&self, dir: &Path) -> Result<()> {
        write_json(dir, METADATA_FILE, &self.metadata)?;
        write_json(dir, PIDS_FILE, &self.pids)?;
        write_json(dir, DOCLENS_FILE, &self.doclens)?;
        write_json(dir, BUCKETS_FILE, &self.quantizer)?;

        let compressed = zstd::encode_all(&self.packed_codes[..], ZSTD_LEVEL)
            .map_err(|e| IndexerError::io(e, "Failed to compress codes"))?;
        write_file(&dir.join(CODES_FILE), &compressed)?;

        tracing::debug!(
            "Wrote artifact to {} ({} code bytes, {} compressed)",
            dir.display(),
            self.packed_codes.len(),
            compressed.len()
        );
        Ok(())
    }

    /// Load an artifact written by [`write`](Self::write)
    pub fn open(dir: &Path) -> Result<Self> {
        let metadata: IndexMetadata = read_json(dir, METADATA_FILE)?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(IndexerError::Input(format!(
                "Unsupported index format version {} in {}",
                metadata.format_version,
                dir.display()
            )));
        }

        let pids = read_json(dir, PIDS_FILE)?;
        let doclens = read_json(dir, DOCLENS_FILE)?;
        let quantizer = read_json(dir, BUCKETS_FILE)?;

        let codes_path = dir.join(CODES_FILE);
        let compressed = fs::read(&codes_path)
            .map_err(|e| IndexerError::io(e, format!("Failed to read {:?}", codes_path)))?;
        let packed_codes = zstd::decode_all(&compressed[..])
            .map_err(|e| IndexerError::io(e, "Failed to decompress codes"))?;

        let artifact = Self {
            metadata,
            pids,
            doclens,
            quantizer,
            packed_codes,
        };
        artifact.check_consistency().map_err(|problem| {
            IndexerError::Input(format!("Corrupt index at {}: {}", dir.display(), problem))
        })?;
        Ok(artifact)
    }

    /// Cross-check the files against each other and the metadata
    fn check_consistency(&self) -> std::result::Result<(), String> {
        let meta = &self.metadata;

        if self.pids.len() != meta.num_passages {
            return Err(format!(
                "{} passage ids for {} passages",
                self.pids.len(),
                meta.num_passages
            ));
        }
        if self.doclens.len() != meta.num_passages {
            return Err(format!(
                "{} doclens for {} passages",
                self.doclens.len(),
                meta.num_passages
            ));
        }
        let total: usize = self.doclens.iter().sum();
        if total != meta.num_embeddings {
            return Err(format!(
                "doclens add up to {} but metadata lists {} embeddings",
                total, meta.num_embeddings
            ));
        }

        let bits = self.quantizer.bits();
        if bits != meta.config.quantization_bits() || !SUPPORTED_QUANTIZATION_BITS.contains(&bits)
        {
            return Err(format!(
                "quantizer uses {} bits, config says {}",
                bits,
                meta.config.quantization_bits()
            ));
        }
        let buckets = 1usize << bits;
        if self.quantizer.weights().len() != buckets
            || self.quantizer.cutoffs().len() != buckets - 1
        {
            return Err(format!(
                "{} weights and {} cutoffs for {} buckets",
                self.quantizer.weights().len(),
                self.quantizer.cutoffs().len(),
                buckets
            ));
        }

        let codes = meta
            .num_embeddings
            .checked_mul(meta.dimension)
            .ok_or_else(|| "embedding count overflows".to_string())?;
        let expected_bytes = codes.div_ceil(8 / bits as usize);
        if self.packed_codes.len() != expected_bytes {
            return Err(format!(
                "{} code bytes, expected {}",
                self.packed_codes.len(),
                expected_bytes
            ));
        }

        Ok(())
    }

    /// Approximate reconstruction of embedding `row`, `None` if out of range
    pub fn decode_embedding(&self, row: usize) -> Option<Vec<f32>> {
        if row >= self.metadata.num_embeddings {
            return None;
        }
        let dim = self.metadata.dimension;
        let codes = self
            .quantizer
            .unpack(&self.packed_codes, row.checked_mul(dim)?, dim)?;
        codes
            .into_iter()
            .map(|c| self.quantizer.weights().get(c as usize).copied())
            .collect()
    }
}

/// Move a finished staging directory into place.
///
/// Returns whether an existing artifact was replaced. Without `overwrite`
/// an existing target is an [`IndexerError::AlreadyExists`]. With it, the
/// staging directory and the target are swapped in one step where the
/// filesystem supports it, so the target path always names a complete
/// artifact. Elsewhere the old directory is parked at `retired` while the
/// new one is renamed in.
pub(crate) fn publish(
    staging: &Path,
    target: &Path,
    retired: &Path,
    overwrite: bool,
) -> Result<bool> {
    if target.exists() {
        if !overwrite {
            return Err(IndexerError::AlreadyExists {
                path: target.to_path_buf(),
            });
        }

        let swapped = exchange(staging, target).map_err(|e| {
            IndexerError::io(e, format!("Failed to publish index {:?}", target))
        })?;
        if swapped {
            // staging now holds the previous artifact
            if let Err(e) = fs::remove_dir_all(staging) {
                tracing::warn!("Failed to remove replaced index {}: {}", staging.display(), e);
            }
        } else {
            replace_by_rename(staging, target, retired)?;
        }
        return Ok(true);
    }

    fs::rename(staging, target).map_err(|e| {
        if target.exists() {
            IndexerError::AlreadyExists {
                path: target.to_path_buf(),
            }
        } else {
            IndexerError::io(e, format!("Failed to publish index {:?}", target))
        }
    })?;
    Ok(false)
}

/// Atomically swap two directories. `Ok(false)` when the filesystem or
/// kernel cannot do it.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn exchange(a: &Path, b: &Path) -> std::io::Result<bool> {
    use nix::errno::Errno;
    use nix::fcntl::{renameat2, RenameFlags};

    match renameat2(None, a, None, b, RenameFlags::RENAME_EXCHANGE) {
        Ok(()) => Ok(true),
        Err(Errno::EINVAL | Errno::ENOSYS | Errno::EOPNOTSUPP) => Ok(false),
        Err(errno) => Err(errno.into()),
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn exchange(_a: &Path, _b: &Path) -> std::io::Result<bool> {
    Ok(false)
}

/// Two-rename replacement; the old artifact is put back if the new one
/// cannot be moved in.
fn replace_by_rename(staging: &Path, target: &Path, retired: &Path) -> Result<()> {
    fs::rename(target, retired).map_err(|e| {
        IndexerError::io(e, format!("Failed to retire existing index {:?}", target))
    })?;

    if let Err(e) = fs::rename(staging, target) {
        if let Err(restore) = fs::rename(retired, target) {
            tracing::error!(
                "Failed to restore {} from {}: {}",
                target.display(),
                retired.display(),
                restore
            );
        }
        return Err(IndexerError::io(
            e,
            format!("Failed to publish index {:?}", target),
        ));
    }

    if let Err(e) = fs::remove_dir_all(retired) {
        tracing::warn!("Failed to remove replaced index {}: {}", retired.display(), e);
    }
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(dir: &Path, name: &str, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value).map_err(|e| IndexerError::Json {
        source: e,
        context: format!("Failed to serialize {}", name),
    })?;
    write_file(&dir.join(name), &content)
}

fn read_json<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T> {
    let path: PathBuf = dir.join(name);
    let content = fs::read(&path)
        .map_err(|e| IndexerError::io(e, format!("Failed to read {:?}", path)))?;
    serde_json::from_slice(&content).map_err(|e| IndexerError::Json {
        source: e,
        context: format!("Failed to parse {:?}", path),
    })
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path)
        .map_err(|e| IndexerError::io(e, format!("Failed to create {:?}", path)))?;
    file.write_all(data)
        .map_err(|e| IndexerError::io(e, format!("Failed to write {:?}", path)))?;
    file.sync_all()
        .map_err(|e| IndexerError::io(e, format!("Failed to sync {:?}", path)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_artifact() -> IndexArtifact {
        let values = [0.1, -0.4, 0.9, 0.3, -0.2, 0.7];
        let quantizer = BucketQuantizer::fit(2, &values);
        let packed_codes = quantizer.pack(values);

        IndexArtifact {
            metadata: IndexMetadata {
                format_version: FORMAT_VERSION,
                index_name: "default".to_string(),
                checkpoint: "ckpt".to_string(),
                model_name: "test".to_string(),
                dimension: 3,
                config: IndexConfig::new(100, 2, "default").unwrap(),
                num_passages: 1,
                num_embeddings: 2,
                num_truncated: 0,
                collection_blake3: "abc".to_string(),
                created_at: Utc::now(),
            },
            pids: vec!["p1".to_string()],
            doclens: vec![2],
            quantizer,
            packed_codes,
        }
    }

    #[test]
    fn test_write_then_open() {
        let temp = TempDir::new().unwrap();
        let artifact = sample_artifact();
        artifact.write(temp.path()).unwrap();

        for file in [METADATA_FILE, PIDS_FILE, DOCLENS_FILE, BUCKETS_FILE, CODES_FILE] {
            assert!(temp.path().join(file).is_file(), "{} missing", file);
        }

        let loaded = IndexArtifact::open(temp.path()).unwrap();
        assert_eq!(loaded.metadata, artifact.metadata);
        assert_eq!(loaded.pids, artifact.pids);
        assert_eq!(loaded.packed_codes, artifact.packed_codes);
    }

    #[test]
    fn test_decode_embedding_reads_only_its_row() {
        let artifact = sample_artifact();
        // cutoffs [-0.2, 0.3, 0.7], bucket means [-0.4, -0.05, 0.3, 0.8]
        let row = artifact.decode_embedding(1).unwrap();
        let expected = [0.3, -0.05, 0.8];
        assert_eq!(row.len(), 3);
        for (got, want) in row.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{:?} != {:?}", row, expected);
        }

        let first = artifact.decode_embedding(0).unwrap();
        assert!((first[1] - -0.4).abs() < 1e-6);

        assert!(artifact.decode_embedding(2).is_none());
        assert!(artifact.decode_embedding(usize::MAX).is_none());
    }

    #[test]
    fn test_open_rejects_inconsistent_files() {
        let temp = TempDir::new().unwrap();
        sample_artifact().write(temp.path()).unwrap();
        fs::write(temp.path().join(PIDS_FILE), b"[]").unwrap();

        let result = IndexArtifact::open(temp.path());
        assert!(matches!(result, Err(IndexerError::Input(_))));
    }

    #[test]
    fn test_open_rejects_short_codes() {
        let temp = TempDir::new().unwrap();
        let mut artifact = sample_artifact();
        artifact.packed_codes.pop();
        artifact.write(temp.path()).unwrap();

        let result = IndexArtifact::open(temp.path());
        assert!(matches!(result, Err(IndexerError::Input(_))));
    }

    #[test]
    fn test_open_rejects_quantizer_not_matching_config() {
        let temp = TempDir::new().unwrap();
        let mut artifact = sample_artifact();
        artifact.quantizer = BucketQuantizer::fit(4, &[0.1, 0.2, 0.3]);
        artifact.write(temp.path()).unwrap();

        match IndexArtifact::open(temp.path()) {
            Err(IndexerError::Input(msg)) => assert!(msg.contains("4 bits")),
            other => panic!("expected Input error, got {:?}", other.map(|a| a.metadata)),
        }
    }

    #[test]
    fn test_open_rejects_doclens_not_matching_embeddings() {
        let temp = TempDir::new().unwrap();
        let mut artifact = sample_artifact();
        artifact.doclens = vec![5];
        artifact.write(temp.path()).unwrap();

        let result = IndexArtifact::open(temp.path());
        assert!(matches!(result, Err(IndexerError::Input(_))));
    }

    #[test]
    fn test_publish_fresh() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join(".default.staging-1");
        let target = temp.path().join("default");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("a"), b"new").unwrap();

        let replaced = publish(&staging, &target, &temp.path().join(".old"), false).unwrap();
        assert!(!replaced);
        assert!(!staging.exists());
        assert_eq!(fs::read(target.join("a")).unwrap(), b"new");
    }

    #[test]
    fn test_publish_conflict_without_overwrite() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join(".default.staging-1");
        let target = temp.path().join("default");
        fs::create_dir_all(&staging).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("a"), b"old").unwrap();

        let result = publish(&staging, &target, &temp.path().join(".old"), false);
        assert!(matches!(result, Err(IndexerError::AlreadyExists { .. })));
        assert_eq!(fs::read(target.join("a")).unwrap(), b"old");
    }

    #[test]
    fn test_publish_overwrite_leaves_no_residue() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join(".default.staging-1");
        let target = temp.path().join("default");
        let retired = temp.path().join(".default.old-1");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("a"), b"new").unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale"), b"old").unwrap();

        let replaced = publish(&staging, &target, &retired, true).unwrap();
        assert!(replaced);
        assert!(!target.join("stale").exists());
        assert!(!retired.exists());
        assert!(!staging.exists());
        assert_eq!(fs::read(target.join("a")).unwrap(), b"new");
    }

    fn existing_target(temp: &TempDir) -> PathBuf {
        let target = temp.path().join("default");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("a"), b"old").unwrap();
        target
    }

    #[test]
    fn test_rename_replacement_restores_old_artifact_on_failure() {
        let temp = TempDir::new().unwrap();
        let target = existing_target(&temp);
        let retired = temp.path().join(".default.old-1");
        let missing_staging = temp.path().join(".default.staging-gone");

        let result = replace_by_rename(&missing_staging, &target, &retired);

        assert!(matches!(result, Err(IndexerError::Io { .. })));
        assert_eq!(fs::read(target.join("a")).unwrap(), b"old");
        assert!(!retired.exists());
    }

    #[test]
    fn test_failed_overwrite_keeps_old_artifact() {
        let temp = TempDir::new().unwrap();
        let target = existing_target(&temp);
        let retired = temp.path().join(".default.old-1");
        let missing_staging = temp.path().join(".default.staging-gone");

        let result = publish(&missing_staging, &target, &retired, true);

        assert!(result.is_err());
        assert_eq!(fs::read(target.join("a")).unwrap(), b"old");
        assert!(!retired.exists());
    }

    #[test]
    fn test_overwrite_never_leaves_target_missing() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let temp = TempDir::new().unwrap();
        let target = existing_target(&temp);

        // Only meaningful where the swap is supported
        let check = temp.path().join(".check");
        fs::create_dir_all(&check).unwrap();
        if !exchange(&check, &target).unwrap() {
            return;
        }
        exchange(&check, &target).unwrap();
        fs::remove_dir_all(&check).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let target = target.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut misses = 0usize;
                while !stop.load(Ordering::SeqCst) {
                    if !target.join("a").is_file() {
                        misses += 1;
                    }
                }
                misses
            })
        };

        for round in 0..200 {
            let staging = temp.path().join(format!(".default.staging-{}", round));
            let retired = temp.path().join(format!(".default.old-{}", round));
            fs::create_dir_all(&staging).unwrap();
            fs::write(staging.join("a"), format!("round {}", round)).unwrap();
            assert!(publish(&staging, &target, &retired, true).unwrap());
        }

        stop.store(true, Ordering::SeqCst);
        assert_eq!(reader.join().unwrap(), 0);
        assert_eq!(fs::read(target.join("a")).unwrap(), b"round 199");
    }
}
