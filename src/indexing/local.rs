/// Bundled indexing engine
use super::artifact::{self, IndexArtifact, IndexMetadata, FORMAT_VERSION};
use super::codec::BucketQuantizer;
use super::{IndexConfig, IndexSummary, IndexingEngine};
use crate::collection::Collection;
use crate::embedding::{CheckpointLoader, EmbeddingError, EmbeddingProvider, PassageTokenizer};
use crate::error::{IndexerError, Result};
use crate::run::RunContext;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_WINDOW_TOKENS: usize = 32;

/// Encodes passages window by window and writes a quantized artifact.
///
/// Encoding is split into `nranks` contiguous shards of the collection,
/// each handled by a blocking worker. The call itself blocks until the
/// artifact is published, so it must not be made from inside an async
/// runtime.
pub struct LocalIndexer {
    loader: Arc<dyn CheckpointLoader>,
    batch_size: usize,
    window_tokens: usize,
}

impl LocalIndexer {
    pub fn new(loader: Arc<dyn CheckpointLoader>) -> Self {
        Self {
            loader,
            batch_size: DEFAULT_BATCH_SIZE,
            window_tokens: DEFAULT_WINDOW_TOKENS,
        }
    }

    /// Windows per encoder call (minimum 1)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Tokens per embedded window (minimum 1)
    pub fn with_window_tokens(mut self, window_tokens: usize) -> Self {
        self.window_tokens = window_tokens.max(1);
        self
    }

    fn encode_sharded(
        &self,
        provider: Arc<dyn EmbeddingProvider>,
        windows: Vec<Vec<String>>,
        nranks: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let shard_size = windows.len().div_ceil(nranks).max(1);
        let mut shards: Vec<Vec<String>> = Vec::new();
        let mut remaining = windows.into_iter();
        loop {
            let shard: Vec<String> = remaining.by_ref().take(shard_size).flatten().collect();
            if shard.is_empty() {
                break;
            }
            shards.push(shard);
        }

        debug!("Encoding {} shards on {} workers", shards.len(), nranks);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(nranks)
            .build()
            .map_err(|e| IndexerError::Io {
                source: e,
                context: "Failed to create encoder runtime".to_string(),
            })?;

        let batch_size = self.batch_size;
        runtime.block_on(async move {
            let semaphore = Arc::new(Semaphore::new(nranks));
            let mut handles = Vec::with_capacity(shards.len());

            for (rank, shard) in shards.into_iter().enumerate() {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| IndexerError::Other(e.into()))?;
                let provider = provider.clone();

                handles.push(tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    encode_shard(&*provider, rank, &shard, batch_size)
                }));
            }

            let mut embeddings = Vec::new();
            for handle in handles {
                let shard = handle.await.map_err(|e| {
                    IndexerError::Other(anyhow::anyhow!("Encoder worker failed: {}", e))
                })??;
                embeddings.extend(shard);
            }
            Ok::<_, IndexerError>(embeddings)
        })
    }
}

fn encode_shard(
    provider: &dyn EmbeddingProvider,
    rank: usize,
    windows: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let dimension = provider.dimension();
    let mut out = Vec::with_capacity(windows.len());

    for batch in windows.chunks(batch_size) {
        let embeddings = provider.embed_batch(batch)?;
        if embeddings.len() != batch.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                batch.len(),
                embeddings.len()
            ))
            .into());
        }
        for embedding in &embeddings {
            if embedding.len() != dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                }
                .into());
            }
        }
        out.extend(embeddings);
    }

    debug!("Rank {} encoded {} windows", rank, out.len());
    Ok(out)
}

impl IndexingEngine for LocalIndexer {
    fn index(
        &self,
        run: &RunContext,
        checkpoint: &Path,
        config: &IndexConfig,
        collection: &Path,
        overwrite: bool,
    ) -> Result<IndexSummary> {
        let name = config.index_name();
        let target = run.index_path(name);

        if target.exists() && !overwrite {
            return Err(IndexerError::AlreadyExists { path: target });
        }

        let lock = run.lock_index(name)?;
        // Another run may have published while we waited for the lock
        if target.exists() && !overwrite {
            return Err(IndexerError::AlreadyExists { path: target });
        }
        run.sweep_leftovers(name, &lock);

        let provider = self.loader.load(checkpoint)?;
        let collection = Collection::load(collection)?;
        let digest = collection.digest().to_string();
        let passages = collection.into_passages();

        let tokenizer = PassageTokenizer::new(config.max_passage_length(), self.window_tokens);
        let mut num_truncated = 0;
        let mut pids = Vec::with_capacity(passages.len());
        let mut windows = Vec::with_capacity(passages.len());
        for passage in passages {
            let mut tokenized = tokenizer.tokenize(&passage.text);
            if tokenized.truncated {
                num_truncated += 1;
            }
            if tokenized.windows.is_empty() {
                tokenized.windows.push(passage.text);
            }
            pids.push(passage.id);
            windows.push(tokenized.windows);
        }

        if num_truncated > 0 {
            warn!(
                "{} of {} passages exceed {} tokens and were truncated",
                num_truncated,
                pids.len(),
                config.max_passage_length()
            );
        }

        let doclens: Vec<usize> = windows.iter().map(Vec::len).collect();
        let dimension = provider.dimension();
        let model_name = provider.model_name().to_string();

        info!(
            "Encoding {} passages ({} windows) with {}",
            pids.len(),
            doclens.iter().sum::<usize>(),
            model_name
        );
        let embeddings = self.encode_sharded(provider, windows, run.nranks())?;

        let components: Vec<f32> = embeddings.iter().flatten().copied().collect();
        let quantizer = BucketQuantizer::fit(config.quantization_bits(), &components);
        let packed_codes = quantizer.pack(components.iter().copied());
        drop(components);

        let artifact = IndexArtifact {
            metadata: IndexMetadata {
                format_version: FORMAT_VERSION,
                index_name: name.to_string(),
                checkpoint: checkpoint.display().to_string(),
                model_name,
                dimension,
                config: config.clone(),
                num_passages: pids.len(),
                num_embeddings: embeddings.len(),
                num_truncated,
                collection_blake3: digest,
                created_at: chrono::Utc::now(),
            },
            pids,
            doclens,
            quantizer,
            packed_codes,
        };

        let staging = run.staging_path(name);
        std::fs::create_dir_all(&staging).map_err(|e| {
            IndexerError::io(e, format!("Failed to create staging directory {:?}", staging))
        })?;
        artifact.write(&staging)?;

        let replaced_existing =
            artifact::publish(&staging, &target, &run.retired_path(name), overwrite)?;

        info!(
            "Index {} written to {}{}",
            name,
            target.display(),
            if replaced_existing { " (replaced existing)" } else { "" }
        );

        Ok(IndexSummary {
            index_path: target,
            num_passages: artifact.metadata.num_passages,
            num_embeddings: artifact.metadata.num_embeddings,
            dimension,
            num_truncated,
            replaced_existing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Deterministic encoder: component `i` counts characters whose code
    /// point is congruent to `i` modulo the dimension.
    struct CountingProvider {
        dimension: usize,
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for CountingProvider {
        fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dimension];
                    for c in t.chars() {
                        v[c as usize % self.dimension] += 1.0;
                    }
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    struct StaticLoader(Arc<CountingProvider>);

    impl CheckpointLoader for StaticLoader {
        fn load(&self, _checkpoint: &Path) -> Result<Arc<dyn EmbeddingProvider>> {
            Ok(self.0.clone())
        }
    }

    fn indexer(provider: Arc<CountingProvider>) -> LocalIndexer {
        LocalIndexer::new(Arc::new(StaticLoader(provider)))
    }

    fn provider() -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            dimension: 8,
            calls: AtomicUsize::new(0),
        })
    }

    fn write_collection(dir: &Path, rows: &[(&str, &str)]) -> std::path::PathBuf {
        let path = dir.join("collection.tsv");
        let body: String = rows
            .iter()
            .map(|(id, text)| format!("{}\t{}\n", id, text))
            .collect();
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_windows_become_vectors() {
        let temp = TempDir::new().unwrap();
        let collection = write_collection(
            temp.path(),
            &[("a", "one two three four five"), ("b", "six")],
        );
        let out = temp.path().join("out");
        let config = IndexConfig::new(100, 4, "default").unwrap();
        let engine = indexer(provider()).with_window_tokens(2);

        let summary = RunContext::scope(RunConfig::single_root(1, &out), |run| {
            engine.index(run, Path::new("ckpt"), &config, &collection, false)
        })
        .unwrap();

        assert_eq!(summary.num_passages, 2);
        assert_eq!(summary.num_embeddings, 4);
        assert_eq!(summary.dimension, 8);

        let artifact = IndexArtifact::open(&summary.index_path).unwrap();
        assert_eq!(artifact.doclens, vec![3, 1]);
        assert_eq!(artifact.pids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_shards_preserve_collection_order() {
        let temp = TempDir::new().unwrap();
        let rows: Vec<(String, String)> = (0..10)
            .map(|i| (format!("p{}", i), "x".repeat(i + 1)))
            .collect();
        let rows_ref: Vec<(&str, &str)> =
            rows.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let collection = write_collection(temp.path(), &rows_ref);
        let config = IndexConfig::new(100, 8, "default").unwrap();

        let single = temp.path().join("single");
        let sharded = temp.path().join("sharded");
        for (root, nranks) in [(&single, 1), (&sharded, 3)] {
            let engine = indexer(provider()).with_batch_size(2);
            RunContext::scope(RunConfig::single_root(nranks, root), |run| {
                engine.index(run, Path::new("ckpt"), &config, &collection, false)
            })
            .unwrap();
        }

        let a = IndexArtifact::open(&single.join("default")).unwrap();
        let b = IndexArtifact::open(&sharded.join("default")).unwrap();
        assert_eq!(a.pids, b.pids);
        assert_eq!(a.packed_codes, b.packed_codes);
    }

    #[test]
    fn test_batches_respect_batch_size() {
        let temp = TempDir::new().unwrap();
        let rows: Vec<(String, String)> =
            (0..5).map(|i| (i.to_string(), "word".to_string())).collect();
        let rows_ref: Vec<(&str, &str)> =
            rows.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let collection = write_collection(temp.path(), &rows_ref);
        let config = IndexConfig::new(100, 2, "default").unwrap();
        let provider = provider();
        let engine = indexer(provider.clone()).with_batch_size(2);

        RunContext::scope(RunConfig::single_root(1, temp.path().join("out")), |run| {
            engine.index(run, Path::new("ckpt"), &config, &collection, false)
        })
        .unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_conflict_checked_before_loading() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("out");
        std::fs::create_dir_all(out.join("default")).unwrap();
        let provider = provider();
        let engine = indexer(provider.clone());
        let config = IndexConfig::new(100, 2, "default").unwrap();

        let result = RunContext::scope(RunConfig::single_root(1, &out), |run| {
            engine.index(
                run,
                Path::new("ckpt"),
                &config,
                &temp.path().join("missing.tsv"),
                false,
            )
        });

        assert!(matches!(result, Err(IndexerError::AlreadyExists { .. })));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(!out.join(".default.lock").exists());
    }

    #[test]
    fn test_failed_build_cleans_staging() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("out");
        let bad = temp.path().join("bad.tsv");
        std::fs::write(&bad, "1\tok\n1\tduplicate\n").unwrap();
        let config = IndexConfig::new(100, 2, "default").unwrap();
        let engine = indexer(provider());

        let result = RunContext::scope(RunConfig::single_root(2, &out), |run| {
            engine.index(run, Path::new("ckpt"), &config, &bad, false)
        });

        assert!(matches!(result, Err(IndexerError::Input(_))));
        // Only the lock file stays behind; it holds no lock once the run is over
        let leftovers: Vec<String> = std::fs::read_dir(&out)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec![".default.lock".to_string()]);
    }
}
