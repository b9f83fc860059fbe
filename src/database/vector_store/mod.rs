
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::{DenseStore, IntegrityReport, StoreError, StoreStats, VectorRecord};
use crate::config::Config;
use crate::embeddings::content_hash;

const META_FILE_NAME: &str = "meta.json";

/// Dense index held in memory and persisted as partitioned JSON files.
///
/// Records are assigned to partitions by id, so a record always lands in the
/// same file for a given partition count.
#[derive(Debug)]
pub struct JsonVectorStore {
    dir: PathBuf,
    num_partitions: usize,
    max_partition_bytes: u64,
    state: RwLock<StoreState>,
    saves: AtomicUsize,
}

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<String, VectorRecord>,
    meta: StoreMeta,
    dirty: bool,
    generation: u64,
}

impl StoreState {
    fn touch(&mut self) {
        self.dirty = true;
        self.generation += 1;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreMeta {
    embedding_model: Option<String>,
    files_missing_embeddings: BTreeSet<String>,
    num_partitions: usize,
    saved_at: Option<DateTime<Utc>>,
}

impl JsonVectorStore {
    /// Open the store configured for `config`, creating it when absent
    #[inline]
    pub async fn new(config: &Config) -> Result<Self, StoreError> {
        Self::open(
            config.vector_database_path(),
            config.indexing.num_partitions as usize,
            config.indexing.max_partition_bytes,
        )
        .await
    }

    /// Open a store directory, loading any previously saved partitions.
    ///
    /// Unreadable partitions are moved aside and the store starts without them.
    #[inline]
    pub async fn open<P: Into<PathBuf>>(
        dir: P,
        num_partitions: usize,
        max_partition_bytes: u64,
    ) -> Result<Self, StoreError> {
        let dir = dir.into();
        debug!("Opening vector store at {:?}", dir);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| io_error(&dir, source))?;

        let state = match Self::load(&dir).await {
            Ok(state) => state,
            Err(StoreError::Corrupt(message)) => {
                error!("Vector store is corrupt: {}", message);
                warn!("Vector store corruption detected, attempting recovery");
                Self::attempt_corruption_recovery(&dir).await?;
                StoreState::default()
            }
            Err(e) => return Err(e),
        };

        info!(
            "Vector store opened with {} records across {} partitions",
            state.records.len(),
            num_partitions.max(1)
        );

        Ok(Self {
            dir,
            num_partitions: num_partitions.max(1),
            max_partition_bytes,
            state: RwLock::new(state),
            saves: AtomicUsize::new(0),
        })
    }

    /// Number of completed saves since the store was opened
    #[inline]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    #[inline]
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    #[inline]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[inline]
    pub async fn get(&self, id: &str) -> Option<VectorRecord> {
        self.state.read().await.records.get(id).cloned()
    }

    /// All records of one note, ordered by id
    #[inline]
    pub async fn records_for(&self, path: &str) -> Vec<VectorRecord> {
        let state = self.state.read().await;
        let mut records: Vec<VectorRecord> = state
            .records
            .values()
            .filter(|record| record.path == path)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn partition_path(dir: &Path, partition: usize) -> PathBuf {
        dir.join(format!("partition-{}.json", partition))
    }

    fn partition_of(&self, id: &str) -> usize {
        let hash = blake3::hash(id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(prefix) % self.num_partitions as u64) as usize
    }

    async fn load(dir: &Path) -> Result<StoreState, StoreError> {
        let meta_path = dir.join(META_FILE_NAME);
        let meta: StoreMeta = match tokio::fs::read(&meta_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("{}: {}", meta_path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreState::default());
            }
            Err(source) => return Err(io_error(&meta_path, source)),
        };

        let mut records = HashMap::new();
        for partition in 0..meta.num_partitions {
            let path = Self::partition_path(dir, partition);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("Partition file missing: {}", path.display());
                    continue;
                }
                Err(source) => return Err(io_error(&path, source)),
            };
            let partition_records: Vec<VectorRecord> = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;
            records.extend(
                partition_records
                    .into_iter()
                    .map(|record| (record.id.clone(), record)),
            );
        }

        debug!(
            "Loaded {} records saved at {:?}",
            records.len(),
            meta.saved_at
        );

        Ok(StoreState {
            records,
            meta,
            dirty: false,
            generation: 0,
        })
    }

    /// Move unreadable files aside so the store can start fresh
    async fn attempt_corruption_recovery(dir: &Path) -> Result<(), StoreError> {
        let backup = dir.join(format!("corrupt-{}", Utc::now().format("%Y%m%d%H%M%S")));
        tokio::fs::create_dir_all(&backup)
            .await
            .map_err(|source| io_error(&backup, source))?;

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|source| io_error(dir, source))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(dir, source))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let target = backup.join(entry.file_name());
                tokio::fs::rename(&path, &target)
                    .await
                    .map_err(|source| io_error(&path, source))?;
            }
        }

        warn!("Corrupt vector store files moved to {}", backup.display());
        Ok(())
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|source| io_error(&tmp, source))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|source| io_error(path, source))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl DenseStore for JsonVectorStore {
    async fn upsert(&self, record: VectorRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.records.insert(record.id.clone(), record);
        state.touch();
        Ok(())
    }

    async fn remove_docs(&self, path: &str) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|_, record| record.path != path);
        let removed = before - state.records.len();
        if removed > 0 {
            debug!("Removed {} records for {}", removed, path);
            state.touch();
        }
        Ok(removed)
    }

    async fn get_indexed_files(&self) -> Result<HashSet<String>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .map(|record| record.path.clone())
            .collect())
    }

    async fn get_latest_file_mtime(&self) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .map(|record| record.mtime)
            .max()
            .unwrap_or(0))
    }

    async fn clear_index(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        info!("Clearing vector index ({} records)", state.records.len());
        state.records.clear();
        state.touch();
        Ok(())
    }

    async fn garbage_collect(&self, live_paths: &HashSet<String>) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let before = state.records.len();
        state
            .records
            .retain(|_, record| live_paths.contains(&record.path));
        let removed = before - state.records.len();

        let missing_before = state.meta.files_missing_embeddings.len();
        state
            .meta
            .files_missing_embeddings
            .retain(|path| live_paths.contains(path));

        if removed > 0 || missing_before != state.meta.files_missing_embeddings.len() {
            info!("Garbage collected {} stale records", removed);
            state.touch();
        }
        Ok(removed)
    }

    async fn save_db(&self) -> Result<(), StoreError> {
        let (partitions, meta, generation, previous_partitions) = {
            let state = self.state.read().await;
            let mut partitions: Vec<Vec<&VectorRecord>> = vec![Vec::new(); self.num_partitions];
            for record in state.records.values() {
                partitions[self.partition_of(&record.id)].push(record);
            }

            let mut encoded = Vec::with_capacity(self.num_partitions);
            for (partition, mut records) in partitions.into_iter().enumerate() {
                records.sort_by(|a, b| a.id.cmp(&b.id));
                let bytes = serde_json::to_vec(&records)?;
                if bytes.len() as u64 > self.max_partition_bytes {
                    return Err(StoreError::CapacityExceeded {
                        partition,
                        bytes: bytes.len(),
                        limit: self.max_partition_bytes,
                    });
                }
                encoded.push(bytes);
            }

            let meta = StoreMeta {
                num_partitions: self.num_partitions,
                saved_at: Some(Utc::now()),
                ..state.meta.clone()
            };
            (
                encoded,
                serde_json::to_vec_pretty(&meta)?,
                state.generation,
                state.meta.num_partitions,
            )
        };

        for (partition, bytes) in partitions.iter().enumerate() {
            Self::write_atomic(&Self::partition_path(&self.dir, partition), bytes).await?;
        }
        for stale in self.num_partitions..previous_partitions {
            let path = Self::partition_path(&self.dir, stale);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove stale partition {}: {}", path.display(), e);
            }
        }
        Self::write_atomic(&self.dir.join(META_FILE_NAME), &meta).await?;

        let mut state = self.state.write().await;
        state.meta.num_partitions = self.num_partitions;
        if state.generation == generation {
            state.dirty = false;
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        info!(
            "Saved {} records to {}",
            state.records.len(),
            self.dir.display()
        );
        Ok(())
    }

    async fn check_index_integrity(&self) -> Result<IntegrityReport, StoreError> {
        let report = {
            let state = self.state.read().await;

            // The most common vector length is taken as the expected dimension
            let mut dimensions: HashMap<usize, usize> = HashMap::new();
            for record in state.records.values() {
                *dimensions.entry(record.embedding.len()).or_default() += 1;
            }
            let expected = dimensions
                .into_iter()
                .filter(|(dimension, _)| *dimension > 0)
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
                .map(|(dimension, _)| dimension);

            let mut invalid_ids = Vec::new();
            let mut affected: BTreeSet<String> = BTreeSet::new();
            for record in state.records.values() {
                let bad_vector = record.embedding.is_empty()
                    || Some(record.embedding.len()) != expected
                    || record.embedding.iter().any(|v| !v.is_finite());
                let bad_id = record.id != content_hash(&record.content);
                if bad_vector || bad_id {
                    invalid_ids.push(record.id.clone());
                    affected.insert(record.path.clone());
                }
            }
            invalid_ids.sort();

            IntegrityReport {
                checked: state.records.len(),
                invalid_ids,
                affected_files: affected.into_iter().collect(),
            }
        };

        if report.is_healthy() {
            debug!("Integrity check passed for {} records", report.checked);
        } else {
            warn!(
                "Integrity check found {} invalid records in {} files",
                report.invalid_ids.len(),
                report.affected_files.len()
            );
            let mut state = self.state.write().await;
            for id in &report.invalid_ids {
                state.records.remove(id);
            }
            state
                .meta
                .files_missing_embeddings
                .extend(report.affected_files.iter().cloned());
            state.touch();
        }

        Ok(report)
    }

    async fn mark_file_missing_embeddings(&self, path: &str) {
        let mut state = self.state.write().await;
        if state
            .meta
            .files_missing_embeddings
            .insert(path.to_string())
        {
            state.touch();
        }
    }

    async fn clear_files_missing_embeddings(&self) {
        let mut state = self.state.write().await;
        if !state.meta.files_missing_embeddings.is_empty() {
            state.meta.files_missing_embeddings.clear();
            state.touch();
        }
    }

    async fn get_files_missing_embeddings(&self) -> HashSet<String> {
        let state = self.state.read().await;
        state.meta.files_missing_embeddings.iter().cloned().collect()
    }

    async fn mark_unsaved_changes(&self) {
        self.state.write().await.touch();
    }

    async fn has_unsaved_changes(&self) -> bool {
        self.state.read().await.dirty
    }

    async fn check_and_handle_embedding_model_change(
        &self,
        model: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let recorded = state
            .meta
            .embedding_model
            .clone()
            .or_else(|| {
                state
                    .records
                    .values()
                    .next()
                    .map(|record| record.embedding_model.clone())
            });

        let changed = recorded.as_deref().is_some_and(|previous| previous != model);
        if changed {
            info!(
                "Embedding model changed from {:?} to {}",
                recorded, model
            );
        }
        if state.meta.embedding_model.as_deref() != Some(model) {
            state.meta.embedding_model = Some(model.to_string());
            state.touch();
        }
        Ok(changed)
    }

    async fn stats(&self) -> StoreStats {
        let state = self.state.read().await;
        let files: HashSet<&str> = state
            .records
            .values()
            .map(|record| record.path.as_str())
            .collect();
        StoreStats {
            records: state.records.len(),
            files: files.len(),
            files_missing_embeddings: state.meta.files_missing_embeddings.len(),
            embedding_model: state.meta.embedding_model.clone(),
            unsaved_changes: state.dirty,
        }
    }
}
