// Database module
// Dense vector store contract and its partitioned JSON implementation

#[cfg(test)]
mod tests;

pub mod vector_store;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use vector_store::JsonVectorStore;

/// One embedded chunk as persisted in the dense index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Content hash of `content`
    pub id: String,
    /// Vault-relative path of the owning note
    pub path: String,
    pub title: String,
    /// Chunk text including its retrieval header
    pub content: String,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    /// Note creation time, epoch millis
    pub ctime: i64,
    /// Note modification time, epoch millis
    pub mtime: i64,
    pub tags: Vec<String>,
    pub extension: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Timestamp when this embedding was created
    pub created_at: String,
    pub nchars: usize,
}

/// Outcome of an index integrity check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub checked: usize,
    /// Records with empty or wrongly sized vectors, or ids that do not match their content
    pub invalid_ids: Vec<String>,
    /// Files owning at least one invalid record
    pub affected_files: Vec<String>,
}

impl IntegrityReport {
    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.invalid_ids.is_empty()
    }
}

/// Summary of the persisted index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub records: usize,
    pub files: usize,
    pub files_missing_embeddings: usize,
    pub embedding_model: Option<String>,
    pub unsaved_changes: bool,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "Partition {partition} needs {bytes} bytes, over the {limit} byte limit; \
         increase the number of partitions"
    )]
    CapacityExceeded {
        partition: usize,
        bytes: usize,
        limit: u64,
    },
    #[error("Vector store IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Vector store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Vector store file is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the store outgrew its partitioning
    #[inline]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

/// Dense vector index consumed by the indexer
#[async_trait]
pub trait DenseStore: Send + Sync {
    /// Insert or replace a record by id
    async fn upsert(&self, record: VectorRecord) -> Result<(), StoreError>;

    /// Remove every record of a note, returning how many were removed
    async fn remove_docs(&self, path: &str) -> Result<usize, StoreError>;

    async fn get_indexed_files(&self) -> Result<HashSet<String>, StoreError>;

    /// Newest note modification time present in the index, 0 when empty
    async fn get_latest_file_mtime(&self) -> Result<i64, StoreError>;

    async fn clear_index(&self) -> Result<(), StoreError>;

    /// Drop records whose note is not in `live_paths`, returning how many were removed
    async fn garbage_collect(&self, live_paths: &HashSet<String>) -> Result<usize, StoreError>;

    /// Persist the index to durable storage
    async fn save_db(&self) -> Result<(), StoreError>;

    async fn check_index_integrity(&self) -> Result<IntegrityReport, StoreError>;

    async fn mark_file_missing_embeddings(&self, path: &str);

    async fn clear_files_missing_embeddings(&self);

    async fn get_files_missing_embeddings(&self) -> HashSet<String>;

    /// Record that in-memory state differs from what is on disk
    async fn mark_unsaved_changes(&self);

    async fn has_unsaved_changes(&self) -> bool;

    /// Returns true when the index was built with a different model.
    ///
    /// The store adopts `model` as its current model either way.
    async fn check_and_handle_embedding_model_change(&self, model: &str)
    -> Result<bool, StoreError>;

    async fn stats(&self) -> StoreStats;

    /// Save only when there are unsaved changes
    async fn save_if_dirty(&self) -> Result<bool, StoreError> {
        if self.has_unsaved_changes().await {
            self.save_db().await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
