// Indexer module
// Full-vault and single-file indexing runs, with checkpointing and run control


pub mod control;
pub mod report;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError, Settings};
use crate::database::{DenseStore, StoreError, VectorRecord};
use crate::embeddings::{
    ChunkingConfig, Embedding, EmbeddingError, EmbeddingProvider, ProviderSource, content_hash,
    create_contextual_chunk, split_markdown,
};
use crate::graph::GraphIndexedNote;
use crate::ingest::{IngestionOrchestrator, IngestionPayload};
use crate::rate_limit::RateLimiter;
use crate::tags::normalize_tag_paths;
use crate::vault::{FileFilter, LinkResolver, NoteFile, Vault, VaultError, parse_note};

pub use control::{IndexingControl, RunSignal};
pub use report::{
    ConsoleReporter, IndexRunReport, Notice, Progress, Reporter, RunOutcome, TracingReporter,
};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("An indexing run is already in progress")]
    AlreadyRunning,
    #[error("No embedding provider available: {0}")]
    NoEmbeddingProvider(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl IndexError {
    #[inline]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_capacity())
    }

    #[inline]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::Embedding(e) if e.is_rate_limit())
    }
}

/// Lifecycle of a full indexing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

/// Progress of the current (or last) full run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingState {
    pub phase: RunPhase,
    pub indexed_count: usize,
    pub total_files_to_index: usize,
    pub processed_files: HashSet<String>,
}

/// Why a batch did not complete
#[derive(Debug)]
enum BatchFailure {
    /// The provider asked us to slow down; the run stops early
    RateLimited(EmbeddingError),
    /// The store outgrew its partitions
    Capacity(StoreError),
    /// Anything else fails only the files of this batch
    Other(IndexError),
}

impl From<IndexError> for BatchFailure {
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::Embedding(e) if e.is_rate_limit() => Self::RateLimited(e),
            IndexError::Store(e) if e.is_capacity() => Self::Capacity(e),
            other => Self::Other(other),
        }
    }
}

/// A note read, parsed and split, ready for embedding
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedNote {
    pub file: NoteFile,
    pub title: String,
    /// Raw tags as written in the note
    pub tags: Vec<String>,
    /// Frontmatter plus display timestamps
    pub metadata: Map<String, Value>,
    /// Chunk texts with their retrieval header
    pub chunks: Vec<String>,
    pub graph: GraphIndexedNote,
}

impl PreparedNote {
    fn record(&self, content: &str, embedding: Embedding, model: &str) -> VectorRecord {
        VectorRecord {
            id: content_hash(content),
            path: self.file.path.clone(),
            title: self.title.clone(),
            content: content.to_string(),
            embedding,
            embedding_model: model.to_string(),
            ctime: self.file.ctime,
            mtime: self.file.mtime,
            tags: self.tags.clone(),
            extension: self.file.extension.clone(),
            metadata: self.metadata.clone(),
            created_at: Utc::now().to_rfc3339(),
            nchars: content.chars().count(),
        }
    }
}

fn display_time(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Resolve link targets to vault paths, dropping unresolved and repeated ones
fn resolve_targets(links: &[String], source_path: &str, resolver: &LinkResolver) -> Vec<String> {
    links
        .iter()
        .filter_map(|link| resolver.resolve(link, source_path))
        .unique()
        .collect()
}

/// Parse and chunk one note. Returns `None` when it has no indexable content.
#[inline]
pub fn prepare_note(
    file: &NoteFile,
    content: &str,
    resolver: &LinkResolver,
    chunking: &ChunkingConfig,
) -> Option<PreparedNote> {
    if content.trim().is_empty() {
        return None;
    }

    let parsed = parse_note(content);
    let mut metadata = parsed.frontmatter.clone();
    metadata.insert("created".to_string(), Value::String(display_time(file.ctime)));
    metadata.insert("modified".to_string(), Value::String(display_time(file.mtime)));
    let metadata_json = Value::Object(metadata.clone()).to_string();

    let chunks: Vec<String> = split_markdown(&parsed.body, chunking)
        .iter()
        .filter(|body| !body.trim().is_empty())
        .enumerate()
        .map(|(index, body)| {
            create_contextual_chunk(body, &file.basename, &metadata_json, index > 0)
        })
        .collect();
    if chunks.is_empty() {
        return None;
    }

    let graph = GraphIndexedNote {
        note_id: file.path.clone(),
        note_path: file.path.clone(),
        tags: normalize_tag_paths(&parsed.tags),
        wiki_link_targets: resolve_targets(&parsed.links, &file.path, resolver),
        embed_targets: resolve_targets(&parsed.embeds, &file.path, resolver),
        updated_at: file.mtime,
    };

    Some(PreparedNote {
        file: file.clone(),
        title: file.basename.clone(),
        tags: parsed.tags,
        metadata,
        chunks,
        graph,
    })
}

/// Whether progress moved from below a checkpoint boundary to at or above it
#[inline]
pub fn crossed_checkpoint(previous: usize, current: usize, interval: usize) -> bool {
    let interval = interval.max(1);
    current / interval > previous / interval
}

/// An embedding is usable when it is non-empty and finite
fn is_valid_embedding(embedding: &[f32]) -> bool {
    !embedding.is_empty() && embedding.iter().all(|value| value.is_finite())
}

struct QueuedChunk {
    note: usize,
    chunk: usize,
}

/// Clears the running flag when the run ends, however it ends
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Result<Self, IndexError> {
        running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| IndexError::AlreadyRunning)?;
        Ok(Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives indexing of a vault into the dense store and the graph.
///
/// Only one full run may be active at a time. Batch size, rate limit,
/// checkpoint interval and filters are read from the live settings at each
/// batch.
pub struct IndexOperations {
    settings: Settings,
    vault: Arc<dyn Vault>,
    store: Arc<dyn DenseStore>,
    providers: Arc<dyn ProviderSource>,
    orchestrator: IngestionOrchestrator,
    reporter: Arc<dyn Reporter>,
    rate_limiter: RateLimiter,
    control: IndexingControl,
    state: Mutex<IndexingState>,
    running: AtomicBool,
    finalizer: Mutex<Option<JoinHandle<()>>>,
}

impl IndexOperations {
    #[inline]
    pub fn new(
        settings: Settings,
        vault: Arc<dyn Vault>,
        store: Arc<dyn DenseStore>,
        providers: Arc<dyn ProviderSource>,
        orchestrator: IngestionOrchestrator,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(settings.snapshot().embedding.requests_per_minute);
        Self {
            settings,
            vault,
            store,
            providers,
            orchestrator,
            reporter,
            rate_limiter,
            control: IndexingControl::new(),
            state: Mutex::new(IndexingState::default()),
            running: AtomicBool::new(false),
            finalizer: Mutex::new(None),
        }
    }

    /// Handle for pausing, resuming or cancelling the active run
    #[inline]
    pub fn control(&self) -> IndexingControl {
        self.control.clone()
    }

    #[inline]
    pub fn pause_indexing(&self) {
        self.control.pause();
    }

    #[inline]
    pub fn resume_indexing(&self) {
        self.control.resume();
    }

    #[inline]
    pub fn cancel_indexing(&self) {
        self.control.cancel();
    }

    #[inline]
    pub fn state(&self) -> IndexingState {
        lock(&self.state).clone()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for the post-run save and integrity check to finish
    #[inline]
    pub async fn wait_for_background_tasks(&self) {
        let handle = lock(&self.finalizer).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Background finalization task failed: {}", e);
            }
        }
    }

    /// Finish background work and release the graph connection
    #[inline]
    pub async fn shutdown(&self) {
        self.wait_for_background_tasks().await;
        self.orchestrator.shutdown().await;
    }

    /// Index every qualifying note of the vault.
    ///
    /// With `overwrite` the index is rebuilt from scratch; otherwise only new,
    /// modified, or previously failed notes are embedded.
    #[inline]
    pub async fn index_vault_to_vector_store(
        &self,
        overwrite: bool,
    ) -> Result<IndexRunReport, IndexError> {
        let _guard = RunGuard::acquire(&self.running)?;

        let provider = match self.providers.provider() {
            Ok(provider) => provider,
            Err(e) => {
                error!("Embedding provider not found: {}", e);
                self.reporter.notice(&Notice::FatalError);
                return Ok(IndexRunReport::empty(RunOutcome::Aborted));
            }
        };

        match self.run_full_index(provider.as_ref(), overwrite).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("Fatal error during indexing: {}", e);
                lock(&self.state).phase = RunPhase::Failed;
                self.notify_failure(&e, None);
                Err(e)
            }
        }
    }

    async fn run_full_index(
        &self,
        provider: &dyn EmbeddingProvider,
        overwrite: bool,
    ) -> Result<IndexRunReport, IndexError> {
        let mut overwrite = overwrite;
        if self
            .store
            .check_and_handle_embedding_model_change(provider.model_name())
            .await?
        {
            info!("Embedding model changed, rebuilding the whole index");
            overwrite = true;
        }

        let config = self.settings.snapshot();
        let vault_files = self.vault.list_notes().await?;
        let filter = FileFilter::from_config(&config.indexing)?;

        if overwrite {
            self.store.clear_index().await?;
            self.store.clear_files_missing_embeddings().await;
        } else {
            let live: HashSet<String> = vault_files
                .iter()
                .filter(|file| filter.matches(file))
                .map(|file| file.path.clone())
                .collect();
            let removed = self.store.garbage_collect(&live).await?;
            if removed > 0 {
                info!("Garbage collected {} stale records", removed);
            }
        }

        let files = self.files_to_index(&vault_files, &filter, overwrite).await?;
        if files.is_empty() {
            self.reporter.notice(&Notice::UpToDate);
            return Ok(IndexRunReport::empty(RunOutcome::UpToDate));
        }

        self.control.reset();
        *lock(&self.state) = IndexingState {
            phase: RunPhase::Running,
            indexed_count: 0,
            total_files_to_index: files.len(),
            processed_files: HashSet::new(),
        };
        self.reporter.notice(&Notice::Started {
            total_files: files.len(),
        });
        self.report_progress(false);
        self.store.clear_files_missing_embeddings().await;

        let resolver = LinkResolver::new(&vault_files);
        let notes = self.prepare_notes(&files, &resolver, &config.chunking).await;
        let queue: Vec<QueuedChunk> = notes
            .iter()
            .enumerate()
            .flat_map(|(note, prepared)| {
                (0..prepared.chunks.len()).map(move |chunk| QueuedChunk { note, chunk })
            })
            .collect();

        if queue.is_empty() {
            lock(&self.state).phase = RunPhase::Completed;
            self.reporter.notice(&Notice::NoValidContent);
            return Ok(IndexRunReport::empty(RunOutcome::Completed));
        }

        // Old records of a re-embedded note go the first time a batch stores one of its chunks
        let mut stale: HashSet<String> = if overwrite {
            HashSet::new()
        } else {
            notes.iter().map(|note| note.file.path.clone()).collect()
        };
        let mut errors = Vec::new();
        self.run_batches(provider, &notes, queue, &mut stale, &mut errors).await;
        self.ingest_graph_notes(&notes).await;

        let cancelled = self.control.is_cancelled();
        let (outcome, phase, notice) = if cancelled {
            (RunOutcome::Cancelled, RunPhase::Cancelled, Notice::Cancelled)
        } else if errors.is_empty() {
            (RunOutcome::Completed, RunPhase::Completed, Notice::Completed)
        } else {
            (
                RunOutcome::CompletedWithErrors,
                RunPhase::Completed,
                Notice::CompletedWithErrors {
                    errors: errors.len(),
                },
            )
        };

        let (indexed_count, total_files) = {
            let mut state = lock(&self.state);
            state.phase = phase;
            (state.indexed_count, state.total_files_to_index)
        };
        self.reporter.notice(&notice);
        self.spawn_finalizer();

        Ok(IndexRunReport {
            indexed_count,
            total_files,
            outcome,
            errors,
        })
    }

    /// Files that qualify for this run under the current filters
    async fn files_to_index(
        &self,
        vault_files: &[NoteFile],
        filter: &FileFilter,
        overwrite: bool,
    ) -> Result<Vec<NoteFile>, IndexError> {
        let (indexed, latest_mtime, missing) = if overwrite {
            (HashSet::new(), i64::MIN, HashSet::new())
        } else {
            (
                self.store.get_indexed_files().await?,
                self.store.get_latest_file_mtime().await?,
                self.store.get_files_missing_embeddings().await,
            )
        };

        let mut files = Vec::new();
        let mut empty = 0_usize;
        for file in vault_files.iter().filter(|file| filter.matches(file)) {
            let content = match self.vault.read(&file.path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", file.path, e);
                    continue;
                }
            };
            if content.trim().is_empty() {
                empty += 1;
                continue;
            }

            if overwrite
                || !indexed.contains(&file.path)
                || missing.contains(&file.path)
                || file.mtime > latest_mtime
            {
                files.push(file.clone());
            }
        }

        info!(
            "Files to index: {}, previously indexed: {}, empty files skipped: {}, \
             files missing embeddings: {}",
            files.len(),
            indexed.len(),
            empty,
            missing.len()
        );
        Ok(files)
    }

    async fn prepare_notes(
        &self,
        files: &[NoteFile],
        resolver: &LinkResolver,
        chunking: &ChunkingConfig,
    ) -> Vec<PreparedNote> {
        let mut notes = Vec::with_capacity(files.len());
        for file in files {
            match self.vault.read(&file.path).await {
                Ok(content) => {
                    if let Some(note) = prepare_note(file, &content, resolver, chunking) {
                        notes.push(note);
                    }
                }
                Err(e) => warn!("Failed to read {}: {}", file.path, e),
            }
        }
        notes
    }

    async fn run_batches(
        &self,
        provider: &dyn EmbeddingProvider,
        notes: &[PreparedNote],
        mut queue: Vec<QueuedChunk>,
        stale: &mut HashSet<String>,
        errors: &mut Vec<String>,
    ) {
        let mut next = 0;
        while next < queue.len() {
            if self.control.is_cancelled() {
                break;
            }
            if self.control.is_paused() && !self.wait_and_refresh(notes, &mut queue, next).await {
                break;
            }
            if next >= queue.len() {
                break;
            }

            let config = self.settings.snapshot();
            let batch_size = (config.embedding.batch_size as usize).max(1);
            let end = (next + batch_size).min(queue.len());
            let batch = &queue[next..end];
            next = end;

            self.rate_limiter
                .set_requests_per_minute(config.embedding.requests_per_minute);
            self.rate_limiter.wait().await;

            let previous = lock(&self.state).indexed_count;
            let result = self
                .process_batch(provider, notes, batch, stale, errors, &config)
                .await;
            let current = lock(&self.state).indexed_count;
            self.report_progress(false);

            let checkpoint = config.indexing.checkpoint_interval(batch_size);
            let result = match result {
                Ok(()) if crossed_checkpoint(previous, current, checkpoint) => {
                    let saved = self.store.save_db().await.map_err(IndexError::from);
                    if saved.is_ok() {
                        info!("Index checkpoint save completed at {} files", current);
                    }
                    saved
                }
                other => other,
            };

            if let Err(e) = result {
                let first_path = batch
                    .first()
                    .map(|entry| notes[entry.note].file.path.clone())
                    .unwrap_or_default();
                let first_len = batch
                    .first()
                    .map_or(0, |entry| notes[entry.note].chunks[entry.chunk].len());
                error!(
                    "Batch processing error: {} (batch size {}, first chunk {} with {} bytes)",
                    e,
                    batch.len(),
                    first_path,
                    first_len
                );
                errors.push(first_path.clone());

                match BatchFailure::from(e) {
                    BatchFailure::RateLimited(e) => {
                        warn!("Stopping indexing after rate limit: {}", e);
                        break;
                    }
                    BatchFailure::Capacity(e) => {
                        debug!("Capacity failure: {}", e);
                        self.reporter.notice(&Notice::CapacityExceeded {
                            partitions: config.indexing.num_partitions,
                        });
                    }
                    BatchFailure::Other(e) => {
                        debug!("Batch failure starting at {}: {}", first_path, e);
                        self.reporter.notice(&Notice::FileError { path: first_path });
                    }
                }
            }
        }
    }

    /// Block while paused, then drop queued chunks of files the current
    /// filters exclude. Returns false when the run must stop.
    async fn wait_and_refresh(
        &self,
        notes: &[PreparedNote],
        queue: &mut Vec<QueuedChunk>,
        next: usize,
    ) -> bool {
        lock(&self.state).phase = RunPhase::Paused;
        self.report_progress(true);

        if self.control.wait_while_paused().await == RunSignal::Cancelled {
            return false;
        }
        lock(&self.state).phase = RunPhase::Running;

        let config = self.settings.snapshot();
        let filter = match FileFilter::from_config(&config.indexing) {
            Ok(filter) => filter,
            Err(e) => {
                warn!("Could not re-evaluate files after resume: {}", e);
                return true;
            }
        };

        let remaining: Vec<QueuedChunk> = queue
            .drain(next..)
            .filter(|entry| filter.matches(&notes[entry.note].file))
            .collect();
        if remaining.is_empty() {
            info!("No files to index after filter change, stopping indexing");
            self.control.cancel();
            self.reporter.notice(&Notice::NoFilesAfterFilterChange);
            return false;
        }

        let total = {
            let mut state = lock(&self.state);
            let pending = remaining
                .iter()
                .map(|entry| &notes[entry.note].file.path)
                .filter(|path| !state.processed_files.contains(*path))
                .unique()
                .count();
            state.total_files_to_index = state.processed_files.len() + pending;
            state.total_files_to_index
        };
        queue.extend(remaining);
        info!("Total files to index: {}", total);
        self.report_progress(false);
        true
    }

    async fn process_batch(
        &self,
        provider: &dyn EmbeddingProvider,
        notes: &[PreparedNote],
        batch: &[QueuedChunk],
        stale: &mut HashSet<String>,
        errors: &mut Vec<String>,
        config: &Config,
    ) -> Result<(), IndexError> {
        let texts: Vec<String> = batch
            .iter()
            .map(|entry| notes[entry.note].chunks[entry.chunk].clone())
            .collect();
        let timeout = Duration::from_secs(config.embedding.request_timeout_secs.max(1));
        let embeddings = embed_with_timeout(provider, &texts, timeout).await?;

        for (entry, embedding) in batch.iter().zip(embeddings) {
            let note = &notes[entry.note];
            let path = &note.file.path;
            if !is_valid_embedding(&embedding) {
                error!("Invalid embedding for document {}", path);
                self.store.mark_file_missing_embeddings(path).await;
                continue;
            }

            if stale.remove(path) {
                let removed = self.store.remove_docs(path).await?;
                debug!("Replacing {} old records of {}", removed, path);
            }

            let record = note.record(&note.chunks[entry.chunk], embedding, provider.model_name());
            match self.store.upsert(record).await {
                Ok(()) => {
                    let mut state = lock(&self.state);
                    state.processed_files.insert(path.clone());
                    state.indexed_count = state.processed_files.len();
                }
                Err(e) => {
                    error!("Error indexing file {}: {}", path, e);
                    errors.push(path.clone());
                    self.store.mark_file_missing_embeddings(path).await;
                    if e.is_capacity() {
                        self.reporter.notice(&Notice::CapacityExceeded {
                            partitions: config.indexing.num_partitions,
                        });
                    } else {
                        self.reporter.notice(&Notice::FileError { path: path.clone() });
                    }
                }
            }
        }
        Ok(())
    }

    /// Graph ingestion for every note with at least one stored chunk
    async fn ingest_graph_notes(&self, notes: &[PreparedNote]) {
        if notes.is_empty() || !self.orchestrator.graph_enabled() {
            return;
        }

        let processed = lock(&self.state).processed_files.clone();
        for note in notes.iter().filter(|note| processed.contains(&note.file.path)) {
            let payload = IngestionPayload {
                note: note.graph.clone(),
                dense_chunks: Vec::new(),
            };
            if let Err(e) = self.orchestrator.ingest(&payload).await {
                warn!("Graph ingestion failed for note {}: {}", note.file.path, e);
            }
        }
    }

    /// Save and check integrity after the run has been reported
    fn spawn_finalizer(&self) {
        let store = Arc::clone(&self.store);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Err(e) = store.save_db().await {
                error!("Background save failed: {}", e);
                return;
            }
            info!("Index final save completed");
            match store.check_index_integrity().await {
                Ok(report) if report.is_healthy() => {
                    debug!("Index integrity check passed for {} records", report.checked);
                }
                Ok(report) => warn!(
                    "Index integrity check found {} invalid records in {} files",
                    report.invalid_ids.len(),
                    report.affected_files.len()
                ),
                Err(e) => error!("Background integrity check failed: {}", e),
            }
        });

        *lock(&self.finalizer) = Some(handle);
    }

    /// Re-embed one note after it changed.
    ///
    /// Escalates to a full rebuild when the embedding model changed. Changes
    /// are marked unsaved rather than written immediately.
    #[inline]
    pub async fn reindex_file(&self, path: &str) -> Result<(), IndexError> {
        match self.reindex_file_inner(path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Error indexing file {}: {}", path, e);
                self.notify_failure(&e, Some(path));
                Err(e)
            }
        }
    }

    async fn reindex_file_inner(&self, path: &str) -> Result<(), IndexError> {
        let provider = self
            .providers
            .provider()
            .map_err(|e| IndexError::NoEmbeddingProvider(e.to_string()))?;

        self.store.remove_docs(path).await?;

        if self
            .store
            .check_and_handle_embedding_model_change(provider.model_name())
            .await?
        {
            info!("Embedding model changed, rebuilding the whole index");
            self.index_vault_to_vector_store(true).await?;
            return Ok(());
        }

        let config = self.settings.snapshot();
        let file = self.vault.stat(path).await?;
        let content = self.vault.read(path).await?;
        let resolver = LinkResolver::new(&self.vault.list_notes().await?);
        let Some(note) = prepare_note(&file, &content, &resolver, &config.chunking) else {
            debug!("Nothing to index in {}", path);
            self.store.mark_unsaved_changes().await;
            return Ok(());
        };

        self.rate_limiter
            .set_requests_per_minute(config.embedding.requests_per_minute);
        self.rate_limiter.wait().await;
        let timeout = Duration::from_secs(config.embedding.request_timeout_secs.max(1));
        let embeddings = embed_with_timeout(provider.as_ref(), &note.chunks, timeout).await?;

        let mut records = Vec::with_capacity(note.chunks.len());
        for (content, embedding) in note.chunks.iter().zip(embeddings) {
            if is_valid_embedding(&embedding) {
                records.push(note.record(content, embedding, provider.model_name()));
            } else {
                error!("Invalid embedding for document {}", path);
                self.store.mark_file_missing_embeddings(path).await;
            }
        }

        self.orchestrator
            .ingest(&IngestionPayload {
                note: note.graph.clone(),
                dense_chunks: records,
            })
            .await?;
        self.store.mark_unsaved_changes().await;
        debug!("Reindexed file: {}", path);
        Ok(())
    }

    /// Remove a deleted note from both stores
    #[inline]
    pub async fn remove_note(&self, path: &str) -> Result<(), IndexError> {
        self.orchestrator.remove_note(path).await?;
        self.store.mark_unsaved_changes().await;
        Ok(())
    }

    /// Remove a deleted note from the graph, connecting on demand
    #[inline]
    pub async fn remove_note_from_graph(&self, note_id: &str) {
        self.orchestrator.remove_from_graph(note_id).await;
    }

    fn report_progress(&self, paused: bool) {
        let state = lock(&self.state);
        let progress = Progress {
            indexed: state.indexed_count,
            total: state.total_files_to_index,
            paused,
        };
        drop(state);
        self.reporter.progress(progress);
    }

    /// Rate-limit failures get no notice of their own
    fn notify_failure(&self, error: &IndexError, path: Option<&str>) {
        let notice = if error.is_capacity() {
            Notice::CapacityExceeded {
                partitions: self.settings.snapshot().indexing.num_partitions,
            }
        } else if error.is_rate_limit() {
            return;
        } else if let Some(path) = path {
            Notice::FileError {
                path: path.to_string(),
            }
        } else {
            Notice::FatalError
        };
        self.reporter.notice(&notice);
    }
}

/// Embed `texts`, requiring exactly one vector per text
async fn embed_with_timeout(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    timeout: Duration,
) -> Result<Vec<Embedding>, IndexError> {
    let embeddings = tokio::time::timeout(timeout, provider.embed_documents(texts))
        .await
        .map_err(|_| EmbeddingError::Timeout(timeout))??;

    if embeddings.len() != texts.len() {
        return Err(EmbeddingError::CountMismatch {
            requested: texts.len(),
            returned: embeddings.len(),
        }
        .into());
    }
    Ok(embeddings)
}
