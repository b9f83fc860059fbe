// Ingestion orchestration
// Writes each note to the dense index first, then to the graph on a best-effort basis


use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::database::{DenseStore, StoreError, VectorRecord};
use crate::graph::{
    GraphIndexedNote, GraphStoreConnectionConfig, GraphStoreRuntimeOptions, NoteGraph,
};

/// Destination for embedded chunks
#[async_trait]
pub trait DenseVectorWriter: Send + Sync {
    async fn upsert_chunks(&self, chunks: &[VectorRecord]) -> Result<(), StoreError>;

    async fn remove_note(&self, note_id: &str) -> Result<(), StoreError>;
}

/// Everything written for one note
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionPayload {
    pub note: GraphIndexedNote,
    /// Already embedded chunks; empty when the dense side was handled elsewhere
    pub dense_chunks: Vec<VectorRecord>,
}

/// [`DenseVectorWriter`] over a [`DenseStore`]
#[derive(Clone)]
pub struct DenseIndexWriter {
    store: Arc<dyn DenseStore>,
}

impl DenseIndexWriter {
    #[inline]
    pub fn new(store: Arc<dyn DenseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DenseVectorWriter for DenseIndexWriter {
    async fn upsert_chunks(&self, chunks: &[VectorRecord]) -> Result<(), StoreError> {
        for chunk in chunks {
            self.store.upsert(chunk.clone()).await?;
        }
        Ok(())
    }

    async fn remove_note(&self, note_id: &str) -> Result<(), StoreError> {
        let removed = self.store.remove_docs(note_id).await?;
        debug!("Removed {} dense records for {}", removed, note_id);
        Ok(())
    }
}

pub type ConnectionProvider = Arc<dyn Fn() -> GraphStoreConnectionConfig + Send + Sync>;
pub type OptionsProvider = Arc<dyn Fn() -> GraphStoreRuntimeOptions + Send + Sync>;

/// Coordinates the dense writer and the graph store.
///
/// Connection and runtime options are fetched on every call, so settings
/// changes apply without rebuilding the orchestrator. Graph failures are
/// logged and never fail the ingestion.
#[derive(Clone)]
pub struct IngestionOrchestrator {
    dense: Arc<dyn DenseVectorWriter>,
    graph: Arc<dyn NoteGraph>,
    connection: ConnectionProvider,
    options: OptionsProvider,
}

impl IngestionOrchestrator {
    #[inline]
    pub fn new(
        dense: Arc<dyn DenseVectorWriter>,
        graph: Arc<dyn NoteGraph>,
        connection: ConnectionProvider,
        options: OptionsProvider,
    ) -> Self {
        Self {
            dense,
            graph,
            connection,
            options,
        }
    }

    /// Orchestrator whose graph configuration follows the live settings
    #[inline]
    pub fn from_settings(
        dense: Arc<dyn DenseVectorWriter>,
        graph: Arc<dyn NoteGraph>,
        settings: &Settings,
    ) -> Self {
        let for_connection = settings.clone();
        let for_options = settings.clone();
        Self::new(
            dense,
            graph,
            Arc::new(move || {
                GraphStoreConnectionConfig::from_config(&for_connection.snapshot().graph)
            }),
            Arc::new(move || GraphStoreRuntimeOptions::from_config(&for_options.snapshot().graph)),
        )
    }

    /// Whether graph writes are currently enabled in the settings
    #[inline]
    pub fn graph_enabled(&self) -> bool {
        (self.options)().enabled
    }

    #[inline]
    pub async fn ingest(&self, payload: &IngestionPayload) -> Result<(), StoreError> {
        if !payload.dense_chunks.is_empty() {
            self.dense.upsert_chunks(&payload.dense_chunks).await?;
        }

        let options = (self.options)();
        if options.enabled {
            self.graph.initialize(&(self.connection)()).await;
        }

        if let Err(e) = self.graph.upsert_note(&payload.note, &options).await {
            warn!("Graph ingestion failed for {}: {}", payload.note.note_id, e);
        }
        Ok(())
    }

    #[inline]
    pub async fn remove_note(&self, note_id: &str) -> Result<(), StoreError> {
        self.dense.remove_note(note_id).await?;
        self.remove_from_graph(note_id).await;
        Ok(())
    }

    /// Delete the note from the graph only, connecting on demand
    #[inline]
    pub async fn remove_from_graph(&self, note_id: &str) {
        if !self.graph_enabled() {
            return;
        }
        self.graph.initialize(&(self.connection)()).await;
        if let Err(e) = self.graph.remove_note(note_id).await {
            warn!("Graph removal failed for {}: {}", note_id, e);
        }
    }

    #[inline]
    pub async fn shutdown(&self) {
        self.graph.shutdown().await;
    }
}
