// Graph store module
// Tag and link graph for notes: driver abstraction, statements, and the store itself


pub mod driver;
pub mod memory;
pub mod statement;
pub mod store;

#[cfg(feature = "bolt")]
pub mod bolt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{GraphBackend, GraphConfig};
use crate::tags::NormalizedTagPath;

pub use driver::{
    GraphDriver, GraphDriverFactory, GraphSession, WriteCapabilities, WriteTransaction,
};
pub use memory::MemoryGraph;
pub use statement::{CypherQuery, GraphStatement, LinkKind, ParamValue};
pub use store::{GraphStore, WriteStrategy};

/// Graph-relevant snapshot of one note at indexing time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphIndexedNote {
    /// Stable identity, the vault-relative path
    pub note_id: String,
    pub note_path: String,
    pub tags: Vec<NormalizedTagPath>,
    /// Resolved wiki-link target paths, deduplicated
    pub wiki_link_targets: Vec<String>,
    /// Resolved embed target paths, deduplicated
    pub embed_targets: Vec<String>,
    /// Last modification time, epoch millis
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphCredentials {
    Basic { username: String, password: String },
    Bearer(String),
}

/// Where and how to reach the graph database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStoreConnectionConfig {
    pub uri: String,
    pub credentials: Option<GraphCredentials>,
    pub database: Option<String>,
    pub encrypted: bool,
    /// Upper bound for one write transaction
    pub transaction_timeout: Duration,
}

impl GraphStoreConnectionConfig {
    /// A non-empty token wins over username and password
    #[inline]
    pub fn from_config(config: &GraphConfig) -> Self {
        let token = config.token.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let credentials = match token {
            Some(token) => Some(GraphCredentials::Bearer(token.to_string())),
            None if !config.username.trim().is_empty() => Some(GraphCredentials::Basic {
                username: config.username.clone(),
                password: config.password.clone(),
            }),
            None => None,
        };

        Self {
            uri: config.uri.trim().to_string(),
            credentials,
            database: config
                .database
                .as_deref()
                .map(str::trim)
                .filter(|db| !db.is_empty())
                .map(ToString::to_string),
            encrypted: config.encrypted,
            transaction_timeout: Duration::from_secs(config.transaction_timeout_secs.max(1)),
        }
    }
}

/// Toggles that decide whether and what gets written to the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStoreRuntimeOptions {
    pub enabled: bool,
    pub included_tag_prefixes: Vec<String>,
    pub index_all_tags: bool,
    pub include_wiki_links: bool,
    pub include_embeds: bool,
}

impl GraphStoreRuntimeOptions {
    #[inline]
    pub fn from_config(config: &GraphConfig) -> Self {
        Self {
            enabled: config.enabled,
            included_tag_prefixes: config.included_tag_prefixes.clone(),
            index_all_tags: config.index_all_tags,
            include_wiki_links: config.include_wiki_links,
            include_embeds: config.include_embeds,
        }
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph store URI is not configured")]
    MissingUri,
    #[error("Graph store credentials are not configured for {0}")]
    MissingCredentials(String),
    #[error("Graph connection failed: {0}")]
    Connection(String),
    #[error("Graph transaction failed: {0}")]
    Transaction(String),
    #[error("Graph driver does not support {0}")]
    Unsupported(String),
    #[error("Graph transaction timed out after {0:?}")]
    Timeout(Duration),
}

/// Graph operations the ingestion pipeline relies on
#[async_trait]
pub trait NoteGraph: Send + Sync {
    /// Connect if not already connected; failures are logged, never returned
    async fn initialize(&self, connection: &GraphStoreConnectionConfig);

    async fn upsert_note(
        &self,
        note: &GraphIndexedNote,
        options: &GraphStoreRuntimeOptions,
    ) -> Result<(), GraphError>;

    async fn remove_note(&self, note_id: &str) -> Result<(), GraphError>;

    async fn shutdown(&self);
}

/// Driver factory for the configured backend
#[inline]
pub fn driver_factory_for(config: &GraphConfig) -> Result<Arc<dyn GraphDriverFactory>, GraphError> {
    match config.backend {
        GraphBackend::Memory => Ok(Arc::new(MemoryGraph::new())),
        #[cfg(feature = "bolt")]
        GraphBackend::Bolt => Ok(Arc::new(bolt::BoltDriverFactory)),
        #[cfg(not(feature = "bolt"))]
        GraphBackend::Bolt => Err(GraphError::Unsupported(
            "the bolt backend (rebuild with the `bolt` feature)".to_string(),
        )),
    }
}
