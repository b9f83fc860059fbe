use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Vector store error: {0}")]
    Store(#[from] database::StoreError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] embeddings::EmbeddingError),

    #[error("Graph store error: {0}")]
    Graph(#[from] graph::GraphError),

    #[error("Vault error: {0}")]
    Vault(#[from] vault::VaultError),

    #[error("Indexing error: {0}")]
    Index(#[from] indexer::IndexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod graph;
pub mod indexer;
pub mod ingest;
pub mod rate_limit;
pub mod tags;
pub mod vault;
