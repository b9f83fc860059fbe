#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR_NAME: &str = "vault-ingest";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Connection and throughput settings for the Ollama embedding provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub requests_per_minute: u32,
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            requests_per_minute: 60,
            request_timeout_secs: 120,
        }
    }
}

/// Which files get indexed and how the dense index is persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexingConfig {
    /// Glob patterns over vault-relative paths; empty means everything
    pub inclusions: Vec<String>,
    /// Glob patterns over vault-relative paths that are never indexed
    pub exclusions: Vec<String>,
    /// File extensions treated as notes
    pub extensions: Vec<String>,
    /// Checkpoint interval expressed as a multiple of the batch size
    pub checkpoint_multiplier: u32,
    pub num_partitions: u32,
    pub max_partition_bytes: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            inclusions: Vec::new(),
            exclusions: Vec::new(),
            extensions: vec!["md".to_string()],
            checkpoint_multiplier: 8,
            num_partitions: 1,
            max_partition_bytes: 512 * 1024 * 1024,
        }
    }
}

impl IndexingConfig {
    /// Number of indexed files between forced saves
    #[inline]
    pub fn checkpoint_interval(&self, batch_size: usize) -> usize {
        (self.checkpoint_multiplier as usize).max(1) * batch_size.max(1)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackend {
    /// In-process property graph, lost when the process exits
    #[default]
    Memory,
    /// Bolt-protocol graph database (requires the `bolt` feature)
    Bolt,
}

/// Graph store connection and ingestion toggles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphConfig {
    pub enabled: bool,
    pub backend: GraphBackend,
    pub uri: String,
    pub username: String,
    pub password: String,
    pub token: Option<String>,
    pub database: Option<String>,
    pub encrypted: bool,
    pub included_tag_prefixes: Vec<String>,
    pub index_all_tags: bool,
    pub include_wiki_links: bool,
    pub include_embeds: bool,
    pub transaction_timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: GraphBackend::Memory,
            uri: "bolt://localhost:7687".to_string(),
            username: "neo4j".to_string(),
            password: String::new(),
            token: None,
            database: None,
            encrypted: false,
            included_tag_prefixes: Vec::new(),
            index_all_tags: false,
            include_wiki_links: true,
            include_embeds: true,
            transaction_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid requests per minute: {0} (must be between 1 and 10000)")]
    InvalidRequestsPerMinute(u32),
    #[error("Invalid request timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid chunk size: {0} (must be between 100 and 20000 characters)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid checkpoint multiplier: {0} (must be at least 1)")]
    InvalidCheckpointMultiplier(u32),
    #[error("Invalid partition count: {0} (must be between 1 and 64)")]
    InvalidPartitionCount(u32),
    #[error("Invalid glob pattern '{0}': {1}")]
    InvalidPattern(String, String),
    #[error("No note extensions configured")]
    NoExtensions,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            chunking: ChunkingConfig::default(),
            graph: GraphConfig::default(),
            base_dir: Self::config_dir().unwrap_or_else(|_| PathBuf::from(".vault-ingest")),
        }
    }
}

impl Config {
    /// Default per-user configuration directory
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.validate_indexing_config()?;
        self.validate_chunking_config()?;
        Ok(())
    }

    fn validate_indexing_config(&self) -> Result<(), ConfigError> {
        let config = &self.indexing;

        if config.extensions.iter().all(|ext| ext.trim().is_empty()) {
            return Err(ConfigError::NoExtensions);
        }

        if config.checkpoint_multiplier == 0 {
            return Err(ConfigError::InvalidCheckpointMultiplier(
                config.checkpoint_multiplier,
            ));
        }

        if !(1..=64).contains(&config.num_partitions) {
            return Err(ConfigError::InvalidPartitionCount(config.num_partitions));
        }

        for pattern in config.inclusions.iter().chain(config.exclusions.iter()) {
            Glob::new(pattern)
                .map_err(|e| ConfigError::InvalidPattern(pattern.clone(), e.to_string()))?;
        }

        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(100..=20_000).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.chunk_overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.chunk_overlap,
                config.chunk_size,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Get the directory holding the persisted dense index
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.embedding.ollama_url()
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=10_000).contains(&self.requests_per_minute) {
            return Err(ConfigError::InvalidRequestsPerMinute(
                self.requests_per_minute,
            ));
        }

        if !(1..=600).contains(&self.request_timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.request_timeout_secs));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

/// Live, shareable view of the configuration.
///
/// Readers take a snapshot at each point of use, so updates made while a run
/// is in flight apply to its next batch.
#[derive(Debug, Clone)]
pub struct Settings {
    sender: Arc<watch::Sender<Config>>,
}

impl Settings {
    #[inline]
    pub fn new(config: Config) -> Self {
        let (sender, _) = watch::channel(config);
        Self {
            sender: Arc::new(sender),
        }
    }

    #[inline]
    pub fn snapshot(&self) -> Config {
        self.sender.borrow().clone()
    }

    #[inline]
    pub fn update<F>(&self, modify: F)
    where
        F: FnOnce(&mut Config),
    {
        self.sender.send_modify(modify);
    }

    #[inline]
    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.sender.subscribe()
    }
}
