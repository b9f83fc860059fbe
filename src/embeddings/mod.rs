// Embeddings module
// Provider abstraction, the Ollama provider, and markdown chunking

pub mod chunking;
pub mod ollama;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Settings;

pub use chunking::{ChunkingConfig, content_hash, create_contextual_chunk, split_markdown};
pub use ollama::OllamaClient;

pub type Embedding = Vec<f32>;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding provider is unavailable: {0}")]
    Unavailable(String),
    #[error("Embedding rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("Embedding request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Embedding transport error: {0}")]
    Transport(String),
    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("Embedding model returned {returned} embeddings for {requested} documents")]
    CountMismatch { requested: usize, returned: usize },
}

impl EmbeddingError {
    /// Whether the provider asked us to slow down
    #[inline]
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Transport(message) | Self::InvalidResponse(message) => {
                message.to_lowercase().contains("rate limit")
            }
            _ => false,
        }
    }
}

/// Computes dense vectors for batches of documents.
///
/// Implementations must return exactly one embedding per input text, in order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the model producing the vectors
    fn model_name(&self) -> &str;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError>;
}

/// Resolves the embedding provider to use for a run
pub trait ProviderSource: Send + Sync {
    fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError>;
}

/// Builds an Ollama client from the current settings on every resolution
#[derive(Debug, Clone)]
pub struct OllamaProviderSource {
    settings: Settings,
}

impl OllamaProviderSource {
    #[inline]
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl ProviderSource for OllamaProviderSource {
    fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
        let config = self.settings.snapshot();
        let client = OllamaClient::new(&config.embedding)
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        Ok(Arc::new(client))
    }
}

/// Always hands out the same provider
impl ProviderSource for Arc<dyn EmbeddingProvider> {
    fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
        Ok(Arc::clone(self))
    }
}
