
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{Embedding, EmbeddingError, EmbeddingProvider};
use crate::config::EmbeddingConfig;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
const HTTP_TOO_MANY_REQUESTS: u16 = 429;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    timeout: Duration,
    agent: ureq::Agent,
    retry_attempts: u32,
    retry_base_delay: Duration,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let base_url = config
            .ollama_url()
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        let timeout = Duration::from_secs(config.request_timeout_secs);

        Ok(Self {
            base_url,
            model: config.model.clone(),
            timeout,
            agent: build_agent(timeout),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay: Duration::from_secs(1),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<(), EmbeddingError> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models()?;
        if !models.iter().any(|m| m.name == self.model) {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            return Err(EmbeddingError::Unavailable(format!(
                "Model '{}' is not available. Available models: {:?}",
                self.model, available_models
            )));
        }

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>, EmbeddingError> {
        let url = self.endpoint("/api/tags")?;
        debug!("Fetching available models from {}", url);

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let models_response: ModelsResponse = serde_json::from_str(&response_text)
            .map_err(|e| EmbeddingError::InvalidResponse(format!("models response: {}", e)))?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate embeddings for a batch of texts in a single request
    #[inline]
    pub fn generate_embeddings_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<Embedding>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let request = BatchEmbedRequest {
            model: &self.model,
            inputs: texts,
        };
        let url = self.endpoint("/api/embed")?;
        let request_json = serde_json::to_string(&request)
            .map_err(|e| EmbeddingError::InvalidResponse(format!("request encoding: {}", e)))?;

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let batch_response: BatchEmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| EmbeddingError::InvalidResponse(format!("embed response: {}", e)))?;

        if batch_response.embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                requested: texts.len(),
                returned: batch_response.embeddings.len(),
            });
        }

        debug!("Generated {} embeddings", batch_response.embeddings.len());
        Ok(batch_response.embeddings)
    }

    fn endpoint(&self, path: &str) -> Result<Url, EmbeddingError> {
        self.base_url
            .join(path)
            .map_err(|e| EmbeddingError::Unavailable(format!("invalid endpoint {}: {}", path, e)))
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String, EmbeddingError>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(ureq::Error::StatusCode(HTTP_TOO_MANY_REQUESTS)) => {
                    warn!("Ollama reported rate limit, not retrying");
                    return Err(EmbeddingError::RateLimited(format!(
                        "HTTP {} from {}",
                        HTTP_TOO_MANY_REQUESTS, self.base_url
                    )));
                }
                Err(ureq::Error::StatusCode(status)) if status >= 500 => {
                    warn!(
                        "Server error (status {}), attempt {}/{}",
                        status, attempt, self.retry_attempts
                    );
                    last_error = Some(EmbeddingError::Transport(format!("HTTP {}", status)));
                }
                Err(ureq::Error::StatusCode(status)) => {
                    warn!("Client error (status {}), not retrying", status);
                    return Err(EmbeddingError::Transport(format!(
                        "Client error: HTTP {}",
                        status
                    )));
                }
                Err(ureq::Error::Timeout(_)) => {
                    warn!("Request timed out, attempt {}/{}", attempt, self.retry_attempts);
                    last_error = Some(EmbeddingError::Timeout(self.timeout));
                }
                Err(
                    error @ (ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Io(_)),
                ) => {
                    warn!(
                        "Transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(EmbeddingError::Transport(error.to_string()));
                }
                Err(error) => {
                    warn!("Non-retryable error: {}", error);
                    return Err(EmbeddingError::Transport(error.to_string()));
                }
            }

            if attempt < self.retry_attempts {
                let delay =
                    self.retry_base_delay * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) as u32;
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error
            .unwrap_or_else(|| EmbeddingError::Transport("Request failed after retries".into())))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let client = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.generate_embeddings_batch(&texts))
            .await
            .map_err(|e| EmbeddingError::Transport(format!("embedding task failed: {}", e)))?
    }
}
