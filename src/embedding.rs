//! Embedding providers and the batching embedding client.
//!
//! Concrete [`EmbeddingProvider`] implementations:
//! - **[`DisabledProvider`]**: rejects every call; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls `POST /v1/embeddings`.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Providers make exactly one HTTP call per batch. [`EmbeddingClient`]
//! splits inputs into provider-sized batches, runs up to `concurrency`
//! batches at once, and reassembles the results in input order.
//!
//! # Retry Strategy
//!
//! Each batch is retried independently with exponential backoff:
//! - HTTP 429 (rate limited), 5xx, network errors, and timeouts → retry
//! - HTTP 4xx (not 429) or a malformed response → fail immediately
//! - Backoff: `backoff_ms`, doubled per attempt, capped at 32×
//!
//! A request either yields every vector or fails as a whole; partial
//! results are never returned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use rag_gateway_core::embedding::EmbeddingProvider;
use rag_gateway_core::{ProviderError, RagError, Result};

use crate::config::EmbeddingConfig;

/// Instantiate the provider named by `embedding.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => Err(RagError::Configuration(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// Map an HTTP status to a retry class.
pub(crate) fn classify_status(status: reqwest::StatusCode, body: String) -> ProviderError {
    let message = format!("HTTP {}: {}", status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        ProviderError::Transient(message)
    } else {
        ProviderError::Permanent(message)
    }
}

/// Map a transport error to a retry class.
pub(crate) fn classify_transport(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_builder() || err.is_decode() {
        ProviderError::Permanent(err.to_string())
    } else {
        ProviderError::Transient(err.to_string())
    }
}

// ============ Disabled Provider ============

/// A provider that fails every call.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Permanent(
            "Embedding provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI Provider ============

#[derive(Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingItem>,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding provider using the OpenAI API.
///
/// The API key is read once, at construction, from the environment
/// variable named by `embedding.api_key_env`.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::Configuration("embedding.model required for OpenAI provider".into())
        })?;
        let dims = config.dims.ok_or_else(|| {
            RagError::Configuration("embedding.dims required for OpenAI provider".into())
        })?;
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RagError::Configuration(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            model,
            dims,
            url,
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn max_batch_size(&self) -> usize {
        2048
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&OpenAIEmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| classify_transport(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let parsed: OpenAIEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("invalid OpenAI response: {}", e)))?;

        let mut data = parsed.data;
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

// ============ Ollama Provider ============

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::Configuration("embedding.model required for Ollama provider".into())
        })?;
        let dims = config.dims.ok_or_else(|| {
            RagError::Configuration("embedding.dims required for Ollama provider".into())
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url,
            timeout: Duration::from_secs(config.timeout_secs),
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&OllamaEmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| match classify_transport(e, self.timeout) {
                ProviderError::Transient(msg) => ProviderError::Transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, msg
                )),
                other => other,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("invalid Ollama response: {}", e)))?;
        Ok(parsed.embeddings)
    }
}

// ============ Embedding Client ============

/// Tuning knobs for [`EmbeddingClient`].
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub batch_size: usize,
    pub max_retries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
    pub concurrency: usize,
}

impl From<&EmbeddingConfig> for EmbeddingSettings {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
            timeout: Duration::from_secs(config.timeout_secs),
            concurrency: config.concurrency,
        }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self::from(&EmbeddingConfig::default())
    }
}

/// Batching, retrying front end over an [`EmbeddingProvider`].
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    settings: EmbeddingSettings,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: EmbeddingSettings) -> Self {
        Self { provider, settings }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Effective batch size: the configured size, capped by the provider.
    pub fn batch_size(&self) -> usize {
        self.settings
            .batch_size
            .min(self.provider.max_batch_size())
            .max(1)
    }

    /// Embed `texts`, returning one vector per input in input order.
    ///
    /// Fails with [`RagError::EmbeddingProvider`] if any batch fails after
    /// its retries are exhausted, or if the provider returns the wrong
    /// number of vectors or vectors of the wrong dimension.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Owned batches and boxed futures keep the result `Send` for callers
        // that spawn it.
        let batches: Vec<BoxFuture<'static, std::result::Result<Vec<Vec<f32>>, ProviderError>>> =
            texts
                .chunks(self.batch_size())
                .map(|batch| {
                    let client = self.clone();
                    let batch = batch.to_vec();
                    async move { client.embed_batch_with_retry(&batch).await }.boxed()
                })
                .collect();
        let batch_count = batches.len();

        // `buffered` yields results in submission order.
        let results: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .buffered(self.settings.concurrency.max(1))
            .try_collect()
            .await
            .map_err(|cause| RagError::EmbeddingProvider {
                message: format!(
                    "embedding {} texts with {} failed: {}",
                    texts.len(),
                    self.provider.model_name(),
                    cause
                ),
                cause: Some(cause),
            })?;

        let vectors: Vec<Vec<f32>> = results.into_iter().flatten().collect();
        tracing::debug!(
            texts = texts.len(),
            batches = batch_count,
            model = self.provider.model_name(),
            "embedded texts"
        );
        Ok(vectors)
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::EmbeddingProvider {
                message: "empty embedding response".to_string(),
                cause: None,
            })
    }

    async fn embed_batch_with_retry(
        &self,
        batch: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let mut last_err = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay = self.settings.backoff * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let outcome =
                match tokio::time::timeout(self.settings.timeout, self.provider.embed_batch(batch))
                    .await
                {
                    Ok(result) => result.and_then(|vectors| self.check_batch(batch, vectors)),
                    Err(_) => Err(ProviderError::Timeout(self.settings.timeout)),
                };

            match outcome {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "embedding batch failed, retrying");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| ProviderError::Transient("embedding failed after retries".into())))
    }

    fn check_batch(
        &self,
        batch: &[String],
        vectors: Vec<Vec<f32>>,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if vectors.len() != batch.len() {
            return Err(ProviderError::Permanent(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            )));
        }
        let dims = self.provider.dims();
        if dims > 0 {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(ProviderError::Permanent(format!(
                    "provider returned a {}-dimensional vector, expected {}",
                    bad.len(),
                    dims
                )));
            }
        }
        Ok(vectors)
    }
}
