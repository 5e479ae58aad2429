//! Generation providers and the cancellable token stream.
//!
//! A [`GenerationProvider`] is a producer: it pushes tokens into a bounded
//! channel and watches a [`CancellationToken`]. [`GenerationClient::generate`]
//! runs the provider in its own task and hands the consumer a
//! [`TokenStream`]. The channel bound gives backpressure: a slow consumer
//! suspends the provider instead of growing a buffer.
//!
//! Dropping a [`TokenStream`] cancels its token, so a disconnected caller
//! aborts the in-flight HTTP request instead of merely stopping iteration.
//!
//! Providers:
//! - **[`OpenAIChatProvider`]**: `POST /v1/chat/completions` with `stream: true` (SSE).
//! - **[`OllamaGenerateProvider`]**: `POST /api/generate` (newline-delimited JSON).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use rag_gateway_core::prompt::PromptEnvelope;
use rag_gateway_core::{ProviderError, RagError, Result};

use crate::config::GenerationConfig;
use crate::embedding::{classify_status, classify_transport};

/// A backend that turns a prompt into a stream of tokens.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Stream tokens for `envelope` into `tx` until the provider signals
    /// completion.
    ///
    /// Implementations must stop promptly once `cancel` fires or `tx` is
    /// closed, and must not send anything after returning.
    async fn stream(
        &self,
        envelope: &PromptEnvelope,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> std::result::Result<(), ProviderError>;
}

/// Instantiate the provider named by `generation.provider`.
pub fn create_provider(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIChatProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerateProvider::new(config)?)),
        other => Err(RagError::Configuration(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}

/// Split complete lines off the front of `buf`, leaving any partial line.
fn drain_lines(buf: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.find('\n') {
        let line: String = buf.drain(..=pos).collect();
        lines.push(line.trim_end_matches(['\r', '\n']).to_string());
    }
    lines
}

// ============ OpenAI Provider ============

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Deserialize, Default)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions provider for OpenAI-compatible APIs.
pub struct OpenAIChatProvider {
    model: String,
    url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAIChatProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RagError::Configuration(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        envelope: &PromptEnvelope,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> std::result::Result<(), ProviderError> {
        let request = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: [ChatMessage {
                    role: "user",
                    content: &envelope.prompt,
                }],
                temperature: envelope.temperature,
                max_tokens: envelope.max_tokens,
                stream: true,
            })
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            r = request => r.map_err(|e| classify_transport(e, self.timeout))?,
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let mut body = response.bytes_stream();
        let mut buf = String::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = body.next() => next,
            };
            let Some(bytes) = next else {
                return Ok(());
            };
            let bytes = bytes.map_err(|e| classify_transport(e, self.timeout))?;
            buf.push_str(&String::from_utf8_lossy(&bytes));

            for line in drain_lines(&mut buf) {
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return Ok(());
                }
                let chunk: ChatChunk = serde_json::from_str(data).map_err(|e| {
                    ProviderError::Permanent(format!("invalid stream chunk: {}", e))
                })?;
                for choice in chunk.choices {
                    if let Some(token) = choice.delta.content.filter(|t| !t.is_empty()) {
                        if tx.send(token).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

// ============ Ollama Provider ============

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaGenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Streaming provider for a local Ollama instance.
pub struct OllamaGenerateProvider {
    model: String,
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaGenerateProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            timeout: Duration::from_secs(config.timeout_secs),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerateProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        envelope: &PromptEnvelope,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> std::result::Result<(), ProviderError> {
        let request = self
            .client
            .post(format!("{}/api/generate", self.url.trim_end_matches('/')))
            .json(&OllamaGenerateRequest {
                model: &self.model,
                prompt: &envelope.prompt,
                stream: true,
                options: OllamaOptions {
                    temperature: envelope.temperature,
                    num_predict: envelope.max_tokens,
                },
            })
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            r = request => r.map_err(|e| classify_transport(e, self.timeout))?,
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let mut body = response.bytes_stream();
        let mut buf = String::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = body.next() => next,
            };
            let Some(bytes) = next else {
                return Ok(());
            };
            let bytes = bytes.map_err(|e| classify_transport(e, self.timeout))?;
            buf.push_str(&String::from_utf8_lossy(&bytes));

            for line in drain_lines(&mut buf) {
                if line.trim().is_empty() {
                    continue;
                }
                let chunk: OllamaGenerateChunk = serde_json::from_str(&line).map_err(|e| {
                    ProviderError::Permanent(format!("invalid Ollama chunk: {}", e))
                })?;
                if let Some(error) = chunk.error {
                    return Err(ProviderError::Transient(error));
                }
                if !chunk.response.is_empty() && tx.send(chunk.response).await.is_err() {
                    return Ok(());
                }
                if chunk.done {
                    return Ok(());
                }
            }
        }
    }
}

// ============ Generation Client ============

/// Sampling and transport settings for [`GenerationClient`].
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub stream_buffer: usize,
}

impl From<&GenerationConfig> for GenerationSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            stream_buffer: config.stream_buffer,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

/// Runs a [`GenerationProvider`] and exposes its output as a [`TokenStream`].
#[derive(Clone)]
pub struct GenerationClient {
    provider: Arc<dyn GenerationProvider>,
    settings: GenerationSettings,
}

impl GenerationClient {
    pub fn new(provider: Arc<dyn GenerationProvider>, settings: GenerationSettings) -> Self {
        Self { provider, settings }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Wrap a prompt with the configured sampling parameters.
    pub fn envelope(&self, prompt: impl Into<String>) -> PromptEnvelope {
        PromptEnvelope::new(prompt, self.settings.temperature, self.settings.max_tokens)
    }

    /// Start generating. The provider runs until it completes, fails, hits
    /// the generation timeout, or `cancel` fires (directly, or because the
    /// returned stream was dropped).
    pub fn generate(&self, envelope: PromptEnvelope, cancel: &CancellationToken) -> TokenStream {
        let token = cancel.child_token();
        let (tx, rx) = mpsc::channel(self.settings.stream_buffer.max(1));
        let (done_tx, done_rx) = oneshot::channel();

        let provider = self.provider.clone();
        let timeout = self.settings.timeout;
        let task_token = token.clone();
        tokio::spawn(async move {
            let run = provider.stream(&envelope, tx, task_token.clone());
            let result = tokio::select! {
                _ = task_token.cancelled() => Err(RagError::Cancelled),
                r = tokio::time::timeout(timeout, run) => match r {
                    Ok(Ok(())) if task_token.is_cancelled() => Err(RagError::Cancelled),
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(RagError::GenerationProvider(e.to_string())),
                    Err(_) => Err(RagError::timeout("generation", timeout)),
                },
            };
            let _ = done_tx.send(result);
        });

        TokenStream {
            tokens: ReceiverStream::new(rx),
            done: Some(done_rx),
            _guard: token.drop_guard(),
        }
    }

    /// Generate and collect the full completion.
    pub async fn complete(&self, envelope: PromptEnvelope, cancel: &CancellationToken) -> Result<String> {
        let mut stream = self.generate(envelope, cancel);
        let mut out = String::new();
        while let Some(token) = stream.next().await {
            out.push_str(&token?);
        }
        Ok(out)
    }
}

/// Lazy, finite, non-restartable sequence of generated tokens.
///
/// Yields tokens in provider order, then ends cleanly, or yields exactly one
/// error and ends. Dropping the stream cancels the provider call.
pub struct TokenStream {
    tokens: ReceiverStream<String>,
    done: Option<oneshot::Receiver<Result<()>>>,
    _guard: DropGuard,
}

impl Stream for TokenStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(done) = this.done.as_mut() else {
            return Poll::Ready(None);
        };

        match this.tokens.poll_next_unpin(cx) {
            Poll::Ready(Some(token)) => return Poll::Ready(Some(Ok(token))),
            Poll::Pending => return Poll::Pending,
            Poll::Ready(None) => {}
        }

        // The sender is gone: the provider task has finished or is about to
        // report how it finished.
        let outcome = match Pin::new(done).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => Err(RagError::GenerationProvider(
                "generation task ended unexpectedly".to_string(),
            )),
        };
        this.done = None;
        match outcome {
            Ok(()) => Poll::Ready(None),
            Err(e) => Poll::Ready(Some(Err(e))),
        }
    }
}
