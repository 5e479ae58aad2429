//! Generation orchestrator.
//!
//! Each request runs in its own task and walks a small state machine:
//!
//! ```text
//! PLANNING ─▶ RETRIEVING (optional) ─▶ GENERATING ─▶ STREAMING ─▶ DONE
//!     └──────────────┴─────────────────────┴─────────────┴──────▶ FAILED
//! ```
//!
//! Retrieval failures degrade to an unaugmented prompt and are logged at
//! `warn`. Planner and generation failures are fatal: the stream yields
//! one error and ends. Every step races against the request's
//! [`CancellationToken`], which fires when the caller drops the
//! [`ResponseStream`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;
use uuid::Uuid;

use rag_gateway_core::models::ScoredChunk;
use rag_gateway_core::prompt::{build_rag_prompt, grade_passages};
use rag_gateway_core::{RagError, Result};

use crate::embedding::EmbeddingClient;
use crate::generation::GenerationClient;
use crate::index::VectorIndexAdapter;
use crate::planner::{RetrievalDecision, RetrievalPlanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Planning,
    Retrieving,
    Generating,
    Streaming,
    Done,
    Failed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Planning => "planning",
            RequestState::Retrieving => "retrieving",
            RequestState::Generating => "generating",
            RequestState::Streaming => "streaming",
            RequestState::Done => "done",
            RequestState::Failed => "failed",
        }
    }
}

/// Plain generation, no retrieval.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
}

/// Retrieval-augmented generation.
#[derive(Debug, Clone, Default)]
pub struct RagRequest {
    pub prompt: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub rag_collection: Option<String>,
    pub adaptive: bool,
}

/// Tokens for one request, in provider order.
///
/// Ends cleanly after the last token, or after exactly one error.
/// Dropping it cancels the request.
pub struct ResponseStream {
    request_id: Uuid,
    items: ReceiverStream<Result<String>>,
    _guard: DropGuard,
}

impl ResponseStream {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl Stream for ResponseStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().items.poll_next_unpin(cx)
    }
}

enum Mode {
    Passthrough,
    Rag {
        collection: Option<String>,
        adaptive: bool,
    },
}

#[derive(Clone)]
pub struct Orchestrator {
    planner: Arc<RetrievalPlanner>,
    embedder: EmbeddingClient,
    index: VectorIndexAdapter,
    generation: GenerationClient,
    min_relevance: f32,
    stream_buffer: usize,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<RetrievalPlanner>,
        embedder: EmbeddingClient,
        index: VectorIndexAdapter,
        generation: GenerationClient,
        min_relevance: f32,
        stream_buffer: usize,
    ) -> Self {
        Self {
            planner,
            embedder,
            index,
            generation,
            min_relevance,
            stream_buffer: stream_buffer.max(1),
        }
    }

    /// Stream a completion for the prompt as-is.
    pub fn generate_stream(&self, request: GenerateRequest) -> Result<ResponseStream> {
        validate_prompt(&request.prompt)?;
        Ok(self.spawn(
            request.prompt,
            request.user_id,
            request.conversation_id,
            Mode::Passthrough,
        ))
    }

    /// Plan, optionally retrieve, then stream a completion.
    pub fn generate_with_rag(&self, request: RagRequest) -> Result<ResponseStream> {
        validate_prompt(&request.prompt)?;
        Ok(self.spawn(
            request.prompt,
            request.user_id,
            request.conversation_id,
            Mode::Rag {
                collection: request.rag_collection,
                adaptive: request.adaptive,
            },
        ))
    }

    fn spawn(
        &self,
        prompt: String,
        user_id: Option<String>,
        conversation_id: Option<String>,
        mode: Mode,
    ) -> ResponseStream {
        let request_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.stream_buffer);

        let span = tracing::info_span!(
            "generate",
            request_id = %request_id,
            user_id = user_id.as_deref().unwrap_or("-"),
            conversation_id = conversation_id.as_deref().unwrap_or("-"),
            rag = matches!(mode, Mode::Rag { .. }),
        );
        let this = self.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(
            async move {
                let state = this.run(&prompt, mode, &tx, &task_cancel).await;
                tracing::debug!(state = state.as_str(), "request finished");
            }
            .instrument(span),
        );

        ResponseStream {
            request_id,
            items: ReceiverStream::new(rx),
            _guard: cancel.drop_guard(),
        }
    }

    async fn run(
        &self,
        prompt: &str,
        mode: Mode,
        tx: &mpsc::Sender<Result<String>>,
        cancel: &CancellationToken,
    ) -> RequestState {
        let envelope_prompt = match mode {
            Mode::Passthrough => prompt.to_string(),
            Mode::Rag {
                collection,
                adaptive,
            } => {
                transition(RequestState::Planning);
                let planned = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return cancelled(),
                    d = self.planner.plan(prompt, collection.as_deref(), adaptive) => d,
                };
                let decision = match planned {
                    Ok(d) => d,
                    Err(e) => return fail(tx, e).await,
                };
                tracing::debug!(
                    should_retrieve = decision.should_retrieve,
                    collection = %decision.collection,
                    reason = %decision.reason,
                    "retrieval planned"
                );

                if decision.should_retrieve {
                    transition(RequestState::Retrieving);
                    let retrieved = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return cancelled(),
                        r = self.retrieve(prompt, &decision, adaptive) => r,
                    };
                    match retrieved {
                        Ok(passages) => {
                            tracing::debug!(passages = passages.len(), "retrieval complete");
                            build_rag_prompt(prompt, &passages)
                        }
                        Err(e) => {
                            tracing::warn!(
                                collection = %decision.collection,
                                error = %e,
                                "retrieval failed, generating without context"
                            );
                            prompt.to_string()
                        }
                    }
                } else {
                    prompt.to_string()
                }
            }
        };

        transition(RequestState::Generating);
        let mut tokens = self
            .generation
            .generate(self.generation.envelope(envelope_prompt), cancel);

        transition(RequestState::Streaming);
        let mut delivered = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(),
                next = tokens.next() => next,
            };
            match next {
                Some(Ok(token)) => {
                    if tx.send(Ok(token)).await.is_err() {
                        return cancelled();
                    }
                    delivered += 1;
                }
                Some(Err(RagError::Cancelled)) => return cancelled(),
                Some(Err(e)) => return fail(tx, e).await,
                None => break,
            }
        }

        tracing::debug!(tokens = delivered, "stream complete");
        RequestState::Done
    }

    async fn retrieve(
        &self,
        prompt: &str,
        decision: &RetrievalDecision,
        adaptive: bool,
    ) -> Result<Vec<ScoredChunk>> {
        let vector = self.embedder.embed_query(prompt).await?;
        let passages = self
            .index
            .query(&decision.collection, &vector, decision.top_k)
            .await?;
        if adaptive {
            let before = passages.len();
            let graded = grade_passages(prompt, passages, self.min_relevance);
            tracing::debug!(before, after = graded.len(), "graded passages");
            Ok(graded)
        } else {
            Ok(passages)
        }
    }
}

fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(RagError::validation("prompt is required"));
    }
    Ok(())
}

fn transition(state: RequestState) {
    tracing::debug!(state = state.as_str(), "state transition");
}

fn cancelled() -> RequestState {
    tracing::info!("request cancelled by caller");
    RequestState::Failed
}

async fn fail(tx: &mpsc::Sender<Result<String>>, error: RagError) -> RequestState {
    tracing::error!(code = error.code(), error = %error, "request failed");
    let _ = tx.send(Err(error)).await;
    RequestState::Failed
}
