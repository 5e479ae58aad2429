//! Shared fixtures: deterministic mock providers, a call-counting index,
//! and gateway builders over the in-memory backend.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use rag_gateway::config::Config;
use rag_gateway::gateway::{Gateway, GatewayParts};
use rag_gateway::generation::GenerationProvider;
use rag_gateway_core::embedding::EmbeddingProvider;
use rag_gateway_core::models::{Collection, IndexedChunk, ScoredChunk};
use rag_gateway_core::prompt::PromptEnvelope;
use rag_gateway_core::store::memory::InMemoryStore;
use rag_gateway_core::store::{CollectionStore, VectorIndex};
use rag_gateway_core::{ProviderError, RagError};

pub const DIMS: usize = 32;

// ─── Embedding ──────────────────────────────────────────────────────

/// Bag-of-words hashing embedder. Texts sharing words get similar vectors.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    /// When set, the next call parks after signalling `entered` until
    /// `release` is notified.
    pub hold: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl HashEmbedder {
    /// Park the next embedding call and wait until it has started.
    pub fn hold_next(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u32 = 2166136261;
        for b in word.bytes() {
            h ^= b as u32;
            h = h.wrapping_mul(16777619);
        }
        v[(h as usize) % DIMS] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    fn max_batch_size(&self) -> usize {
        4
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hold.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Permanent("embedding backend down".into()));
        }
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

// ─── Vector index ───────────────────────────────────────────────────

/// Wraps the in-memory store, counting calls and injecting failures.
#[derive(Default)]
pub struct CountingIndex {
    pub inner: InMemoryStore,
    pub calls: AtomicUsize,
    pub queries: AtomicUsize,
    pub fail_upsert: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_query: AtomicBool,
}

impl CountingIndex {
    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorIndex for CountingIndex {
    async fn upsert(&self, collection: &str, chunks: &[IndexedChunk]) -> rag_gateway_core::Result<()> {
        self.touch();
        if self.fail_upsert.load(Ordering::SeqCst) {
            // Simulate a partial write before the failure.
            self.inner.upsert(collection, &chunks[..1]).await?;
            return Err(RagError::store("disk full"));
        }
        self.inner.upsert(collection, chunks).await
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> rag_gateway_core::Result<Vec<ScoredChunk>> {
        self.touch();
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(RagError::store("index unavailable"));
        }
        self.inner.query(collection, vector, top_k).await
    }

    async fn delete_document(&self, collection: &str, document_id: &str) -> rag_gateway_core::Result<usize> {
        self.touch();
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(RagError::store("delete rejected"));
        }
        self.inner.delete_document(collection, document_id).await
    }

    async fn delete_collection(&self, collection: &str) -> rag_gateway_core::Result<()> {
        self.touch();
        self.inner.delete_collection(collection).await
    }

    async fn document_count(&self, collection: &str) -> rag_gateway_core::Result<u64> {
        self.touch();
        self.inner.document_count(collection).await
    }

    async fn has_collection(&self, collection: &str) -> rag_gateway_core::Result<bool> {
        self.touch();
        self.inner.has_collection(collection).await
    }
}

// ─── Catalog ────────────────────────────────────────────────────────

/// In-memory catalog that can reject document count updates.
#[derive(Default)]
pub struct FlakyCatalog {
    pub inner: InMemoryStore,
    pub fail_count: AtomicBool,
}

#[async_trait]
impl CollectionStore for FlakyCatalog {
    async fn insert(&self, collection: &Collection) -> rag_gateway_core::Result<bool> {
        self.inner.insert(collection).await
    }

    async fn get(&self, name: &str) -> rag_gateway_core::Result<Option<Collection>> {
        self.inner.get(name).await
    }

    async fn list(&self) -> rag_gateway_core::Result<Vec<Collection>> {
        self.inner.list().await
    }

    async fn set_document_count(&self, name: &str, count: u64) -> rag_gateway_core::Result<()> {
        if self.fail_count.load(Ordering::SeqCst) {
            return Err(RagError::store("catalog is read-only"));
        }
        self.inner.set_document_count(name, count).await
    }

    async fn remove(&self, name: &str) -> rag_gateway_core::Result<bool> {
        self.inner.remove(name).await
    }
}

// ─── Generation ─────────────────────────────────────────────────────

/// Emits a fixed token script, one token per `delay`.
pub struct ScriptedGeneration {
    pub tokens: Vec<String>,
    pub delay: Duration,
    pub fail_at: Option<usize>,
    /// Tokens handed to the channel.
    pub sent: AtomicUsize,
    /// Provider calls currently running.
    pub active: AtomicUsize,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGeneration {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            delay: Duration::ZERO,
            fail_at: None,
            sent: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGeneration {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        envelope: &PromptEnvelope,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveCall(&self.active);
        self.prompts.lock().unwrap().push(envelope.prompt.clone());

        for (i, token) in self.tokens.iter().enumerate() {
            if self.fail_at == Some(i) {
                return Err(ProviderError::Transient("upstream reset".into()));
            }
            if !self.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
            if cancel.is_cancelled() || tx.send(token.clone()).await.is_err() {
                return Ok(());
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ─── Gateway builders ───────────────────────────────────────────────

pub struct Harness {
    pub gateway: Gateway,
    pub index: Arc<CountingIndex>,
    pub catalog: Arc<FlakyCatalog>,
    pub embedder: Arc<HashEmbedder>,
    pub generation: Arc<ScriptedGeneration>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.chunking.max_chars = 120;
    config.chunking.overlap_chars = 20;
    config.embedding.backoff_ms = 0;
    config.embedding.max_retries = 1;
    config.retrieval.default_collection = "academy".to_string();
    config.retrieval.top_k = 3;
    config
}

pub fn harness(generation: ScriptedGeneration) -> Harness {
    harness_with(test_config(), generation)
}

pub fn harness_with(config: Config, generation: ScriptedGeneration) -> Harness {
    let index = Arc::new(CountingIndex::default());
    let embedder = Arc::new(HashEmbedder::default());
    let generation = Arc::new(generation);
    let catalog = Arc::new(FlakyCatalog::default());

    let gateway = Gateway::from_parts(
        config,
        GatewayParts {
            index: index.clone(),
            catalog: catalog.clone(),
            embedding: embedder.clone(),
            generation: generation.clone(),
            classifier: None,
        },
    )
    .expect("gateway builds");

    Harness {
        gateway,
        index,
        catalog,
        embedder,
        generation,
    }
}

pub const BACH_KHOA: &str = "Bach Khoa requires a score of 28.5 for computer science admission. \
The admission score for electrical engineering is 27.0. Applicants must submit transcripts \
before the deadline in July.\n\nTuition for the standard program is 30 million VND per year. \
Scholarships cover up to half of the tuition for students with high scores.";
