//! Storage abstraction for RAG Gateway.
//!
//! Two traits split the persisted state:
//!
//! - [`VectorIndex`] stores `(chunk, vector, metadata)` tuples per
//!   collection and answers similarity queries.
//! - [`CollectionStore`] is the catalog of collection records (name,
//!   metadata, document count, creation time).
//!
//! Both are backend SPIs. The app crate wraps them in the vector index
//! adapter and the collection registry, which add namespace checks,
//! timeouts, and locking. Implementations must be `Send + Sync` to be
//! shared across request tasks.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Collection, IndexedChunk, ScoredChunk};

/// Per-collection chunk storage with cosine similarity search.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or replace chunks by `chunk_id`; creates the collection |
/// | [`query`](VectorIndex::query) | Top-k chunks by descending cosine similarity |
/// | [`delete_document`](VectorIndex::delete_document) | Remove every chunk of one document |
/// | [`delete_collection`](VectorIndex::delete_collection) | Remove the collection and all its chunks |
/// | [`document_count`](VectorIndex::document_count) | Distinct documents with live chunks |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert chunks, replacing any existing chunk with the same `chunk_id`.
    ///
    /// A replaced chunk keeps its original insertion position, so repeated
    /// upserts are idempotent with respect to query tie-breaking.
    async fn upsert(&self, collection: &str, chunks: &[IndexedChunk]) -> Result<()>;

    /// Return up to `top_k` chunks ranked by descending cosine similarity.
    ///
    /// Equal scores keep insertion order.
    async fn query(&self, collection: &str, vector: &[f32], top_k: usize)
        -> Result<Vec<ScoredChunk>>;

    /// Remove every chunk belonging to `document_id`. Returns the number removed.
    async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize>;

    /// Remove the collection and its chunks. No-op if absent.
    async fn delete_collection(&self, collection: &str) -> Result<()>;

    /// Number of distinct document ids with at least one chunk.
    async fn document_count(&self, collection: &str) -> Result<u64>;

    /// Whether the backend currently holds the collection.
    async fn has_collection(&self, collection: &str) -> Result<bool>;
}

/// Catalog of collection records.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Insert a record if no record with the same name exists.
    ///
    /// Returns `false` (and leaves the existing record untouched) when the
    /// name is taken. Must be atomic with respect to concurrent inserts.
    async fn insert(&self, collection: &Collection) -> Result<bool>;

    async fn get(&self, name: &str) -> Result<Option<Collection>>;

    /// All records ordered by creation time, oldest first.
    async fn list(&self) -> Result<Vec<Collection>>;

    async fn set_document_count(&self, name: &str, count: u64) -> Result<()>;

    /// Remove a record. Returns `false` if it did not exist.
    async fn remove(&self, name: &str) -> Result<bool>;
}
