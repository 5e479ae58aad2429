//! Namespace-checked, time-bounded front end over a [`VectorIndex`].
//!
//! The backend traits are deliberately permissive (querying an unknown
//! collection returns nothing). This adapter enforces the gateway's rules:
//!
//! - Only [`upsert`](VectorIndexAdapter::upsert) may implicitly create a
//!   collection in the backend.
//! - Every other operation fails with [`RagError::CollectionNotFound`]
//!   when the collection is not in the catalog.
//! - Every backend call is bounded by `store.timeout_secs`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rag_gateway_core::models::{IndexedChunk, ScoredChunk};
use rag_gateway_core::store::{CollectionStore, VectorIndex};
use rag_gateway_core::{RagError, Result};

#[derive(Clone)]
pub struct VectorIndexAdapter {
    index: Arc<dyn VectorIndex>,
    catalog: Arc<dyn CollectionStore>,
    timeout: Duration,
}

impl VectorIndexAdapter {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        catalog: Arc<dyn CollectionStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            index,
            catalog,
            timeout,
        }
    }

    /// Run `fut` under the store timeout. Shared with the registry so
    /// catalog writes get the same bound as index calls.
    pub(crate) async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RagError::timeout(operation, self.timeout))?
    }

    async fn require_collection(&self, collection: &str) -> Result<()> {
        match self.bounded("catalog lookup", self.catalog.get(collection)).await? {
            Some(_) => Ok(()),
            None => Err(RagError::collection_not_found(collection)),
        }
    }

    /// Insert or replace chunks by `chunk_id`.
    pub async fn upsert(&self, collection: &str, chunks: &[IndexedChunk]) -> Result<()> {
        self.bounded("vector upsert", self.index.upsert(collection, chunks))
            .await
    }

    /// Top-`top_k` chunks by descending cosine similarity.
    pub async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        self.require_collection(collection).await?;
        self.bounded("vector query", self.index.query(collection, vector, top_k))
            .await
    }

    /// Remove every chunk of a document. Returns the number removed.
    pub async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize> {
        self.require_collection(collection).await?;
        self.bounded(
            "vector delete",
            self.index.delete_document(collection, document_id),
        )
        .await
    }

    /// Remove chunks without consulting the catalog.
    ///
    /// Used only to compensate a failed ingestion, where the catalog state
    /// is not trustworthy.
    pub(crate) async fn purge_document(&self, collection: &str, document_id: &str) -> Result<usize> {
        self.bounded(
            "vector delete",
            self.index.delete_document(collection, document_id),
        )
        .await
    }

    /// Remove the collection's chunks and its presence in the backend.
    ///
    /// Accepted when either the catalog or the backend still knows the
    /// collection, so a half-finished delete can be re-run.
    pub async fn delete_collection(&self, collection: &str) -> Result<()> {
        let in_catalog = self
            .bounded("catalog lookup", self.catalog.get(collection))
            .await?
            .is_some();
        if !in_catalog && !self.has_collection(collection).await? {
            return Err(RagError::collection_not_found(collection));
        }
        self.bounded(
            "vector delete collection",
            self.index.delete_collection(collection),
        )
        .await
    }

    /// Distinct documents with live chunks.
    pub async fn stats(&self, collection: &str) -> Result<u64> {
        self.require_collection(collection).await?;
        self.document_count(collection).await
    }

    pub(crate) async fn document_count(&self, collection: &str) -> Result<u64> {
        self.bounded("vector stats", self.index.document_count(collection))
            .await
    }

    pub(crate) async fn has_collection(&self, collection: &str) -> Result<bool> {
        self.bounded("vector stats", self.index.has_collection(collection))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_gateway_core::models::{chunk_id, Chunk, Collection, Metadata};
    use rag_gateway_core::store::memory::InMemoryStore;

    fn adapter() -> (VectorIndexAdapter, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (
            VectorIndexAdapter::new(store.clone(), store.clone(), Duration::from_secs(5)),
            store,
        )
    }

    fn indexed(doc: &str, ordinal: u32) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk {
                chunk_id: chunk_id(doc, ordinal),
                document_id: doc.to_string(),
                collection: "c".to_string(),
                ordinal,
                text: "text".to_string(),
                metadata: Metadata::new(),
            },
            vector: vec![1.0, 0.0],
        }
    }

    #[tokio::test]
    async fn test_query_unknown_collection_is_not_found() {
        let (adapter, _) = adapter();
        let err = adapter.query("missing", &[1.0, 0.0], 3).await.unwrap_err();
        assert_eq!(err, RagError::collection_not_found("missing"));
        assert!(adapter.delete_document("missing", "d").await.is_err());
        assert!(adapter.stats("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_query_does_not_create_collection() {
        let (adapter, store) = adapter();
        let _ = adapter.query("ghost", &[1.0], 1).await;
        assert!(!store.has_collection("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_then_query() {
        let (adapter, store) = adapter();
        store.insert(&Collection::new("c", Metadata::new())).await.unwrap();
        adapter.upsert("c", &[indexed("d", 0), indexed("d", 1)]).await.unwrap();
        assert_eq!(adapter.query("c", &[1.0, 0.0], 5).await.unwrap().len(), 2);
        assert_eq!(adapter.stats("c").await.unwrap(), 1);
        assert_eq!(adapter.delete_document("c", "nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_collection_accepts_orphaned_chunks() {
        let (adapter, store) = adapter();
        adapter.upsert("orphan", &[indexed("d", 0)]).await.unwrap();
        adapter.delete_collection("orphan").await.unwrap();
        assert!(!store.has_collection("orphan").await.unwrap());
        assert!(adapter.delete_collection("orphan").await.is_err());
    }
}
