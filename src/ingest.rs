//! Ingestion pipeline.
//!
//! `ingest` runs: validate → resolve document id → lock → ensure collection
//! → chunk → embed → delete old chunks → upsert → refresh count.
//!
//! Embedding happens before the index is touched, so an embedding failure
//! leaves any previous version of the document intact. Once the index has
//! been mutated, any failure triggers a compensating `delete_document`
//! for the in-progress id; if that also fails the error becomes
//! [`RagError::IngestionRollback`] and is logged at `error`.

use std::sync::Arc;

use chrono::Utc;

use rag_gateway_core::chunk::Chunker;
use rag_gateway_core::models::{chunk_id, generate_document_id, Chunk, IndexedChunk, Metadata};
use rag_gateway_core::{RagError, Result};

use crate::embedding::EmbeddingClient;
use crate::index::VectorIndexAdapter;
use crate::registry::{validate_name, CollectionRegistry};

/// A document to ingest.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub content: String,
    pub collection: String,
    pub metadata: Metadata,
    /// Generated from the collection and content when absent or blank.
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub document_id: String,
    pub chunks_created: usize,
    /// The collection did not exist and was created by this ingest.
    pub collection_created: bool,
}

pub struct IngestionPipeline {
    chunker: Chunker,
    embedder: EmbeddingClient,
    index: VectorIndexAdapter,
    registry: Arc<CollectionRegistry>,
}

impl IngestionPipeline {
    pub fn new(
        chunker: Chunker,
        embedder: EmbeddingClient,
        index: VectorIndexAdapter,
        registry: Arc<CollectionRegistry>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            registry,
        }
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let IngestRequest {
            content,
            collection,
            metadata,
            document_id,
        } = request;

        validate_name(&collection)?;
        if content.trim().is_empty() {
            return Err(RagError::validation("document content is empty"));
        }
        let document_id = document_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| generate_document_id(&collection, &content));

        let _collection_guard = self.registry.read_lock(&collection).await;
        let _document_guard = self.registry.lock_document(&collection, &document_id).await;

        let collection_created = self.registry.ensure(&collection).await?;

        let segments = self.chunker.split(&content);
        let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let indexed_at = Utc::now().to_rfc3339();
        let chunks: Vec<IndexedChunk> = segments
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (segment, vector))| {
                let ordinal = i as u32;
                let mut chunk_metadata = metadata.clone();
                chunk_metadata.insert("document_id".to_string(), document_id.clone());
                chunk_metadata.insert("chunk_index".to_string(), i.to_string());
                chunk_metadata.insert("indexed_at".to_string(), indexed_at.clone());
                IndexedChunk {
                    chunk: Chunk {
                        chunk_id: chunk_id(&document_id, ordinal),
                        document_id: document_id.clone(),
                        collection: collection.clone(),
                        ordinal,
                        text: segment.text,
                        metadata: chunk_metadata,
                    },
                    vector,
                }
            })
            .collect();

        if let Err(cause) = self.replace(&collection, &document_id, &chunks).await {
            return Err(self.roll_back(&collection, &document_id, cause).await);
        }

        // The catalog count is part of the write; if it cannot be recorded the
        // chunks come back out.
        let document_count = match self.registry.refresh_count(&collection).await {
            Ok(count) => count,
            Err(cause) => return Err(self.roll_back(&collection, &document_id, cause).await),
        };
        tracing::info!(
            collection = %collection,
            document_id = %document_id,
            chunks = chunks.len(),
            document_count,
            "document ingested"
        );

        Ok(IngestOutcome {
            document_id,
            chunks_created: chunks.len(),
            collection_created,
        })
    }

    /// Delete-then-insert the document's chunks.
    async fn replace(&self, collection: &str, document_id: &str, chunks: &[IndexedChunk]) -> Result<()> {
        let removed = self.index.purge_document(collection, document_id).await?;
        if removed > 0 {
            tracing::debug!(collection, document_id, removed, "replacing previous chunks");
        }
        self.index.upsert(collection, chunks).await
    }

    async fn roll_back(&self, collection: &str, document_id: &str, cause: RagError) -> RagError {
        match self.index.purge_document(collection, document_id).await {
            Ok(removed) => {
                tracing::warn!(
                    collection,
                    document_id,
                    removed,
                    error = %cause,
                    "ingestion failed, document rolled back"
                );
                if let Err(e) = self.registry.refresh_count(collection).await {
                    tracing::warn!(collection, error = %e, "failed to refresh document count");
                }
                cause
            }
            Err(rollback) => {
                tracing::error!(
                    collection,
                    document_id,
                    error = %cause,
                    rollback_error = %rollback,
                    "ingestion rollback failed; index may hold partial chunks"
                );
                RagError::IngestionRollback {
                    document_id: document_id.to_string(),
                    cause: cause.to_string(),
                    rollback: rollback.to_string(),
                }
            }
        }
    }

    /// Remove one document's chunks and refresh the collection count.
    pub async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize> {
        validate_name(collection)?;
        if document_id.trim().is_empty() {
            return Err(RagError::validation("document id is required"));
        }
        let _collection_guard = self.registry.read_lock(collection).await;
        let _document_guard = self.registry.lock_document(collection, document_id).await;

        let removed = self.index.delete_document(collection, document_id).await?;
        self.registry.refresh_count(collection).await?;
        tracing::info!(collection, document_id, removed, "document deleted");
        Ok(removed)
    }
}
