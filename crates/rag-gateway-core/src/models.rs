//! Core data models for collections, documents, and chunks.
//!
//! These types flow between the ingestion pipeline, the vector index, and
//! the generation orchestrator. Metadata bags are `BTreeMap`s so that
//! serialization is deterministic regardless of insertion order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Arbitrary string-to-string metadata attached to collections and documents.
pub type Metadata = BTreeMap<String, String>;

/// A named, isolated namespace of indexed chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub metadata: Metadata,
    /// Distinct documents with at least one live chunk in this collection.
    pub document_count: u64,
    /// Set once on creation.
    pub created_at: DateTime<Utc>,
}

impl Collection {
    pub fn new(name: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            name: name.into(),
            metadata,
            document_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// A contiguous segment of a document, as stored in the index.
///
/// Chunks are created only during ingestion and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Derived from `document_id` and `ordinal`, see [`chunk_id`].
    pub chunk_id: String,
    pub document_id: String,
    pub collection: String,
    pub ordinal: u32,
    pub text: String,
    pub metadata: Metadata,
}

/// A chunk paired with its embedding, ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Derive the stable id of the `ordinal`-th chunk of a document.
pub fn chunk_id(document_id: &str, ordinal: u32) -> String {
    format!("{}_{}", document_id, ordinal)
}

/// Generate a document id from its collection and content.
///
/// Identical content ingested into the same collection without an explicit
/// id maps to the same document, so re-ingestion replaces rather than
/// duplicates.
pub fn generate_document_id(collection: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(collection.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("doc_{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_derived() {
        assert_eq!(chunk_id("doc_abc", 0), "doc_abc_0");
        assert_eq!(chunk_id("doc_abc", 12), "doc_abc_12");
    }

    #[test]
    fn test_generated_id_depends_on_collection_and_content() {
        let a = generate_document_id("admissions", "Bach Khoa requires 28.5");
        let b = generate_document_id("admissions", "Bach Khoa requires 28.5");
        let c = generate_document_id("careers", "Bach Khoa requires 28.5");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("doc_"));
        assert_eq!(a.len(), 20);
    }
}
