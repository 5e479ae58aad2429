//! In-memory [`VectorIndex`] and [`CollectionStore`] for tests and
//! ephemeral deployments.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over the collection's chunks, which are
//! kept in insertion order so ties resolve deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{Collection, IndexedChunk, ScoredChunk};

use super::{CollectionStore, VectorIndex};

struct CatalogEntry {
    seq: u64,
    collection: Collection,
}

#[derive(Default)]
struct Catalog {
    next_seq: u64,
    entries: HashMap<String, CatalogEntry>,
}

/// In-memory store implementing both storage traits.
#[derive(Default)]
pub struct InMemoryStore {
    catalog: RwLock<Catalog>,
    chunks: RwLock<HashMap<String, Vec<IndexedChunk>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_chunks(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<IndexedChunk>>>> {
        self.chunks.read().map_err(|_| RagError::store("chunk lock poisoned"))
    }

    fn write_chunks(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<IndexedChunk>>>> {
        self.chunks.write().map_err(|_| RagError::store("chunk lock poisoned"))
    }

    fn read_catalog(&self) -> Result<RwLockReadGuard<'_, Catalog>> {
        self.catalog.read().map_err(|_| RagError::store("catalog lock poisoned"))
    }

    fn write_catalog(&self) -> Result<RwLockWriteGuard<'_, Catalog>> {
        self.catalog.write().map_err(|_| RagError::store("catalog lock poisoned"))
    }
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn upsert(&self, collection: &str, chunks: &[IndexedChunk]) -> Result<()> {
        let mut all = self.write_chunks()?;
        let stored = all.entry(collection.to_string()).or_default();
        for incoming in chunks {
            match stored
                .iter_mut()
                .find(|c| c.chunk.chunk_id == incoming.chunk.chunk_id)
            {
                Some(existing) => *existing = incoming.clone(),
                None => stored.push(incoming.clone()),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let all = self.read_chunks()?;
        let Some(stored) = all.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredChunk> = stored
            .iter()
            .map(|c| ScoredChunk {
                chunk: c.chunk.clone(),
                score: cosine_similarity(vector, &c.vector),
            })
            .collect();

        // Stable sort keeps insertion order for equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize> {
        let mut all = self.write_chunks()?;
        let Some(stored) = all.get_mut(collection) else {
            return Ok(0);
        };
        let before = stored.len();
        stored.retain(|c| c.chunk.document_id != document_id);
        Ok(before - stored.len())
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        self.write_chunks()?.remove(collection);
        Ok(())
    }

    async fn document_count(&self, collection: &str) -> Result<u64> {
        let all = self.read_chunks()?;
        let count = all
            .get(collection)
            .map(|stored| {
                stored
                    .iter()
                    .map(|c| c.chunk.document_id.as_str())
                    .collect::<HashSet<_>>()
                    .len()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.read_chunks()?.contains_key(collection))
    }
}

#[async_trait]
impl CollectionStore for InMemoryStore {
    async fn insert(&self, collection: &Collection) -> Result<bool> {
        let mut catalog = self.write_catalog()?;
        if catalog.entries.contains_key(&collection.name) {
            return Ok(false);
        }
        let seq = catalog.next_seq;
        catalog.next_seq += 1;
        catalog.entries.insert(
            collection.name.clone(),
            CatalogEntry {
                seq,
                collection: collection.clone(),
            },
        );
        Ok(true)
    }

    async fn get(&self, name: &str) -> Result<Option<Collection>> {
        Ok(self
            .read_catalog()?
            .entries
            .get(name)
            .map(|e| e.collection.clone()))
    }

    async fn list(&self) -> Result<Vec<Collection>> {
        let catalog = self.read_catalog()?;
        let mut entries: Vec<&CatalogEntry> = catalog.entries.values().collect();
        entries.sort_by_key(|e| (e.collection.created_at, e.seq));
        Ok(entries.into_iter().map(|e| e.collection.clone()).collect())
    }

    async fn set_document_count(&self, name: &str, count: u64) -> Result<()> {
        let mut catalog = self.write_catalog()?;
        if let Some(entry) = catalog.entries.get_mut(name) {
            entry.collection.document_count = count;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        Ok(self.write_catalog()?.entries.remove(name).is_some())
    }
}
