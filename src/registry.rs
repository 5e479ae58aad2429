//! Collection registry: the catalog of collections plus the locks that
//! keep ingestion and collection lifecycle changes from interleaving.
//!
//! # Locking
//!
//! | Lock | Held by | Mode |
//! |------|---------|------|
//! | per collection `RwLock` | ingestion, document delete | read |
//! | per collection `RwLock` | create, delete | write |
//! | per `(collection, document_id)` `Mutex` | ingestion, document delete | exclusive |
//!
//! Ingestions of different documents share the read side and run
//! concurrently; a collection being deleted waits for in-flight
//! ingestions and blocks new ones until it is gone.
//!
//! # Policies
//!
//! - Explicit `create` of an existing name fails with
//!   [`RagError::CollectionAlreadyExists`].
//! - `ensure` (used by ingestion) creates the collection if missing.
//! - `delete` removes the index side first, then the catalog record, and
//!   is accepted while either side still exists, so a partial failure is
//!   repaired by running it again.
//! - Catalog calls are bounded by `store.timeout_secs`, like index calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use rag_gateway_core::models::{Collection, Metadata};
use rag_gateway_core::store::CollectionStore;
use rag_gateway_core::{RagError, Result};

use crate::index::VectorIndexAdapter;

const MAX_NAME_LEN: usize = 255;

type DocumentKey = (String, String);

pub struct CollectionRegistry {
    catalog: Arc<dyn CollectionStore>,
    index: VectorIndexAdapter,
    collection_locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    document_locks: Mutex<HashMap<DocumentKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Reject empty or oversized collection names.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(RagError::validation("collection name is required"));
    }
    if name.len() > MAX_NAME_LEN || name.chars().any(char::is_control) {
        return Err(RagError::validation(format!(
            "invalid collection name: {:?}",
            name
        )));
    }
    Ok(())
}

impl CollectionRegistry {
    pub fn new(catalog: Arc<dyn CollectionStore>, index: VectorIndexAdapter) -> Self {
        Self {
            catalog,
            index,
            collection_locks: Mutex::new(HashMap::new()),
            document_locks: Mutex::new(HashMap::new()),
        }
    }

    fn collection_lock(&self, name: &str) -> Arc<RwLock<()>> {
        let mut locks = self
            .collection_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(name.to_string()).or_default().clone()
    }

    /// Shared access to a collection, for ingestion and document deletes.
    pub async fn read_lock(&self, name: &str) -> OwnedRwLockReadGuard<()> {
        self.collection_lock(name).read_owned().await
    }

    async fn write_lock(&self, name: &str) -> OwnedRwLockWriteGuard<()> {
        self.collection_lock(name).write_owned().await
    }

    /// Exclusive access to one document within a collection.
    pub async fn lock_document(&self, collection: &str, document_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .document_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop entries nobody is holding or waiting on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((collection.to_string(), document_id.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    /// Create a collection. Fails if the name is taken.
    pub async fn create(&self, name: &str, metadata: Metadata) -> Result<Collection> {
        validate_name(name)?;
        let _guard = self.write_lock(name).await;

        let collection = Collection::new(name, metadata);
        if !self
            .index
            .bounded("catalog insert", self.catalog.insert(&collection))
            .await?
        {
            return Err(RagError::CollectionAlreadyExists {
                name: name.to_string(),
            });
        }
        tracing::info!(collection = name, "collection created");
        Ok(collection)
    }

    /// Create the collection if it does not exist. Returns whether it was created.
    ///
    /// The caller must hold [`read_lock`](Self::read_lock) for `name`.
    pub async fn ensure(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        if self.catalog_get(name).await?.is_some() {
            return Ok(false);
        }
        let collection = Collection::new(name, Metadata::new());
        let created = self
            .index
            .bounded("catalog insert", self.catalog.insert(&collection))
            .await?;
        if created {
            tracing::info!(collection = name, "collection created on first ingest");
        }
        Ok(created)
    }

    pub async fn get(&self, name: &str) -> Result<Option<Collection>> {
        self.catalog_get(name).await
    }

    /// All collections, oldest first.
    pub async fn list(&self) -> Result<Vec<Collection>> {
        self.index.bounded("catalog list", self.catalog.list()).await
    }

    async fn catalog_get(&self, name: &str) -> Result<Option<Collection>> {
        self.index.bounded("catalog lookup", self.catalog.get(name)).await
    }

    /// Delete a collection and every chunk in it.
    pub async fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let _guard = self.write_lock(name).await;

        let in_catalog = self.catalog_get(name).await?.is_some();
        let in_index = self.index.has_collection(name).await?;
        if !in_catalog && !in_index {
            return Err(RagError::collection_not_found(name));
        }

        self.index.delete_collection(name).await?;
        self.index
            .bounded("catalog remove", self.catalog.remove(name))
            .await?;
        tracing::info!(
            collection = name,
            repaired = !in_catalog,
            "collection deleted"
        );
        Ok(())
    }

    /// Recompute `document_count` from the index.
    pub async fn refresh_count(&self, name: &str) -> Result<u64> {
        let count = self.index.document_count(name).await?;
        self.index
            .bounded(
                "catalog update",
                self.catalog.set_document_count(name, count),
            )
            .await?;
        Ok(count)
    }
}
