//! SQLite-backed [`VectorIndex`] and [`CollectionStore`].
//!
//! Chunks and their embeddings share one table; vectors are stored as
//! little-endian `f32` BLOBs and scored by brute-force cosine similarity,
//! the same way the in-memory backend does it. The catalog lives in the
//! `collections` table. See [`crate::migrate`] for the schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use rag_gateway_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use rag_gateway_core::models::{Chunk, Collection, IndexedChunk, Metadata, ScoredChunk};
use rag_gateway_core::store::{CollectionStore, VectorIndex};
use rag_gateway_core::{RagError, Result};

/// SQLite implementation of both storage traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

fn metadata_to_json(metadata: &Metadata) -> Result<String> {
    serde_json::to_string(metadata).map_err(RagError::store)
}

fn metadata_from_json(json: &str) -> Metadata {
    serde_json::from_str(json).unwrap_or_default()
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn upsert(&self, collection: &str, chunks: &[IndexedChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(RagError::store)?;

        for indexed in chunks {
            let chunk = &indexed.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks (collection, chunk_id, document_id, ordinal, text,
                                    metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    ordinal = excluded.ordinal,
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(collection)
            .bind(&chunk.chunk_id)
            .bind(&chunk.document_id)
            .bind(chunk.ordinal as i64)
            .bind(&chunk.text)
            .bind(metadata_to_json(&chunk.metadata)?)
            .bind(vec_to_blob(&indexed.vector))
            .execute(&mut *tx)
            .await
            .map_err(RagError::store)?;
        }

        tx.commit().await.map_err(RagError::store)?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, document_id, ordinal, text, metadata_json, embedding
            FROM chunks
            WHERE collection = ?
            ORDER BY rowid
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::store)?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                let ordinal: i64 = row.get("ordinal");
                ScoredChunk {
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                    chunk: Chunk {
                        chunk_id: row.get("chunk_id"),
                        document_id: row.get("document_id"),
                        collection: collection.to_string(),
                        ordinal: ordinal as u32,
                        text: row.get("text"),
                        metadata: metadata_from_json(&metadata_json),
                    },
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE collection = ? AND document_id = ?")
            .bind(collection)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(RagError::store)?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await
            .map_err(RagError::store)?;
        Ok(())
    }

    async fn document_count(&self, collection: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT document_id) FROM chunks WHERE collection = ?")
                .bind(collection)
                .fetch_one(&self.pool)
                .await
                .map_err(RagError::store)?;
        Ok(count as u64)
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM chunks WHERE collection = ?)")
                .bind(collection)
                .fetch_one(&self.pool)
                .await
                .map_err(RagError::store)?;
        Ok(exists)
    }
}

#[async_trait]
impl CollectionStore for SqliteStore {
    async fn insert(&self, collection: &Collection) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO collections (name, metadata_json, document_count, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(&collection.name)
        .bind(metadata_to_json(&collection.metadata)?)
        .bind(collection.document_count as i64)
        .bind(to_micros(collection.created_at))
        .execute(&self.pool)
        .await
        .map_err(RagError::store)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, name: &str) -> Result<Option<Collection>> {
        let row = sqlx::query(
            "SELECT name, metadata_json, document_count, created_at FROM collections WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(RagError::store)?;

        Ok(row.map(|r| collection_from_row(&r)))
    }

    async fn list(&self) -> Result<Vec<Collection>> {
        let rows = sqlx::query(
            r#"
            SELECT name, metadata_json, document_count, created_at
            FROM collections
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::store)?;

        Ok(rows.iter().map(collection_from_row).collect())
    }

    async fn set_document_count(&self, name: &str, count: u64) -> Result<()> {
        sqlx::query("UPDATE collections SET document_count = ? WHERE name = ?")
            .bind(count as i64)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(RagError::store)?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(RagError::store)?;
        Ok(result.rows_affected() > 0)
    }
}

fn collection_from_row(row: &sqlx::sqlite::SqliteRow) -> Collection {
    let metadata_json: String = row.get("metadata_json");
    let document_count: i64 = row.get("document_count");
    let created_at: i64 = row.get("created_at");
    Collection {
        name: row.get("name"),
        metadata: metadata_from_json(&metadata_json),
        document_count: document_count.max(0) as u64,
        created_at: from_micros(created_at),
    }
}
