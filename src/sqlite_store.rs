//! SQLite-backed [`VectorStore`].
//!
//! Vectors are stored as little-endian `f32` BLOBs in the `vectors` table;
//! queries load one collection and rank it by brute-force cosine distance.
//! This is adequate for catalogs in the tens of thousands of chunks.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use flowrag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use flowrag_core::error::{CollaboratorError, CollaboratorResult};
use flowrag_core::models::Metadata;
use flowrag_core::store::{rank_hits, VectorHit, VectorRecord, VectorStore};

#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Wraps a pool on which migrations have already run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn collection_dims(&self, collection: &str) -> CollaboratorResult<Option<Option<usize>>> {
        let row = sqlx::query("SELECT dims FROM collections WHERE name = ?")
            .bind(collection)
            .fetch_optional(&self.pool)
            .await
            .context("reading collection")?;
        Ok(row.map(|r| r.get::<Option<i64>, _>("dims").map(|d| d as usize)))
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> CollaboratorResult<usize> {
        let expected = match self.collection_dims(collection).await? {
            Some(Some(d)) => Some(d),
            _ => records.first().map(|r| r.vector.len()),
        };
        if let Some(expected) = expected {
            if let Some(bad) = records.iter().find(|r| r.vector.len() != expected) {
                return Err(CollaboratorError::DimensionMismatch {
                    expected,
                    actual: bad.vector.len(),
                });
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.context("begin upsert")?;

        sqlx::query(
            "INSERT INTO collections (name, dims, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET dims = COALESCE(collections.dims, excluded.dims)",
        )
        .bind(collection)
        .bind(expected.map(|d| d as i64))
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("registering collection")?;

        for record in records {
            let metadata_json = serde_json::to_string(&record.metadata).context("encoding metadata")?;
            sqlx::query(
                "INSERT INTO vectors (collection, id, document, metadata_json, embedding, dims, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    updated_at = excluded.updated_at",
            )
            .bind(collection)
            .bind(&record.id)
            .bind(&record.document)
            .bind(&metadata_json)
            .bind(vec_to_blob(&record.vector))
            .bind(record.vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("upserting vector")?;
        }

        tx.commit().await.context("commit upsert")?;
        tracing::debug!(collection, records = records.len(), "upserted vectors");
        Ok(records.len())
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> CollaboratorResult<Vec<VectorHit>> {
        match self.collection_dims(collection).await? {
            None => return Err(CollaboratorError::MissingCollection(collection.to_string())),
            Some(Some(dims)) if dims != vector.len() => {
                return Err(CollaboratorError::DimensionMismatch {
                    expected: dims,
                    actual: vector.len(),
                })
            }
            Some(_) => {}
        }

        let rows = sqlx::query(
            "SELECT id, document, metadata_json, embedding FROM vectors WHERE collection = ?",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .context("loading vectors")?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
            let similarity = cosine_similarity(vector, &blob_to_vec(&blob));
            hits.push(VectorHit {
                id: row.get("id"),
                document: row.get("document"),
                metadata,
                distance: 1.0 - similarity as f64,
            });
        }
        rank_hits(&mut hits, k);
        Ok(hits)
    }

    async fn collections(&self) -> CollaboratorResult<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM collections ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("listing collections")?;
        Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
    }

    async fn count(&self, collection: &str) -> CollaboratorResult<usize> {
        if self.collection_dims(collection).await?.is_none() {
            return Err(CollaboratorError::MissingCollection(collection.to_string()));
        }
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .context("counting vectors")?;
        Ok(count as usize)
    }
}
