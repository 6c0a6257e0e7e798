//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only storage surface the retriever
//! needs: upsert embedded documents into a named collection and run a
//! nearest-neighbor query against one. Collections are logical partitions
//! keyed by content category (block documentation, workflow patterns,
//! task configs, connection patterns).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! The SQLite backend lives in the `flowrag` app crate.

pub mod memory;

use async_trait::async_trait;

use crate::error::{CollaboratorError, CollaboratorResult};
use crate::models::Metadata;

/// One embedded document to store.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
    pub document: String,
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    /// Cosine distance (`1 - cosine`), in `[0, 2]`; smaller is closer.
    pub distance: f64,
}

/// Abstract vector database.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace records by id, creating the collection on first use |
/// | [`query`](VectorStore::query) | `k` nearest records, ascending distance, ties by id |
/// | [`collections`](VectorStore::collections) | Names of existing collections, sorted |
/// | [`count`](VectorStore::count) | Number of records in a collection |
///
/// Querying a collection that does not exist fails with
/// [`CollaboratorError::MissingCollection`].
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Returns the number of records written.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> CollaboratorResult<usize>;

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> CollaboratorResult<Vec<VectorHit>>;

    async fn collections(&self) -> CollaboratorResult<Vec<String>>;

    async fn count(&self, collection: &str) -> CollaboratorResult<usize>;
}

/// Degraded stand-in selected when no vector backend is configured.
#[derive(Debug, Clone, Default)]
pub struct UnavailableStore;

fn unavailable() -> CollaboratorError {
    CollaboratorError::Unavailable("vector store is disabled".to_string())
}

#[async_trait]
impl VectorStore for UnavailableStore {
    async fn upsert(&self, _collection: &str, _records: &[VectorRecord]) -> CollaboratorResult<usize> {
        Err(unavailable())
    }

    async fn query(&self, _collection: &str, _vector: &[f32], _k: usize) -> CollaboratorResult<Vec<VectorHit>> {
        Err(unavailable())
    }

    async fn collections(&self) -> CollaboratorResult<Vec<String>> {
        Err(unavailable())
    }

    async fn count(&self, _collection: &str) -> CollaboratorResult<usize> {
        Err(unavailable())
    }
}

/// Order hits by ascending distance, then id, and keep the first `k`.
pub fn rank_hits(hits: &mut Vec<VectorHit>, k: usize) {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
}
