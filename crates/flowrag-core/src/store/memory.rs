//! In-memory [`VectorStore`] for tests and the `memory` backend.
//!
//! Collections are `BTreeMap`s of id → record behind a `std::sync::RwLock`.
//! Queries are brute-force cosine distance over the whole collection.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{CollaboratorError, CollaboratorResult};

use super::{rank_hits, VectorHit, VectorRecord, VectorStore};

type Collection = BTreeMap<String, VectorRecord>;

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> CollaboratorError {
    CollaboratorError::Unavailable("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> CollaboratorResult<usize> {
        let mut all = self.collections.write().map_err(|_| poisoned())?;
        let coll = all.entry(collection.to_string()).or_default();
        if let Some(existing) = coll.values().next() {
            for r in records {
                if r.vector.len() != existing.vector.len() {
                    return Err(CollaboratorError::DimensionMismatch {
                        expected: existing.vector.len(),
                        actual: r.vector.len(),
                    });
                }
            }
        }
        for r in records {
            coll.insert(r.id.clone(), r.clone());
        }
        Ok(records.len())
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> CollaboratorResult<Vec<VectorHit>> {
        let all = self.collections.read().map_err(|_| poisoned())?;
        let coll = all
            .get(collection)
            .ok_or_else(|| CollaboratorError::MissingCollection(collection.to_string()))?;
        let mut hits: Vec<VectorHit> = coll
            .values()
            .map(|r| VectorHit {
                id: r.id.clone(),
                document: r.document.clone(),
                metadata: r.metadata.clone(),
                distance: 1.0 - cosine_similarity(vector, &r.vector) as f64,
            })
            .collect();
        rank_hits(&mut hits, k);
        Ok(hits)
    }

    async fn collections(&self) -> CollaboratorResult<Vec<String>> {
        let all = self.collections.read().map_err(|_| poisoned())?;
        Ok(all.keys().cloned().collect())
    }

    async fn count(&self, collection: &str) -> CollaboratorResult<usize> {
        let all = self.collections.read().map_err(|_| poisoned())?;
        all.get(collection)
            .map(|c| c.len())
            .ok_or_else(|| CollaboratorError::MissingCollection(collection.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            metadata: Metadata::new(),
            document: format!("doc {}", id),
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_distance() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(
                "blocks",
                &[
                    record("far", vec![0.0, 1.0]),
                    record("near", vec![1.0, 0.1]),
                    record("exact", vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.query("blocks", &[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store.upsert("c", &[record("a", vec![1.0, 0.0])]).await.unwrap();
        store.upsert("c", &[record("a", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let store = InMemoryVectorStore::new();
        let err = store.query("nope", &[1.0], 3).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::MissingCollection(ref c) if c == "nope"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let store = InMemoryVectorStore::new();
        store.upsert("c", &[record("a", vec![1.0, 0.0])]).await.unwrap();
        let err = store.upsert("c", &[record("b", vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[tokio::test]
    async fn test_equal_distance_ties_break_by_id() {
        let store = InMemoryVectorStore::new();
        store
            .upsert("c", &[record("b", vec![1.0, 0.0]), record("a", vec![1.0, 0.0])])
            .await
            .unwrap();
        let hits = store.query("c", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits[0].id, "a");
    }
}
