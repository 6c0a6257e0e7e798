//! Time-bounded collaborator decorators.
//!
//! The core retriever is runtime-agnostic; these wrappers put a tokio
//! deadline around every embedding and vector-store call so a hung backend
//! surfaces as [`CollaboratorError::Timeout`] and degrades like any other
//! collaborator failure.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use flowrag_core::embedding::EmbeddingProvider;
use flowrag_core::error::{CollaboratorError, CollaboratorResult};
use flowrag_core::store::{VectorHit, VectorRecord, VectorStore};

async fn bounded<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = CollaboratorResult<T>>,
) -> CollaboratorResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

pub struct TimeoutEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    limit: Duration,
}

impl TimeoutEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl EmbeddingProvider for TimeoutEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> CollaboratorResult<Vec<Vec<f32>>> {
        bounded("embed", self.limit, self.inner.embed(texts)).await
    }
}

pub struct TimeoutStore {
    inner: Arc<dyn VectorStore>,
    limit: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn VectorStore>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl VectorStore for TimeoutStore {
    // Bulk ingestion is not bounded; only the interactive paths are.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> CollaboratorResult<usize> {
        self.inner.upsert(collection, records).await
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> CollaboratorResult<Vec<VectorHit>> {
        bounded("vector query", self.limit, self.inner.query(collection, vector, k)).await
    }

    async fn collections(&self) -> CollaboratorResult<Vec<String>> {
        bounded("list collections", self.limit, self.inner.collections()).await
    }

    async fn count(&self, collection: &str) -> CollaboratorResult<usize> {
        bounded("count", self.limit, self.inner.count(collection)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn model_name(&self) -> &str {
            "slow"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> CollaboratorResult<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_times_out() {
        let wrapped = TimeoutEmbedder::new(Arc::new(SlowProvider), Duration::from_millis(20));
        let err = wrapped.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Timeout { .. }));
        assert_eq!(wrapped.model_name(), "slow");
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let inner = Arc::new(flowrag_core::embedding::HashingProvider::new(16));
        let wrapped = TimeoutEmbedder::new(inner, Duration::from_secs(5));
        let v = wrapped.embed(&["slack".to_string()]).await.unwrap();
        assert_eq!(v[0].len(), 16);
    }
}
