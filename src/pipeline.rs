//! End-to-end request pipeline.
//!
//! ```text
//! query ─▶ QueryAnalyzer ─▶ Retriever ─▶ ContextAssembler ─▶ AssembledContext
//!                              ▲                                  │
//!                              │ weights          outcome         ▼
//!                         FeedbackStore ◀──────────────── external generator
//! ```
//!
//! [`Pipeline::from_config`] wires every collaborator from configuration:
//! the embedding provider and vector store are wrapped in timeout
//! decorators, and a `disabled` setting selects the degraded stand-ins so
//! requests still return a (sparser) context.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flowrag_core::analyze::QueryAnalyzer;
use flowrag_core::assemble::ContextAssembler;
use flowrag_core::embedding::EmbeddingProvider;
use flowrag_core::models::{AssembledContext, Outcome, QueryAnalysis, RetrievalSet};
use flowrag_core::retrieve::{Retriever, Weights};
use flowrag_core::store::memory::InMemoryVectorStore;
use flowrag_core::store::{UnavailableStore, VectorStore};

use crate::config::{load_vocabulary, Config};
use crate::db;
use crate::embedding::create_provider;
use crate::feedback::FeedbackStore;
use crate::ingest::{self, IngestReport};
use crate::migrate;
use crate::sqlite_store::SqliteVectorStore;
use crate::timeout::{TimeoutEmbedder, TimeoutStore};

/// Everything produced for one query.
#[derive(Debug, Clone, Serialize)]
pub struct BuildOutput {
    pub analysis: QueryAnalysis,
    pub retrieval: RetrievalSet,
    pub context: AssembledContext,
}

pub struct Pipeline {
    config: Config,
    pool: SqlitePool,
    analyzer: QueryAnalyzer,
    retriever: Retriever,
    assembler: ContextAssembler,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    feedback: FeedbackStore,
}

impl Pipeline {
    /// Connect, migrate and wire collaborators.
    pub async fn from_config(config: &Config) -> Result<Pipeline> {
        let vocab = Arc::new(load_vocabulary(config)?);
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TimeoutEmbedder::new(
            create_provider(&config.embedding)?,
            Duration::from_secs(config.embedding.timeout_secs),
        ));

        let backend: Arc<dyn VectorStore> = match config.vector_store.backend.as_str() {
            "sqlite" => Arc::new(SqliteVectorStore::new(pool.clone())),
            "memory" => Arc::new(InMemoryVectorStore::new()),
            _ => Arc::new(UnavailableStore),
        };
        let store: Arc<dyn VectorStore> = Arc::new(TimeoutStore::new(
            backend,
            Duration::from_secs(config.vector_store.timeout_secs),
        ));

        tracing::info!(
            provider = embedder.model_name(),
            backend = config.vector_store.backend.as_str(),
            "pipeline ready"
        );

        Ok(Pipeline {
            analyzer: QueryAnalyzer::new(Arc::clone(&vocab)),
            retriever: Retriever::new(
                Arc::clone(&embedder),
                Arc::clone(&store),
                Arc::clone(&vocab),
                config.retrieval.params(),
            ),
            assembler: ContextAssembler::new(vocab, config.retrieval.assembly_params()),
            feedback: FeedbackStore::open(pool.clone()),
            config: config.clone(),
            pool,
            embedder,
            store,
        })
    }

    pub fn feedback(&self) -> &FeedbackStore {
        &self.feedback
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        self.analyzer.analyze(query)
    }

    /// Analyze, retrieve with current feedback weights, assemble.
    ///
    /// Never fails: collaborator problems only thin out the context.
    pub async fn build(&self, query: &str) -> BuildOutput {
        let analysis = self.analyzer.analyze(query);
        let weights = Weights::load(&self.feedback).await;
        let retrieval = self
            .retriever
            .retrieve(&analysis, self.config.retrieval.k_per_stage, &weights)
            .await;
        let context = self.assembler.assemble(&analysis, &retrieval);
        tracing::info!(
            intent = %analysis.intent,
            blocks = analysis.required_blocks.len(),
            evidence = context.evidence_by_block.len(),
            patterns = context.patterns.len(),
            "context assembled"
        );
        BuildOutput {
            analysis,
            retrieval,
            context,
        }
    }

    pub async fn build_context(&self, query: &str) -> AssembledContext {
        self.build(query).await.context
    }

    /// Re-derive the analysis and context for `query` and record the outcome.
    pub async fn record_outcome(&self, query: &str, outcome: &Outcome) -> Result<i64> {
        let built = self.build(query).await;
        self.feedback
            .record(query, &built.analysis, &built.context, outcome)
            .await
    }

    /// Create every configured collection (empty upsert).
    pub async fn init_collections(&self) -> Result<Vec<String>> {
        let roles = self.config.retrieval.collections.roles();
        let mut created = Vec::new();
        for name in roles.all() {
            self.store.upsert(name, &[]).await?;
            created.push(name.to_string());
        }
        Ok(created)
    }

    pub async fn ingest(&self, root: &Path, dry_run: bool) -> Result<IngestReport> {
        ingest::ingest_dir(
            &self.config,
            root,
            self.embedder.as_ref(),
            self.store.as_ref(),
            dry_run,
        )
        .await
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
