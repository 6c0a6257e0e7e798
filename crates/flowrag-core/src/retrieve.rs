//! Multi-collection retrieval with service-aware reranking.
//!
//! # Algorithm
//!
//! 1. Expand the analyzed query into variants: the normalized query, the
//!    intent's canned phrase, and one `"<block> configuration example"`
//!    per required block (capped).
//! 2. Embed the variants the stages need in one batch.
//! 3. Fan out one vector query per (collection, variant): the evidence
//!    collection uses the first `evidence_variants` variants, every other
//!    collection uses the base query only, with a per-collection cap on `k`.
//! 4. Score each hit: `rank = (base + service_bonus) × feedback_factor`.
//!    Evidence uses `base = 1/(1+d)`; auxiliary collections use `1 − d/2`.
//! 5. Stable sort descending by rank, then drop hits whose content prefix
//!    hash was already seen.
//!
//! A failed or missing collection yields `[]` under its key. A failed
//! embedding call yields `[]` for every key. Nothing here returns an error.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::EmbeddingProvider;
use crate::models::{truncate_chars, CollectionRoles, QueryAnalysis, RetrievalResult, RetrievalSet};
use crate::store::{VectorHit, VectorStore};
use crate::vocab::{matches_term, tokenize, Vocabulary};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Query variants embedded for the evidence collection.
    pub evidence_variants: usize,
    /// Cap on per-block `"<block> configuration example"` variants.
    pub max_block_variants: usize,
    /// Characters of content hashed for deduplication.
    pub dedup_prefix: usize,
    /// λ in `(1 − λ) + λ·weight`; 0 disables feedback re-weighting.
    pub feedback_influence: f64,
    pub collections: CollectionRoles,
    pub pattern_cap: usize,
    pub task_cap: usize,
    pub connection_cap: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            evidence_variants: 2,
            max_block_variants: 6,
            dedup_prefix: 100,
            feedback_influence: 0.5,
            collections: CollectionRoles::default(),
            pattern_cap: 3,
            task_cap: 3,
            connection_cap: 2,
        }
    }
}

/// Snapshot of effectiveness scores used to re-weight one retrieval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Weights {
    pub blocks: BTreeMap<String, f64>,
    pub patterns: BTreeMap<String, f64>,
}

impl Weights {
    /// Load a snapshot, degrading to empty maps if the source fails.
    pub async fn load(source: &dyn WeightSource) -> Weights {
        let blocks = source.block_weights().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "block weights unavailable; retrieving without feedback");
            BTreeMap::new()
        });
        let patterns = source.pattern_weights().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "pattern weights unavailable; retrieving without feedback");
            BTreeMap::new()
        });
        Weights { blocks, patterns }
    }
}

/// Source of learned effectiveness scores (the feedback store).
#[async_trait]
pub trait WeightSource: Send + Sync {
    async fn block_weights(&self) -> anyhow::Result<BTreeMap<String, f64>>;
    async fn pattern_weights(&self) -> anyhow::Result<BTreeMap<String, f64>>;
}

/// A [`WeightSource`] with no history.
#[derive(Debug, Clone, Default)]
pub struct NoFeedback;

#[async_trait]
impl WeightSource for NoFeedback {
    async fn block_weights(&self) -> anyhow::Result<BTreeMap<String, f64>> {
        Ok(BTreeMap::new())
    }

    async fn pattern_weights(&self) -> anyhow::Result<BTreeMap<String, f64>> {
        Ok(BTreeMap::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageKind {
    Evidence,
    Patterns,
    Auxiliary,
}

#[derive(Debug, Clone)]
struct Stage {
    collection: String,
    kind: StageKind,
    k: usize,
    variants: usize,
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    vocab: Arc<Vocabulary>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        vocab: Arc<Vocabulary>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            embedder,
            store,
            vocab,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Search strings for an analysis, deduplicated, base query first.
    pub fn expand_query(&self, analysis: &QueryAnalysis) -> Vec<String> {
        let mut variants: Vec<String> = Vec::new();
        let mut add = |v: String| {
            if !v.trim().is_empty() && !variants.contains(&v) {
                variants.push(v);
            }
        };
        add(analysis.normalized_query.clone());
        if let Some(phrase) = self
            .vocab
            .intent_rule(analysis.intent)
            .and_then(|r| r.expansion.clone())
        {
            add(phrase);
        }
        for block in analysis.required_blocks.iter().take(self.params.max_block_variants) {
            add(format!("{} configuration example", block_name(block)));
        }
        variants
    }

    fn stages(&self, k: usize) -> Vec<Stage> {
        let c = &self.params.collections;
        vec![
            Stage {
                collection: c.evidence.clone(),
                kind: StageKind::Evidence,
                k,
                variants: self.params.evidence_variants.max(1),
            },
            Stage {
                collection: c.patterns.clone(),
                kind: StageKind::Patterns,
                k: k.min(self.params.pattern_cap),
                variants: 1,
            },
            Stage {
                collection: c.tasks.clone(),
                kind: StageKind::Auxiliary,
                k: k.min(self.params.task_cap),
                variants: 1,
            },
            Stage {
                collection: c.connections.clone(),
                kind: StageKind::Auxiliary,
                k: k.min(self.params.connection_cap),
                variants: 1,
            },
        ]
    }

    /// Ranked results for every configured collection.
    ///
    /// The returned map always has one key per configured collection.
    pub async fn retrieve(&self, analysis: &QueryAnalysis, k_per_stage: usize, weights: &Weights) -> RetrievalSet {
        let stages = self.stages(k_per_stage);
        let mut set: RetrievalSet = stages
            .iter()
            .map(|s| (s.collection.clone(), Vec::new()))
            .collect();

        let variants = self.expand_query(analysis);
        if variants.is_empty() || k_per_stage == 0 {
            return set;
        }
        // Only the variants some stage uses get embedded.
        let needed = stages
            .iter()
            .map(|s| s.variants)
            .max()
            .unwrap_or(1)
            .min(variants.len());

        let vectors = match self.embedder.embed(&variants[..needed]).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed; returning empty results");
                return set;
            }
        };

        let jobs: Vec<(usize, &Vec<f32>)> = stages
            .iter()
            .enumerate()
            .flat_map(|(i, stage)| vectors.iter().take(stage.variants).map(move |v| (i, v)))
            .collect();

        let outputs = join_all(jobs.iter().map(|&(i, vector)| {
            let stage = &stages[i];
            async move {
                (
                    i,
                    self.store.query(&stage.collection, vector, stage.k).await,
                )
            }
        }))
        .await;

        // join_all preserves input order, so hits merge in (stage, variant) order.
        let mut raw: Vec<Vec<VectorHit>> = vec![Vec::new(); stages.len()];
        let mut succeeded = vec![0usize; stages.len()];
        for (i, result) in outputs {
            match result {
                Ok(hits) => {
                    succeeded[i] += 1;
                    raw[i].extend(hits);
                }
                Err(e) => tracing::warn!(
                    collection = %stages[i].collection,
                    error = %e,
                    "collection query failed; keeping hits from other variants"
                ),
            }
        }

        for (i, stage) in stages.iter().enumerate() {
            if succeeded[i] == 0 {
                continue;
            }
            let hits = std::mem::take(&mut raw[i]);
            let mut results: Vec<RetrievalResult> = hits
                .into_iter()
                .map(|hit| self.score_hit(stage.kind, &analysis.entities.services, weights, hit))
                .collect();
            rerank(&mut results);
            let results = dedup(results, self.params.dedup_prefix);
            tracing::debug!(collection = %stage.collection, hits = results.len(), "collection ranked");
            set.insert(stage.collection.clone(), results);
        }
        set
    }

    fn score_hit(&self, kind: StageKind, services: &[String], weights: &Weights, hit: VectorHit) -> RetrievalResult {
        let (base, bonus, weight) = match kind {
            StageKind::Evidence => {
                let block = hit.metadata.get(crate::models::META_BLOCK_ID).and_then(|v| v.as_str());
                (
                    1.0 / (1.0 + hit.distance),
                    service_bonus(&self.vocab, services, block, &hit.document),
                    block.and_then(|b| weights.blocks.get(b)).copied(),
                )
            }
            StageKind::Patterns => {
                let pattern = hit.metadata.get(crate::models::META_PATTERN_ID).and_then(|v| v.as_str());
                (
                    1.0 - hit.distance / 2.0,
                    0.0,
                    pattern.and_then(|p| weights.patterns.get(p)).copied(),
                )
            }
            StageKind::Auxiliary => (1.0 - hit.distance / 2.0, 0.0, None),
        };
        let rank = (base + bonus) * feedback_factor(weight, self.params.feedback_influence);
        RetrievalResult {
            content: hit.document,
            metadata: hit.metadata,
            relevance_score: rank.clamp(0.0, 1.0),
            rank_score: rank,
            distance: hit.distance,
            service_bonus: bonus,
        }
    }
}

/// `"n8n-nodes-base.httpRequest"` → `"httpRequest"`.
fn block_name(block: &str) -> &str {
    block.rsplit('.').next().unwrap_or(block)
}

/// Signed additive score term for one evidence hit.
///
/// * `+service.bonus` for each detected service the block id names.
/// * `−fallback.penalty` when the block is a generic fallback superseded by
///   a detected service and earned no direct bonus itself.
/// * `+content_bonus` for each detected service the document text mentions.
pub fn service_bonus(vocab: &Vocabulary, detected: &[String], block_id: Option<&str>, document: &str) -> f64 {
    if detected.is_empty() {
        return 0.0;
    }
    let mut bonus = 0.0;

    if let Some(block) = block_id {
        let block_lc = block.to_lowercase();
        let mut direct = false;
        for rule in detected.iter().filter_map(|id| vocab.service(id)) {
            if block_lc.contains(&rule.id) || block == rule.block {
                bonus += rule.bonus;
                direct = true;
            }
        }
        if !direct {
            for fallback in &vocab.fallbacks {
                if fallback.block == block && detected.iter().any(|s| fallback.superseded_by.contains(s)) {
                    bonus -= fallback.penalty;
                }
            }
        }
    }

    let doc_tokens = tokenize(document);
    for rule in detected.iter().filter_map(|id| vocab.service(id)) {
        if rule.patterns.iter().any(|p| matches_term(&doc_tokens, p)) {
            bonus += vocab.content_bonus;
        }
    }
    bonus
}

/// `(1 − λ) + λ·weight`; ids without history keep factor 1.
pub fn feedback_factor(weight: Option<f64>, influence: f64) -> f64 {
    match weight {
        Some(w) => (1.0 - influence) + influence * w.clamp(0.0, 1.0),
        None => 1.0,
    }
}

/// Stable sort, descending by `rank_score`.
pub fn rerank(results: &mut [RetrievalResult]) {
    results.sort_by(|a, b| {
        b.rank_score
            .partial_cmp(&a.rank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Keep the first result per content-prefix hash. Run after [`rerank`] so
/// the survivor is the highest-scored instance.
pub fn dedup(results: Vec<RetrievalResult>, prefix_chars: usize) -> Vec<RetrievalResult> {
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    results
        .into_iter()
        .filter(|r| {
            let key = Sha256::digest(truncate_chars(&r.content, prefix_chars).as_bytes()).to_vec();
            seen.insert(key)
        })
        .collect()
}
