//! Merge analysis and ranked evidence into one [`AssembledContext`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunk::chunk_id;
use crate::models::{
    truncate_chars, AssembledContext, CollectionRoles, Evidence, ExampleRef, PatternRef, QueryAnalysis,
    RetrievalResult, RetrievalSet,
};
use crate::vocab::Vocabulary;

/// Selection thresholds and excerpt lengths for assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyParams {
    pub pattern_threshold: f64,
    pub max_patterns: usize,
    pub example_threshold: f64,
    pub max_examples: usize,
    pub evidence_chars: usize,
    pub pattern_chars: usize,
    pub example_chars: usize,
    pub collections: CollectionRoles,
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self {
            pattern_threshold: 0.7,
            max_patterns: 3,
            example_threshold: 0.6,
            max_examples: 2,
            evidence_chars: 500,
            pattern_chars: 300,
            example_chars: 400,
            collections: CollectionRoles::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    vocab: Arc<Vocabulary>,
    params: AssemblyParams,
}

impl ContextAssembler {
    pub fn new(vocab: Arc<Vocabulary>, params: AssemblyParams) -> Self {
        Self { vocab, params }
    }

    pub fn assemble(&self, analysis: &QueryAnalysis, results: &RetrievalSet) -> AssembledContext {
        let c = &self.params.collections;

        let evidence_by_block = self.evidence(&analysis.required_blocks, hits_in(results, &c.evidence));
        let patterns = self.patterns(hits_in(results, &c.patterns));
        let examples = self.examples(&[
            ("task", hits_in(results, &c.tasks)),
            ("connection", hits_in(results, &c.connections)),
        ]);
        let rules = self.vocab.rules_for(&analysis.required_blocks);

        let mut ctx = AssembledContext {
            query: analysis.raw_query.clone(),
            intent: analysis.intent,
            complexity: analysis.complexity,
            required_blocks: analysis.required_blocks.clone(),
            evidence_by_block,
            patterns,
            examples,
            rules,
            instruction_text: String::new(),
        };
        ctx.instruction_text = render_instructions(&ctx);

        tracing::debug!(
            evidence = ctx.evidence_by_block.len(),
            patterns = ctx.patterns.len(),
            examples = ctx.examples.len(),
            "assembled context"
        );
        ctx
    }

    /// First matching evidence hit per required block; unmatched blocks are omitted.
    fn evidence(&self, blocks: &[String], hits: &[RetrievalResult]) -> BTreeMap<String, Evidence> {
        let mut out = BTreeMap::new();
        for block in blocks {
            if let Some(hit) = hits.iter().find(|h| h.block_id() == Some(block.as_str())) {
                out.insert(
                    block.clone(),
                    Evidence {
                        block_id: block.clone(),
                        description: truncate_chars(&hit.content, self.params.evidence_chars).to_string(),
                        properties: hit.metadata.clone(),
                        relevance_score: hit.relevance_score,
                    },
                );
            }
        }
        out
    }

    fn patterns(&self, hits: &[RetrievalResult]) -> Vec<PatternRef> {
        hits.iter()
            .filter(|h| h.relevance_score > self.params.pattern_threshold)
            .take(self.params.max_patterns)
            .map(|h| PatternRef {
                pattern_id: h
                    .pattern_id()
                    .map(str::to_string)
                    .unwrap_or_else(|| chunk_id("pat", "anonymous", &h.content)),
                description: truncate_chars(&h.content, self.params.pattern_chars).to_string(),
                relevance_score: h.relevance_score,
            })
            .collect()
    }

    fn examples(&self, sources: &[(&str, &[RetrievalResult])]) -> Vec<ExampleRef> {
        let mut candidates: Vec<ExampleRef> = sources
            .iter()
            .flat_map(|(kind, hits)| {
                hits.iter()
                    .filter(|h| h.relevance_score > self.params.example_threshold)
                    .map(move |h| ExampleRef {
                        kind: kind.to_string(),
                        content: truncate_chars(&h.content, self.params.example_chars).to_string(),
                        relevance_score: h.relevance_score,
                    })
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.params.max_examples);
        candidates
    }
}

fn hits_in<'a>(results: &'a RetrievalSet, name: &str) -> &'a [RetrievalResult] {
    results.get(name).map(Vec::as_slice).unwrap_or(&[])
}

fn render_instructions(ctx: &AssembledContext) -> String {
    let mut out = String::new();
    out.push_str("Build a workflow that satisfies the request below.\n\n");
    out.push_str(&format!("REQUEST: {}\n", ctx.query.trim()));
    out.push_str(&format!("INTENT: {}\n", ctx.intent));
    out.push_str(&format!("COMPLEXITY: {}\n", ctx.complexity.as_str()));

    out.push_str("\nREQUIRED BLOCKS:\n");
    if ctx.required_blocks.is_empty() {
        out.push_str("- (none detected; choose blocks that fit the request)\n");
    }
    for block in &ctx.required_blocks {
        out.push_str(&format!("- {}\n", block));
    }

    if !ctx.evidence_by_block.is_empty() {
        out.push_str("\nBLOCK DOCUMENTATION:\n");
        for block in &ctx.required_blocks {
            if let Some(ev) = ctx.evidence_by_block.get(block) {
                out.push_str(&format!("## {}\n{}\n\n", ev.block_id, ev.description.trim()));
            }
        }
    }

    if !ctx.patterns.is_empty() {
        out.push_str("\nSIMILAR PATTERNS:\n");
        for (i, p) in ctx.patterns.iter().enumerate() {
            out.push_str(&format!(
                "{}. [{}] (relevance {:.2})\n{}\n",
                i + 1,
                p.pattern_id,
                p.relevance_score,
                p.description.trim()
            ));
        }
    }

    if !ctx.examples.is_empty() {
        out.push_str("\nEXAMPLES:\n");
        for ex in &ctx.examples {
            out.push_str(&format!("- {} example:\n{}\n", ex.kind, ex.content.trim()));
        }
    }

    out.push_str("\nRULES:\n");
    for (i, rule) in ctx.rules.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, rule));
    }
    out.push_str("\nRespond with the workflow as a single JSON object with `nodes` and `connections`.\n");
    out
}
