//! Heuristic query analysis: intent, entities, required blocks, complexity.
//!
//! [`QueryAnalyzer::analyze`] is total. An empty or unintelligible query
//! yields [`Intent::MultiStepWorkflow`] with empty entities and no blocks.

use std::sync::Arc;

use crate::models::{Complexity, Entities, EntityCategory, Intent, QueryAnalysis};
use crate::vocab::{matches_term, tokenize, Vocabulary};

/// Classifies raw queries against an injected [`Vocabulary`].
#[derive(Debug, Clone)]
pub struct QueryAnalyzer {
    vocab: Arc<Vocabulary>,
}

impl QueryAnalyzer {
    pub fn new(vocab: Arc<Vocabulary>) -> Self {
        Self { vocab }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let normalized = query.trim().to_lowercase();
        let tokens = tokenize(&normalized);

        let intent = self.classify(&tokens);
        let entities = self.extract_entities(&tokens);
        let required_blocks = self.required_blocks(intent, &entities, &tokens);
        let complexity = complexity(required_blocks.len(), !entities.conditions.is_empty());

        tracing::debug!(
            intent = %intent,
            blocks = required_blocks.len(),
            complexity = complexity.as_str(),
            "analyzed query"
        );

        QueryAnalysis {
            raw_query: query.to_string(),
            normalized_query: normalized,
            intent,
            entities,
            required_blocks,
            complexity,
        }
    }

    /// Keyword-count argmax over the intent table; first row wins ties.
    fn classify(&self, tokens: &[String]) -> Intent {
        let mut best = Intent::MultiStepWorkflow;
        let mut best_score = 0usize;
        for rule in &self.vocab.intents {
            let score = rule
                .keywords
                .iter()
                .filter(|kw| matches_term(tokens, kw))
                .count();
            if score > best_score {
                best = rule.intent;
                best_score = score;
            }
        }
        best
    }

    fn extract_entities(&self, tokens: &[String]) -> Entities {
        let mut entities = Entities::default();
        let scans = [
            (EntityCategory::Triggers, &self.vocab.triggers),
            (EntityCategory::Actions, &self.vocab.actions),
            (EntityCategory::DataTypes, &self.vocab.data_types),
            (EntityCategory::Conditions, &self.vocab.conditions),
        ];
        for (category, terms) in scans {
            let found = entities.get_mut(category);
            for term in terms {
                if matches_term(tokens, term) && !found.contains(term) {
                    found.push(term.clone());
                }
            }
        }
        for service in &self.vocab.services {
            if service.patterns.iter().any(|p| matches_term(tokens, p)) {
                entities.services.push(service.id.clone());
            }
        }
        entities
    }

    fn required_blocks(&self, intent: Intent, entities: &Entities, tokens: &[String]) -> Vec<String> {
        let mut blocks: Vec<String> = Vec::new();
        if let Some(rule) = self.vocab.intent_rule(intent) {
            for block in &rule.blocks {
                push_unique(&mut blocks, block);
            }
        }
        for id in &entities.services {
            if let Some(service) = self.vocab.service(id) {
                push_unique(&mut blocks, &service.block);
            }
        }

        let has_entry = blocks.iter().any(|b| self.vocab.is_entry_block(b));
        if !entities.triggers.is_empty() && !has_entry {
            let scheduled = intent == Intent::Scheduling
                || self.vocab.schedule_words.iter().any(|w| matches_term(tokens, w));
            let entry = if scheduled {
                &self.vocab.schedule_block
            } else {
                &self.vocab.webhook_block
            };
            blocks.retain(|b| b != entry);
            blocks.insert(0, entry.clone());
        }

        if !entities.conditions.is_empty() {
            push_unique(&mut blocks, &self.vocab.transform_block);
        }
        blocks
    }
}

fn push_unique(blocks: &mut Vec<String>, block: &str) {
    if !blocks.iter().any(|b| b == block) {
        blocks.push(block.to_string());
    }
}

fn complexity(blocks: usize, has_conditions: bool) -> Complexity {
    if blocks <= 2 && !has_conditions {
        Complexity::Simple
    } else if blocks > 4 || (blocks > 3 && has_conditions) {
        Complexity::Complex
    } else {
        Complexity::Moderate
    }
}
