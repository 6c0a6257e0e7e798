//! Core data models used throughout flowrag.
//!
//! These types represent the chunks, query analyses, retrieval results and
//! assembled contexts that flow through the ingestion and retrieval pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scalar metadata attached to chunks and vector records.
///
/// A `BTreeMap` keeps key iteration order stable so serialized metadata and
/// anything derived from it are deterministic.
pub type Metadata = BTreeMap<String, Value>;

/// Metadata key holding the building-block identifier a chunk documents.
pub const META_BLOCK_ID: &str = "block_id";
/// Metadata key holding the structural pattern identifier of a template chunk.
pub const META_PATTERN_ID: &str = "pattern_id";
/// Metadata key holding the [`ChunkType`] label.
pub const META_CHUNK_TYPE: &str = "chunk_type";

/// Category of an embedded chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Overview,
    Properties,
    Documentation,
    Example,
    GenericText,
    WorkflowPattern,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Overview => "overview",
            ChunkType::Properties => "properties",
            ChunkType::Documentation => "documentation",
            ChunkType::Example => "example",
            ChunkType::GenericText => "generic_text",
            ChunkType::WorkflowPattern => "workflow_pattern",
        }
    }

    /// Short prefix used when deriving chunk ids.
    pub fn prefix(&self) -> &'static str {
        match self {
            ChunkType::Overview => "ovw",
            ChunkType::Properties => "prop",
            ChunkType::Documentation => "doc",
            ChunkType::Example => "ex",
            ChunkType::GenericText => "txt",
            ChunkType::WorkflowPattern => "pat",
        }
    }
}

/// A size-bounded unit of text ready for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Content-derived id: identical `(type, content)` yields the same id.
    pub id: String,
    pub chunk_type: ChunkType,
    pub text: String,
    /// Text handed to the embedding provider (may carry a title prefix).
    pub embedding_text: String,
    pub metadata: Metadata,
}

/// Workflow intent inferred from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    WebhookTrigger,
    ApiIntegration,
    DataTransformation,
    DatabaseOperation,
    AiAutomation,
    Notification,
    FileProcessing,
    Scheduling,
    ErrorHandling,
    MultiStepWorkflow,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::WebhookTrigger => "webhook_trigger",
            Intent::ApiIntegration => "api_integration",
            Intent::DataTransformation => "data_transformation",
            Intent::DatabaseOperation => "database_operation",
            Intent::AiAutomation => "ai_automation",
            Intent::Notification => "notification",
            Intent::FileProcessing => "file_processing",
            Intent::Scheduling => "scheduling",
            Intent::ErrorHandling => "error_handling",
            Intent::MultiStepWorkflow => "multi_step_workflow",
        }
    }

    pub fn parse(s: &str) -> Option<Intent> {
        let intent = match s {
            "webhook_trigger" => Intent::WebhookTrigger,
            "api_integration" => Intent::ApiIntegration,
            "data_transformation" => Intent::DataTransformation,
            "database_operation" => Intent::DatabaseOperation,
            "ai_automation" => Intent::AiAutomation,
            "notification" => Intent::Notification,
            "file_processing" => Intent::FileProcessing,
            "scheduling" => Intent::Scheduling,
            "error_handling" => Intent::ErrorHandling,
            "multi_step_workflow" => Intent::MultiStepWorkflow,
            _ => return None,
        };
        Some(intent)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse workflow size rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        }
    }
}

/// Entity category tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Triggers,
    Services,
    Actions,
    DataTypes,
    Conditions,
}

/// Query-derived entities, one list per category, in vocabulary order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    pub triggers: Vec<String>,
    pub services: Vec<String>,
    pub actions: Vec<String>,
    pub data_types: Vec<String>,
    pub conditions: Vec<String>,
}

impl Entities {
    pub(crate) fn get_mut(&mut self, category: EntityCategory) -> &mut Vec<String> {
        match category {
            EntityCategory::Triggers => &mut self.triggers,
            EntityCategory::Services => &mut self.services,
            EntityCategory::Actions => &mut self.actions,
            EntityCategory::DataTypes => &mut self.data_types,
            EntityCategory::Conditions => &mut self.conditions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
            && self.services.is_empty()
            && self.actions.is_empty()
            && self.data_types.is_empty()
            && self.conditions.is_empty()
    }
}

/// Result of analyzing one raw query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub raw_query: String,
    pub normalized_query: String,
    pub intent: Intent,
    pub entities: Entities,
    /// Ordered, duplicate-free list of building-block ids.
    pub required_blocks: Vec<String>,
    pub complexity: Complexity,
}

/// One ranked hit from a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub metadata: Metadata,
    /// Ranking score clamped to `[0.0, 1.0]`.
    pub relevance_score: f64,
    /// Unclamped `base + bonus` score (after feedback weighting) used for ordering.
    pub rank_score: f64,
    /// Raw distance reported by the vector store.
    pub distance: f64,
    /// Signed service adjustment that went into `rank_score`.
    pub service_bonus: f64,
}

impl RetrievalResult {
    /// Block id this hit documents, if any.
    pub fn block_id(&self) -> Option<&str> {
        self.metadata.get(META_BLOCK_ID).and_then(|v| v.as_str())
    }

    pub fn pattern_id(&self) -> Option<&str> {
        self.metadata.get(META_PATTERN_ID).and_then(|v| v.as_str())
    }
}

/// Ranked results keyed by collection name.
///
/// A `BTreeMap` so iteration (and therefore rendering and serialization) is
/// independent of the order in which collection queries completed.
pub type RetrievalSet = BTreeMap<String, Vec<RetrievalResult>>;

/// Logical roles of the configured collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRoles {
    pub evidence: String,
    pub patterns: String,
    pub tasks: String,
    pub connections: String,
}

impl Default for CollectionRoles {
    fn default() -> Self {
        Self {
            evidence: "blocks".to_string(),
            patterns: "patterns".to_string(),
            tasks: "tasks".to_string(),
            connections: "connections".to_string(),
        }
    }
}

impl CollectionRoles {
    pub fn all(&self) -> [&str; 4] {
        [
            self.evidence.as_str(),
            self.patterns.as_str(),
            self.tasks.as_str(),
            self.connections.as_str(),
        ]
    }

    /// Collection a chunk of the given type is stored in.
    pub fn for_chunk_type(&self, chunk_type: ChunkType) -> &str {
        match chunk_type {
            ChunkType::Overview
            | ChunkType::Properties
            | ChunkType::Documentation
            | ChunkType::Example => &self.evidence,
            ChunkType::WorkflowPattern => &self.patterns,
            ChunkType::GenericText => &self.tasks,
        }
    }
}

/// Documentation retrieved for one required block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub block_id: String,
    pub description: String,
    pub properties: Metadata,
    pub relevance_score: f64,
}

/// A structural pattern selected for the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRef {
    pub pattern_id: String,
    pub description: String,
    pub relevance_score: f64,
}

/// A usage example selected for the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleRef {
    pub kind: String,
    pub content: String,
    pub relevance_score: f64,
}

/// The structured bundle handed to the external generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub query: String,
    pub intent: Intent,
    pub complexity: Complexity,
    pub required_blocks: Vec<String>,
    pub evidence_by_block: BTreeMap<String, Evidence>,
    pub patterns: Vec<PatternRef>,
    pub examples: Vec<ExampleRef>,
    pub rules: Vec<String>,
    pub instruction_text: String,
}

/// Outcome of an external generation attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(default)]
    pub validation_errors: Vec<String>,
}

/// Cumulative usage statistics for one block or pattern id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessRecord {
    pub id: String,
    pub total_uses: i64,
    pub successful_uses: i64,
    pub score: f64,
}

/// Truncate to at most `max_chars` characters (not bytes).
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_parse_roundtrip_names() {
        for name in ["webhook_trigger", "scheduling", "multi_step_workflow"] {
            assert_eq!(Intent::parse(name).unwrap().as_str(), name);
        }
        assert!(Intent::parse("nonsense").is_none());
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_chunk_type_routing() {
        let roles = CollectionRoles::default();
        assert_eq!(roles.for_chunk_type(ChunkType::Example), "blocks");
        assert_eq!(roles.for_chunk_type(ChunkType::WorkflowPattern), "patterns");
        assert_eq!(roles.for_chunk_type(ChunkType::GenericText), "tasks");
    }
}
