//! Catalog files → typed chunks routed to collections.
//!
//! A catalog is a JSON document with four optional arrays:
//!
//! ```json
//! {
//!   "blocks":      [{ "blockId": "...", "displayName": "...", "properties": {...}, ... }],
//!   "templates":   [{ "id": 1, "name": "...", "nodes": [...], "connections": {...} }],
//!   "tasks":       [{ "id": "...", "title": "...", "blockId": "...", "config": {...} }],
//!   "connections": [{ "source": "...", "targets": ["..."] }]
//! }
//! ```
//!
//! Blocks become OVERVIEW, PROPERTIES, DOCUMENTATION and EXAMPLE chunks in
//! the evidence collection; templates become WORKFLOW_PATTERN chunks; tasks
//! and connection patterns become GENERIC_TEXT chunks in their own
//! collections. Free text (uploaded notes, markdown) goes through
//! [`text_chunks`].

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::chunk::{make_chunk, Chunker};
use crate::models::{Chunk, ChunkType, CollectionRoles, Metadata, META_BLOCK_ID, META_PATTERN_ID};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub blocks: Vec<BlockEntry>,
    #[serde(default)]
    pub templates: Vec<TemplateEntry>,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEntry {
    #[serde(alias = "nodeType")]
    pub block_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_trigger: bool,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default)]
    pub examples: Vec<BlockExample>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockExample {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateEntry {
    pub id: Value,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub connections: Value,
}

impl TemplateEntry {
    /// Stable pattern id used for feedback: `template_<id>`.
    pub fn pattern_id(&self) -> String {
        match &self.id {
            Value::String(s) => format!("template_{}", s),
            other => format!("template_{}", other),
        }
    }

    fn block_types(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter_map(|n| n.get("type").and_then(Value::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub block_id: Option<String>,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionEntry {
    pub source: String,
    pub targets: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A chunk tagged with the collection it belongs in.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedChunk {
    pub collection: String,
    pub chunk: Chunk,
}

impl Catalog {
    pub fn from_json(raw: &str) -> Result<Catalog> {
        serde_json::from_str(raw).context("Failed to parse catalog JSON")
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.templates.is_empty() && self.tasks.is_empty() && self.connections.is_empty()
    }

    /// Every chunk of the catalog, in file order, routed by role.
    pub fn chunks(&self, chunker: &Chunker, roles: &CollectionRoles, structured_max: usize) -> Vec<RoutedChunk> {
        let mut out = Vec::new();
        let mut route = |collection: &str, chunks: Vec<Chunk>| {
            out.extend(chunks.into_iter().map(|chunk| RoutedChunk {
                collection: collection.to_string(),
                chunk,
            }));
        };
        for block in &self.blocks {
            route(roles.evidence.as_str(), block_chunks(block, chunker, structured_max));
        }
        for template in &self.templates {
            route(roles.patterns.as_str(), template_chunks(template, chunker));
        }
        for task in &self.tasks {
            route(roles.tasks.as_str(), task_chunks(task, chunker));
        }
        for conn in &self.connections {
            route(roles.connections.as_str(), vec![connection_chunk(conn)]);
        }
        out
    }
}

fn block_metadata(entry: &BlockEntry) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(META_BLOCK_ID.into(), Value::from(entry.block_id.as_str()));
    meta.insert("category".into(), Value::from(entry.category.as_str()));
    meta.insert("is_trigger".into(), Value::from(entry.is_trigger));
    meta
}

fn display_name(entry: &BlockEntry) -> &str {
    if entry.display_name.is_empty() {
        &entry.block_id
    } else {
        &entry.display_name
    }
}

/// OVERVIEW, PROPERTIES, DOCUMENTATION and EXAMPLE chunks for one block.
pub fn block_chunks(entry: &BlockEntry, chunker: &Chunker, structured_max: usize) -> Vec<Chunk> {
    let name = display_name(entry);
    let mut chunks = Vec::new();

    let overview = format!(
        "Block: {}\nType: {}\nCategory: {}\nDescription: {}\nIs Trigger: {}",
        name,
        entry.block_id,
        if entry.category.is_empty() { "unknown" } else { entry.category.as_str() },
        if entry.description.is_empty() { "No description" } else { entry.description.as_str() },
        entry.is_trigger
    );
    chunks.push(make_chunk(
        ChunkType::Overview,
        &entry.block_id,
        &overview,
        &overview,
        block_metadata(entry),
    ));

    let has_properties = match &entry.properties {
        Value::Null => false,
        Value::Object(m) => !m.is_empty(),
        Value::Array(a) => !a.is_empty(),
        _ => true,
    };
    if has_properties {
        let parts = chunker.split_structured(&entry.properties, structured_max);
        let total = parts.len();
        for (i, part) in parts.iter().enumerate() {
            let mut meta = block_metadata(entry);
            meta.insert("property_part".into(), Value::from(i));
            meta.insert("total_property_parts".into(), Value::from(total));
            let content = format!("Block: {} Properties\n{}", name, part);
            chunks.push(make_chunk(ChunkType::Properties, &entry.block_id, &content, &content, meta));
        }
    }

    if let Some(doc) = entry.documentation.as_deref().filter(|d| !d.trim().is_empty()) {
        let content = format!("{} Documentation:\n{}", name, doc);
        let mut meta = block_metadata(entry);
        meta.insert("has_examples".into(), Value::from(!entry.examples.is_empty()));
        chunks.extend(chunker.make_chunks(ChunkType::Documentation, &entry.block_id, &content, &meta));
    }

    for (i, example) in entry.examples.iter().enumerate() {
        let title = example
            .title
            .clone()
            .unwrap_or_else(|| format!("Example {}", i + 1));
        let config = serde_json::to_string_pretty(&example.config).unwrap_or_else(|_| example.config.to_string());
        let content = format!("Example: {} for {}\nConfiguration: {}", title, name, config);
        let mut meta = block_metadata(entry);
        meta.insert("example_index".into(), Value::from(i));
        meta.insert("example_title".into(), Value::from(title));
        chunks.push(make_chunk(ChunkType::Example, &entry.block_id, &content, &content, meta));
    }

    chunks
}

/// WORKFLOW_PATTERN chunks for one template; large templates overlap-split.
pub fn template_chunks(entry: &TemplateEntry, chunker: &Chunker) -> Vec<Chunk> {
    let connections = serde_json::to_string_pretty(&entry.connections).unwrap_or_default();
    let content = format!(
        "Workflow Template: {}\nDescription: {}\nBlocks Used: {}\nTags: {}\nConnections: {}",
        if entry.name.is_empty() { "Unnamed Template" } else { entry.name.as_str() },
        if entry.description.is_empty() { "No description available" } else { entry.description.as_str() },
        entry.block_types().join(", "),
        entry.tags.join(", "),
        connections
    );
    let pattern_id = entry.pattern_id();
    let mut meta = Metadata::new();
    meta.insert(META_PATTERN_ID.into(), Value::from(pattern_id.as_str()));
    meta.insert("block_count".into(), Value::from(entry.nodes.len()));
    meta.insert("tags".into(), Value::from(entry.tags.join(", ")));

    let base_id = format!("{}_{}", pattern_id, entry.name);
    chunker.make_chunks(ChunkType::WorkflowPattern, &base_id, &content, &meta)
}

pub fn task_chunks(entry: &TaskEntry, chunker: &Chunker) -> Vec<Chunk> {
    let config = serde_json::to_string_pretty(&entry.config).unwrap_or_default();
    let content = format!(
        "Task: {}\n{}\nBlock: {}\nConfiguration: {}",
        entry.title,
        entry.description,
        entry.block_id.as_deref().unwrap_or("any"),
        config
    );
    let mut meta = Metadata::new();
    meta.insert("kind".into(), Value::from("task"));
    meta.insert("task_id".into(), Value::from(entry.id.as_str()));
    if let Some(block) = &entry.block_id {
        meta.insert(META_BLOCK_ID.into(), Value::from(block.as_str()));
    }
    chunker.make_chunks(ChunkType::GenericText, &entry.id, &content, &meta)
}

pub fn connection_chunk(entry: &ConnectionEntry) -> Chunk {
    let mut content = format!("Connection pattern: {} → {}", entry.source, entry.targets.join(", "));
    if let Some(desc) = &entry.description {
        content.push('\n');
        content.push_str(desc);
    }
    let mut meta = Metadata::new();
    meta.insert("kind".into(), Value::from("connection"));
    meta.insert(META_BLOCK_ID.into(), Value::from(entry.source.as_str()));
    make_chunk(ChunkType::GenericText, &entry.source, &content, &content, meta)
}

/// GENERIC_TEXT chunks for free-form material identified by `source`.
pub fn text_chunks(source: &str, text: &str, chunker: &Chunker) -> Vec<Chunk> {
    let mut meta = Metadata::new();
    meta.insert("source".into(), Value::from(source));
    meta.insert("kind".into(), Value::from("text"));
    chunker.make_chunks(ChunkType::GenericText, source, text, &meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::META_CHUNK_TYPE;

    const CATALOG: &str = r##"{
        "blocks": [{
            "blockId": "n8n-nodes-base.slack",
            "displayName": "Slack",
            "category": "communication",
            "description": "Send messages to Slack",
            "properties": {"channel": {"type": "string"}, "text": {"type": "string"}},
            "documentation": "Use the Slack node to post messages to channels.",
            "examples": [{"title": "Post alert", "config": {"channel": "#alerts"}}]
        }, {
            "nodeType": "n8n-nodes-base.webhook",
            "displayName": "Webhook",
            "isTrigger": true
        }],
        "templates": [{
            "id": 7,
            "name": "Webhook to Slack",
            "description": "Forward webhook payloads to Slack",
            "nodes": [{"type": "n8n-nodes-base.webhook"}, {"type": "n8n-nodes-base.slack"}],
            "tags": ["notification"],
            "connections": {"Webhook": {"main": [[{"node": "Slack"}]]}}
        }],
        "tasks": [{"id": "t1", "title": "Post to channel", "blockId": "n8n-nodes-base.slack", "config": {"channel": "#general"}}],
        "connections": [{"source": "n8n-nodes-base.webhook", "targets": ["n8n-nodes-base.slack"]}]
    }"##;

    fn chunker() -> Chunker {
        Chunker::new(800, 100).unwrap()
    }

    #[test]
    fn test_block_chunk_types() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let chunks = block_chunks(&catalog.blocks[0], &chunker(), 1000);
        let types: Vec<ChunkType> = chunks.iter().map(|c| c.chunk_type).collect();
        assert_eq!(
            types,
            vec![
                ChunkType::Overview,
                ChunkType::Properties,
                ChunkType::Documentation,
                ChunkType::Example
            ]
        );
        for c in &chunks {
            assert_eq!(c.metadata[META_BLOCK_ID], "n8n-nodes-base.slack");
            assert_eq!(c.metadata[META_CHUNK_TYPE], c.chunk_type.as_str());
        }
        assert!(chunks[1].text.starts_with("Block: Slack Properties"));
        assert_eq!(chunks[1].text, chunks[1].embedding_text);
        assert!(chunks[3].text.contains("#alerts"));
    }

    #[test]
    fn test_shared_property_schema_keeps_distinct_prefixes() {
        let catalog = Catalog::from_json(
            r#"{"blocks": [
                {"blockId": "n8n-nodes-base.airtable", "displayName": "Airtable",
                 "properties": {"resource": {"type": "options"}, "operation": {"type": "options"}}},
                {"blockId": "n8n-nodes-base.notion", "displayName": "Notion",
                 "properties": {"resource": {"type": "options"}, "operation": {"type": "options"}}}
            ]}"#,
        )
        .unwrap();
        let prefix = |i: usize| -> String {
            let chunks = block_chunks(&catalog.blocks[i], &chunker(), 1000);
            let props = chunks
                .iter()
                .find(|c| c.chunk_type == ChunkType::Properties)
                .unwrap();
            props.text.chars().take(100).collect()
        };
        assert_ne!(prefix(0), prefix(1));
    }

    #[test]
    fn test_minimal_block_overview_only() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let chunks = block_chunks(&catalog.blocks[1], &chunker(), 1000);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Is Trigger: true"));
        assert!(chunks[0].text.contains("No description"));
    }

    #[test]
    fn test_routing_by_role() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let routed = catalog.chunks(&chunker(), &CollectionRoles::default(), 1000);
        let count = |c: &str| routed.iter().filter(|r| r.collection == c).count();
        assert_eq!(count("blocks"), 5);
        assert_eq!(count("patterns"), 1);
        assert_eq!(count("tasks"), 1);
        assert_eq!(count("connections"), 1);

        let pattern = routed.iter().find(|r| r.collection == "patterns").unwrap();
        assert_eq!(pattern.chunk.chunk_type, ChunkType::WorkflowPattern);
        assert_eq!(pattern.chunk.metadata[META_PATTERN_ID], "template_7");
        assert!(pattern.chunk.text.contains("n8n-nodes-base.webhook, n8n-nodes-base.slack"));
    }

    #[test]
    fn test_reingest_is_idempotent() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let ids = |c: &Catalog| -> Vec<String> {
            c.chunks(&chunker(), &CollectionRoles::default(), 1000)
                .into_iter()
                .map(|r| r.chunk.id)
                .collect()
        };
        assert_eq!(ids(&catalog), ids(&catalog));
    }

    #[test]
    fn test_string_template_id() {
        let catalog = Catalog::from_json(r#"{"templates": [{"id": "abc"}]}"#).unwrap();
        assert_eq!(catalog.templates[0].pattern_id(), "template_abc");
    }

    #[test]
    fn test_empty_and_invalid() {
        assert!(Catalog::from_json("{}").unwrap().is_empty());
        assert!(Catalog::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_text_chunks() {
        let chunks = text_chunks("notes.md", "Remember to set the channel.", &chunker());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::GenericText);
        assert_eq!(chunks[0].metadata["source"], "notes.md");
    }
}
