//! Configuration parsing and validation.
//!
//! flowrag is configured via a TOML file (default: `config/flowrag.toml`).
//! Every section except `[db]` is optional and falls back to the defaults
//! below.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/flowrag.sqlite"
//!
//! [chunking]
//! chunk_size = 800
//! chunk_overlap = 100
//!
//! [retrieval]
//! k_per_stage = 5
//! feedback_influence = 0.5
//!
//! [retrieval.collections]
//! evidence = "blocks"
//! patterns = "patterns"
//!
//! [embedding]
//! provider = "openai"           # disabled | hashing | openai | ollama | local
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [vector_store]
//! backend = "sqlite"            # sqlite | memory | disabled
//! timeout_secs = 10
//!
//! [vocabulary]
//! path = "./config/vocabulary.toml"
//!
//! [ingest]
//! include_globs = ["**/*.json", "**/*.md"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use flowrag_core::assemble::AssemblyParams;
use flowrag_core::models::CollectionRoles;
use flowrag_core::retrieve::RetrievalParams;
use flowrag_core::vocab::Vocabulary;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub vocabulary: VocabularyConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// SQLite file holding vectors and feedback.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Serialized size above which structured content is split by key.
    #[serde(default = "default_structured_max")]
    pub structured_max: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            structured_max: default_structured_max(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_structured_max() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k_per_stage")]
    pub k_per_stage: usize,
    #[serde(default = "default_evidence_variants")]
    pub evidence_variants: usize,
    #[serde(default = "default_max_block_variants")]
    pub max_block_variants: usize,
    #[serde(default = "default_dedup_prefix")]
    pub dedup_prefix: usize,
    /// λ in `(1 − λ) + λ·weight`.
    #[serde(default = "default_feedback_influence")]
    pub feedback_influence: f64,
    #[serde(default = "default_pattern_threshold")]
    pub pattern_threshold: f64,
    #[serde(default = "default_example_threshold")]
    pub example_threshold: f64,
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,
    #[serde(default = "default_max_examples")]
    pub max_examples: usize,
    #[serde(default)]
    pub collections: CollectionsConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_per_stage: default_k_per_stage(),
            evidence_variants: default_evidence_variants(),
            max_block_variants: default_max_block_variants(),
            dedup_prefix: default_dedup_prefix(),
            feedback_influence: default_feedback_influence(),
            pattern_threshold: default_pattern_threshold(),
            example_threshold: default_example_threshold(),
            max_patterns: default_max_patterns(),
            max_examples: default_max_examples(),
            collections: CollectionsConfig::default(),
        }
    }
}

fn default_k_per_stage() -> usize {
    5
}
fn default_evidence_variants() -> usize {
    2
}
fn default_max_block_variants() -> usize {
    6
}
fn default_dedup_prefix() -> usize {
    100
}
fn default_feedback_influence() -> f64 {
    0.5
}
fn default_pattern_threshold() -> f64 {
    0.7
}
fn default_example_threshold() -> f64 {
    0.6
}
fn default_max_patterns() -> usize {
    3
}
fn default_max_examples() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionsConfig {
    #[serde(default = "default_evidence")]
    pub evidence: String,
    #[serde(default = "default_patterns")]
    pub patterns: String,
    #[serde(default = "default_tasks")]
    pub tasks: String,
    #[serde(default = "default_connections")]
    pub connections: String,
    #[serde(default = "default_pattern_cap")]
    pub pattern_cap: usize,
    #[serde(default = "default_task_cap")]
    pub task_cap: usize,
    #[serde(default = "default_connection_cap")]
    pub connection_cap: usize,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            evidence: default_evidence(),
            patterns: default_patterns(),
            tasks: default_tasks(),
            connections: default_connections(),
            pattern_cap: default_pattern_cap(),
            task_cap: default_task_cap(),
            connection_cap: default_connection_cap(),
        }
    }
}

fn default_evidence() -> String {
    "blocks".to_string()
}
fn default_patterns() -> String {
    "patterns".to_string()
}
fn default_tasks() -> String {
    "tasks".to_string()
}
fn default_connections() -> String {
    "connections".to_string()
}
fn default_pattern_cap() -> usize {
    3
}
fn default_task_cap() -> usize {
    3
}
fn default_connection_cap() -> usize {
    2
}

impl CollectionsConfig {
    pub fn roles(&self) -> CollectionRoles {
        CollectionRoles {
            evidence: self.evidence.clone(),
            patterns: self.patterns.clone(),
            tasks: self.tasks.clone(),
            connections: self.connections.clone(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            evidence_variants: self.evidence_variants,
            max_block_variants: self.max_block_variants,
            dedup_prefix: self.dedup_prefix,
            feedback_influence: self.feedback_influence,
            collections: self.collections.roles(),
            pattern_cap: self.collections.pattern_cap,
            task_cap: self.collections.task_cap,
            connection_cap: self.collections.connection_cap,
        }
    }

    pub fn assembly_params(&self) -> AssemblyParams {
        AssemblyParams {
            pattern_threshold: self.pattern_threshold,
            max_patterns: self.max_patterns,
            example_threshold: self.example_threshold,
            max_examples: self.max_examples,
            collections: self.collections.roles(),
            ..AssemblyParams::default()
        }
    }
}

/// Embedding provider configuration.
///
/// | Provider | Requires |
/// |----------|----------|
/// | `disabled` | nothing; every retrieval returns empty collections |
/// | `hashing` | nothing; deterministic offline vectors (`dims` defaults to 256) |
/// | `openai` | `model`, `dims`, `OPENAI_API_KEY` |
/// | `ollama` | `model`, `dims`; `url` defaults to `http://localhost:11434` |
/// | `local` | build with `--features local-embeddings` |
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Per-query timeout.
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_store_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct VocabularyConfig {
    /// TOML file replacing the built-in keyword tables.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.json".to_string(),
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
    ]
}

impl Config {
    /// Defaults for everything but the database path.
    pub fn with_db(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            vocabulary: VocabularyConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let chunking = &config.chunking;
    if chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if chunking.chunk_overlap >= chunking.chunk_size {
        bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }
    if chunking.structured_max == 0 {
        bail!("chunking.structured_max must be > 0");
    }

    let retrieval = &config.retrieval;
    if retrieval.k_per_stage == 0 {
        bail!("retrieval.k_per_stage must be >= 1");
    }
    if retrieval.evidence_variants == 0 {
        bail!("retrieval.evidence_variants must be >= 1");
    }
    if retrieval.dedup_prefix == 0 {
        bail!("retrieval.dedup_prefix must be > 0");
    }
    for (name, value) in [
        ("feedback_influence", retrieval.feedback_influence),
        ("pattern_threshold", retrieval.pattern_threshold),
        ("example_threshold", retrieval.example_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }
    let roles = retrieval.collections.roles();
    let names: HashSet<&str> = roles.all().into_iter().collect();
    if names.len() != 4 || names.contains("") {
        bail!("retrieval.collections names must be non-empty and distinct");
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "hashing" | "local" => {}
        "openai" | "ollama" => {
            if embedding.dims.is_none() || embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    embedding.provider
                );
            }
            if embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, ollama, or local.",
            other
        ),
    }
    if embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }

    match config.vector_store.backend.as_str() {
        "sqlite" | "memory" | "disabled" => {}
        other => bail!(
            "Unknown vector_store backend: '{}'. Must be sqlite, memory, or disabled.",
            other
        ),
    }
    if config.vector_store.timeout_secs == 0 {
        bail!("vector_store.timeout_secs must be > 0");
    }
    Ok(())
}

/// The configured vocabulary, or the built-in one.
pub fn load_vocabulary(config: &Config) -> Result<Vocabulary> {
    let vocab = match &config.vocabulary.path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read vocabulary file: {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("Failed to parse vocabulary file: {}", path.display()))?
        }
        None => Vocabulary::default(),
    };
    vocab.validate()?;
    Ok(vocab)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse("[db]\npath = \"x.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.retrieval.k_per_stage, 5);
        assert_eq!(config.retrieval.collections.connection_cap, 2);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.vector_store.backend, "sqlite");
    }

    #[test]
    fn test_rejects_overlap_not_below_size() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        assert!(parse("[db]\npath = \"x\"\n[chunking]\nchunk_size = 0\nchunk_overlap = 0\n").is_err());
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8\n").is_ok());
    }

    #[test]
    fn test_rejects_unknown_backend_and_provider() {
        assert!(parse("[db]\npath = \"x\"\n[vector_store]\nbackend = \"chroma\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_rejects_duplicate_collections() {
        let toml_str = "[db]\npath = \"x\"\n[retrieval.collections]\nevidence = \"same\"\npatterns = \"same\"\n";
        assert!(parse(toml_str).is_err());
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("embedding.timeout_secs"));
        let err = parse("[db]\npath = \"x\"\n[vector_store]\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("vector_store.timeout_secs"));
    }

    #[test]
    fn test_influence_range() {
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\nfeedback_influence = 1.5\n").is_err());
    }

    #[test]
    fn test_params_mapping() {
        let config = parse("[db]\npath = \"x\"\n[retrieval]\npattern_threshold = 0.8\n[retrieval.collections]\nevidence = \"docs\"\n").unwrap();
        assert_eq!(config.retrieval.params().collections.evidence, "docs");
        assert_eq!(config.retrieval.assembly_params().pattern_threshold, 0.8);
        assert_eq!(config.retrieval.assembly_params().collections.evidence, "docs");
    }

    #[test]
    fn test_default_vocabulary_loads() {
        let config = Config::with_db("x.sqlite");
        assert!(!load_vocabulary(&config).unwrap().intents.is_empty());
    }
}
