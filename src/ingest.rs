//! Directory ingestion: files → chunks → embeddings → vector collections.
//!
//! Walks a directory with the configured include/exclude globs. JSON files
//! are read as catalogs (or as a single exported workflow when they carry a
//! top-level `nodes` array); everything else is chunked as free text into
//! the tasks collection. Chunk ids are content-derived, so re-ingesting the
//! same directory rewrites the same rows.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use flowrag_core::catalog::{text_chunks, Catalog, RoutedChunk, TemplateEntry};
use flowrag_core::chunk::Chunker;
use flowrag_core::embedding::EmbeddingProvider;
use flowrag_core::store::{VectorRecord, VectorStore};

use crate::config::Config;
use crate::embedding::embed_texts;

/// Counts reported after an ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub files: usize,
    pub skipped_files: usize,
    /// Chunks per collection.
    pub chunks: BTreeMap<String, usize>,
    pub oversized: usize,
    pub upserted: usize,
}

impl IngestReport {
    pub fn total_chunks(&self) -> usize {
        self.chunks.values().sum()
    }
}

/// Files under `root` matching the ingest globs, sorted by path.
pub fn scan(config: &Config, root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("Ingest root is not a directory: {}", root.display());
    }

    let include_set = build_globset(&config.ingest.include_globs)?;
    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.ingest.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.ingest.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if include_set.is_match(rel) && !exclude_set.is_match(rel) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Chunk one file into routed chunks.
pub fn chunk_file(config: &Config, chunker: &Chunker, root: &Path, path: &Path) -> Result<Vec<RoutedChunk>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let roles = config.retrieval.collections.roles();
    let source = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");

    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    if is_json {
        let catalog = parse_json_file(&raw, path)?;
        return Ok(catalog.chunks(chunker, &roles, config.chunking.structured_max));
    }

    Ok(text_chunks(&source, &raw, chunker)
        .into_iter()
        .map(|chunk| RoutedChunk {
            collection: roles.tasks.clone(),
            chunk,
        })
        .collect())
}

fn parse_json_file(raw: &str, path: &Path) -> Result<Catalog> {
    let value: Value = serde_json::from_str(raw)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;

    if value.get("nodes").map(Value::is_array).unwrap_or(false) {
        let mut value = value;
        if let Some(obj) = value.as_object_mut() {
            if !obj.contains_key("id") {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                obj.insert("id".to_string(), Value::from(stem));
            }
        }
        let template: TemplateEntry = serde_json::from_value(value)
            .with_context(|| format!("Invalid workflow in {}", path.display()))?;
        return Ok(Catalog {
            templates: vec![template],
            ..Catalog::default()
        });
    }

    Catalog::from_json(raw).with_context(|| format!("Invalid catalog in {}", path.display()))
}

/// Chunk, embed and upsert every matching file under `root`.
///
/// Unreadable or malformed files are skipped with a warning. With
/// `dry_run` nothing is embedded or written.
pub async fn ingest_dir(
    config: &Config,
    root: &Path,
    embedder: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    dry_run: bool,
) -> Result<IngestReport> {
    let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
    let files = scan(config, root)?;

    let mut report = IngestReport {
        files: files.len(),
        ..IngestReport::default()
    };
    let mut by_collection: BTreeMap<String, Vec<flowrag_core::models::Chunk>> = BTreeMap::new();

    for path in &files {
        match chunk_file(config, &chunker, root, path) {
            Ok(routed) => {
                for r in routed {
                    by_collection.entry(r.collection).or_default().push(r.chunk);
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping file");
                report.skipped_files += 1;
            }
        }
    }

    for (collection, chunks) in &by_collection {
        report.chunks.insert(collection.clone(), chunks.len());
        report.oversized += chunker.validate(chunks).oversized.len();
    }

    if dry_run {
        return Ok(report);
    }

    let batch_size = config.embedding.batch_size.max(1);
    for (collection, chunks) in &by_collection {
        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.embedding_text.clone()).collect();
            let vectors = embed_texts(embedder, &texts)
                .await
                .with_context(|| format!("Embedding failed for collection '{}'", collection))?;
            let records: Vec<VectorRecord> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| VectorRecord {
                    id: chunk.id.clone(),
                    vector,
                    metadata: chunk.metadata.clone(),
                    document: chunk.text.clone(),
                })
                .collect();
            report.upserted += store
                .upsert(collection, &records)
                .await
                .with_context(|| format!("Upsert failed for collection '{}'", collection))?;
        }
        tracing::info!(collection = collection.as_str(), chunks = chunks.len(), "collection ingested");
    }

    Ok(report)
}

pub fn print_report(root: &Path, report: &IngestReport, dry_run: bool) {
    println!("ingest {}{}", root.display(), if dry_run { " (dry-run)" } else { "" });
    println!("  files: {}", report.files);
    if report.skipped_files > 0 {
        println!("  skipped: {}", report.skipped_files);
    }
    for (collection, count) in &report.chunks {
        println!("  {:<16} {} chunks", collection, count);
    }
    if report.oversized > 0 {
        println!("  oversized chunks: {}", report.oversized);
    }
    if !dry_run {
        println!("  upserted: {}", report.upserted);
    }
    println!("ok");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config() -> Config {
        Config::with_db("unused.sqlite")
    }

    #[test]
    fn test_scan_applies_globs() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.json"), "{}").unwrap();
        fs::write(tmp.path().join("b.md"), "# hi").unwrap();
        fs::write(tmp.path().join("c.bin"), "x").unwrap();
        fs::create_dir_all(tmp.path().join("node_modules")).unwrap();
        fs::write(tmp.path().join("node_modules/d.json"), "{}").unwrap();

        let files = scan(&config(), tmp.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.md"]);
    }

    #[test]
    fn test_exported_workflow_becomes_template() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("slack_alert.json");
        fs::write(
            &path,
            r#"{"name": "Slack alert", "nodes": [{"type": "n8n-nodes-base.slack"}], "connections": {}}"#,
        )
        .unwrap();
        let chunker = Chunker::new(800, 100).unwrap();
        let routed = chunk_file(&config(), &chunker, tmp.path(), &path).unwrap();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].collection, "patterns");
        assert_eq!(
            routed[0].chunk.metadata.get("pattern_id").and_then(|v| v.as_str()),
            Some("template_slack_alert")
        );
    }

    #[test]
    fn test_text_goes_to_tasks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.md");
        fs::write(&path, "Post a Slack message when an order ships.").unwrap();
        let chunker = Chunker::new(800, 100).unwrap();
        let routed = chunk_file(&config(), &chunker, tmp.path(), &path).unwrap();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].collection, "tasks");
    }

    #[test]
    fn test_scan_rejects_missing_root() {
        assert!(scan(&config(), Path::new("/definitely/not/here")).is_err());
    }
}
