//! Separator-aware text chunker with overlap.
//!
//! Splits arbitrary text into size-bounded segments suitable for embedding.
//! Sizes are measured in characters, not bytes.
//!
//! # Algorithm
//!
//! 1. If the text fits in `chunk_size`, return it unchanged as one chunk.
//! 2. Cut the text into *atoms* no longer than `chunk_size - chunk_overlap`,
//!    trying separators in priority order (paragraph, line, sentence,
//!    clause, word, character). A piece only descends to the next separator
//!    when it is still too large. Separators stay attached to the end of the
//!    piece they terminate, so atoms tile the input exactly.
//! 3. Greedily merge consecutive atoms into chunks of at most `chunk_size`
//!    characters. Every chunk after the first starts with the trailing
//!    `chunk_overlap` characters of its predecessor.
//!
//! Because atoms are bounded by `chunk_size - chunk_overlap`, at least one
//! atom always fits after the overlap prefix and every chunk stays within
//! `chunk_size`.
//!
//! # Example
//!
//! ```rust
//! use flowrag_core::chunk::Chunker;
//!
//! let chunker = Chunker::new(800, 100).unwrap();
//! let chunks = chunker.split("Hello world.\n\nSecond paragraph.");
//! assert_eq!(chunks.len(), 1);
//! ```

use std::ops::Range;

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::{Chunk, ChunkType, Metadata, META_CHUNK_TYPE};

/// Separators in descending priority. The empty separator is the
/// character-level fallback.
pub const DEFAULT_SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", ", ", " ", ""];

/// Tolerance factor applied by [`Chunker::validate`].
pub const OVERSIZE_TOLERANCE: f64 = 1.2;

/// Splits text and structured values into overlapping, size-bounded chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

/// Size statistics reported by [`Chunker::validate`].
#[derive(Debug, Clone, Serialize)]
pub struct ChunkValidation {
    pub total_chunks: usize,
    pub avg_size: f64,
    pub min_size: usize,
    pub max_size: usize,
    /// Fraction of chunks within `1.2 × chunk_size`, in `[0.0, 1.0]`.
    pub compliance: f64,
    /// Ids of chunks exceeding the tolerance.
    pub oversized: Vec<String>,
}

impl ChunkValidation {
    pub fn is_clean(&self) -> bool {
        self.oversized.is_empty()
    }
}

impl Chunker {
    /// Create a chunker with the default separator list.
    ///
    /// # Errors
    ///
    /// Fails when `chunk_size` is zero or `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::with_separators(
            chunk_size,
            chunk_overlap,
            DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Create a chunker with a custom separator priority list.
    ///
    /// A character-level fallback is appended when the list does not end
    /// with the empty separator.
    pub fn with_separators(
        chunk_size: usize,
        chunk_overlap: usize,
        mut separators: Vec<String>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        if separators.last().map(|s| !s.is_empty()).unwrap_or(true) {
            separators.push(String::new());
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split text into overlapping chunks of at most `chunk_size` characters.
    ///
    /// - Empty input yields no chunks.
    /// - Input of at most `chunk_size` characters is returned unchanged.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let seps: Vec<&str> = self.separators.iter().map(|s| s.as_str()).collect();
        let atom_limit = self.chunk_size - self.chunk_overlap;
        let mut atoms = Vec::new();
        atomize(text, 0, &seps, atom_limit, &mut atoms);

        self.merge(text, &atoms)
    }

    fn merge(&self, text: &str, atoms: &[Range<usize>]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut prev: Option<Range<usize>> = None;
        let mut i = 0;

        while i < atoms.len() {
            let start = match &prev {
                None => atoms[i].start,
                Some(p) => tail_start(text, p.clone(), self.chunk_overlap),
            };
            let mut end = atoms[i].end;
            i += 1;
            while i < atoms.len() && char_len(&text[start..atoms[i].end]) <= self.chunk_size {
                end = atoms[i].end;
                i += 1;
            }
            chunks.push(text[start..end].to_string());
            prev = Some(start..end);
        }

        chunks
    }

    /// Split a structured value by top-level key when its pretty-printed
    /// JSON exceeds `max_size` characters.
    ///
    /// Objects with more than one key are partitioned into one
    /// `{key: value}` document per key; any single entry still above
    /// `max_size` falls back to [`split`](Chunker::split). Arrays and
    /// single-key objects are text-split directly.
    pub fn split_structured(&self, value: &Value, max_size: usize) -> Vec<String> {
        let rendered = pretty(value);
        if char_len(&rendered) <= max_size {
            return vec![rendered];
        }

        match value.as_object() {
            Some(map) if map.len() > 1 => {
                let mut out = Vec::new();
                for (key, v) in map {
                    let mut single = serde_json::Map::new();
                    single.insert(key.clone(), v.clone());
                    let piece = pretty(&Value::Object(single));
                    if char_len(&piece) > max_size {
                        out.extend(self.split(&piece));
                    } else {
                        out.push(piece);
                    }
                }
                out
            }
            _ => self.split(&rendered),
        }
    }

    /// Split `content` and wrap each piece as a typed [`Chunk`].
    ///
    /// Each chunk carries `chunk_index`, `total_chunks`, `chunk_size` and
    /// `is_partial` on top of the caller's metadata.
    pub fn make_chunks(
        &self,
        chunk_type: ChunkType,
        base_id: &str,
        content: &str,
        metadata: &Metadata,
    ) -> Vec<Chunk> {
        let pieces = self.split(content);
        let total = pieces.len();
        pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                let mut meta = metadata.clone();
                meta.insert("chunk_index".into(), Value::from(i));
                meta.insert("total_chunks".into(), Value::from(total));
                meta.insert("chunk_size".into(), Value::from(char_len(&piece)));
                meta.insert("is_partial".into(), Value::from(total > 1));
                make_chunk(chunk_type, base_id, &piece, &piece, meta)
            })
            .collect()
    }

    /// Report how many chunks stay within `1.2 × chunk_size`.
    ///
    /// Advisory only: atomic fragments such as a single large example may
    /// legitimately exceed the bound.
    pub fn validate(&self, chunks: &[Chunk]) -> ChunkValidation {
        if chunks.is_empty() {
            return ChunkValidation {
                total_chunks: 0,
                avg_size: 0.0,
                min_size: 0,
                max_size: 0,
                compliance: 1.0,
                oversized: Vec::new(),
            };
        }

        let limit = self.chunk_size as f64 * OVERSIZE_TOLERANCE;
        let sizes: Vec<usize> = chunks.iter().map(|c| char_len(&c.text)).collect();
        let oversized: Vec<String> = chunks
            .iter()
            .zip(&sizes)
            .filter(|(_, &s)| s as f64 > limit)
            .map(|(c, _)| c.id.clone())
            .collect();

        if !oversized.is_empty() {
            tracing::warn!(
                oversized = oversized.len(),
                total = chunks.len(),
                limit,
                "chunks exceed size tolerance"
            );
        }

        let total = chunks.len();
        ChunkValidation {
            total_chunks: total,
            avg_size: sizes.iter().sum::<usize>() as f64 / total as f64,
            min_size: sizes.iter().copied().min().unwrap_or(0),
            max_size: sizes.iter().copied().max().unwrap_or(0),
            compliance: (total - oversized.len()) as f64 / total as f64,
            oversized,
        }
    }
}

/// Deterministic chunk id: `"{prefix}_{sha256(base_id, content)[..16]}"`.
///
/// Re-ingesting identical content yields identical ids, so vector upserts
/// are idempotent.
pub fn chunk_id(prefix: &str, base_id: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    format!("{}_{}", prefix, &hash[..16])
}

/// Build a single [`Chunk`] with a content-derived id.
pub fn make_chunk(
    chunk_type: ChunkType,
    base_id: &str,
    text: &str,
    embedding_text: &str,
    mut metadata: Metadata,
) -> Chunk {
    metadata.insert(META_CHUNK_TYPE.into(), Value::from(chunk_type.as_str()));
    Chunk {
        id: chunk_id(chunk_type.prefix(), base_id, text),
        chunk_type,
        text: text.to_string(),
        embedding_text: embedding_text.to_string(),
        metadata,
    }
}

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Byte offset where the last `overlap` characters of `prev` begin.
fn tail_start(text: &str, prev: Range<usize>, overlap: usize) -> usize {
    if overlap == 0 {
        return prev.end;
    }
    text[prev.clone()]
        .char_indices()
        .rev()
        .nth(overlap - 1)
        .map(|(idx, _)| prev.start + idx)
        .unwrap_or(prev.start)
}

/// Cut `text` into contiguous byte ranges of at most `limit` characters.
fn atomize(text: &str, offset: usize, seps: &[&str], limit: usize, out: &mut Vec<Range<usize>>) {
    if text.is_empty() {
        return;
    }
    if char_len(text) <= limit {
        out.push(offset..offset + text.len());
        return;
    }

    let level = seps
        .iter()
        .position(|s| s.is_empty() || text.contains(s))
        .unwrap_or(seps.len().saturating_sub(1));
    let sep = seps.get(level).copied().unwrap_or("");

    if sep.is_empty() {
        let mut start = 0;
        let mut count = 0;
        for (idx, _) in text.char_indices() {
            if count == limit {
                out.push(offset + start..offset + idx);
                start = idx;
                count = 0;
            }
            count += 1;
        }
        out.push(offset + start..offset + text.len());
        return;
    }

    let finer = &seps[level + 1..];
    let mut start = 0;
    for (idx, matched) in text.match_indices(sep) {
        let end = idx + matched.len();
        place_piece(text, offset, start..end, finer, limit, out);
        start = end;
    }
    if start < text.len() {
        place_piece(text, offset, start..text.len(), finer, limit, out);
    }
}

fn place_piece(
    text: &str,
    offset: usize,
    piece: Range<usize>,
    finer: &[&str],
    limit: usize,
    out: &mut Vec<Range<usize>>,
) {
    let slice = &text[piece.clone()];
    if char_len(slice) <= limit {
        out.push(offset + piece.start..offset + piece.end);
    } else {
        atomize(slice, offset + piece.start, finer, limit, out);
    }
}
