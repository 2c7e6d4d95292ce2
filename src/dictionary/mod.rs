//! Translation dictionaries: (source, target) knowledge plus embeddings.
//!
//! A [`Dictionary`] owns two disjoint pools. The *split* pool holds
//! line-aligned pairs exploded into one entry per line; the *whole* pool
//! holds every other pair as a single unit. Pools are immutable once built;
//! each carries a generation number so indexes built from it can be checked
//! for staleness.
pub mod builder;
pub mod canonical;
pub mod ingest;
pub mod store;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::normalize::{extract_codes, line_count};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// One unit of translation knowledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPair {
    pub source: String,
    pub target: String,
}

impl TextPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Which partition of a dictionary a pair lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Split,
    Whole,
}

impl PoolKind {
    pub const ALL: [PoolKind; 2] = [PoolKind::Split, PoolKind::Whole];

    /// Equal non-empty line counts make a pair line-aligned.
    #[must_use]
    pub fn classify(source: &str, target: &str) -> PoolKind {
        if line_count(source) == line_count(target) {
            PoolKind::Split
        } else {
            PoolKind::Whole
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::Split => "split",
            PoolKind::Whole => "whole",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pool entry: the canonical pair for one source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub source: String,
    pub target: String,
    key: String,
}

impl Entry {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let key = extract_codes(&source).key();
        Self {
            source,
            target: target.into(),
            key,
        }
    }

    /// Normalized source text, the string that was embedded.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Entries of one partition with their unit vectors, row `i` ↔ entry `i`.
#[derive(Debug, Clone)]
pub struct Pool {
    kind: PoolKind,
    dimensions: usize,
    entries: Arc<[Entry]>,
    vectors: Arc<[f32]>,
    generation: u64,
}

impl Pool {
    pub fn new(
        kind: PoolKind,
        dimensions: usize,
        entries: Vec<Entry>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if entries.len() != vectors.len() {
            return Err(EngineError::InvalidInput(format!(
                "{kind} pool has {} entries but {} vectors",
                entries.len(),
                vectors.len()
            )));
        }
        let mut flat = Vec::with_capacity(vectors.len() * dimensions);
        for (row, v) in vectors.iter().enumerate() {
            if v.len() != dimensions {
                return Err(EngineError::InvalidInput(format!(
                    "{kind} pool row {row} has {} dimensions, expected {dimensions}",
                    v.len()
                )));
            }
            flat.extend_from_slice(v);
        }
        Ok(Self::from_flat(kind, dimensions, entries, flat))
    }

    pub(crate) fn from_flat(
        kind: PoolKind,
        dimensions: usize,
        entries: Vec<Entry>,
        vectors: Vec<f32>,
    ) -> Self {
        debug_assert_eq!(entries.len() * dimensions, vectors.len());
        Self {
            kind,
            dimensions,
            entries: entries.into(),
            vectors: vectors.into(),
            generation: next_generation(),
        }
    }

    #[must_use]
    pub fn empty(kind: PoolKind, dimensions: usize) -> Self {
        Self::from_flat(kind, dimensions, Vec::new(), Vec::new())
    }

    /// A new pool (new generation) holding only the given rows, in order.
    #[must_use]
    pub fn subset(&self, rows: &[usize]) -> Pool {
        let entries = rows.iter().map(|&i| self.entries[i].clone()).collect();
        let mut vectors = Vec::with_capacity(rows.len() * self.dimensions);
        for &i in rows {
            vectors.extend_from_slice(self.vector(i));
        }
        Self::from_flat(self.kind, self.dimensions, entries, vectors)
    }

    #[must_use]
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn entry(&self, i: usize) -> &Entry {
        &self.entries[i]
    }

    #[must_use]
    pub fn vector(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dimensions..(i + 1) * self.dimensions]
    }

    /// Shared handle to the row-major vector matrix.
    #[must_use]
    pub fn vectors(&self) -> Arc<[f32]> {
        Arc::clone(&self.vectors)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Identifier of a persisted dictionary, e.g. `BDO_EN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DictionaryId(String);

impl DictionaryId {
    /// Accepts ASCII letters, digits, `_`, `-` and `.` (not leading).
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(EngineError::InvalidInput(format!(
                "invalid dictionary identifier: {raw:?}"
            )));
        }
        Ok(Self(raw))
    }

    /// Build the conventional `<game>_<language>` identifier.
    pub fn from_parts(game: &str, language: &str) -> Result<Self> {
        Self::new(format!("{}_{}", game.trim(), language.trim().to_uppercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DictionaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A complete dictionary: metadata plus both pools.
#[derive(Debug, Clone)]
pub struct Dictionary {
    id: DictionaryId,
    created_at: DateTime<Utc>,
    model: String,
    split: Pool,
    whole: Pool,
}

impl Dictionary {
    pub fn new(
        id: DictionaryId,
        created_at: DateTime<Utc>,
        model: impl Into<String>,
        split: Pool,
        whole: Pool,
    ) -> Result<Self> {
        if split.kind() != PoolKind::Split || whole.kind() != PoolKind::Whole {
            return Err(EngineError::InvalidInput(
                "pools passed in the wrong order".to_string(),
            ));
        }
        if split.dimensions() != whole.dimensions() {
            return Err(EngineError::InvalidInput(format!(
                "pool dimensions differ: {} vs {}",
                split.dimensions(),
                whole.dimensions()
            )));
        }
        Ok(Self {
            id,
            created_at,
            model: model.into(),
            split,
            whole,
        })
    }

    #[must_use]
    pub fn id(&self) -> &DictionaryId {
        &self.id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.split.dimensions()
    }

    #[must_use]
    pub fn pool(&self, kind: PoolKind) -> &Pool {
        match kind {
            PoolKind::Split => &self.split,
            PoolKind::Whole => &self.whole,
        }
    }

    /// Total entries across both pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.split.len() + self.whole.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
