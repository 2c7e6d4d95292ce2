//! Dictionary construction from raw (source, target) pairs.
//!
//! Cleans every pair, collapses duplicate sources to their canonical target,
//! routes each winner to the split or whole pool, explodes split winners into
//! aligned lines and embeds the normalized keys.
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use super::canonical::select_canonical;
use super::{Dictionary, DictionaryId, Entry, Pool, PoolKind, TextPair};
use crate::embedder::{Embedder, encode};
use crate::error::Result;
use crate::normalize::{clean, non_empty_lines};
use crate::progress::Job;

/// Counts reported after a build.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    /// Input rows examined.
    pub processed: usize,
    /// Rows with an empty source.
    pub skipped: usize,
    /// Distinct sources dropped for lack of a target or of embeddable text.
    pub dropped: usize,
    pub split_entries: usize,
    pub whole_entries: usize,
}

/// Builds dictionaries with one embedder.
pub struct DictionaryBuilder<'a> {
    embedder: &'a dyn Embedder,
    batch_size: usize,
}

impl<'a> DictionaryBuilder<'a> {
    pub fn new(embedder: &'a dyn Embedder, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Build a dictionary named `id` from `pairs`.
    pub fn build(
        &self,
        id: DictionaryId,
        pairs: &[TextPair],
        job: Job<'_>,
    ) -> Result<(Dictionary, BuildSummary)> {
        let mut summary = BuildSummary::default();
        let cleaned = clean_pairs(pairs, &mut summary);
        let (split_pairs, whole_pairs) = route_canonical(&cleaned, &mut summary);

        // exploded lines of different sources can repeat, so collapse again
        let split_entries = canonical_entries(&split_pairs, &mut summary);
        let whole_entries = canonical_entries(&whole_pairs, &mut summary);
        summary.split_entries = split_entries.len();
        summary.whole_entries = whole_entries.len();

        info!(
            "Building {id}: {} split and {} whole entries from {} rows",
            split_entries.len(),
            whole_entries.len(),
            summary.processed
        );

        let keys: Vec<&str> = split_entries
            .iter()
            .chain(&whole_entries)
            .map(Entry::key)
            .collect();
        let mut vectors = encode(self.embedder, &keys, self.batch_size, job)?;
        let whole_vectors = vectors.split_off(split_entries.len());

        let dims = self.embedder.dimensions();
        let split = Pool::new(PoolKind::Split, dims, split_entries, vectors)?;
        let whole = Pool::new(PoolKind::Whole, dims, whole_entries, whole_vectors)?;
        let dictionary = Dictionary::new(id, Utc::now(), self.embedder.name(), split, whole)?;

        Ok((dictionary, summary))
    }
}

/// Clean every pair, skipping rows whose source is empty after cleaning.
fn clean_pairs(pairs: &[TextPair], summary: &mut BuildSummary) -> Vec<TextPair> {
    let mut cleaned = Vec::with_capacity(pairs.len());
    for (row, pair) in pairs.iter().enumerate() {
        summary.processed += 1;
        let source = clean(&pair.source);
        if source.is_empty() {
            debug!("Row {row}: empty source, skipped");
            summary.skipped += 1;
            continue;
        }
        cleaned.push(TextPair {
            source,
            target: clean(&pair.target),
        });
    }
    cleaned
}

/// Pick the canonical target of every source across both pools, then route
/// the winner to the split (exploded per line) or whole pool.
fn route_canonical(
    pairs: &[TextPair],
    summary: &mut BuildSummary,
) -> (Vec<TextPair>, Vec<TextPair>) {
    let mut split = Vec::new();
    let mut whole = Vec::new();

    for canonical in select_canonical(pairs) {
        let Some(target) = canonical.target else {
            debug!("No usable target for {:?}", canonical.source);
            summary.dropped += 1;
            continue;
        };
        match PoolKind::classify(&canonical.source, &target) {
            PoolKind::Split => {
                for (s, t) in non_empty_lines(&canonical.source).zip(non_empty_lines(&target)) {
                    split.push(TextPair::new(s, t));
                }
            }
            PoolKind::Whole => whole.push(TextPair::new(canonical.source, target)),
        }
    }

    (split, whole)
}

fn canonical_entries(pairs: &[TextPair], summary: &mut BuildSummary) -> Vec<Entry> {
    let mut entries = Vec::new();
    for canonical in select_canonical(pairs) {
        let Some(target) = canonical.target else {
            debug!("No usable target for {:?}", canonical.source);
            summary.dropped += 1;
            continue;
        };
        let entry = Entry::new(canonical.source, target);
        if entry.key().is_empty() {
            debug!("Source {:?} is only codes, dropped", entry.source);
            summary.dropped += 1;
            continue;
        }
        entries.push(entry);
    }
    entries
}
