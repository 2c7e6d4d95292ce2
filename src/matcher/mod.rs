//! Query resolution against an indexed dictionary.
//!
//! The [`Matcher`] never embeds anything itself: callers turn a
//! [`QueryPlan`] into keys, embed them (in bulk for file jobs) and hand the
//! vectors back. A plan is then resolved against the whole pool as one unit
//! or against the split pool line by line, whichever the query's shape
//! favors first.
pub mod cluster;
pub mod index;

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::dictionary::{Dictionary, Pool, PoolKind};
use crate::error::{EngineError, Result, Threshold};
use crate::normalize::{NormalizedText, clean, extract_codes, restore_codes, transfer_codes};
use index::{Neighbor, SimilarityIndex};

/// A dictionary together with one similarity index per pool.
#[derive(Debug)]
pub struct IndexedDictionary {
    dictionary: Dictionary,
    split: SimilarityIndex,
    whole: SimilarityIndex,
}

impl IndexedDictionary {
    pub fn new(dictionary: Dictionary) -> Result<Self> {
        let split = SimilarityIndex::build(dictionary.pool(PoolKind::Split))?;
        let whole = SimilarityIndex::build(dictionary.pool(PoolKind::Whole))?;
        Ok(Self {
            dictionary,
            split,
            whole,
        })
    }

    #[must_use]
    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    #[must_use]
    pub fn index(&self, kind: PoolKind) -> &SimilarityIndex {
        match kind {
            PoolKind::Split => &self.split,
            PoolKind::Whole => &self.whole,
        }
    }

    /// The pool and its index, refusing to pair an index with a pool it
    /// was not built from.
    pub fn pool_and_index(&self, kind: PoolKind) -> Result<(&Pool, &SimilarityIndex)> {
        let pool = self.dictionary.pool(kind);
        let index = self.index(kind);
        ensure_current(pool, index)?;
        Ok((pool, index))
    }
}

pub(crate) fn ensure_current(pool: &Pool, index: &SimilarityIndex) -> Result<()> {
    if pool.generation() != index.generation() {
        return Err(EngineError::StaleIndex {
            index: index.generation(),
            pool: pool.generation(),
        });
    }
    Ok(())
}

/// A resolved translation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Translation {
    pub text: String,
    /// Similarity of the match; the weakest line for line-wise matches.
    pub score: f32,
    pub pool: PoolKind,
    /// Pool rows that contributed, in output order.
    pub entries: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(Translation),
    /// Nothing reached the threshold. `best_score` is the closest candidate
    /// seen, if any.
    NoMatch { best_score: Option<f32> },
}

impl MatchOutcome {
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched(_))
    }

    #[must_use]
    pub fn translation(&self) -> Option<&Translation> {
        match self {
            MatchOutcome::Matched(t) => Some(t),
            MatchOutcome::NoMatch { .. } => None,
        }
    }
}

/// One dictionary search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub pool: PoolKind,
    pub index: usize,
    pub source: String,
    pub target: String,
    pub score: f32,
}

/// A cleaned query split into the pieces the matcher may look up.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    full: NormalizedText,
    /// One slot per line of the cleaned query; `None` for blank lines.
    lines: Vec<Option<NormalizedText>>,
}

impl QueryPlan {
    /// Plan a query. Returns `None` for text that is empty after cleaning.
    #[must_use]
    pub fn new(text: &str) -> Option<Self> {
        let cleaned = clean(text);
        if cleaned.is_empty() {
            return None;
        }
        let lines = cleaned
            .split('\n')
            .map(|line| {
                let line = line.trim();
                (!line.is_empty()).then(|| extract_codes(line))
            })
            .collect();
        Some(Self {
            full: extract_codes(&cleaned),
            lines,
        })
    }

    fn text_lines(&self) -> usize {
        self.lines.iter().flatten().count()
    }

    /// Embedding keys this plan may need, deduplicated, empty keys omitted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        let candidates =
            std::iter::once(self.full.key()).chain(self.lines.iter().flatten().map(|l| l.key()));
        for key in candidates {
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Pool order to try: whole-first for multi-line queries.
    fn strategy(&self) -> [PoolKind; 2] {
        if self.text_lines() > 1 {
            [PoolKind::Whole, PoolKind::Split]
        } else {
            [PoolKind::Split, PoolKind::Whole]
        }
    }
}

enum Attempt {
    Hit(Translation),
    Miss(Option<f32>),
}

/// Resolves plans against one indexed dictionary at a fixed threshold.
pub struct Matcher<'a> {
    dict: &'a IndexedDictionary,
    threshold: Threshold,
}

impl<'a> Matcher<'a> {
    pub fn new(dict: &'a IndexedDictionary, threshold: Threshold) -> Self {
        Self { dict, threshold }
    }

    /// Resolve `plan` using precomputed key embeddings.
    pub fn resolve(
        &self,
        plan: &QueryPlan,
        vectors: &HashMap<String, Vec<f32>>,
    ) -> Result<MatchOutcome> {
        let mut best: Option<f32> = None;
        for kind in plan.strategy() {
            let attempt = match kind {
                PoolKind::Whole => self.match_whole(plan, vectors)?,
                PoolKind::Split => self.match_lines(plan, vectors)?,
            };
            match attempt {
                Attempt::Hit(translation) => return Ok(MatchOutcome::Matched(translation)),
                Attempt::Miss(score) => best = max_score(best, score),
            }
        }
        Ok(MatchOutcome::NoMatch { best_score: best })
    }

    fn top1(
        &self,
        kind: PoolKind,
        key: &str,
        vectors: &HashMap<String, Vec<f32>>,
    ) -> Result<Option<Neighbor>> {
        let (pool, index) = self.dict.pool_and_index(kind)?;
        if pool.is_empty() {
            return Ok(None);
        }
        let vector = vectors
            .get(key)
            .ok_or_else(|| EngineError::InvalidInput(format!("no embedding for key {key:?}")))?;
        Ok(index.query(vector, 1)?.into_iter().next())
    }

    fn match_whole(
        &self,
        plan: &QueryPlan,
        vectors: &HashMap<String, Vec<f32>>,
    ) -> Result<Attempt> {
        let key = plan.full.key();
        if key.is_empty() {
            return Ok(Attempt::Miss(None));
        }
        let Some(hit) = self.top1(PoolKind::Whole, &key, vectors)? else {
            return Ok(Attempt::Miss(None));
        };
        if !self.threshold.accepts(hit.score) {
            return Ok(Attempt::Miss(Some(hit.score)));
        }

        let entry = self.dict.dictionary().pool(PoolKind::Whole).entry(hit.index);
        let text = transfer_codes(
            &plan.full,
            &extract_codes(&entry.source),
            &extract_codes(&entry.target),
        );
        Ok(Attempt::Hit(Translation {
            text,
            score: hit.score,
            pool: PoolKind::Whole,
            entries: vec![hit.index],
        }))
    }

    /// Match every non-blank line against the split pool. All lines must
    /// pass; code-only lines are copied through.
    fn match_lines(
        &self,
        plan: &QueryPlan,
        vectors: &HashMap<String, Vec<f32>>,
    ) -> Result<Attempt> {
        let pool = self.dict.dictionary().pool(PoolKind::Split);
        let mut out: Vec<String> = Vec::with_capacity(plan.lines.len());
        let mut entries = Vec::new();
        let mut score: Option<f32> = None;

        for line in &plan.lines {
            let Some(line) = line else {
                out.push(String::new());
                continue;
            };
            let key = line.key();
            if key.is_empty() {
                out.push(restore_codes(line));
                continue;
            }
            let Some(hit) = self.top1(PoolKind::Split, &key, vectors)? else {
                return Ok(Attempt::Miss(None));
            };
            score = Some(score.map_or(hit.score, |s| s.min(hit.score)));
            if !self.threshold.accepts(hit.score) {
                debug!("Line {key:?} best score {:.3} below threshold", hit.score);
                return Ok(Attempt::Miss(score));
            }
            let entry = pool.entry(hit.index);
            out.push(transfer_codes(
                line,
                &extract_codes(&entry.source),
                &extract_codes(&entry.target),
            ));
            entries.push(hit.index);
        }

        match score {
            // every line was blank or code-only
            None => Ok(Attempt::Miss(None)),
            Some(score) => Ok(Attempt::Hit(Translation {
                text: out.join("\n"),
                score,
                pool: PoolKind::Split,
                entries,
            })),
        }
    }

    /// Top `top_k` entries across both pools at or above the threshold.
    pub fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for kind in PoolKind::ALL {
            let (pool, index) = self.dict.pool_and_index(kind)?;
            for n in index.query(vector, top_k)? {
                if !self.threshold.accepts(n.score) {
                    continue;
                }
                let entry = pool.entry(n.index);
                hits.push(SearchHit {
                    pool: kind,
                    index: n.index,
                    source: entry.source.clone(),
                    target: entry.target.clone(),
                    score: n.score,
                });
            }
        }
        // stable sort keeps split before whole on equal scores
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}

fn max_score(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::builder::DictionaryBuilder;
    use crate::dictionary::{DictionaryId, TextPair};
    use crate::embedder::mock::MockEmbedder;
    use crate::embedder::{Embedder, encode};
    use crate::progress::{CancelFlag, Job, NoProgress};

    fn indexed(embedder: &MockEmbedder, pairs: &[TextPair]) -> IndexedDictionary {
        let cancel = CancelFlag::new();
        let (dict, _) = DictionaryBuilder::new(embedder, 8)
            .build(
                DictionaryId::new("TEST").unwrap(),
                pairs,
                Job::new(&NoProgress, &cancel, 10),
            )
            .unwrap();
        IndexedDictionary::new(dict).unwrap()
    }

    fn find(
        embedder: &MockEmbedder,
        dict: &IndexedDictionary,
        text: &str,
        threshold: f32,
    ) -> MatchOutcome {
        let plan = QueryPlan::new(text).unwrap();
        let keys = plan.keys();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let cancel = CancelFlag::new();
        let vectors = encode(embedder, &refs, 8, Job::new(&NoProgress, &cancel, 10)).unwrap();
        let map = keys.into_iter().zip(vectors).collect();
        Matcher::new(dict, Threshold::new(threshold).unwrap())
            .resolve(&plan, &map)
            .unwrap()
    }

    #[test]
    fn test_plan_keys_dedup() {
        let plan = QueryPlan::new("{A} 획득\n\n획득\n{B}").unwrap();
        assert_eq!(plan.keys(), vec!["획득 획득".to_string(), "획득".to_string()]);
        assert_eq!(plan.text_lines(), 3);
        assert!(QueryPlan::new(" \r\n ").is_none());
    }

    #[test]
    fn test_exact_match_with_code_substitution() {
        let embedder = MockEmbedder::new(256);
        let dict = indexed(&embedder, &[TextPair::new("{Item1} 획득", "Obtained {Item1}")]);
        let outcome = find(&embedder, &dict, "{Item2} 획득", 0.85);
        let t = outcome.translation().expect("should match");
        assert_eq!(t.text, "Obtained {Item2}");
        assert!((t.score - 1.0).abs() < 1e-4);
        assert_eq!(t.pool, PoolKind::Split);
    }

    #[test]
    fn test_below_threshold_is_no_match() {
        let embedder = MockEmbedder::new(256);
        let dict = indexed(&embedder, &[TextPair::new("아이템을 획득했습니다", "Item obtained")]);
        let outcome = find(&embedder, &dict, "완전히 다른 문장입니다", 0.85);
        match outcome {
            MatchOutcome::NoMatch { best_score } => assert!(best_score.unwrap() < 0.85),
            other => panic!("expected no match, got {other:?}"),
        }
    }

    #[test]
    fn test_multiline_prefers_whole() {
        let embedder = MockEmbedder::new(256);
        let dict = indexed(
            &embedder,
            &[
                TextPair::new("레벨 업\n축하합니다", "Congratulations on leveling up"),
                TextPair::new("레벨 업", "Level up"),
                TextPair::new("축하합니다", "Congratulations"),
            ],
        );
        let t = find(&embedder, &dict, "레벨 업\n축하합니다", 0.85);
        let t = t.translation().unwrap();
        assert_eq!(t.pool, PoolKind::Whole);
        assert_eq!(t.text, "Congratulations on leveling up");
    }

    #[test]
    fn test_multiline_falls_back_to_lines() {
        let embedder = MockEmbedder::new(256);
        let dict = indexed(
            &embedder,
            &[
                TextPair::new("레벨 업", "Level up"),
                TextPair::new("축하합니다", "Congratulations"),
            ],
        );
        let outcome = find(&embedder, &dict, "레벨 업\n\n{Icon}\n축하합니다", 0.85);
        let t = outcome.translation().unwrap();
        assert_eq!(t.pool, PoolKind::Split);
        assert_eq!(t.text, "Level up\n\n{Icon}\nCongratulations");
        assert_eq!(t.entries.len(), 2);
    }

    #[test]
    fn test_one_weak_line_fails_the_query() {
        let embedder = MockEmbedder::new(256);
        let dict = indexed(&embedder, &[TextPair::new("레벨 업", "Level up")]);
        let outcome = find(&embedder, &dict, "레벨 업\n전혀 관련 없는 문장", 0.85);
        assert!(!outcome.is_match());
    }

    #[test]
    fn test_code_only_query_is_no_match() {
        let embedder = MockEmbedder::new(64);
        let dict = indexed(&embedder, &[TextPair::new("검", "Sword")]);
        let outcome = find(&embedder, &dict, "{Item1}", 0.5);
        assert_eq!(outcome, MatchOutcome::NoMatch { best_score: None });
    }

    #[test]
    fn test_empty_dictionary_never_matches() {
        let embedder = MockEmbedder::new(64);
        let dict = indexed(&embedder, &[]);
        let outcome = find(&embedder, &dict, "검", 0.0);
        assert_eq!(outcome, MatchOutcome::NoMatch { best_score: None });
    }

    #[test]
    fn test_search_filters_and_orders() {
        let embedder = MockEmbedder::new(256);
        let dict = indexed(
            &embedder,
            &[
                TextPair::new("고대 수호자의 대검", "Ancient Guardian's Greatsword"),
                TextPair::new("고대 수호자의 대검이다", "It is the Ancient Guardian's Greatsword"),
                TextPair::new("낚시", "Fishing"),
            ],
        );
        let query = embedder.embed("고대 수호자의 대검").unwrap();
        let matcher = Matcher::new(&dict, Threshold::new(0.5).unwrap());
        let hits = matcher.search(&query, 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].target, "Ancient Guardian's Greatsword");
        assert!(hits[0].score >= hits[1].score);

        let hits = matcher.search(&query, 1).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_stale_index_is_refused() {
        let embedder = MockEmbedder::new(32);
        let dict = indexed(&embedder, &[TextPair::new("검", "Sword")]);
        let pool = dict.dictionary().pool(PoolKind::Split);
        let rebuilt = pool.subset(&[0]);
        let result = ensure_current(&rebuilt, dict.index(PoolKind::Split));
        assert!(matches!(result, Err(EngineError::StaleIndex { .. })));
        assert!(dict.pool_and_index(PoolKind::Split).is_ok());
    }
}
