//! The engine's invocation surface.
//!
//! Every operation validates its threshold before touching any data, works
//! on an [`IndexedDictionary`] obtained from [`Engine::create_dictionary`] or
//! [`Engine::load_dictionary`], and returns a [`Summary`] alongside its
//! results for bulk jobs.
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dictionary::builder::{BuildSummary, DictionaryBuilder};
use crate::dictionary::store::DictionaryStore;
use crate::dictionary::{DictionaryId, PoolKind, TextPair};
use crate::embedder::{Embedder, encode, provider};
use crate::error::{EngineError, Result, Threshold};
use crate::matcher::cluster::{Cluster, build_clusters};
use crate::matcher::index::SimilarityIndex;
use crate::matcher::{IndexedDictionary, MatchOutcome, Matcher, QueryPlan, SearchHit};
use crate::progress::{CancelFlag, Job, NoProgress, Stage};

/// Completion counts of a bulk operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub processed: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub skipped: usize,
}

/// Result of [`Engine::translate_file`].
#[derive(Debug)]
pub struct TranslateReport {
    /// Input rows with the target column filled where a match was found.
    pub rows: Vec<Vec<String>>,
    /// One outcome per data row; `None` for skipped rows.
    pub outcomes: Vec<Option<MatchOutcome>>,
    pub summary: Summary,
}

/// Result of [`Engine::extract_clusters`].
#[derive(Debug)]
pub struct ClusterReport {
    /// Split-pool clusters first, then whole-pool clusters.
    pub clusters: Vec<Cluster>,
    /// `matched` counts entries in multi-member clusters, `unmatched`
    /// singletons, `skipped` entries shorter than `min_length`.
    pub summary: Summary,
}

pub struct Engine {
    config: Config,
    embedder: Arc<dyn Embedder>,
    store: DictionaryStore,
}

impl Engine {
    /// Engine over `embedder`. The configured dimensions must match the
    /// model's.
    pub fn new(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if embedder.dimensions() != config.model.dimensions {
            return Err(EngineError::InvalidInput(format!(
                "model.dimensions is {} but model {} produces {}-dimensional vectors",
                config.model.dimensions,
                embedder.name(),
                embedder.dimensions()
            )));
        }
        let store = DictionaryStore::new(&config.data_dir);
        Ok(Self {
            config,
            embedder,
            store,
        })
    }

    /// Engine backed by the process-wide shared model.
    pub fn open(config: Config) -> Result<Self> {
        let embedder = provider::load(&config.model)?;
        Self::new(config, embedder)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &DictionaryStore {
        &self.store
    }

    #[must_use]
    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    // ── Dictionaries ─────────────────────────────────────────────────

    /// Build, persist and index a dictionary from raw pairs.
    pub fn create_dictionary(
        &self,
        pairs: &[TextPair],
        id: &DictionaryId,
        job: Job<'_>,
    ) -> Result<(IndexedDictionary, BuildSummary)> {
        let builder = DictionaryBuilder::new(self.embedder.as_ref(), self.config.matching.batch_size);
        let (dictionary, summary) = builder.build(id.clone(), pairs, job)?;
        if dictionary.is_empty() {
            warn!("Dictionary {id} has no usable entries");
        }
        let path = self.store.save(&dictionary)?;
        info!(
            "Created {id} at {}: {} rows, {} skipped, {} dropped",
            path.display(),
            summary.processed,
            summary.skipped,
            summary.dropped
        );
        Ok((IndexedDictionary::new(dictionary)?, summary))
    }

    /// Load a stored dictionary and rebuild its indexes.
    pub fn load_dictionary(&self, id: &DictionaryId) -> Result<IndexedDictionary> {
        let dictionary = self.store.load(id)?;
        if dictionary.model() != self.embedder.name()
            || dictionary.dimensions() != self.embedder.dimensions()
        {
            return Err(EngineError::ModelMismatch {
                stored: format!("{} ({}d)", dictionary.model(), dictionary.dimensions()),
                current: format!("{} ({}d)", self.embedder.name(), self.embedder.dimensions()),
            });
        }
        let indexed = IndexedDictionary::new(dictionary)?;
        info!(
            "Loaded {id}: {} split, {} whole entries",
            indexed.dictionary().pool(PoolKind::Split).len(),
            indexed.dictionary().pool(PoolKind::Whole).len()
        );
        Ok(indexed)
    }

    pub fn list_dictionaries(&self) -> Result<Vec<DictionaryId>> {
        self.store.list()
    }

    /// Remove a stored dictionary. Returns whether it existed.
    pub fn delete_dictionary(&self, id: &DictionaryId) -> Result<bool> {
        self.store.delete(id)
    }

    /// Path prefix of a dictionary's artifacts.
    #[must_use]
    pub fn dictionary_path(&self, id: &DictionaryId) -> PathBuf {
        self.store.prefix(id)
    }

    // ── Lookups ──────────────────────────────────────────────────────

    fn embed_keys(&self, keys: &[String], job: Job<'_>) -> Result<HashMap<String, Vec<f32>>> {
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let vectors = encode(
            self.embedder.as_ref(),
            &refs,
            self.config.matching.batch_size,
            job,
        )?;
        Ok(keys.iter().cloned().zip(vectors).collect())
    }

    fn embed_quietly(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let cancel = CancelFlag::new();
        self.embed_keys(keys, Job::new(&NoProgress, &cancel, usize::MAX))
    }

    /// Best translation for one source string.
    pub fn find_translation(
        &self,
        dict: &IndexedDictionary,
        source_text: &str,
        threshold: f32,
    ) -> Result<MatchOutcome> {
        let threshold = Threshold::new(threshold)?;
        let plan = QueryPlan::new(source_text)
            .ok_or_else(|| EngineError::InvalidInput("empty source text".to_string()))?;
        let vectors = self.embed_quietly(&plan.keys())?;
        Matcher::new(dict, threshold).resolve(&plan, &vectors)
    }

    /// Entries of both pools similar to `query`, best first.
    pub fn search(
        &self,
        dict: &IndexedDictionary,
        query: &str,
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let threshold = Threshold::new(threshold)?;
        let Some(plan) = QueryPlan::new(query) else {
            return Err(EngineError::InvalidInput("empty query".to_string()));
        };
        let key = plan.keys().into_iter().next();
        let Some(key) = key else {
            debug!("Query {query:?} has no text besides codes");
            return Ok(Vec::new());
        };
        let vectors = self.embed_quietly(std::slice::from_ref(&key))?;
        let vector = vectors
            .get(&key)
            .ok_or_else(|| EngineError::InvalidInput("query produced no embedding".to_string()))?;
        Matcher::new(dict, threshold).search(vector, top_k)
    }

    // ── Bulk jobs ────────────────────────────────────────────────────

    /// Group near-duplicate entries of both pools.
    ///
    /// Entries whose normalized key is shorter than `min_length` characters
    /// are left out of the graph entirely.
    pub fn extract_clusters(
        &self,
        dict: &IndexedDictionary,
        threshold: f32,
        min_length: usize,
        job: Job<'_>,
    ) -> Result<ClusterReport> {
        let threshold = Threshold::new(threshold)?;
        let k = self.config.matching.cluster_k;
        let mut summary = Summary::default();
        let mut clusters = Vec::new();

        for kind in PoolKind::ALL {
            let (pool, index) = dict.pool_and_index(kind)?;
            let eligible: Vec<usize> = (0..pool.len())
                .filter(|&i| pool.entry(i).key().chars().count() >= min_length)
                .collect();
            summary.processed += pool.len();
            summary.skipped += pool.len() - eligible.len();

            let found = if eligible.len() == pool.len() {
                build_clusters(pool, index, threshold, k, job)?
            } else {
                let subset = pool.subset(&eligible);
                let subset_index = SimilarityIndex::build(&subset)?;
                build_clusters(&subset, &subset_index, threshold, k, job)?
                    .into_iter()
                    .map(|c| Cluster {
                        pool: c.pool,
                        members: c.members.iter().map(|&m| eligible[m]).collect(),
                        representative: eligible[c.representative],
                    })
                    .collect()
            };

            for cluster in &found {
                if cluster.is_singleton() {
                    summary.unmatched += 1;
                } else {
                    summary.matched += cluster.len();
                }
            }
            clusters.extend(found);
        }

        info!(
            "Clustering done: {} clusters, {} grouped, {} singletons, {} skipped",
            clusters.len(),
            summary.matched,
            summary.unmatched,
            summary.skipped
        );
        Ok(ClusterReport { clusters, summary })
    }

    /// Fill the target column of `rows` from the dictionary.
    ///
    /// Columns come from the configuration; a header row, if configured, is
    /// copied through untouched. All distinct keys are embedded up front in
    /// batches, then each row is resolved.
    pub fn translate_file(
        &self,
        dict: &IndexedDictionary,
        rows: &[Vec<String>],
        threshold: f32,
        job: Job<'_>,
    ) -> Result<TranslateReport> {
        let threshold = Threshold::new(threshold)?;
        let columns = self.config.columns;
        let (header, body) = match rows.split_first() {
            Some((first, rest)) if columns.has_header => (Some(first), rest),
            _ => (None, rows),
        };

        let plans: Vec<Option<QueryPlan>> = body
            .iter()
            .map(|row| row.get(columns.source).and_then(|s| QueryPlan::new(s)))
            .collect();

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for plan in plans.iter().flatten() {
            for key in plan.keys() {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        info!("Translating {} rows ({} distinct keys)", body.len(), keys.len());
        let vectors = self.embed_keys(&keys, job)?;

        let matcher = Matcher::new(dict, threshold);
        let reporter = job.reporter(Stage::Translating, body.len());
        let mut summary = Summary::default();
        let mut out_rows = Vec::with_capacity(rows.len());
        let mut outcomes = Vec::with_capacity(body.len());
        out_rows.extend(header.cloned());

        for (n, (row, plan)) in body.iter().zip(&plans).enumerate() {
            job.cancel.check()?;
            summary.processed += 1;
            let mut out = row.clone();

            let outcome = match plan {
                None => {
                    debug!("Row {}: missing source, skipped", n + 1);
                    summary.skipped += 1;
                    None
                }
                Some(plan) => {
                    let outcome = matcher.resolve(plan, &vectors)?;
                    match &outcome {
                        MatchOutcome::Matched(t) => {
                            summary.matched += 1;
                            if out.len() <= columns.target {
                                out.resize(columns.target + 1, String::new());
                            }
                            out[columns.target] = t.text.clone();
                        }
                        MatchOutcome::NoMatch { .. } => summary.unmatched += 1,
                    }
                    Some(outcome)
                }
            };

            out_rows.push(out);
            outcomes.push(outcome);
            reporter.advance(1);
        }
        reporter.finish();

        info!(
            "Translation done: {} processed, {} matched, {} unmatched, {} skipped",
            summary.processed, summary.matched, summary.unmatched, summary.skipped
        );
        Ok(TranslateReport {
            rows: out_rows,
            outcomes,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::progress::tests::RecordingSink;
    use tempfile::{TempDir, tempdir};

    fn engine(dims: usize) -> (Engine, TempDir) {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_string_lossy().into_owned();
        config.model.dimensions = dims;
        config.matching.batch_size = 4;
        (Engine::new(config, Arc::new(MockEmbedder::new(dims))).unwrap(), dir)
    }

    fn create(engine: &Engine, id: &str, pairs: &[(&str, &str)]) -> IndexedDictionary {
        let pairs: Vec<TextPair> = pairs.iter().map(|(s, t)| TextPair::new(*s, *t)).collect();
        let cancel = CancelFlag::new();
        engine
            .create_dictionary(
                &pairs,
                &DictionaryId::new(id).unwrap(),
                Job::new(&NoProgress, &cancel, 10),
            )
            .unwrap()
            .0
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_canonical_translation_wins() {
        let (engine, _dir) = engine(128);
        let dict = create(&engine, "A", &[("안녕", "Hello"), ("안녕", "Hello"), ("안녕", "Hi")]);
        let outcome = engine.find_translation(&dict, "안녕", 0.85).unwrap();
        assert_eq!(outcome.translation().unwrap().text, "Hello");
    }

    #[test]
    fn test_majority_target_wins_across_line_counts() {
        let (engine, _dir) = engine(128);
        let dict = create(
            &engine,
            "LINES",
            &[("안녕", "Hello"), ("안녕", "Hello\nthere"), ("안녕", "Hello\nthere")],
        );
        let outcome = engine.find_translation(&dict, "안녕", 0.85).unwrap();
        assert_eq!(outcome.translation().unwrap().text, "Hello\nthere");
    }

    #[test]
    fn test_code_tokens_survive_matching() {
        let (engine, _dir) = engine(128);
        let dict = create(&engine, "B", &[("{Item1} 획득", "Obtained {Item1}")]);
        let outcome = engine.find_translation(&dict, "{Item1} 획득", 0.85).unwrap();
        let t = outcome.translation().unwrap();
        assert!(t.text.contains("{Item1}"));
        assert_eq!(t.text, "Obtained {Item1}");
    }

    #[test]
    fn test_threshold_validated_first() {
        let (engine, _dir) = engine(32);
        let dict = create(&engine, "T", &[("검", "Sword")]);
        assert!(matches!(
            engine.find_translation(&dict, "검", 1.5),
            Err(EngineError::ThresholdOutOfRange(_))
        ));
        assert!(matches!(
            engine.search(&dict, "검", -0.1, 5),
            Err(EngineError::ThresholdOutOfRange(_))
        ));
        let cancel = CancelFlag::new();
        let job = Job::new(&NoProgress, &cancel, 10);
        assert!(engine.extract_clusters(&dict, 2.0, 0, job).is_err());
        assert!(engine.translate_file(&dict, &[], 2.0, job).is_err());
    }

    #[test]
    fn test_empty_query_is_invalid() {
        let (engine, _dir) = engine(32);
        let dict = create(&engine, "E", &[("검", "Sword")]);
        assert!(matches!(
            engine.find_translation(&dict, "  ", 0.5),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_search_threshold_monotonic() {
        let (engine, _dir) = engine(256);
        let dict = create(
            &engine,
            "S",
            &[
                ("고대 수호자의 대검", "Ancient Guardian's Greatsword"),
                ("고대 수호자의 장검", "Ancient Guardian's Longsword"),
                ("수호자의 방패", "Guardian's Shield"),
                ("낚시", "Fishing"),
            ],
        );
        let mut previous: Option<Vec<usize>> = None;
        for t in [0.0, 0.3, 0.6, 0.9] {
            let hits: Vec<usize> = engine
                .search(&dict, "고대 수호자의 대검", t, 10)
                .unwrap()
                .iter()
                .map(|h| h.index)
                .collect();
            if let Some(prev) = &previous {
                assert!(hits.iter().all(|i| prev.contains(i)), "t={t}");
            }
            previous = Some(hits);
        }
        // the exact entry survives the strictest threshold
        assert_eq!(previous.unwrap().first(), Some(&0));
    }

    #[test]
    fn test_load_round_trip_and_mismatch() {
        let (engine, dir) = engine(64);
        let created = create(&engine, "BDO_EN", &[("검", "Sword"), ("방패", "Shield")]);
        let id = created.dictionary().id().clone();

        let loaded = engine.load_dictionary(&id).unwrap();
        assert_eq!(loaded.dictionary().len(), 2);
        let outcome = engine.find_translation(&loaded, "방패", 0.9).unwrap();
        assert_eq!(outcome.translation().unwrap().text, "Shield");

        let mut config = engine.config().clone();
        config.data_dir = dir.path().to_string_lossy().into_owned();
        config.model.dimensions = 32;
        let other = Engine::new(config, Arc::new(MockEmbedder::new(32))).unwrap();
        assert!(matches!(
            other.load_dictionary(&id),
            Err(EngineError::ModelMismatch { .. })
        ));
    }

    #[test]
    fn test_dimension_mismatch_rejected_up_front() {
        let mut config = Config::default();
        config.model.dimensions = 384;
        let result = Engine::new(config, Arc::new(MockEmbedder::new(64)));
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_list_and_delete() {
        let (engine, _dir) = engine(32);
        create(&engine, "ONE", &[("검", "Sword")]);
        create(&engine, "TWO", &[("활", "Bow")]);
        let ids: Vec<String> = engine
            .list_dictionaries()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, vec!["ONE", "TWO"]);

        let one = DictionaryId::new("ONE").unwrap();
        assert!(engine.delete_dictionary(&one).unwrap());
        assert!(matches!(
            engine.load_dictionary(&one),
            Err(EngineError::DictionaryNotFound(_))
        ));
    }

    #[test]
    fn test_translate_rows() {
        let (engine, _dir) = engine(256);
        let dict = create(
            &engine,
            "TR",
            &[
                ("{Item1} 획득", "Obtained {Item1}"),
                ("레벨 업", "Level up"),
                ("축하합니다", "Congratulations"),
            ],
        );
        let rows = vec![
            row(&["{Item7} 획득"]),
            row(&["레벨 업\n축하합니다", "old"]),
            row(&["", "orphan"]),
            row(&["완전히 새로운 문장입니다"]),
        ];
        let sink = RecordingSink::default();
        let cancel = CancelFlag::new();
        let report = engine
            .translate_file(&dict, &rows, 0.85, Job::new(&sink, &cancel, 1))
            .unwrap();

        assert_eq!(
            report.summary,
            Summary {
                processed: 4,
                matched: 2,
                unmatched: 1,
                skipped: 1
            }
        );
        assert_eq!(report.rows[0], row(&["{Item7} 획득", "Obtained {Item7}"]));
        assert_eq!(report.rows[1][1], "Level up\nCongratulations");
        assert_eq!(report.rows[2], row(&["", "orphan"]));
        assert_eq!(report.rows[3].len(), 1);
        assert!(report.outcomes[2].is_none());

        let updates = sink.0.lock().unwrap();
        assert!(updates.iter().any(|u| u.stage == Stage::Embedding));
        let last = updates.last().unwrap();
        assert_eq!((last.stage, last.done, last.total), (Stage::Translating, 4, 4));
    }

    #[test]
    fn test_translate_keeps_header() {
        let (mut engine, _dir) = engine(64);
        engine.config.columns.has_header = true;
        let dict = create(&engine, "H", &[("검", "Sword")]);
        let rows = vec![row(&["ko", "en"]), row(&["검", ""])];
        let cancel = CancelFlag::new();
        let report = engine
            .translate_file(&dict, &rows, 0.9, Job::new(&NoProgress, &cancel, 10))
            .unwrap();
        assert_eq!(report.rows, vec![row(&["ko", "en"]), row(&["검", "Sword"])]);
        assert_eq!(report.summary.processed, 1);
    }

    #[test]
    fn test_translate_cancelled() {
        let (engine, _dir) = engine(32);
        let dict = create(&engine, "C", &[("검", "Sword")]);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = engine.translate_file(
            &dict,
            &[row(&["검"])],
            0.5,
            Job::new(&NoProgress, &cancel, 10),
        );
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_clusters_respect_min_length() {
        let (engine, _dir) = engine(256);
        let dict = create(
            &engine,
            "CL",
            &[
                ("검", "Sword"),
                ("Ancient Guardian's Greatsword of the Valley", "a"),
                ("Ancient Guardian's Greatsword of the Valley.", "b"),
                ("Ancient Guardian's Greatsword of the Valley!", "c"),
                ("Fishing rod for the deep sea", "d"),
            ],
        );
        let cancel = CancelFlag::new();
        let report = engine
            .extract_clusters(&dict, 0.9, 5, Job::new(&NoProgress, &cancel, 10))
            .unwrap();

        assert_eq!(report.summary.processed, 5);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.matched, 3);
        assert_eq!(report.summary.unmatched, 1);

        let sizes: Vec<usize> = report.clusters.iter().map(Cluster::len).collect();
        assert_eq!(sizes, vec![3, 1]);
        // rows are reported in pool coordinates
        assert_eq!(report.clusters[0].members, vec![1, 2, 3]);
        assert_eq!(report.clusters[1].members, vec![4]);
    }
}
