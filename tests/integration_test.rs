/// End-to-end integration tests for the locmatch pipeline.
///
/// Tests the complete flow:
///   Table file → Ingest → Create → Persist → Load → Translate / Search / Cluster → Delete
use std::fs;
use std::sync::Arc;

use locmatch::config::Config;
use locmatch::dictionary::ingest::{read_pairs, read_rows, write_tsv};
use locmatch::dictionary::{DictionaryId, PoolKind};
use locmatch::embedder::mock::MockEmbedder;
use locmatch::engine::Engine;
use locmatch::error::EngineError;
use locmatch::progress::{CancelFlag, Job, NoProgress};
use tempfile::tempdir;

fn engine_in(dir: &std::path::Path) -> Engine {
    let mut config = Config::default();
    config.data_dir = dir.join("dicts").to_string_lossy().into_owned();
    config.model.dimensions = 256;
    config.matching.batch_size = 8;
    Engine::new(config, Arc::new(MockEmbedder::new(256))).unwrap()
}

/// Full pipeline: ingest → create → reload → translate → search → cluster → delete
#[test]
fn test_full_pipeline() {
    let temp_dir = tempdir().unwrap();
    let source = temp_dir.path().join("bdo_en.txt");
    fs::write(
        &source,
        [
            "안녕\tHello",
            "안녕\tHi",
            "안녕\tHello",
            "{Item1} 획득\tObtained {Item1}",
            "레벨 업_x000D_\tLevel up",
            "축하합니다\tCongratulations",
            "\torphan target",
            "Ancient Guardian's Greatsword of the Valley\tGreatsword",
            "Ancient Guardian's Greatsword of the Valley.\tGreatsword.",
            "Ancient Guardian's Greatsword of the Valley!\tGreatsword!",
        ]
        .join("\n"),
    )
    .unwrap();

    let engine = engine_in(temp_dir.path());
    let cancel = CancelFlag::new();
    let job = Job::new(&NoProgress, &cancel, 10);

    // 1. Ingest
    let ingested = read_pairs(&source, engine.config().columns).unwrap();
    assert_eq!(ingested.rows, 10);
    assert_eq!(ingested.skipped, 1, "Row without source should be skipped");

    // 2. Create and persist
    let id = DictionaryId::from_parts("BDO", "en").unwrap();
    let (_, summary) = engine.create_dictionary(&ingested.pairs, &id, job).unwrap();
    assert_eq!(summary.split_entries, 7, "Duplicates should collapse: {summary:?}");
    assert_eq!(engine.list_dictionaries().unwrap(), vec![id.clone()]);

    // 3. Reload from disk
    let dict = engine.load_dictionary(&id).unwrap();
    assert_eq!(dict.dictionary().pool(PoolKind::Split).len(), 7);
    assert!(dict.dictionary().pool(PoolKind::Whole).is_empty());

    // 4. Translate a new file
    let input = temp_dir.path().join("new.txt");
    fs::write(&input, "안녕\n{Item9} 획득\n레벨 업\n전혀 새로운 대사입니다\n").unwrap();
    let rows = read_rows(&input).unwrap();
    let report = engine.translate_file(&dict, &rows, 0.85, job).unwrap();
    assert_eq!(report.summary.processed, 4);
    assert_eq!(report.summary.matched, 3);
    assert_eq!(report.summary.unmatched, 1);
    assert_eq!(report.rows[0][1], "Hello", "Canonical target should win");
    assert_eq!(report.rows[1][1], "Obtained {Item9}");
    assert_eq!(report.rows[2][1], "Level up");

    let output = temp_dir.path().join("out.tsv");
    write_tsv(&output, &report.rows).unwrap();
    let written = fs::read_to_string(&output).unwrap();
    assert!(written.starts_with("안녕\tHello\n"));

    // 5. Search
    let hits = engine.search(&dict, "안녕", 0.9, 3).unwrap();
    assert_eq!(hits.first().map(|h| h.target.as_str()), Some("Hello"));

    // 6. Cluster
    let clusters = engine.extract_clusters(&dict, 0.9, 10, job).unwrap();
    let grouped: Vec<_> = clusters
        .clusters
        .iter()
        .filter(|c| !c.is_singleton())
        .collect();
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[0].len(), 3);

    // 7. Delete
    assert!(engine.delete_dictionary(&id).unwrap());
    assert!(engine.list_dictionaries().unwrap().is_empty());
    assert!(matches!(
        engine.load_dictionary(&id),
        Err(EngineError::DictionaryNotFound(_))
    ));
}

/// A dictionary written by one model must not be served by another.
#[test]
fn test_model_change_detected() {
    let temp_dir = tempdir().unwrap();
    let engine = engine_in(temp_dir.path());
    let cancel = CancelFlag::new();
    let pairs = vec![locmatch::dictionary::TextPair::new("검", "Sword")];
    let id = DictionaryId::new("KO_EN").unwrap();
    engine
        .create_dictionary(&pairs, &id, Job::new(&NoProgress, &cancel, 10))
        .unwrap();

    let mut config = engine.config().clone();
    config.model.dimensions = 128;
    let other = Engine::new(config, Arc::new(MockEmbedder::new(128))).unwrap();
    assert!(matches!(
        other.load_dictionary(&id),
        Err(EngineError::ModelMismatch { .. })
    ));
}

/// Damaged artifacts surface as CorruptDictionary, never as a partial load.
#[test]
fn test_corrupt_artifacts_rejected() {
    let temp_dir = tempdir().unwrap();
    let engine = engine_in(temp_dir.path());
    let cancel = CancelFlag::new();
    let pairs = vec![
        locmatch::dictionary::TextPair::new("검", "Sword"),
        locmatch::dictionary::TextPair::new("활", "Bow"),
    ];
    let id = DictionaryId::new("DMG").unwrap();
    engine
        .create_dictionary(&pairs, &id, Job::new(&NoProgress, &cancel, 10))
        .unwrap();

    let mut vectors = engine.dictionary_path(&id).into_os_string();
    vectors.push(".vectors.bin");
    let mut bytes = fs::read(&vectors).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x55;
    fs::write(&vectors, bytes).unwrap();

    assert!(matches!(
        engine.load_dictionary(&id),
        Err(EngineError::CorruptDictionary { .. })
    ));
}
