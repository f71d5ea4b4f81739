//! Integration tests for the complete eventsynth pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Generator → corpus file → reader
//! - Generator → Batch Writer → store → Query Facade
//! - Interrupted loads resumed from a checkpoint
//!
//! Run with: cargo test --test integration_tests

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::tempdir;

use eventsynth_gen::{assemble, AnomalyPattern, Corpus, GenerateConfig};
use eventsynth_model::corpus::{read_corpus, write_corpus};
use eventsynth_model::{AnomalyMarker, CorpusFormat, CorpusStats};
use eventsynth_store::{
    BatchWriter, Checkpoint, EventFilter, EventStore, MemoryStore, QueryFacade, StoreError,
    WriterConfig,
};

fn corpus(total: usize, seed: u64) -> Corpus {
    let config = GenerateConfig::new(total, 0.05)
        .with_anchor(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    assemble(&mut StdRng::seed_from_u64(seed), &config).unwrap()
}

// ============================================================================
// Generator → corpus files
// ============================================================================

#[test]
fn test_corpus_file_roundtrip_both_formats() {
    let corpus = corpus(2_000, 11);
    let dir = tempdir().unwrap();

    for (name, format) in [
        ("corpus.ndjson", CorpusFormat::Ndjson),
        ("corpus.json", CorpusFormat::JsonArray),
    ] {
        let path = dir.path().join(name);
        write_corpus(&path, corpus.events(), format).unwrap();
        let back = read_corpus(&path).unwrap();
        assert_eq!(back, corpus.events(), "{name}");
    }
}

#[test]
fn test_stats_reflect_injected_anomalies() {
    let corpus = corpus(5_000, 12);
    let stats = CorpusStats::from_events(corpus.events());

    assert_eq!(stats.total, 5_000);
    assert_eq!(stats.anomalies, corpus.anomaly_events());
    assert_eq!(stats.by_kind.values().sum::<usize>(), 5_000);
    assert!(stats.anomaly_percent() >= 5.0);
}

// ============================================================================
// Generator → Batch Writer → store → Query Facade
// ============================================================================

#[test]
fn test_load_and_query_back() {
    let corpus = corpus(25_000, 13);
    let store = MemoryStore::new();
    let writer = BatchWriter::new(&store, WriterConfig::default());
    writer.ensure_schema().unwrap();
    let report = writer.write(corpus.events()).unwrap();

    assert!(store.schema_ready());
    assert_eq!(store.insert_attempts(), vec![10_000, 10_000, 5_000]);
    assert_eq!(report.rows_written, 25_000);

    // A burst host's anomaly events come back intact, newest first.
    let burst = &corpus.bursts()[0];
    let filter = EventFilter {
        user_id: Some(burst.user_id.clone()),
        event_name: None,
        limit: 10_000,
    };
    let fetched = QueryFacade::new(&store).query_events(&filter).unwrap();
    assert!(fetched.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

    let expected: Vec<_> = corpus
        .events()
        .iter()
        .filter(|e| e.user_id == burst.user_id)
        .collect();
    assert_eq!(fetched.len(), expected.len());
    for event in expected {
        assert!(fetched.contains(event), "missing {}", event.event_id);
    }
    assert_eq!(
        fetched.iter().filter(|e| e.is_anomaly()).count(),
        burst.len
    );
}

#[test]
fn test_late_night_bursts_are_queryable_by_marker() {
    let corpus = corpus(20_000, 2024);
    let store = MemoryStore::new();
    BatchWriter::new(&store, WriterConfig::default())
        .write(corpus.events())
        .unwrap();

    let facade = QueryFacade::new(&store);
    for burst in corpus
        .bursts()
        .iter()
        .filter(|b| b.pattern == AnomalyPattern::LateNightHighValue)
    {
        let filter = EventFilter {
            user_id: Some(burst.user_id.clone()),
            event_name: Some("payment_success".to_string()),
            limit: 100,
        };
        let unusual = facade
            .query_events(&filter)
            .unwrap()
            .into_iter()
            .filter(|e| e.anomaly_marker() == Some(AnomalyMarker::UnusualHour))
            .count();
        assert_eq!(unusual, 5);
    }
}

// ============================================================================
// Interrupted loads
// ============================================================================

#[test]
fn test_interrupted_load_resumes_from_checkpoint() {
    let corpus = corpus(4_500, 14);
    let dir = tempdir().unwrap();
    let checkpoint = dir.path().join("load.checkpoint.json");

    let store = MemoryStore::new();
    store.fail_insert_attempt(
        3,
        StoreError::Http {
            status: 503,
            body: "Service Unavailable".to_string(),
        },
    );
    let config = WriterConfig::default()
        .with_batch_size(1_000)
        .with_checkpoint(&checkpoint);

    let err = BatchWriter::new(&store, config.clone())
        .write(corpus.events())
        .unwrap_err();
    assert_eq!(err.resume_from(), Some(3));
    assert_eq!(store.row_count(), 3_000);

    let resume = Checkpoint::load(&checkpoint)
        .unwrap()
        .unwrap()
        .resume_index(1_000)
        .unwrap();
    assert_eq!(resume, 3);

    let report = BatchWriter::new(&store, config.with_resume_from(resume))
        .write(corpus.events())
        .unwrap();
    assert_eq!(report.batches_written, 2);

    let ids: HashSet<String> = store.rows().into_iter().map(|r| r.event_id).collect();
    assert_eq!(ids.len(), 4_500);
    assert_eq!(store.row_count(), 4_500);
    assert!(corpus
        .events()
        .iter()
        .all(|e| ids.contains(e.event_id.as_str())));
}

#[test]
fn test_store_outage_surfaces_as_unavailable() {
    let store = MemoryStore::new();
    store.set_down(Some(StoreError::Unreachable {
        url: "http://localhost:8123/".to_string(),
        message: "connection refused".to_string(),
    }));
    let err = store.ping().unwrap_err();
    assert!(err.is_unavailable());
    assert!(BatchWriter::new(&store, WriterConfig::default())
        .ensure_schema()
        .is_err());
}
