//! Integration tests for the Engine facade.
//!
//! Covers ingestion, exact ranking, the tombstone staleness window, the
//! dimension guard, determinism and JSON import through the public API.

use nearline::{
    Config, EmbeddingDimension, Engine, Generation, HnswConfig, IndexConfig, IndexKind, Metadata,
    Metric, MetadataFilter, MetadataValue, NewRecord, Query, RecordId, RefreshConfig,
    RefreshOutcome,
};
use tempfile::tempdir;

const DIM: usize = 16;

/// Generates a deterministic embedding from a seed.
///
/// Vectors with close seeds produce similar embeddings (correlated via sin),
/// enabling predictable nearest-neighbor ordering in tests.
fn make_embedding(seed: u64) -> Vec<f32> {
    (0..DIM)
        .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
        .collect()
}

/// Config with manual refresh only, so tests control every build.
fn manual_config(dim: usize, metric: Metric) -> Config {
    Config {
        refresh: RefreshConfig {
            interval: None,
            staleness_threshold: None,
            persist_on_publish: false,
        },
        ..Config::in_memory(EmbeddingDimension::Custom(dim), metric)
    }
}

fn open(dim: usize, metric: Metric) -> Engine {
    Engine::open(manual_config(dim, metric)).unwrap()
}

fn ids(results: &[nearline::SearchResult]) -> Vec<String> {
    results.iter().map(|r| r.id.to_string()).collect()
}

/// Reference inner product, accumulated in f64 and rounded once.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum::<f64>() as f32
}

// ============================================================================
// End-to-end Example
// ============================================================================

#[test]
fn test_cosine_example_returns_a_then_c() {
    let engine = open(2, Metric::Cosine);
    engine.insert(NewRecord::new("A", vec![1.0, 0.0])).unwrap();
    engine.insert(NewRecord::new("B", vec![0.0, 1.0])).unwrap();
    engine.insert(NewRecord::new("C", vec![0.9, 0.1])).unwrap();
    engine.refresh_now().unwrap();

    let results = engine.search(&[1.0, 0.0], 2, None, None).unwrap();
    assert_eq!(ids(&results), vec!["A", "C"]);
    assert!((results[0].score - 1.0).abs() < 1e-6);
    assert!((results[1].score - 0.994).abs() < 1e-3);

    engine.close().unwrap();
}

// ============================================================================
// Exact Ranking
// ============================================================================

#[test]
fn test_exact_k_equals_store_size_returns_true_order() {
    let engine = open(DIM, Metric::DotProduct);
    for i in 0..40u64 {
        engine
            .insert(NewRecord::new(format!("r{:02}", i), make_embedding(i)))
            .unwrap();
    }
    for i in [3u64, 17, 29] {
        engine.soft_delete(&RecordId::new(format!("r{:02}", i))).unwrap();
    }
    engine.refresh_now().unwrap();

    let query = make_embedding(11);
    let results = engine.search(&query, 37, None, None).unwrap();
    assert_eq!(results.len(), 37);

    let mut expected: Vec<(f32, String)> = (0..40u64)
        .filter(|i| ![3, 17, 29].contains(i))
        .map(|i| (dot(&query, &make_embedding(i)), format!("r{:02}", i)))
        .collect();
    expected.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    let expected_ids: Vec<String> = expected.into_iter().map(|(_, id)| id).collect();

    assert_eq!(ids(&results), expected_ids);
    for w in results.windows(2) {
        assert!(w[0].score >= w[1].score);
    }
}

#[test]
fn test_filtered_search_with_parsed_filter() {
    let engine = open(2, Metric::Cosine);
    let rows = [
        ("a", [1.0, 0.0], "sales", 20),
        ("b", [0.95, 0.05], "tech", 30),
        ("c", [0.9, 0.1], "sales", 45),
        ("d", [0.8, 0.2], "sales", 25),
    ];
    for (id, embedding, category, duration) in rows {
        engine
            .insert(
                NewRecord::new(id, embedding.to_vec())
                    .with_metadata("category", category)
                    .with_metadata("duration", duration),
            )
            .unwrap();
    }
    engine.refresh_now().unwrap();

    let filter = MetadataFilter::parse(r#"category = "sales" AND duration <= 30"#).unwrap();
    let results = engine.search(&[1.0, 0.0], 5, Some(filter), None).unwrap();
    assert_eq!(ids(&results), vec!["a", "d"]);
}

#[test]
fn test_large_magnitude_embeddings_rank_correctly() {
    let engine = open(2, Metric::Cosine);
    engine.insert(NewRecord::new("a_orth", vec![0.0, 1.0])).unwrap();
    engine.insert(NewRecord::new("z_big", vec![1e20, 0.0])).unwrap();
    engine.refresh_now().unwrap();

    let results = engine.search(&[1.0, 0.0], 2, None, None).unwrap();
    assert_eq!(ids(&results), vec!["z_big", "a_orth"]);
    assert_eq!(results[0].score, 1.0);

    let results = engine.search(&[1e20, 0.0], 1, None, None).unwrap();
    assert_eq!(ids(&results), vec!["z_big"]);

    let engine = open(2, Metric::Euclidean);
    engine.insert(NewRecord::new("far", vec![3e20, 0.0])).unwrap();
    engine.insert(NewRecord::new("near", vec![2e20, 0.0])).unwrap();
    engine.refresh_now().unwrap();
    let results = engine.search(&[0.0, 0.0], 2, None, None).unwrap();
    assert_eq!(ids(&results), vec!["near", "far"]);
    assert!(results[0].score > results[1].score);
}

// ============================================================================
// Staleness Window
// ============================================================================

#[test]
fn test_soft_delete_visible_only_after_rebuild() {
    let engine = open(2, Metric::Cosine);
    engine.insert(NewRecord::new("a", vec![1.0, 0.0])).unwrap();
    engine.insert(NewRecord::new("b", vec![0.0, 1.0])).unwrap();
    engine.refresh_now().unwrap();

    engine.soft_delete(&"a".into()).unwrap();
    assert!(engine.get(&"a".into()).unwrap().is_none());

    // Generation built before the delete may still return it
    let before = engine.search(&[1.0, 0.0], 2, None, None).unwrap();
    assert!(ids(&before).contains(&"a".to_string()));

    engine.refresh_now().unwrap();
    let after = engine.search(&[1.0, 0.0], 2, None, None).unwrap();
    assert_eq!(ids(&after), vec!["b"]);
}

#[test]
fn test_inserts_invisible_until_publish() {
    let engine = open(2, Metric::Cosine);
    engine.insert(NewRecord::new("a", vec![1.0, 0.0])).unwrap();
    assert!(engine.search(&[1.0, 0.0], 1, None, None).unwrap().is_empty());

    let outcome = engine.refresh_now().unwrap();
    assert!(matches!(
        outcome,
        RefreshOutcome::Published {
            generation: Generation(1),
            ..
        }
    ));
    assert_eq!(engine.search(&[1.0, 0.0], 1, None, None).unwrap().len(), 1);
}

#[test]
fn test_update_changes_ranking_after_refresh() {
    let engine = open(2, Metric::Cosine);
    engine.insert(NewRecord::new("a", vec![1.0, 0.0])).unwrap();
    engine.insert(NewRecord::new("b", vec![0.0, 1.0])).unwrap();
    engine.refresh_now().unwrap();

    let mut metadata = Metadata::new();
    metadata.insert("moved".into(), MetadataValue::Bool(true));
    engine.update(&"b".into(), vec![1.0, 0.01], metadata).unwrap();
    engine.soft_delete(&"a".into()).unwrap();
    engine.refresh_now().unwrap();

    let results = engine.search(&[1.0, 0.0], 1, None, None).unwrap();
    assert_eq!(ids(&results), vec!["b"]);
    assert_eq!(results[0].metadata.get("moved"), Some(&MetadataValue::Bool(true)));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_wrong_dimension_insert_never_mutates_store() {
    let engine = open(3, Metric::Cosine);
    engine.insert(NewRecord::new("a", vec![1.0, 0.0, 0.0])).unwrap();
    let before = engine.status().unwrap();

    let err = engine.insert(NewRecord::new("b", vec![1.0, 0.0])).unwrap_err();
    assert!(err.is_dimension_mismatch());

    let after = engine.status().unwrap();
    assert_eq!(after.store_version, before.store_version);
    assert_eq!(after.live_records, 1);
    assert!(engine.get(&"b".into()).unwrap().is_none());
}

#[test]
fn test_duplicate_and_missing_ids() {
    let engine = open(2, Metric::Cosine);
    engine.insert(NewRecord::new("a", vec![1.0, 0.0])).unwrap();
    assert!(engine
        .insert(NewRecord::new("a", vec![0.0, 1.0]))
        .unwrap_err()
        .is_duplicate_id());
    assert!(engine
        .update(&"zzz".into(), vec![1.0, 0.0], Metadata::new())
        .unwrap_err()
        .is_not_found());
    assert!(engine.soft_delete(&"zzz".into()).unwrap_err().is_not_found());
}

#[test]
fn test_query_validation() {
    let engine = open(2, Metric::Cosine);
    engine.insert(NewRecord::new("a", vec![1.0, 0.0])).unwrap();
    engine.refresh_now().unwrap();

    assert!(engine.search(&[1.0, 0.0], 0, None, None).unwrap_err().is_invalid_query());
    assert!(engine
        .search(&[1.0, 0.0, 0.0], 1, None, None)
        .unwrap_err()
        .is_dimension_mismatch());
    assert!(MetadataFilter::parse("category = ").unwrap_err().is_invalid_query());
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn test_identical_queries_return_identical_results() {
    let engine = open(DIM, Metric::Euclidean);
    for i in 0..50u64 {
        engine
            .insert(NewRecord::new(format!("r{:02}", i), make_embedding(i % 10)))
            .unwrap();
    }
    engine.refresh_now().unwrap();

    let query = Query::new(make_embedding(4), 12);
    let first = engine.query(&query).unwrap();
    let first_json = serde_json::to_vec(&first).unwrap();
    for _ in 0..20 {
        let again = engine.query(&query).unwrap();
        assert_eq!(serde_json::to_vec(&again).unwrap(), first_json);
    }

    // Five exact duplicates of seed 4 tie at distance 0 and come back by id
    let top: Vec<String> = ids(&first).into_iter().take(5).collect();
    assert_eq!(top, vec!["r04", "r14", "r24", "r34", "r44"]);
}

// ============================================================================
// Approximate Strategy
// ============================================================================

#[test]
fn test_approximate_engine_finds_self() {
    let config = Config {
        index: IndexConfig {
            metric: Metric::Cosine,
            kind: IndexKind::Approximate(HnswConfig {
                ef_construction: 100,
                max_elements: 1000,
                ..Default::default()
            }),
        },
        ..manual_config(DIM, Metric::Cosine)
    };
    let engine = Engine::open(config).unwrap();
    for i in 0..200u64 {
        engine
            .insert(NewRecord::new(format!("r{:03}", i), make_embedding(i * 7)))
            .unwrap();
    }
    engine.refresh_now().unwrap();

    let results = engine.search(&make_embedding(70), 5, None, None).unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0].id.as_str(), "r010");
    for w in results.windows(2) {
        assert!(w[0].score >= w[1].score);
    }
}

// ============================================================================
// Import
// ============================================================================

#[test]
fn test_import_json_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("records.json");
    std::fs::write(
        &path,
        r#"[
            {"id": "java-1", "embedding": [1.0, 0.0],
             "metadata": {"language": "Java", "duration": 30}},
            {"id": "py-1", "embedding": [0.0, 1.0],
             "metadata": {"language": "Python", "remote": true}},
            {"id": "misc", "embedding": [0.7, 0.7]}
        ]"#,
    )
    .unwrap();

    let engine = open(2, Metric::Cosine);
    assert_eq!(engine.import_json(&path).unwrap(), 3);
    engine.refresh_now().unwrap();

    let filter = MetadataFilter::parse("duration >= 30.0").unwrap();
    let results = engine.search(&[1.0, 0.0], 3, Some(filter), None).unwrap();
    assert_eq!(ids(&results), vec!["java-1"]);
    assert_eq!(
        results[0].metadata.get("language"),
        Some(&MetadataValue::String("Java".into()))
    );
}

#[test]
fn test_import_is_all_or_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("records.json");
    std::fs::write(
        &path,
        r#"[
            {"id": "ok", "embedding": [1.0, 0.0]},
            {"id": "bad", "embedding": [1.0, 0.0, 0.0]}
        ]"#,
    )
    .unwrap();

    let engine = open(2, Metric::Cosine);
    assert!(engine.import_json(&path).unwrap_err().is_dimension_mismatch());
    assert_eq!(engine.status().unwrap().live_records, 0);
}
