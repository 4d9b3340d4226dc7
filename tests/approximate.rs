//! Integration tests for approximate (graph) search quality.
//!
//! The store is much larger than the candidate pool, so these exercise the
//! graph walk rather than a degenerate full scan.

use std::collections::BTreeSet;

use nearline::{
    Generation, HnswConfig, IndexConfig, IndexKind, IndexStructure, MetadataFilter, Metric,
    NewRecord, VectorStore,
};

const DIM: usize = 24;
const RECORDS: usize = 2000;
const CANDIDATES: usize = 40;

/// Deterministic pseudo-random embedding from a seed (xorshift).
fn make_embedding(seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..DIM)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 2000) as f32 / 1000.0 - 1.0
        })
        .collect()
}

fn populated_store() -> VectorStore {
    let store = VectorStore::new(DIM);
    let records = (0..RECORDS)
        .map(|i| {
            NewRecord::new(format!("r{:05}", i), make_embedding(i as u64))
                .with_metadata("bucket", "common")
        })
        .collect();
    store.insert_batch(records).unwrap();
    store
}

fn approximate() -> IndexConfig {
    IndexConfig {
        metric: Metric::Cosine,
        kind: IndexKind::Approximate(HnswConfig {
            ef_construction: 100,
            max_elements: RECORDS,
            candidates: CANDIDATES,
            ..Default::default()
        }),
    }
}

fn exact() -> IndexConfig {
    IndexConfig {
        metric: Metric::Cosine,
        kind: IndexKind::Exact,
    }
}

fn id_set(results: &[nearline::SearchResult]) -> BTreeSet<String> {
    results.iter().map(|r| r.id.to_string()).collect()
}

#[test]
fn test_recall_against_exact_top_k() {
    let store = populated_store();
    let snapshot = store.snapshot().unwrap();
    let graph = IndexStructure::build(&snapshot, &approximate(), Generation(1)).unwrap();
    let flat = IndexStructure::build(&snapshot, &exact(), Generation(1)).unwrap();

    let k = 10;
    let queries = 25;
    let mut found = 0usize;
    for q in 0..queries {
        let query = make_embedding(1_000_000 + q);
        let truth = id_set(&flat.search(&query, k, None, None).unwrap());
        let approx = graph.search(&query, k, None, None).unwrap();
        assert_eq!(approx.len(), k);
        found += id_set(&approx).intersection(&truth).count();
    }

    let recall = found as f64 / (k as u64 * queries) as f64;
    assert!(recall >= 0.8, "recall@{} was {:.3}", k, recall);
}

#[test]
fn test_repeated_approximate_queries_are_identical() {
    let store = populated_store();
    let graph =
        IndexStructure::build(&store.snapshot().unwrap(), &approximate(), Generation(1)).unwrap();

    for q in 0..5 {
        let query = make_embedding(2_000_000 + q);
        let first = serde_json::to_vec(&graph.search(&query, 10, None, None).unwrap()).unwrap();
        for _ in 0..3 {
            let again =
                serde_json::to_vec(&graph.search(&query, 10, None, None).unwrap()).unwrap();
            assert_eq!(again, first);
        }
    }
}

#[test]
fn test_selective_filter_may_return_fewer_than_k() {
    let store = populated_store();
    let query = make_embedding(3_000_000);

    // Rare records point away from the query, outside any nearby candidate pool.
    let rare = (0..20u64)
        .map(|i| {
            let embedding = query
                .iter()
                .zip(make_embedding(4_000_000 + i))
                .map(|(&q, noise)| -q + 0.01 * noise)
                .collect();
            NewRecord::new(format!("rare{:02}", i), embedding).with_metadata("bucket", "rare")
        })
        .collect();
    store.insert_batch(rare).unwrap();

    let snapshot = store.snapshot().unwrap();
    let graph = IndexStructure::build(&snapshot, &approximate(), Generation(1)).unwrap();
    let flat = IndexStructure::build(&snapshot, &exact(), Generation(1)).unwrap();
    let filter = MetadataFilter::eq("bucket", "rare");

    let k = 10;
    let exact_hits = flat.search(&query, k, Some(&filter), None).unwrap();
    assert_eq!(exact_hits.len(), k);

    let approx_hits = graph.search(&query, k, Some(&filter), None).unwrap();
    assert!(approx_hits.len() < k, "got {} hits", approx_hits.len());
    assert!(approx_hits.iter().all(|r| r.id.as_str().starts_with("rare")));
}
