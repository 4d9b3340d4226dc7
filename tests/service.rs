//! Tests for the async SearchService seam.

use std::sync::Arc;

use nearline::{
    Config, EmbeddingDimension, Engine, ErrorKind, Generation, Metadata, MetadataValue, Metric,
    NewRecord, Query, RefreshConfig, SearchService, TriggerOutcome,
};

fn engine() -> Arc<Engine> {
    Arc::new(
        Engine::open(Config {
            refresh: RefreshConfig {
                interval: None,
                staleness_threshold: None,
                persist_on_publish: false,
            },
            ..Config::in_memory(EmbeddingDimension::Custom(2), Metric::Cosine)
        })
        .unwrap(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_service_round_trip() {
    let service = engine();
    service.insert(NewRecord::new("a", vec![1.0, 0.0])).await.unwrap();
    service.insert(NewRecord::new("b", vec![0.0, 1.0])).await.unwrap();

    assert_eq!(service.trigger_refresh().await.unwrap(), TriggerOutcome::Started);
    let mut waited = 0;
    while service.status().await.unwrap().active_generation != Generation(1) {
        waited += 1;
        assert!(waited < 1000, "refresh did not publish");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let hits = service.search(Query::new(vec![1.0, 0.0], 1)).await.unwrap();
    assert_eq!(hits[0].id.as_str(), "a");

    service.soft_delete("a".into()).await.unwrap();
    assert_eq!(service.status().await.unwrap().live_records, 1);
}

#[tokio::test]
async fn test_service_errors_map_to_status_codes() {
    let service = engine();

    let err = service.search(Query::new(vec![1.0], 1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    assert_eq!(err.kind().http_status(), 422);

    let err = service.search(Query::new(vec![1.0, 0.0], 0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);

    let err = service.soft_delete("missing".into()).await.unwrap_err();
    assert_eq!(err.kind().http_status(), 404);

    service.insert(NewRecord::new("a", vec![1.0, 0.0])).await.unwrap();
    let err = service.insert(NewRecord::new("a", vec![1.0, 0.0])).await.unwrap_err();
    assert_eq!(err.kind().http_status(), 409);
}

#[tokio::test]
async fn test_service_update_replaces_record() {
    let service = engine();
    let first = service.insert(NewRecord::new("a", vec![1.0, 0.0])).await.unwrap();

    let mut metadata = Metadata::new();
    metadata.insert("team".into(), MetadataValue::from("search"));
    let second = service
        .update("a".into(), vec![0.0, 1.0], metadata.clone())
        .await
        .unwrap();
    assert!(second > first);

    let record = service.get(&"a".into()).unwrap().unwrap();
    assert_eq!(record.embedding, vec![0.0, 1.0]);
    assert_eq!(record.metadata, metadata);

    let err = service
        .update("missing".into(), vec![1.0, 0.0], Metadata::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind().http_status(), 404);

    let err = service
        .update("a".into(), vec![1.0], Metadata::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
}
