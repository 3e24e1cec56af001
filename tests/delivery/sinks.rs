use std::sync::Arc;

use batch_aggregator::{
    memory::{MemoryBroker, MemoryCache, MemoryObjectStore},
    sink::{CacheSink, ObjectStoreSink},
    Aggregator, AggregatorConfig, Batch, FsObjectStore, Metrics,
};
use serde_json::json;

use crate::types::delivery;

/// Given a filesystem object store
/// When a batch is flushed
/// Then its record is written to batches/{id}.json under the namespace
#[tokio::test]
async fn writes_batch_records_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();

    let aggregator = Aggregator::builder()
        .config(
            AggregatorConfig::builder()
                .batch_size(10)
                .namespace("media")
                .build(),
        )
        .acknowledger(Arc::new(broker.clone()))
        .notifier(Arc::new(broker.clone()))
        .sinks(vec![Arc::new(ObjectStoreSink::new(Some(Arc::new(
            FsObjectStore::new(dir.path(), "media"),
        ))))])
        .metrics(Metrics::new().unwrap())
        .build();

    aggregator.admit(delivery(1, "a")).await.unwrap();
    aggregator.admit(delivery(2, "b")).await.unwrap();
    let report = aggregator.flush().await.unwrap().unwrap().report().await.unwrap();

    let path = dir
        .path()
        .join("media")
        .join(report.batch_id.object_path());
    let batch: Batch = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();

    assert_eq!(batch.batch_id, report.batch_id);
    assert_eq!(batch.namespace, "media");
    assert_eq!(batch.items.len(), 2);
    assert_eq!(batch.items[0]["name"], json!("a"));
    assert!(batch.timestamp > 0.0);
    assert_eq!(broker.published()[0].batch_id, report.batch_id);
}

/// Given one sink which fails
/// When a batch is flushed
/// Then the other sink, the notification and the acks still happen
#[tokio::test]
async fn failing_sink_does_not_block_the_batch() {
    let broker = MemoryBroker::new();
    let cache = MemoryCache::new();
    let store = MemoryObjectStore::new();
    store.fail_writes(true);
    let metrics = Metrics::new().unwrap();

    let aggregator = Aggregator::builder()
        .config(AggregatorConfig::builder().batch_size(1).build())
        .acknowledger(Arc::new(broker.clone()))
        .notifier(Arc::new(broker.clone()))
        .sinks(vec![
            Arc::new(ObjectStoreSink::new(Some(Arc::new(store.clone())))),
            Arc::new(CacheSink::new(Some(Arc::new(cache.clone())))),
        ])
        .metrics(metrics.clone())
        .build();

    let receipt = match aggregator.admit(delivery(1, "a")).await.unwrap() {
        batch_aggregator::Admission::Flushed(receipt) => receipt,
        other => panic!("expected a flush, got {other:?}"),
    };
    let report = receipt.report().await.unwrap();

    assert_eq!(report.failed_sinks, vec!["object_store"]);
    assert!(cache.get(&report.batch_id.to_string()).is_some());
    assert!(report.published);
    assert_eq!(broker.acked(), vec![1]);
    assert_eq!(
        metrics
            .sink_failures
            .with_label_values(&["object_store"])
            .get(),
        1
    );
}

/// Given an object store holding only some of the referenced objects
/// When items are admitted
/// Then missing objects are counted but the items are still batched
#[tokio::test]
async fn missing_objects_are_still_batched() {
    let broker = MemoryBroker::new();
    let store = MemoryObjectStore::new();
    store.insert("in/present.mp4", b"".to_vec());
    let metrics = Metrics::new().unwrap();

    let aggregator = Aggregator::builder()
        .config(
            AggregatorConfig::builder()
                .batch_size(10)
                .namespace("media")
                .build(),
        )
        .acknowledger(Arc::new(broker.clone()))
        .notifier(Arc::new(broker.clone()))
        .object_store(Arc::new(store.clone()))
        .metrics(metrics.clone())
        .build();

    for (tag, uri) in [(1, "gs://media/in/present.mp4"), (2, "gs://media/in/missing.mp4")] {
        let body = json!({ "gcs_uri": uri }).to_string();
        aggregator
            .admit(batch_aggregator::Delivery::new(
                body,
                batch_aggregator::DeliveryTag::new(tag),
            ))
            .await
            .unwrap();
    }

    assert_eq!(aggregator.pending(), 2);
    assert_eq!(metrics.missing_objects.get(), 1);
    assert!(broker.requeued().is_empty());
}
