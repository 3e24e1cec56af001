use std::time::Duration;

use assert_matches::assert_matches;
use batch_aggregator::AggregatorError;

use crate::types::{delivery, Harness};

#[tokio::test]
async fn shut_down_when_last_aggregator_dropped() {
    tokio::time::pause();

    let h = Harness::new(3);

    let worker = h.aggregator.worker_handle();
    let shut_down = tokio_test::task::spawn(async move {
        worker.wait_for_shutdown().await;
    });

    drop(h.aggregator);

    tokio::time::timeout(Duration::from_secs(1), shut_down)
        .await
        .expect("Worker should shut down");
}

#[tokio::test]
async fn shut_down_flushes_pending_items() {
    tokio::time::pause();

    let h = Harness::new(10);
    h.aggregator.admit(delivery(1, "a")).await.unwrap();
    h.aggregator.admit(delivery(2, "b")).await.unwrap();

    let worker = h.aggregator.worker_handle();

    let shut_down = {
        let worker = worker.clone();
        tokio_test::task::spawn(async move {
            worker.wait_for_shutdown().await;
        })
    };

    worker.shut_down().await;

    tokio::time::timeout(Duration::from_secs(1), shut_down)
        .await
        .expect("Worker should shut down");

    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(h.names(&published[0].batch_id), vec!["a", "b"]);
    assert_eq!(h.broker.acked(), vec![1, 2]);
}

#[tokio::test]
async fn rejects_items_after_shutdown() {
    let h = Harness::new(10);

    let worker = h.aggregator.worker_handle();
    worker.shut_down().await;
    worker.wait_for_shutdown().await;

    let result = h.aggregator.admit(delivery(1, "late")).await;

    assert_matches!(result, Err(AggregatorError::Tx));
    assert!(h.broker.published().is_empty());
}
