use assert_matches::assert_matches;
use batch_aggregator::{error::MalformedItem, Admission, AggregatorError, Delivery, DeliveryTag};

use crate::types::{delivery, Harness};

/// Given the notification cannot be published
/// When a batch is flushed
/// Then none of its items are acknowledged or requeued
#[tokio::test]
async fn acknowledges_only_after_publishing() {
    let h = Harness::new(2);
    h.broker.fail_publishes(true);

    h.aggregator.admit(delivery(1, "a")).await.unwrap();
    let admission = h.aggregator.admit(delivery(2, "b")).await.unwrap();
    let report = assert_matches!(admission, Admission::Flushed(r) => r)
        .report()
        .await
        .unwrap();

    assert!(!report.published);
    assert_eq!(report.acked, 0);
    assert!(h.broker.acked().is_empty());
    assert!(h.broker.requeued().is_empty());
    assert_eq!(h.metrics.notification_failures.get(), 1);

    // The batch record was still stored before publishing failed.
    assert_eq!(h.names(&report.batch_id), vec!["a", "b"]);

    h.broker.fail_publishes(false);
    h.aggregator.admit(delivery(3, "c")).await.unwrap();
    let report = h.aggregator.flush().await.unwrap().unwrap().report().await.unwrap();

    assert!(report.published);
    assert_eq!(h.broker.acked(), vec![3]);
}

/// Given a delivery that is not valid JSON between two valid ones
/// When they are admitted
/// Then the malformed one is requeued and never appears in a batch
#[tokio::test]
async fn malformed_items_are_requeued() {
    let h = Harness::new(2);

    h.aggregator.admit(delivery(1, "a")).await.unwrap();
    let result = h
        .aggregator
        .admit(Delivery::new("{not json", DeliveryTag::new(2)))
        .await;
    assert_matches!(result, Err(AggregatorError::Malformed(MalformedItem::Decode(_))));
    assert_eq!(h.aggregator.pending(), 1, "malformed items are not counted");

    let admission = h.aggregator.admit(delivery(3, "b")).await.unwrap();
    let report = assert_matches!(admission, Admission::Flushed(r) => r)
        .report()
        .await
        .unwrap();

    assert_eq!(h.names(&report.batch_id), vec!["a", "b"]);
    assert_eq!(h.broker.requeued(), vec![2]);
    assert_eq!(h.broker.acked(), vec![1, 3]);
    assert_eq!(h.metrics.malformed_items.get(), 1);
}

/// Given a delivery whose body is a JSON array
/// When it is admitted
/// Then it is treated as malformed
#[tokio::test]
async fn non_object_payloads_are_malformed() {
    let h = Harness::new(2);

    let result = h
        .aggregator
        .admit(Delivery::new("[1, 2, 3]", DeliveryTag::new(9)))
        .await;

    assert_matches!(
        result,
        Err(AggregatorError::Malformed(MalformedItem::NotAnObject(_)))
    );
    assert_eq!(h.broker.requeued(), vec![9]);
    assert!(h.aggregator.flush().await.unwrap().is_none());
}

/// Batch IDs increase with every flush, even within one millisecond.
#[tokio::test]
async fn batch_ids_strictly_increase() {
    let h = Harness::new(1);

    let mut ids = vec![];
    for tag in 1..=5 {
        let admission = h.aggregator.admit(delivery(tag, "x")).await.unwrap();
        let report = assert_matches!(admission, Admission::Flushed(r) => r)
            .report()
            .await
            .unwrap();
        ids.push(report.batch_id);
    }

    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids: {ids:?}");
    assert!(ids.iter().all(|id| id.to_string().starts_with("batch_")));
}
