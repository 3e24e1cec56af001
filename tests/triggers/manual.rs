use batch_aggregator::FlushTrigger;

use crate::types::{delivery, Harness};

/// Given nothing has been admitted
/// When we flush, twice
/// Then nothing is published and no metric moves
#[tokio::test]
async fn empty_flush_is_a_no_op() {
    let h = Harness::new(3);

    assert!(h.aggregator.flush().await.unwrap().is_none());
    assert!(h.aggregator.flush().await.unwrap().is_none());

    assert!(h.broker.published().is_empty());
    assert!(h.broker.acked().is_empty());
    assert_eq!(h.metrics.batches_created.get(), 0);
    assert_eq!(h.metrics.batch_size.get_sample_count(), 0);
}

/// Given some pending items
/// When we flush twice in a row
/// Then only the first flush emits a batch
#[tokio::test]
async fn second_flush_finds_nothing() {
    let h = Harness::new(10);
    h.aggregator.admit(delivery(1, "a")).await.unwrap();
    h.aggregator.admit(delivery(2, "b")).await.unwrap();

    let (first, second) = tokio::join!(h.aggregator.flush(), h.aggregator.flush());
    let receipts: Vec<_> = [first.unwrap(), second.unwrap()]
        .into_iter()
        .flatten()
        .collect();

    assert_eq!(receipts.len(), 1, "exactly one flush should take the items");
    let receipt = receipts.into_iter().next().unwrap();
    assert_eq!(receipt.trigger(), FlushTrigger::Manual);
    assert_eq!(receipt.size(), 2);

    let report = receipt.report().await.unwrap();
    assert_eq!(h.names(&report.batch_id), vec!["a", "b"]);
    assert_eq!(h.metrics.batches_created.get(), 1);
}
