use std::collections::HashSet;

use assert_matches::assert_matches;
use batch_aggregator::{Admission, FlushTrigger};
use futures::future::join_all;

use crate::types::{delivery, Harness};

/// Given a batch size of 3
/// When we admit A, B and C
/// Then nothing is flushed until C, which flushes all three and acknowledges them
#[tokio::test]
async fn flushes_at_threshold() {
    let h = Harness::new(3);

    let a = h.aggregator.admit(delivery(1, "A")).await.unwrap();
    let b = h.aggregator.admit(delivery(2, "B")).await.unwrap();
    assert_matches!(a, Admission::Pending { pending: 1 });
    assert_matches!(b, Admission::Pending { pending: 2 });
    assert!(h.broker.published().is_empty());

    let c = h.aggregator.admit(delivery(3, "C")).await.unwrap();
    let receipt = assert_matches!(c, Admission::Flushed(receipt) => receipt);
    assert_eq!(receipt.trigger(), FlushTrigger::Size);

    let report = receipt.report().await.unwrap();
    assert_eq!(report.size, 3);
    assert_eq!(h.names(&report.batch_id), vec!["A", "B", "C"]);
    assert_eq!(h.broker.acked(), vec![1, 2, 3]);
    assert_eq!(h.aggregator.pending(), 0);
    assert_eq!(h.metrics.batches_created.get(), 1);
}

/// Given a batch size of 3
/// When we admit 7 items one after another
/// Then each batch holds its items in arrival order
#[tokio::test]
async fn preserves_arrival_order() {
    let h = Harness::new(3);

    let mut reports = vec![];
    for tag in 1..=7 {
        let admission = h
            .aggregator
            .admit(delivery(tag, &tag.to_string()))
            .await
            .unwrap();
        if let Admission::Flushed(receipt) = admission {
            reports.push(receipt.report().await.unwrap());
        }
    }
    let last = h.aggregator.flush().await.unwrap().unwrap();
    reports.push(last.report().await.unwrap());

    let batches: Vec<_> = reports.iter().map(|r| h.names(&r.batch_id)).collect();
    assert_eq!(
        batches,
        vec![vec!["1", "2", "3"], vec!["4", "5", "6"], vec!["7"]]
    );
    assert_eq!(h.broker.acked(), (1..=7).collect::<Vec<_>>());
}

/// Given a batch size of 10
/// When 100 items are admitted concurrently
/// Then every item ends up in exactly one batch and is acknowledged exactly once
#[tokio::test]
async fn concurrent_admissions_never_share_items() {
    let h = Harness::new(10);

    let tasks = (1..=100).map(|tag| {
        let aggregator = h.aggregator.clone();
        tokio_test::task::spawn(async move {
            aggregator
                .admit(delivery(tag, &tag.to_string()))
                .await
                .unwrap()
        })
    });
    let admissions = join_all(tasks).await;

    let mut flushed = 0;
    for admission in admissions {
        if let Admission::Flushed(receipt) = admission {
            let report = receipt.report().await.unwrap();
            assert_eq!(report.size, 10);
            flushed += 1;
        }
    }
    assert_eq!(flushed, 10);

    let acked = h.broker.acked();
    assert_eq!(acked.len(), 100);
    let unique: HashSet<_> = acked.iter().collect();
    assert_eq!(unique.len(), 100, "no item should be acknowledged twice");

    let mut batched: Vec<String> = h
        .broker
        .published()
        .iter()
        .flat_map(|ready| h.names(&ready.batch_id))
        .collect();
    batched.sort_by_key(|name| name.parse::<u64>().unwrap());
    let expected: Vec<String> = (1..=100).map(|n: u64| n.to_string()).collect();
    assert_eq!(batched, expected);
}
