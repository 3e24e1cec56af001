use std::{sync::Arc, time::Duration};

use batch_aggregator::{
    memory::{MemoryBroker, MemoryCache},
    sink::CacheSink,
    Aggregator, AggregatorConfig, Batch, BatchId, Delivery, DeliveryTag, Metrics,
};

/// An aggregator wired to in-memory adapters.
pub struct Harness {
    pub aggregator: Aggregator,
    pub broker: MemoryBroker,
    pub cache: MemoryCache,
    pub metrics: Metrics,
}

impl Harness {
    pub fn new(batch_size: usize) -> Self {
        Self::with_config(
            AggregatorConfig::builder()
                .batch_size(batch_size)
                .namespace("media")
                .build(),
        )
    }

    pub fn with_timeout(batch_size: usize, timeout: Duration) -> Self {
        Self::with_config(
            AggregatorConfig::builder()
                .batch_size(batch_size)
                .batch_timeout(timeout)
                .namespace("media")
                .build(),
        )
    }

    pub fn with_config(config: AggregatorConfig) -> Self {
        let broker = MemoryBroker::new();
        let cache = MemoryCache::new();
        let metrics = Metrics::new().unwrap();

        let aggregator = Aggregator::builder()
            .config(config)
            .acknowledger(Arc::new(broker.clone()))
            .notifier(Arc::new(broker.clone()))
            .sinks(vec![Arc::new(CacheSink::new(Some(Arc::new(cache.clone()))))])
            .metrics(metrics.clone())
            .build();

        Self {
            aggregator,
            broker,
            cache,
            metrics,
        }
    }

    /// The record stored for a batch.
    pub fn record(&self, batch_id: &BatchId) -> Batch {
        let json = self
            .cache
            .get(&batch_id.to_string())
            .expect("batch should be cached");
        serde_json::from_str(&json).unwrap()
    }

    /// The names of the items in a batch, in order.
    pub fn names(&self, batch_id: &BatchId) -> Vec<String> {
        self.record(batch_id)
            .items
            .iter()
            .map(|item| item["name"].as_str().unwrap().to_string())
            .collect()
    }

    /// Wait until `n` batches have been published.
    pub async fn published(&self, n: usize) {
        while self.broker.published().len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn delivery(tag: u64, name: &str) -> Delivery {
    let body = serde_json::json!({ "name": name, "video_path": format!("/videos/{name}.mp4") });
    Delivery::new(body.to_string(), DeliveryTag::new(tag))
}
