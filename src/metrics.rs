//! Prometheus metrics for the aggregator.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Counters, gauges and histograms describing the aggregator.
///
/// Each instance owns its registry, so several aggregators (or tests) don't share state. Cheap to
/// clone: clones update the same underlying metrics.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// Batches flushed.
    pub batches_created: IntCounter,
    /// Items per flushed batch.
    pub batch_size: Histogram,
    /// Items waiting in the current batch.
    pub queue_depth: IntGauge,
    /// Deliveries rejected by the admission path.
    pub malformed_items: IntCounter,
    /// Items referencing an object that could not be found.
    pub missing_objects: IntCounter,
    /// Failed writes, by sink.
    pub sink_failures: IntCounterVec,
    /// Batches whose notification could not be published.
    pub notification_failures: IntCounter,
    /// Deliveries which could not be acknowledged or requeued.
    pub ack_failures: IntCounter,
}

impl Metrics {
    /// Create and register all metrics.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let batches_created = IntCounter::with_opts(Opts::new(
            "batches_created_total",
            "Total number of batches created",
        ))?;
        let batch_size = Histogram::with_opts(
            HistogramOpts::new("batch_size", "Size of batches created").buckets(vec![
                1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0,
            ]),
        )?;
        let queue_depth = IntGauge::with_opts(Opts::new(
            "aggregator_queue_depth",
            "Current queue depth",
        ))?;
        let malformed_items = IntCounter::with_opts(Opts::new(
            "malformed_items_total",
            "Total deliveries requeued because they could not be decoded",
        ))?;
        let missing_objects = IntCounter::with_opts(Opts::new(
            "missing_objects_total",
            "Total items referencing an object that was not found",
        ))?;
        let sink_failures = IntCounterVec::new(
            Opts::new("sink_failures_total", "Total failed batch sink writes"),
            &["sink"],
        )?;
        let notification_failures = IntCounter::with_opts(Opts::new(
            "notification_failures_total",
            "Total batches whose ready notification could not be published",
        ))?;
        let ack_failures = IntCounter::with_opts(Opts::new(
            "ack_failures_total",
            "Total deliveries which could not be acknowledged or requeued",
        ))?;

        registry.register(Box::new(batches_created.clone()))?;
        registry.register(Box::new(batch_size.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(malformed_items.clone()))?;
        registry.register(Box::new(missing_objects.clone()))?;
        registry.register(Box::new(sink_failures.clone()))?;
        registry.register(Box::new(notification_failures.clone()))?;
        registry.register(Box::new(ack_failures.clone()))?;

        Ok(Self {
            registry,
            batches_created,
            batch_size,
            queue_depth,
            malformed_items,
            missing_objects,
            sink_failures,
            notification_failures,
            ack_failures,
        })
    }

    /// Encode all metrics in the Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("batches_created", &self.batches_created.get())
            .field("queue_depth", &self.queue_depth.get())
            .finish_non_exhaustive()
    }
}
