use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, span, Instrument, Level};

use crate::{
    batch::{Batch, BatchId, BatchIdGenerator, DrainedBatch, FlushTrigger},
    error::AggregatorResult,
    item::DeliveryTag,
    metrics::Metrics,
    sink::{Acknowledger, BatchSink, Notifier},
};

/// The outcome of flushing one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct FlushReport {
    /// The batch that was flushed.
    pub batch_id: BatchId,
    /// How many items it contained.
    pub size: usize,
    /// What caused the flush.
    pub trigger: FlushTrigger,
    /// Sinks which failed to store the batch.
    pub failed_sinks: Vec<&'static str>,
    /// Whether the batch-ready notification was published.
    ///
    /// If not, none of the items were acknowledged.
    pub published: bool,
    /// How many items were acknowledged.
    pub acked: usize,
}

/// A batch has been drained and handed over for flushing.
///
/// Can be awaited for the outcome of the flush.
#[derive(Debug)]
pub struct FlushReceipt {
    size: usize,
    trigger: FlushTrigger,
    rx: oneshot::Receiver<FlushReport>,
}

impl FlushReceipt {
    /// How many items were drained.
    pub fn size(&self) -> usize {
        self.size
    }

    /// What caused the flush.
    pub fn trigger(&self) -> FlushTrigger {
        self.trigger
    }

    /// Wait for the batch to be stored, announced and acknowledged.
    pub async fn report(self) -> AggregatorResult<FlushReport> {
        Ok(self.rx.await?)
    }
}

pub(crate) struct FlushJob {
    drained: DrainedBatch,
    reply: oneshot::Sender<FlushReport>,
}

impl FlushJob {
    pub fn new(drained: DrainedBatch) -> (Self, FlushReceipt) {
        let (reply, rx) = oneshot::channel();
        let receipt = FlushReceipt {
            size: drained.items.len(),
            trigger: drained.trigger,
            rx,
        };
        (Self { drained, reply }, receipt)
    }
}

/// Everything a flush writes to.
pub(crate) struct Outputs {
    pub sinks: Vec<Arc<dyn BatchSink>>,
    pub notifier: Arc<dyn Notifier>,
    pub acknowledger: Arc<dyn Acknowledger>,
    pub metrics: Metrics,
}

/// Turns drained items into batches and publishes them, one batch at a time in drain order.
pub(crate) struct FlushCoordinator {
    namespace: String,
    ids: BatchIdGenerator,
    outputs: Arc<Outputs>,
    job_rx: mpsc::UnboundedReceiver<FlushJob>,
}

impl FlushCoordinator {
    pub fn spawn(
        namespace: String,
        mut outputs: Outputs,
    ) -> (mpsc::UnboundedSender<FlushJob>, JoinHandle<()>) {
        // Unbounded so the worker never waits on slow sinks. The backlog is bounded in practice by
        // the broker's prefetch limit: unacknowledged deliveries stop arriving.
        let (job_tx, job_rx) = mpsc::unbounded_channel();

        outputs.sinks.retain(|sink| sink.is_enabled());

        let coordinator = FlushCoordinator {
            namespace,
            ids: BatchIdGenerator::default(),
            outputs: Arc::new(outputs),
            job_rx,
        };

        let handle = tokio::spawn(coordinator.run());

        (job_tx, handle)
    }

    async fn run(mut self) {
        while let Some(FlushJob { drained, reply }) = self.job_rx.recv().await {
            let trigger = drained.trigger;
            let (batch, tags) = drained.finalise(&mut self.ids, &self.namespace);

            let span = span!(
                Level::INFO,
                "flush batch",
                batch.id = %batch.batch_id,
                batch.size = batch.len() as u64,
                batch.trigger = %trigger
            );

            // Spawn a task so a panicking adapter only loses this batch.
            let outputs = Arc::clone(&self.outputs);
            let batch_id = batch.batch_id;
            let result = tokio::spawn(flush(outputs, batch, tags, trigger).instrument(span)).await;

            match result {
                Ok(report) => {
                    if reply.send(report).is_err() {
                        debug!("Nobody waiting for the report of batch {batch_id}");
                    }
                }
                Err(err) => {
                    error!("Flushing batch {batch_id} did not complete: {err}");
                }
            }
        }
    }
}

/// Store, announce, then acknowledge a batch.
async fn flush(
    outputs: Arc<Outputs>,
    batch: Batch,
    tags: Vec<DeliveryTag>,
    trigger: FlushTrigger,
) -> FlushReport {
    let size = batch.len();
    let mut failed_sinks = Vec::new();

    // Sinks are independent: one failing doesn't stop the others, or the notification.
    for sink in &outputs.sinks {
        if let Err(err) = sink.store(&batch).await {
            error!("Failed to store batch {} in {}: {err}", batch.batch_id, sink.name());
            outputs
                .metrics
                .sink_failures
                .with_label_values(&[sink.name()])
                .inc();
            failed_sinks.push(sink.name());
        }
    }

    let published = match outputs.notifier.publish(&batch.ready()).await {
        Ok(()) => true,
        Err(err) => {
            // The drained items are not acknowledged or requeued. The broker keeps them
            // unacknowledged until the connection closes.
            error!(
                "Failed to publish batch {}, leaving {size} items unacknowledged: {err}",
                batch.batch_id
            );
            outputs.metrics.notification_failures.inc();
            false
        }
    };

    let mut acked = 0;
    if published {
        for tag in tags {
            let raw = tag.value();
            match outputs.acknowledger.ack(tag).await {
                Ok(()) => acked += 1,
                Err(err) => {
                    error!("Failed to acknowledge delivery {raw}: {err}");
                    outputs.metrics.ack_failures.inc();
                }
            }
        }
    }

    outputs.metrics.batches_created.inc();
    outputs.metrics.batch_size.observe(size as f64);

    info!("Flushed batch {} with {size} items", batch.batch_id);

    FlushReport {
        batch_id: batch.batch_id,
        size,
        trigger,
        failed_sinks,
        published,
        acked,
    }
}
