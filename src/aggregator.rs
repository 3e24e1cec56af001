use std::{fmt, sync::Arc};

use bon::bon;
use tokio::sync::{mpsc, oneshot};

use crate::{
    admission::AdmissionGate,
    config::AggregatorConfig,
    error::AggregatorResult,
    flush::{FlushReceipt, Outputs},
    item::Delivery,
    metrics::Metrics,
    sink::{Acknowledger, BatchSink, Notifier, ObjectStore},
    worker::{Admit, Message, Worker, WorkerDropGuard, WorkerHandle},
};

/// Collects deliveries into batches.
///
/// Deliveries are decoded and sent to a background worker task which appends them to the pending
/// batch. The batch is flushed when it reaches the configured size, when it times out, or when
/// [`Aggregator::flush()`] is called. Flushing stores the batch in every enabled [`BatchSink`],
/// publishes a notification, and only then acknowledges the items.
///
/// Cheap to clone. Cloned instances share the same background worker task.
///
/// ## Drop
///
/// When the last instance of an `Aggregator` is dropped, the worker task will be aborted
/// (ungracefully shut down) and any pending items are left unacknowledged.
///
/// If you want to shut down the worker gracefully, call [`WorkerHandle::shut_down()`].
pub struct Aggregator {
    gate: Arc<AdmissionGate>,
    metrics: Metrics,
    worker: Arc<WorkerHandle>,
    worker_guard: Arc<WorkerDropGuard>,
    item_tx: mpsc::Sender<Admit>,
    msg_tx: mpsc::Sender<Message>,
}

/// What happened to an admitted delivery.
#[derive(Debug)]
pub enum Admission {
    /// Added to the pending batch.
    Pending {
        /// Items in the batch, including this one.
        pending: usize,
    },
    /// Added to the pending batch, which was then full and has been handed over for flushing.
    Flushed(FlushReceipt),
}

#[bon]
impl Aggregator {
    /// Create a new aggregator and start its worker.
    ///
    /// Must be called from within a Tokio runtime.
    #[builder]
    pub fn new(
        /// Flush thresholds and namespace.
        #[builder(default)]
        config: AggregatorConfig,
        /// Acknowledges flushed items and requeues malformed ones.
        acknowledger: Arc<dyn Acknowledger>,
        /// Announces flushed batches.
        notifier: Arc<dyn Notifier>,
        /// Where flushed batches are stored, in order. Disabled sinks are skipped.
        #[builder(default)]
        sinks: Vec<Arc<dyn BatchSink>>,
        /// Used to check that objects referenced by items exist.
        object_store: Option<Arc<dyn ObjectStore>>,
        /// Where to record metrics.
        metrics: Metrics,
    ) -> Self {
        let gate = AdmissionGate {
            acknowledger: Arc::clone(&acknowledger),
            object_store,
            object_ref_fields: config.object_ref_fields.clone(),
            namespace: config.namespace.clone(),
            metrics: metrics.clone(),
        };

        let outputs = Outputs {
            sinks,
            notifier,
            acknowledger,
            metrics: metrics.clone(),
        };

        let (handle, worker_guard, channels) = Worker::spawn(config, outputs);

        Self {
            gate: Arc::new(gate),
            metrics,
            worker: Arc::new(handle),
            worker_guard: Arc::new(worker_guard),
            item_tx: channels.item_tx,
            msg_tx: channels.msg_tx,
        }
    }

    /// Decode a delivery and add it to the pending batch.
    ///
    /// A malformed delivery is requeued with the broker and an [`AggregatorError::Malformed`] error
    /// is returned. The aggregator keeps running.
    ///
    /// [`AggregatorError::Malformed`]: crate::AggregatorError::Malformed
    pub async fn admit(&self, delivery: Delivery) -> AggregatorResult<Admission> {
        let item = self.gate.accept(delivery).await?;

        let (tx, rx) = oneshot::channel();
        self.item_tx.send(Admit { item, tx }).await?;

        rx.await?
    }

    /// Flush the pending batch now.
    ///
    /// Returns `None` if there was nothing to flush.
    pub async fn flush(&self) -> AggregatorResult<Option<FlushReceipt>> {
        let (tx, rx) = oneshot::channel();
        self.msg_tx.send(Message::Flush(tx)).await?;

        rx.await?
    }

    /// How many items are waiting in the pending batch.
    pub fn pending(&self) -> usize {
        self.metrics.queue_depth.get().max(0) as usize
    }

    /// The metrics this aggregator records to.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get a handle to the worker.
    pub fn worker_handle(&self) -> Arc<WorkerHandle> {
        Arc::clone(&self.worker)
    }
}

impl Clone for Aggregator {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            metrics: self.metrics.clone(),
            worker: self.worker.clone(),
            worker_guard: self.worker_guard.clone(),
            item_tx: self.item_tx.clone(),
            msg_tx: self.msg_tx.clone(),
        }
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("gate", &self.gate)
            .field("metrics", &self.metrics)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}
