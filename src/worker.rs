use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info};

use crate::{
    aggregator::Admission,
    batch::{DrainedBatch, FlushTrigger},
    batch_state::BatchState,
    config::AggregatorConfig,
    error::{AggregatorError, AggregatorResult},
    flush::{FlushCoordinator, FlushJob, FlushReceipt, Outputs},
    item::Item,
    metrics::Metrics,
    monitor::TimeoutMonitor,
};

/// Admissions queued for the worker before callers start waiting on each other.
const MAX_ITEM_BUFFER: usize = 1024;

/// Owns the pending batch. Every change to it happens here, one message at a time.
pub(crate) struct Worker {
    config: AggregatorConfig,

    /// Used to receive new items.
    item_rx: mpsc::Receiver<Admit>,
    /// Receives flush requests, from the timeout monitor and from callers.
    msg_rx: mpsc::Receiver<Message>,

    /// Used to send messages to the worker related to shutdown.
    shutdown_rx: mpsc::Receiver<ShutdownMessage>,
    /// Used to signal to listeners that the worker has shut down.
    shutdown_notifiers: Vec<oneshot::Sender<()>>,

    state: BatchState,
    metrics: Metrics,

    /// Hands drained batches to the flush task. `None` once shut down.
    flush_tx: Option<mpsc::UnboundedSender<FlushJob>>,
    flush_handle: Option<JoinHandle<()>>,

    monitor: TimeoutMonitor,
}

pub(crate) struct Admit {
    pub item: Item,
    pub tx: oneshot::Sender<AggregatorResult<Admission>>,
}

#[derive(Debug)]
pub(crate) enum Message {
    CheckTimeout,
    Flush(oneshot::Sender<AggregatorResult<Option<FlushReceipt>>>),
}

pub(crate) enum ShutdownMessage {
    Register(ShutdownNotifier),
    ShutDown,
}

pub(crate) struct ShutdownNotifier(oneshot::Sender<()>);

/// A handle to the worker task.
///
/// Used for shutting down the worker and waiting for it to finish.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<ShutdownMessage>,
}

/// Aborts the worker task when dropped.
#[derive(Debug)]
pub(crate) struct WorkerDropGuard {
    handle: JoinHandle<()>,
}

pub(crate) struct Channels {
    pub item_tx: mpsc::Sender<Admit>,
    pub msg_tx: mpsc::Sender<Message>,
}

impl Worker {
    pub fn spawn(
        config: AggregatorConfig,
        outputs: Outputs,
    ) -> (WorkerHandle, WorkerDropGuard, Channels) {
        let (item_tx, item_rx) = mpsc::channel(config.batch_size.min(MAX_ITEM_BUFFER));
        let (msg_tx, msg_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let metrics = outputs.metrics.clone();
        let (flush_tx, flush_handle) = FlushCoordinator::spawn(config.namespace.clone(), outputs);
        let monitor = TimeoutMonitor::spawn(config.check_interval, msg_tx.clone());

        let worker = Worker {
            state: BatchState::new(),
            config,

            item_rx,
            msg_rx,

            shutdown_rx,
            shutdown_notifiers: Vec::new(),

            metrics,

            flush_tx: Some(flush_tx),
            flush_handle: Some(flush_handle),

            monitor,
        };

        let handle = tokio::spawn(worker.run());

        (
            WorkerHandle { shutdown_tx },
            WorkerDropGuard { handle },
            Channels { item_tx, msg_tx },
        )
    }

    /// Append an item, flushing if the batch is now full.
    fn add(&mut self, Admit { item, tx }: Admit) {
        let pending = self.push(item);

        let reply = if self.state.is_full(self.config.batch_size) {
            self.flush(FlushTrigger::Size)
                .map(|receipt| receipt.map_or(Admission::Pending { pending }, Admission::Flushed))
        } else {
            Ok(Admission::Pending { pending })
        };

        if tx.send(reply).is_err() {
            // Whatever was waiting must have gone away. The item is still in the batch, so it will
            // be flushed and acknowledged as normal.
            debug!("Unable to send admission reply. Receiver deallocated.");
        }
    }

    fn push(&mut self, item: Item) -> usize {
        let pending = self.state.push(item);
        self.metrics.queue_depth.set(pending as i64);
        pending
    }

    fn on_check_timeout(&mut self) {
        if self.state.is_timed_out(self.config.batch_timeout) {
            if let Err(err) = self.flush(FlushTrigger::Timeout) {
                error!("Timed out batch could not be flushed: {err}");
            }
        }
    }

    /// Drain the batch, if there is anything in it, and hand it to the flush task.
    fn flush(&mut self, trigger: FlushTrigger) -> AggregatorResult<Option<FlushReceipt>> {
        let Some(drained) = self.state.drain(trigger) else {
            return Ok(None);
        };
        self.metrics.queue_depth.set(0);

        self.dispatch(drained).map(Some)
    }

    fn dispatch(&self, drained: DrainedBatch) -> AggregatorResult<FlushReceipt> {
        let size = drained.items.len();
        let (job, receipt) = FlushJob::new(drained);

        let Some(flush_tx) = &self.flush_tx else {
            return Err(AggregatorError::Tx);
        };
        if flush_tx.send(job).is_err() {
            error!("The flush task has stopped, {size} drained items will not be flushed");
            return Err(AggregatorError::Tx);
        }

        Ok(receipt)
    }

    /// Flush whatever is pending and wait for every flush to complete.
    async fn shut_down(&mut self) {
        info!("Aggregation worker is shutting down");

        self.monitor.stop();

        // Items already submitted are still part of this run.
        self.item_rx.close();
        while let Ok(admit) = self.item_rx.try_recv() {
            self.add(admit);
        }

        match self.flush(FlushTrigger::Shutdown) {
            Ok(Some(receipt)) => info!("Flushing {} pending items", receipt.size()),
            Ok(None) => {}
            Err(err) => error!("Final batch could not be flushed: {err}"),
        }

        // Closing the channel lets the flush task finish its backlog and exit.
        self.flush_tx = None;
        if let Some(handle) = self.flush_handle.take() {
            if let Err(err) = handle.await {
                error!("Flush task did not complete: {err}");
            }
        }

        info!("Aggregation worker has shut down");
    }

    /// Start running the worker event loop.
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(msg) = self.shutdown_rx.recv() => {
                    match msg {
                        ShutdownMessage::Register(notifier) => {
                            self.shutdown_notifiers.push(notifier.0);
                        }
                        ShutdownMessage::ShutDown => {
                            break;
                        }
                    }
                }

                Some(admit) = self.item_rx.recv() => {
                    self.add(admit);
                }

                Some(msg) = self.msg_rx.recv() => {
                    match msg {
                        Message::CheckTimeout => {
                            self.on_check_timeout();
                        }
                        Message::Flush(tx) => {
                            if tx.send(self.flush(FlushTrigger::Manual)).is_err() {
                                debug!("Unable to send flush reply. Receiver deallocated.");
                            }
                        }
                    }
                }

                else => break,
            }
        }

        self.shut_down().await;
        // Dropping `self` drops the shutdown notifiers, waking anyone waiting.
    }
}

impl WorkerHandle {
    /// Signal the worker to flush any pending items and shut down.
    ///
    /// Items submitted before this call are included in the final batch. The worker exits once
    /// every drained batch has been flushed.
    pub async fn shut_down(&self) {
        // We ignore errors here - if the receiver has gone away, the worker is already shut down.
        let _ = self.shutdown_tx.send(ShutdownMessage::ShutDown).await;
    }

    /// Wait for the worker to finish.
    pub async fn wait_for_shutdown(&self) {
        // We ignore errors here - if the receiver has gone away, the worker is already shut down.
        let (notifier_tx, notifier_rx) = oneshot::channel();
        let _ = self
            .shutdown_tx
            .send(ShutdownMessage::Register(ShutdownNotifier(notifier_tx)))
            .await;
        // Wait for the notifier to be dropped.
        let _ = notifier_rx.await;
    }
}

impl Drop for WorkerDropGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
