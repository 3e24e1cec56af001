//! A broker speaking newline-delimited JSON over a pair of byte streams.
//!
//! Each non-empty input line is one delivery, tagged from 1 upwards. Batch-ready notifications are
//! written to the output, one JSON object per line. There is no redelivery: requeued and
//! unacknowledged deliveries are only logged.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::{self, mpsc},
};
use tracing::{debug, error, info, warn};

use crate::{
    batch::BatchReady,
    broker::{BrokerConnection, Connector},
    config::BrokerConfig,
    error::SinkError,
    item::{Delivery, DeliveryTag},
    sink::{Acknowledger, Notifier},
};

/// Connects to a [`LineBroker`] over a reader and a writer.
///
/// The streams can only be connected once.
pub struct LineConnector<R, W> {
    streams: Mutex<Option<(R, W)>>,
}

impl<R, W> LineConnector<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Read deliveries from `reader` and write notifications to `writer`.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            streams: Mutex::new(Some((reader, writer))),
        }
    }
}

#[async_trait]
impl<R, W> Connector for LineConnector<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn connect(&self, config: &BrokerConfig) -> Result<BrokerConnection, SinkError> {
        let streams = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((reader, writer)) = streams else {
            return Err(SinkError::unavailable("line broker streams already consumed"));
        };

        let broker = Arc::new(LineBroker::new(writer));
        let (delivery_tx, deliveries) = mpsc::channel(usize::from(config.prefetch.max(1)));
        tokio::spawn(read_deliveries(reader, delivery_tx, config.inbound_queue.clone()));

        Ok(BrokerConnection {
            acknowledger: Arc::clone(&broker) as Arc<dyn Acknowledger>,
            notifier: broker,
            deliveries,
        })
    }
}

async fn read_deliveries<R>(reader: R, delivery_tx: mpsc::Sender<Delivery>, queue: String)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut next_tag = 1;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let delivery = Delivery::new(line, DeliveryTag::new(next_tag));
                next_tag += 1;
                if delivery_tx.send(delivery).await.is_err() {
                    debug!("Consumer for {queue} has gone away, stopping");
                    return;
                }
            }
            Ok(None) => {
                info!("End of input on {queue} after {} deliveries", next_tag - 1);
                return;
            }
            Err(err) => {
                error!("Failed to read from {queue}: {err}");
                return;
            }
        }
    }
}

/// Acknowledges by logging, and publishes notifications as JSON lines.
pub struct LineBroker<W> {
    writer: sync::Mutex<W>,
}

impl<W> LineBroker<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn new(writer: W) -> Self {
        Self {
            writer: sync::Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W> Acknowledger for LineBroker<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn ack(&self, tag: DeliveryTag) -> Result<(), SinkError> {
        debug!("Acknowledged delivery {tag}");
        Ok(())
    }

    async fn requeue(&self, tag: DeliveryTag) -> Result<(), SinkError> {
        warn!("Delivery {tag} requeued, but line input cannot be redelivered");
        Ok(())
    }
}

#[async_trait]
impl<W> Notifier for LineBroker<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, ready: &BatchReady) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(ready)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}
