//! Connecting to the upstream broker and consuming from it.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use bon::bon;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    aggregator::{Admission, Aggregator},
    config::{BrokerConfig, ServiceConfig},
    error::{AggregatorError, AggregatorResult, SinkError},
    item::Delivery,
    sink::{Acknowledger, Notifier},
};

/// An open session with the broker.
pub struct BrokerConnection {
    /// Disposes of deliveries received over this connection.
    pub acknowledger: Arc<dyn Acknowledger>,
    /// Publishes batch-ready notifications.
    pub notifier: Arc<dyn Notifier>,
    /// Deliveries from the inbound queue. Closed when the broker goes away.
    pub deliveries: mpsc::Receiver<Delivery>,
}

impl fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConnection").finish_non_exhaustive()
    }
}

/// Opens connections to the broker.
///
/// Implementations declare the inbound and outbound queues and apply the prefetch limit from the
/// [`BrokerConfig`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// Make a single connection attempt.
    async fn connect(&self, config: &BrokerConfig) -> Result<BrokerConnection, SinkError>;
}

/// How persistently to retry connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct RetryPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) backoff: Duration,
}

#[bon]
impl RetryPolicy {
    #[allow(missing_docs)]
    #[builder]
    pub fn new(
        /// Give up after this many failed attempts. Clamped to at least 1.
        #[builder(default = 5)]
        max_attempts: u32,
        /// Wait this long between attempts.
        #[builder(default = Duration::from_secs(10))]
        backoff: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&ServiceConfig> for RetryPolicy {
    fn from(config: &ServiceConfig) -> Self {
        Self::builder()
            .max_attempts(config.connect_max_attempts)
            .backoff(config.connect_backoff)
            .build()
    }
}

/// Connect to the broker, retrying with a fixed backoff.
///
/// Returns [`AggregatorError::ConnectionFailed`] with the last error once every attempt has
/// failed.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    config: &BrokerConfig,
    policy: &RetryPolicy,
) -> AggregatorResult<BrokerConnection> {
    let max = policy.max_attempts;
    let mut attempt = 1;

    loop {
        match connector.connect(config).await {
            Ok(connection) => {
                info!("Connected to broker at {} ({attempt}/{max})", config.host);
                return Ok(connection);
            }
            Err(err) if attempt >= max => {
                error!("Broker connection attempt {attempt}/{max} failed, giving up: {err}");
                return Err(AggregatorError::ConnectionFailed {
                    attempts: attempt,
                    source: err,
                });
            }
            Err(err) => {
                warn!(
                    "Broker connection attempt {attempt}/{max} failed, retrying in {:?}: {err}",
                    policy.backoff
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Counts from a finished consume loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ConsumeSummary {
    /// Deliveries added to a batch.
    pub admitted: u64,
    /// Deliveries rejected and requeued.
    pub malformed: u64,
}

/// Admit deliveries one at a time until the broker closes the stream.
///
/// Malformed deliveries have already been requeued by [`Aggregator::admit()`] and don't stop the
/// loop. Any other error does.
pub async fn run_consumer(
    aggregator: &Aggregator,
    mut deliveries: mpsc::Receiver<Delivery>,
) -> AggregatorResult<ConsumeSummary> {
    let mut summary = ConsumeSummary::default();

    while let Some(delivery) = deliveries.recv().await {
        match aggregator.admit(delivery).await {
            Ok(Admission::Pending { .. }) => summary.admitted += 1,
            Ok(Admission::Flushed(receipt)) => {
                summary.admitted += 1;
                tracing::debug!("Batch of {} items handed over for flushing", receipt.size());
            }
            Err(AggregatorError::Malformed(_)) => summary.malformed += 1,
            Err(err) => return Err(err),
        }
    }

    info!(
        "Delivery stream closed after {} items ({} malformed)",
        summary.admitted, summary.malformed
    );
    Ok(summary)
}
