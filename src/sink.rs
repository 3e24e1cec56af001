//! Adapters for the systems around the aggregator.
//!
//! The broker side is split into [`Acknowledger`] (disposing of deliveries) and [`Notifier`]
//! (announcing finished batches). Everything else a finished batch is written to is a
//! [`BatchSink`]: best-effort, independently failing, and skipped when disabled.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    batch::{Batch, BatchReady},
    error::SinkError,
    item::DeliveryTag,
};

/// How long batch records are kept in the metadata cache.
pub const METADATA_TTL: Duration = Duration::from_secs(3600);

/// Disposes of deliveries with the upstream broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// The delivery has been fully handled and can be forgotten by the broker.
    async fn ack(&self, tag: DeliveryTag) -> Result<(), SinkError>;

    /// The delivery could not be handled and should be redelivered.
    async fn requeue(&self, tag: DeliveryTag) -> Result<(), SinkError>;
}

/// Announces finished batches downstream.
///
/// Items in a batch are only acknowledged once this succeeds.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish a batch-ready notification.
    async fn publish(&self, ready: &BatchReady) -> Result<(), SinkError>;
}

/// A key-value store with expiry.
#[async_trait]
pub trait MetadataCache: Send + Sync {
    /// Store `value` under `key` for `ttl`.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), SinkError>;
}

/// Durable object storage, addressed by path within the namespace.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `content` to `path`, replacing anything already there.
    async fn put(&self, path: &str, content: Vec<u8>) -> Result<(), SinkError>;

    /// Whether an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, SinkError>;
}

/// Somewhere a finished batch is written to before it is announced.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Disabled sinks are skipped entirely.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Write the batch.
    async fn store(&self, batch: &Batch) -> Result<(), SinkError>;
}

/// Stores batch records in a [`MetadataCache`], keyed by batch ID.
#[derive(Clone)]
pub struct CacheSink {
    cache: Option<Arc<dyn MetadataCache>>,
}

impl CacheSink {
    /// Write to `cache`, if there is one.
    pub fn new(cache: Option<Arc<dyn MetadataCache>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl BatchSink for CacheSink {
    fn name(&self) -> &'static str {
        "metadata_cache"
    }

    fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    async fn store(&self, batch: &Batch) -> Result<(), SinkError> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        cache
            .put(&batch.batch_id.to_string(), batch.to_json()?, METADATA_TTL)
            .await
    }
}

/// Stores batch records in an [`ObjectStore`] at `batches/{batch_id}.json`.
#[derive(Clone)]
pub struct ObjectStoreSink {
    store: Option<Arc<dyn ObjectStore>>,
}

impl ObjectStoreSink {
    /// Write to `store`, if there is one.
    pub fn new(store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BatchSink for ObjectStoreSink {
    fn name(&self) -> &'static str {
        "object_store"
    }

    fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    async fn store(&self, batch: &Batch) -> Result<(), SinkError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let path = batch.batch_id.object_path();
        store.put(&path, batch.to_json()?.into_bytes()).await?;
        tracing::info!("Stored batch metadata at {path}");
        Ok(())
    }
}
