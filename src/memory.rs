//! In-process adapters.
//!
//! Useful for tests and local runs. Clones share state, so a clone can be handed to the aggregator
//! and the first one kept for inspection.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, time::Instant};

use crate::{
    batch::BatchReady,
    broker::BrokerConnection,
    error::SinkError,
    item::{Delivery, DeliveryTag},
    sink::{Acknowledger, MetadataCache, Notifier, ObjectStore},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct BrokerLog {
    acked: Vec<u64>,
    requeued: Vec<u64>,
    published: Vec<BatchReady>,
}

/// Records acknowledgements, requeues and notifications.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    log: Arc<Mutex<BrokerLog>>,
    fail_publishes: Arc<AtomicBool>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::Release);
    }

    /// Acknowledged tags, in the order they were acknowledged.
    pub fn acked(&self) -> Vec<u64> {
        lock(&self.log).acked.clone()
    }

    /// Requeued tags, in the order they were requeued.
    pub fn requeued(&self) -> Vec<u64> {
        lock(&self.log).requeued.clone()
    }

    /// Published notifications, in order.
    pub fn published(&self) -> Vec<BatchReady> {
        lock(&self.log).published.clone()
    }

    /// A connection which acknowledges and publishes through this broker.
    pub fn connection(&self, deliveries: mpsc::Receiver<Delivery>) -> BrokerConnection {
        BrokerConnection {
            acknowledger: Arc::new(self.clone()),
            notifier: Arc::new(self.clone()),
            deliveries,
        }
    }
}

#[async_trait]
impl Acknowledger for MemoryBroker {
    async fn ack(&self, tag: DeliveryTag) -> Result<(), SinkError> {
        lock(&self.log).acked.push(tag.value());
        Ok(())
    }

    async fn requeue(&self, tag: DeliveryTag) -> Result<(), SinkError> {
        lock(&self.log).requeued.push(tag.value());
        Ok(())
    }
}

#[async_trait]
impl Notifier for MemoryBroker {
    async fn publish(&self, ready: &BatchReady) -> Result<(), SinkError> {
        if self.fail_publishes.load(Ordering::Acquire) {
            return Err(SinkError::unavailable("publishing is disabled"));
        }
        lock(&self.log).published.push(ready.clone());
        Ok(())
    }
}

/// A key-value cache with per-entry expiry.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The value stored under `key`, unless it has expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl MetadataCache for MemoryCache {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), SinkError> {
        let expires_at = Instant::now() + ttl;
        let mut entries = lock(&self.entries);
        entries.retain(|_, (_, at)| *at > Instant::now());
        entries.insert(key.to_string(), (value, expires_at));
        Ok(())
    }
}

/// Objects held in memory, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail: Arc<AtomicBool>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following operation fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }

    /// Add an object directly.
    pub fn insert(&self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        lock(&self.objects).insert(path.into(), content.into());
    }

    /// The object at `path`, if any.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(path).cloned()
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = lock(&self.objects).keys().cloned().collect();
        paths.sort();
        paths
    }

    fn check(&self) -> Result<(), SinkError> {
        if self.fail.load(Ordering::Acquire) {
            Err(SinkError::unavailable("object store is unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, path: &str, content: Vec<u8>) -> Result<(), SinkError> {
        self.check()?;
        lock(&self.objects).insert(path.to_string(), content);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, SinkError> {
        self.check()?;
        Ok(lock(&self.objects).contains_key(path))
    }
}
