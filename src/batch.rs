use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::item::{DeliveryTag, Item};

const BATCH_ID_PREFIX: &str = "batch_";

/// Uniquely identifies a batch, e.g. `batch_1700000000000`.
///
/// Ordered by the millisecond value, so later batches always compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct BatchId(u64);

impl BatchId {
    /// The millisecond value the identifier was generated from.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The path of this batch's record in the object store.
    pub fn object_path(&self) -> String {
        format!("batches/{self}.json")
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BATCH_ID_PREFIX}{}", self.0)
    }
}

impl From<BatchId> for String {
    fn from(id: BatchId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for BatchId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.strip_prefix(BATCH_ID_PREFIX)
            .and_then(|n| n.parse().ok())
            .map(BatchId)
            .ok_or_else(|| format!("invalid batch ID: {s:?}"))
    }
}

/// Generates batch IDs from the wall clock, in milliseconds.
///
/// IDs are strictly increasing: if the clock has not moved past the previous ID (several flushes in
/// one millisecond, or the clock stepping backwards) the previous value plus one is used.
#[derive(Debug, Default)]
pub(crate) struct BatchIdGenerator {
    last: u64,
}

impl BatchIdGenerator {
    pub fn next(&mut self) -> BatchId {
        self.next_at(unix_time_ms())
    }

    fn next_at(&mut self, now_ms: u64) -> BatchId {
        let id = if now_ms > self.last {
            now_ms
        } else {
            self.last + 1
        };
        self.last = id;
        BatchId(id)
    }
}

/// What caused a batch to be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FlushTrigger {
    /// The batch reached the configured size.
    Size,
    /// The batch timeout elapsed.
    Timeout,
    /// A flush was explicitly requested.
    Manual,
    /// The aggregator is shutting down.
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timeout => "timeout",
            FlushTrigger::Manual => "manual",
            FlushTrigger::Shutdown => "shutdown",
        })
    }
}

/// A finalised, immutable batch of item payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Unique identifier.
    pub batch_id: BatchId,
    /// Item payloads, in arrival order.
    #[serde(rename = "videos")]
    pub items: Vec<Map<String, Value>>,
    /// When the batch was created, in seconds since the Unix epoch.
    pub timestamp: f64,
    /// The namespace the batch belongs to.
    #[serde(rename = "gcs_bucket")]
    pub namespace: String,
}

impl Batch {
    /// The number of items in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch has no items. Flushed batches never are.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The batch record, as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// The notification announcing this batch downstream.
    pub fn ready(&self) -> BatchReady {
        BatchReady {
            batch_id: self.batch_id,
            namespace: self.namespace.clone(),
        }
    }
}

/// Announces that a batch is ready for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReady {
    /// The batch to process.
    pub batch_id: BatchId,
    /// Where to find it.
    #[serde(rename = "gcs_bucket")]
    pub namespace: String,
}

/// Items drained from the batch state, waiting to be flushed.
#[derive(Debug)]
pub(crate) struct DrainedBatch {
    pub items: Vec<Item>,
    pub trigger: FlushTrigger,
}

impl DrainedBatch {
    /// Split into the immutable batch and the tags to acknowledge, keeping arrival order.
    pub fn finalise(
        self,
        ids: &mut BatchIdGenerator,
        namespace: &str,
    ) -> (Batch, Vec<DeliveryTag>) {
        let (items, tags) = self
            .items
            .into_iter()
            .map(|item| (item.payload, item.tag))
            .unzip();

        let batch = Batch {
            batch_id: ids.next(),
            items,
            timestamp: unix_time_secs(),
            namespace: namespace.to_string(),
        };

        (batch, tags)
    }
}

fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
