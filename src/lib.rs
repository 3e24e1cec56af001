//! Aggregate individually-acknowledged messages into batches.
//!
//! Messages arrive one at a time from a broker. Each one is decoded and added to a pending batch,
//! which is flushed when it reaches a configured size or when it has been pending for too long,
//! whichever comes first.
//!
//! A worker task owns the pending batch. Admissions, timeout checks and flush requests are all
//! messages to that worker, so no two flushes can ever take the same items. Flushed batches are
//! handed to a separate flush task which stores them, publishes a notification, and only then
//! acknowledges every item with the broker. Delivery is at-least-once: an item is never
//! acknowledged before the batch containing it has been announced.
//!
//! The systems around the aggregator (broker, metadata cache, object store) are traits. In-memory
//! and filesystem implementations are included, along with a broker that reads JSON lines.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use batch_aggregator::{
//!     memory::MemoryBroker, Aggregator, AggregatorConfig, Delivery, DeliveryTag, Metrics,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = MemoryBroker::new();
//! let aggregator = Aggregator::builder()
//!     .config(AggregatorConfig::builder().batch_size(3).build())
//!     .acknowledger(Arc::new(broker.clone()))
//!     .notifier(Arc::new(broker.clone()))
//!     .metrics(Metrics::new()?)
//!     .build();
//!
//! aggregator
//!     .admit(Delivery::new(r#"{"video_path": "a.mp4"}"#, DeliveryTag::new(1)))
//!     .await?;
//!
//! let worker = aggregator.worker_handle();
//! worker.shut_down().await;
//! worker.wait_for_shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

mod admission;
mod aggregator;
mod batch;
mod batch_state;
pub mod broker;
mod config;
pub mod error;
mod flush;
mod fs;
mod item;
pub mod line_broker;
pub mod memory;
mod metrics;
mod monitor;
pub mod server;
pub mod sink;
mod worker;

pub use aggregator::{Admission, Aggregator};
pub use batch::{Batch, BatchId, BatchReady, FlushTrigger};
pub use config::{AggregatorConfig, BrokerConfig, ServiceConfig};
pub use error::{AggregatorError, AggregatorResult};
pub use flush::{FlushReceipt, FlushReport};
pub use fs::FsObjectStore;
pub use item::{Delivery, DeliveryTag};
pub use metrics::Metrics;
pub use worker::WorkerHandle;
