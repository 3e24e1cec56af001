//! Errors.

use thiserror::Error;
use tokio::sync::{mpsc::error::SendError, oneshot::error::RecvError};

/// An error that occurred while aggregating.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AggregatorError {
    /// The delivery could not be decoded into an item. It has been requeued with the broker.
    ///
    /// Recoverable.
    #[error("Malformed item requeued")]
    Malformed(#[source] MalformedItem),

    /// Something went wrong while submitting a message to the worker.
    ///
    /// Unrecoverable.
    #[error("Unable to send message to the aggregation worker: channel closed")]
    Tx,

    /// Something went wrong while waiting for a reply from the worker or the flush task.
    ///
    /// Unrecoverable.
    #[error("Error while waiting for the aggregation worker: channel closed. {0}")]
    Rx(#[from] RecvError),

    /// The upstream broker could not be reached within the retry budget.
    #[error("Unable to connect to the broker after {attempts} attempts")]
    ConnectionFailed {
        /// How many connection attempts were made.
        attempts: u32,
        /// The error from the last attempt.
        #[source]
        source: SinkError,
    },

    /// The configuration could not be loaded.
    #[error("Invalid configuration")]
    Config(#[from] ConfigError),
}

/// Why a delivery was rejected by the admission path.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MalformedItem {
    /// The body is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// The body is JSON, but not an object.
    #[error("payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// A failure reported by an external adapter (broker, cache, object store).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SinkError {
    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A record could not be serialised.
    #[error("Unable to serialise record")]
    Serialize(#[from] serde_json::Error),

    /// The adapter is not reachable or refused the operation.
    #[error("{0}")]
    Unavailable(String),
}

/// A configuration value is invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The value could not be parsed.
    #[error("{key}: expected {expected}, got {value:?}")]
    Invalid {
        /// The environment key.
        key: &'static str,
        /// What was expected.
        expected: &'static str,
        /// The value found.
        value: String,
    },
}

/// Result type for aggregator operations.
pub type AggregatorResult<T> = std::result::Result<T, AggregatorError>;

impl<T> From<SendError<T>> for AggregatorError {
    fn from(_tx_err: SendError<T>) -> Self {
        AggregatorError::Tx
    }
}

impl From<MalformedItem> for AggregatorError {
    fn from(err: MalformedItem) -> Self {
        AggregatorError::Malformed(err)
    }
}

impl SinkError {
    /// Shorthand for an [`SinkError::Unavailable`] error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        SinkError::Unavailable(msg.into())
    }
}
