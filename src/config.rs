use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use bon::bon;

use crate::error::ConfigError;

/// Controls when batches are flushed and where they are published.
///
/// A batch is flushed when it reaches `batch_size` items, or when it has been at least
/// `batch_timeout` since the previous flush (checked every `check_interval`), whichever comes first.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AggregatorConfig {
    pub(crate) batch_size: usize,
    pub(crate) batch_timeout: Duration,
    pub(crate) check_interval: Duration,
    pub(crate) namespace: String,
    pub(crate) object_ref_fields: Vec<String>,
}

#[bon]
impl AggregatorConfig {
    #[allow(missing_docs)]
    #[builder]
    pub fn new(
        /// Flush as soon as this many items are pending. Clamped to at least 1.
        #[builder(default = 50)]
        batch_size: usize,
        /// Flush pending items this long after the previous flush.
        #[builder(default = Duration::from_secs(2))]
        batch_timeout: Duration,
        /// How often the timeout monitor checks for expired batches.
        #[builder(default = Duration::from_secs(1))]
        check_interval: Duration,
        /// The logical namespace (e.g. bucket) batches belong to.
        #[builder(into, default = "vid-transcode".to_string())]
        namespace: String,
        /// Payload fields which may hold a `gs://` object reference, in priority order.
        object_ref_fields: Option<Vec<String>>,
    ) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batch_timeout,
            check_interval,
            namespace,
            object_ref_fields: object_ref_fields
                .unwrap_or_else(|| vec!["gcs_uri".to_string(), "video_path".to_string()]),
        }
    }
}

impl AggregatorConfig {
    /// Load the configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let batch_size: usize = positive(&lookup, "BATCH_SIZE", 50)?;
        let timeout_secs: u64 = positive(&lookup, "BATCH_TIMEOUT_SECONDS", 2)?;
        let check_ms: u64 = positive(&lookup, "BATCH_CHECK_INTERVAL_MS", 1000)?;
        let namespace = lookup("BATCH_NAMESPACE")
            .or_else(|| lookup("GCS_BUCKET_NAME"))
            .unwrap_or_else(|| "vid-transcode".to_string());

        Ok(Self::builder()
            .batch_size(batch_size)
            .batch_timeout(Duration::from_secs(timeout_secs))
            .check_interval(Duration::from_millis(check_ms))
            .namespace(namespace)
            .build())
    }

    /// The count threshold.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The time threshold.
    pub fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    /// The namespace batches are published under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Display for AggregatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch_size: {}, batch_timeout: {:?}, check_interval: {:?}, namespace: {}",
            self.batch_size, self.batch_timeout, self.check_interval, self.namespace
        )
    }
}

/// Where and how to reach the upstream broker.
#[derive(Clone)]
#[non_exhaustive]
pub struct BrokerConfig {
    /// Broker host.
    pub host: String,
    /// Broker user.
    pub user: String,
    /// Broker password. Redacted from `Debug` output.
    pub password: String,
    /// Queue which items are consumed from.
    pub inbound_queue: String,
    /// Queue which batch-ready notifications are published to.
    pub outbound_queue: String,
    /// Declare queues as durable and publish persistent messages.
    pub durable: bool,
    /// How many unacknowledged deliveries the broker may push at once.
    pub prefetch: u16,
}

impl BrokerConfig {
    /// Load the broker configuration from the environment.
    ///
    /// The default prefetch is twice the batch size, so a full batch can be pending while the
    /// next one fills.
    pub fn from_env(batch_size: usize) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), batch_size)
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>, batch_size: usize) -> Self {
        Self {
            host: lookup("RABBITMQ_HOST").unwrap_or_else(|| "rabbitmq-service".to_string()),
            user: lookup("RABBITMQ_USER").unwrap_or_else(|| "guest".to_string()),
            password: lookup("RABBITMQ_PASS").unwrap_or_else(|| "guest".to_string()),
            inbound_queue: lookup("INBOUND_QUEUE").unwrap_or_else(|| "video-compression".to_string()),
            outbound_queue: lookup("OUTBOUND_QUEUE").unwrap_or_else(|| "video-batches".to_string()),
            durable: true,
            prefetch: u16::try_from(batch_size.saturating_mul(2)).unwrap_or(u16::MAX),
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("inbound_queue", &self.inbound_queue)
            .field("outbound_queue", &self.outbound_queue)
            .field("durable", &self.durable)
            .field("prefetch", &self.prefetch)
            .finish()
    }
}

/// Settings for the process around the engine: adapters, retries and the metrics endpoint.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ServiceConfig {
    /// Root directory of the filesystem object store.
    pub local_cache_path: PathBuf,
    /// Persist batch records to the object store and check object references on admission.
    pub object_store_enabled: bool,
    /// Keep batch records in the metadata cache.
    pub metadata_cache_enabled: bool,
    /// Port for `/metrics` and `/health`.
    pub metrics_port: u16,
    /// Connection attempts before giving up.
    pub connect_max_attempts: u32,
    /// Fixed delay between connection attempts.
    pub connect_backoff: Duration,
}

impl ServiceConfig {
    /// Load the service configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            local_cache_path: lookup("LOCAL_CACHE_PATH")
                .unwrap_or_else(|| "/cache".to_string())
                .into(),
            object_store_enabled: flag(&lookup, "OBJECT_STORE_ENABLED", true)?,
            metadata_cache_enabled: flag(&lookup, "METADATA_CACHE_ENABLED", true)?,
            metrics_port: positive(&lookup, "METRICS_PORT", 8080)?,
            connect_max_attempts: positive(&lookup, "CONNECT_MAX_ATTEMPTS", 5)?,
            connect_backoff: Duration::from_secs(parse(&lookup, "CONNECT_BACKOFF_SECONDS", 10)?),
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            expected: "a number",
            value,
        }),
    }
}

fn positive<T: FromStr + PartialEq + Default>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let value = parse(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            expected: "a positive number",
            value: "0".to_string(),
        });
    }
    Ok(value)
}

fn flag(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if v == "1" || v == "true" || v == "yes" => Ok(true),
        Some(v) if v == "0" || v == "false" || v == "no" => Ok(false),
        Some(value) => Err(ConfigError::Invalid {
            key,
            expected: "a boolean",
            value,
        }),
    }
}
