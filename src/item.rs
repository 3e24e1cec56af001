use std::fmt;

use serde_json::{Map, Value};

use crate::error::MalformedItem;

/// Identifies one delivery to the broker.
///
/// Authorises exactly one acknowledgement or requeue, so it is deliberately neither `Clone` nor
/// `Copy`: disposing of a delivery consumes its tag.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    /// Wrap a broker-assigned delivery tag.
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }

    /// The raw tag, as understood by the broker.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw message received from the broker.
#[derive(Debug)]
pub struct Delivery {
    /// The undecoded message body.
    pub body: Vec<u8>,
    /// Used to acknowledge or requeue this message.
    pub tag: DeliveryTag,
}

impl Delivery {
    /// Create a new delivery.
    pub fn new(body: impl Into<Vec<u8>>, tag: DeliveryTag) -> Self {
        Self {
            body: body.into(),
            tag,
        }
    }
}

/// A decoded delivery, ready to be batched.
#[derive(Debug)]
pub(crate) struct Item {
    pub payload: Map<String, Value>,
    pub tag: DeliveryTag,
}

/// Decode a message body into a JSON object.
pub(crate) fn decode(body: &[u8]) -> Result<Map<String, Value>, MalformedItem> {
    match serde_json::from_slice(body)? {
        Value::Object(payload) => Ok(payload),
        other => Err(MalformedItem::NotAnObject(json_kind(&other))),
    }
}

/// The object path referenced by a payload, relative to `namespace`.
///
/// Looks at each of `fields` in order and takes the first one present with a non-empty string
/// value. Only `gs://` references are considered. References into another bucket are returned
/// without the scheme.
pub(crate) fn object_ref<'a>(
    payload: &'a Map<String, Value>,
    fields: &[String],
    namespace: &str,
) -> Option<&'a str> {
    let uri = fields
        .iter()
        .find_map(|field| payload.get(field).and_then(Value::as_str).filter(|s| !s.is_empty()))?;

    let path = uri.strip_prefix("gs://")?;
    Some(
        path.strip_prefix(namespace)
            .and_then(|p| p.strip_prefix('/'))
            .unwrap_or(path),
    )
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
