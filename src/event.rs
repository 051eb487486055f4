//! Defines the relayed [`Event`], the [`ChannelKey`] it is addressed by and the
//! [`BusEvent`] trait for publishable payloads.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::EventBusError;

/// Marker trait for payloads that can be published through the event bus
///
/// Anything serializable qualifies; the relay never inspects the payload shape.
pub trait BusEvent: Serialize + Send + Sync {}

// Automatically implement BusEvent for any type that meets the requirements
impl<T> BusEvent for T where T: Serialize + Send + Sync + ?Sized {}

const MAX_CHANNEL_KEY_LEN: usize = 249;

/// Names both the pub/sub channel and the log topic of one logical stream.
///
/// Kafka topic naming rules apply since the key doubles as a topic name:
/// ASCII alphanumerics, `.`, `_` and `-`, at most 249 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(key: impl Into<String>) -> Result<Self, EventBusError> {
        let key = key.into();
        if key.is_empty() {
            return Err(EventBusError::InvalidChannel(
                "channel key must not be empty".to_string(),
            ));
        }
        if key.len() > MAX_CHANNEL_KEY_LEN {
            return Err(EventBusError::InvalidChannel(format!(
                "channel key exceeds {MAX_CHANNEL_KEY_LEN} characters"
            )));
        }
        if key == "." || key == ".." {
            return Err(EventBusError::InvalidChannel(format!(
                "'{key}' is not a valid channel key"
            )));
        }
        if let Some(bad) = key
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(EventBusError::InvalidChannel(format!(
                "channel key '{key}' contains illegal character {bad:?}"
            )));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One element of a session's event stream.
///
/// The synthetic open event carries no payload; every other event carries a
/// decoded backend message. On the wire an object payload is flattened next to
/// the `id` field (`{"id":"room1","temp":42}`), anything else is nested under
/// `payload` (`{"id":"room1","payload":null}`). An object that has its own
/// `payload` key is nested too, so only the open event encodes as
/// `{"id":..,"payload":null}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: String,
    payload: Option<Value>,
}

impl Event {
    /// The synthetic event that confirms both subscriptions are established.
    pub fn opened(channel: &ChannelKey) -> Self {
        Self {
            id: channel.as_str().to_string(),
            payload: None,
        }
    }

    pub fn new(channel: &ChannelKey, payload: Value) -> Self {
        Self {
            id: channel.as_str().to_string(),
            payload: Some(payload),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn is_opened(&self) -> bool {
        self.payload.is_none()
    }

    pub fn into_payload(self) -> Option<Value> {
        self.payload
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.payload {
            Some(Value::Object(fields)) if !fields.contains_key("payload") => {
                let len = 1 + fields.keys().filter(|k| k.as_str() != "id").count();
                let mut map = serializer.serialize_map(Some(len))?;
                map.serialize_entry("id", &self.id)?;
                for (key, value) in fields.iter().filter(|(k, _)| k.as_str() != "id") {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            other => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("id", &self.id)?;
                map.serialize_entry("payload", other)?;
                map.end()
            }
        }
    }
}
