//! Raw messages as delivered by the transport adapters, before decoding.

use std::time::SystemTime;

/// A message received from the pub/sub bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: Vec<u8>,
    /// Time of receipt; the pub/sub bus does not stamp messages itself.
    pub timestamp: SystemTime,
}

impl PubSubMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            timestamp: SystemTime::now(),
        }
    }
}

/// A record consumed from the partitioned log bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    /// Broker or producer timestamp, when the record carries one.
    pub timestamp: Option<SystemTime>,
}
