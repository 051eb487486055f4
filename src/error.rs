use std::fmt;

use thiserror::Error;

use crate::errors::BusErrorKind;

/// Names one of the two backing transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// The key/value pub/sub bus (Redis).
    PubSub,
    /// The partitioned log bus (Kafka).
    Log,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::PubSub => "pubsub",
            Transport::Log => "log",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a transport adapter.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Timeout error")]
    Timeout,
}

/// Errors that can occur in the event bus relay
#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Serialization error: {0}")]
    Encoding(String),

    #[error("Invalid channel key: {0}")]
    InvalidChannel(String),

    #[error("Publish to pub/sub bus failed: {0}")]
    PrimaryPublish(#[source] BackendError),

    #[error("Publish to log bus failed: {0}")]
    SecondaryPublish(#[source] BackendError),

    #[error("Subscribe on {transport} failed: {source}")]
    Subscribe {
        transport: Transport,
        #[source]
        source: BackendError,
    },

    #[error("Failed to decode {transport} message: {message}")]
    Decode {
        transport: Transport,
        message: String,
    },

    #[error("Write to client failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[source] BackendError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EventBusError {
    pub fn subscribe(transport: Transport, source: BackendError) -> Self {
        EventBusError::Subscribe { transport, source }
    }

    /// The reporting category for this error.
    pub fn kind(&self) -> BusErrorKind {
        match self {
            EventBusError::Encoding(_) => BusErrorKind::Serialization,
            EventBusError::InvalidChannel(_) | EventBusError::Config(_) => {
                BusErrorKind::InvalidConfig
            }
            EventBusError::PrimaryPublish(_) | EventBusError::SecondaryPublish(_) => {
                BusErrorKind::DeliveryFailure
            }
            EventBusError::Subscribe { .. } | EventBusError::Connection(_) => {
                BusErrorKind::SubscribeFailure
            }
            EventBusError::Decode { .. } => BusErrorKind::Decode,
            EventBusError::Write(_) => BusErrorKind::WriteFailure,
        }
    }
}

impl From<serde_json::Error> for EventBusError {
    fn from(error: serde_json::Error) -> Self {
        EventBusError::Encoding(error.to_string())
    }
}
