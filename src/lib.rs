//! sse_event_bus: relay Redis pub/sub channels and Kafka topics to HTTP clients
//!
//! Messages published through the [`PublishDispatcher`] go to a pub/sub bus and
//! a partitioned log bus. Each client stream opens one subscription on both,
//! merges them in a [`SubscriptionMultiplexer`] and is written out as
//! server-sent events by the [`SseEncoder`].

// Core modules
pub mod backends;
pub mod config;
mod decoder;
mod error;
mod errors;
mod event;
mod message;
mod readers;
mod session;
pub mod sse;
mod writers;

#[cfg(feature = "http")]
pub mod server;

// Re-exports
pub use backends::{
    InMemoryLog, InMemoryPubSub, LogBackend, PubSubBackend, Subscription, SubscriptionGuard,
};
pub use config::{
    KafkaConnectionConfig, LogMessagePolicy, OffsetPolicy, PublishPolicy, RedisConnectionConfig,
    RelayConfig, StreamConfig,
};
pub use decoder::{DecoderStats, PayloadDecoder};
pub use error::{BackendError, EventBusError, Transport};
pub use errors::{BusErrorCallback, BusErrorContext, BusErrorKind};
pub use event::{BusEvent, ChannelKey, Event};
pub use message::{LogMessage, PubSubMessage};
pub use readers::{EventStream, MergeExit, MergeSummary, SubscriptionMultiplexer};
pub use session::{CloseReason, SessionState, StreamSession};
pub use sse::{ChannelSink, DriveExit, SseEncoder, SseSink};
pub use writers::{PublishDispatcher, PublishReport};

// Re-export backends
#[cfg(feature = "kafka")]
pub use backends::KafkaLogBackend;
#[cfg(feature = "redis")]
pub use backends::RedisPubSubBackend;

/// Re-export common items for convenience
pub mod prelude {
    pub use crate::{
        BusErrorCallback, BusErrorContext, BusErrorKind, BusEvent, ChannelKey, Event,
        EventBusError, EventStream, InMemoryLog, InMemoryPubSub, LogBackend, PubSubBackend,
        PublishDispatcher, PublishPolicy, SessionState, SseEncoder, SseSink, StreamConfig,
        StreamSession, SubscriptionMultiplexer,
    };

    #[cfg(feature = "kafka")]
    pub use crate::KafkaLogBackend;
    #[cfg(feature = "redis")]
    pub use crate::RedisPubSubBackend;
}
