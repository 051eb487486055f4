mod event_bus_backend;
mod in_memory;

#[cfg(feature = "kafka")]
pub mod kafka_backend;
#[cfg(feature = "redis")]
pub mod redis_backend;

pub use event_bus_backend::{LogBackend, PubSubBackend, Subscription, SubscriptionGuard};
pub use in_memory::{InMemoryLog, InMemoryPubSub, DEFAULT_LOG_RETENTION};

#[cfg(feature = "kafka")]
pub use kafka_backend::KafkaLogBackend;
#[cfg(feature = "redis")]
pub use redis_backend::RedisPubSubBackend;
