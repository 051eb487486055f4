//! Configuration for the relay and its two backing transports
//!
//! Every config type follows the same builder convention: `new`/`default`
//! produce a usable value, `set_*` methods consume and return `Self`, and
//! getters borrow.

pub mod kafka;
pub mod redis;

use std::net::SocketAddr;
use std::time::Duration;

use uuid::Uuid;

use crate::EventBusError;

pub use kafka::KafkaConnectionConfig;
pub use redis::RedisConnectionConfig;

/// Where a new log-bus consumer group starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OffsetPolicy {
    /// Only records produced after the subscription is established.
    #[default]
    Latest,
    /// Replay everything the topic still retains.
    Earliest,
}

impl OffsetPolicy {
    /// Value for librdkafka's `auto.offset.reset`.
    pub fn as_reset_str(&self) -> &'static str {
        match self {
            OffsetPolicy::Latest => "latest",
            OffsetPolicy::Earliest => "earliest",
        }
    }
}

impl std::str::FromStr for OffsetPolicy {
    type Err = EventBusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "latest" | "newest" => Ok(OffsetPolicy::Latest),
            "earliest" | "oldest" => Ok(OffsetPolicy::Earliest),
            other => Err(EventBusError::Config(format!(
                "unknown offset policy '{other}' (expected latest or earliest)"
            ))),
        }
    }
}

/// What a session does with records arriving from the log bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogMessagePolicy {
    /// Decode and forward to the client exactly like pub/sub messages.
    #[default]
    Forward,
    /// Log the record and keep it off the client stream.
    Observe,
}

/// How the dispatcher treats a failed log-bus publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishPolicy {
    /// Only the pub/sub publish decides the outcome; log failures are reported.
    #[default]
    PrimaryOnly,
    /// Both publishes must succeed.
    Strict,
}

/// Per-session streaming settings.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    consumer_group: String,
    unique_group_per_session: bool,
    offset_policy: OffsetPolicy,
    log_policy: LogMessagePolicy,
    queue_capacity: usize,
    keepalive_interval: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            consumer_group: "sse_event_bus".to_string(),
            unique_group_per_session: true,
            offset_policy: OffsetPolicy::default(),
            log_policy: LogMessagePolicy::default(),
            queue_capacity: 64,
            keepalive_interval: Some(Duration::from_secs(10)),
        }
    }
}

impl StreamConfig {
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn unique_group_per_session(&self) -> bool {
        self.unique_group_per_session
    }

    pub fn offset_policy(&self) -> OffsetPolicy {
        self.offset_policy
    }

    pub fn log_policy(&self) -> LogMessagePolicy {
        self.log_policy
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_interval
    }

    /// Consumer group id to use for one session on `channel`.
    ///
    /// Sessions sharing a group would split the topic's partitions between them,
    /// so unless disabled every session gets a group of its own.
    pub fn consumer_group_for(&self, channel: &str) -> String {
        if self.unique_group_per_session {
            format!(
                "{}-{}-{}",
                self.consumer_group,
                channel,
                Uuid::new_v4().simple()
            )
        } else {
            self.consumer_group.clone()
        }
    }

    pub fn set_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    pub fn set_unique_group_per_session(mut self, unique: bool) -> Self {
        self.unique_group_per_session = unique;
        self
    }

    pub fn set_offset_policy(mut self, policy: OffsetPolicy) -> Self {
        self.offset_policy = policy;
        self
    }

    pub fn set_log_policy(mut self, policy: LogMessagePolicy) -> Self {
        self.log_policy = policy;
        self
    }

    /// Capacity of the per-session event queue. Clamped to at least one.
    pub fn set_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Idle flush interval; `None` or a zero duration disables keepalive ticks.
    pub fn set_keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval.filter(|d| !d.is_zero());
        self
    }
}

/// Top-level relay configuration used by the binary.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    bind_addr: SocketAddr,
    redis: RedisConnectionConfig,
    kafka: KafkaConnectionConfig,
    stream: StreamConfig,
    publish_policy: PublishPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4400)),
            redis: RedisConnectionConfig::default(),
            kafka: KafkaConnectionConfig::default(),
            stream: StreamConfig::default(),
            publish_policy: PublishPolicy::default(),
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn redis(&self) -> &RedisConnectionConfig {
        &self.redis
    }

    pub fn kafka(&self) -> &KafkaConnectionConfig {
        &self.kafka
    }

    pub fn stream(&self) -> &StreamConfig {
        &self.stream
    }

    pub fn publish_policy(&self) -> PublishPolicy {
        self.publish_policy
    }

    pub fn set_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn set_redis(mut self, redis: RedisConnectionConfig) -> Self {
        self.redis = redis;
        self
    }

    pub fn set_kafka(mut self, kafka: KafkaConnectionConfig) -> Self {
        self.kafka = kafka;
        self
    }

    pub fn set_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn set_publish_policy(mut self, policy: PublishPolicy) -> Self {
        self.publish_policy = policy;
        self
    }
}
