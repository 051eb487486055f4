//! Process-local transports with the same observable semantics as the brokers.
//!
//! Used by the test suite and by the binary's `--in-memory` mode.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::event_bus_backend::{LogBackend, PubSubBackend, Subscription, SubscriptionGuard};
use crate::config::OffsetPolicy;
use crate::error::BackendError;
use crate::message::{LogMessage, PubSubMessage};

const DEFAULT_CAPACITY: usize = 256;
/// Records kept per topic for `Earliest` replay.
pub const DEFAULT_LOG_RETENTION: usize = 1024;

/// Subscriber table keyed by channel/topic name.
struct Registry<M> {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<(u64, mpsc::Sender<M>)>>>,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
        }
    }
}

impl<M: Clone> Registry<M> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<(u64, mpsc::Sender<M>)>>> {
        // The table stays consistent even if a holder panicked, so poisoning is ignored.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, key: &str, sender: mpsc::Sender<M>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().entry(key.to_string()).or_default().push((id, sender));
        id
    }

    fn remove(&self, key: &str, id: u64) {
        let mut table = self.lock();
        if let Some(entries) = table.get_mut(key) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                table.remove(key);
            }
        }
    }

    /// Deliver to every live subscriber of `key`. Returns the receiver count.
    ///
    /// A full subscriber queue drops the message for that subscriber only.
    fn broadcast(&self, key: &str, message: &M) -> usize {
        let mut table = self.lock();
        let Some(entries) = table.get_mut(key) else {
            return 0;
        };
        let mut delivered = 0;
        entries.retain(|(id, sender)| match sender.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(key = %key, subscriber = id, "In-memory subscriber queue full; message dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Drop every sender for `key`, ending those subscriptions from the producer side.
    fn close_key(&self, key: &str) -> usize {
        self.lock().remove(key).map(|entries| entries.len()).unwrap_or(0)
    }

    fn count(&self, key: &str) -> usize {
        self.lock().get(key).map(Vec::len).unwrap_or(0)
    }
}

/// In-memory pub/sub bus: fire-and-forget fan-out, no history.
#[derive(Clone)]
pub struct InMemoryPubSub {
    registry: Arc<Registry<PubSubMessage>>,
    capacity: usize,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.registry.count(channel)
    }

    /// Simulate the server closing every subscription on `channel`.
    pub fn close_channel(&self, channel: &str) -> usize {
        self.registry.close_key(channel)
    }

    /// Deliver raw bytes, bypassing serialization. Useful for injecting malformed payloads.
    pub fn inject(&self, channel: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.registry
            .broadcast(channel, &PubSubMessage::new(channel, payload))
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryPubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPubSub")
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[async_trait]
impl PubSubBackend for InMemoryPubSub {
    fn backend_name(&self) -> &'static str {
        "in_memory_pubsub"
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BackendError> {
        let receivers = self.inject(channel, payload);
        debug!(channel = %channel, receivers, "In-memory publish");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription<PubSubMessage>, BackendError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.registry.register(channel, tx);
        let registry = Arc::clone(&self.registry);
        let channel = channel.to_string();
        Ok(Subscription::new(
            rx,
            SubscriptionGuard::new(move || registry.remove(&channel, id)),
        ))
    }
}

#[derive(Default)]
struct TopicLog {
    next_offset: i64,
    records: VecDeque<LogMessage>,
}

/// In-memory log bus: single partition per topic with bounded history.
///
/// Only the newest `retention` records of a topic are kept for replay; offsets
/// keep counting past evicted records. Every subscription behaves as its own
/// consumer group; group ids are accepted but not coordinated.
#[derive(Clone)]
pub struct InMemoryLog {
    registry: Arc<Registry<LogMessage>>,
    history: Arc<Mutex<HashMap<String, TopicLog>>>,
    capacity: usize,
    retention: usize,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            history: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
            retention: DEFAULT_LOG_RETENTION,
        }
    }

    /// Number of records kept per topic. Zero keeps no history at all.
    pub fn set_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.count(topic)
    }

    /// Simulate the consumer stream of every subscription on `topic` ending.
    pub fn close_topic(&self, topic: &str) -> usize {
        self.registry.close_key(topic)
    }

    /// Records of `topic` still retained, oldest first.
    pub fn records(&self, topic: &str) -> Vec<LogMessage> {
        self.history_lock()
            .get(topic)
            .map(|log| log.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn history_lock(&self) -> MutexGuard<'_, HashMap<String, TopicLog>> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLog")
            .field("capacity", &self.capacity)
            .field("retention", &self.retention)
            .finish()
    }
}

#[async_trait]
impl LogBackend for InMemoryLog {
    fn backend_name(&self) -> &'static str {
        "in_memory_log"
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BackendError> {
        // Hold the history lock across the broadcast so offsets reach subscribers in order.
        let mut history = self.history_lock();
        let log = history.entry(topic.to_string()).or_default();
        let record = LogMessage {
            topic: topic.to_string(),
            partition: 0,
            offset: log.next_offset,
            key: None,
            value: payload.to_vec(),
            timestamp: Some(SystemTime::now()),
        };
        log.next_offset += 1;
        if self.retention > 0 {
            if log.records.len() == self.retention {
                log.records.pop_front();
            }
            log.records.push_back(record.clone());
        }
        let receivers = self.registry.broadcast(topic, &record);
        debug!(topic = %topic, offset = record.offset, receivers, "In-memory append");
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[String],
        offset: OffsetPolicy,
        group_id: &str,
    ) -> Result<Subscription<LogMessage>, BackendError> {
        if topics.is_empty() {
            return Err(BackendError::Subscription(
                "at least one topic is required".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let history = self.history_lock();
        if offset == OffsetPolicy::Earliest {
            for topic in topics {
                let retained = history.get(topic).map(|log| log.records.iter());
                for record in retained.into_iter().flatten() {
                    if tx.try_send(record.clone()).is_err() {
                        warn!(topic = %topic, group = %group_id, "Replay exceeded subscription capacity");
                        break;
                    }
                }
            }
        }
        let ids: Vec<(String, u64)> = topics
            .iter()
            .map(|topic| (topic.clone(), self.registry.register(topic, tx.clone())))
            .collect();
        drop(history);

        let registry = Arc::clone(&self.registry);
        Ok(Subscription::new(
            rx,
            SubscriptionGuard::new(move || {
                for (topic, id) in ids {
                    registry.remove(&topic, id);
                }
            }),
        ))
    }
}
