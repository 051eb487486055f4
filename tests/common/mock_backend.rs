use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sse_event_bus::{
    BackendError, InMemoryLog, InMemoryPubSub, LogBackend, LogMessage, OffsetPolicy,
    PubSubBackend, PubSubMessage, Subscription, SubscriptionGuard,
};

/// Switches and counters shared by the mock transports.
#[derive(Debug, Default)]
pub struct MockControls {
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    publishes: AtomicUsize,
    subscribes: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

impl MockControls {
    /// Simulate delivery failures for every publish
    pub fn simulate_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Simulate subscribe failures for every subscribe
    pub fn simulate_subscribe_failure(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Publish attempts, failed ones included.
    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    /// Subscriptions successfully handed out.
    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Subscriptions released so far.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn publish_attempt(&self) -> Result<(), BackendError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BackendError::Delivery("simulated delivery failure".into()));
        }
        Ok(())
    }

    fn subscribe_attempt(&self) -> Result<(), BackendError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BackendError::Subscription(
                "simulated subscribe failure".into(),
            ));
        }
        Ok(())
    }

    /// Wrap `subscription` so its release is counted.
    fn counted<M>(&self, subscription: Subscription<M>) -> Subscription<M> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let (receiver, mut inner) = subscription.into_parts();
        let releases = Arc::clone(&self.releases);
        Subscription::new(
            receiver,
            SubscriptionGuard::new(move || {
                releases.fetch_add(1, Ordering::SeqCst);
                inner.release();
            }),
        )
    }
}

/// Pub/sub mock delegating to [`InMemoryPubSub`] with failure injection
#[derive(Debug, Clone, Default)]
pub struct MockPubSub {
    pub bus: InMemoryPubSub,
    pub controls: Arc<MockControls>,
}

impl MockPubSub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSubBackend for MockPubSub {
    fn backend_name(&self) -> &'static str {
        "mock_pubsub"
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BackendError> {
        self.controls.publish_attempt()?;
        self.bus.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription<PubSubMessage>, BackendError> {
        self.controls.subscribe_attempt()?;
        let subscription = self.bus.subscribe(channel).await?;
        Ok(self.controls.counted(subscription))
    }
}

/// Log mock delegating to [`InMemoryLog`] with failure injection
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    pub log: InMemoryLog,
    pub controls: Arc<MockControls>,
    groups: Arc<std::sync::Mutex<Vec<String>>>,
}

impl MockLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumer group ids seen by `subscribe`, in order.
    pub fn groups(&self) -> Vec<String> {
        self.groups.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogBackend for MockLog {
    fn backend_name(&self) -> &'static str {
        "mock_log"
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BackendError> {
        self.controls.publish_attempt()?;
        self.log.publish(topic, payload).await
    }

    async fn subscribe(
        &self,
        topics: &[String],
        offset: OffsetPolicy,
        group_id: &str,
    ) -> Result<Subscription<LogMessage>, BackendError> {
        self.controls.subscribe_attempt()?;
        self.groups.lock().unwrap().push(group_id.to_string());
        let subscription = self.log.subscribe(topics, offset, group_id).await?;
        Ok(self.controls.counted(subscription))
    }
}
