use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::OffsetPolicy;
use crate::error::BackendError;
use crate::message::{LogMessage, PubSubMessage};

/// Common interface of the key/value pub/sub bus
///
/// Implementations are shared process-wide behind an `Arc` and must tolerate
/// many concurrent publish and subscribe calls.
#[async_trait]
pub trait PubSubBackend: Send + Sync + Debug + 'static {
    /// Short name used in logs and error reports.
    fn backend_name(&self) -> &'static str;

    /// Publish an already serialized payload. Zero receivers is not an error.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BackendError>;

    /// Subscribe to `channel`. Returns once the subscription is established.
    async fn subscribe(&self, channel: &str) -> Result<Subscription<PubSubMessage>, BackendError>;
}

/// Common interface of the partitioned log bus
#[async_trait]
pub trait LogBackend: Send + Sync + Debug + 'static {
    /// Short name used in logs and error reports.
    fn backend_name(&self) -> &'static str;

    /// Append an already serialized payload to `topic`.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BackendError>;

    /// Join `group_id` and consume `topics` starting at `offset`.
    async fn subscribe(
        &self,
        topics: &[String],
        offset: OffsetPolicy,
        group_id: &str,
    ) -> Result<Subscription<LogMessage>, BackendError>;
}

/// Releases the adapter-side resources of one subscription exactly once.
///
/// Release happens on [`SubscriptionGuard::release`] or on drop, whichever
/// comes first.
pub struct SubscriptionGuard {
    release: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl SubscriptionGuard {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Guard that cancels `token` on release, stopping the task it governs.
    pub fn from_token(token: CancellationToken) -> Self {
        Self::new(move || token.cancel())
    }

    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }

    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("released", &self.is_released())
            .finish()
    }
}

/// A live subscription: the message queue plus the guard owning its lifetime.
///
/// `recv` yields `None` once the producer side has closed or the subscription
/// was closed locally.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::Receiver<M>,
    guard: SubscriptionGuard,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::Receiver<M>, guard: SubscriptionGuard) -> Self {
        Self { receiver, guard }
    }

    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Release the adapter resources and stop accepting messages. Idempotent.
    pub fn close(&mut self) {
        self.guard.release();
        self.receiver.close();
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_released()
    }

    pub fn into_parts(self) -> (mpsc::Receiver<M>, SubscriptionGuard) {
        (self.receiver, self.guard)
    }
}
