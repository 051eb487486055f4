use std::sync::Arc;

use tracing::{debug, error};

use crate::backends::{LogBackend, PubSubBackend};
use crate::config::PublishPolicy;
use crate::errors::{report, BusErrorCallback, BusErrorContext, BusErrorKind};
use crate::{BusEvent, ChannelKey, EventBusError};

/// Outcome of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Whether the log bus accepted the message as well.
    pub log_delivered: bool,
    /// Size of the serialized payload written to both transports.
    pub payload_len: usize,
}

/// Writes one message to both transports.
///
/// The message is serialized once. The pub/sub write comes first and decides
/// the outcome; the log write runs only after it succeeds. Under
/// [`PublishPolicy::PrimaryOnly`] a failed log write is reported through the
/// error callback and the publish still succeeds. No retries are attempted
/// here; the adapter clients own their retry policy.
#[derive(Clone)]
pub struct PublishDispatcher {
    pubsub: Arc<dyn PubSubBackend>,
    log: Arc<dyn LogBackend>,
    policy: PublishPolicy,
    on_error: Option<BusErrorCallback>,
}

impl std::fmt::Debug for PublishDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishDispatcher")
            .field("pubsub", &self.pubsub)
            .field("log", &self.log)
            .field("policy", &self.policy)
            .finish()
    }
}

impl PublishDispatcher {
    pub fn new(pubsub: Arc<dyn PubSubBackend>, log: Arc<dyn LogBackend>) -> Self {
        Self {
            pubsub,
            log,
            policy: PublishPolicy::default(),
            on_error: None,
        }
    }

    pub fn with_policy(mut self, policy: PublishPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_error_callback(mut self, callback: BusErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn policy(&self) -> PublishPolicy {
        self.policy
    }

    /// Serialize `message` and publish it on `channel`.
    pub async fn publish<T: BusEvent + ?Sized>(
        &self,
        channel: &ChannelKey,
        message: &T,
    ) -> Result<PublishReport, EventBusError> {
        let payload = serde_json::to_vec(message)?;
        self.publish_serialized(channel, &payload).await
    }

    /// Publish an already serialized payload.
    pub async fn publish_serialized(
        &self,
        channel: &ChannelKey,
        payload: &[u8],
    ) -> Result<PublishReport, EventBusError> {
        if let Err(err) = self.pubsub.publish(channel.as_str(), payload).await {
            error!(
                channel = %channel,
                backend = self.pubsub.backend_name(),
                error = %err,
                "Publish to pub/sub bus failed"
            );
            return Err(EventBusError::PrimaryPublish(err));
        }

        let log_delivered = match self.log.publish(channel.as_str(), payload).await {
            Ok(()) => true,
            Err(err) if self.policy == PublishPolicy::Strict => {
                error!(
                    channel = %channel,
                    backend = self.log.backend_name(),
                    error = %err,
                    "Publish to log bus failed"
                );
                return Err(EventBusError::SecondaryPublish(err));
            }
            Err(err) => {
                report(
                    self.on_error.as_ref(),
                    BusErrorContext::new(
                        self.log.backend_name(),
                        channel.as_str(),
                        BusErrorKind::DeliveryFailure,
                        err.to_string(),
                        Some(payload.to_vec()),
                    ),
                );
                false
            }
        };

        debug!(
            channel = %channel,
            bytes = payload.len(),
            log_delivered,
            "Published event"
        );
        Ok(PublishReport {
            log_delivered,
            payload_len: payload.len(),
        })
    }
}
