#![cfg(feature = "kafka")]

use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{Consumer, StreamConsumer},
    message::Message,
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event_bus_backend::{LogBackend, Subscription, SubscriptionGuard};
use crate::config::{KafkaConnectionConfig, OffsetPolicy};
use crate::error::{BackendError, EventBusError};
use crate::message::LogMessage;

/// Kafka implementation of [`LogBackend`]
///
/// One producer is shared by all publishes. Each subscription builds its own
/// consumer so sessions never share partition assignments.
#[derive(Clone)]
pub struct KafkaLogBackend {
    config: KafkaConnectionConfig,
    producer: FutureProducer,
}

impl std::fmt::Debug for KafkaLogBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaLogBackend")
            .field("bootstrap_servers", &self.config.bootstrap_servers())
            .field("security_protocol", &self.config.security_protocol())
            .finish()
    }
}

fn client_config(config: &KafkaConnectionConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    for (key, value) in config.client_properties() {
        client_config.set(key, value);
    }
    client_config
}

impl KafkaLogBackend {
    pub async fn connect(config: KafkaConnectionConfig) -> Result<Self, EventBusError> {
        Self::establish(config)
            .await
            .map_err(EventBusError::Connection)
    }

    async fn establish(config: KafkaConnectionConfig) -> Result<Self, BackendError> {
        let mut producer_config = client_config(&config);
        producer_config.set("message.timeout.ms", config.timeout_ms().to_string());

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| BackendError::Connection(format!("Failed to create Kafka producer: {e}")))?;

        // rdkafka connects lazily; a metadata fetch only tells us early whether brokers answer.
        let probe = producer.clone();
        let metadata = tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, Duration::from_millis(500))
                .map(|md| md.brokers().len())
        })
        .await;
        match metadata {
            Ok(Ok(brokers)) => info!(
                bootstrap = %config.bootstrap_servers(),
                brokers,
                "Connected to Kafka"
            ),
            Ok(Err(e)) => info!(
                bootstrap = %config.bootstrap_servers(),
                error = %e,
                "Kafka metadata fetch deferred"
            ),
            Err(e) => warn!(error = %e, "Kafka metadata probe task failed"),
        }

        Ok(Self { config, producer })
    }

    fn build_consumer(
        &self,
        offset: OffsetPolicy,
        group_id: &str,
    ) -> Result<StreamConsumer, BackendError> {
        let mut consumer_config = client_config(&self.config);
        consumer_config
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", offset.as_reset_str())
            .set("session.timeout.ms", "6000");
        // Re-apply overrides so user-supplied consumer settings win over the defaults above.
        for (key, value) in self.config.additional_config() {
            consumer_config.set(key, value);
        }
        consumer_config
            .create()
            .map_err(|e| BackendError::Subscription(format!("Failed to create Kafka consumer: {e}")))
    }
}

fn to_log_message<M: Message>(message: &M) -> LogMessage {
    LogMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(|ms| u64::try_from(ms).ok())
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms)),
    }
}

/// Consume until cancelled or the session stops reading.
async fn forward_records(
    consumer: StreamConsumer,
    group_id: String,
    tx: mpsc::Sender<LogMessage>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = consumer.recv() => received.map(|borrowed| to_log_message(&borrowed)),
        };

        match received {
            Ok(record) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(record) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(group = %group_id, error = %e, "Error receiving Kafka message");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    consumer.unsubscribe();
    debug!(group = %group_id, "Kafka subscription released");
}

#[async_trait]
impl LogBackend for KafkaLogBackend {
    fn backend_name(&self) -> &'static str {
        "kafka"
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BackendError> {
        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(topic).payload(payload);
        let timeout = Duration::from_millis(self.config.timeout_ms().max(0) as u64);
        match self.producer.send(record, Timeout::After(timeout)).await {
            Ok((partition, offset)) => {
                debug!(topic = %topic, partition, offset, "Published to Kafka topic");
                Ok(())
            }
            Err((e, _)) => Err(BackendError::Delivery(e.to_string())),
        }
    }

    async fn subscribe(
        &self,
        topics: &[String],
        offset: OffsetPolicy,
        group_id: &str,
    ) -> Result<Subscription<LogMessage>, BackendError> {
        let consumer = self.build_consumer(offset, group_id)?;
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs).map_err(|e| {
            BackendError::Subscription(format!("Failed to subscribe to {topics:?}: {e}"))
        })?;
        info!(topics = ?topics, group = %group_id, offset = offset.as_reset_str(), "Subscribed to Kafka topics");

        let (tx, rx) = mpsc::channel(self.config.subscription_capacity());
        let cancel = CancellationToken::new();
        tokio::spawn(forward_records(
            consumer,
            group_id.to_string(),
            tx,
            cancel.clone(),
        ));

        Ok(Subscription::new(rx, SubscriptionGuard::from_token(cancel)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejected_client_config_is_a_connection_error() {
        let config = KafkaConnectionConfig::new("127.0.0.1:1")
            .insert_additional_config("no.such.property", "1");

        let err = KafkaLogBackend::connect(config).await.unwrap_err();

        match err {
            EventBusError::Connection(BackendError::Connection(message)) => {
                assert!(message.contains("producer"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
