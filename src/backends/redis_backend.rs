#![cfg(feature = "redis")]

use std::fmt::Debug;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::RedisError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event_bus_backend::{PubSubBackend, Subscription, SubscriptionGuard};
use crate::config::RedisConnectionConfig;
use crate::error::{BackendError, EventBusError};
use crate::message::PubSubMessage;

/// Shared state so cloned backends publish over the same managed connection.
struct RedisBackendState {
    config: RedisConnectionConfig,
    client: redis::Client,
    publisher: ConnectionManager,
}

/// Redis pub/sub implementation of [`PubSubBackend`]
///
/// Publishing goes through one auto-reconnecting [`ConnectionManager`]. Every
/// subscription opens a dedicated connection, since a connection in subscribe
/// mode cannot issue other commands.
#[derive(Clone)]
pub struct RedisPubSubBackend {
    state: Arc<RedisBackendState>,
}

impl Debug for RedisPubSubBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPubSubBackend")
            .field("address", &self.state.config.address())
            .field("database", &self.state.config.database())
            .finish()
    }
}

fn build_client(config: &RedisConnectionConfig) -> Result<redis::Client, EventBusError> {
    let info = config.connection_info()?;
    redis::Client::open(info).map_err(|e| EventBusError::Connection(connection_error(e)))
}

fn connection_error(err: RedisError) -> BackendError {
    BackendError::Connection(err.to_string())
}

impl RedisPubSubBackend {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(config: RedisConnectionConfig) -> Result<Self, EventBusError> {
        let client = build_client(&config)?;
        Self::establish(config, client)
            .await
            .map_err(EventBusError::Connection)
    }

    async fn establish(
        config: RedisConnectionConfig,
        client: redis::Client,
    ) -> Result<Self, BackendError> {
        let mut publisher = tokio::time::timeout(
            config.connect_timeout(),
            ConnectionManager::new(client.clone()),
        )
        .await
        .map_err(|_| BackendError::Timeout)?
        .map_err(connection_error)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut publisher)
            .await
            .map_err(connection_error)?;
        info!(address = %config.address(), reply = %pong, "Connected to Redis");

        Ok(Self {
            state: Arc::new(RedisBackendState {
                config,
                client,
                publisher,
            }),
        })
    }
}

/// Forward messages from one subscribed connection until cancelled or the server closes it.
async fn forward_messages(
    pubsub: redis::aio::PubSub,
    channel: String,
    tx: mpsc::Sender<PubSubMessage>,
    cancel: CancellationToken,
) {
    let mut messages = Box::pin(pubsub.into_on_message());
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = messages.next() => next,
        };

        let Some(msg) = next else {
            debug!(channel = %channel, "Redis pub/sub connection closed");
            break;
        };

        let payload: Vec<u8> = match msg.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(channel = %channel, error = %err, "Unreadable Redis pub/sub payload");
                continue;
            }
        };

        let message = PubSubMessage {
            channel: msg.get_channel_name().to_string(),
            payload,
            timestamp: SystemTime::now(),
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    // Dropping the stream drops the dedicated connection, which ends the subscription server-side.
    debug!(channel = %channel, "Redis subscription released");
}

#[async_trait]
impl PubSubBackend for RedisPubSubBackend {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BackendError> {
        let mut publisher = self.state.publisher.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut publisher)
            .await
            .map_err(|err| BackendError::Delivery(err.to_string()))?;
        debug!(channel = %channel, receivers, "Published to Redis channel");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription<PubSubMessage>, BackendError> {
        let mut pubsub = tokio::time::timeout(
            self.state.config.connect_timeout(),
            self.state.client.get_async_pubsub(),
        )
        .await
        .map_err(|_| BackendError::Timeout)?
        .map_err(connection_error)?;

        // Resolves once the server has acknowledged the SUBSCRIBE.
        pubsub
            .subscribe(channel)
            .await
            .map_err(|err| BackendError::Subscription(err.to_string()))?;
        debug!(channel = %channel, "Subscribed to Redis channel");

        let (tx, rx) = mpsc::channel(self.state.config.subscription_capacity());
        let cancel = CancellationToken::new();
        tokio::spawn(forward_messages(
            pubsub,
            channel.to_string(),
            tx,
            cancel.clone(),
        ));

        Ok(Subscription::new(rx, SubscriptionGuard::from_token(cancel)))
    }
}
