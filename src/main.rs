//! sse_event_bus server
//!
//! Relays `PATCH /event/:id` publishes to every `GET /event/:id` stream, with
//! Redis as the pub/sub bus and Kafka as the log bus.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use sse_event_bus::server::{serve, AppState};
use sse_event_bus::{
    InMemoryLog, InMemoryPubSub, KafkaConnectionConfig, LogBackend, LogMessagePolicy,
    OffsetPolicy, PubSubBackend, PublishDispatcher, PublishPolicy, RedisConnectionConfig,
    RelayConfig, SseEncoder, StreamConfig, SubscriptionMultiplexer,
};

/// Relay Redis pub/sub and Kafka topics to HTTP clients as server-sent events
#[derive(Parser, Debug)]
#[command(name = "sse_event_bus", version, about)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// HTTP port
    #[arg(long, env = "APP_PORT", default_value_t = 4400)]
    port: u16,

    /// Redis host:port or full redis:// URL
    #[arg(long, env = "REDIS_HOST", default_value = "localhost:6379")]
    redis_host: String,

    #[arg(long, env = "REDIS_USER", default_value = "")]
    redis_user: String,

    #[arg(long, env = "REDIS_PASS", default_value = "", hide_env_values = true)]
    redis_pass: String,

    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    redis_db: i64,

    /// Comma separated Kafka bootstrap servers
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    kafka_brokers: String,

    #[arg(long, env = "KAFKA_USERNAME", default_value = "")]
    kafka_username: String,

    #[arg(long, env = "KAFKA_PASSWORD", default_value = "", hide_env_values = true)]
    kafka_password: String,

    #[arg(long, env = "KAFKA_TLS", default_value_t = false)]
    kafka_tls: bool,

    /// Consumer group prefix for stream sessions
    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "sse_event_bus")]
    kafka_group_id: String,

    /// Where new sessions start reading the log bus (latest or earliest)
    #[arg(long, env = "KAFKA_OFFSET", default_value = "latest")]
    kafka_offset: OffsetPolicy,

    /// Do not forward log-bus records to clients, only decode them
    #[arg(long)]
    observe_log: bool,

    /// Fail publishes when the log bus rejects them
    #[arg(long)]
    strict_publish: bool,

    /// Idle keepalive flush interval in seconds (0 disables)
    #[arg(long, default_value_t = 10)]
    keepalive_secs: u64,

    /// Use process-local transports instead of Redis and Kafka
    #[arg(long)]
    in_memory: bool,

    /// Log records kept per topic for replay in --in-memory mode
    #[arg(long, default_value_t = sse_event_bus::backends::DEFAULT_LOG_RETENTION)]
    in_memory_retention: usize,
}

impl Cli {
    fn relay_config(&self) -> RelayConfig {
        let redis = RedisConnectionConfig::new(self.redis_host.clone())
            .set_username(self.redis_user.clone())
            .set_password(self.redis_pass.clone())
            .set_database(self.redis_db);

        let kafka = KafkaConnectionConfig::new(self.kafka_brokers.clone())
            .set_client_id("sse_event_bus")
            .set_sasl_credentials(self.kafka_username.clone(), self.kafka_password.clone())
            .set_use_tls(self.kafka_tls);

        let log_policy = if self.observe_log {
            LogMessagePolicy::Observe
        } else {
            LogMessagePolicy::Forward
        };
        let stream = StreamConfig::default()
            .set_consumer_group(self.kafka_group_id.clone())
            .set_offset_policy(self.kafka_offset)
            .set_log_policy(log_policy)
            .set_keepalive_interval(Some(Duration::from_secs(self.keepalive_secs)));

        let publish_policy = if self.strict_publish {
            PublishPolicy::Strict
        } else {
            PublishPolicy::PrimaryOnly
        };

        RelayConfig::default()
            .set_bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port)))
            .set_redis(redis)
            .set_kafka(kafka)
            .set_stream(stream)
            .set_publish_policy(publish_policy)
    }
}

type Backends = (Arc<dyn PubSubBackend>, Arc<dyn LogBackend>);

async fn connect_backends(config: &RelayConfig, cli: &Cli) -> anyhow::Result<Backends> {
    if cli.in_memory {
        warn!("Using in-memory transports; events are not shared between processes");
        let log = InMemoryLog::new().set_retention(cli.in_memory_retention);
        return Ok((Arc::new(InMemoryPubSub::new()), Arc::new(log)));
    }
    Ok((connect_pubsub(config).await?, connect_log(config).await?))
}

#[cfg(feature = "redis")]
async fn connect_pubsub(config: &RelayConfig) -> anyhow::Result<Arc<dyn PubSubBackend>> {
    let backend = sse_event_bus::RedisPubSubBackend::connect(config.redis().clone())
        .await
        .with_context(|| format!("connecting to Redis at {}", config.redis().address()))?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "redis"))]
async fn connect_pubsub(_config: &RelayConfig) -> anyhow::Result<Arc<dyn PubSubBackend>> {
    anyhow::bail!("built without the `redis` feature; run with --in-memory")
}

#[cfg(feature = "kafka")]
async fn connect_log(config: &RelayConfig) -> anyhow::Result<Arc<dyn LogBackend>> {
    let backend = sse_event_bus::KafkaLogBackend::connect(config.kafka().clone())
        .await
        .with_context(|| format!("connecting to Kafka at {}", config.kafka().bootstrap_servers()))?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "kafka"))]
async fn connect_log(_config: &RelayConfig) -> anyhow::Result<Arc<dyn LogBackend>> {
    anyhow::bail!("built without the `kafka` feature; run with --in-memory")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt().with_env_filter(filter).with_target(true).init();

    let config = cli.relay_config();
    let (pubsub, log) = connect_backends(&config, &cli).await?;

    let dispatcher = PublishDispatcher::new(Arc::clone(&pubsub), Arc::clone(&log))
        .with_policy(config.publish_policy());
    let multiplexer = SubscriptionMultiplexer::new(pubsub, log, config.stream().clone());
    let encoder = SseEncoder::new(config.stream().keepalive_interval());
    let state = AppState::new(dispatcher, multiplexer, encoder, CancellationToken::new());

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    serve(listener, state, shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}
