use std::io;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sse_event_bus::{
    BusErrorCallback, BusErrorContext, ChannelKey, PublishDispatcher, SseSink, StreamConfig,
    SubscriptionMultiplexer,
};
use tracing_subscriber::EnvFilter;

use super::mock_backend::{MockLog, MockPubSub};

/// Install a fmt subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn next_unique_suffix() -> String {
    static UNIQUE_COUNTER: AtomicU64 = AtomicU64::new(0);
    let counter = UNIQUE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos();
    format!("{}-{}-{}", process::id(), nanos, counter)
}

/// Generate a unique channel name per test invocation.
pub fn unique_topic(base: &str) -> String {
    format!("{}-{}", base, next_unique_suffix())
}

pub fn unique_channel(base: &str) -> ChannelKey {
    ChannelKey::new(unique_topic(base)).unwrap()
}

/// Mock transports plus the dispatcher and multiplexer built on them.
pub struct Harness {
    pub pubsub: MockPubSub,
    pub log: MockLog,
    pub dispatcher: PublishDispatcher,
    pub multiplexer: SubscriptionMultiplexer,
    pub errors: ErrorRecorder,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        init_tracing();
        let pubsub = MockPubSub::new();
        let log = MockLog::new();
        let errors = ErrorRecorder::default();
        let dispatcher = PublishDispatcher::new(Arc::new(pubsub.clone()), Arc::new(log.clone()))
            .with_error_callback(errors.callback());
        let multiplexer =
            SubscriptionMultiplexer::new(Arc::new(pubsub.clone()), Arc::new(log.clone()), config)
                .with_error_callback(errors.callback());
        Self {
            pubsub,
            log,
            dispatcher,
            multiplexer,
            errors,
        }
    }
}

/// Collects every error reported through a [`BusErrorCallback`].
#[derive(Clone, Default)]
pub struct ErrorRecorder {
    seen: Arc<Mutex<Vec<BusErrorContext>>>,
}

impl ErrorRecorder {
    pub fn callback(&self) -> BusErrorCallback {
        let seen = Arc::clone(&self.seen);
        Arc::new(move |context| seen.lock().unwrap().push(context))
    }

    pub fn errors(&self) -> Vec<BusErrorContext> {
        self.seen.lock().unwrap().clone()
    }
}

/// What a [`RecordingSink`] has received so far.
#[derive(Debug, Default)]
pub struct Recorded {
    pub headers: Vec<(&'static str, &'static str)>,
    pub written: Vec<u8>,
    pub flushes: usize,
    /// Bytes that had been written at the time of each flush.
    pub flushed_at: Vec<usize>,
}

/// In-memory [`SseSink`] that can be told to start failing.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub recorded: Arc<Mutex<Recorded>>,
    fail_after_writes: Arc<Mutex<Option<usize>>>,
    writes: Arc<AtomicU64>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write after the first `writes` fails with `BrokenPipe`.
    pub fn fail_after(self, writes: usize) -> Self {
        *self.fail_after_writes.lock().unwrap() = Some(writes);
        self
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.recorded.lock().unwrap().written.clone()).unwrap()
    }

    /// Complete frames written so far, without the `data: ` prefix.
    pub fn frames(&self) -> Vec<String> {
        self.text()
            .split_terminator("\n\n")
            .map(|frame| frame.strip_prefix("data: ").unwrap_or(frame).to_string())
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.recorded.lock().unwrap().flushes
    }

    fn broken(&self) -> bool {
        match *self.fail_after_writes.lock().unwrap() {
            Some(limit) => self.writes.load(Ordering::SeqCst) as usize >= limit,
            None => false,
        }
    }
}

#[async_trait]
impl SseSink for RecordingSink {
    fn set_header(&mut self, name: &'static str, value: &'static str) {
        self.recorded.lock().unwrap().headers.push((name, value));
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.broken() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client gone"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().written.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.flushes += 1;
        let len = recorded.written.len();
        recorded.flushed_at.push(len);
        Ok(())
    }
}

/// Poll `predicate` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}
