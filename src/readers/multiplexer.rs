use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::backends::{LogBackend, PubSubBackend, Subscription};
use crate::config::{LogMessagePolicy, StreamConfig};
use crate::decoder::{DecoderStats, PayloadDecoder};
use crate::error::Transport;
use crate::errors::{report, BusErrorCallback, BusErrorContext};
use crate::message::{LogMessage, PubSubMessage};
use crate::{ChannelKey, Event, EventBusError};

/// Why a merge loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeExit {
    /// The session's cancellation token fired.
    Cancelled,
    /// The pub/sub subscription ended from the server side.
    PubSubClosed,
    /// The log subscription ended from the consumer side.
    LogClosed,
    /// Nobody reads the event stream any more.
    ConsumerGone,
}

/// Final figures of one merge loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub exit: MergeExit,
    pub forwarded: usize,
    pub pubsub: DecoderStats,
    pub log: DecoderStats,
}

/// Opens one pub/sub and one log subscription per session and merges them.
///
/// The multiplexer itself is stateless between sessions; every call to
/// [`SubscriptionMultiplexer::open`] produces an independent [`EventStream`].
#[derive(Clone)]
pub struct SubscriptionMultiplexer {
    pubsub: Arc<dyn PubSubBackend>,
    log: Arc<dyn LogBackend>,
    config: StreamConfig,
    on_error: Option<BusErrorCallback>,
}

impl std::fmt::Debug for SubscriptionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionMultiplexer")
            .field("pubsub", &self.pubsub)
            .field("log", &self.log)
            .field("config", &self.config)
            .finish()
    }
}

impl SubscriptionMultiplexer {
    pub fn new(
        pubsub: Arc<dyn PubSubBackend>,
        log: Arc<dyn LogBackend>,
        config: StreamConfig,
    ) -> Self {
        Self {
            pubsub,
            log,
            config,
            on_error: None,
        }
    }

    pub fn with_error_callback(mut self, callback: BusErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Subscribe both transports for `channel` and start merging them.
    ///
    /// The pub/sub subscription is established first. If the log subscription
    /// then fails, the pub/sub one is released before the error is returned.
    /// Nothing is emitted unless both succeed. The open event is already
    /// queued when this returns, so it is the first item even if the stream is
    /// cancelled right away.
    pub async fn open(
        &self,
        cancel: &CancellationToken,
        channel: &ChannelKey,
    ) -> Result<EventStream, EventBusError> {
        let mut pubsub = self
            .pubsub
            .subscribe(channel.as_str())
            .await
            .map_err(|err| EventBusError::subscribe(Transport::PubSub, err))?;

        let group_id = self.config.consumer_group_for(channel.as_str());
        let topics = [channel.as_str().to_string()];
        let mut log = match self
            .log
            .subscribe(&topics, self.config.offset_policy(), &group_id)
            .await
        {
            Ok(log) => log,
            Err(err) => {
                pubsub.close();
                return Err(EventBusError::subscribe(Transport::Log, err));
            }
        };

        let session = cancel.child_token();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity());
        if tx.try_send(Event::opened(channel)).is_err() {
            pubsub.close();
            log.close();
            return Err(EventBusError::Config(
                "event queue rejected the open event".to_string(),
            ));
        }

        info!(channel = %channel, group = %group_id, "Event stream opened");

        let merge = MergeLoop {
            channel: channel.clone(),
            pubsub,
            log,
            pubsub_decoder: PayloadDecoder::new(Transport::PubSub),
            log_decoder: PayloadDecoder::new(Transport::Log),
            log_policy: self.config.log_policy(),
            pubsub_backend: self.pubsub.backend_name(),
            log_backend: self.log.backend_name(),
            on_error: self.on_error.clone(),
            forwarded: 1,
            tx,
            cancel: session.clone(),
        };
        let handle = tokio::spawn(merge.run());

        Ok(EventStream {
            receiver: rx,
            cancel: session,
            merge: Some(handle),
        })
    }
}

/// The merged, ordered-per-source event sequence of one session.
///
/// Dropping the stream cancels its merge loop, which releases both
/// subscriptions.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::Receiver<Event>,
    cancel: CancellationToken,
    merge: Option<JoinHandle<MergeSummary>>,
}

impl EventStream {
    /// Next event, or `None` once the merge loop has stopped and the queue is drained.
    pub async fn next(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Stop the merge loop. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token governing this stream; cancelling it ends the stream.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait for the merge loop to finish and both subscriptions to be released.
    ///
    /// Returns `None` if the loop was already awaited or panicked.
    pub async fn wait_closed(&mut self) -> Option<MergeSummary> {
        let handle = self.merge.take()?;
        handle.await.ok()
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct MergeLoop {
    channel: ChannelKey,
    pubsub: Subscription<PubSubMessage>,
    log: Subscription<LogMessage>,
    pubsub_decoder: PayloadDecoder,
    log_decoder: PayloadDecoder,
    log_policy: LogMessagePolicy,
    pubsub_backend: &'static str,
    log_backend: &'static str,
    on_error: Option<BusErrorCallback>,
    forwarded: usize,
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl MergeLoop {
    async fn run(mut self) -> MergeSummary {
        let exit = self.merge().await;

        self.pubsub.close();
        self.log.close();
        debug!(
            channel = %self.channel,
            exit = ?exit,
            forwarded = self.forwarded,
            "Event stream closed"
        );

        MergeSummary {
            exit,
            forwarded: self.forwarded,
            pubsub: self.pubsub_decoder.stats(),
            log: self.log_decoder.stats(),
        }
    }

    async fn merge(&mut self) -> MergeExit {
        loop {
            if self.cancel.is_cancelled() {
                return MergeExit::Cancelled;
            }

            let event = tokio::select! {
                _ = self.cancel.cancelled() => return MergeExit::Cancelled,
                message = self.pubsub.recv() => match message {
                    Some(message) => self.decode_pubsub(message),
                    None => return MergeExit::PubSubClosed,
                },
                record = self.log.recv() => match record {
                    Some(record) => self.decode_log(record),
                    None => return MergeExit::LogClosed,
                },
            };

            if let Some(event) = event {
                if let Some(exit) = self.emit(event).await {
                    return exit;
                }
            }
        }
    }

    async fn emit(&mut self, event: Event) -> Option<MergeExit> {
        tokio::select! {
            _ = self.cancel.cancelled() => Some(MergeExit::Cancelled),
            sent = self.tx.send(event) => match sent {
                Ok(()) => {
                    self.forwarded += 1;
                    None
                }
                Err(_) => Some(MergeExit::ConsumerGone),
            },
        }
    }

    fn decode_pubsub(&mut self, message: PubSubMessage) -> Option<Event> {
        match self.pubsub_decoder.decode(&message.payload) {
            Ok(value) => Some(Event::new(&self.channel, value)),
            Err(err) => {
                self.report_decode(Transport::PubSub, err, message.payload);
                None
            }
        }
    }

    fn decode_log(&mut self, record: LogMessage) -> Option<Event> {
        match self.log_decoder.decode(&record.value) {
            Ok(value) => match self.log_policy {
                LogMessagePolicy::Forward => Some(Event::new(&self.channel, value)),
                LogMessagePolicy::Observe => {
                    trace!(
                        channel = %self.channel,
                        partition = record.partition,
                        offset = record.offset,
                        "Observed log record"
                    );
                    None
                }
            },
            Err(err) => {
                self.report_decode(Transport::Log, err, record.value);
                None
            }
        }
    }

    fn report_decode(&self, transport: Transport, err: serde_json::Error, bytes: Vec<u8>) {
        let backend = match transport {
            Transport::PubSub => self.pubsub_backend,
            Transport::Log => self.log_backend,
        };
        let err = EventBusError::Decode {
            transport,
            message: err.to_string(),
        };
        report(
            self.on_error.as_ref(),
            BusErrorContext::new(
                backend,
                self.channel.as_str(),
                err.kind(),
                err.to_string(),
                Some(bytes),
            ),
        );
    }
}
