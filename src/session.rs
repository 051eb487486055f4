//! Lifecycle of one client's event stream.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::readers::{EventStream, SubscriptionMultiplexer};
use crate::sse::{DriveExit, SseEncoder, SseSink};
use crate::{ChannelKey, EventBusError};

/// Why a session reached [`SessionState::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Cancelled,
    UpstreamClosed,
    SubscribeFailed,
    EncodeFailed,
    WriteFailed,
}

impl CloseReason {
    /// Cancellation and upstream close are normal endings.
    pub fn is_clean(&self) -> bool {
        matches!(self, CloseReason::Cancelled | CloseReason::UpstreamClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Streaming,
    Closed(CloseReason),
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed(_))
    }
}

/// One client connection bound to its two backend subscriptions.
///
/// `Opening -> Streaming -> Closed`. There is no way out of `Closed`, and every
/// path into it releases both subscriptions.
#[derive(Debug)]
pub struct StreamSession {
    channel: ChannelKey,
    state: SessionState,
    cancel: CancellationToken,
    events: Option<EventStream>,
}

impl StreamSession {
    /// A session in `Opening` whose cancellation follows `parent`.
    pub fn new(channel: ChannelKey, parent: &CancellationToken) -> Self {
        Self {
            channel,
            state: SessionState::Opening,
            cancel: parent.child_token(),
            events: None,
        }
    }

    pub fn channel(&self) -> &ChannelKey {
        &self.channel
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Token that ends this session when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Establish both subscriptions.
    ///
    /// On success the open event is already queued and the session is
    /// `Streaming`. On failure it is `Closed(SubscribeFailed)`.
    pub async fn open(&mut self, multiplexer: &SubscriptionMultiplexer) -> Result<(), EventBusError> {
        if self.state != SessionState::Opening {
            return Err(EventBusError::Config(format!(
                "session on '{}' is not opening",
                self.channel
            )));
        }

        match multiplexer.open(&self.cancel, &self.channel).await {
            Ok(events) => {
                self.events = Some(events);
                self.transition(SessionState::Streaming);
                Ok(())
            }
            Err(err) => {
                warn!(channel = %self.channel, error = %err, "Failed to open event stream");
                self.transition(SessionState::Closed(CloseReason::SubscribeFailed));
                Err(err)
            }
        }
    }

    /// Drive the session's events into `sink` until it closes. Returns the final state.
    pub async fn stream<S>(&mut self, encoder: &SseEncoder, sink: &mut S) -> SessionState
    where
        S: SseSink + ?Sized,
    {
        let Some(mut events) = self.events.take() else {
            return self.state;
        };

        let outcome = encoder.drive(&self.cancel, sink, &mut events).await;
        let reason = match outcome {
            Ok(DriveExit::Cancelled) => CloseReason::Cancelled,
            Ok(DriveExit::UpstreamClosed) => CloseReason::UpstreamClosed,
            Err(EventBusError::Write(_)) => CloseReason::WriteFailed,
            Err(err) => {
                warn!(channel = %self.channel, error = %err, "Failed to encode event");
                CloseReason::EncodeFailed
            }
        };

        Self::release(&mut events).await;
        self.transition(SessionState::Closed(reason));
        self.state
    }

    /// Cancel the session and wait until both subscriptions are released. Idempotent.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(mut events) = self.events.take() {
            Self::release(&mut events).await;
        }
        if !self.state.is_closed() {
            self.transition(SessionState::Closed(CloseReason::Cancelled));
        }
    }

    async fn release(events: &mut EventStream) {
        events.close();
        if let Some(summary) = events.wait_closed().await {
            debug!(
                exit = ?summary.exit,
                forwarded = summary.forwarded,
                pubsub_decode_failures = summary.pubsub.failures,
                log_decode_failures = summary.log.failures,
                "Session subscriptions released"
            );
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.is_closed() {
            return;
        }
        info!(channel = %self.channel, from = ?self.state, to = ?next, "Session state changed");
        self.state = next;
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
