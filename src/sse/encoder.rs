use std::future::pending;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::{report, BusErrorCallback, BusErrorContext, BusErrorKind};
use crate::{Event, EventBusError};

/// Response headers every event stream starts with.
pub const SSE_HEADERS: [(&str, &str); 4] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
    ("Transfer-Encoding", "chunked"),
];

const FRAME_PREFIX: &[u8] = b"data: ";
const FRAME_TERMINATOR: &[u8] = b"\n\n";

/// Byte destination bound to one client connection.
///
/// Headers set before the first flush are part of the response head. A write
/// or flush error means the client is gone.
#[async_trait]
pub trait SseSink: Send {
    fn set_header(&mut self, name: &'static str, value: &'static str);

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;
}

/// Encode the body of one SSE frame.
///
/// An empty array payload is written as the literal `[]`.
pub fn encode_event(event: &Event) -> Result<Vec<u8>, EventBusError> {
    match event.payload() {
        Some(Value::Array(items)) if items.is_empty() => Ok(b"[]".to_vec()),
        _ => Ok(serde_json::to_vec(event)?),
    }
}

/// Encode `event` as a complete `data: <json>\n\n` frame.
pub fn encode_frame(event: &Event) -> Result<Bytes, EventBusError> {
    let body = encode_event(event)?;
    let mut frame =
        BytesMut::with_capacity(FRAME_PREFIX.len() + body.len() + FRAME_TERMINATOR.len());
    frame.put_slice(FRAME_PREFIX);
    frame.put_slice(&body);
    frame.put_slice(FRAME_TERMINATOR);
    Ok(frame.freeze())
}

/// How a drive loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveExit {
    Cancelled,
    UpstreamClosed,
}

/// Writes an event sequence to a sink as server-sent events.
#[derive(Clone)]
pub struct SseEncoder {
    keepalive: Option<Duration>,
    on_error: Option<BusErrorCallback>,
}

impl std::fmt::Debug for SseEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseEncoder")
            .field("keepalive", &self.keepalive)
            .finish()
    }
}

impl Default for SseEncoder {
    fn default() -> Self {
        Self::new(Some(Duration::from_secs(10)))
    }
}

impl SseEncoder {
    /// `keepalive` is the idle interval after which an empty flush probes the client.
    pub fn new(keepalive: Option<Duration>) -> Self {
        Self {
            keepalive: keepalive.filter(|interval| !interval.is_zero()),
            on_error: None,
        }
    }

    pub fn with_error_callback(mut self, callback: BusErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive
    }

    /// Stream `events` into `sink` until cancelled, the events end, or a write fails.
    ///
    /// Headers are set and flushed before the first event is pulled. After a
    /// failed write nothing more is written.
    pub async fn drive<S, E>(
        &self,
        cancel: &CancellationToken,
        sink: &mut S,
        events: &mut E,
    ) -> Result<DriveExit, EventBusError>
    where
        S: SseSink + ?Sized,
        E: Stream<Item = Event> + Unpin + Send + ?Sized,
    {
        for (name, value) in SSE_HEADERS {
            sink.set_header(name, value);
        }
        self.flush(sink, "").await?;

        let mut deadline = self.next_deadline();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Event stream cancelled");
                    return Ok(DriveExit::Cancelled);
                }
                next = events.next() => {
                    let Some(event) = next else {
                        debug!("Upstream event sequence ended");
                        return Ok(DriveExit::UpstreamClosed);
                    };
                    let frame = encode_frame(&event)?;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(DriveExit::Cancelled),
                        written = self.write_frame(sink, event.id(), &frame) => written?,
                    }
                    deadline = self.next_deadline();
                }
                _ = idle(deadline) => {
                    trace!("Keepalive flush");
                    self.flush(sink, "").await?;
                    deadline = self.next_deadline();
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.keepalive.map(|interval| Instant::now() + interval)
    }

    async fn write_frame<S: SseSink + ?Sized>(
        &self,
        sink: &mut S,
        channel: &str,
        frame: &[u8],
    ) -> Result<(), EventBusError> {
        if let Err(err) = sink.write(frame).await {
            return Err(self.write_failed(channel, err));
        }
        self.flush(sink, channel).await
    }

    async fn flush<S: SseSink + ?Sized>(
        &self,
        sink: &mut S,
        channel: &str,
    ) -> Result<(), EventBusError> {
        sink.flush()
            .await
            .map_err(|err| self.write_failed(channel, err))
    }

    fn write_failed(&self, channel: &str, err: io::Error) -> EventBusError {
        report(
            self.on_error.as_ref(),
            BusErrorContext::new(
                "sse",
                channel,
                BusErrorKind::WriteFailure,
                err.to_string(),
                None,
            ),
        );
        EventBusError::Write(err)
    }
}

async fn idle(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelKey;
    use serde_json::json;

    fn room() -> ChannelKey {
        ChannelKey::new("room1").unwrap()
    }

    #[test]
    fn open_event_frame() {
        let frame = encode_frame(&Event::opened(&room())).unwrap();
        assert_eq!(&frame[..], b"data: {\"id\":\"room1\",\"payload\":null}\n\n");
    }

    #[test]
    fn object_payload_is_flattened() {
        let frame = encode_frame(&Event::new(&room(), json!({"temp": 42}))).unwrap();
        assert_eq!(&frame[..], b"data: {\"id\":\"room1\",\"temp\":42}\n\n");
    }

    #[test]
    fn empty_array_is_literal() {
        let frame = encode_frame(&Event::new(&room(), json!([]))).unwrap();
        assert_eq!(&frame[..], b"data: []\n\n");
    }

    #[test]
    fn scalar_payload_is_nested() {
        let body = encode_event(&Event::new(&room(), json!([1, 2]))).unwrap();
        assert_eq!(body, br#"{"id":"room1","payload":[1,2]}"#.to_vec());
    }

    #[test]
    fn zero_keepalive_disables_ticks() {
        assert_eq!(SseEncoder::new(Some(Duration::ZERO)).keepalive(), None);
        assert_eq!(
            SseEncoder::default().keepalive(),
            Some(Duration::from_secs(10))
        );
    }
}
