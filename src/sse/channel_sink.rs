use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use super::encoder::SseSink;

pub type HeaderList = Vec<(&'static str, &'static str)>;

/// Receiving halves of a [`ChannelSink`].
#[derive(Debug)]
pub struct ChannelSinkReceiver {
    /// Resolves with the headers on the sink's first flush.
    pub headers: oneshot::Receiver<HeaderList>,
    /// One chunk per non-empty flush.
    pub body: ReceiverStream<Bytes>,
}

/// An [`SseSink`] that hands its output to another task.
///
/// Writes are buffered until `flush`, which sends the buffer as one chunk.
/// Once the receiving side is dropped every write and flush fails with
/// [`io::ErrorKind::BrokenPipe`].
#[derive(Debug)]
pub struct ChannelSink {
    headers: HeaderList,
    head: Option<oneshot::Sender<HeaderList>>,
    buffer: BytesMut,
    body: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Create a sink whose body queue holds at most `capacity` chunks.
    pub fn new(capacity: usize) -> (Self, ChannelSinkReceiver) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            headers: Vec::new(),
            head: Some(head_tx),
            buffer: BytesMut::new(),
            body: body_tx,
        };
        let receiver = ChannelSinkReceiver {
            headers: head_rx,
            body: ReceiverStream::new(body_rx),
        };
        (sink, receiver)
    }

    pub fn headers_sent(&self) -> bool {
        self.head.is_none()
    }
}

fn client_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected")
}

#[async_trait]
impl SseSink for ChannelSink {
    fn set_header(&mut self, name: &'static str, value: &'static str) {
        if self.head.is_some() {
            self.headers.push((name, value));
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.body.is_closed() {
            return Err(client_gone());
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        if let Some(head) = self.head.take() {
            head.send(std::mem::take(&mut self.headers))
                .map_err(|_| client_gone())?;
        }
        if self.buffer.is_empty() {
            return if self.body.is_closed() {
                Err(client_gone())
            } else {
                Ok(())
            };
        }
        let chunk = self.buffer.split().freeze();
        self.body.send(chunk).await.map_err(|_| client_gone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn headers_then_chunks() {
        let (mut sink, mut rx) = ChannelSink::new(4);
        sink.set_header("Content-Type", "text/event-stream");
        sink.flush().await.unwrap();
        assert!(sink.headers_sent());
        assert_eq!(
            rx.headers.await.unwrap(),
            vec![("Content-Type", "text/event-stream")]
        );

        sink.write(b"data: 1").await.unwrap();
        sink.write(b"\n\n").await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(rx.body.next().await.unwrap(), Bytes::from_static(b"data: 1\n\n"));
    }

    #[tokio::test]
    async fn dropped_receiver_breaks_pipe() {
        let (mut sink, rx) = ChannelSink::new(4);
        sink.flush().await.unwrap();
        drop(rx);

        let err = sink.write(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(sink.flush().await.is_err());
    }
}
