//! Server-sent events framing and the sinks it writes to.

mod channel_sink;
mod encoder;

pub use channel_sink::{ChannelSink, ChannelSinkReceiver, HeaderList};
pub use encoder::{encode_event, encode_frame, DriveExit, SseEncoder, SseSink, SSE_HEADERS};
