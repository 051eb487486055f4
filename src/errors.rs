use std::sync::Arc;

use tracing::warn;

/// Enumerates the error kinds surfaced by the dispatcher, multiplexer and encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusErrorKind {
    InvalidConfig,
    Serialization,
    DeliveryFailure,
    SubscribeFailure,
    Decode,
    WriteFailure,
}

/// Context passed to error callbacks.
///
/// Only failures the relay survives are reported this way: a failed log-bus
/// publish under the default policy, a message that could not be decoded, or a
/// client that went away mid-stream.
#[derive(Debug, Clone)]
pub struct BusErrorContext {
    pub backend: &'static str,
    pub topic: String,
    pub kind: BusErrorKind,
    pub message: String,
    pub original_bytes: Option<Vec<u8>>,
}

/// Callback invoked when an error occurs.
pub type BusErrorCallback = Arc<dyn Fn(BusErrorContext) + Send + Sync + 'static>;

impl BusErrorContext {
    pub fn new(
        backend: &'static str,
        topic: impl Into<String>,
        kind: BusErrorKind,
        message: impl Into<String>,
        original_bytes: Option<Vec<u8>>,
    ) -> Self {
        Self {
            backend,
            topic: topic.into(),
            kind,
            message: message.into(),
            original_bytes,
        }
    }
}

/// Log a non-fatal error and hand it to the callback, if one is installed.
pub(crate) fn report(callback: Option<&BusErrorCallback>, context: BusErrorContext) {
    warn!(
        backend = context.backend,
        topic = %context.topic,
        kind = ?context.kind,
        error = %context.message,
        "Event bus error"
    );
    if let Some(callback) = callback {
        callback(context);
    }
}
