//! JSON payload decoding with per-transport statistics

use serde_json::Value;

use crate::error::Transport;

/// Counters for decoder success rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
}

/// Decodes raw message bytes from one transport into a JSON value.
///
/// Each session owns one decoder per transport, so the counters need no locking.
#[derive(Debug)]
pub struct PayloadDecoder {
    transport: Transport,
    stats: DecoderStats,
}

impl PayloadDecoder {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            stats: DecoderStats::default(),
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Attempt to decode `bytes` as JSON, recording the outcome.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Value, serde_json::Error> {
        self.stats.attempts += 1;
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => {
                self.stats.successes += 1;
                Ok(value)
            }
            Err(err) => {
                self.stats.failures += 1;
                tracing::debug!(
                    transport = %self.transport,
                    error = %err,
                    len = bytes.len(),
                    "Payload decode failed"
                );
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decoder_success() {
        let mut decoder = PayloadDecoder::new(Transport::PubSub);
        let value = decoder.decode(br#"{"x": 10.5, "y": 20.0}"#).unwrap();
        assert_eq!(value, json!({"x": 10.5, "y": 20.0}));
        assert_eq!(
            decoder.stats(),
            DecoderStats {
                attempts: 1,
                successes: 1,
                failures: 0
            }
        );
    }

    #[test]
    fn test_decoder_failure_handling() {
        let mut decoder = PayloadDecoder::new(Transport::Log);

        assert!(decoder.decode(b"not json at all").is_err());
        assert!(decoder.decode(b"").is_err());
        assert!(decoder.decode(b"[1,2]").is_ok());

        let stats = decoder.stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.successes, 1);
    }
}
