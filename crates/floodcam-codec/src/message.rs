use floodcam_core::ChunkMessage;
use serde::Deserialize;

use crate::envelope::{decode_envelope, ImageEnvelope, DEFAULT_ENVELOPE_TOPIC};
use crate::error::DecodeError;
use crate::topic::{
    chunk_subscription_pattern, decode_chunk, is_chunk_topic, DEFAULT_CHUNK_TOPIC_PREFIX,
};

/// Which subjects carry which encoding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Fixed prefix in front of `{variant}/{session}/{offset}/{total}`.
    pub chunk_topic_prefix: String,
    /// Exact subjects whose payload is a whole-image JSON envelope.
    pub envelope_topics: Vec<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            chunk_topic_prefix: DEFAULT_CHUNK_TOPIC_PREFIX.to_string(),
            envelope_topics: vec![DEFAULT_ENVELOPE_TOPIC.to_string()],
        }
    }
}

impl DecoderConfig {
    /// One pattern per supported encoding: the chunk wildcard, then each
    /// envelope subject.
    pub fn subscription_patterns(&self) -> Vec<String> {
        let mut patterns = Vec::with_capacity(1 + self.envelope_topics.len());
        patterns.push(chunk_subscription_pattern(&self.chunk_topic_prefix));
        patterns.extend(self.envelope_topics.iter().cloned());
        patterns
    }

    fn is_envelope_topic(&self, topic: &str) -> bool {
        self.envelope_topics.iter().any(|t| t == topic)
    }
}

/// One decoded transport message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A positioned byte range that needs reassembly.
    Chunk(ChunkMessage),
    /// A complete image that bypasses reassembly.
    Whole(ImageEnvelope),
}

/// Classifies and decodes a raw `(topic, payload)` message.
///
/// Envelope subjects are matched first so a producer sending small objects
/// unchunked never reaches the chunk parser.
pub fn decode_message(
    config: &DecoderConfig,
    topic: &str,
    payload: &[u8],
) -> Result<Decoded, DecodeError> {
    if config.is_envelope_topic(topic) {
        return decode_envelope(payload).map(Decoded::Whole);
    }
    if is_chunk_topic(&config.chunk_topic_prefix, topic) {
        return decode_chunk(&config.chunk_topic_prefix, topic, payload).map(Decoded::Chunk);
    }
    Err(DecodeError::UnknownTopic(topic.to_string()))
}
