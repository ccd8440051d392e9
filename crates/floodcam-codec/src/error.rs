use floodcam_core::error::FloodcamError;
use thiserror::Error;

/// Errors returned while decoding a transport message.
///
/// Every variant is scoped to one message; callers log and drop.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Topic matches neither the chunk prefix nor an envelope subject.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    /// Chunk topic with the wrong segment count or non-numeric fields.
    #[error("malformed topic {topic:?}: {reason}")]
    MalformedTopic { topic: String, reason: &'static str },
    /// Positional fields inconsistent with the payload.
    #[error("invalid chunk: {0}")]
    InvalidChunk(#[from] FloodcamError),
    /// Envelope payload is not the expected JSON record.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),
    /// Envelope record without an `image` field.
    #[error("envelope missing image field")]
    MissingImage,
    /// `image` field is not valid base64.
    #[error("envelope image is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    /// `image` decoded to zero bytes.
    #[error("envelope image is empty")]
    EmptyImage,
}

impl DecodeError {
    pub(crate) fn malformed_topic(topic: &str, reason: &'static str) -> Self {
        Self::MalformedTopic {
            topic: topic.to_string(),
            reason,
        }
    }
}
