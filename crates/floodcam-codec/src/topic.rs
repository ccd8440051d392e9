use floodcam_core::{AssemblyKey, ChunkMessage, SessionId, Variant};

use crate::error::DecodeError;

/// Topic prefix the camera firmware publishes image chunks under.
pub const DEFAULT_CHUNK_TOPIC_PREFIX: &str = "enchentes/imagem/dados";
/// `{variant}/{session}/{offset}/{total_size}` after the prefix.
pub const CHUNK_TOPIC_TRAILING_SEGMENTS: usize = 4;

/// Positional fields carried by a chunk topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTopic {
    pub key: AssemblyKey,
    pub offset: u32,
    pub total_size: u32,
}

/// Builds the chunk topic for one byte range.
pub fn encode_chunk_topic(prefix: &str, key: &AssemblyKey, offset: u32, total_size: u32) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        prefix.trim_end_matches('/'),
        key.variant,
        key.session,
        offset,
        total_size
    )
}

/// Wildcard subscription covering every chunk topic under `prefix`.
pub fn chunk_subscription_pattern(prefix: &str) -> String {
    let mut pattern = prefix.trim_end_matches('/').to_string();
    for _ in 0..CHUNK_TOPIC_TRAILING_SEGMENTS {
        pattern.push_str("/+");
    }
    pattern
}

/// Whether `topic` lives under the chunk prefix (regardless of shape).
pub fn is_chunk_topic(prefix: &str, topic: &str) -> bool {
    strip_prefix(prefix, topic).is_some()
}

fn strip_prefix<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    topic.strip_prefix(prefix)?.strip_prefix('/')
}

// `u32::from_str` accepts a leading '+', which the grammar does not.
fn parse_decimal<T: std::str::FromStr>(segment: &str) -> Option<T> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Parses `<prefix>/<variant>/<session>/<offset>/<total_size>`.
pub fn parse_chunk_topic(prefix: &str, topic: &str) -> Result<ChunkTopic, DecodeError> {
    let rest = strip_prefix(prefix, topic)
        .ok_or_else(|| DecodeError::malformed_topic(topic, "missing chunk prefix"))?;

    let segments: Vec<&str> = rest.split('/').collect();
    if segments.len() != CHUNK_TOPIC_TRAILING_SEGMENTS {
        return Err(DecodeError::malformed_topic(topic, "wrong segment count"));
    }

    let variant: Variant = segments[0]
        .parse()
        .map_err(|_| DecodeError::malformed_topic(topic, "invalid variant tag"))?;
    let session = parse_decimal::<u64>(segments[1])
        .ok_or_else(|| DecodeError::malformed_topic(topic, "non-numeric session id"))?;
    let offset = parse_decimal::<u32>(segments[2])
        .ok_or_else(|| DecodeError::malformed_topic(topic, "non-numeric offset"))?;
    let total_size = parse_decimal::<u32>(segments[3])
        .ok_or_else(|| DecodeError::malformed_topic(topic, "non-numeric total size"))?;

    Ok(ChunkTopic {
        key: AssemblyKey::new(SessionId(session), variant),
        offset,
        total_size,
    })
}

/// Decodes a path-encoded chunk; the payload is the raw chunk bytes.
pub fn decode_chunk(
    prefix: &str,
    topic: &str,
    payload: &[u8],
) -> Result<ChunkMessage, DecodeError> {
    let parsed = parse_chunk_topic(prefix, topic)?;
    let chunk = ChunkMessage {
        key: parsed.key,
        offset: parsed.offset,
        total_size: parsed.total_size,
        payload: payload.to_vec(),
    };
    chunk.validate()?;
    Ok(chunk)
}
