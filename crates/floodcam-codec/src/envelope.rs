use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use floodcam_core::{AssemblyKey, SessionId, Variant};
use serde::Deserialize;

use crate::error::DecodeError;

/// Default subject for whole-image envelopes.
pub const DEFAULT_ENVELOPE_TOPIC: &str = "esp32cam/image";

const UNKNOWN_TAG: &str = "unknown";

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    timestamp: u64,
    #[serde(default, alias = "device_id")]
    device: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    variant: Option<Variant>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    format: Option<i64>,
    #[serde(default)]
    difference: Option<f64>,
}

/// A whole image delivered in one message, plus producer metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEnvelope {
    /// Capture time in seconds; doubles as the session id.
    pub timestamp: u64,
    pub device: String,
    /// Why the producer sent the image (`first_capture`, `significant_change`, ...).
    pub reason: String,
    pub variant: Variant,
    /// Decoded image bytes.
    pub image: Vec<u8>,
    /// Producer-declared size, when sent.
    pub declared_size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<i64>,
    /// Percent difference against the reference frame.
    pub difference: Option<f64>,
}

impl ImageEnvelope {
    pub fn key(&self) -> AssemblyKey {
        AssemblyKey::new(SessionId(self.timestamp), self.variant.clone())
    }
}

/// Decodes a JSON envelope carrying a base64 image.
pub fn decode_envelope(payload: &[u8]) -> Result<ImageEnvelope, DecodeError> {
    let raw: RawEnvelope = serde_json::from_slice(payload)?;
    let encoded = raw.image.ok_or(DecodeError::MissingImage)?;
    let image = STANDARD.decode(encoded.trim())?;
    if image.is_empty() {
        return Err(DecodeError::EmptyImage);
    }

    Ok(ImageEnvelope {
        timestamp: raw.timestamp,
        device: raw.device.unwrap_or_else(|| UNKNOWN_TAG.to_string()),
        reason: raw.reason.unwrap_or_else(|| UNKNOWN_TAG.to_string()),
        variant: raw.variant.unwrap_or(Variant::Current),
        image,
        declared_size: raw.size,
        width: raw.width,
        height: raw.height,
        format: raw.format,
        difference: raw.difference,
    })
}
