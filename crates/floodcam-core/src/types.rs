use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FloodcamError;

/// 32-byte BLAKE3 digest of a finalized object.
pub type ObjectDigest = [u8; 32];

/// Wire tag producers use for the reference image of a comparison cycle.
pub const VARIANT_PREVIOUS_TAG: &str = "anterior";
/// Wire tag producers use for the freshly captured image of a comparison cycle.
pub const VARIANT_CURRENT_TAG: &str = "atual";

const MAX_VARIANT_TAG_LEN: usize = 32;

/// Producer-chosen identifier tying together the objects of one capture cycle.
///
/// Depending on firmware this is a unix timestamp or a small counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which member of a capture cycle an object is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Variant {
    /// Reference frame (`anterior` / `previous`).
    Previous,
    /// Newly captured frame (`atual` / `current`).
    Current,
    /// Any other short producer tag, carried verbatim.
    Other(String),
}

impl Variant {
    /// Canonical wire tag.
    pub fn as_tag(&self) -> &str {
        match self {
            Variant::Previous => VARIANT_PREVIOUS_TAG,
            Variant::Current => VARIANT_CURRENT_TAG,
            Variant::Other(tag) => tag,
        }
    }

    /// Whether this variant takes part in previous/current pairing.
    pub fn is_pair_member(&self) -> bool {
        matches!(self, Variant::Previous | Variant::Current)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl FromStr for Variant {
    type Err = FloodcamError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_VARIANT_TAG_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(FloodcamError::InvalidVariant(raw.to_string()));
        }

        let lowered = raw.to_ascii_lowercase();
        Ok(match lowered.as_str() {
            "anterior" | "previous" | "prev" => Variant::Previous,
            "atual" | "current" | "curr" => Variant::Current,
            _ => Variant::Other(lowered),
        })
    }
}

impl TryFrom<String> for Variant {
    type Error = FloodcamError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Variant> for String {
    fn from(value: Variant) -> Self {
        value.as_tag().to_string()
    }
}

/// Identifies one in-flight assembly: `(session, variant)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssemblyKey {
    pub session: SessionId,
    pub variant: Variant,
}

impl AssemblyKey {
    pub fn new(session: SessionId, variant: Variant) -> Self {
        Self { session, variant }
    }
}

impl fmt::Display for AssemblyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.variant, self.session)
    }
}

/// One decoded chunk: a byte range of a larger object plus its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMessage {
    pub key: AssemblyKey,
    /// Byte offset of `payload` inside the object.
    pub offset: u32,
    /// Declared total object size.
    pub total_size: u32,
    pub payload: Vec<u8>,
}

impl ChunkMessage {
    /// Exclusive end offset of this chunk.
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + self.payload.len() as u64
    }

    /// Validates positional fields against the payload.
    pub fn validate(&self) -> Result<(), FloodcamError> {
        if self.payload.is_empty() {
            return Err(FloodcamError::InvalidInput("chunk payload must not be empty"));
        }
        if self.total_size == 0 {
            return Err(FloodcamError::InvalidInput("total size must be > 0"));
        }
        if self.end() > u64::from(self.total_size) {
            return Err(FloodcamError::InvalidInput(
                "chunk extends past declared total size",
            ));
        }
        Ok(())
    }
}
