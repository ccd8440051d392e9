//! Floodcam wire decoding.
//!
//! Turns raw `(topic, payload)` transport messages into either a positioned
//! chunk (path-encoded topics) or an already-complete image (JSON envelope).

pub mod envelope;
pub mod error;
pub mod message;
pub mod topic;

pub use error::DecodeError;
pub use message::{decode_message, Decoded, DecoderConfig};
