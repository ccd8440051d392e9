//! Core floodcam primitives shared across crates.
//!
//! Includes the assembly key and chunk value types, digest helpers, and base
//! errors.

pub mod error;
pub mod hash;
pub mod types;

pub use types::{
    AssemblyKey, ChunkMessage, ObjectDigest, SessionId, Variant, VARIANT_CURRENT_TAG,
    VARIANT_PREVIOUS_TAG,
};
