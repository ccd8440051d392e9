//! Transport abstractions for floodcam.
//!
//! The collector only depends on the topic/payload adapter trait and the
//! subscription pattern matcher defined in this crate.

pub mod adapter;
pub mod pattern;
