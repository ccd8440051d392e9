//! Chunked binary reassembly.
//!
//! Keeps one sparse byte-range buffer per in-flight [`AssemblyKey`], decides
//! when a buffer is complete and contiguous, and expires buffers that stop
//! receiving chunks.
//!
//! [`AssemblyKey`]: floodcam_core::AssemblyKey

pub mod buffer;
pub mod completion;
pub mod error;
pub mod eviction;
pub mod manager;

pub use buffer::AssemblyBuffer;
pub use completion::{Completion, CompletionDetector, CompletionKind};
pub use error::ReassemblyError;
pub use eviction::{Eviction, EvictionCause, Evictor};
pub use manager::{AssemblyBufferManager, IngestStatus, Ingested, ManagerLimits};
