use floodcam_core::AssemblyKey;
use thiserror::Error;

/// Per-assembly failures. None of these affect other keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    /// Enough bytes arrived but a range is missing; the buffer stays open.
    #[error("gap in {key}: expected offset {expected}, next range starts at {actual}")]
    Gap {
        key: AssemblyKey,
        expected: u64,
        actual: u64,
    },
    /// Buffer went stale before completing and was discarded.
    #[error("assembly {key} timed out with {received_bytes}/{total_size} bytes")]
    Timeout {
        key: AssemblyKey,
        received_bytes: u64,
        total_size: u32,
    },
    /// Chunks of one key declared different total sizes.
    #[error("total size for {key} changed from {previous} to {declared}")]
    SizeMismatch {
        key: AssemblyKey,
        previous: u32,
        declared: u32,
    },
    /// Chunk for a key that was already finalized or evicted.
    #[error("orphan chunk for closed assembly {key}")]
    Orphan { key: AssemblyKey },
    /// Declared size above the configured ceiling.
    #[error("assembly {key} declares {total_size} bytes, limit is {max}")]
    ObjectTooLarge {
        key: AssemblyKey,
        total_size: u32,
        max: u32,
    },
}
