use std::time::Instant;

use floodcam_core::AssemblyKey;
use tracing::warn;

use crate::buffer::{AssemblyBuffer, Contiguity};
use crate::error::ReassemblyError;
use crate::manager::AssemblyBufferManager;

/// How a complete buffer relates to its declared size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    /// Coverage equals the declared size.
    Exact,
    /// Coverage ran past the declared size; the object is cut to size.
    Truncated { excess: u64 },
}

/// Outcome of a completion check for one key.
#[derive(Debug, Clone)]
pub enum Completion {
    /// Still short of the declared size.
    Pending { received_bytes: u64, total_size: u32 },
    /// Enough bytes, but a hole remains; buffer stays open.
    Gap { expected: u64, actual: u64 },
    /// Buffer was detached and must be finalized by the caller.
    Complete {
        buffer: AssemblyBuffer,
        kind: CompletionKind,
    },
    /// No open buffer: already finalized, evicted, or never seen.
    Closed,
}

pub(crate) enum Verdict {
    Pending { received_bytes: u64, total_size: u32 },
    Gap { expected: u64, actual: u64 },
    Complete(CompletionKind),
}

pub(crate) fn evaluate(buffer: &AssemblyBuffer) -> Verdict {
    let received_bytes = buffer.received_bytes();
    let total_size = buffer.total_size();
    let total = u64::from(total_size);
    if received_bytes < total {
        return Verdict::Pending {
            received_bytes,
            total_size,
        };
    }
    match buffer.contiguity(total) {
        Contiguity::Gap { expected, actual } => Verdict::Gap { expected, actual },
        Contiguity::Contiguous if received_bytes == total => {
            Verdict::Complete(CompletionKind::Exact)
        }
        Contiguity::Contiguous => Verdict::Complete(CompletionKind::Truncated {
            excess: received_bytes - total,
        }),
    }
}

/// Runs after each ingest to decide whether a key can be finalized.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompletionDetector;

impl CompletionDetector {
    pub fn new() -> Self {
        Self
    }

    /// Checks `key` and detaches its buffer when complete. Gaps and
    /// over-coverage are logged here.
    pub fn check(
        &self,
        manager: &AssemblyBufferManager,
        key: &AssemblyKey,
        now: Instant,
    ) -> Completion {
        let completion = manager.detach_if_complete(key, now);
        match &completion {
            Completion::Gap { expected, actual } => {
                let err = ReassemblyError::Gap {
                    key: key.clone(),
                    expected: *expected,
                    actual: *actual,
                };
                warn!(
                    session = %key.session,
                    variant = %key.variant,
                    "{err}; keeping buffer open"
                );
            }
            Completion::Complete {
                buffer,
                kind: CompletionKind::Truncated { excess },
            } => {
                warn!(
                    session = %key.session,
                    variant = %key.variant,
                    received = buffer.received_bytes(),
                    total = buffer.total_size(),
                    excess,
                    "over-covered assembly truncated to declared size"
                );
            }
            _ => {}
        }
        completion
    }
}
