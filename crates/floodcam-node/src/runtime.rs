use std::time::Instant;

use floodcam_assembly::{
    AssemblyBufferManager, Completion, CompletionDetector, CompletionKind, Eviction, Evictor,
    IngestStatus, ReassemblyError,
};
use floodcam_codec::{decode_message, DecodeError, Decoded, DecoderConfig};
use floodcam_core::AssemblyKey;
use floodcam_transport::adapter::TransportAdapter;
use tracing::{debug, warn};

use crate::config::ReassemblyConfig;
use crate::error::RuntimeError;
use crate::finalize::{assemble, from_envelope, CompletedObject};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Transport messages handed to the pipeline.
    pub messages: u64,
    /// Messages decoded as path-encoded chunks.
    pub chunks: u64,
    /// Messages decoded as whole-image envelopes.
    pub envelopes: u64,
    /// Messages dropped by the decoder, unknown topics included.
    pub decode_errors: u64,
    /// Chunks whose whole range was already held.
    pub duplicates: u64,
    pub size_mismatches: u64,
    /// Chunks for recently closed keys.
    pub orphans: u64,
    /// Objects declaring more than the configured maximum.
    pub oversized: u64,
    /// Completion checks that found a hole.
    pub gaps: u64,
    pub completed_exact: u64,
    pub completed_truncated: u64,
    pub completed_envelope: u64,
    /// Incomplete assemblies discarded by staleness or capacity.
    pub evictions: u64,
    /// Messages refused because the ingest queue was full.
    pub queue_drops: u64,
    pub persisted: u64,
    pub persistence_failures: u64,
    pub pairs_completed: u64,
}

impl RuntimeStats {
    /// Objects handed to the finalizer so far.
    pub fn completed(&self) -> u64 {
        self.completed_exact + self.completed_truncated + self.completed_envelope
    }
}

/// What one processed message did.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// Chunk stored; assembly still open.
    Buffered {
        key: AssemblyKey,
        received_bytes: u64,
        total_size: u32,
        duplicate: bool,
    },
    /// Enough bytes arrived but a range is missing.
    Gap {
        key: AssemblyKey,
        expected: u64,
        actual: u64,
    },
    /// Object ready for the finalizer.
    Completed(CompletedObject),
}

/// Decoder, buffer table and detectors for one collector instance.
pub struct Pipeline {
    decoder: DecoderConfig,
    manager: AssemblyBufferManager,
    detector: CompletionDetector,
    evictor: Evictor,
}

impl Pipeline {
    pub fn new(config: &ReassemblyConfig) -> Self {
        Self {
            decoder: config.decoder.clone(),
            manager: AssemblyBufferManager::new(config.manager_limits()),
            detector: CompletionDetector::new(),
            evictor: Evictor::new(config.staleness),
        }
    }

    pub fn decoder(&self) -> &DecoderConfig {
        &self.decoder
    }

    pub fn manager(&self) -> &AssemblyBufferManager {
        &self.manager
    }

    /// Evicts stale assemblies and counts them.
    pub fn sweep(&self, now: Instant, stats: &mut RuntimeStats) -> Vec<Eviction> {
        let evicted = self.evictor.sweep(&self.manager, now);
        stats.evictions += evicted.len() as u64;
        evicted
    }
}

fn record_error(err: &RuntimeError, topic: &str, stats: &mut RuntimeStats) {
    match err {
        RuntimeError::Decode(DecodeError::UnknownTopic(_)) => {
            stats.decode_errors += 1;
            debug!(topic, "ignoring message on unknown topic");
        }
        RuntimeError::Decode(err) => {
            stats.decode_errors += 1;
            warn!(topic, "dropping undecodable message: {err}");
        }
        RuntimeError::Reassembly(ReassemblyError::Orphan { key }) => {
            stats.orphans += 1;
            warn!(
                session = %key.session,
                variant = %key.variant,
                "dropping orphan chunk"
            );
        }
        RuntimeError::Reassembly(err @ ReassemblyError::ObjectTooLarge { .. }) => {
            stats.oversized += 1;
            warn!(topic, "dropping message: {err}");
        }
        RuntimeError::Reassembly(err) => {
            warn!(topic, "{err}");
        }
    }
}

fn handle_decoded(
    pipeline: &Pipeline,
    decoded: Decoded,
    now: Instant,
    stats: &mut RuntimeStats,
) -> Result<RuntimeEvent, ReassemblyError> {
    let chunk = match decoded {
        Decoded::Whole(envelope) => {
            stats.envelopes += 1;
            let max = pipeline.manager.limits().max_object_size;
            if envelope.image.len() > max as usize {
                return Err(ReassemblyError::ObjectTooLarge {
                    key: envelope.key(),
                    total_size: u32::try_from(envelope.image.len()).unwrap_or(u32::MAX),
                    max,
                });
            }
            stats.completed_envelope += 1;
            return Ok(RuntimeEvent::Completed(from_envelope(envelope)));
        }
        Decoded::Chunk(chunk) => chunk,
    };

    stats.chunks += 1;
    let ingested = pipeline.manager.ingest(chunk, now)?;
    if ingested.duplicate {
        stats.duplicates += 1;
    }
    if ingested.size_mismatch.is_some() {
        stats.size_mismatches += 1;
    }
    if ingested.displaced.is_some() {
        stats.evictions += 1;
    }

    let buffered = RuntimeEvent::Buffered {
        key: ingested.key.clone(),
        received_bytes: ingested.received_bytes,
        total_size: ingested.total_size,
        duplicate: ingested.duplicate,
    };
    if ingested.status == IngestStatus::Buffered {
        return Ok(buffered);
    }

    match pipeline.detector.check(&pipeline.manager, &ingested.key, now) {
        Completion::Complete { buffer, kind } => {
            match kind {
                CompletionKind::Exact => stats.completed_exact += 1,
                CompletionKind::Truncated { .. } => stats.completed_truncated += 1,
            }
            Ok(RuntimeEvent::Completed(assemble(buffer, kind)))
        }
        Completion::Gap { expected, actual } => {
            stats.gaps += 1;
            Ok(RuntimeEvent::Gap {
                key: ingested.key,
                expected,
                actual,
            })
        }
        // Another caller touched the buffer between ingest and check.
        Completion::Pending { .. } | Completion::Closed => Ok(buffered),
    }
}

/// Runs one transport message through decode, ingest and completion.
///
/// Errors are scoped to the message; they are counted and logged here and
/// returned so callers can inspect them, but never poison other keys.
pub fn process_message(
    pipeline: &Pipeline,
    topic: &str,
    payload: &[u8],
    now: Instant,
    stats: &mut RuntimeStats,
) -> Result<RuntimeEvent, RuntimeError> {
    stats.messages += 1;
    let result = decode_message(&pipeline.decoder, topic, payload)
        .map_err(RuntimeError::from)
        .and_then(|decoded| {
            handle_decoded(pipeline, decoded, now, stats).map_err(RuntimeError::from)
        });
    if let Err(err) = &result {
        record_error(err, topic, stats);
    }
    result
}

/// Subscribes `adapter` to every pattern the decoder understands.
pub fn subscribe_all<A: TransportAdapter>(
    adapter: &mut A,
    decoder: &DecoderConfig,
) -> Result<(), A::Error> {
    for pattern in decoder.subscription_patterns() {
        adapter.subscribe(&pattern)?;
    }
    Ok(())
}

/// Polls one message from `adapter` and processes it. `None` when the
/// adapter has nothing queued.
pub fn pump_once<A: TransportAdapter>(
    adapter: &mut A,
    pipeline: &Pipeline,
    now: Instant,
    stats: &mut RuntimeStats,
) -> Option<Result<RuntimeEvent, RuntimeError>> {
    if !adapter.can_recv() {
        return None;
    }
    let message = adapter.recv()?;
    Some(process_message(
        pipeline,
        &message.topic,
        &message.payload,
        now,
        stats,
    ))
}
