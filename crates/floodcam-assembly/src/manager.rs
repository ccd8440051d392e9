use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use floodcam_core::{AssemblyKey, ChunkMessage};
use tracing::{debug, warn};

use crate::buffer::{AssemblyBuffer, RangeInsert};
use crate::completion::{evaluate, Completion, Verdict};
use crate::error::ReassemblyError;
use crate::eviction::{Eviction, EvictionCause, TombstoneSet};

pub const DEFAULT_MAX_OPEN_ASSEMBLIES: usize = 64;
pub const DEFAULT_MAX_OBJECT_SIZE: u32 = 8 * 1024 * 1024;
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(600);
pub const DEFAULT_TOMBSTONE_CAPACITY: usize = 1024;

/// Memory bounds for the buffer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerLimits {
    /// Open buffers allowed at once; a new key beyond this displaces the
    /// least recently updated buffer.
    pub max_open_assemblies: usize,
    /// Largest total size a chunk may declare.
    pub max_object_size: u32,
    /// How long a finalized or evicted key rejects late chunks.
    pub tombstone_ttl: Duration,
    pub tombstone_capacity: usize,
}

impl Default for ManagerLimits {
    fn default() -> Self {
        Self {
            max_open_assemblies: DEFAULT_MAX_OPEN_ASSEMBLIES,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            tombstone_capacity: DEFAULT_TOMBSTONE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    /// Fewer bytes than declared so far.
    Buffered,
    /// Coverage reached the declared size; run the completion check.
    Ready,
}

/// What one successful [`AssemblyBufferManager::ingest`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub key: AssemblyKey,
    pub status: IngestStatus,
    pub received_bytes: u64,
    pub total_size: u32,
    /// Chunk opened a new buffer.
    pub created: bool,
    /// Chunk replaced bytes already held at the same offset.
    pub duplicate: bool,
    /// Previously declared total size, when this chunk changed it.
    pub size_mismatch: Option<u32>,
    /// Buffer dropped to make room for this key.
    pub displaced: Option<Eviction>,
}

struct Inner {
    buffers: HashMap<AssemblyKey, AssemblyBuffer>,
    tombstones: TombstoneSet,
}

impl Inner {
    fn close(&mut self, key: &AssemblyKey, now: Instant) -> Option<AssemblyBuffer> {
        let removed = self.buffers.remove(key);
        if removed.is_some() {
            self.tombstones.close(key.clone(), now);
        }
        removed
    }

    fn evict_least_recent(&mut self, now: Instant) -> Option<Eviction> {
        let key = self
            .buffers
            .values()
            .min_by_key(|buffer| buffer.last_updated_at())
            .map(|buffer| buffer.key().clone())?;
        let buffer = self.close(&key, now)?;
        Some(Eviction::from_buffer(&buffer, now, EvictionCause::Capacity))
    }
}

/// Owner of every in-flight [`AssemblyBuffer`].
///
/// All table mutations go through one mutex. Chunk rates are low enough that
/// sharding buys nothing, and a single lock makes "detach once" and "evict
/// versus ingest" trivially exclusive.
pub struct AssemblyBufferManager {
    limits: ManagerLimits,
    inner: Mutex<Inner>,
}

impl Default for AssemblyBufferManager {
    fn default() -> Self {
        Self::new(ManagerLimits::default())
    }
}

impl AssemblyBufferManager {
    pub fn new(limits: ManagerLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner {
                buffers: HashMap::new(),
                tombstones: TombstoneSet::new(limits.tombstone_capacity, limits.tombstone_ttl),
            }),
        }
    }

    pub fn limits(&self) -> ManagerLimits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Merges one chunk into the buffer for its key, creating the buffer on
    /// first sight.
    ///
    /// Bytes already held are overwritten in place, so re-delivery never
    /// inflates the byte count or the memory held. A chunk for a recently
    /// closed key is rejected as [`ReassemblyError::Orphan`].
    pub fn ingest(&self, chunk: ChunkMessage, now: Instant) -> Result<Ingested, ReassemblyError> {
        let ChunkMessage {
            key,
            offset,
            total_size,
            payload,
        } = chunk;

        let max = self.limits.max_object_size;
        let end = u64::from(offset) + payload.len() as u64;
        if total_size > max || end > u64::from(max) {
            return Err(ReassemblyError::ObjectTooLarge {
                key,
                total_size: total_size.max(u32::try_from(end).unwrap_or(u32::MAX)),
                max,
            });
        }

        let payload_len = payload.len();
        let mut inner = self.lock();
        let mut created = false;
        let mut displaced = None;
        let mut size_mismatch = None;

        if !inner.buffers.contains_key(&key) {
            if inner.tombstones.is_closed(&key, now) {
                return Err(ReassemblyError::Orphan { key });
            }
            if inner.buffers.len() >= self.limits.max_open_assemblies.max(1) {
                displaced = inner.evict_least_recent(now);
                if let Some(eviction) = &displaced {
                    eviction.log();
                }
            }
            inner
                .buffers
                .insert(key.clone(), AssemblyBuffer::new(key.clone(), total_size, now));
            created = true;
        }

        let Some(buffer) = inner.buffers.get_mut(&key) else {
            return Err(ReassemblyError::Orphan { key });
        };

        if let Some(previous) = buffer.declare_total_size(total_size) {
            let err = ReassemblyError::SizeMismatch {
                key: key.clone(),
                previous,
                declared: total_size,
            };
            warn!(
                session = %key.session,
                variant = %key.variant,
                offset,
                "{err}; using latest size"
            );
            size_mismatch = Some(previous);
        }

        let duplicate = buffer.insert(offset, payload, now) == RangeInsert::Replaced;
        let received_bytes = buffer.received_bytes();
        let total_size = buffer.total_size();
        let status = if received_bytes >= u64::from(total_size) {
            IngestStatus::Ready
        } else {
            IngestStatus::Buffered
        };

        debug!(
            session = %key.session,
            variant = %key.variant,
            offset,
            len = payload_len,
            received = received_bytes,
            total = total_size,
            duplicate,
            "chunk buffered"
        );

        Ok(Ingested {
            key,
            status,
            received_bytes,
            total_size,
            created,
            duplicate,
            size_mismatch,
            displaced,
        })
    }

    /// Copy of the buffer for `key`, if open.
    pub fn get(&self, key: &AssemblyKey) -> Option<AssemblyBuffer> {
        self.lock().buffers.get(key).cloned()
    }

    pub fn contains(&self, key: &AssemblyKey) -> bool {
        self.lock().buffers.contains_key(key)
    }

    /// Drops the buffer for `key` and tombstones the key. Removing an absent
    /// key is a no-op.
    pub fn remove(&self, key: &AssemblyKey, now: Instant) -> Option<AssemblyBuffer> {
        self.lock().close(key, now)
    }

    /// Evaluates the buffer for `key` and, only when it is complete and
    /// contiguous, takes it out of the table in the same critical section.
    ///
    /// Two racing callers for one key can never both receive
    /// [`Completion::Complete`]; the loser sees [`Completion::Closed`].
    pub fn detach_if_complete(&self, key: &AssemblyKey, now: Instant) -> Completion {
        let mut inner = self.lock();
        let Some(buffer) = inner.buffers.get(key) else {
            return Completion::Closed;
        };
        match evaluate(buffer) {
            Verdict::Pending {
                received_bytes,
                total_size,
            } => Completion::Pending {
                received_bytes,
                total_size,
            },
            Verdict::Gap { expected, actual } => Completion::Gap { expected, actual },
            Verdict::Complete(kind) => match inner.close(key, now) {
                Some(buffer) => Completion::Complete { buffer, kind },
                None => Completion::Closed,
            },
        }
    }

    /// Keys whose buffers have been idle for at least `staleness`.
    pub fn stale_keys(&self, now: Instant, staleness: Duration) -> Vec<AssemblyKey> {
        self.lock()
            .buffers
            .values()
            .filter(|b| now.saturating_duration_since(b.last_updated_at()) >= staleness)
            .map(|b| b.key().clone())
            .collect()
    }

    /// Removes and tombstones every stale buffer under one lock, and prunes
    /// expired tombstones.
    pub(crate) fn drain_stale(&self, now: Instant, staleness: Duration) -> Vec<Eviction> {
        let mut inner = self.lock();
        let stale: Vec<AssemblyKey> = inner
            .buffers
            .values()
            .filter(|b| now.saturating_duration_since(b.last_updated_at()) >= staleness)
            .map(|b| b.key().clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for key in stale {
            if let Some(buffer) = inner.close(&key, now) {
                evicted.push(Eviction::from_buffer(&buffer, now, EvictionCause::Stale));
            }
        }
        inner.tombstones.prune(now);
        evicted
    }

    /// Number of open buffers.
    pub fn len(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buffers.is_empty()
    }

    /// Number of remembered closed keys.
    pub fn tombstone_count(&self) -> usize {
        self.lock().tombstones.len()
    }
}
