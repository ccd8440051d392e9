use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use floodcam_core::AssemblyKey;
use lru::LruCache;
use tracing::warn;

use crate::buffer::AssemblyBuffer;
use crate::error::ReassemblyError;
use crate::manager::AssemblyBufferManager;

/// Why a buffer was discarded without finalizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    /// No chunk arrived within the staleness threshold.
    Stale,
    /// Table was full when a new key arrived; least recently updated buffer
    /// made room.
    Capacity,
}

/// Diagnostic record of one discarded, incomplete assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub key: AssemblyKey,
    pub received_bytes: u64,
    pub total_size: u32,
    pub idle: Duration,
    pub cause: EvictionCause,
}

impl Eviction {
    pub(crate) fn from_buffer(buffer: &AssemblyBuffer, now: Instant, cause: EvictionCause) -> Self {
        Self {
            key: buffer.key().clone(),
            received_bytes: buffer.received_bytes(),
            total_size: buffer.total_size(),
            idle: now.saturating_duration_since(buffer.last_updated_at()),
            cause,
        }
    }

    pub fn to_error(&self) -> ReassemblyError {
        ReassemblyError::Timeout {
            key: self.key.clone(),
            received_bytes: self.received_bytes,
            total_size: self.total_size,
        }
    }

    pub(crate) fn log(&self) {
        let err = self.to_error();
        warn!(
            session = %self.key.session,
            variant = %self.key.variant,
            received = self.received_bytes,
            total = self.total_size,
            idle_ms = self.idle.as_millis() as u64,
            cause = ?self.cause,
            "evicted incomplete assembly: {err}"
        );
    }
}

/// Recently closed keys; chunks for these are orphans.
///
/// Bounded both by capacity and by age so a reused key is accepted again once
/// its tombstone expires.
#[derive(Debug)]
pub struct TombstoneSet {
    closed: LruCache<AssemblyKey, Instant>,
    ttl: Duration,
}

impl TombstoneSet {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            closed: LruCache::new(capacity),
            ttl,
        }
    }

    /// Marks `key` closed at `now`.
    pub fn close(&mut self, key: AssemblyKey, now: Instant) {
        self.closed.put(key, now);
    }

    /// Whether `key` was closed less than `ttl` ago. Expired entries are
    /// dropped on lookup.
    pub fn is_closed(&mut self, key: &AssemblyKey, now: Instant) -> bool {
        match self.closed.peek(key) {
            Some(closed_at) if now.saturating_duration_since(*closed_at) < self.ttl => true,
            Some(_) => {
                self.closed.pop(key);
                false
            }
            None => false,
        }
    }

    /// Drops expired entries, oldest first.
    pub fn prune(&mut self, now: Instant) -> usize {
        let mut pruned = 0;
        while let Some((_, closed_at)) = self.closed.peek_lru() {
            if now.saturating_duration_since(*closed_at) < self.ttl {
                break;
            }
            self.closed.pop_lru();
            pruned += 1;
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.closed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty()
    }
}

/// Timer-driven sweeper for stale assemblies.
#[derive(Debug, Clone, Copy)]
pub struct Evictor {
    staleness: Duration,
}

impl Evictor {
    pub fn new(staleness: Duration) -> Self {
        Self { staleness }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Evicts every buffer idle for at least the staleness threshold.
    ///
    /// Selection and removal happen under one lock acquisition, so a chunk
    /// landing mid-sweep either refreshes its buffer first or finds it gone.
    pub fn sweep(&self, manager: &AssemblyBufferManager, now: Instant) -> Vec<Eviction> {
        let evicted = manager.drain_stale(now, self.staleness);
        for eviction in &evicted {
            eviction.log();
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use floodcam_core::{AssemblyKey, SessionId, Variant};

    use super::TombstoneSet;

    fn key(session: u64) -> AssemblyKey {
        AssemblyKey::new(SessionId(session), Variant::Current)
    }

    #[test]
    fn tombstone_expires_after_ttl() {
        let t0 = Instant::now();
        let mut set = TombstoneSet::new(8, Duration::from_secs(10));
        set.close(key(1), t0);

        assert!(set.is_closed(&key(1), t0 + Duration::from_secs(9)));
        assert!(!set.is_closed(&key(1), t0 + Duration::from_secs(10)));
        assert!(set.is_empty());
    }

    #[test]
    fn tombstone_capacity_is_bounded() {
        let t0 = Instant::now();
        let mut set = TombstoneSet::new(2, Duration::from_secs(60));
        set.close(key(1), t0);
        set.close(key(2), t0);
        set.close(key(3), t0);
        assert_eq!(set.len(), 2);
        assert!(!set.is_closed(&key(1), t0));
        assert!(set.is_closed(&key(3), t0));
    }

    #[test]
    fn prune_drops_only_expired() {
        let t0 = Instant::now();
        let mut set = TombstoneSet::new(8, Duration::from_secs(10));
        set.close(key(1), t0);
        set.close(key(2), t0 + Duration::from_secs(5));
        assert_eq!(set.prune(t0 + Duration::from_secs(12)), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn zero_capacity_falls_back_to_one() {
        let mut set = TombstoneSet::new(0, Duration::from_secs(1));
        set.close(key(1), Instant::now());
        assert_eq!(set.len(), 1);
    }
}
