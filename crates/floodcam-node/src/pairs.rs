use std::num::NonZeroUsize;

use floodcam_core::{AssemblyKey, SessionId, Variant};
use lru::LruCache;
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
struct Halves {
    previous: bool,
    current: bool,
}

/// Tracks which halves of each capture cycle have been persisted.
///
/// Only the most recently touched `capacity` sessions are remembered, so a
/// cycle whose partner never arrives is forgotten rather than kept forever.
#[derive(Debug)]
pub struct PairTracker {
    sessions: LruCache<SessionId, Halves>,
}

impl PairTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: LruCache::new(capacity),
        }
    }

    /// Records a persisted object. Returns the session once both the
    /// previous and current image of it have been recorded.
    pub fn record(&mut self, key: &AssemblyKey) -> Option<SessionId> {
        if !key.variant.is_pair_member() {
            return None;
        }
        let halves = self.sessions.get_or_insert_mut(key.session, Halves::default);
        match key.variant {
            Variant::Previous => halves.previous = true,
            Variant::Current => halves.current = true,
            Variant::Other(_) => {}
        }
        if !(halves.previous && halves.current) {
            return None;
        }
        self.sessions.pop(&key.session);
        info!(session = %key.session, "image pair complete");
        Some(key.session)
    }

    /// Sessions waiting for their second half.
    pub fn pending(&self) -> usize {
        self.sessions.len()
    }
}
