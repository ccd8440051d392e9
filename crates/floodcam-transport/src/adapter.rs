use std::collections::VecDeque;

use crate::pattern::{topic_matches, validate_pattern, PatternError};

/// One delivered pub/sub message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl TransportMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Coarse per-adapter transport health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHealthSnapshot {
    pub subscriptions: usize,
    pub inbound_received: u64,
    pub inbound_dropped: u64,
    pub last_error: Option<String>,
}

/// Topic/payload transport contract consumed by the collector.
///
/// Delivery is at-least-once and unordered across messages; adapters make no
/// transactional grouping promise.
pub trait TransportAdapter {
    /// Transport-specific subscription error.
    type Error;

    /// Registers interest in every topic matched by `pattern`.
    fn subscribe(&mut self, pattern: &str) -> Result<(), Self::Error>;
    /// Returns the next inbound message, if any.
    fn recv(&mut self) -> Option<TransportMessage>;

    /// Whether inbound receive is currently available.
    fn can_recv(&self) -> bool {
        true
    }

    /// Best-effort transport health counters.
    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot::default()
    }
}

/// In-memory adapter for tests, simulations, and capture replay.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAdapter {
    inbound: VecDeque<TransportMessage>,
    subscriptions: Vec<String>,
    recv_ok: u64,
    dropped: u64,
}

impl InMemoryAdapter {
    /// Queues a message as if the broker had published it.
    pub fn enqueue_inbound(&mut self, topic: impl Into<String>, payload: Vec<u8>) {
        self.inbound.push_back(TransportMessage::new(topic, payload));
    }

    /// Number of queued messages not yet received.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|p| topic_matches(p, topic))
    }
}

impl TransportAdapter for InMemoryAdapter {
    type Error = PatternError;

    fn subscribe(&mut self, pattern: &str) -> Result<(), Self::Error> {
        validate_pattern(pattern)?;
        if !self.subscriptions.iter().any(|p| p == pattern) {
            self.subscriptions.push(pattern.to_string());
        }
        Ok(())
    }

    fn recv(&mut self) -> Option<TransportMessage> {
        while let Some(msg) = self.inbound.pop_front() {
            if self.is_subscribed(&msg.topic) {
                self.recv_ok += 1;
                return Some(msg);
            }
            self.dropped += 1;
        }
        None
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot {
            subscriptions: self.subscriptions.len(),
            inbound_received: self.recv_ok,
            inbound_dropped: self.dropped,
            last_error: None,
        }
    }
}
