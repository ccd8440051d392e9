use std::time::Duration;

use floodcam_assembly::manager::{
    DEFAULT_MAX_OBJECT_SIZE, DEFAULT_MAX_OPEN_ASSEMBLIES, DEFAULT_TOMBSTONE_CAPACITY,
    DEFAULT_TOMBSTONE_TTL,
};
use floodcam_assembly::ManagerLimits;
use floodcam_codec::DecoderConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ReassemblyConfig {
    /// Subjects and topic prefix the decoder accepts.
    pub decoder: DecoderConfig,
    /// Idle time after which an incomplete assembly is evicted.
    pub staleness: Duration,
    /// How often the eviction sweep runs.
    pub eviction_interval: Duration,
    /// How long a closed key keeps rejecting late chunks.
    pub tombstone_ttl: Duration,
    pub tombstone_capacity: usize,
    pub max_open_assemblies: usize,
    /// Largest object a chunk may declare, in bytes.
    pub max_object_size: u32,
    /// Bound of the transport -> ingestion channel.
    pub ingest_queue_capacity: usize,
    /// Bound of the ingestion -> persistence channel.
    pub completed_queue_capacity: usize,
    /// Extra store attempts after the first failure.
    pub persistence_retries: u32,
    /// Sessions remembered while waiting for the second half of a pair.
    pub pair_capacity: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            staleness: Duration::from_secs(30),
            eviction_interval: Duration::from_secs(5),
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            tombstone_capacity: DEFAULT_TOMBSTONE_CAPACITY,
            max_open_assemblies: DEFAULT_MAX_OPEN_ASSEMBLIES,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            ingest_queue_capacity: 512,
            completed_queue_capacity: 64,
            persistence_retries: 1,
            pair_capacity: 256,
        }
    }
}

impl ReassemblyConfig {
    /// Buffer-table bounds derived from this config.
    pub fn manager_limits(&self) -> ManagerLimits {
        ManagerLimits {
            max_open_assemblies: self.max_open_assemblies,
            max_object_size: self.max_object_size,
            tombstone_ttl: self.tombstone_ttl,
            tombstone_capacity: self.tombstone_capacity,
        }
    }
}
