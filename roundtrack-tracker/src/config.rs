use crate::TrackerError;
use roundtrack_model::StorageConfig;

/// Knobs for the commit pipeline.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Upper bound on the number of rounds flushed in one commit cycle.
    pub max_rounds_per_commit: u64,
    /// Rounds the block tail keeps in memory behind the durable round.
    pub block_tail_retain: u64,
    /// Capacity of the queue between the registry and the commit syncer.
    pub deferred_commit_capacity: usize,
    /// How many times a range is halved after a prepare failure.
    pub prepare_retries: u32,
    pub storage: StorageConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_rounds_per_commit: 64,
            block_tail_retain: 8,
            deferred_commit_capacity: 16,
            prepare_retries: 2,
            storage: StorageConfig::InMemory,
        }
    }
}

impl TrackerConfig {
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.max_rounds_per_commit == 0 {
            return Err(TrackerError::Config("max_rounds_per_commit must be at least 1".into()));
        }
        if self.block_tail_retain == 0 {
            return Err(TrackerError::Config("block_tail_retain must be at least 1".into()));
        }
        if self.deferred_commit_capacity == 0 {
            return Err(TrackerError::Config("deferred_commit_capacity must be at least 1".into()));
        }
        Ok(())
    }
}
