use std::path::PathBuf;

/// Where the tracker database keeps `db_round` and the per-tracker round tables.
#[derive(Debug, Clone, Default)]
pub enum StorageConfig {
    /// A redb file inside this directory, created on first open. Survives restarts,
    /// so trackers reload from the recorded durable round.
    File(PathBuf),
    /// Lost on drop: every open starts back at round 0.
    #[default]
    InMemory,
}
