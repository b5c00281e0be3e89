use roundtrack_model::Round;
use roundtrack_storage::TrackerDbError;
use thiserror::Error;

/// Errors raised while loading trackers or running a commit cycle.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Storage error: {0}")]
    Storage(#[from] TrackerDbError),

    /// The proposed range is infeasible for `tracker`; retry with a different range.
    #[error("Tracker {tracker} cannot prepare commit: {reason}")]
    Prepare { tracker: &'static str, reason: String },

    /// `tracker` failed inside the shared transaction; the whole cycle is rolled back.
    #[error("Tracker {tracker} failed to commit: {reason}")]
    Commit { tracker: &'static str, reason: String },

    #[error("Tracker database is at round {db_round} but the ledger only reached {latest}")]
    DbAheadOfLedger { db_round: Round, latest: Round },

    #[error("Trackers not loaded from disk")]
    NotInitialized,

    #[error("Commit syncer already started")]
    SyncerAlreadyStarted,

    #[error("Invalid config: {0}")]
    Config(String),
}
