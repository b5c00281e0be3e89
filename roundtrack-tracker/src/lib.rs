//! Roundtrack Tracker
//!
//! Coordination layer between ledger progress and the trackers derived from it.
//!
//! - **Notifier / WaitHandle**: single-shot broadcast signal
//! - **Bulletin**: block until a round is applied (`BulletinMem`) or durable (`BulletinDisk`)
//! - **LedgerTracker**: lifecycle every tracker implements
//! - **TrackerRegistry / CommitSyncer**: negotiate, prepare, commit and post-commit across trackers
//! - **BlockTail**: recent block summaries, the tracker that sets the commit lookback

pub mod block_tail;
pub mod bulletin;
pub mod config;
pub mod error;
pub mod notifier;
pub mod registry;
pub mod syncer;
pub mod tracker;

pub use block_tail::{BlockTail, TailEntry, TABLE_BLOCK_TAIL};
pub use bulletin::{Bulletin, BulletinDisk, BulletinMem};
pub use config::TrackerConfig;
pub use error::TrackerError;
pub use notifier::{Notifier, WaitHandle};
pub use registry::{CommitOutcome, TrackerRegistry};
pub use syncer::CommitSyncer;
pub use tracker::LedgerTracker;

// Re-exports from dependencies
pub use roundtrack_model::{
    Block, BlockHeader, DeferredCommitContext, DeferredCommitRange, Hash, LedgerForTracker, Round,
    StateDelta, StorageConfig,
};
pub use roundtrack_storage::{TrackerDb, TrackerDbError, TransactionScope};
