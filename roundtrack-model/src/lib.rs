//! Roundtrack Model
//!
//! Pure data types shared by the ledger trackers, decoupled from the
//! storage engine and from the async runtime that drives commits.

pub mod block;
pub mod commit;
pub mod ledger;
pub mod storage_config;
pub mod types;

// Re-exports
pub use block::{Block, BlockHeader, StateDelta};
pub use commit::{DeferredCommitContext, DeferredCommitRange};
pub use ledger::LedgerForTracker;
pub use storage_config::StorageConfig;
pub use types::{Hash, Round};
