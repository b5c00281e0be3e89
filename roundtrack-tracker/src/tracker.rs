use crate::TrackerError;
use roundtrack_model::{
    Block, DeferredCommitContext, DeferredCommitRange, LedgerForTracker, Round, StateDelta,
};
use roundtrack_storage::TransactionScope;

/// Lifecycle every tracker implements to be driven by the [`TrackerRegistry`](crate::TrackerRegistry).
///
/// Per commit cycle the registry calls, on every tracker in registration order:
/// `produce_committing_task` → `prepare_commit` → `commit_round` (all inside one
/// transaction) → `post_commit` (under the registry lock) → `post_commit_unlocked`.
/// When a step fails, the matching error hook runs on *every* tracker, not just
/// the one that failed.
pub trait LedgerTracker: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Reset in-memory state from durable storage. `db_round` is the round the
    /// tracker database covers.
    fn load_from_disk(&self, ledger: &dyn LedgerForTracker, db_round: Round) -> Result<(), TrackerError>;

    /// A block was applied in memory. Not yet durable.
    fn new_block(&self, block: &Block, delta: &StateDelta);

    /// The ledger reports `committed_round` as committed. Returns the lowest
    /// round this tracker still needs from the ledger and the lookback it
    /// requires behind the next commit.
    fn committed_up_to(&self, committed_round: Round) -> (Round, u64);

    /// Refine the proposed range. May narrow it or widen its lookback;
    /// returning `None` vetoes the cycle.
    fn produce_committing_task(
        &self,
        committed_round: Round,
        db_round: Round,
        dcr: DeferredCommitRange,
    ) -> Option<DeferredCommitRange>;

    /// Check the range against in-memory state and stage anything `commit_round` needs.
    fn prepare_commit(&self, dcc: &mut DeferredCommitContext) -> Result<(), TrackerError>;

    /// Write this tracker's durable delta for the range. Runs inside the
    /// transaction shared with every other tracker.
    fn commit_round(&self, tx: &TransactionScope, dcc: &mut DeferredCommitContext) -> Result<(), TrackerError>;

    /// The transaction landed. Runs while the registry holds its write lock.
    fn post_commit(&self, dcc: &DeferredCommitContext);

    /// The transaction landed. Runs after the registry lock is released.
    fn post_commit_unlocked(&self, dcc: &DeferredCommitContext);

    /// The cycle was built on a stale durable round and was skipped.
    fn handle_unordered_commit(&self, dcc: &DeferredCommitContext);

    /// Some tracker failed `prepare_commit`; nothing was written.
    fn handle_prepare_commit_error(&self, dcc: &DeferredCommitContext);

    /// Some tracker failed `commit_round`; the transaction was rolled back.
    fn handle_commit_error(&self, dcc: &DeferredCommitContext);

    /// Release external resources at shutdown.
    fn close(&self);
}
