use crate::{Block, Round, StateDelta};

/// The view of the ledger a tracker gets while loading.
///
/// Block validation and delta computation live behind this trait; trackers
/// only ever read from it.
pub trait LedgerForTracker: Send + Sync {
    /// Latest round applied to the ledger.
    fn latest(&self) -> Round;

    /// Block and delta for `round`, if the ledger still holds it.
    fn block(&self, round: Round) -> Option<(Block, StateDelta)>;
}
