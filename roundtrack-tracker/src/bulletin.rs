//! Round bulletin: block until the ledger reaches a round.
//!
//! Two flavors share the registry and differ only in which lifecycle hook
//! advances it:
//! - [`BulletinMem`] on `new_block` (round applied in memory)
//! - [`BulletinDisk`] on `post_commit_unlocked`, up to the new durable base
//!   round the commit transaction wrote

use crate::notifier::{Notifier, WaitHandle};
use crate::{LedgerTracker, TrackerError};
use roundtrack_model::{
    Block, DeferredCommitContext, DeferredCommitRange, LedgerForTracker, Round, StateDelta,
};
use roundtrack_storage::TransactionScope;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct BulletinState {
    /// One signal per round nobody has reached yet. Never holds a round <= latest_round.
    pending: HashMap<Round, Notifier>,
    latest_round: Round,
}

/// Round-indexed wait/notify registry.
#[derive(Debug, Default)]
pub struct Bulletin {
    state: Mutex<BulletinState>,
}

impl Bulletin {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that already considers `latest_round` reached.
    pub fn with_latest(latest_round: Round) -> Self {
        Self {
            state: Mutex::new(BulletinState {
                pending: HashMap::new(),
                latest_round,
            }),
        }
    }

    // The guarded maps are consistent after every statement, so a poisoned lock is safe to reuse.
    fn state(&self) -> MutexGuard<'_, BulletinState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle that resolves once the ledger reaches `round`.
    ///
    /// Already satisfied if `round <= latest_round`. Concurrent callers for the
    /// same round share one signal.
    pub fn wait(&self, round: Round) -> WaitHandle {
        let mut state = self.state();
        if round <= state.latest_round {
            return WaitHandle::ready();
        }
        state.pending.entry(round).or_default().handle()
    }

    pub fn latest_round(&self) -> Round {
        self.state().latest_round
    }

    /// Number of rounds with at least one outstanding waiter.
    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Mark `rnd` reached and release every waiter at or below it.
    ///
    /// `rnd` must not be below a previous notification. A regressing call is a
    /// caller bug: it asserts in debug builds and leaves `latest_round` alone
    /// in release builds.
    pub(crate) fn notify_round(&self, rnd: Round) {
        let mut state = self.state();
        debug_assert!(
            rnd >= state.latest_round,
            "notify_round({}) regresses latest round {}",
            rnd,
            state.latest_round
        );
        let mut released = 0usize;
        state.pending.retain(|pending, signal| {
            if *pending > rnd {
                return true;
            }
            signal.notify();
            released += 1;
            false
        });

        if rnd > state.latest_round {
            state.latest_round = rnd;
        }
        if released > 0 {
            debug!(round = %rnd, released, "Released round waiters");
        }
    }

    /// Forget every pending signal and restart from `latest_round`.
    ///
    /// Waiters holding a handle from before the reload are not woken; their
    /// handles stay valid but nothing in this registry will fire them.
    pub fn reload(&self, latest_round: Round) {
        let mut state = self.state();
        let orphaned = state.pending.len();
        state.pending = HashMap::new();
        state.latest_round = latest_round;
        if orphaned > 0 {
            warn!(orphaned, latest = %latest_round, "Bulletin reload dropped outstanding waiters");
        }
    }
}

/// Notifies as soon as a round is applied in memory, before any durable write.
#[derive(Debug, Default)]
pub struct BulletinMem {
    bulletin: Bulletin,
}

impl BulletinMem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deref for BulletinMem {
    type Target = Bulletin;
    fn deref(&self) -> &Bulletin {
        &self.bulletin
    }
}

/// Notifies only after the commit transaction covering a round has landed.
#[derive(Debug, Default)]
pub struct BulletinDisk {
    bulletin: Bulletin,
}

impl BulletinDisk {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deref for BulletinDisk {
    type Target = Bulletin;
    fn deref(&self) -> &Bulletin {
        &self.bulletin
    }
}

impl LedgerTracker for BulletinMem {
    fn name(&self) -> &'static str {
        "bulletin_mem"
    }

    fn load_from_disk(&self, ledger: &dyn LedgerForTracker, _db_round: Round) -> Result<(), TrackerError> {
        self.bulletin.reload(ledger.latest());
        Ok(())
    }

    // Blocks arrive from the single ledger writer, so check and notify cannot interleave
    fn new_block(&self, block: &Block, _delta: &StateDelta) {
        // Replayed blocks after a load are already covered by latest_round
        if block.round() <= self.bulletin.latest_round() {
            return;
        }
        self.bulletin.notify_round(block.round());
    }

    fn committed_up_to(&self, committed_round: Round) -> (Round, u64) {
        (committed_round, 0)
    }

    fn produce_committing_task(&self, _committed_round: Round, _db_round: Round, dcr: DeferredCommitRange) -> Option<DeferredCommitRange> {
        Some(dcr)
    }

    fn prepare_commit(&self, _dcc: &mut DeferredCommitContext) -> Result<(), TrackerError> {
        Ok(())
    }

    fn commit_round(&self, _tx: &TransactionScope, _dcc: &mut DeferredCommitContext) -> Result<(), TrackerError> {
        Ok(())
    }

    fn post_commit(&self, _dcc: &DeferredCommitContext) {}

    fn post_commit_unlocked(&self, _dcc: &DeferredCommitContext) {}

    fn handle_unordered_commit(&self, _dcc: &DeferredCommitContext) {}

    fn handle_prepare_commit_error(&self, _dcc: &DeferredCommitContext) {}

    fn handle_commit_error(&self, _dcc: &DeferredCommitContext) {}

    fn close(&self) {}
}

impl LedgerTracker for BulletinDisk {
    fn name(&self) -> &'static str {
        "bulletin_disk"
    }

    // Only what the tracker database covers is durable, whatever the ledger holds
    fn load_from_disk(&self, _ledger: &dyn LedgerForTracker, db_round: Round) -> Result<(), TrackerError> {
        self.bulletin.reload(db_round);
        Ok(())
    }

    fn new_block(&self, _block: &Block, _delta: &StateDelta) {}

    fn committed_up_to(&self, committed_round: Round) -> (Round, u64) {
        (committed_round, 0)
    }

    fn produce_committing_task(&self, _committed_round: Round, _db_round: Round, dcr: DeferredCommitRange) -> Option<DeferredCommitRange> {
        Some(dcr)
    }

    fn prepare_commit(&self, _dcc: &mut DeferredCommitContext) -> Result<(), TrackerError> {
        Ok(())
    }

    // No durable rows. Notifying here would announce a round a rollback could still undo.
    fn commit_round(&self, _tx: &TransactionScope, _dcc: &mut DeferredCommitContext) -> Result<(), TrackerError> {
        Ok(())
    }

    fn post_commit(&self, _dcc: &DeferredCommitContext) {}

    // Landed cycles only move the base forward, so new_base never regresses here
    fn post_commit_unlocked(&self, dcc: &DeferredCommitContext) {
        self.bulletin.notify_round(dcc.new_base());
    }

    // Skipped before post-commit, so latest_round is untouched
    fn handle_unordered_commit(&self, _dcc: &DeferredCommitContext) {}

    fn handle_prepare_commit_error(&self, _dcc: &DeferredCommitContext) {}

    fn handle_commit_error(&self, _dcc: &DeferredCommitContext) {}

    fn close(&self) {}
}
