//! TrackerRegistry - drives every tracker through the commit lifecycle.
//!
//! Blocks arrive through [`TrackerRegistry::new_block`]. When the ledger
//! reports a round committed, [`TrackerRegistry::committed_up_to`] negotiates
//! a round range with every tracker and queues it for the
//! [`CommitSyncer`](crate::CommitSyncer), which runs
//! [`TrackerRegistry::commit_round`] one cycle at a time.

use crate::{LedgerTracker, TrackerConfig, TrackerError};
use roundtrack_model::{
    Block, DeferredCommitContext, DeferredCommitRange, LedgerForTracker, Round, StateDelta,
};
use roundtrack_storage::TrackerDb;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Result of a commit cycle that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The range landed; the durable round is now `new_base`.
    Committed { new_base: Round },
    /// The range was built on a stale durable round and was skipped.
    Unordered,
}

#[derive(Debug, Default)]
struct RegistryState {
    db_round: Round,
    loaded: bool,
    last_flush: Option<SystemTime>,
}

pub struct TrackerRegistry {
    trackers: Vec<Arc<dyn LedgerTracker>>,
    db: Arc<TrackerDb>,
    config: TrackerConfig,
    /// Serializes trackers against readers; held for prepare (read) and post-commit (write).
    state: RwLock<RegistryState>,
    /// Only one cycle runs at a time.
    cycle: Mutex<()>,
    /// `true` while a scheduled cycle has not finished.
    committing: watch::Sender<bool>,
    /// Highest round the ledger has reported committed.
    reported_round: AtomicU64,
    deferred_tx: mpsc::Sender<DeferredCommitContext>,
    deferred_rx: Mutex<Option<mpsc::Receiver<DeferredCommitContext>>>,
}

impl TrackerRegistry {
    /// Create a registry over `trackers`, driven in the given order.
    pub fn new(
        db: Arc<TrackerDb>,
        trackers: Vec<Arc<dyn LedgerTracker>>,
        config: TrackerConfig,
    ) -> Result<Self, TrackerError> {
        config.validate()?;
        let (deferred_tx, deferred_rx) = mpsc::channel(config.deferred_commit_capacity);
        let (committing, _) = watch::channel(false);
        Ok(Self {
            trackers,
            db,
            config,
            state: RwLock::new(RegistryState::default()),
            cycle: Mutex::new(()),
            committing,
            reported_round: AtomicU64::new(0),
            deferred_tx,
            deferred_rx: Mutex::new(Some(deferred_rx)),
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn trackers(&self) -> &[Arc<dyn LedgerTracker>] {
        &self.trackers
    }

    /// Round the durable tracker state covers.
    pub fn db_round(&self) -> Round {
        self.read_state().db_round
    }

    /// When the last commit transaction landed.
    pub fn last_flush(&self) -> Option<SystemTime> {
        self.read_state().last_flush
    }

    /// Load every tracker from the database, then replay the blocks the
    /// ledger holds beyond the durable round.
    pub fn load_from_disk(&self, ledger: &dyn LedgerForTracker) -> Result<(), TrackerError> {
        let db_round = self.db.db_round()?;
        let latest = ledger.latest();
        if db_round > latest {
            return Err(TrackerError::DbAheadOfLedger { db_round, latest });
        }

        for tracker in &self.trackers {
            tracker.load_from_disk(ledger, db_round)?;
        }

        let mut replayed = 0u64;
        let mut round = db_round.next();
        while round <= latest {
            let Some((block, delta)) = ledger.block(round) else {
                warn!(round = %round, "Ledger is missing a block above the tracker database");
                break;
            };
            self.new_block(&block, &delta);
            replayed += 1;
            round = round.next();
        }

        {
            let mut state = self.write_state();
            state.db_round = db_round;
            state.loaded = true;
        }
        info!(db_round = %db_round, latest = %latest, replayed, "Trackers loaded");
        Ok(())
    }

    /// Hand a block applied in memory to every tracker.
    pub fn new_block(&self, block: &Block, delta: &StateDelta) {
        for tracker in &self.trackers {
            tracker.new_block(block, delta);
        }
    }

    /// The ledger reports `rnd` committed. Schedules a commit cycle if the
    /// trackers agree on a non-empty range and returns the lowest round any
    /// tracker still needs from the ledger.
    ///
    /// A report that finds a cycle in flight is remembered and scheduled once
    /// that cycle completes.
    pub fn committed_up_to(&self, rnd: Round) -> Round {
        self.reported_round.fetch_max(rnd.0, Ordering::AcqRel);

        let mut min_round = rnd;
        let mut max_lookback = 0u64;
        for tracker in &self.trackers {
            let (ret_round, lookback) = tracker.committed_up_to(rnd);
            min_round = min_round.min(ret_round);
            max_lookback = max_lookback.max(lookback);
        }

        if let Some(dcc) = self.schedule_commit(rnd, max_lookback) {
            if let Err(e) = self.deferred_tx.try_send(dcc) {
                warn!(round = %rnd, error = %e, "Could not queue commit cycle");
                self.finish_cycle();
            }
        }
        min_round
    }

    /// Negotiate a commit range ending at most `committed_round - lookback`.
    ///
    /// Returns `None` when a cycle is already in flight, the range is empty,
    /// or a tracker vetoes it. A returned context marks a cycle in flight until
    /// it is run through [`commit_round`](Self::commit_round).
    pub fn schedule_commit(&self, committed_round: Round, lookback: u64) -> Option<DeferredCommitContext> {
        let claimed = self.committing.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        if !claimed {
            debug!(round = %committed_round, "Commit cycle already in flight");
            return None;
        }

        let db_round = self.db_round();
        let newest = committed_round.saturating_sub(lookback);
        let offset = newest
            .distance_from(db_round)
            .min(self.config.max_rounds_per_commit);
        if offset == 0 {
            self.finish_cycle();
            return None;
        }

        let mut dcr = DeferredCommitRange::new(db_round, offset, lookback);
        for tracker in &self.trackers {
            match tracker.produce_committing_task(committed_round, db_round, dcr) {
                Some(refined) => dcr = refined,
                None => {
                    debug!(tracker = tracker.name(), "Commit range vetoed");
                    self.finish_cycle();
                    return None;
                }
            }
        }
        if dcr.is_empty() {
            self.finish_cycle();
            return None;
        }

        debug!(
            old_base = %dcr.old_base,
            new_base = %dcr.new_base(),
            lookback = dcr.lookback,
            "Commit cycle scheduled"
        );
        Some(DeferredCommitContext::new(dcr, committed_round))
    }

    /// Run one commit cycle and clear the in-flight mark.
    pub fn commit_round(&self, dcc: &mut DeferredCommitContext) -> Result<CommitOutcome, TrackerError> {
        let outcome = self.run_cycle(dcc);
        self.finish_cycle();
        outcome
    }

    fn finish_cycle(&self) {
        self.committing.send_replace(false);
    }

    /// Highest round reported through [`committed_up_to`](Self::committed_up_to).
    pub fn reported_round(&self) -> Round {
        Round(self.reported_round.load(Ordering::Acquire))
    }

    /// Clear the in-flight mark of a cycle scheduled for `handled`, then
    /// schedule again if a newer round was reported while it ran.
    pub(crate) fn complete_cycle(&self, handled: Round) {
        self.finish_cycle();
        let reported = self.reported_round();
        if reported > handled {
            debug!(handled = %handled, reported = %reported, "Scheduling round reported mid-cycle");
            self.committed_up_to(reported);
        }
    }

    #[tracing::instrument(skip(self, dcc), fields(old_base = %dcc.old_base(), offset = dcc.offset()))]
    pub(crate) fn run_cycle(&self, dcc: &mut DeferredCommitContext) -> Result<CommitOutcome, TrackerError> {
        let _cycle = self.cycle.lock().unwrap_or_else(PoisonError::into_inner);

        {
            let state = self.read_state();
            if !state.loaded {
                return Err(TrackerError::NotInitialized);
            }

            if dcc.old_base() != state.db_round {
                drop(state);
                warn!(db_round = %self.db_round(), "Out of order commit cycle skipped");
                for tracker in &self.trackers {
                    tracker.handle_unordered_commit(dcc);
                }
                return Ok(CommitOutcome::Unordered);
            }

            let prepared = self
                .trackers
                .iter()
                .try_for_each(|tracker| tracker.prepare_commit(dcc));
            drop(state);

            if let Err(e) = prepared {
                warn!(error = %e, "Prepare failed, nothing written");
                for tracker in &self.trackers {
                    tracker.handle_prepare_commit_error(dcc);
                }
                return Err(e);
            }
        }

        let new_base = dcc.new_base();
        let committed = self.db.transact(|tx| {
            for tracker in &self.trackers {
                tracker.commit_round(tx, dcc)?;
            }
            tx.set_db_round(new_base)?;
            Ok::<_, TrackerError>(())
        });

        if let Err(e) = committed {
            error!(error = %e, "Commit transaction rolled back");
            for tracker in &self.trackers {
                tracker.handle_commit_error(dcc);
            }
            return Err(e);
        }

        dcc.flush_time = Some(SystemTime::now());
        {
            let mut state = self.write_state();
            state.db_round = new_base;
            state.last_flush = dcc.flush_time;
            for tracker in &self.trackers {
                tracker.post_commit(dcc);
            }
        }
        for tracker in &self.trackers {
            tracker.post_commit_unlocked(dcc);
        }

        info!(new_base = %new_base, committed = %dcc.committed_round, "Commit cycle landed");
        Ok(CommitOutcome::Committed { new_base })
    }

    /// Hand the receiving end of the deferred-commit queue to a syncer. Only once.
    pub(crate) fn take_deferred_receiver(&self) -> Option<mpsc::Receiver<DeferredCommitContext>> {
        self.deferred_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_committing(&self) -> bool {
        *self.committing.borrow()
    }

    /// Wait until no scheduled cycle is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.committing.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Close every tracker.
    pub fn close(&self) {
        for tracker in &self.trackers {
            tracker.close();
        }
        debug!("Trackers closed");
    }
}
