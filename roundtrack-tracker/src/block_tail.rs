//! BlockTail: recent block header summaries.
//!
//! Keeps the last `retain` rounds behind the durable round readable in
//! memory and mirrors them into the `block_tail` table:
//! - Memory: every applied round above the window floor
//! - Disk (TABLE_BLOCK_TAIL): round (u64) → 44-byte [`TailEntry`]
//!
//! Its lookback is `retain`, which holds every commit range `retain` rounds
//! behind the ledger's committed round.

use crate::{LedgerTracker, TrackerError};
use roundtrack_model::{
    Block, DeferredCommitContext, DeferredCommitRange, Hash, LedgerForTracker, Round, StateDelta,
};
use roundtrack_storage::{TrackerDb, TrackerDbError, TransactionScope};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub const TABLE_BLOCK_TAIL: &str = "block_tail";

/// Summary of one block kept by the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailEntry {
    pub hash: Hash,
    pub timestamp: u64,
    pub txn_count: u32,
}

fn saturating_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

impl TailEntry {
    pub const ENCODED_LEN: usize = 32 + 8 + 4;

    pub fn from_block(block: &Block) -> Self {
        Self {
            hash: block.hash(),
            timestamp: block.header.timestamp,
            txn_count: saturating_count(block.txns.len()),
        }
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..32].copy_from_slice(self.hash.as_bytes());
        out[32..40].copy_from_slice(&self.timestamp.to_be_bytes());
        out[40..].copy_from_slice(&self.txn_count.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TrackerDbError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(TrackerDbError::Corrupt(format!(
                "block tail entry is {} bytes, expected {}",
                bytes.len(),
                Self::ENCODED_LEN
            )));
        }
        let corrupt = |_| TrackerDbError::Corrupt("block tail entry".into());
        Ok(Self {
            hash: Hash::try_from(&bytes[..32]).map_err(corrupt)?,
            timestamp: u64::from_be_bytes(bytes[32..40].try_into().map_err(corrupt)?),
            txn_count: u32::from_be_bytes(bytes[40..].try_into().map_err(corrupt)?),
        })
    }
}

#[derive(Debug, Default)]
struct TailState {
    db_round: Round,
    entries: BTreeMap<Round, TailEntry>,
    /// Rows picked by prepare_commit for the running cycle.
    staged: Vec<(Round, TailEntry)>,
}

pub struct BlockTail {
    db: Arc<TrackerDb>,
    retain: u64,
    state: Mutex<TailState>,
}

impl BlockTail {
    pub fn new(db: Arc<TrackerDb>, retain: u64) -> Self {
        Self {
            db,
            retain: retain.max(1),
            state: Mutex::new(TailState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TailState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lowest round kept once `base` is durable.
    fn window_floor(&self, base: Round) -> Round {
        base.next().saturating_sub(self.retain)
    }

    pub fn retain(&self) -> u64 {
        self.retain
    }

    /// Summary for `round`, from memory or else from disk.
    pub fn entry(&self, round: Round) -> Result<Option<TailEntry>, TrackerDbError> {
        if let Some(entry) = self.state().entries.get(&round) {
            return Ok(Some(*entry));
        }
        self.db
            .get_round(TABLE_BLOCK_TAIL, round)?
            .map(|bytes| TailEntry::decode(&bytes))
            .transpose()
    }

    /// Rounds currently held in memory, ascending.
    pub fn rounds_in_memory(&self) -> Vec<Round> {
        self.state().entries.keys().copied().collect()
    }

    fn clear_staged(&self, why: &str) {
        let mut state = self.state();
        if !state.staged.is_empty() {
            debug!(rows = state.staged.len(), why, "Dropping staged block tail rows");
            state.staged.clear();
        }
    }
}

impl LedgerTracker for BlockTail {
    fn name(&self) -> &'static str {
        "block_tail"
    }

    fn load_from_disk(&self, _ledger: &dyn LedgerForTracker, db_round: Round) -> Result<(), TrackerError> {
        let rows = self
            .db
            .rounds_in(TABLE_BLOCK_TAIL, self.window_floor(db_round)..=db_round)?;

        let mut entries = BTreeMap::new();
        for (round, bytes) in rows {
            entries.insert(round, TailEntry::decode(&bytes)?);
        }

        let mut state = self.state();
        state.db_round = db_round;
        state.entries = entries;
        state.staged.clear();
        Ok(())
    }

    fn new_block(&self, block: &Block, _delta: &StateDelta) {
        self.state()
            .entries
            .insert(block.round(), TailEntry::from_block(block));
    }

    fn committed_up_to(&self, committed_round: Round) -> (Round, u64) {
        (self.window_floor(committed_round), self.retain)
    }

    fn produce_committing_task(
        &self,
        _committed_round: Round,
        _db_round: Round,
        mut dcr: DeferredCommitRange,
    ) -> Option<DeferredCommitRange> {
        // Never commit past what this tail has seen
        let highest = self.state().entries.keys().next_back().copied()?;
        dcr = dcr.clamp_newest(highest);
        dcr.lookback = dcr.lookback.max(self.retain);
        Some(dcr)
    }

    fn prepare_commit(&self, dcc: &mut DeferredCommitContext) -> Result<(), TrackerError> {
        let mut state = self.state();
        let mut staged = Vec::with_capacity(dcc.offset() as usize);
        let mut round = dcc.range.oldest();
        while round <= dcc.new_base() {
            let entry = state.entries.get(&round).ok_or_else(|| TrackerError::Prepare {
                tracker: self.name(),
                reason: format!("round {} is not in memory", round),
            })?;
            staged.push((round, *entry));
            round = round.next();
        }
        state.staged = staged;
        Ok(())
    }

    fn commit_round(&self, tx: &TransactionScope, dcc: &mut DeferredCommitContext) -> Result<(), TrackerError> {
        let state = self.state();
        if state.staged.len() as u64 != dcc.offset() {
            return Err(TrackerError::Commit {
                tracker: self.name(),
                reason: format!("{} rows staged for {} rounds", state.staged.len(), dcc.offset()),
            });
        }
        for (round, entry) in &state.staged {
            tx.put_round(TABLE_BLOCK_TAIL, *round, &entry.encode())?;
        }
        let pruned = tx.prune_below(TABLE_BLOCK_TAIL, self.window_floor(dcc.new_base()))?;
        if pruned > 0 {
            debug!(pruned, "Pruned durable block tail rows");
        }
        Ok(())
    }

    fn post_commit(&self, dcc: &DeferredCommitContext) {
        let floor = self.window_floor(dcc.new_base());
        let mut state = self.state();
        state.db_round = dcc.new_base();
        state.entries.retain(|round, _| *round >= floor);
        state.staged.clear();
    }

    fn post_commit_unlocked(&self, _dcc: &DeferredCommitContext) {}

    // Skipped before prepare ran, so nothing is staged
    fn handle_unordered_commit(&self, _dcc: &DeferredCommitContext) {}

    fn handle_prepare_commit_error(&self, _dcc: &DeferredCommitContext) {
        self.clear_staged("prepare failed");
    }

    fn handle_commit_error(&self, _dcc: &DeferredCommitContext) {
        self.clear_staged("commit rolled back");
    }

    fn close(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.staged.clear();
    }
}
