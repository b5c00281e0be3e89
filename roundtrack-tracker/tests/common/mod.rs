#![allow(dead_code)]

use roundtrack_tracker::{
    Block, DeferredCommitContext, DeferredCommitRange, Hash, LedgerForTracker, LedgerTracker,
    Round, StateDelta, TrackerError, TransactionScope,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

/// Ledger stand-in: an append-only map of synthetic blocks.
#[derive(Default)]
pub struct MemLedger {
    blocks: RwLock<BTreeMap<Round, (Block, StateDelta)>>,
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next block and return it.
    pub fn append(&self) -> (Block, StateDelta) {
        let mut blocks = self.blocks.write().unwrap();
        let (round, branch) = match blocks.iter().next_back() {
            Some((r, (b, _))) => (r.next(), b.hash()),
            None => (Round(1), Hash::ZERO),
        };
        let block = Block::new(round, branch, 1_700_000_000 + round.0, vec![round.0.to_be_bytes().to_vec()]);
        let delta = StateDelta {
            round,
            writes: vec![(b"latest".to_vec(), Some(round.0.to_be_bytes().to_vec()))],
        };
        blocks.insert(round, (block.clone(), delta.clone()));
        (block, delta)
    }
}

impl LedgerForTracker for MemLedger {
    fn latest(&self) -> Round {
        self.blocks
            .read()
            .unwrap()
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Round::ZERO)
    }

    fn block(&self, round: Round) -> Option<(Block, StateDelta)> {
        self.blocks.read().unwrap().get(&round).cloned()
    }
}

/// Tracker that records every hook it sees and can be told to fail.
pub struct RecordingTracker {
    name: &'static str,
    events: Mutex<Vec<&'static str>>,
    fail_prepare: AtomicBool,
    fail_commit: AtomicBool,
    veto: AtomicBool,
    /// Prepare fails for ranges longer than this.
    max_offset: AtomicU64,
}

impl RecordingTracker {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            events: Mutex::new(Vec::new()),
            fail_prepare: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            veto: AtomicBool::new(false),
            max_offset: AtomicU64::new(u64::MAX),
        }
    }

    pub fn fail_prepare(&self, on: bool) {
        self.fail_prepare.store(on, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, on: bool) {
        self.fail_commit.store(on, Ordering::SeqCst);
    }

    pub fn veto(&self, on: bool) {
        self.veto.store(on, Ordering::SeqCst);
    }

    pub fn limit_offset(&self, max: u64) {
        self.max_offset.store(max, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn saw(&self, event: &str) -> bool {
        self.events().iter().any(|e| *e == event)
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
}

impl LedgerTracker for RecordingTracker {
    fn name(&self) -> &'static str {
        self.name
    }

    fn load_from_disk(&self, _ledger: &dyn LedgerForTracker, _db_round: Round) -> Result<(), TrackerError> {
        self.record("load_from_disk");
        Ok(())
    }

    fn new_block(&self, _block: &Block, _delta: &StateDelta) {
        self.record("new_block");
    }

    fn committed_up_to(&self, committed_round: Round) -> (Round, u64) {
        self.record("committed_up_to");
        (committed_round, 0)
    }

    fn produce_committing_task(&self, _committed_round: Round, _db_round: Round, dcr: DeferredCommitRange) -> Option<DeferredCommitRange> {
        self.record("produce_committing_task");
        if self.veto.load(Ordering::SeqCst) {
            None
        } else {
            Some(dcr)
        }
    }

    fn prepare_commit(&self, dcc: &mut DeferredCommitContext) -> Result<(), TrackerError> {
        self.record("prepare_commit");
        if self.fail_prepare.load(Ordering::SeqCst) || dcc.offset() > self.max_offset.load(Ordering::SeqCst) {
            return Err(TrackerError::Prepare {
                tracker: self.name,
                reason: format!("refusing {} rounds", dcc.offset()),
            });
        }
        Ok(())
    }

    fn commit_round(&self, _tx: &TransactionScope, _dcc: &mut DeferredCommitContext) -> Result<(), TrackerError> {
        self.record("commit_round");
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(TrackerError::Commit {
                tracker: self.name,
                reason: "injected".into(),
            });
        }
        Ok(())
    }

    fn post_commit(&self, _dcc: &DeferredCommitContext) {
        self.record("post_commit");
    }

    fn post_commit_unlocked(&self, _dcc: &DeferredCommitContext) {
        self.record("post_commit_unlocked");
    }

    fn handle_unordered_commit(&self, _dcc: &DeferredCommitContext) {
        self.record("handle_unordered_commit");
    }

    fn handle_prepare_commit_error(&self, _dcc: &DeferredCommitContext) {
        self.record("handle_prepare_commit_error");
    }

    fn handle_commit_error(&self, _dcc: &DeferredCommitContext) {
        self.record("handle_commit_error");
    }

    fn close(&self) {
        self.record("close");
    }
}
