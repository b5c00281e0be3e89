use roundtrack_model::{Block, Hash, LedgerForTracker, Round, StateDelta};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// In-memory chain of synthetic blocks that picks up after `base`.
pub struct SimLedger {
    base: Round,
    blocks: RwLock<BTreeMap<Round, (Block, StateDelta)>>,
}

impl SimLedger {
    pub fn new(base: Round) -> Self {
        Self {
            base,
            blocks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build, store and return the next block.
    pub fn append(&self) -> (Block, StateDelta) {
        let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        let (round, branch) = match blocks.iter().next_back() {
            Some((round, (block, _))) => (round.next(), block.hash()),
            None => (self.base.next(), Hash::ZERO),
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let payload = round.0.to_be_bytes().to_vec();
        let block = Block::new(round, branch, timestamp, vec![payload.clone()]);
        let delta = StateDelta {
            round,
            writes: vec![(b"round".to_vec(), Some(payload))],
        };

        blocks.insert(round, (block.clone(), delta.clone()));
        (block, delta)
    }
}

impl LedgerForTracker for SimLedger {
    fn latest(&self) -> Round {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.base)
    }

    fn block(&self, round: Round) -> Option<(Block, StateDelta)> {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&round)
            .cloned()
    }
}
