//! Block and state delta types handed to trackers when a round is applied.

use crate::{Hash, Round};

/// Header of an applied block.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHeader {
    pub round: Round,
    /// Hash of the previous block's header (`Hash::ZERO` at genesis).
    pub branch: Hash,
    /// Unix seconds proposed for the block.
    pub timestamp: u64,
}

impl BlockHeader {
    /// Digest over the header fields.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(48);
        buf.extend_from_slice(&self.round.0.to_be_bytes());
        buf.extend_from_slice(self.branch.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        Hash::digest(&buf)
    }
}

/// A block as seen by the trackers: a header plus opaque transaction payloads.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txns: Vec<Vec<u8>>,
}

impl Block {
    pub fn new(round: Round, branch: Hash, timestamp: u64, txns: Vec<Vec<u8>>) -> Self {
        Self {
            header: BlockHeader { round, branch, timestamp },
            txns,
        }
    }

    pub fn round(&self) -> Round {
        self.header.round
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

/// State changes produced by evaluating a block. Computed by the ledger;
/// trackers only read it.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StateDelta {
    pub round: Round,
    /// Key/value writes (`None` deletes).
    pub writes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl StateDelta {
    pub fn empty(round: Round) -> Self {
        Self { round, writes: Vec::new() }
    }
}
