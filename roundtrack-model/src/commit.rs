//! Commit range negotiation types.
//!
//! A commit cycle flushes the inclusive round range `[old_base + 1, old_base + offset]`
//! to durable storage in one transaction.

use crate::Round;
use std::time::SystemTime;

/// A proposed range of rounds to flush, refined by each tracker in turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeferredCommitRange {
    /// Number of rounds in the range.
    pub offset: u64,
    /// Durable round the range builds on.
    pub old_base: Round,
    /// Trailing rounds below `new_base` that stay readable in memory after the commit.
    pub lookback: u64,
}

impl DeferredCommitRange {
    pub fn new(old_base: Round, offset: u64, lookback: u64) -> Self {
        Self { offset, old_base, lookback }
    }

    /// Durable round once this range commits.
    pub fn new_base(&self) -> Round {
        self.old_base + self.offset
    }

    /// First round in the range.
    pub fn oldest(&self) -> Round {
        self.old_base.next()
    }

    /// Last round in the range (same as `new_base`).
    pub fn newest(&self) -> Round {
        self.new_base()
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    /// Lowest round that must remain in memory after this range commits.
    pub fn lookback_floor(&self) -> Round {
        self.new_base().saturating_sub(self.lookback)
    }

    pub fn contains(&self, round: Round) -> bool {
        round > self.old_base && round <= self.new_base()
    }

    /// Narrow the range so it ends no later than `newest`.
    pub fn clamp_newest(mut self, newest: Round) -> Self {
        self.offset = self.offset.min(newest.distance_from(self.old_base));
        self
    }
}

/// A range that survived negotiation, carried through prepare, commit and post-commit.
#[derive(Debug, Clone)]
pub struct DeferredCommitContext {
    pub range: DeferredCommitRange,
    /// Round the ledger reported as committed when this cycle was scheduled.
    pub committed_round: Round,
    /// When the cycle's transaction landed, set before post-commit runs.
    pub flush_time: Option<SystemTime>,
}

impl DeferredCommitContext {
    pub fn new(range: DeferredCommitRange, committed_round: Round) -> Self {
        Self {
            range,
            committed_round,
            flush_time: None,
        }
    }

    pub fn old_base(&self) -> Round {
        self.range.old_base
    }

    pub fn new_base(&self) -> Round {
        self.range.new_base()
    }

    pub fn offset(&self) -> u64 {
        self.range.offset
    }
}
