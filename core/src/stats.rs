//! Typed counter registry (§4.L, ambient), grounded on `btcb::stat`'s
//! `(type, detail, dir)` keyed counters from `node/stats.cpp`. Persistence
//! and JSON/file log sinks are out of scope (the RPC/metrics collaborator's
//! concern per §1); what is kept is the counter shape every other module
//! increments into.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatType {
    Ledger,
    Block,
    Vote,
    Bootstrap,
    ConfirmationHeight,
    ActiveTransactions,
    Rollback,
    Message,
    Peering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatDetail {
    Fork,
    BadSignature,
    GapPrevious,
    GapSource,
    Unreceivable,
    Invalid,
    Replay,
    BlocksConfirmed,
    InvalidBlock,
    InsufficientWork,
    Confirm,
    Flush,
    Handshake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StatKey {
    kind: StatType,
    detail: StatDetail,
    dir: Direction,
}

/// Not persisted (§1 non-goal): an in-process counter table read by the
/// RPC/metrics collaborator, reset only on restart.
#[derive(Default)]
pub struct Stats {
    counters: Mutex<HashMap<StatKey, AtomicU64>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, kind: StatType, detail: StatDetail, dir: Direction) {
        self.add(kind, detail, dir, 1);
    }

    pub fn add(&self, kind: StatType, detail: StatDetail, dir: Direction, value: u64) {
        let key = StatKey { kind, detail, dir };
        self.counters
            .lock()
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn count(&self, kind: StatType, detail: StatDetail, dir: Direction) -> u64 {
        let key = StatKey { kind, detail, dir };
        self.counters
            .lock()
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently_per_key() {
        let stats = Stats::new();
        stats.inc(StatType::Ledger, StatDetail::Fork, Direction::In);
        stats.inc(StatType::Ledger, StatDetail::Fork, Direction::In);
        stats.inc(StatType::Vote, StatDetail::Invalid, Direction::In);
        assert_eq!(stats.count(StatType::Ledger, StatDetail::Fork, Direction::In), 2);
        assert_eq!(stats.count(StatType::Vote, StatDetail::Invalid, Direction::In), 1);
        assert_eq!(stats.count(StatType::Ledger, StatDetail::Fork, Direction::Out), 0);
    }
}
