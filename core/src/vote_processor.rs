//! Asynchronous vote verification and classification (§4.G).
//!
//! Grounded on `btcb::active_transactions::vote`'s replay/processed
//! contract (reused here via [`ActiveTransactions::vote`]) and on the
//! teacher's `WorkPool` for the bounded-queue-plus-dedicated-thread shape
//! (`work.rs`'s ticket/cancellation pattern generalizes to the vote queue's
//! `crossbeam_channel::Sender`/`Receiver` pair). Batch signature checking
//! uses [`crate::crypto::validate_message_batch`].

use crate::active_transactions::ActiveTransactions;
use crate::config::NodeConfig;
use crate::crypto::validate_message_batch;
use crate::numbers::{Account, Amount};
use crate::vote::{Vote, VoteError, MAX_VOTE_BLOCKS};
use crossbeam_channel::{bounded, Receiver, Sender};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteCode {
    Invalid,
    Replay,
    Vote,
    IndeterminateElection,
}

/// Bounds how many votes from a single low-weight representative can be
/// in flight at once, the random-early-drop counterpart to
/// `active_transactions::flush_lowest` on the block side (§4.G).
struct RepDedup {
    recent: LruCache<Account, ()>,
}

impl RepDedup {
    fn new(capacity: usize) -> Self {
        RepDedup {
            recent: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
        }
    }

    fn seen_recently(&mut self, account: &Account) -> bool {
        if self.recent.contains(account) {
            true
        } else {
            self.recent.put(*account, ());
            false
        }
    }
}

/// Drains a bounded channel of incoming votes, verifying signatures in
/// batches before handing surviving votes to [`ActiveTransactions::vote`].
/// Representatives below `drop_weight_minimum` have their excess traffic
/// randomly dropped once the queue is under pressure, mirroring the
/// original's weight-tiered admission control.
pub struct VoteProcessor<'a> {
    active: &'a ActiveTransactions<'a>,
    sender: Sender<Vote>,
    receiver: Receiver<Vote>,
    dedup: Mutex<RepDedup>,
    drop_weight_minimum: Amount,
}

impl<'a> VoteProcessor<'a> {
    pub fn new(active: &'a ActiveTransactions<'a>, config: &NodeConfig) -> Self {
        let (sender, receiver) = bounded(config.max_broadcast_queue);
        VoteProcessor {
            active,
            sender,
            receiver,
            dedup: Mutex::new(RepDedup::new(config.batch_write_size)),
            drop_weight_minimum: Amount(config.online_weight_minimum / 1000),
        }
    }

    /// Queues a vote for processing; returns `false` if the channel is
    /// full and the vote is rejected outright (a live node would increment
    /// a drop counter in `stats` here — see `core::stats`).
    pub fn enqueue(&self, vote: Vote) -> bool {
        self.sender.try_send(vote).is_ok()
    }

    pub fn queue_len(&self) -> usize {
        self.receiver.len()
    }

    /// Drains every currently queued vote, verifying its signature before
    /// classifying it against the active-transactions table. Returns one
    /// [`VoteCode`] per vote, in arrival order.
    pub fn flush(&self, weight_of: impl Fn(&Account) -> Amount, online_weight: Amount) -> Vec<VoteCode> {
        let mut drained = Vec::new();
        while let Ok(vote) = self.receiver.try_recv() {
            drained.push(vote);
        }
        if drained.is_empty() {
            return Vec::new();
        }

        let batch_items: Vec<_> = drained.iter().map(|v| (v.account.0, v.hash(), v.signature)).collect();
        let signatures_ok = validate_message_batch(&batch_items);

        let mut out = Vec::with_capacity(drained.len());
        for (vote, sig_ok) in drained.into_iter().zip(signatures_ok) {
            if vote.hashes.is_empty() || vote.hashes.len() > MAX_VOTE_BLOCKS {
                out.push(VoteCode::Invalid);
                continue;
            }
            if !sig_ok {
                out.push(VoteCode::Invalid);
                continue;
            }
            let weight = weight_of(&vote.account);
            if weight.0 < self.drop_weight_minimum.0 && self.dedup.lock().seen_recently(&vote.account) {
                out.push(VoteCode::IndeterminateElection);
                continue;
            }
            let replay = self.active.vote(&vote, &weight_of, online_weight);
            out.push(if replay { VoteCode::Replay } else { VoteCode::Vote });
        }
        out
    }
}

/// Standalone signature check usable before a vote is even queued, for
/// callers that want to reject garbage at the wire boundary (§4.K parser).
pub fn precheck_vote(vote: &Vote) -> Result<(), VoteError> {
    vote.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{Block, ChangeHashables};
    use crate::config::NetworkParams;
    use crate::crypto::{keypair_from_seed, sign_message, Signature};
    use crate::ledger::Ledger;
    use crate::numbers::BlockHash;
    use crate::store::Store;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn sample_block(seed: u8) -> Arc<Block> {
        Arc::new(Block::Change {
            hashables: ChangeHashables {
                previous: BlockHash([seed; 32]),
                representative: Account([seed.wrapping_add(1); 32]),
            },
            signature: Signature::ZERO,
            work: 0,
        })
    }

    #[test]
    fn flush_classifies_valid_vote_and_confirms_quorum() {
        let store = Store::new();
        let params = NetworkParams::test();
        let ledger = Ledger::new(&store, &params);
        let config = NodeConfig::default();
        let active = ActiveTransactions::new(&ledger, &config, params.publish_threshold);
        let block = sample_block(10);
        active.add(block.clone(), 1);

        let rep = keypair_from_seed([55u8; 32]);
        let rep_acc = Account(rep.public.to_bytes());
        let vote_hash_input = Vote {
            account: rep_acc,
            sequence: 1,
            signature: Signature::ZERO,
            hashes: vec![block.hash()],
        }
        .hash();
        let vote = Vote {
            account: rep_acc,
            sequence: 1,
            signature: sign_message(&rep, &vote_hash_input),
            hashes: vec![block.hash()],
        };

        let processor = VoteProcessor::new(&active, &config);
        assert!(processor.enqueue(vote));
        let weights: HashMap<Account, Amount> = [(rep_acc, Amount(1_000_000))].into_iter().collect();
        let codes = processor.flush(|a| weights.get(a).copied().unwrap_or(Amount::ZERO), Amount(1_000_000));
        assert_eq!(codes, vec![VoteCode::Vote]);
        assert!(active.list_blocks().iter().any(|b| b.hash() == block.hash()));
    }

    #[test]
    fn flush_rejects_bad_signature() {
        let store = Store::new();
        let params = NetworkParams::test();
        let ledger = Ledger::new(&store, &params);
        let config = NodeConfig::default();
        let active = ActiveTransactions::new(&ledger, &config, params.publish_threshold);
        let block = sample_block(20);
        active.add(block.clone(), 1);

        let rep_acc = Account([3u8; 32]);
        let vote = Vote {
            account: rep_acc,
            sequence: 1,
            signature: Signature::ZERO,
            hashes: vec![block.hash()],
        };
        let processor = VoteProcessor::new(&active, &config);
        processor.enqueue(vote);
        let codes = processor.flush(|_| Amount::ZERO, Amount(1_000_000));
        assert_eq!(codes, vec![VoteCode::Invalid]);
    }
}
