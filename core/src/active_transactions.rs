//! Elections over competing blocks at a root, and the table that tracks
//! them (§4.H).
//!
//! Grounded on `btcb::active_transactions`/`btcb::election` — the root→
//! election and hash→election indices, `adjust_difficulty`'s transitive
//! dependency walk, `update_active_difficulty`'s trended-multiplier ring
//! buffer, and the `should_flush`/`flush_lowest` eviction policy are ported
//! from that file with the networking side effects (rebroadcast, confirm_req
//! fan-out) replaced by a returned [`RequestConfirmOutcome`] the transport
//! layer consumes, since wire broadcast is this crate's collaborator rather
//! than its concern.

use crate::blocks::{Block, QualifiedRoot};
use crate::config::NodeConfig;
use crate::ledger::Ledger;
use crate::numbers::{difficulty, Account, Amount, BlockHash};
use crate::store::Transaction;
use crate::vote::Vote;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ElectionStatus {
    pub winner: Arc<Block>,
    pub tally: Amount,
    pub confirmation_request_count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ElectionVoteResult {
    pub replay: bool,
    pub processed: bool,
}

/// One contested root: the set of competing blocks seen for it, and the
/// per-representative votes cast so far.
pub struct Election {
    pub status: Mutex<ElectionStatus>,
    pub blocks: Mutex<HashMap<BlockHash, Arc<Block>>>,
    /// account -> (sequence, hash voted for)
    last_votes: Mutex<HashMap<Account, (u64, BlockHash)>>,
    pub confirmed: std::sync::atomic::AtomicBool,
    pub stopped: std::sync::atomic::AtomicBool,
    pub announcements: std::sync::atomic::AtomicU32,
    pub dependent_blocks: Mutex<HashSet<BlockHash>>,
}

impl Election {
    fn new(winner: Arc<Block>) -> Self {
        Election {
            status: Mutex::new(ElectionStatus {
                winner: winner.clone(),
                tally: Amount::ZERO,
                confirmation_request_count: 0,
            }),
            blocks: Mutex::new({
                let mut m = HashMap::new();
                m.insert(winner.hash(), winner);
                m
            }),
            last_votes: Mutex::new(HashMap::new()),
            confirmed: std::sync::atomic::AtomicBool::new(false),
            stopped: std::sync::atomic::AtomicBool::new(false),
            announcements: std::sync::atomic::AtomicU32::new(0),
            dependent_blocks: Mutex::new(HashSet::new()),
        }
    }

    fn is_confirmed(&self) -> bool {
        self.confirmed.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Registers `account`'s vote for `hash` at `sequence`. A stale or
    /// repeated sequence is a replay; otherwise the vote counts toward the
    /// next tally.
    pub fn vote(&self, account: Account, sequence: u64, hash: BlockHash) -> ElectionVoteResult {
        let mut votes = self.last_votes.lock();
        if let Some((existing_seq, _)) = votes.get(&account) {
            if *existing_seq >= sequence {
                // Anything at or below the recorded sequence is a replay,
                // whether or not it names the same hash: the tally already
                // reflects this account's most recent choice.
                return ElectionVoteResult {
                    replay: true,
                    processed: false,
                };
            }
        }
        votes.insert(account, (sequence, hash));
        ElectionVoteResult {
            replay: false,
            processed: true,
        }
    }

    /// Adds a competing block to the election without changing the current
    /// winner (the next tally decides that). Returns `false` (no error) if
    /// this is a genuinely new fork entry.
    pub fn publish(&self, block: Arc<Block>) -> bool {
        let mut blocks = self.blocks.lock();
        let hash = block.hash();
        if blocks.contains_key(&hash) {
            return true;
        }
        blocks.insert(hash, block);
        false
    }

    /// Recomputes the winner by summing representative weight behind each
    /// competing block and picking the highest tally.
    pub fn tally(&self, weight_of: impl Fn(&Account) -> Amount) -> HashMap<BlockHash, Amount> {
        let votes = self.last_votes.lock();
        let blocks = self.blocks.lock();
        let mut totals: HashMap<BlockHash, u128> = blocks.keys().map(|h| (*h, 0u128)).collect();
        for (account, (_, hash)) in votes.iter() {
            if let Some(total) = totals.get_mut(hash) {
                *total += weight_of(account).0;
            }
        }
        totals.into_iter().map(|(h, v)| (h, Amount(v))).collect()
    }

    /// Applies a freshly computed tally: updates the winner if a
    /// higher-weighted competitor emerged, and confirms the election if the
    /// winner's weight clears `quorum` out of `online_weight`.
    pub fn confirm_if_quorum(
        &self,
        weight_of: impl Fn(&Account) -> Amount,
        online_weight: Amount,
        quorum_percent: u8,
    ) -> bool {
        if self.is_confirmed() || self.is_stopped() {
            return false;
        }
        let totals = self.tally(weight_of);
        let Some((&winner_hash, &winner_weight)) = totals.iter().max_by_key(|(_, w)| w.0) else {
            return false;
        };
        {
            let mut status = self.status.lock();
            if let Some(block) = self.blocks.lock().get(&winner_hash) {
                status.winner = block.clone();
            }
            status.tally = winner_weight;
        }
        let quorum_threshold = online_weight.0.saturating_mul(quorum_percent as u128) / 100;
        if winner_weight.0 >= quorum_threshold && winner_weight.0 > 0 {
            self.confirmed.store(true, std::sync::atomic::Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn winner(&self) -> Arc<Block> {
        self.status.lock().winner.clone()
    }
}

struct ConflictInfo {
    root: QualifiedRoot,
    difficulty: u64,
    adjusted_difficulty: u64,
    election: Arc<Election>,
}

/// Rate-sampled counter behind `should_flush`'s admission control, ported
/// from `transaction_counter`.
struct TransactionCounter {
    count: u64,
    rate: u64,
    trend_last: Instant,
}

impl TransactionCounter {
    fn new() -> Self {
        TransactionCounter {
            count: 0,
            rate: 0,
            trend_last: Instant::now(),
        }
    }

    fn add(&mut self) {
        self.count += 1;
    }

    fn trend_sample(&mut self) {
        let now = Instant::now();
        if now >= self.trend_last + Duration::from_secs(1) && self.count != 0 {
            let elapsed = now.duration_since(self.trend_last).as_secs().max(1);
            self.rate = self.count / elapsed;
            self.count = 0;
            self.trend_last = now;
        }
    }
}

struct Inner {
    roots: HashMap<QualifiedRoot, ConflictInfo>,
    blocks: HashMap<BlockHash, Arc<Election>>,
    confirmed: VecDeque<ElectionStatus>,
    multipliers_cb: VecDeque<f64>,
    trended_active_difficulty: u64,
    counter: TransactionCounter,
    long_unconfirmed_size: usize,
    next_frontier_account: Account,
    next_frontier_check: Instant,
    stopped: bool,
}

/// Outcome of a [`ActiveTransactions::request_confirm`] pass, handed to the
/// (external) transport layer instead of this crate reaching into it
/// directly.
#[derive(Debug, Default)]
pub struct RequestConfirmOutcome {
    pub rebroadcast: Vec<Arc<Block>>,
    pub confirm_req_targets: Vec<(BlockHash, BlockHash)>,
    pub newly_confirmed: Vec<ElectionStatus>,
    pub unconfirmed_count: u32,
}

pub const MAX_BROADCAST_QUEUE: usize = 256;

/// Escalation re-requests (confirm_req for an election's previous/source
/// blocks) fire every 4th announcement, independent of `announcement_long`.
const CONFIRM_REQ_ESCALATION_PERIOD: u64 = 4;

pub struct ActiveTransactions<'a> {
    ledger: &'a Ledger<'a>,
    config: &'a NodeConfig,
    inner: Mutex<Inner>,
}

impl<'a> ActiveTransactions<'a> {
    pub fn new(ledger: &'a Ledger<'a>, config: &'a NodeConfig, publish_threshold: u64) -> Self {
        ActiveTransactions {
            ledger,
            config,
            inner: Mutex::new(Inner {
                roots: HashMap::new(),
                blocks: HashMap::new(),
                confirmed: VecDeque::new(),
                multipliers_cb: std::iter::repeat(1.0).take(20).collect(),
                trended_active_difficulty: publish_threshold,
                counter: TransactionCounter::new(),
                long_unconfirmed_size: 0,
                next_frontier_account: Account::ZERO,
                next_frontier_check: Instant::now(),
                stopped: false,
            }),
        }
    }

    /// Starts (or no-ops on) an election for `block`. Returns `true` if an
    /// election already existed at this root.
    pub fn add(&self, block: Arc<Block>, difficulty_value: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return true;
        }
        let root = block.qualified_root();
        if inner.roots.contains_key(&root) {
            inner.counter.add();
            if self.should_flush_locked(&mut inner) {
                self.flush_lowest_locked(&mut inner);
            }
            return true;
        }
        let election = Arc::new(Election::new(block.clone()));
        inner.blocks.insert(block.hash(), election.clone());
        inner.roots.insert(
            root,
            ConflictInfo {
                root,
                difficulty: difficulty_value,
                adjusted_difficulty: difficulty_value,
                election,
            },
        );
        self.adjust_difficulty_locked(&mut inner, block.hash());
        false
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        inner.roots.clear();
        inner.blocks.clear();
    }

    pub fn active(&self, root: &QualifiedRoot) -> bool {
        self.inner.lock().roots.contains_key(root)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().roots.len()
    }

    pub fn list_blocks(&self) -> Vec<Arc<Block>> {
        self.inner.lock().roots.values().map(|c| c.election.winner()).collect()
    }

    pub fn list_confirmed(&self) -> Vec<ElectionStatus> {
        self.inner.lock().confirmed.iter().cloned().collect()
    }

    pub fn erase(&self, root: &QualifiedRoot) {
        let mut inner = self.inner.lock();
        if let Some(info) = inner.roots.remove(root) {
            for hash in info.election.blocks.lock().keys() {
                inner.blocks.remove(hash);
            }
        }
    }

    /// Registers a vote against whichever election(s) it concerns, either by
    /// block hash (explicit ack) or by qualified root (a vote carrying a
    /// full block to publish alongside it). Returns whether any included
    /// ballot was a replay, matching the original's return contract.
    pub fn vote(&self, vote: &Vote, weight_of: impl Fn(&Account) -> Amount, online_weight: Amount) -> bool {
        let inner = self.inner.lock();
        let mut replay = false;
        for hash in &vote.hashes {
            if let Some(election) = inner.blocks.get(hash) {
                let result = election.vote(vote.account, vote.sequence, *hash);
                replay |= result.replay;
                if result.processed {
                    election.confirm_if_quorum(&weight_of, online_weight, self.config.online_weight_quorum_percent);
                }
            }
        }
        replay
    }

    pub fn publish(&self, block: Arc<Block>) -> bool {
        let mut inner = self.inner.lock();
        let Some(election) = inner.roots.get(&block.qualified_root()).map(|i| i.election.clone()) else {
            return true;
        };
        let result = election.publish(block.clone());
        if !result {
            inner.blocks.insert(block.hash(), election);
        }
        result
    }

    pub fn confirm_block(&self, hash: &BlockHash) {
        let inner = self.inner.lock();
        if let Some(election) = inner.blocks.get(hash) {
            if !election.is_confirmed() && !election.is_stopped() && election.winner().hash() == *hash {
                election.confirmed.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    fn should_flush_locked(&self, inner: &mut Inner) -> bool {
        inner.counter.trend_sample();
        if inner.roots.len() > 100_000 {
            return true;
        }
        let rate = inner.counter.rate;
        let minimum_size = if rate == 0 { 512 } else { (rate as usize) * 512 };
        if inner.roots.len() < minimum_size {
            return false;
        }
        let ratio = inner.roots.len() as f64;
        let long = inner.long_unconfirmed_size as f64;
        match rate {
            0..=10 => ratio * 0.75 < long,
            11..=100 => ratio * 0.50 < long,
            101..=1000 => ratio * 0.25 < long,
            _ => false,
        }
    }

    /// Evicts up to two of the lowest-adjusted-difficulty long-unconfirmed
    /// elections to make room, mirroring `flush_lowest`'s reverse scan over
    /// the difficulty-ordered index.
    fn flush_lowest_locked(&self, inner: &mut Inner) {
        let mut candidates: Vec<QualifiedRoot> = inner
            .roots
            .values()
            .filter(|c| {
                c.election.announcements.load(std::sync::atomic::Ordering::SeqCst) > self.config.announcement_long
                    && !c.election.is_confirmed()
            })
            .map(|c| c.root)
            .collect();
        candidates.sort_by_key(|root| inner.roots[root].adjusted_difficulty);
        for root in candidates.into_iter().take(2) {
            if let Some(info) = inner.roots.remove(&root) {
                for hash in info.election.blocks.lock().keys() {
                    inner.blocks.remove(hash);
                }
            }
        }
    }

    pub fn update_difficulty(&self, block: &Block, new_difficulty: u64) {
        let mut inner = self.inner.lock();
        let root = block.qualified_root();
        let mut changed = false;
        if let Some(info) = inner.roots.get_mut(&root) {
            if new_difficulty > info.difficulty {
                info.difficulty = new_difficulty;
                changed = true;
            }
        }
        if changed {
            self.adjust_difficulty_locked(&mut inner, block.hash());
        }
    }

    /// Transitive walk over `previous`/`source`/`link`/dependent-block edges,
    /// averaging the multiplier of every election this block connects to and
    /// redistributing it level-weighted, ported from the original's
    /// `adjust_difficulty` unchanged in spirit.
    fn adjust_difficulty_locked(&self, inner: &mut Inner, hash: BlockHash) {
        let mut remaining: VecDeque<(BlockHash, i64)> = VecDeque::new();
        remaining.push_back((hash, 0));
        let mut processed: HashSet<BlockHash> = HashSet::new();
        let mut elections_list: Vec<(QualifiedRoot, i64)> = Vec::new();
        let mut sum = 0.0f64;
        let publish_threshold = inner.trended_active_difficulty.max(1);

        while let Some((h, level)) = remaining.pop_front() {
            if processed.contains(&h) {
                continue;
            }
            let Some(election) = inner.blocks.get(&h).cloned() else {
                continue;
            };
            if election.is_confirmed() || election.is_stopped() {
                continue;
            }
            let winner = election.winner();
            if winner.hash() != h {
                continue;
            }
            let previous = winner.previous();
            if !previous.is_zero() {
                remaining.push_back((previous, level + 1));
            }
            let source = winner.source();
            if !source.is_zero() && source != previous {
                remaining.push_back((source, level + 1));
            }
            let link = winner.link();
            if link != [0u8; 32] && !self.ledger.is_epoch_link(&link) && BlockHash(link) != previous {
                remaining.push_back((BlockHash(link), level + 1));
            }
            for dep in election.dependent_blocks.lock().iter() {
                remaining.push_back((*dep, level - 1));
            }
            processed.insert(h);
            let root = QualifiedRoot {
                previous,
                root: winner.root(),
            };
            if let Some(info) = inner.roots.get(&root) {
                sum += difficulty::to_multiplier(info.difficulty, publish_threshold);
                elections_list.push((root, level));
            }
        }

        if elections_list.is_empty() {
            return;
        }
        let multiplier = sum / elections_list.len() as f64;
        let average = difficulty::from_multiplier(multiplier, publish_threshold);
        let highest_level = elections_list.last().map(|(_, l)| *l).unwrap_or(0);
        let mut divider = 1i64;
        if multiplier + highest_level as f64 > 10_000_000_000.0 {
            divider = ((multiplier + highest_level as f64) / 10_000_000_000.0) as i64 + 1;
        }
        for (root, level) in elections_list {
            if let Some(info) = inner.roots.get_mut(&root) {
                let adjusted = average as i64 + level / divider.max(1);
                info.adjusted_difficulty = adjusted.max(0) as u64;
            }
        }
    }

    /// Pushes the median adjusted-difficulty multiplier of all active
    /// elections into the trending ring buffer and recomputes the network's
    /// trended difficulty (§4.H).
    pub fn update_active_difficulty(&self, publish_threshold: u64) {
        let mut inner = self.inner.lock();
        let mut active_difficulties: Vec<u64> = inner
            .roots
            .values()
            .filter(|c| !c.election.is_confirmed() && !c.election.is_stopped())
            .map(|c| c.adjusted_difficulty)
            .collect();
        let multiplier = if active_difficulties.is_empty() {
            1.0
        } else {
            active_difficulties.sort_unstable();
            difficulty::to_multiplier(active_difficulties[active_difficulties.len() / 2], publish_threshold)
        };
        inner.multipliers_cb.push_front(multiplier);
        inner.multipliers_cb.truncate(20);
        let sum: f64 = inner.multipliers_cb.iter().sum();
        let avg = sum / inner.multipliers_cb.len() as f64;
        inner.trended_active_difficulty = difficulty::from_multiplier(avg, publish_threshold);
    }

    pub fn active_difficulty(&self) -> u64 {
        self.inner.lock().trended_active_difficulty
    }

    /// One pass over every active election: detects confirmed/stopped roots
    /// for eviction, escalates long-unconfirmed elections by pulling in
    /// their previous/source blocks, and decides what the transport layer
    /// should rebroadcast or re-request (§4.H `request_confirm`).
    pub fn request_confirm(&self, txn: &impl Transaction) -> RequestConfirmOutcome {
        let mut inner = self.inner.lock();
        let mut outcome = RequestConfirmOutcome::default();
        let mut inactive: Vec<QualifiedRoot> = Vec::new();
        let mut unconfirmed_count = 0u32;
        let roots_size = inner.roots.len();
        let announcement_long = self.config.announcement_long;
        let announcement_min = self.config.announcement_min;

        let keys: Vec<QualifiedRoot> = inner.roots.keys().copied().collect();
        for root in keys {
            let Some(info) = inner.roots.get(&root) else { continue };
            let election = info.election.clone();
            let announcements = election.announcements.load(std::sync::atomic::Ordering::SeqCst);
            if (election.is_confirmed() || election.is_stopped()) && announcements + 1 >= announcement_min {
                if election.is_confirmed() {
                    let status = election.status.lock().clone();
                    outcome.newly_confirmed.push(status.clone());
                    inner.confirmed.push_back(status);
                    if inner.confirmed.len() > self.config.election_history_size {
                        inner.confirmed.pop_front();
                    }
                }
                inactive.push(root);
            } else {
                if announcements > announcement_long {
                    unconfirmed_count += 1;
                    if announcements % CONFIRM_REQ_ESCALATION_PERIOD == 1 && roots_size < 100 {
                        let winner = election.winner();
                        let previous_hash = winner.previous();
                        if !previous_hash.is_zero() {
                            outcome.confirm_req_targets.push((previous_hash, winner.root()));
                        }
                        if let Some(source) = self.ledger.block_source(txn, &winner.hash()) {
                            if !source.is_zero() {
                                outcome.confirm_req_targets.push((source, winner.root()));
                            }
                        }
                    }
                }
                let winner = election.winner();
                if self.ledger.could_fit(txn, &winner) {
                    if outcome.rebroadcast.len() < MAX_BROADCAST_QUEUE {
                        outcome.rebroadcast.push(winner);
                    }
                } else if announcements != 0 {
                    election.stop();
                }
                election.announcements.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        for root in &inactive {
            if let Some(info) = inner.roots.remove(root) {
                for hash in info.election.blocks.lock().keys() {
                    inner.blocks.remove(hash);
                }
            }
        }
        inner.long_unconfirmed_size = unconfirmed_count as usize;
        outcome.unconfirmed_count = unconfirmed_count;
        outcome
    }

    /// Sweeps unconfirmed frontiers, starting an election for any account
    /// whose head block has not yet reached its confirmation height
    /// (§4.H). Runs on a slow timer (3-15 minutes, 1000x faster on a test
    /// network) bounded by `MAX_BROADCAST_QUEUE / 4` new elections per pass.
    pub fn confirm_frontiers(&self, txn: &impl Transaction, is_representative: bool, test_speedup: u32) -> usize {
        let mut inner = self.inner.lock();
        if Instant::now() < inner.next_frontier_check {
            return 0;
        }
        let representative_factor: i64 = if is_representative { 3 * 60 } else { 15 * 60 };
        let max_elections = MAX_BROADCAST_QUEUE / 4;
        let mut elections_count = 0usize;
        let next_account = inner.next_frontier_account;
        drop(inner);

        let accounts = self.ledger.store.latest_range(txn, next_account);
        let mut last_seen = next_account;
        for (account, info) in accounts {
            if elections_count >= max_elections {
                break;
            }
            if info.block_count != info.confirmation_height {
                if let Some((block, _)) = self.ledger.store.block_get(txn, &info.head) {
                    let difficulty_value = crate::work::work_value(&block.root(), block.work());
                    if !self.add(Arc::new(block), difficulty_value) {
                        elections_count += 1;
                    }
                }
            }
            last_seen = account;
        }

        let mut inner = self.inner.lock();
        let fully_confirmed_factor: i64 = if elections_count <= max_elections { 4 } else { 1 };
        let wait_secs = ((representative_factor * fully_confirmed_factor) / (test_speedup.max(1) as i64)).max(1);
        inner.next_frontier_check = Instant::now() + Duration::from_secs(wait_secs as u64);
        inner.next_frontier_account = if elections_count <= max_elections {
            Account::ZERO
        } else {
            last_seen
        };
        elections_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{ChangeHashables, OpenHashables};
    use crate::config::NetworkParams;
    use crate::crypto::Signature;
    use crate::store::Store;

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
    fn add_is_idempotent_per_root() {
        let store = Store::new();
        let params = NetworkParams::test();
        let ledger = Ledger::new(&store, &params);
        let config = NodeConfig::default();
        let active = ActiveTransactions::new(&ledger, &config, params.publish_threshold);
        let block = sample_block(1);
        assert!(!active.add(block.clone(), 1));
        assert!(active.add(block, 1));
        assert_eq!(active.size(), 1);
    }

    #[test]
    fn quorum_confirms_election() {
        let store = Store::new();
        let params = NetworkParams::test();
        let ledger = Ledger::new(&store, &params);
        let config = NodeConfig::default();
        let active = ActiveTransactions::new(&ledger, &config, params.publish_threshold);
        let block = sample_block(2);
        active.add(block.clone(), 1);
        let rep = Account([99u8; 32]);
        let vote = Vote {
            account: rep,
            sequence: 1,
            signature: Signature::ZERO,
            hashes: vec![block.hash()],
        };
        let weights: HashMap<Account, Amount> = [(rep, Amount(1_000_000))].into_iter().collect();
        active.vote(&vote, |a| weights.get(a).copied().unwrap_or(Amount::ZERO), Amount(1_000_000));
        let election = active.inner.lock().blocks.get(&block.hash()).unwrap().clone();
        assert!(election.is_confirmed());
    }

    #[test]
    fn open_root_election_first_open_wins_when_unchallenged() {
        let store = Store::new();
        let params = NetworkParams::test();
        let ledger = Ledger::new(&store, &params);
        let config = NodeConfig::default();
        let active = ActiveTransactions::new(&ledger, &config, params.publish_threshold);
        let block = Arc::new(Block::Open {
            hashables: OpenHashables {
                source: BlockHash([1u8; 32]),
                representative: Account([2u8; 32]),
                account: Account([3u8; 32]),
            },
            signature: Signature::ZERO,
            work: 0,
        });
        active.add(block.clone(), 1);
        assert!(active.active(&block.qualified_root()));
    }
}
