//! The confirmation-height processor (§4.I): walks the implicitly-confirmed
//! portion of an account's chain, following receive/open blocks back to
//! their sources, and commits confirmation heights in batches.
//!
//! Ported from `btcb::confirmation_height_processor::add_confirmation_height`
//! — the explicit work-list (`receive_source_pairs`) replaces the original's
//! recursion-avoidance deque one-for-one, and `write_pending`'s batching by
//! `batch_write_size` accounts per write transaction is unchanged. The
//! sentinel `height_not_set = u64::max` in the original becomes `Option<u64>`
//! here, which is the idiomatic Rust shape for the same "not yet known"
//! state.

use crate::active_transactions::ActiveTransactions;
use crate::error::Error;
use crate::numbers::{Account, BlockHash};
use crate::store::{ReadTransaction, Store};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy)]
struct ConfHeightDetails {
    account: Account,
    hash: BlockHash,
    height: u64,
    num_blocks_confirmed: u64,
}

struct ReceiveSourcePair {
    receive_details: ConfHeightDetails,
    source_hash: BlockHash,
}

struct PendingInner {
    pending: BTreeSet<BlockHash>,
    current_hash: BlockHash,
}

/// The cross-thread work queue: block hashes whose chain needs its
/// confirmation height advanced, fed by the block processor and the
/// election-quorum callback (§4.H `confirm_if_quorum`).
pub struct PendingConfirmationHeight {
    inner: Mutex<PendingInner>,
    condvar: Condvar,
}

impl PendingConfirmationHeight {
    pub fn new() -> Self {
        PendingConfirmationHeight {
            inner: Mutex::new(PendingInner {
                pending: BTreeSet::new(),
                current_hash: BlockHash::ZERO,
            }),
            condvar: Condvar::new(),
        }
    }

    pub fn add(&self, hash: BlockHash) {
        self.inner.lock().pending.insert(hash);
        self.condvar.notify_one();
    }

    pub fn size(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Only checks the top-level block, not anything transitively below it
    /// in the chain (matches the original's documented limitation).
    pub fn is_processing_block(&self, hash: &BlockHash) -> bool {
        let inner = self.inner.lock();
        if !inner.current_hash.is_zero() && inner.current_hash == *hash {
            return true;
        }
        inner.pending.contains(hash)
    }

    pub fn current(&self) -> BlockHash {
        self.inner.lock().current_hash
    }

    /// Blocks until a hash is available or `notify` is called after
    /// `stop`; returns `None` once `stop` has fired and the queue is empty.
    fn pop_blocking(&self, stopped: &std::sync::atomic::AtomicBool) -> Option<BlockHash> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(&hash) = inner.pending.iter().next() {
                inner.pending.remove(&hash);
                inner.current_hash = hash;
                return Some(hash);
            }
            if stopped.load(std::sync::atomic::Ordering::SeqCst) {
                return None;
            }
            self.condvar.wait(&mut inner);
        }
    }
}

impl Default for PendingConfirmationHeight {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives confirmation-height advancement. Intended to be run from a
/// dedicated thread the node owns (§5's thread-role table): call
/// [`ConfirmationHeightProcessor::run_once`] in a loop, or
/// [`add_confirmation_height`](Self::add_confirmation_height) directly when
/// driving it synchronously from a test or a single-threaded tool.
pub struct ConfirmationHeightProcessor<'a> {
    store: &'a Store,
    active: &'a ActiveTransactions<'a>,
    pending: &'a PendingConfirmationHeight,
    epoch_link: [u8; 32],
    batch_write_size: usize,
    batch_read_size: u64,
    stopped: std::sync::atomic::AtomicBool,
}

impl<'a> ConfirmationHeightProcessor<'a> {
    pub fn new(
        store: &'a Store,
        active: &'a ActiveTransactions<'a>,
        pending: &'a PendingConfirmationHeight,
        epoch_link: [u8; 32],
        batch_write_size: usize,
        batch_read_size: u64,
    ) -> Self {
        ConfirmationHeightProcessor {
            store,
            active,
            pending,
            epoch_link,
            batch_write_size: batch_write_size.max(1),
            batch_read_size: batch_read_size.max(1),
            stopped: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        self.pending.condvar.notify_one();
    }

    /// Pops the next pending hash and processes it; returns `false` once
    /// stopped with nothing left to do, letting the caller's loop exit.
    pub fn run_once(&self) -> bool {
        let Some(hash) = self.pending.pop_blocking(&self.stopped) else {
            return false;
        };
        if let Err(err) = self.add_confirmation_height(hash) {
            tracing::warn!(error = %err, "confirmation height processing failed");
        }
        self.pending.inner.lock().current_hash = BlockHash::ZERO;
        true
    }

    /// For all implicitly-confirmed blocks below `hash`, follows receive/
    /// open blocks back to their sources and iterates to genesis,
    /// committing confirmation heights bottom-up in batches.
    pub fn add_confirmation_height(&self, hash: BlockHash) -> Result<(), Error> {
        let mut receive_details: Option<ConfHeightDetails> = None;
        let mut current = hash;
        let mut pending_writes: Vec<ConfHeightDetails> = Vec::new();
        let mut receive_source_pairs: Vec<ReceiveSourcePair> = Vec::new();
        let mut write_cache: HashMap<Account, u64> = HashMap::new();

        let mut read_txn = self.store.tx_begin_read();
        loop {
            if let Some(pair) = receive_source_pairs.last() {
                receive_details = Some(pair.receive_details);
                current = pair.source_hash;
            } else if receive_details.is_some() {
                current = hash;
                receive_details = None;
            }

            let block_height = self
                .store
                .block_account_height(&read_txn, &current)
                .ok_or(Error::BlockNotFound)?;
            let account = self.store.block_account(&read_txn, &current).ok_or(Error::BlockNotFound)?;
            let account_info = self.store.account_get(&read_txn, &account).ok_or(Error::AccountNotFound)?;
            let mut confirmation_height = account_info.confirmation_height;
            if let Some(&cached) = write_cache.get(&account) {
                if cached > confirmation_height {
                    confirmation_height = cached;
                }
            }

            let count_before_receive = receive_source_pairs.len();
            if block_height > confirmation_height {
                if block_height - confirmation_height > 20_000 {
                    tracing::warn!(
                        hash = %hex::encode(current.0),
                        "iterating over a large account chain for setting confirmation height"
                    );
                }
                self.collect_unconfirmed_receive_and_sources_for_account(
                    block_height,
                    confirmation_height,
                    current,
                    account,
                    &mut read_txn,
                    &mut receive_source_pairs,
                );
            }

            let confirmed_receives_pending = count_before_receive != receive_source_pairs.len();
            if !confirmed_receives_pending {
                if block_height > confirmation_height {
                    write_cache.insert(account, block_height);
                    pending_writes.push(ConfHeightDetails {
                        account,
                        hash: current,
                        height: block_height,
                        num_blocks_confirmed: block_height - confirmation_height,
                    });
                }
                // Read without clearing: the reset that clears `receive_details`
                // happens at the top of the loop, once `receive_source_pairs`
                // is empty, so `current` can be restored to the original
                // target hash on the next pass. Clearing it here too would
                // leave `current` stuck on this pair's source hash forever.
                if let Some(mut details) = receive_details {
                    let receive_account = details.account;
                    if let Some(&existing) = write_cache.get(&receive_account) {
                        details.num_blocks_confirmed = details.height - existing;
                    }
                    write_cache.insert(receive_account, details.height);
                    pending_writes.push(details);
                }
                receive_source_pairs.pop();
            }

            if (pending_writes.len() >= self.batch_write_size || receive_source_pairs.is_empty())
                && !pending_writes.is_empty()
            {
                if self.write_pending(&mut pending_writes).is_err() {
                    receive_source_pairs.clear();
                    break;
                }
            }
            if self.stopped.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            read_txn.refresh();
            if receive_source_pairs.is_empty() && current == hash {
                break;
            }
        }
        Ok(())
    }

    fn write_pending(&self, pending_writes: &mut Vec<ConfHeightDetails>) -> Result<(), Error> {
        while !pending_writes.is_empty() {
            let mut txn = self.store.tx_begin_write();
            let mut processed = 0usize;
            while !pending_writes.is_empty() {
                let detail = pending_writes[0];
                let mut info = self
                    .store
                    .account_get(&txn, &detail.account)
                    .ok_or(Error::AccountNotFound)?;
                if detail.height > info.confirmation_height {
                    if !self.store.block_exists(&txn, &detail.hash) {
                        tracing::error!(hash = %hex::encode(detail.hash.0), "failed to write confirmation height");
                        return Err(Error::BlockNotFound);
                    }
                    info.confirmation_height = detail.height;
                    self.store.account_put(&mut txn, detail.account, info);
                }
                pending_writes.remove(0);
                processed += 1;
                if processed >= self.batch_write_size {
                    break;
                }
            }
        }
        Ok(())
    }

    fn collect_unconfirmed_receive_and_sources_for_account(
        &self,
        block_height: u64,
        confirmation_height: u64,
        hash: BlockHash,
        account: Account,
        read_txn: &mut ReadTransaction,
        receive_source_pairs: &mut Vec<ReceiveSourcePair>,
    ) {
        let mut hash = hash;
        let mut num_to_confirm = block_height - confirmation_height;
        let mut next_height: Option<u64> = None;
        while num_to_confirm > 0 && !hash.is_zero() {
            self.active.confirm_block(&hash);
            let Some((block, _)) = self.store.block_get(read_txn, &hash) else {
                break;
            };
            let mut source = block.source();
            if source.is_zero() {
                source = BlockHash(block.link());
            }
            if !source.is_zero() && source.0 != self.epoch_link && self.store.source_exists(read_txn, &source) {
                let block_height_here = confirmation_height + num_to_confirm;
                if let Some(nh) = next_height {
                    if let Some(last) = receive_source_pairs.last_mut() {
                        last.receive_details.num_blocks_confirmed = nh - block_height_here;
                    }
                }
                receive_source_pairs.push(ReceiveSourcePair {
                    receive_details: ConfHeightDetails {
                        account,
                        hash,
                        height: block_height_here,
                        num_blocks_confirmed: 0,
                    },
                    source_hash: source,
                });
                next_height = Some(block_height_here);
            }
            hash = block.previous();

            if num_to_confirm % self.batch_read_size == 0 {
                read_txn.refresh();
            }
            num_to_confirm -= 1;
        }
        if let Some(last) = receive_source_pairs.last_mut() {
            last.receive_details.num_blocks_confirmed = last.receive_details.height - confirmation_height;
        }
    }
}
