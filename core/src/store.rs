//! Typed key-value store interface (§4.D), with an in-memory reference
//! implementation.
//!
//! The specification treats the persistent store as an external
//! collaborator ("Persistent store implementation details... out of scope");
//! what is in scope is the *shape* of the interface the ledger, block
//! processor, and confirmation-height processor depend on. `MemStore` below
//! is a complete, correct implementation of that interface suitable for
//! tests and for driving the consensus engine in-process; a production
//! deployment would swap in a disk-backed implementation behind the same
//! traits without touching any consensus code.
//!
//! Table names follow §6 (`frontiers`, `accounts_v0`/`accounts_v1` collapsed
//! into one `accounts` table keyed by account with an `epoch` field — see
//! DESIGN.md for why the two-table split was not carried over), `pending_v0`/
//! `pending_v1` likewise collapsed, `unchecked`, `representation`, `vote`,
//! `online_weight`, `meta`, `peers`.

use crate::blocks::{Block, BlockType, Sideband};
use crate::epoch::Epoch;
use crate::numbers::{Account, Amount, BlockHash};
use crate::vote::Vote;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    pub head: BlockHash,
    pub open_block: BlockHash,
    pub rep_block: BlockHash,
    pub balance: Amount,
    pub modified: u64,
    pub block_count: u64,
    pub confirmation_height: u64,
    pub epoch: Epoch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingKey {
    pub destination_account: Account,
    pub send_hash: BlockHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInfo {
    pub source: Account,
    pub amount: Amount,
    pub epoch: Epoch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UncheckedKey {
    pub dependency: BlockHash,
    pub block_hash: BlockHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Unknown,
    Invalid,
    Valid,
    ValidEpoch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncheckedInfo {
    pub block: Block,
    pub signer_account: Account,
    pub arrival_time: u64,
    pub verified: VerificationStatus,
}

/// All tables, guarded by a single lock. A real store would use MVCC
/// snapshots for readers and a single writer; here the lock itself gives us
/// that property (many readers, one writer) which is all the consensus code
/// above depends on.
#[derive(Default)]
pub struct StoreInner {
    pub frontiers: HashMap<BlockHash, Account>,
    pub accounts: HashMap<Account, AccountInfo>,
    pub blocks: HashMap<BlockHash, (Block, Sideband)>,
    pub pending: BTreeMap<PendingKey, PendingInfo>,
    pub unchecked: BTreeMap<UncheckedKey, UncheckedInfo>,
    pub representation: HashMap<Account, Amount>,
    pub vote: HashMap<Account, Vote>,
    pub online_weight: BTreeMap<u64, Amount>,
    pub meta: HashMap<String, Vec<u8>>,
    pub peers: std::collections::HashSet<SocketAddr>,
}

/// A read-only snapshot held for the duration of a traversal. `refresh`
/// mirrors the original's `read_transaction.renew()`, letting long chain
/// walks bound how long they hold a stale view (§4.I step 2/6).
pub struct ReadTransaction<'a> {
    guard: RwLockReadGuard<'a, StoreInner>,
    store: &'a Store,
}

impl<'a> ReadTransaction<'a> {
    pub fn refresh(&mut self) {
        drop(std::mem::replace(&mut self.guard, self.store.inner.read()));
    }
}

pub struct WriteTransaction<'a> {
    guard: RwLockWriteGuard<'a, StoreInner>,
}

pub trait Transaction {
    fn inner(&self) -> &StoreInner;
}
impl Transaction for ReadTransaction<'_> {
    fn inner(&self) -> &StoreInner {
        &self.guard
    }
}
impl Transaction for WriteTransaction<'_> {
    fn inner(&self) -> &StoreInner {
        &self.guard
    }
}

/// The store handle; cheap to clone (wraps an `Arc`-equivalent via
/// `parking_lot`'s lock being the sole piece of shared state).
#[derive(Default)]
pub struct Store {
    inner: RwLock<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tx_begin_read(&self) -> ReadTransaction<'_> {
        ReadTransaction {
            guard: self.inner.read(),
            store: self,
        }
    }

    pub fn tx_begin_write(&self) -> WriteTransaction<'_> {
        WriteTransaction {
            guard: self.inner.write(),
        }
    }

    // -- accounts --

    pub fn account_get(&self, txn: &impl Transaction, account: &Account) -> Option<AccountInfo> {
        txn.inner().accounts.get(account).copied()
    }

    pub fn account_put(&self, txn: &mut WriteTransaction, account: Account, info: AccountInfo) {
        txn.guard.accounts.insert(account, info);
    }

    pub fn account_del(&self, txn: &mut WriteTransaction, account: &Account) {
        txn.guard.accounts.remove(account);
    }

    pub fn latest_range(&self, txn: &impl Transaction, from: Account) -> Vec<(Account, AccountInfo)> {
        let mut out: Vec<_> = txn
            .inner()
            .accounts
            .iter()
            .filter(|(a, _)| **a >= from)
            .map(|(a, i)| (*a, *i))
            .collect();
        out.sort_by_key(|(a, _)| *a);
        out
    }

    // -- frontiers --

    pub fn frontier_put(&self, txn: &mut WriteTransaction, head: BlockHash, account: Account) {
        txn.guard.frontiers.insert(head, account);
    }

    pub fn frontier_del(&self, txn: &mut WriteTransaction, head: &BlockHash) {
        txn.guard.frontiers.remove(head);
    }

    pub fn frontier_get(&self, txn: &impl Transaction, head: &BlockHash) -> Option<Account> {
        txn.inner().frontiers.get(head).copied()
    }

    // -- blocks --

    pub fn block_put(&self, txn: &mut WriteTransaction, hash: BlockHash, block: Block, sideband: Sideband) {
        txn.guard.blocks.insert(hash, (block, sideband));
    }

    pub fn block_get(&self, txn: &impl Transaction, hash: &BlockHash) -> Option<(Block, Sideband)> {
        txn.inner().blocks.get(hash).cloned()
    }

    pub fn block_del(&self, txn: &mut WriteTransaction, hash: &BlockHash) {
        txn.guard.blocks.remove(hash);
    }

    pub fn block_exists(&self, txn: &impl Transaction, hash: &BlockHash) -> bool {
        txn.inner().blocks.contains_key(hash)
    }

    pub fn block_account(&self, txn: &impl Transaction, hash: &BlockHash) -> Option<Account> {
        txn.inner().blocks.get(hash).map(|(_, sb)| sb.account)
    }

    pub fn block_account_height(&self, txn: &impl Transaction, hash: &BlockHash) -> Option<u64> {
        txn.inner().blocks.get(hash).map(|(_, sb)| sb.height)
    }

    pub fn block_type(&self, txn: &impl Transaction, hash: &BlockHash) -> Option<BlockType> {
        txn.inner().blocks.get(hash).map(|(b, _)| b.block_type())
    }

    /// A source is "confirmable" once the send block that created it is
    /// itself present in the ledger (§4.I collect step: `source_exists`).
    pub fn source_exists(&self, txn: &impl Transaction, hash: &BlockHash) -> bool {
        self.block_exists(txn, hash)
    }

    // -- pending --

    pub fn pending_put(&self, txn: &mut WriteTransaction, key: PendingKey, info: PendingInfo) {
        txn.guard.pending.insert(key, info);
    }

    pub fn pending_get(&self, txn: &impl Transaction, key: &PendingKey) -> Option<PendingInfo> {
        txn.inner().pending.get(key).copied()
    }

    pub fn pending_del(&self, txn: &mut WriteTransaction, key: &PendingKey) {
        txn.guard.pending.remove(key);
    }

    // -- unchecked --

    pub fn unchecked_put(&self, txn: &mut WriteTransaction, key: UncheckedKey, info: UncheckedInfo) {
        txn.guard.unchecked.insert(key, info);
    }

    pub fn unchecked_get(&self, txn: &impl Transaction, dependency: &BlockHash) -> Vec<(UncheckedKey, UncheckedInfo)> {
        txn.inner()
            .unchecked
            .range(
                UncheckedKey {
                    dependency: *dependency,
                    block_hash: BlockHash::ZERO,
                }..,
            )
            .take_while(|(k, _)| k.dependency == *dependency)
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    pub fn unchecked_del(&self, txn: &mut WriteTransaction, key: &UncheckedKey) {
        txn.guard.unchecked.remove(key);
    }

    pub fn unchecked_prune_older_than(&self, txn: &mut WriteTransaction, cutoff: u64) {
        txn.guard.unchecked.retain(|_, v| v.arrival_time >= cutoff);
    }

    // -- representation --

    pub fn representation_get(&self, txn: &impl Transaction, account: &Account) -> Amount {
        txn.inner()
            .representation
            .get(account)
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    pub fn representation_add(&self, txn: &mut WriteTransaction, account: Account, delta: i128) {
        let entry = txn.guard.representation.entry(account).or_insert(Amount::ZERO);
        let new_value = entry.0 as i128 + delta;
        entry.0 = new_value.max(0) as u128;
    }

    // -- votes --

    pub fn vote_put(&self, txn: &mut WriteTransaction, account: Account, vote: Vote) {
        txn.guard.vote.insert(account, vote);
    }

    pub fn vote_get(&self, txn: &impl Transaction, account: &Account) -> Option<Vote> {
        txn.inner().vote.get(account).cloned()
    }

    // -- online weight --

    pub fn online_weight_put(&self, txn: &mut WriteTransaction, timestamp: u64, weight: Amount) {
        txn.guard.online_weight.insert(timestamp, weight);
    }

    pub fn online_weight_trim(&self, txn: &mut WriteTransaction, keep_last: usize) {
        while txn.guard.online_weight.len() > keep_last {
            if let Some(&oldest) = txn.guard.online_weight.keys().next() {
                txn.guard.online_weight.remove(&oldest);
            }
        }
    }

    pub fn online_weight_samples(&self, txn: &impl Transaction) -> Vec<Amount> {
        txn.inner().online_weight.values().copied().collect()
    }

    // -- meta / peers --

    pub fn meta_put(&self, txn: &mut WriteTransaction, key: &str, value: Vec<u8>) {
        txn.guard.meta.insert(key.to_string(), value);
    }

    pub fn meta_get(&self, txn: &impl Transaction, key: &str) -> Option<Vec<u8>> {
        txn.inner().meta.get(key).cloned()
    }

    pub fn peer_put(&self, txn: &mut WriteTransaction, addr: SocketAddr) {
        txn.guard.peers.insert(addr);
    }

    pub fn peers(&self, txn: &impl Transaction) -> Vec<SocketAddr> {
        txn.inner().peers.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_round_trip() {
        let store = Store::new();
        let mut txn = store.tx_begin_write();
        let account = Account([1u8; 32]);
        let info = AccountInfo {
            head: BlockHash([2u8; 32]),
            block_count: 1,
            ..Default::default()
        };
        store.account_put(&mut txn, account, info);
        drop(txn);
        let read = store.tx_begin_read();
        assert_eq!(store.account_get(&read, &account), Some(info));
    }

    #[test]
    fn unchecked_range_scoped_by_dependency() {
        let store = Store::new();
        let dep = BlockHash([3u8; 32]);
        let mut txn = store.tx_begin_write();
        store.unchecked_put(
            &mut txn,
            UncheckedKey {
                dependency: dep,
                block_hash: BlockHash([4u8; 32]),
            },
            UncheckedInfo {
                block: crate::blocks::Block::Change {
                    hashables: crate::blocks::ChangeHashables {
                        previous: BlockHash([5u8; 32]),
                        representative: Account([6u8; 32]),
                    },
                    signature: crate::crypto::Signature::ZERO,
                    work: 0,
                },
                signer_account: Account([7u8; 32]),
                arrival_time: 0,
                verified: VerificationStatus::Unknown,
            },
        );
        drop(txn);
        let read = store.tx_begin_read();
        assert_eq!(store.unchecked_get(&read, &dep).len(), 1);
        let other = BlockHash([9u8; 32]);
        assert_eq!(store.unchecked_get(&read, &other).len(), 0);
    }
}
