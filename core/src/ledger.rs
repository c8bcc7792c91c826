//! The ledger (§4.E): applies blocks to the store, enforcing the
//! block-lattice invariants, and supports rollback for fork resolution.
//!
//! Grounded on `btcb::secure::ledger.cpp`'s `ledger_processor` visitor
//! (collapsed here into a `match` over [`Block`] per the closed-sum-type
//! design note in `blocks.rs`) and `btcb::lib::errors.cpp`'s
//! `error_process_messages` for the classification returned by [`process`].

use crate::blocks::{Block, Sideband};
use crate::config::NetworkParams;
use crate::crypto::validate_message;
use crate::error::ProcessResult;
use crate::numbers::{Account, Amount, BlockHash};
use crate::store::{AccountInfo, PendingInfo, PendingKey, Store, Transaction, WriteTransaction};
use crate::epoch::Epoch;

fn now_ts() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Wraps a [`Store`] with the consensus rules that decide whether a block
/// may be appended, and what its side effects are.
pub struct Ledger<'a> {
    pub store: &'a Store,
    pub params: &'a NetworkParams,
}

impl<'a> Ledger<'a> {
    pub fn new(store: &'a Store, params: &'a NetworkParams) -> Self {
        Ledger { store, params }
    }

    pub fn is_epoch_link(&self, link: &[u8; 32]) -> bool {
        self.params.is_epoch_link(link)
    }

    /// Account balance as of the account's current head block. Zero for
    /// unopened accounts.
    pub fn balance(&self, txn: &impl Transaction, account: &Account) -> Amount {
        self.store
            .account_get(txn, account)
            .map(|i| i.balance)
            .unwrap_or(Amount::ZERO)
    }

    /// The account a block belongs to, resolved from the side-band if the
    /// block is already in the store, or from the hashables for `Open`/
    /// `State` blocks that have not yet been processed.
    pub fn account(&self, txn: &impl Transaction, block: &Block) -> Option<Account> {
        if let Some(a) = block.account_field() {
            return Some(a);
        }
        self.store.block_account(txn, &block.previous())
    }

    /// The value transferred by a send/receive-carrying block, looked up by
    /// hash once already in the store: the absolute difference between its
    /// balance and its predecessor's (or the block's own balance, for a
    /// chain's first block).
    pub fn amount(&self, txn: &impl Transaction, hash: &BlockHash) -> Option<Amount> {
        let (block, sideband) = self.store.block_get(txn, hash)?;
        if block.previous().is_zero() {
            return Some(sideband.balance);
        }
        let (_, prev_sideband) = self.store.block_get(txn, &block.previous())?;
        Some(if sideband.balance >= prev_sideband.balance {
            Amount(sideband.balance.0 - prev_sideband.balance.0)
        } else {
            Amount(prev_sideband.balance.0 - sideband.balance.0)
        })
    }

    /// The representative's accumulated voting weight (§3 "Representative
    /// weight").
    pub fn weight(&self, txn: &impl Transaction, representative: &Account) -> Amount {
        self.store.representation_get(txn, representative)
    }

    /// The hash a block depends on for confirmation purposes: the send it
    /// receives from, if any (§4.I "source" edges in the dependency walk).
    pub fn block_source(&self, txn: &impl Transaction, hash: &BlockHash) -> Option<BlockHash> {
        let (block, _) = self.store.block_get(txn, hash)?;
        match &block {
            Block::Receive { hashables, .. } => Some(hashables.source),
            Block::Open { hashables, .. } => Some(hashables.source),
            Block::State { hashables, .. } => {
                let prev_balance = if block.previous().is_zero() {
                    Amount::ZERO
                } else {
                    self.store
                        .block_get(txn, &block.previous())
                        .map(|(_, sb)| sb.balance)
                        .unwrap_or(Amount::ZERO)
                };
                if hashables.balance.0 > prev_balance.0 {
                    Some(BlockHash(hashables.link))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Cheap dependency check used before queueing a block for processing
    /// (§4.F): would `process` succeed without the gap variants, given what
    /// is currently in the store?
    pub fn could_fit(&self, txn: &impl Transaction, block: &Block) -> bool {
        let previous_ok = block.previous().is_zero() || self.store.block_exists(txn, &block.previous());
        if !previous_ok {
            return false;
        }
        let source = block.source();
        let source_ok = source.is_zero() || self.store.block_exists(txn, &source);
        if let Block::State { hashables, .. } = block {
            let prev_balance = if hashables.previous.is_zero() {
                Amount::ZERO
            } else {
                self.store
                    .block_get(txn, &hashables.previous)
                    .map(|(_, sb)| sb.balance)
                    .unwrap_or(Amount::ZERO)
            };
            if hashables.balance.0 > prev_balance.0 {
                return self.store.block_exists(txn, &BlockHash(hashables.link));
            }
        }
        source_ok
    }

    fn current_representative(&self, txn: &impl Transaction, info: &AccountInfo) -> Option<Account> {
        self.store
            .block_get(txn, &info.rep_block)
            .and_then(|(b, _)| b.representative())
    }

    /// Applies `block`, mutating the store on success. Returns the
    /// classification the block would receive either way — callers branch
    /// on the non-`Progress` variants to drive fork resolution or the
    /// `unchecked` re-drive (§4.F).
    pub fn process(&self, txn: &mut WriteTransaction, block: Block) -> ProcessResult {
        let hash = block.hash();
        if self.store.block_exists(txn, &hash) {
            return ProcessResult::Old;
        }
        match &block {
            Block::Open { hashables, signature, .. } => {
                if self.store.account_get(txn, &hashables.account).is_some() {
                    return ProcessResult::Fork;
                }
                if hashables.account.is_zero() {
                    return ProcessResult::OpenedBurnAccount;
                }
                if validate_message(&hashables.account.0, &hash.0, signature).is_err() {
                    return ProcessResult::BadSignature;
                }
                if !self.store.block_exists(txn, &hashables.source) {
                    return ProcessResult::GapSource;
                }
                let key = PendingKey {
                    destination_account: hashables.account,
                    send_hash: hashables.source,
                };
                let Some(pending) = self.store.pending_get(txn, &key) else {
                    return ProcessResult::Unreceivable;
                };
                let info = AccountInfo {
                    head: hash,
                    open_block: hash,
                    rep_block: hash,
                    balance: pending.amount,
                    modified: now_ts(),
                    block_count: 1,
                    confirmation_height: 0,
                    epoch: pending.epoch,
                };
                self.store.account_put(txn, hashables.account, info);
                self.store.pending_del(txn, &key);
                self.store
                    .representation_add(txn, hashables.representative, pending.amount.0 as i128);
                self.store.block_put(
                    txn,
                    hash,
                    block.clone(),
                    Sideband {
                        successor: BlockHash::ZERO,
                        account: hashables.account,
                        balance: pending.amount,
                        height: 1,
                        timestamp: now_ts(),
                        block_type: block.block_type(),
                    },
                );
                self.store.frontier_put(txn, hash, hashables.account);
                ProcessResult::Progress
            }

            Block::Send { hashables, signature, .. } => {
                let Some(account) = self.store.block_account(txn, &hashables.previous) else {
                    return ProcessResult::GapPrevious;
                };
                let Some(info) = self.store.account_get(txn, &account) else {
                    return ProcessResult::GapPrevious;
                };
                if info.head != hashables.previous {
                    return ProcessResult::Fork;
                }
                if info.epoch != Epoch::Epoch0 || self.store.block_type(txn, &hashables.previous) == Some(crate::blocks::BlockType::State) {
                    return ProcessResult::BlockPosition;
                }
                if validate_message(&account.0, &hash.0, signature).is_err() {
                    return ProcessResult::BadSignature;
                }
                if hashables.balance.0 >= info.balance.0 {
                    return ProcessResult::NegativeSpend;
                }
                let amount = Amount(info.balance.0 - hashables.balance.0);
                self.link_predecessor(txn, &hashables.previous, hash);
                let new_info = AccountInfo {
                    head: hash,
                    balance: hashables.balance,
                    modified: now_ts(),
                    block_count: info.block_count + 1,
                    ..info
                };
                self.store.account_put(txn, account, new_info);
                self.store.pending_put(
                    txn,
                    PendingKey {
                        destination_account: hashables.destination,
                        send_hash: hash,
                    },
                    PendingInfo {
                        source: account,
                        amount,
                        epoch: info.epoch,
                    },
                );
                self.store.block_put(
                    txn,
                    hash,
                    block.clone(),
                    Sideband {
                        successor: BlockHash::ZERO,
                        account,
                        balance: hashables.balance,
                        height: new_info.block_count,
                        timestamp: now_ts(),
                        block_type: block.block_type(),
                    },
                );
                self.store.frontier_del(txn, &hashables.previous);
                self.store.frontier_put(txn, hash, account);
                ProcessResult::Progress
            }

            Block::Receive { hashables, signature, .. } => {
                let Some(account) = self.store.block_account(txn, &hashables.previous) else {
                    return ProcessResult::GapPrevious;
                };
                let Some(info) = self.store.account_get(txn, &account) else {
                    return ProcessResult::GapPrevious;
                };
                if info.head != hashables.previous {
                    return ProcessResult::Fork;
                }
                if info.epoch != Epoch::Epoch0 || self.store.block_type(txn, &hashables.previous) == Some(crate::blocks::BlockType::State) {
                    return ProcessResult::BlockPosition;
                }
                if validate_message(&account.0, &hash.0, signature).is_err() {
                    return ProcessResult::BadSignature;
                }
                if !self.store.block_exists(txn, &hashables.source) {
                    return ProcessResult::GapSource;
                }
                let key = PendingKey {
                    destination_account: account,
                    send_hash: hashables.source,
                };
                let Some(pending) = self.store.pending_get(txn, &key) else {
                    return ProcessResult::Unreceivable;
                };
                let Some(new_balance) = info.balance.checked_add(pending.amount) else {
                    return ProcessResult::BalanceMismatch;
                };
                self.link_predecessor(txn, &hashables.previous, hash);
                let rep = self.current_representative(txn, &info);
                let new_info = AccountInfo {
                    head: hash,
                    balance: new_balance,
                    modified: now_ts(),
                    block_count: info.block_count + 1,
                    ..info
                };
                self.store.account_put(txn, account, new_info);
                self.store.pending_del(txn, &key);
                if let Some(rep) = rep {
                    self.store.representation_add(txn, rep, pending.amount.0 as i128);
                }
                self.store.block_put(
                    txn,
                    hash,
                    block.clone(),
                    Sideband {
                        successor: BlockHash::ZERO,
                        account,
                        balance: new_balance,
                        height: new_info.block_count,
                        timestamp: now_ts(),
                        block_type: block.block_type(),
                    },
                );
                self.store.frontier_del(txn, &hashables.previous);
                self.store.frontier_put(txn, hash, account);
                ProcessResult::Progress
            }

            Block::Change { hashables, signature, .. } => {
                let Some(account) = self.store.block_account(txn, &hashables.previous) else {
                    return ProcessResult::GapPrevious;
                };
                let Some(info) = self.store.account_get(txn, &account) else {
                    return ProcessResult::GapPrevious;
                };
                if info.head != hashables.previous {
                    return ProcessResult::Fork;
                }
                if info.epoch != Epoch::Epoch0 || self.store.block_type(txn, &hashables.previous) == Some(crate::blocks::BlockType::State) {
                    return ProcessResult::BlockPosition;
                }
                if validate_message(&account.0, &hash.0, signature).is_err() {
                    return ProcessResult::BadSignature;
                }
                self.link_predecessor(txn, &hashables.previous, hash);
                let old_rep = self.current_representative(txn, &info);
                if let Some(old_rep) = old_rep {
                    self.store.representation_add(txn, old_rep, -(info.balance.0 as i128));
                }
                self.store
                    .representation_add(txn, hashables.representative, info.balance.0 as i128);
                let new_info = AccountInfo {
                    head: hash,
                    rep_block: hash,
                    modified: now_ts(),
                    block_count: info.block_count + 1,
                    ..info
                };
                self.store.account_put(txn, account, new_info);
                self.store.block_put(
                    txn,
                    hash,
                    block.clone(),
                    Sideband {
                        successor: BlockHash::ZERO,
                        account,
                        balance: info.balance,
                        height: new_info.block_count,
                        timestamp: now_ts(),
                        block_type: block.block_type(),
                    },
                );
                self.store.frontier_del(txn, &hashables.previous);
                self.store.frontier_put(txn, hash, account);
                ProcessResult::Progress
            }

            Block::State { hashables, signature, .. } => {
                let existing = self.store.account_get(txn, &hashables.account);
                match (&existing, hashables.previous.is_zero()) {
                    (None, false) => return ProcessResult::GapPrevious,
                    (Some(_), true) => return ProcessResult::BlockPosition,
                    (Some(info), false) if info.head != hashables.previous => return ProcessResult::Fork,
                    _ => {}
                }
                let previous_balance = existing.as_ref().map(|i| i.balance).unwrap_or(Amount::ZERO);
                let is_epoch_upgrade =
                    hashables.balance == previous_balance && self.is_epoch_link(&hashables.link);
                let signer = if is_epoch_upgrade {
                    self.params.epoch.signer
                } else {
                    hashables.account
                };
                if validate_message(&signer.0, &hash.0, signature).is_err() {
                    return ProcessResult::BadSignature;
                }
                if hashables.account.is_zero() && existing.is_none() {
                    return ProcessResult::OpenedBurnAccount;
                }

                let mut pending_to_delete = None;
                let mut pending_to_create = None;
                if hashables.balance.0 < previous_balance.0 {
                    let destination = Account(hashables.link);
                    pending_to_create = Some((
                        PendingKey {
                            destination_account: destination,
                            send_hash: hash,
                        },
                        PendingInfo {
                            source: hashables.account,
                            amount: Amount(previous_balance.0 - hashables.balance.0),
                            epoch: existing.map(|i| i.epoch).unwrap_or_default(),
                        },
                    ));
                } else if hashables.balance.0 > previous_balance.0 {
                    let source_hash = BlockHash(hashables.link);
                    if !self.store.block_exists(txn, &source_hash) {
                        return ProcessResult::GapSource;
                    }
                    let key = PendingKey {
                        destination_account: hashables.account,
                        send_hash: source_hash,
                    };
                    let Some(pending) = self.store.pending_get(txn, &key) else {
                        return ProcessResult::Unreceivable;
                    };
                    if pending.amount.0 != hashables.balance.0 - previous_balance.0 {
                        return ProcessResult::BalanceMismatch;
                    }
                    pending_to_delete = Some(key);
                }

                if !hashables.previous.is_zero() {
                    self.link_predecessor(txn, &hashables.previous, hash);
                }
                let old_rep = existing.as_ref().and_then(|i| self.current_representative(txn, i));
                if let Some(old_rep) = old_rep {
                    self.store.representation_add(txn, old_rep, -(previous_balance.0 as i128));
                }
                self.store
                    .representation_add(txn, hashables.representative, hashables.balance.0 as i128);

                let new_epoch = if is_epoch_upgrade {
                    Epoch::Epoch1
                } else {
                    existing.map(|i| i.epoch).unwrap_or_default()
                };
                let new_info = AccountInfo {
                    head: hash,
                    open_block: existing.map(|i| i.open_block).unwrap_or(hash),
                    rep_block: hash,
                    balance: hashables.balance,
                    modified: now_ts(),
                    block_count: existing.map(|i| i.block_count).unwrap_or(0) + 1,
                    confirmation_height: existing.map(|i| i.confirmation_height).unwrap_or(0),
                    epoch: new_epoch,
                };
                self.store.account_put(txn, hashables.account, new_info);
                if let Some(key) = pending_to_delete {
                    self.store.pending_del(txn, &key);
                }
                if let Some((key, info)) = pending_to_create {
                    self.store.pending_put(txn, key, info);
                }
                self.store.block_put(
                    txn,
                    hash,
                    block.clone(),
                    Sideband {
                        successor: BlockHash::ZERO,
                        account: hashables.account,
                        balance: hashables.balance,
                        height: new_info.block_count,
                        timestamp: now_ts(),
                        block_type: block.block_type(),
                    },
                );
                if !hashables.previous.is_zero() {
                    self.store.frontier_del(txn, &hashables.previous);
                }
                self.store.frontier_put(txn, hash, hashables.account);
                ProcessResult::Progress
            }
        }
    }

    fn link_predecessor(&self, txn: &mut WriteTransaction, previous: &BlockHash, successor: BlockHash) {
        if let Some((block, mut sideband)) = self.store.block_get(txn, previous) {
            sideband.successor = successor;
            self.store.block_put(txn, *previous, block, sideband);
        }
    }

    /// Undoes the account's current head block, restoring the prior
    /// account state. Used when an election confirms a competing branch
    /// (§4.H "fork resolution").
    pub fn rollback(&self, txn: &mut WriteTransaction, hash: &BlockHash) -> Result<(), crate::error::Error> {
        let (block, sideband) = self
            .store
            .block_get(txn, hash)
            .ok_or(crate::error::Error::BlockNotFound)?;
        let account = sideband.account;
        let info = self
            .store
            .account_get(txn, &account)
            .ok_or(crate::error::Error::AccountNotFound)?;
        if info.head != *hash {
            // Only the current head may be rolled back; callers walk the
            // successor chain first when rolling back several blocks.
            return Err(crate::error::Error::BlockNotFound);
        }
        if sideband.height <= info.confirmation_height {
            return Err(crate::error::Error::AlreadyConfirmed);
        }

        match &block {
            Block::Open { hashables, .. } => {
                self.store
                    .representation_add(txn, hashables.representative, -(info.balance.0 as i128));
                self.store.pending_put(
                    txn,
                    PendingKey {
                        destination_account: account,
                        send_hash: hashables.source,
                    },
                    PendingInfo {
                        source: Account::ZERO,
                        amount: info.balance,
                        epoch: info.epoch,
                    },
                );
                self.store.account_del(txn, &account);
                self.store.frontier_del(txn, hash);
            }
            Block::Send { hashables, .. } => {
                self.store.pending_del(
                    txn,
                    &PendingKey {
                        destination_account: hashables.destination,
                        send_hash: *hash,
                    },
                );
                self.restore_predecessor(txn, &account, &hashables.previous, info.block_count - 1);
            }
            Block::Receive { hashables, .. } => {
                let key = PendingKey {
                    destination_account: account,
                    send_hash: hashables.source,
                };
                let amount = Amount(info.balance.0 - self.balance_at(txn, &hashables.previous));
                if let Some(rep) = self.current_representative(txn, &info) {
                    self.store.representation_add(txn, rep, -(amount.0 as i128));
                }
                self.store.pending_put(
                    txn,
                    key,
                    PendingInfo {
                        source: self.store.block_account(txn, &hashables.source).unwrap_or(Account::ZERO),
                        amount,
                        epoch: info.epoch,
                    },
                );
                self.restore_predecessor(txn, &account, &hashables.previous, info.block_count - 1);
            }
            Block::Change { hashables, .. } => {
                self.store
                    .representation_add(txn, hashables.representative, -(info.balance.0 as i128));
                if let Some((prev_block, _)) = self.store.block_get(txn, &hashables.previous) {
                    if let Some(old_rep) = prev_block.representative() {
                        self.store.representation_add(txn, old_rep, info.balance.0 as i128);
                    }
                }
                self.restore_predecessor(txn, &account, &hashables.previous, info.block_count - 1);
            }
            Block::State { hashables, .. } => {
                self.store
                    .representation_add(txn, hashables.representative, -(hashables.balance.0 as i128));
                if hashables.previous.is_zero() {
                    self.store.account_del(txn, &account);
                    self.store.frontier_del(txn, hash);
                } else {
                    let prev_balance = self.balance_at(txn, &hashables.previous);
                    if hashables.balance.0 < prev_balance {
                        self.store.pending_del(
                            txn,
                            &PendingKey {
                                destination_account: Account(hashables.link),
                                send_hash: *hash,
                            },
                        );
                    } else if hashables.balance.0 > prev_balance {
                        self.store.pending_put(
                            txn,
                            PendingKey {
                                destination_account: account,
                                send_hash: BlockHash(hashables.link),
                            },
                            PendingInfo {
                                source: self
                                    .store
                                    .block_account(txn, &BlockHash(hashables.link))
                                    .unwrap_or(Account::ZERO),
                                amount: Amount(hashables.balance.0 - prev_balance),
                                epoch: info.epoch,
                            },
                        );
                    }
                    if let Some((prev_block, _)) = self.store.block_get(txn, &hashables.previous) {
                        if let Some(old_rep) = prev_block.representative() {
                            self.store.representation_add(txn, old_rep, prev_balance as i128);
                        }
                    }
                    self.restore_predecessor(txn, &account, &hashables.previous, info.block_count - 1);
                }
            }
        }
        self.store.block_del(txn, hash);
        Ok(())
    }

    fn balance_at(&self, txn: &impl Transaction, hash: &BlockHash) -> u128 {
        if hash.is_zero() {
            return 0;
        }
        self.store.block_get(txn, hash).map(|(_, sb)| sb.balance.0).unwrap_or(0)
    }

    fn restore_predecessor(&self, txn: &mut WriteTransaction, account: &Account, previous: &BlockHash, block_count: u64) {
        let balance = self.balance_at(txn, previous);
        if let Some((prev_block, mut sb)) = self.store.block_get(txn, previous) {
            sb.successor = BlockHash::ZERO;
            self.store.block_put(txn, *previous, prev_block, sb);
        }
        if let Some(mut info) = self.store.account_get(txn, account) {
            info.head = *previous;
            info.balance = Amount(balance);
            info.block_count = block_count;
            self.store.account_put(txn, *account, info);
        }
        self.store.frontier_put(txn, *previous, *account);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{OpenHashables, SendHashables, StateHashables};
    use crate::crypto::{keypair_from_seed, sign_message, Signature};

    fn genesis_open(store: &Store, params: &NetworkParams, account_kp: &ed25519_dalek::Keypair) -> BlockHash {
        let account = Account(account_kp.public.to_bytes());
        let mut txn = store.tx_begin_write();
        store.pending_put(
            &mut txn,
            PendingKey {
                destination_account: account,
                send_hash: params.genesis_open,
            },
            PendingInfo {
                source: Account::ZERO,
                amount: Amount(1_000_000),
                epoch: Epoch::Epoch0,
            },
        );
        store.block_put(
            &mut txn,
            params.genesis_open,
            Block::State {
                hashables: StateHashables {
                    account: Account::ZERO,
                    previous: BlockHash::ZERO,
                    representative: Account::ZERO,
                    balance: Amount::ZERO,
                    link: [0u8; 32],
                },
                signature: Signature::ZERO,
                work: 0,
            },
            Sideband {
                successor: BlockHash::ZERO,
                account: Account::ZERO,
                balance: Amount::ZERO,
                height: 0,
                timestamp: 0,
                block_type: crate::blocks::BlockType::State,
            },
        );
        let open = Block::Open {
            hashables: OpenHashables {
                source: params.genesis_open,
                representative: account,
                account,
            },
            signature: Signature::ZERO,
            work: 0,
        };
        let hash = open.hash();
        let sig = sign_message(account_kp, &hash.0);
        let open = Block::Open {
            hashables: OpenHashables {
                source: params.genesis_open,
                representative: account,
                account,
            },
            signature: sig,
            work: 0,
        };
        let ledger = Ledger::new(store, params);
        assert_eq!(ledger.process(&mut txn, open), ProcessResult::Progress);
        hash
    }

    #[test]
    fn open_then_send_then_receive() {
        let store = Store::new();
        let params = NetworkParams::test();
        let alice = keypair_from_seed([1u8; 32]);
        let bob = keypair_from_seed([2u8; 32]);
        let alice_acc = Account(alice.public.to_bytes());
        let bob_acc = Account(bob.public.to_bytes());

        let alice_open = genesis_open(&store, &params, &alice);

        let mut txn = store.tx_begin_write();
        let ledger = Ledger::new(&store, &params);
        let send_hashables = SendHashables {
            previous: alice_open,
            destination: bob_acc,
            balance: Amount(1_000_000 - 1_000),
        };
        let send_hash = Block::Send {
            hashables: send_hashables.clone(),
            signature: Signature::ZERO,
            work: 0,
        }
        .hash();
        let send = Block::Send {
            hashables: send_hashables,
            signature: sign_message(&alice, &send_hash.0),
            work: 0,
        };
        assert_eq!(ledger.process(&mut txn, send), ProcessResult::Progress);
        assert_eq!(ledger.balance(&txn, &alice_acc), Amount(1_000_000 - 1_000));

        let open_hashables = OpenHashables {
            source: send_hash,
            representative: bob_acc,
            account: bob_acc,
        };
        let bob_open_hash = Block::Open {
            hashables: open_hashables.clone(),
            signature: Signature::ZERO,
            work: 0,
        }
        .hash();
        let bob_open = Block::Open {
            hashables: open_hashables,
            signature: sign_message(&bob, &bob_open_hash.0),
            work: 0,
        };
        assert_eq!(ledger.process(&mut txn, bob_open), ProcessResult::Progress);
        assert_eq!(ledger.balance(&txn, &bob_acc), Amount(1_000));
    }

    #[test]
    fn duplicate_previous_is_a_fork() {
        let store = Store::new();
        let params = NetworkParams::test();
        let alice = keypair_from_seed([3u8; 32]);
        let alice_acc = Account(alice.public.to_bytes());
        let alice_open = genesis_open(&store, &params, &alice);

        let mut txn = store.tx_begin_write();
        let ledger = Ledger::new(&store, &params);
        let make_send = |balance: u128| {
            let hashables = SendHashables {
                previous: alice_open,
                destination: alice_acc,
                balance: Amount(balance),
            };
            let hash = Block::Send {
                hashables: hashables.clone(),
                signature: Signature::ZERO,
                work: 0,
            }
            .hash();
            Block::Send {
                hashables,
                signature: sign_message(&alice, &hash.0),
                work: 0,
            }
        };
        let first = make_send(900_000);
        let second = make_send(800_000);
        assert_eq!(ledger.process(&mut txn, first), ProcessResult::Progress);
        assert_eq!(ledger.process(&mut txn, second), ProcessResult::Fork);
    }

    #[test]
    fn rollback_restores_prior_head() {
        let store = Store::new();
        let params = NetworkParams::test();
        let alice = keypair_from_seed([4u8; 32]);
        let alice_acc = Account(alice.public.to_bytes());
        let alice_open = genesis_open(&store, &params, &alice);

        let mut txn = store.tx_begin_write();
        let ledger = Ledger::new(&store, &params);
        let hashables = SendHashables {
            previous: alice_open,
            destination: alice_acc,
            balance: Amount(500_000),
        };
        let hash = Block::Send {
            hashables: hashables.clone(),
            signature: Signature::ZERO,
            work: 0,
        }
        .hash();
        let send = Block::Send {
            hashables,
            signature: sign_message(&alice, &hash.0),
            work: 0,
        };
        assert_eq!(ledger.process(&mut txn, send), ProcessResult::Progress);
        assert_eq!(ledger.balance(&txn, &alice_acc), Amount(500_000));

        ledger.rollback(&mut txn, &hash).unwrap();
        assert_eq!(ledger.balance(&txn, &alice_acc), Amount(1_000_000));
        assert!(!ledger.store.block_exists(&txn, &hash));
    }
}
