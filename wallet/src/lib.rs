//! A minimal deterministic wallet: seed-derived keypairs over
//! [`talus_core`] accounts, with no on-disk encryption or multi-wallet
//! management (`btcb::node::wallet_store`'s KDF/LMDB persistence is the
//! RPC/storage collaborator's concern per this crate's scope).
//!
//! Grounded on `btcb::wallet::deterministic_insert`'s seed-plus-index key
//! derivation, reusing [`talus_core::crypto::deterministic_key`] for the
//! derivation itself.

use ed25519_dalek::{Keypair, PublicKey, SecretKey};
use parking_lot::Mutex;
use rand::RngCore;
use talus_core::blocks::Block;
use talus_core::crypto::{deterministic_key, sign_message, Signature};
use talus_core::numbers::Account;
use talus_core::vote::Vote;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("no key found for account")]
    UnknownAccount,
    #[error("key derivation produced an invalid ed25519 secret")]
    BadDerivedKey,
}

struct DerivedKey {
    index: u32,
    keypair: Keypair,
}

/// Holds a 32-byte seed and every index deterministically derived from it
/// so far, mirroring `wallet::deterministic_insert`'s monotonically
/// increasing index without the original's encrypted-at-rest storage.
pub struct Wallet {
    seed: [u8; 32],
    next_index: Mutex<u32>,
    keys: Mutex<Vec<DerivedKey>>,
}

impl Wallet {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Wallet {
            seed,
            next_index: Mutex::new(0),
            keys: Mutex::new(Vec::new()),
        }
    }

    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Derives the next account in sequence and remembers its keypair.
    pub fn deterministic_insert(&self) -> Result<Account, WalletError> {
        let mut next_index = self.next_index.lock();
        let index = *next_index;
        *next_index += 1;
        self.insert_at(index)
    }

    fn insert_at(&self, index: u32) -> Result<Account, WalletError> {
        let derived_secret = deterministic_key(&self.seed, index);
        let secret = SecretKey::from_bytes(&derived_secret).map_err(|_| WalletError::BadDerivedKey)?;
        let public = PublicKey::from(&secret);
        let account = Account(public.to_bytes());
        self.keys.lock().push(DerivedKey {
            index,
            keypair: Keypair { secret, public },
        });
        Ok(account)
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.keys
            .lock()
            .iter()
            .map(|k| Account(k.keypair.public.to_bytes()))
            .collect()
    }

    fn keypair_for(&self, account: &Account) -> Result<Keypair, WalletError> {
        self.keys
            .lock()
            .iter()
            .find(|k| k.keypair.public.to_bytes() == account.0)
            .map(|k| Keypair::from_bytes(&k.keypair.to_bytes()).expect("round-trips"))
            .ok_or(WalletError::UnknownAccount)
    }

    /// Signs `block`'s hash with `account`'s key and writes the signature
    /// into the block in place.
    pub fn sign_block(&self, account: &Account, block: &mut Block) -> Result<(), WalletError> {
        let keypair = self.keypair_for(account)?;
        let hash = block.hash();
        let signature = sign_message(&keypair, &hash.0);
        block.set_signature(signature);
        Ok(())
    }

    /// Builds and signs a vote over `hashes` from `account` at `sequence`.
    pub fn sign_vote(&self, account: &Account, sequence: u64, hashes: Vec<talus_core::numbers::BlockHash>) -> Result<Vote, WalletError> {
        let keypair = self.keypair_for(account)?;
        let mut vote = Vote {
            account: *account,
            sequence,
            signature: Signature::ZERO,
            hashes,
        };
        let message = vote.hash();
        vote.signature = sign_message(&keypair, &message);
        Ok(vote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talus_core::blocks::{ChangeHashables};
    use talus_core::numbers::BlockHash;

    #[test]
    fn deterministic_insert_is_stable_across_instances() {
        let seed = [7u8; 32];
        let a = Wallet::from_seed(seed).deterministic_insert().unwrap();
        let b = Wallet::from_seed(seed).deterministic_insert().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn successive_inserts_differ() {
        let wallet = Wallet::from_seed([9u8; 32]);
        let first = wallet.deterministic_insert().unwrap();
        let second = wallet.deterministic_insert().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn sign_block_produces_verifiable_signature() {
        let wallet = Wallet::from_seed([3u8; 32]);
        let account = wallet.deterministic_insert().unwrap();
        let mut block = Block::Change {
            hashables: ChangeHashables {
                previous: BlockHash([1u8; 32]),
                representative: account,
            },
            signature: Signature::ZERO,
            work: 0,
        };
        wallet.sign_block(&account, &mut block).unwrap();
        let hash = block.hash();
        talus_core::crypto::validate_message(&account.0, &hash.0, block.signature()).unwrap();
    }

    #[test]
    fn signing_with_unknown_account_fails() {
        let wallet = Wallet::from_seed([4u8; 32]);
        let stranger = Account([99u8; 32]);
        let mut block = Block::Change {
            hashables: ChangeHashables {
                previous: BlockHash([1u8; 32]),
                representative: stranger,
            },
            signature: Signature::ZERO,
            work: 0,
        };
        assert!(matches!(wallet.sign_block(&stranger, &mut block), Err(WalletError::UnknownAccount)));
    }
}
