//! Signed votes (§3 "Vote"), grounded on `btcb`'s vote hashing scheme
//! (`"vote "` prefix ‖ block hashes ‖ little-endian sequence) referenced
//! throughout `active_transactions.cpp` and `confirmation_height_processor.cpp`.

use crate::blocks::BlockHash;
use crate::crypto::{blake2b_256_segments, validate_message, Signature};
use crate::numbers::Account;
use serde::{Deserialize, Serialize};

pub const MAX_VOTE_BLOCKS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub account: Account,
    pub sequence: u64,
    pub signature: Signature,
    pub hashes: Vec<BlockHash>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VoteError {
    #[error("vote carries zero or more than {MAX_VOTE_BLOCKS} block hashes")]
    BadSize,
    #[error("vote signature does not validate against the claimed account")]
    BadSignature,
}

impl Vote {
    /// Blake2b-256 over `"vote " ‖ hash_0 ‖ .. ‖ hash_n ‖ sequence_le`,
    /// which is what the representative actually signs.
    pub fn hash(&self) -> [u8; 32] {
        let seq_bytes = self.sequence.to_le_bytes();
        let mut segments: Vec<&[u8]> = Vec::with_capacity(self.hashes.len() + 2);
        segments.push(b"vote ");
        for h in &self.hashes {
            segments.push(&h.0);
        }
        segments.push(&seq_bytes);
        blake2b_256_segments(&segments)
    }

    pub fn validate(&self) -> Result<(), VoteError> {
        if self.hashes.is_empty() || self.hashes.len() > MAX_VOTE_BLOCKS {
            return Err(VoteError::BadSize);
        }
        let message = self.hash();
        validate_message(&self.account.0, &message, &self.signature)
            .map_err(|_| VoteError::BadSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{keypair_from_seed, sign_message};

    #[test]
    fn sign_and_validate_round_trip() {
        let kp = keypair_from_seed([11u8; 32]);
        let mut vote = Vote {
            account: Account(kp.public.to_bytes()),
            sequence: 1,
            signature: Signature::ZERO,
            hashes: vec![BlockHash([1u8; 32])],
        };
        let message = vote.hash();
        vote.signature = sign_message(&kp, &message);
        assert!(vote.validate().is_ok());
    }

    #[test]
    fn oversized_vote_rejected() {
        let kp = keypair_from_seed([12u8; 32]);
        let vote = Vote {
            account: Account(kp.public.to_bytes()),
            sequence: 1,
            signature: Signature::ZERO,
            hashes: vec![BlockHash([1u8; 32]); MAX_VOTE_BLOCKS + 1],
        };
        assert_eq!(vote.validate().unwrap_err(), VoteError::BadSize);
    }
}
