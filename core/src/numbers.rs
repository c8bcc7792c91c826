//! 256/512-bit primitives, the address codec, and difficulty-multiplier math.
//!
//! Grounded on `btcb::lib::numbers.cpp` (`uint256_union`/`uint512_union`
//! encode/decode, the base-32 account codec, `difficulty::to_multiplier` /
//! `from_multiplier`) and the teacher's `Hash = [u8; 32]` alias.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte hash or public key. Used for block hashes, accounts, and roots.
pub type Hash = [u8; 32];

/// 128-bit unsigned amount, stored big-endian on the wire (per §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, Hash)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    pub const MAX: Amount = Amount(u128::MAX);

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 32-byte Ed25519 public key identifying an account on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Account(pub Hash);

/// A 32-byte Blake2b hash identifying a block, uniquely, by its hashables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct BlockHash(pub Hash);

impl BlockHash {
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl Account {
    pub const ZERO: Account = Account([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// BLAKE2B-5 check byte set used by the address codec (`encode_account`
    /// in the original).
    fn check(&self) -> u64 {
        let mut hasher = Blake2bVar::new(5).expect("valid digest size");
        hasher.update(&self.0);
        let mut out = [0u8; 5];
        hasher.finalize_variable(&mut out).expect("finalize");
        let mut buf = [0u8; 8];
        buf[..5].copy_from_slice(&out);
        u64::from_le_bytes(buf)
    }

    /// Encodes the account as `{prefix}_{52-char base32}` per §6.
    pub fn to_address(&self, prefix: &str) -> String {
        let check = self.check();
        // number_l = (key << 40) | check, encoded 5 bits at a time, 60 groups
        let mut number: [u64; 5] = [0; 5]; // little 320-bit accumulator as 5x64
        // Build a big-endian 256-bit + 40-bit check value by shifting a byte buffer.
        let mut bytes = [0u8; 40];
        bytes[..32].copy_from_slice(&self.0);
        bytes[32..40].copy_from_slice(&check.to_le_bytes());
        // Interpret bytes[0..32] as key (big-endian), bytes[32..40] low 40 bits as check.
        // We instead do base32 extraction directly from a 296-bit big integer composed
        // of key (256 bits) shifted left 40, OR'd with check (40 bits).
        let _ = &mut number; // silence unused in case of future refactor
        let mut accum: Vec<u8> = Vec::with_capacity(37);
        accum.extend_from_slice(&self.0);
        accum.extend_from_slice(&check.to_le_bytes()[..5]);
        // accum is now 37 bytes = 296 bits, big-endian key followed by little-endian check.
        let bits = bit_reader(&accum);
        let alphabet: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";
        let mut out = String::with_capacity(prefix.len() + 1 + 60);
        out.push_str(prefix);
        out.push('_');
        let mut chars = Vec::with_capacity(60);
        for chunk in bits.chunks(5).take(60) {
            let mut v: u8 = 0;
            for (i, b) in chunk.iter().enumerate() {
                v |= (*b as u8) << (4 - i);
            }
            chars.push(alphabet[v as usize] as char);
        }
        for c in chars.iter().rev() {
            out.push(*c);
        }
        out
    }

    /// Decodes either of the two accepted prefix forms, validating the check byte.
    pub fn from_address(s: &str, prefixes: &[&str]) -> Result<Account, AddressError> {
        for prefix in prefixes {
            let lead = format!("{}_", prefix);
            let lead_dash = format!("{}-", prefix);
            let body = if let Some(b) = s.strip_prefix(&lead) {
                Some(b)
            } else {
                s.strip_prefix(&lead_dash)
            };
            if let Some(body) = body {
                if body.len() != 60 {
                    continue;
                }
                return decode_body(body);
            }
        }
        Err(AddressError::BadFormat)
    }
}

fn decode_body(body: &str) -> Result<Account, AddressError> {
    let rev = reverse_alphabet();
    let mut bits: Vec<u8> = Vec::with_capacity(body.len() * 5);
    for c in body.chars() {
        let v = *rev.get(&c).ok_or(AddressError::BadCharacter)?;
        for i in (0..5).rev() {
            bits.push((v >> i) & 1);
        }
    }
    // bits has 300 entries; the leading 4 bits of the first char are padding/zero.
    // Drop the leading 4 bits to get 296 bits = 37 bytes.
    let bits = &bits[4..];
    let bytes = bits_to_bytes(bits);
    if bytes.len() != 37 {
        return Err(AddressError::BadFormat);
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[..32]);
    let mut check_bytes = [0u8; 8];
    check_bytes[..5].copy_from_slice(&bytes[32..37]);
    let check = u64::from_le_bytes(check_bytes);
    let account = Account(key);
    if account.check() != check {
        return Err(AddressError::BadCheck);
    }
    Ok(account)
}

fn bit_reader(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for b in bytes {
        for i in (0..8).rev() {
            bits.push((b >> i) & 1);
        }
    }
    bits
}

fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bits.len() / 8);
    for chunk in bits.chunks(8) {
        let mut v: u8 = 0;
        for (i, b) in chunk.iter().enumerate() {
            v |= b << (7 - i);
        }
        out.push(v);
    }
    out
}

fn reverse_alphabet() -> std::collections::HashMap<char, u8> {
    let alphabet: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";
    alphabet
        .iter()
        .enumerate()
        .map(|(i, c)| (*c as char, i as u8))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address has an unrecognised prefix or length")]
    BadFormat,
    #[error("address contains a character outside the account alphabet")]
    BadCharacter,
    #[error("address check byte does not match the encoded key")]
    BadCheck,
}

/// Difficulty-multiplier conversions, ported from `btcb::difficulty::to_multiplier`
/// / `from_multiplier`. `base_difficulty` is the network's `publish_threshold`.
pub mod difficulty {
    pub fn to_multiplier(difficulty: u64, base_difficulty: u64) -> f64 {
        debug_assert!(difficulty > 0);
        (0u64.wrapping_sub(base_difficulty)) as f64 / (0u64.wrapping_sub(difficulty)) as f64
    }

    pub fn from_multiplier(multiplier: f64, base_difficulty: u64) -> u64 {
        debug_assert!(multiplier > 0.0);
        0u64.wrapping_sub((0u64.wrapping_sub(base_difficulty) as f64 / multiplier) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trip() {
        let account = Account([7u8; 32]);
        let addr = account.to_address("tlx");
        let decoded = Account::from_address(&addr, &["tlx"]).unwrap();
        assert_eq!(account, decoded);
    }

    #[test]
    fn corrupted_check_byte_rejected() {
        let account = Account([9u8; 32]);
        let mut addr = account.to_address("tlx");
        // Flip the last character, which is part of the check-byte encoding.
        let last = addr.pop().unwrap();
        let alphabet: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";
        let idx = alphabet.iter().position(|c| *c as char == last).unwrap();
        let replacement = alphabet[(idx + 1) % alphabet.len()] as char;
        addr.push(replacement);
        assert!(Account::from_address(&addr, &["tlx"]).is_err());
    }

    #[test]
    fn difficulty_multiplier_round_trip() {
        let base = 0xffffffc000000000u64;
        let d = difficulty::from_multiplier(8.0, base);
        let m = difficulty::to_multiplier(d, base);
        assert!((m - 8.0).abs() < 1e-6);
    }
}
