//! Error taxonomies (§4.E, §7), grounded on `btcb::lib::errors.cpp`'s
//! `error_common_messages`/`error_process_messages` tables.

use thiserror::Error;

/// Outcome of [`crate::ledger::Ledger::process`], mirroring the original's
/// `process_result` classification exactly — deliberately *not* folded into
/// [`Error`], since callers branch on every variant rather than propagate it
/// with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// Block was valid and has been appended to the ledger.
    Progress,
    /// Signature failed to validate against the claimed account.
    BadSignature,
    /// Block is already present in the store.
    Old,
    /// Resulting balance would be negative (a `send` that doesn't reduce
    /// balance, or computed balance overflow).
    NegativeSpend,
    /// Another block already occupies this account/previous pair — a fork.
    Fork,
    /// A `receive`/`open`/state-receive references a send that does not
    /// exist, or that has already been received.
    Unreceivable,
    /// `previous` is not present in the store (gap, needs `unchecked`).
    GapPrevious,
    /// `source`/`link` is not present in the store (gap, needs `unchecked`).
    GapSource,
    /// Attempted send/change from the designated burn account.
    OpenedBurnAccount,
    /// State block's declared balance does not match `prev_balance ±
    /// amount`.
    BalanceMismatch,
    /// State block's declared representative does not match the account's
    /// prior representative on a block that is not a representative
    /// change.
    RepresentativeMismatch,
    /// Block is not the account's first block but claims to be an `open`,
    /// or vice versa.
    BlockPosition,
}

impl ProcessResult {
    pub fn is_progress(&self) -> bool {
        matches!(self, ProcessResult::Progress)
    }
}

/// General-purpose errors surfaced by the store, codec, and network layers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("address decode failed: {0}")]
    Address(#[from] crate::numbers::AddressError),
    #[error("signature error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error("vote error: {0}")]
    Vote(#[from] crate::vote::VoteError),
    #[error("block serialization failed: {0}")]
    Codec(#[from] bincode::Error),
    #[error("message too short or malformed")]
    MalformedMessage,
    #[error("unknown message type byte {0:#x}")]
    UnknownMessageType(u8),
    #[error("work does not meet the required threshold")]
    InsufficientWork,
    #[error("account not found")]
    AccountNotFound,
    #[error("block not found")]
    BlockNotFound,
    #[error("operation attempted on a stopped component")]
    Stopped,
    #[error("cannot roll back a block at or below the account's confirmation height")]
    AlreadyConfirmed,
}
