//! Core consensus and ledger types for a delegated-proof-of-stake,
//! block-lattice node: per-account chains (`blocks`, `ledger`), proof-of-work
//! (`work`), elections over competing blocks (`active_transactions`),
//! iterative confirmation-height bookkeeping (`confirmation_height`), the
//! vote pipeline (`vote`, `vote_processor`), the wire envelope (`message`),
//! and the ambient stack (`config`, `error`, `stats`) every other module
//! leans on.

pub mod active_transactions;
pub mod block_processor;
pub mod blocks;
pub mod config;
pub mod confirmation_height;
pub mod crypto;
pub mod epoch;
pub mod error;
pub mod ledger;
pub mod message;
pub mod numbers;
pub mod rep_crawler;
pub mod stats;
pub mod store;
pub mod vote;
pub mod vote_processor;
pub mod work;

pub use blocks::{Block, BlockType};
pub use config::{NetworkKind, NetworkParams, NodeConfig};
pub use error::ProcessResult;
pub use ledger::Ledger;
pub use numbers::{Account, Amount, BlockHash};
pub use store::Store;
pub use vote::Vote;

/// Seconds since the Unix epoch, used for side-band modification times and
/// online-weight samples. Centralized so tests can reason about a single
/// clock source rather than each module calling `SystemTime::now()`.
pub fn now_ts() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
