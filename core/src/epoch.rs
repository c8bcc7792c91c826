//! Epoch markers (§3 "Epoch marker", §4.E "Epoch transition").

use crate::numbers::{Account, Hash};
use serde::{Deserialize, Serialize};

/// An account's ledger epoch. Only two are defined by this specification;
/// additional epochs would extend this enum rather than generalize it, since
/// each epoch transition is a distinct, explicitly signed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Epoch {
    Epoch0,
    Epoch1,
}

impl Default for Epoch {
    fn default() -> Self {
        Epoch::Epoch0
    }
}

/// Fixed epoch-marker link value and the account authorized to sign the
/// upgrade, analogous to the network-compiled epoch signer/link pair in
/// `btcb::node::nodeconfig.cpp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochInfo {
    pub signer: Account,
    pub link: Hash,
}

impl EpochInfo {
    pub fn is_epoch_link(&self, link: &Hash) -> bool {
        *link == self.link
    }
}
