//! Network parameters and node configuration (§4.N, ambient — supplements
//! the distilled spec). Grounded on the teacher's `ConfigBuilder` fluent
//! pattern (`obscura_core::config`) and `btcb::node::nodeconfig.cpp` for the
//! concrete tunables; network selection mirrors §6's three-network model.

use crate::epoch::EpochInfo;
use crate::numbers::{Account, BlockHash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkKind {
    Test,
    Beta,
    Live,
}

impl NetworkKind {
    /// 2-byte magic from §4.K's header layout.
    pub fn magic(&self) -> [u8; 2] {
        match self {
            NetworkKind::Test => *b"RA",
            NetworkKind::Beta => *b"RB",
            NetworkKind::Live => *b"RC",
        }
    }

    pub fn is_test(&self) -> bool {
        matches!(self, NetworkKind::Test)
    }

    pub fn is_live(&self) -> bool {
        matches!(self, NetworkKind::Live)
    }

    /// Test-network deadlines run 1000x faster per §4.H's frontier sweep note.
    pub fn test_speedup_factor(&self) -> u32 {
        if self.is_test() {
            1000
        } else {
            1
        }
    }
}

/// Genesis/network-wide constants, loaded once and handed around by
/// reference (§9 "Global constants and singletons" — never a mutable
/// process-global).
#[derive(Debug, Clone)]
pub struct NetworkParams {
    pub network: NetworkKind,
    pub publish_threshold: u64,
    pub genesis_account: Account,
    pub genesis_open: BlockHash,
    pub epoch: EpochInfo,
    pub protocol_version_min: u8,
    pub protocol_version_using: u8,
    pub protocol_version_max: u8,
}

impl NetworkParams {
    pub fn test() -> Self {
        NetworkParams {
            network: NetworkKind::Test,
            publish_threshold: 0xff00000000000000,
            genesis_account: Account([1u8; 32]),
            genesis_open: BlockHash([0u8; 32]),
            epoch: EpochInfo {
                signer: Account([2u8; 32]),
                link: [0xAAu8; 32],
            },
            protocol_version_min: 18,
            protocol_version_using: 19,
            protocol_version_max: 19,
        }
    }

    pub fn live() -> Self {
        NetworkParams {
            publish_threshold: 0xffffffc000000000,
            network: NetworkKind::Live,
            ..Self::test()
        }
    }

    pub fn is_epoch_link(&self, link: &[u8; 32]) -> bool {
        self.epoch.is_epoch_link(link)
    }
}

/// Tunables that govern election timing, flushing, and thread counts.
/// Defaults mirror §4.H's constants table and §5's thread-role table;
/// callers may override via [`NodeConfig::from_builder`] or a layered
/// `config`-crate source (file → environment → explicit overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub io_threads: usize,
    pub work_threads: usize,
    pub online_weight_minimum: u128,
    pub online_weight_quorum_percent: u8,
    pub announcement_min: u32,
    pub announcement_long: u32,
    pub election_history_size: usize,
    pub confirmed_frontiers_max_pending_cut_off: usize,
    pub max_broadcast_queue: usize,
    pub confirm_req_hashes_max: usize,
    pub batch_write_size: usize,
    pub batch_read_size: u64,
    pub unchecked_cutoff_secs: u64,
    pub enable_voting: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            io_threads: 4,
            work_threads: num_cpus::get().max(1),
            online_weight_minimum: 60_000_000,
            online_weight_quorum_percent: 67,
            announcement_min: 2,
            announcement_long: 20,
            election_history_size: 2048,
            confirmed_frontiers_max_pending_cut_off: 1000,
            max_broadcast_queue: 1024,
            confirm_req_hashes_max: 7,
            batch_write_size: 2048,
            batch_read_size: 512,
            unchecked_cutoff_secs: 4 * 60 * 60,
            enable_voting: false,
        }
    }
}

impl NodeConfig {
    /// Layers environment-variable overrides (`RUST_LOG` is handled
    /// separately by the logging init path) over the compiled defaults,
    /// mirroring the `config` crate's file → env → override layering used
    /// by the chainflip-backend example. A config-file source can be added
    /// to this chain without touching callers.
    pub fn from_env() -> Self {
        let mut cfg = NodeConfig::default();
        if let Ok(v) = std::env::var("TALUS_IO_THREADS") {
            if let Ok(n) = v.parse() {
                cfg.io_threads = n;
            }
        }
        if let Ok(v) = std::env::var("TALUS_ENABLE_VOTING") {
            cfg.enable_voting = v == "1" || v.eq_ignore_ascii_case("true");
        }
        cfg
    }
}
