//! Wire message envelope (§4.K).
//!
//! Grounded on `btcb::node::common.hpp`'s `message_header`/`message_parser`:
//! an 8-byte header (2-byte network magic, three version bytes, a 1-byte
//! message type, a 16-bit extensions bitset) followed by a type-specific
//! body. The transport itself (sockets, the tokio runtime) belongs to the
//! network collaborator per §1; this module owns framing, validation, and
//! the in-memory `Message` representation the rest of the node consumes.

use crate::blocks::{Block, BlockType};
use crate::numbers::{Account, Amount, BlockHash};
use crate::vote::Vote;
use crate::work::work_validate;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// Header is exactly 8 bytes on the wire; the largest UDP datagram this
/// node will construct or accept without fragmentation risk.
pub const MAX_SAFE_UDP_MESSAGE_SIZE: usize = 508;

const BLOCK_TYPE_MASK: u16 = 0x0f00;
const BLOCK_TYPE_SHIFT: u32 = 8;
const COUNT_MASK: u16 = 0xf000;
const COUNT_SHIFT: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Invalid = 0x0,
    NotAType = 0x1,
    Keepalive = 0x2,
    Publish = 0x3,
    ConfirmReq = 0x4,
    ConfirmAck = 0x5,
    BulkPull = 0x6,
    BulkPush = 0x7,
    FrontierReq = 0x8,
    NodeIdHandshake = 0x0a,
    BulkPullAccount = 0x0b,
}

impl MessageType {
    fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x0 => MessageType::Invalid,
            0x1 => MessageType::NotAType,
            0x2 => MessageType::Keepalive,
            0x3 => MessageType::Publish,
            0x4 => MessageType::ConfirmReq,
            0x5 => MessageType::ConfirmAck,
            0x6 => MessageType::BulkPull,
            0x7 => MessageType::BulkPush,
            0x8 => MessageType::FrontierReq,
            0x0a => MessageType::NodeIdHandshake,
            0x0b => MessageType::BulkPullAccount,
            _ => return None,
        })
    }
}

/// The 8-byte envelope preceding every message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version_max: u8,
    pub version_using: u8,
    pub version_min: u8,
    pub message_type: MessageType,
    pub extensions: u16,
}

impl MessageHeader {
    pub fn new(message_type: MessageType, version_using: u8, version_min: u8, version_max: u8) -> Self {
        MessageHeader {
            version_max,
            version_using,
            version_min,
            message_type,
            extensions: 0,
        }
    }

    pub fn block_type(&self) -> Option<BlockType> {
        let raw = ((self.extensions & BLOCK_TYPE_MASK) >> BLOCK_TYPE_SHIFT) as u8;
        match raw {
            0 => Some(BlockType::Invalid),
            1 => Some(BlockType::NotABlock),
            2 => Some(BlockType::Send),
            3 => Some(BlockType::Receive),
            4 => Some(BlockType::Open),
            5 => Some(BlockType::Change),
            6 => Some(BlockType::State),
            _ => None,
        }
    }

    pub fn set_block_type(&mut self, block_type: BlockType) {
        self.extensions = (self.extensions & !BLOCK_TYPE_MASK) | ((block_type as u16) << BLOCK_TYPE_SHIFT);
    }

    pub fn count(&self) -> u8 {
        ((self.extensions & COUNT_MASK) >> COUNT_SHIFT) as u8
    }

    pub fn set_count(&mut self, count: u8) {
        self.extensions = (self.extensions & !COUNT_MASK) | ((count as u16 & 0xf) << COUNT_SHIFT);
    }

    pub fn to_bytes(&self, magic: [u8; 2]) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0] = magic[0];
        out[1] = magic[1];
        out[2] = self.version_max;
        out[3] = self.version_using;
        out[4] = self.version_min;
        out[5] = self.message_type as u8;
        out[6..8].copy_from_slice(&self.extensions.to_le_bytes());
        out
    }

    pub fn from_bytes(magic: [u8; 2], bytes: &[u8; 8]) -> Result<Self, ParseStatus> {
        if bytes[0] != magic[0] || bytes[1] != magic[1] {
            return Err(ParseStatus::InvalidMagic);
        }
        let message_type = MessageType::from_byte(bytes[5]).ok_or(ParseStatus::InvalidMessageType)?;
        Ok(MessageHeader {
            version_max: bytes[2],
            version_using: bytes[3],
            version_min: bytes[4],
            message_type,
            extensions: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Keepalive {
    pub peers: [Option<SocketAddr>; 8],
}

#[derive(Debug, Clone)]
pub struct Publish {
    pub block: Arc<Block>,
}

#[derive(Debug, Clone)]
pub struct ConfirmReq {
    pub block: Option<Arc<Block>>,
    pub roots_hashes: Vec<(BlockHash, BlockHash)>,
}

#[derive(Debug, Clone)]
pub struct ConfirmAck {
    pub vote: Arc<Vote>,
}

#[derive(Debug, Clone)]
pub struct FrontierReq {
    pub start: Account,
    pub age: u32,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct BulkPull {
    pub start: Account,
    pub end: BlockHash,
    pub count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct BulkPush;

#[derive(Debug, Clone)]
pub struct BulkPullAccount {
    pub account: Account,
    pub minimum_amount: Amount,
    pub flags: u8,
}

#[derive(Debug, Clone)]
pub struct NodeIdHandshake {
    pub query: Option<[u8; 32]>,
    pub response: Option<(Account, crate::crypto::Signature)>,
}

#[derive(Debug, Clone)]
pub enum Message {
    Keepalive(Keepalive),
    Publish(Publish),
    ConfirmReq(ConfirmReq),
    ConfirmAck(ConfirmAck),
    BulkPull(BulkPull),
    BulkPush(BulkPush),
    FrontierReq(FrontierReq),
    NodeIdHandshake(NodeIdHandshake),
    BulkPullAccount(BulkPullAccount),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Keepalive(_) => MessageType::Keepalive,
            Message::Publish(_) => MessageType::Publish,
            Message::ConfirmReq(_) => MessageType::ConfirmReq,
            Message::ConfirmAck(_) => MessageType::ConfirmAck,
            Message::BulkPull(_) => MessageType::BulkPull,
            Message::BulkPush(_) => MessageType::BulkPush,
            Message::FrontierReq(_) => MessageType::FrontierReq,
            Message::NodeIdHandshake(_) => MessageType::NodeIdHandshake,
            Message::BulkPullAccount(_) => MessageType::BulkPullAccount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Success,
    InsufficientWork,
    InvalidHeader,
    InvalidMessageType,
    InvalidKeepaliveMessage,
    InvalidPublishMessage,
    InvalidConfirmReqMessage,
    InvalidConfirmAckMessage,
    InvalidNodeIdHandshakeMessage,
    OutdatedVersion,
    InvalidMagic,
    InvalidNetwork,
    MessageSizeTooBig,
}

/// Validates a publish/confirm_req/confirm_ack payload's attached PoW
/// against `threshold` before it is admitted to the block/vote processor
/// (§4.K "insufficient_work" rejection, §4.C's threshold check reused here
/// rather than duplicated).
pub fn check_work(block: &Block, threshold: u64) -> Result<(), ParseStatus> {
    if work_validate(&block.root(), block.work(), threshold) {
        Ok(())
    } else {
        Err(ParseStatus::InsufficientWork)
    }
}

/// Rejects a header whose `version_using` predates what this node still
/// interoperates with, mirroring the C++ parser's `outdated_version` path.
pub fn check_version(header: &MessageHeader, version_min: u8) -> Result<(), ParseStatus> {
    if header.version_using < version_min {
        Err(ParseStatus::OutdatedVersion)
    } else {
        Ok(())
    }
}

/// Parses a framed datagram: an 8-byte header plus a bincode-encoded body,
/// rejecting anything over [`MAX_SAFE_UDP_MESSAGE_SIZE`] or whose attached
/// work fails `threshold` for message types that carry a block or vote.
pub fn parse_datagram(
    magic: [u8; 2],
    version_min: u8,
    threshold: u64,
    bytes: &[u8],
) -> Result<(MessageHeader, Message), ParseStatus> {
    if bytes.len() > MAX_SAFE_UDP_MESSAGE_SIZE {
        return Err(ParseStatus::MessageSizeTooBig);
    }
    if bytes.len() < 8 {
        return Err(ParseStatus::InvalidHeader);
    }
    let mut header_bytes = [0u8; 8];
    header_bytes.copy_from_slice(&bytes[0..8]);
    let header = MessageHeader::from_bytes(magic, &header_bytes)?;
    check_version(&header, version_min)?;
    let body = &bytes[8..];

    let message = match header.message_type {
        MessageType::Keepalive => {
            let peers: Vec<Option<SocketAddr>> =
                bincode::deserialize(body).map_err(|_| ParseStatus::InvalidKeepaliveMessage)?;
            if peers.len() != 8 {
                return Err(ParseStatus::InvalidKeepaliveMessage);
            }
            let mut arr: [Option<SocketAddr>; 8] = Default::default();
            arr.copy_from_slice(&peers);
            Message::Keepalive(Keepalive { peers: arr })
        }
        MessageType::Publish => {
            let block: Block = bincode::deserialize(body).map_err(|_| ParseStatus::InvalidPublishMessage)?;
            check_work(&block, threshold)?;
            Message::Publish(Publish { block: Arc::new(block) })
        }
        MessageType::ConfirmReq => {
            let (block, roots_hashes): (Option<Block>, Vec<(BlockHash, BlockHash)>) =
                bincode::deserialize(body).map_err(|_| ParseStatus::InvalidConfirmReqMessage)?;
            if let Some(b) = &block {
                check_work(b, threshold)?;
            }
            Message::ConfirmReq(ConfirmReq {
                block: block.map(Arc::new),
                roots_hashes,
            })
        }
        MessageType::ConfirmAck => {
            let vote: Vote = bincode::deserialize(body).map_err(|_| ParseStatus::InvalidConfirmAckMessage)?;
            vote.validate().map_err(|_| ParseStatus::InvalidConfirmAckMessage)?;
            Message::ConfirmAck(ConfirmAck { vote: Arc::new(vote) })
        }
        MessageType::FrontierReq => {
            let (start, age, count) =
                bincode::deserialize(body).map_err(|_| ParseStatus::InvalidHeader)?;
            Message::FrontierReq(FrontierReq { start, age, count })
        }
        MessageType::BulkPull => {
            let (start, end, count) = bincode::deserialize(body).map_err(|_| ParseStatus::InvalidHeader)?;
            Message::BulkPull(BulkPull { start, end, count })
        }
        MessageType::BulkPush => Message::BulkPush(BulkPush),
        MessageType::BulkPullAccount => {
            let (account, minimum_amount, flags) =
                bincode::deserialize(body).map_err(|_| ParseStatus::InvalidHeader)?;
            Message::BulkPullAccount(BulkPullAccount { account, minimum_amount, flags })
        }
        MessageType::NodeIdHandshake => {
            let (query, response): (Option<[u8; 32]>, Option<(Account, crate::crypto::Signature)>) =
                bincode::deserialize(body).map_err(|_| ParseStatus::InvalidNodeIdHandshakeMessage)?;
            Message::NodeIdHandshake(NodeIdHandshake { query, response })
        }
        MessageType::Invalid | MessageType::NotAType => return Err(ParseStatus::InvalidMessageType),
    };

    Ok((header, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::ChangeHashables;
    use crate::crypto::Signature;
    use crate::numbers::Account;

    fn sample_block() -> Block {
        Block::Change {
            hashables: ChangeHashables {
                previous: BlockHash([7u8; 32]),
                representative: Account([8u8; 32]),
            },
            signature: Signature::ZERO,
            work: 0,
        }
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let mut header = MessageHeader::new(MessageType::Publish, 19, 18, 19);
        header.set_block_type(BlockType::State);
        header.set_count(3);
        let bytes = header.to_bytes(*b"RA");
        let parsed = MessageHeader::from_bytes(*b"RA", &bytes).unwrap();
        assert_eq!(parsed.message_type, MessageType::Publish);
        assert_eq!(parsed.block_type(), Some(BlockType::State));
        assert_eq!(parsed.count(), 3);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let header = MessageHeader::new(MessageType::Keepalive, 19, 18, 19);
        let bytes = header.to_bytes(*b"RA");
        assert_eq!(MessageHeader::from_bytes(*b"RC", &bytes), Err(ParseStatus::InvalidMagic));
    }

    #[test]
    fn outdated_version_is_rejected() {
        let header = MessageHeader::new(MessageType::Keepalive, 10, 10, 10);
        assert_eq!(check_version(&header, 18), Err(ParseStatus::OutdatedVersion));
    }

    #[test]
    fn oversized_datagram_is_rejected() {
        let oversized = vec![0u8; MAX_SAFE_UDP_MESSAGE_SIZE + 1];
        assert_eq!(
            parse_datagram(*b"RA", 18, 0, &oversized),
            Err(ParseStatus::MessageSizeTooBig)
        );
    }

    #[test]
    fn publish_with_insufficient_work_is_rejected() {
        let block = sample_block();
        assert_eq!(check_work(&block, u64::MAX), Err(ParseStatus::InsufficientWork));
        assert!(check_work(&block, 0).is_ok());
    }
}
