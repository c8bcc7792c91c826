//! UDP transport for the message envelope defined in `talus_core::message`
//! (§4.K). Framing, validation, and the in-memory `Message` type all live
//! in the core crate; this crate owns the socket and the `tokio` runtime
//! that drives it, matching §5's "I/O workers run on a shared `tokio`
//! runtime" thread-role assignment.
//!
//! The original's peer exchange, bootstrap bulk-pull/bulk-push pipeline,
//! and NAT traversal are out of scope here — this is the minimal socket
//! plumbing the block/vote/confirmation-height processors need to receive
//! and publish messages at all.

use std::net::SocketAddr;
use talus_core::message::{parse_datagram, Message, MessageHeader, ParseStatus, MAX_SAFE_UDP_MESSAGE_SIZE};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("message serialization failed")]
    Encode(#[from] bincode::Error),
}

/// A bound UDP socket speaking the node's wire protocol. Cheap to clone
/// (an `Arc`-backed `tokio::net::UdpSocket` internally), so the same
/// handle can be shared between the receive loop and any number of
/// senders (publish broadcasts, confirm_req fan-out, vote relay).
pub struct Transport {
    socket: UdpSocket,
    magic: [u8; 2],
    version_min: u8,
    threshold: u64,
}

impl Transport {
    pub async fn bind(addr: SocketAddr, magic: [u8; 2], version_min: u8, threshold: u64) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Transport {
            socket,
            magic,
            version_min,
            threshold,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Encodes `header`/`body` into a single datagram and sends it.
    /// Returns a framing error rather than sending if the encoded size
    /// would exceed [`MAX_SAFE_UDP_MESSAGE_SIZE`].
    pub async fn send_raw(&self, to: SocketAddr, header: &MessageHeader, body: &[u8]) -> Result<(), TransportError> {
        let mut datagram = header.to_bytes(self.magic).to_vec();
        datagram.extend_from_slice(body);
        if datagram.len() > MAX_SAFE_UDP_MESSAGE_SIZE {
            warn!(len = datagram.len(), "dropping oversized outbound datagram");
            return Ok(());
        }
        self.socket.send_to(&datagram, to).await?;
        Ok(())
    }

    /// Blocks until one datagram arrives, parses it, and returns the
    /// sender along with the parsed message — or the [`ParseStatus`] that
    /// explains why it was rejected.
    pub async fn recv(&self) -> Result<(SocketAddr, Result<(MessageHeader, Message), ParseStatus>), TransportError> {
        let mut buf = [0u8; MAX_SAFE_UDP_MESSAGE_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        let parsed = parse_datagram(self.magic, self.version_min, self.threshold, &buf[..len]);
        if let Err(status) = &parsed {
            debug!(?from, ?status, "rejected inbound datagram");
        }
        Ok((from, parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_round_trip_recovers_keepalive() {
        let a = Transport::bind("127.0.0.1:0".parse().unwrap(), *b"RA", 18, 0).await.unwrap();
        let b = Transport::bind("127.0.0.1:0".parse().unwrap(), *b"RA", 18, 0).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        let header = MessageHeader::new(talus_core::message::MessageType::Keepalive, 19, 18, 19);
        let peers: Vec<Option<SocketAddr>> = vec![None; 8];
        let body = bincode::serialize(&peers).unwrap();
        a.send_raw(b_addr, &header, &body).await.unwrap();

        let (_from, result) = b.recv().await.unwrap();
        let (parsed_header, message) = result.unwrap();
        assert_eq!(parsed_header.message_type, talus_core::message::MessageType::Keepalive);
        assert!(matches!(message, Message::Keepalive(_)));
    }
}
