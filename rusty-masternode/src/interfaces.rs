//! Narrow views of the collaborators the masternode layer depends on.

use std::net::SocketAddr;

use rusty_shared_types::{Hash, MasternodeMessage, OutPoint};

/// Read-only view of the block chain and UTXO set.
pub trait ChainView: Send + Sync {
    /// Height and hash of the current best block.
    fn best_block(&self) -> (u64, Hash);
    /// Confirmations of an unspent output; 0 when unknown or unconfirmed.
    fn confirmations(&self, outpoint: &OutPoint) -> u32;
    fn is_spent(&self, outpoint: &OutPoint) -> bool;
    fn block_hash_at(&self, height: u64) -> Option<Hash>;
}

/// Outbound side of the peer-to-peer layer.
///
/// Implementations must not call back into the masternode manager.
pub trait PeerTransport: Send + Sync {
    fn send(&self, peer: &SocketAddr, message: MasternodeMessage);
    /// Announce to every connected peer.
    fn relay(&self, message: MasternodeMessage);
    /// Raise a peer's misbehavior score.
    fn misbehaving(&self, peer: &SocketAddr, score: u32);
    /// Whether we hold (or can open) a direct connection to `addr`.
    fn is_reachable(&self, addr: &SocketAddr) -> bool;
}

/// The peer an inbound message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    /// Protocol version negotiated with this peer.
    pub protocol_version: u32,
}

impl PeerInfo {
    pub fn new(addr: SocketAddr, protocol_version: u32) -> Self {
        Self { addr, protocol_version }
    }
}
