use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash as StdHash;

pub mod chain_params;
pub mod masternode;
pub mod wire;

pub use chain_params::{ChainParams, Network};
pub use masternode::{
    MasternodeBroadcast, MasternodeID, MasternodeMessage, MasternodePing, MasternodeRecord,
    MasternodeStatus, MasternodeVerification, SyncScope,
};

pub type PublicKey = [u8; 32];
pub type Hash = [u8; 32];

/// Represents a reference to a specific transaction output.
///
/// Ordering is lexicographic on `(txid, vout)` so every node sorts
/// collateral references the same way.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, StdHash, Serialize, Deserialize)]
pub struct OutPoint {
    /// The transaction ID (hash) of the transaction containing the output.
    pub txid: [u8; 32],
    /// The index of the output within that transaction.
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: [u8; 32], vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// Fixed 36-byte encoding (`txid || vout_le`), independent of any serializer settings.
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut bytes = [0u8; 36];
        bytes[..32].copy_from_slice(&self.txid);
        bytes[32..].copy_from_slice(&self.vout.to_le_bytes());
        bytes
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", hex::encode(self.txid), self.vout)
    }
}

/// Hashes arbitrary bytes into the 32-byte hash type used across the workspace.
pub fn hash_bytes(data: &[u8]) -> Hash {
    blake3::hash(data).into()
}
