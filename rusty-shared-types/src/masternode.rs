use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use crate::{hash_bytes, Hash, OutPoint, PublicKey};

/// Represents the unique identifier for a Masternode, derived from its collateral UTXO.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MasternodeID(pub OutPoint);

impl MasternodeID {
    /// Get the bytes representation of the MasternodeID
    pub fn as_bytes(&self) -> [u8; 36] {
        self.0.to_bytes()
    }
}

impl From<OutPoint> for MasternodeID {
    fn from(outpoint: OutPoint) -> Self {
        MasternodeID(outpoint)
    }
}

impl fmt::Display for MasternodeID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds the payout script for a collateral key: `OP_DUP OP_HASH <32> hash OP_EQUALVERIFY OP_CHECKSIG`.
pub fn payee_script(collateral_pubkey: &PublicKey) -> Vec<u8> {
    let mut script = Vec::with_capacity(37);
    script.extend_from_slice(&[0x76, 0xa9, 0x20]);
    script.extend_from_slice(&hash_bytes(collateral_pubkey));
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MasternodeStatus {
    /// Seen but not yet confirmed live.
    PreEnabled,
    Enabled,
    /// No recent ping.
    Expired,
    /// Collateral spent. Never leaves this state.
    OutpointSpent,
    /// Announced protocol is below the accepted minimum.
    UpdateRequired,
    /// Silent for too long; the operator must re-announce.
    NewStartRequired,
    /// Failed proof-of-service verification too often.
    PoseBanned,
    WatchdogExpired,
}

impl MasternodeStatus {
    /// Statuses after which the record is only kept around for the retention grace period.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MasternodeStatus::OutpointSpent
                | MasternodeStatus::PoseBanned
                | MasternodeStatus::NewStartRequired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MasternodeStatus::PreEnabled => "PRE_ENABLED",
            MasternodeStatus::Enabled => "ENABLED",
            MasternodeStatus::Expired => "EXPIRED",
            MasternodeStatus::OutpointSpent => "OUTPOINT_SPENT",
            MasternodeStatus::UpdateRequired => "UPDATE_REQUIRED",
            MasternodeStatus::NewStartRequired => "NEW_START_REQUIRED",
            MasternodeStatus::PoseBanned => "POSE_BAN",
            MasternodeStatus::WatchdogExpired => "WATCHDOG_EXPIRED",
        }
    }
}

impl fmt::Display for MasternodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed liveness heartbeat, signed by the masternode's service key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodePing {
    pub collateral: MasternodeID,
    /// Recent chain tip as seen by the masternode when it pinged.
    pub block_hash: Hash,
    pub sig_time: u64,
    pub signature: Vec<u8>,
}

impl MasternodePing {
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(3 + 36 + 32 + 8);
        data.extend_from_slice(b"MNP");
        data.extend_from_slice(&self.collateral.as_bytes());
        data.extend_from_slice(&self.block_hash);
        data.extend_from_slice(&self.sig_time.to_le_bytes());
        data
    }

    /// Content hash used for deduplication.
    pub fn hash(&self) -> Hash {
        let mut data = self.signing_bytes();
        data.extend_from_slice(&self.signature);
        hash_bytes(&data)
    }
}

/// Signed announcement binding a collateral output to a service address and key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeBroadcast {
    pub collateral: MasternodeID,
    pub service_addr: SocketAddr,
    pub collateral_pubkey: PublicKey,
    pub service_pubkey: PublicKey,
    pub protocol_version: u32,
    pub sig_time: u64,
    /// Signature by the collateral key over [`MasternodeBroadcast::signing_bytes`].
    pub signature: Vec<u8>,
    /// Most recent ping, carried along so a fresh announcement is immediately live.
    pub last_ping: Option<MasternodePing>,
}

impl MasternodeBroadcast {
    pub fn signing_bytes(&self) -> Vec<u8> {
        let addr = self.service_addr.to_string();
        let mut data = Vec::with_capacity(3 + 36 + addr.len() + 8 + 64 + 4);
        data.extend_from_slice(b"MNB");
        data.extend_from_slice(&self.collateral.as_bytes());
        data.extend_from_slice(addr.as_bytes());
        data.extend_from_slice(&self.sig_time.to_le_bytes());
        data.extend_from_slice(&self.collateral_pubkey);
        data.extend_from_slice(&self.service_pubkey);
        data.extend_from_slice(&self.protocol_version.to_le_bytes());
        data
    }

    /// Content hash used for deduplication. The embedded ping is not part of it.
    pub fn hash(&self) -> Hash {
        let mut data = self.signing_bytes();
        data.extend_from_slice(&self.signature);
        hash_bytes(&data)
    }
}

/// Challenge/response proof that a service address is controlled by a masternode's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeVerification {
    /// Address being verified.
    pub addr: SocketAddr,
    pub nonce: u64,
    /// Height whose block hash both signatures commit to.
    pub block_height: u64,
    /// Masternode that answered the challenge.
    pub responder: Option<MasternodeID>,
    /// Masternode that issued the challenge, if it was one.
    pub requester: Option<MasternodeID>,
    pub responder_sig: Vec<u8>,
    pub requester_sig: Vec<u8>,
}

impl MasternodeVerification {
    pub fn new_request(addr: SocketAddr, nonce: u64, block_height: u64) -> Self {
        MasternodeVerification {
            addr,
            nonce,
            block_height,
            responder: None,
            requester: None,
            responder_sig: Vec::new(),
            requester_sig: Vec::new(),
        }
    }

    /// Bytes the responder signs with its service key.
    pub fn reply_signing_bytes(&self, block_hash: &Hash) -> Vec<u8> {
        let addr = self.addr.to_string();
        let mut data = Vec::with_capacity(4 + addr.len() + 8 + 32);
        data.extend_from_slice(b"MNV1");
        data.extend_from_slice(addr.as_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data.extend_from_slice(block_hash);
        data
    }

    /// Bytes the requester co-signs before relaying a completed verification.
    pub fn broadcast_signing_bytes(&self, block_hash: &Hash) -> Vec<u8> {
        let mut data = self.reply_signing_bytes(block_hash);
        data[3] = b'2';
        if let Some(responder) = &self.responder {
            data.extend_from_slice(&responder.as_bytes());
        }
        if let Some(requester) = &self.requester {
            data.extend_from_slice(&requester.as_bytes());
        }
        data
    }

    pub fn hash(&self) -> Hash {
        let addr = self.addr.to_string();
        let mut data = Vec::new();
        data.extend_from_slice(b"MNV");
        data.extend_from_slice(addr.as_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data.extend_from_slice(&self.block_height.to_le_bytes());
        for id in [&self.responder, &self.requester] {
            match id {
                Some(id) => data.extend_from_slice(&id.as_bytes()),
                None => data.push(0),
            }
        }
        hash_bytes(&data)
    }
}

/// A masternode as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeRecord {
    pub collateral: MasternodeID,
    pub service_addr: SocketAddr,
    pub collateral_pubkey: PublicKey,
    pub service_pubkey: PublicKey,
    pub protocol_version: u32,
    pub sig_time: u64,
    pub signature: Vec<u8>,
    pub last_ping: Option<MasternodePing>,
    pub last_paid_height: u64,
    pub last_paid_time: u64,
    /// Proof-of-service penalty counter.
    pub pose_ban_score: u32,
    /// Height at which the current penalty window opened.
    pub pose_window_start: u64,
    /// Height of the last successful address verification, 0 if never verified.
    pub last_verified_height: u64,
    pub status: MasternodeStatus,
    /// Unix time of the last status change.
    pub status_since: u64,
    pub last_watchdog_vote: u64,
    /// Governance object hash -> number of votes this masternode cast on it.
    pub governance_votes: BTreeMap<Hash, u32>,
}

impl MasternodeRecord {
    pub fn from_broadcast(mnb: &MasternodeBroadcast, now: u64) -> Self {
        MasternodeRecord {
            collateral: mnb.collateral.clone(),
            service_addr: mnb.service_addr,
            collateral_pubkey: mnb.collateral_pubkey,
            service_pubkey: mnb.service_pubkey,
            protocol_version: mnb.protocol_version,
            sig_time: mnb.sig_time,
            signature: mnb.signature.clone(),
            last_ping: None,
            last_paid_height: 0,
            last_paid_time: 0,
            pose_ban_score: 0,
            pose_window_start: 0,
            last_verified_height: 0,
            status: MasternodeStatus::PreEnabled,
            status_since: now,
            last_watchdog_vote: mnb.sig_time,
            governance_votes: BTreeMap::new(),
        }
    }

    /// Applies a newer announcement, keeping payment and proof-of-service bookkeeping.
    pub fn apply_broadcast(&mut self, mnb: &MasternodeBroadcast) {
        self.service_addr = mnb.service_addr;
        self.collateral_pubkey = mnb.collateral_pubkey;
        self.service_pubkey = mnb.service_pubkey;
        self.protocol_version = mnb.protocol_version;
        self.sig_time = mnb.sig_time;
        self.signature = mnb.signature.clone();
        self.last_watchdog_vote = self.last_watchdog_vote.max(mnb.sig_time);
    }

    /// Rebuilds the announcement this record was created from.
    pub fn to_broadcast(&self) -> MasternodeBroadcast {
        MasternodeBroadcast {
            collateral: self.collateral.clone(),
            service_addr: self.service_addr,
            collateral_pubkey: self.collateral_pubkey,
            service_pubkey: self.service_pubkey,
            protocol_version: self.protocol_version,
            sig_time: self.sig_time,
            signature: self.signature.clone(),
            last_ping: self.last_ping.clone(),
        }
    }

    pub fn last_ping_time(&self) -> Option<u64> {
        self.last_ping.as_ref().map(|ping| ping.sig_time)
    }

    pub fn is_pinged_within(&self, seconds: u64, now: u64) -> bool {
        match self.last_ping_time() {
            Some(time) => now.saturating_sub(time) < seconds,
            None => false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status == MasternodeStatus::Enabled
    }

    pub fn payee_script(&self) -> Vec<u8> {
        payee_script(&self.collateral_pubkey)
    }

    pub fn set_status(&mut self, status: MasternodeStatus, now: u64) {
        if self.status != status {
            self.status = status;
            self.status_since = now;
        }
    }
}

/// Scope of a registry synchronization request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncScope {
    FullList,
    Entry(MasternodeID),
}

/// Wire messages exchanged by the masternode layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasternodeMessage {
    Broadcast(MasternodeBroadcast),
    Ping(MasternodePing),
    VerifyRequest(MasternodeVerification),
    VerifyReply(MasternodeVerification),
    VerifyBroadcast(MasternodeVerification),
    SyncRequest(SyncScope),
    /// Sent after a sync response: number of entries streamed.
    SyncStatusCount { count: u32 },
}

impl MasternodeMessage {
    pub fn command(&self) -> &'static str {
        match self {
            MasternodeMessage::Broadcast(_) => "mnb",
            MasternodeMessage::Ping(_) => "mnp",
            MasternodeMessage::VerifyRequest(_) => "mnv-req",
            MasternodeMessage::VerifyReply(_) => "mnv-rep",
            MasternodeMessage::VerifyBroadcast(_) => "mnv",
            MasternodeMessage::SyncRequest(_) => "dseg",
            MasternodeMessage::SyncStatusCount { .. } => "ssc",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_broadcast() -> MasternodeBroadcast {
        MasternodeBroadcast {
            collateral: MasternodeID(OutPoint::new([1; 32], 0)),
            service_addr: "10.0.0.1:16518".parse().unwrap(),
            collateral_pubkey: [2; 32],
            service_pubkey: [3; 32],
            protocol_version: 70206,
            sig_time: 1_000,
            signature: vec![4; 64],
            last_ping: None,
        }
    }

    #[test]
    fn test_broadcast_hash_ignores_embedded_ping() {
        let mnb = sample_broadcast();
        let mut with_ping = mnb.clone();
        with_ping.last_ping = Some(MasternodePing {
            collateral: mnb.collateral.clone(),
            block_hash: [9; 32],
            sig_time: 1_100,
            signature: vec![5; 64],
        });
        assert_eq!(mnb.hash(), with_ping.hash());

        let mut newer = mnb.clone();
        newer.sig_time += 1;
        assert_ne!(mnb.hash(), newer.hash());
    }

    #[test]
    fn test_record_keeps_bookkeeping_on_update() {
        let mnb = sample_broadcast();
        let mut record = MasternodeRecord::from_broadcast(&mnb, 1_000);
        record.last_paid_height = 42;
        record.pose_ban_score = 2;

        let mut newer = mnb.clone();
        newer.sig_time = 2_000;
        newer.service_pubkey = [7; 32];
        record.apply_broadcast(&newer);

        assert_eq!(record.sig_time, 2_000);
        assert_eq!(record.service_pubkey, [7; 32]);
        assert_eq!(record.last_paid_height, 42);
        assert_eq!(record.pose_ban_score, 2);
        assert_eq!(record.to_broadcast().hash(), newer.hash());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(MasternodeStatus::OutpointSpent.is_terminal());
        assert!(MasternodeStatus::PoseBanned.is_terminal());
        assert!(!MasternodeStatus::Expired.is_terminal());
        assert_eq!(MasternodeStatus::PoseBanned.to_string(), "POSE_BAN");
    }

    #[test]
    fn test_verification_signing_bytes_differ_by_role() {
        let mut mnv = MasternodeVerification::new_request("10.0.0.1:16518".parse().unwrap(), 7, 99);
        let reply = mnv.reply_signing_bytes(&[1; 32]);
        mnv.responder = Some(MasternodeID(OutPoint::new([1; 32], 0)));
        let broadcast = mnv.broadcast_signing_bytes(&[1; 32]);
        assert_ne!(reply, broadcast);
        assert!(broadcast.starts_with(b"MNV2"));
    }
}
