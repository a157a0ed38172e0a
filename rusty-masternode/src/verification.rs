//! Proof-of-service address verification.
//!
//! A requester challenges an address with a nonce; the masternode behind it
//! signs the nonce together with a recent block hash using its service key.
//! Outstanding challenges live in a pending table with deadlines, so nothing
//! ever blocks waiting for a reply.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use rusty_shared_types::{Hash, MasternodeRecord, MasternodeStatus, MasternodeVerification};

use crate::config::MasternodeConfig;
use crate::error::MasternodeError;
use crate::throttle::RequestThrottle;

/// A challenge we sent and are waiting on.
#[derive(Debug, Clone)]
pub struct PendingVerification {
    pub request: MasternodeVerification,
    /// Unix time after which the challenge counts as failed
    pub deadline: u64,
}

/// Tracks outstanding challenges, reply throttling and seen verification broadcasts.
pub struct VerificationManager {
    timeout_secs: u64,
    pending: Mutex<HashMap<SocketAddr, PendingVerification>>,
    replied: Mutex<RequestThrottle<SocketAddr>>,
    seen: Mutex<HashMap<Hash, u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VerificationManager {
    pub fn new(config: &MasternodeConfig) -> Self {
        Self {
            timeout_secs: config.verification_timeout_secs,
            pending: Mutex::new(HashMap::new()),
            replied: Mutex::new(RequestThrottle::new(config.verify_reply_interval_secs)),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a challenge for `addr` at `block_height`.
    ///
    /// Returns `None` if a challenge for that address is still outstanding.
    /// A challenge past its deadline stays outstanding until [`expire`](Self::expire)
    /// has reported it.
    pub fn begin(&self, addr: SocketAddr, block_height: u64, now: u64) -> Option<MasternodeVerification> {
        let mut pending = lock(&self.pending);
        if pending.contains_key(&addr) {
            return None;
        }
        let request = MasternodeVerification::new_request(addr, rand::random(), block_height);
        pending.insert(addr, PendingVerification { request: request.clone(), deadline: now + self.timeout_secs });
        Some(request)
    }

    /// Claims the pending challenge a reply answers.
    ///
    /// A late reply leaves the challenge in place so the next expiry pass
    /// counts it as a failure.
    pub fn take_reply(&self, reply: &MasternodeVerification, now: u64) -> Result<MasternodeVerification, MasternodeError> {
        let mut pending = lock(&self.pending);
        let entry = pending
            .get(&reply.addr)
            .ok_or_else(|| MasternodeError::VerificationFailed(format!("unsolicited reply from {}", reply.addr)))?;
        if entry.request.nonce != reply.nonce || entry.request.block_height != reply.block_height {
            return Err(MasternodeError::VerificationFailed(format!("reply from {} does not match our request", reply.addr)));
        }
        if now > entry.deadline {
            return Err(MasternodeError::VerificationTimeout(reply.addr));
        }
        pending
            .remove(&reply.addr)
            .map(|entry| entry.request)
            .ok_or_else(|| MasternodeError::VerificationFailed(format!("unsolicited reply from {}", reply.addr)))
    }

    /// Removes challenges past their deadline and returns their addresses.
    pub fn expire(&self, now: u64) -> Vec<SocketAddr> {
        let mut pending = lock(&self.pending);
        let expired: Vec<SocketAddr> = pending
            .iter()
            .filter(|(_, entry)| now > entry.deadline)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &expired {
            pending.remove(addr);
        }
        expired
    }

    pub fn is_pending(&self, addr: &SocketAddr) -> bool {
        lock(&self.pending).contains_key(addr)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Whether we may answer another challenge from `peer` now.
    pub fn allow_reply(&self, peer: SocketAddr, now: u64) -> bool {
        lock(&self.replied).check_and_record(peer, now)
    }

    /// Records a verification broadcast; `false` if it was already seen.
    pub fn mark_seen(&self, hash: Hash, now: u64) -> bool {
        let mut seen = lock(&self.seen);
        if seen.contains_key(&hash) {
            return false;
        }
        seen.insert(hash, now);
        true
    }

    pub fn prune(&self, now: u64, seen_expiry_secs: u64) {
        lock(&self.replied).prune(now);
        lock(&self.seen).retain(|_, seen_at| now < seen_at.saturating_add(seen_expiry_secs));
    }
}

/// Counts a failed verification against `record`. Returns `true` if this bans it.
pub fn record_pose_failure(record: &mut MasternodeRecord, height: u64, config: &MasternodeConfig, now: u64) -> bool {
    if record.pose_ban_score == 0 || height.saturating_sub(record.pose_window_start) > config.pose_ban_window_blocks {
        record.pose_ban_score = 0;
        record.pose_window_start = height;
    }
    record.pose_ban_score += 1;
    debug!("PoSe penalty for {} at height {}: score {}", record.collateral, height, record.pose_ban_score);

    if record.pose_ban_score >= config.pose_ban_max_score && record.status != MasternodeStatus::PoseBanned {
        if record.status != MasternodeStatus::OutpointSpent {
            record.set_status(MasternodeStatus::PoseBanned, now);
            info!("Masternode {} banned after {} failed verifications", record.collateral, record.pose_ban_score);
            return true;
        }
    }
    false
}

/// Credits a successful verification to `record`.
pub fn record_pose_success(record: &mut MasternodeRecord, height: u64) {
    record.pose_ban_score = record.pose_ban_score.saturating_sub(1);
    record.last_verified_height = height;
}
