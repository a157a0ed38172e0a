//! Node-facing entry point for the masternode layer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rusty_crypto::{verify_raw, RustyKeyPair};
use rusty_shared_types::{
    Hash, MasternodeBroadcast, MasternodeID, MasternodeMessage, MasternodePing, MasternodeRecord,
    MasternodeVerification, SyncScope,
};

use crate::admission::{AdmissionContext, AdmissionControl, AdmissionOutcome};
use crate::clock::Clock;
use crate::config::MasternodeConfig;
use crate::error::{MasternodeError, DOS_BAD_VERIFICATION};
use crate::governance::GovernanceDirtyQueue;
use crate::interfaces::{ChainView, PeerInfo, PeerTransport};
use crate::lifecycle::{LifecycleMonitor, PassContext, PassReport};
use crate::payments::{find_random_not_in, PaymentParams, PaymentScheduler, ScoredMasternode};
use crate::persistence::{load_cache, save_cache, RegistryCache};
use crate::registry::MasternodeRegistry;
use crate::sync::SyncDriver;
use crate::verification::{record_pose_failure, record_pose_success, VerificationManager};

/// The masternode this node operates, if any.
pub struct LocalMasternode {
    pub collateral: MasternodeID,
    pub service_addr: SocketAddr,
    pub service_key: Arc<RustyKeyPair>,
}

/// Wires the registry to admission, verification, lifecycle, payments and sync.
pub struct MasternodeManager {
    config: MasternodeConfig,
    registry: Arc<MasternodeRegistry>,
    chain: Arc<dyn ChainView>,
    transport: Arc<dyn PeerTransport>,
    clock: Arc<dyn Clock>,
    governance: Arc<GovernanceDirtyQueue>,
    admission: AdmissionControl,
    verification: VerificationManager,
    scheduler: PaymentScheduler,
    lifecycle: LifecycleMonitor,
    sync: SyncDriver,
    local: Option<LocalMasternode>,
    /// Unix time of the most recent watchdog vote from any masternode
    last_watchdog_vote_time: AtomicU64,
}

impl MasternodeManager {
    pub fn new(
        config: MasternodeConfig,
        registry: Arc<MasternodeRegistry>,
        chain: Arc<dyn ChainView>,
        transport: Arc<dyn PeerTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            admission: AdmissionControl::new(),
            verification: VerificationManager::new(&config),
            scheduler: PaymentScheduler::new(PaymentParams::from(&config)),
            lifecycle: LifecycleMonitor::new(),
            sync: SyncDriver::new(&config),
            governance: Arc::new(GovernanceDirtyQueue::new()),
            local: None,
            last_watchdog_vote_time: AtomicU64::new(0),
            config,
            registry,
            chain,
            transport,
            clock,
        }
    }

    pub fn with_local_masternode(mut self, local: LocalMasternode) -> Self {
        self.local = Some(local);
        self
    }

    pub fn config(&self) -> &MasternodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MasternodeRegistry> {
        &self.registry
    }

    pub fn governance(&self) -> &Arc<GovernanceDirtyQueue> {
        &self.governance
    }

    pub fn lifecycle(&self) -> &LifecycleMonitor {
        &self.lifecycle
    }

    fn now(&self) -> u64 {
        self.clock.now()
    }

    fn tip_height(&self) -> u64 {
        self.chain.best_block().0
    }

    fn admission_ctx(&self) -> AdmissionContext<'_> {
        AdmissionContext {
            registry: &self.registry,
            chain: self.chain.as_ref(),
            config: &self.config,
            now: self.now(),
            watchdog_active: self.is_watchdog_active(),
        }
    }

    /// Logs a rejected message and charges the sender its misbehavior score.
    fn reported<T>(&self, peer: &PeerInfo, command: &str, result: Result<T, MasternodeError>) -> Result<T, MasternodeError> {
        if let Err(err) = &result {
            let score = err.dos_score();
            if score > 0 {
                warn!("Rejected {} from {}: {}", command, peer.addr, err);
                self.transport.misbehaving(&peer.addr, score);
            } else {
                debug!("Ignored {} from {}: {}", command, peer.addr, err);
            }
        }
        result
    }

    /// Dispatches an inbound message. Failures are logged and penalized, never returned.
    pub fn process_message(&self, peer: PeerInfo, message: MasternodeMessage) {
        match message {
            MasternodeMessage::Broadcast(mnb) => {
                let _ = self.process_broadcast(&peer, &mnb);
            }
            MasternodeMessage::Ping(ping) => {
                let _ = self.process_ping(&peer, &ping);
            }
            MasternodeMessage::VerifyRequest(mnv) => {
                let _ = self.handle_verify_request(&peer, &mnv);
            }
            MasternodeMessage::VerifyReply(mnv) => {
                let _ = self.handle_verify_reply(&peer, &mnv);
            }
            MasternodeMessage::VerifyBroadcast(mnv) => {
                let _ = self.handle_verify_broadcast(&peer, &mnv);
            }
            MasternodeMessage::SyncRequest(scope) => {
                let _ = self.handle_sync_request(&peer, &scope);
            }
            MasternodeMessage::SyncStatusCount { count } => {
                info!("Peer {} finished sending {} masternode entries", peer.addr, count);
            }
        }
    }

    pub fn process_broadcast(&self, peer: &PeerInfo, mnb: &MasternodeBroadcast) -> Result<AdmissionOutcome, MasternodeError> {
        let result = self.admission.process_broadcast(&self.admission_ctx(), mnb);
        let outcome = self.reported(peer, "mnb", result)?;
        match outcome {
            AdmissionOutcome::Added => info!("Added masternode {} at {}", mnb.collateral, mnb.service_addr),
            AdmissionOutcome::Updated => debug!("Updated masternode {} at {}", mnb.collateral, mnb.service_addr),
            AdmissionOutcome::Deferred => info!("Masternode {} waits for collateral confirmations", mnb.collateral),
        }
        if outcome.should_relay() {
            self.transport.relay(MasternodeMessage::Broadcast(mnb.clone()));
        }
        Ok(outcome)
    }

    pub fn process_ping(&self, peer: &PeerInfo, ping: &MasternodePing) -> Result<(), MasternodeError> {
        let result = match self.admission.process_ping(&self.admission_ctx(), ping) {
            Ok(status) => {
                debug!("Ping from masternode {} accepted, status {}", ping.collateral, status);
                self.transport.relay(MasternodeMessage::Ping(ping.clone()));
                Ok(())
            }
            Err(MasternodeError::UnknownMasternode(id)) => {
                if self.sync.ask_for_entry(self.transport.as_ref(), peer.addr, &id, self.now()).is_err() {
                    debug!("Already asked for masternode {}", id);
                }
                Err(MasternodeError::UnknownMasternode(id))
            }
            Err(err) => Err(err),
        };
        self.reported(peer, "mnp", result)
    }

    fn ignores_pose_from(&self, peer: &PeerInfo) -> bool {
        if peer.protocol_version < self.config.min_pose_protocol_version {
            debug!("Ignoring verification message from {} (protocol {})", peer.addr, peer.protocol_version);
            return true;
        }
        false
    }

    /// Challenges `addr` to prove it is run by the masternode that announced it.
    ///
    /// Returns `false` if a challenge for that address is already outstanding.
    pub fn request_verification(&self, addr: SocketAddr) -> bool {
        let height = self.tip_height().saturating_sub(1);
        match self.verification.begin(addr, height, self.now()) {
            Some(request) => {
                debug!("Sending verification request to {}", addr);
                self.transport.send(&addr, MasternodeMessage::VerifyRequest(request));
                true
            }
            None => false,
        }
    }

    pub fn handle_verify_request(&self, peer: &PeerInfo, mnv: &MasternodeVerification) -> Result<(), MasternodeError> {
        if self.ignores_pose_from(peer) {
            return Ok(());
        }
        let result = self.answer_verify_request(peer, mnv);
        self.reported(peer, "mnv-req", result)
    }

    fn answer_verify_request(&self, peer: &PeerInfo, mnv: &MasternodeVerification) -> Result<(), MasternodeError> {
        let Some(local) = self.local.as_ref().filter(|local| local.service_addr == mnv.addr) else {
            if self.transport.is_reachable(&mnv.addr) {
                self.request_verification(mnv.addr);
            }
            return Ok(());
        };

        if !self.verification.allow_reply(peer.addr, self.now()) {
            return Err(MasternodeError::ThrottleViolation);
        }
        let block_hash = self.chain.block_hash_at(mnv.block_height).ok_or(MasternodeError::UnknownBlock)?;
        let mut reply = mnv.clone();
        reply.responder = Some(local.collateral.clone());
        reply.responder_sig = local.service_key.sign_to_vec(&reply.reply_signing_bytes(&block_hash));
        self.transport.send(&peer.addr, MasternodeMessage::VerifyReply(reply));
        Ok(())
    }

    pub fn handle_verify_reply(&self, peer: &PeerInfo, mnv: &MasternodeVerification) -> Result<(), MasternodeError> {
        if self.ignores_pose_from(peer) {
            return Ok(());
        }
        let result = self.check_verify_reply(mnv);
        self.reported(peer, "mnv-rep", result)
    }

    fn check_verify_reply(&self, mnv: &MasternodeVerification) -> Result<(), MasternodeError> {
        let now = self.now();
        let request = self.verification.take_reply(mnv, now)?;
        let block_hash = self.chain.block_hash_at(request.block_height).ok_or(MasternodeError::UnknownBlock)?;
        let signed = request.reply_signing_bytes(&block_hash);
        let height = self.tip_height();

        let snapshot = self.registry.snapshot();
        let claimants: Vec<&MasternodeRecord> = snapshot.at_addr(&request.addr).collect();
        if claimants.is_empty() {
            debug!("No masternode claims {} any more", request.addr);
            return Ok(());
        }
        let real = claimants
            .iter()
            .find(|record| verify_raw(&record.service_pubkey, &signed, &mnv.responder_sig).is_ok())
            .map(|record| record.collateral.clone());

        let Some(real) = real else {
            for record in &claimants {
                self.penalize(&record.collateral, height, now);
            }
            return Err(MasternodeError::VerificationFailed(format!(
                "no masternode at {} signed the reply",
                request.addr
            )));
        };

        self.registry.update(&real, |record| record_pose_success(record, height));
        for record in claimants.iter().filter(|record| record.collateral != real) {
            self.penalize(&record.collateral, height, now);
        }
        info!("Verified masternode {} at {}", real, request.addr);

        if let Some(local) = &self.local {
            let mut proof = request;
            proof.responder = Some(real);
            proof.responder_sig = mnv.responder_sig.clone();
            proof.requester = Some(local.collateral.clone());
            proof.requester_sig = local.service_key.sign_to_vec(&proof.broadcast_signing_bytes(&block_hash));
            self.verification.mark_seen(proof.hash(), now);
            self.transport.relay(MasternodeMessage::VerifyBroadcast(proof));
        }
        Ok(())
    }

    pub fn handle_verify_broadcast(&self, peer: &PeerInfo, mnv: &MasternodeVerification) -> Result<(), MasternodeError> {
        if self.ignores_pose_from(peer) {
            return Ok(());
        }
        let result = self.check_verify_broadcast(mnv);
        self.reported(peer, "mnv", result)
    }

    fn check_verify_broadcast(&self, mnv: &MasternodeVerification) -> Result<(), MasternodeError> {
        let now = self.now();
        if !self.verification.mark_seen(mnv.hash(), now) {
            return Err(MasternodeError::DuplicateEntry);
        }
        let height = self.tip_height();
        if mnv.block_height + self.config.max_pose_blocks < height {
            return Err(MasternodeError::StaleData(format!("verification at height {} is outdated", mnv.block_height)));
        }
        let (responder_id, requester_id) = match (&mnv.responder, &mnv.requester) {
            (Some(responder), Some(requester)) if responder != requester => (responder, requester),
            _ => return Err(MasternodeError::VerificationFailed("malformed verification broadcast".into())),
        };
        if mnv.responder_sig.is_empty() || mnv.requester_sig.is_empty() {
            return Err(MasternodeError::VerificationFailed("unsigned verification broadcast".into()));
        }

        let block_hash = self.chain.block_hash_at(mnv.block_height).ok_or(MasternodeError::UnknownBlock)?;
        let responder = self
            .registry
            .find_by_collateral(responder_id)
            .ok_or_else(|| MasternodeError::UnknownMasternode(responder_id.clone()))?;
        let requester = self
            .registry
            .find_by_collateral(requester_id)
            .ok_or_else(|| MasternodeError::UnknownMasternode(requester_id.clone()))?;
        if responder.service_addr != mnv.addr {
            return Err(MasternodeError::VerificationFailed(format!("{} does not announce {}", responder_id, mnv.addr)));
        }

        match self.masternode_rank(requester_id, mnv.block_height, self.config.min_pose_protocol_version) {
            Some(rank) if rank <= self.config.max_pose_rank => {}
            _ => {
                return Err(MasternodeError::StaleData(format!(
                    "requester {} not ranked within top {}",
                    requester_id, self.config.max_pose_rank
                )))
            }
        }

        verify_raw(&responder.service_pubkey, &mnv.reply_signing_bytes(&block_hash), &mnv.responder_sig)
            .map_err(|_| MasternodeError::InvalidSignature { what: "verification responder", dos: DOS_BAD_VERIFICATION })?;
        verify_raw(&requester.service_pubkey, &mnv.broadcast_signing_bytes(&block_hash), &mnv.requester_sig)
            .map_err(|_| MasternodeError::InvalidSignature { what: "verification requester", dos: DOS_BAD_VERIFICATION })?;

        self.registry.update(responder_id, |record| record_pose_success(record, height));
        let others: Vec<MasternodeID> = self
            .registry
            .snapshot()
            .at_addr(&mnv.addr)
            .filter(|record| &record.collateral != responder_id)
            .map(|record| record.collateral.clone())
            .collect();
        for id in &others {
            self.penalize(id, height, now);
        }
        debug!("Accepted verification of {} by {}", responder_id, requester_id);
        self.transport.relay(MasternodeMessage::VerifyBroadcast(mnv.clone()));
        Ok(())
    }

    fn penalize(&self, id: &MasternodeID, height: u64, now: u64) {
        self.registry.update(id, |record| record_pose_failure(record, height, &self.config, now));
    }

    /// Penalizes every enabled record sharing an address with a better-verified one.
    pub fn check_same_addr(&self) -> usize {
        let snapshot = self.registry.snapshot();
        let mut by_addr: HashMap<SocketAddr, Vec<&MasternodeRecord>> = HashMap::new();
        for record in snapshot.iter().filter(|record| record.is_enabled()) {
            by_addr.entry(record.service_addr).or_default().push(record);
        }

        let mut to_penalize = Vec::new();
        for group in by_addr.values().filter(|group| group.len() > 1) {
            let Some(best) = group.iter().max_by_key(|record| record.last_verified_height) else { continue };
            if best.last_verified_height == 0 {
                continue;
            }
            to_penalize.extend(
                group
                    .iter()
                    .filter(|record| record.collateral != best.collateral)
                    .map(|record| record.collateral.clone()),
            );
        }

        let (height, now) = (self.tip_height(), self.now());
        for id in &to_penalize {
            warn!("Masternode {} shares its address with a verified masternode", id);
            self.penalize(id, height, now);
        }
        to_penalize.len()
    }

    /// Sends verification requests to records chosen by rank. Only runs on
    /// a masternode that is itself ranked within the top `max_pose_rank`.
    pub fn do_full_verification_step(&self) -> usize {
        let Some(local) = &self.local else { return 0 };
        let height = self.tip_height().saturating_sub(1);
        let ranks = self.masternode_ranks(height, self.config.min_pose_protocol_version);
        let Some(my_rank) = ranks.iter().position(|scored| scored.collateral == local.collateral).map(|i| i + 1) else {
            debug!("Local masternode is not ranked, skipping verification step");
            return 0;
        };
        if my_rank > self.config.max_pose_rank {
            return 0;
        }

        let snapshot = self.registry.snapshot();
        let mut offset = self.config.max_pose_rank + my_rank - 1;
        let mut sent = 0;
        while offset < ranks.len() && sent < self.config.max_pose_connections {
            if let Some(record) = snapshot.get(&ranks[offset].collateral) {
                if record.service_addr != local.service_addr && self.request_verification(record.service_addr) {
                    sent += 1;
                }
            }
            offset += self.config.max_pose_rank;
        }
        sent
    }

    pub fn handle_sync_request(&self, peer: &PeerInfo, scope: &SyncScope) -> Result<usize, MasternodeError> {
        let result = self.sync.handle_sync_request(
            self.registry.as_ref(),
            self.chain.as_ref(),
            self.transport.as_ref(),
            peer.addr,
            scope,
            self.now(),
        );
        self.reported(peer, "dseg", result)
    }

    pub fn request_full_list(&self, peer: SocketAddr) -> Result<(), MasternodeError> {
        self.sync.request_full_list(self.transport.as_ref(), peer, self.now())
    }

    /// Hook for the peer layer: asks a newly connected peer for its list.
    ///
    /// Returns `false` if that peer was already asked within the throttle interval.
    pub fn on_peer_connected(&self, peer: SocketAddr) -> bool {
        match self.request_full_list(peer) {
            Ok(()) => {
                info!("Requested masternode list from {}", peer);
                true
            }
            Err(err) => {
                debug!("Not asking {} for the masternode list: {}", peer, err);
                false
            }
        }
    }

    pub fn ask_for_entry(&self, peer: SocketAddr, id: &MasternodeID) -> Result<(), MasternodeError> {
        self.sync.ask_for_entry(self.transport.as_ref(), peer, id, self.now())
    }

    /// Runs a lifecycle pass in response to a new best block.
    pub fn updated_block_tip(&self, height: u64, hash: &Hash) -> Option<PassReport> {
        debug!("New best block {} at height {}", hex::encode(hash), height);
        self.run_lifecycle_pass()
    }

    /// Periodic maintenance: lifecycle pass plus proof-of-service work.
    pub fn on_timer(&self) -> Option<PassReport> {
        let report = self.run_lifecycle_pass();
        self.check_same_addr();
        self.do_full_verification_step();
        report
    }

    /// Returns `None` when a pass was already running and this trigger was folded into it.
    pub fn run_lifecycle_pass(&self) -> Option<PassReport> {
        let now = self.now();
        let ctx = PassContext {
            registry: &self.registry,
            chain: self.chain.as_ref(),
            verification: &self.verification,
            governance: &self.governance,
            config: &self.config,
            now,
            watchdog_active: self.is_watchdog_active(),
        };
        let report = self.lifecycle.run_pass(&ctx)?;
        self.admission.prune(now, self.config.seen_message_expiry_secs);
        self.verification.prune(now, self.config.seen_message_expiry_secs);
        self.sync.prune(now);
        Some(report)
    }

    pub fn next_payee(&self, height: u64) -> Option<MasternodeID> {
        self.scheduler.select_payee(&self.registry.snapshot(), self.chain.as_ref(), height)
    }

    pub fn next_payees(&self, from_height: u64, count: usize) -> Vec<(u64, MasternodeID)> {
        self.scheduler.next_payees(&self.registry.snapshot(), self.chain.as_ref(), from_height, count)
    }

    /// Records a confirmed payment. Last-paid never moves backwards.
    pub fn record_payment(&self, id: &MasternodeID, height: u64) -> Result<(), MasternodeError> {
        let now = self.now();
        self.registry
            .update(id, |record| {
                if height > record.last_paid_height {
                    record.last_paid_height = height;
                    record.last_paid_time = now;
                }
            })
            .ok_or_else(|| MasternodeError::UnknownMasternode(id.clone()))
    }

    /// Records a confirmed payment identified by the output script the block paid.
    pub fn record_payment_to_script(&self, script: &[u8], height: u64) -> Result<MasternodeID, MasternodeError> {
        let record = self
            .registry
            .find_by_payee_script(script)
            .ok_or_else(|| MasternodeError::NotFound(format!("no masternode pays to {}", hex::encode(script))))?;
        self.record_payment(&record.collateral, height)?;
        Ok(record.collateral)
    }

    pub fn masternode_ranks(&self, height: u64, min_protocol_version: u32) -> Vec<ScoredMasternode> {
        self.scheduler.ranks(&self.registry.snapshot(), self.chain.as_ref(), height, min_protocol_version)
    }

    /// 1-based rank of `id` at `height`.
    pub fn masternode_rank(&self, id: &MasternodeID, height: u64, min_protocol_version: u32) -> Option<usize> {
        self.masternode_ranks(height, min_protocol_version)
            .iter()
            .position(|scored| &scored.collateral == id)
            .map(|index| index + 1)
    }

    pub fn masternode_by_rank(&self, rank: usize, height: u64, min_protocol_version: u32) -> Option<MasternodeRecord> {
        let index = rank.checked_sub(1)?;
        let ranks = self.masternode_ranks(height, min_protocol_version);
        let scored = ranks.get(index)?;
        self.registry.find_by_collateral(&scored.collateral)
    }

    pub fn count_masternodes(&self, min_protocol_version: u32) -> usize {
        self.registry.count(min_protocol_version)
    }

    pub fn count_enabled(&self, min_protocol_version: u32) -> usize {
        self.registry.count_enabled(min_protocol_version)
    }

    pub fn find_random_not_in(&self, exclude: &[MasternodeID], min_protocol_version: u32) -> Option<MasternodeRecord> {
        let (height, hash) = self.chain.best_block();
        find_random_not_in(&self.registry.snapshot(), exclude, min_protocol_version, height, &hash)
    }

    pub fn update_watchdog_vote_time(&self, id: &MasternodeID) -> Result<(), MasternodeError> {
        let now = self.now();
        self.registry
            .update(id, |record| record.last_watchdog_vote = now)
            .ok_or_else(|| MasternodeError::UnknownMasternode(id.clone()))?;
        self.last_watchdog_vote_time.store(now, Ordering::Relaxed);
        Ok(())
    }

    /// The watchdog counts as active while someone voted within the watchdog window.
    pub fn is_watchdog_active(&self) -> bool {
        let last = self.last_watchdog_vote_time.load(Ordering::Relaxed);
        last != 0 && self.now().saturating_sub(last) <= self.config.watchdog_max_secs
    }

    pub fn add_governance_vote(&self, id: &MasternodeID, object_hash: Hash) -> Result<(), MasternodeError> {
        self.registry
            .update(id, |record| *record.governance_votes.entry(object_hash).or_insert(0) += 1)
            .ok_or_else(|| MasternodeError::UnknownMasternode(id.clone()))
    }

    pub fn remove_governance_object(&self, object_hash: &Hash) {
        self.registry.update_all(|record| {
            record.governance_votes.remove(object_hash);
        });
    }

    pub fn export_cache(&self) -> RegistryCache {
        RegistryCache {
            records: self.registry.snapshot().into_records(),
            sync_throttles: self.sync.export_throttles(),
            seen: self.admission.seen_messages(),
            last_watchdog_vote_time: self.last_watchdog_vote_time.load(Ordering::Relaxed),
        }
    }

    pub fn import_cache(&self, cache: RegistryCache) {
        self.registry.replace_all(cache.records);
        self.sync.restore_throttles(cache.sync_throttles);
        self.admission.restore(cache.seen);
        self.last_watchdog_vote_time.store(cache.last_watchdog_vote_time, Ordering::Relaxed);
    }

    pub fn save(&self, path: &Path) -> Result<(), MasternodeError> {
        save_cache(path, &self.export_cache())
    }

    /// Loads `path` into the registry. Returns `false` if there was no usable cache.
    pub fn load(&self, path: &Path) -> Result<bool, MasternodeError> {
        match load_cache(path)? {
            Some(cache) => {
                self.import_cache(cache);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
