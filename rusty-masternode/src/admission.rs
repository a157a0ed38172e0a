//! Validation of announcements and heartbeats received from peers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use rusty_crypto::verify_raw;
use rusty_shared_types::{Hash, MasternodeBroadcast, MasternodePing, MasternodeRecord, MasternodeStatus};
use serde::{Deserialize, Serialize};

use crate::config::MasternodeConfig;
use crate::error::{
    MasternodeError, DOS_BAD_BROADCAST_SIGNATURE, DOS_BAD_PING_SIGNATURE, DOS_COLLATERAL_KEY_MISMATCH,
};
use crate::interfaces::ChainView;
use crate::lifecycle::{compute_status, StatusInputs};
use crate::registry::MasternodeRegistry;

/// What an accepted broadcast did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Added,
    Updated,
    /// Stored as `PreEnabled` until the collateral has enough confirmations; not relayed.
    Deferred,
}

impl AdmissionOutcome {
    pub fn should_relay(&self) -> bool {
        !matches!(self, AdmissionOutcome::Deferred)
    }
}

/// Collaborators an admission check reads from.
pub struct AdmissionContext<'a> {
    pub registry: &'a MasternodeRegistry,
    pub chain: &'a dyn ChainView,
    pub config: &'a MasternodeConfig,
    pub now: u64,
    pub watchdog_active: bool,
}

impl AdmissionContext<'_> {
    fn status_inputs(&self, record: &MasternodeRecord) -> StatusInputs {
        StatusInputs {
            now: self.now,
            spent: self.chain.is_spent(&record.collateral.0),
            confirmations: self.chain.confirmations(&record.collateral.0),
            signature_valid: true,
            watchdog_active: self.watchdog_active,
        }
    }
}

/// Content hashes of processed broadcasts and pings with the time they were first seen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeenMessages {
    pub broadcasts: HashMap<Hash, u64>,
    pub pings: HashMap<Hash, u64>,
}

impl SeenMessages {
    pub fn prune(&mut self, now: u64, expiry_secs: u64) {
        self.broadcasts.retain(|_, seen| now < seen.saturating_add(expiry_secs));
        self.pings.retain(|_, seen| now < seen.saturating_add(expiry_secs));
    }
}

#[derive(Debug, Default)]
pub struct AdmissionControl {
    seen: Mutex<SeenMessages>,
}

impl AdmissionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the seen-message tables, e.g. with ones loaded from the cache.
    pub fn restore(&self, seen: SeenMessages) {
        *self.seen() = seen;
    }

    fn seen(&self) -> MutexGuard<'_, SeenMessages> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seen_messages(&self) -> SeenMessages {
        self.seen().clone()
    }

    pub fn prune(&self, now: u64, expiry_secs: u64) {
        self.seen().prune(now, expiry_secs);
    }

    /// Validates a broadcast and applies it to the registry.
    pub fn process_broadcast(
        &self,
        ctx: &AdmissionContext<'_>,
        mnb: &MasternodeBroadcast,
    ) -> Result<AdmissionOutcome, MasternodeError> {
        let hash = mnb.hash();
        if self.seen().broadcasts.contains_key(&hash) {
            return Err(MasternodeError::DuplicateEntry);
        }
        // Only remembered once it passes the stateless checks, so a broadcast
        // that arrived too early can be accepted later.
        simple_check(ctx, mnb)?;
        {
            let mut seen = self.seen();
            if seen.broadcasts.contains_key(&hash) {
                return Err(MasternodeError::DuplicateEntry);
            }
            seen.broadcasts.insert(hash, ctx.now);
        }

        let outcome = self.check_and_apply_broadcast(ctx, mnb)?;

        if let Some(ping) = &mnb.last_ping {
            if ping.collateral == mnb.collateral {
                if let Err(err) = self.process_ping(ctx, ping) {
                    debug!("Embedded ping for {} not applied: {}", mnb.collateral, err);
                }
            }
        }
        Ok(outcome)
    }

    fn check_and_apply_broadcast(
        &self,
        ctx: &AdmissionContext<'_>,
        mnb: &MasternodeBroadcast,
    ) -> Result<AdmissionOutcome, MasternodeError> {
        let config = ctx.config;
        if let Some(existing) = ctx.registry.find_by_collateral(&mnb.collateral) {
            check_against_existing(&existing, mnb)?;
        }

        verify_raw(&mnb.collateral_pubkey, &mnb.signing_bytes(), &mnb.signature).map_err(|_| {
            MasternodeError::InvalidSignature { what: "masternode broadcast", dos: DOS_BAD_BROADCAST_SIGNATURE }
        })?;

        if ctx.chain.is_spent(&mnb.collateral.0) {
            return Err(MasternodeError::CollateralSpent(mnb.collateral.clone()));
        }
        let confirmations = ctx.chain.confirmations(&mnb.collateral.0);
        let deferred = match check_confirmations(confirmations, config.min_confirmations()) {
            Ok(()) => false,
            Err(err) => {
                debug!("Deferring masternode {}: {}", mnb.collateral, err);
                true
            }
        };

        let inputs = StatusInputs {
            now: ctx.now,
            spent: false,
            confirmations,
            signature_valid: true,
            watchdog_active: ctx.watchdog_active,
        };
        let inserted = ctx.registry.upsert(
            &mnb.collateral,
            || MasternodeRecord::from_broadcast(mnb, ctx.now),
            |record| {
                // Re-checked under the lock; another peer may have delivered a newer one.
                check_against_existing(record, mnb)?;
                record.apply_broadcast(mnb);
                if record.last_ping_time().map_or(false, |t| t < mnb.sig_time) {
                    record.last_ping = None;
                }
                let status = compute_status(record, &inputs, config);
                record.set_status(status, ctx.now);
                Ok(())
            },
        )?;

        Ok(match (deferred, inserted) {
            (true, _) => AdmissionOutcome::Deferred,
            (false, true) => AdmissionOutcome::Added,
            (false, false) => AdmissionOutcome::Updated,
        })
    }

    /// Validates a ping and applies it; returns the record's recomputed status.
    pub fn process_ping(&self, ctx: &AdmissionContext<'_>, ping: &MasternodePing) -> Result<MasternodeStatus, MasternodeError> {
        let hash = ping.hash();
        if self.seen().pings.contains_key(&hash) {
            return Err(MasternodeError::DuplicateEntry);
        }

        let config = ctx.config;
        if ping.sig_time > ctx.now + config.max_future_drift_secs {
            return Err(MasternodeError::FutureTimestamp { timestamp: ping.sig_time, now: ctx.now });
        }

        let record = ctx
            .registry
            .find_by_collateral(&ping.collateral)
            .ok_or_else(|| MasternodeError::UnknownMasternode(ping.collateral.clone()))?;
        check_ping_against_record(&record, ping, config)?;

        let (tip, _) = ctx.chain.best_block();
        let oldest = tip.saturating_sub(config.ping_max_block_age);
        let recent = (oldest..=tip).any(|height| ctx.chain.block_hash_at(height) == Some(ping.block_hash));
        if !recent {
            return Err(MasternodeError::UnknownBlock);
        }

        verify_raw(&record.service_pubkey, &ping.signing_bytes(), &ping.signature).map_err(|_| {
            MasternodeError::InvalidSignature { what: "masternode ping", dos: DOS_BAD_PING_SIGNATURE }
        })?;

        self.seen().pings.insert(hash, ctx.now);
        let inputs = ctx.status_inputs(&record);
        ctx.registry
            .update(&ping.collateral, |record| {
                check_ping_against_record(record, ping, config)?;
                record.last_ping = Some(ping.clone());
                let status = compute_status(record, &inputs, config);
                record.set_status(status, ctx.now);
                Ok(status)
            })
            .ok_or_else(|| MasternodeError::UnknownMasternode(ping.collateral.clone()))?
    }
}

/// Checks that need nothing but the message and the clock.
fn simple_check(ctx: &AdmissionContext<'_>, mnb: &MasternodeBroadcast) -> Result<(), MasternodeError> {
    let config = ctx.config;
    if mnb.sig_time > ctx.now + config.max_future_drift_secs {
        return Err(MasternodeError::FutureTimestamp { timestamp: mnb.sig_time, now: ctx.now });
    }
    if mnb.protocol_version < config.min_protocol_version {
        return Err(MasternodeError::ProtocolVersion {
            version: mnb.protocol_version,
            minimum: config.min_protocol_version,
        });
    }
    if !config.chain_params.is_valid_masternode_port(mnb.service_addr.port()) {
        return Err(MasternodeError::InvalidPort(mnb.service_addr.port()));
    }
    Ok(())
}

fn check_confirmations(have: u32, need: u32) -> Result<(), MasternodeError> {
    if have < need {
        return Err(MasternodeError::InsufficientConfirmations { have, need });
    }
    Ok(())
}

fn check_against_existing(existing: &MasternodeRecord, mnb: &MasternodeBroadcast) -> Result<(), MasternodeError> {
    match existing.status {
        MasternodeStatus::OutpointSpent => return Err(MasternodeError::CollateralSpent(existing.collateral.clone())),
        MasternodeStatus::PoseBanned => {
            return Err(MasternodeError::Banned(existing.collateral.clone(), existing.status))
        }
        _ => {}
    }
    if existing.sig_time >= mnb.sig_time {
        return Err(MasternodeError::StaleData(format!(
            "broadcast for {} signed at {} is not newer than {}",
            mnb.collateral, mnb.sig_time, existing.sig_time
        )));
    }
    if existing.collateral_pubkey != mnb.collateral_pubkey {
        return Err(MasternodeError::InvalidSignature {
            what: "masternode broadcast collateral key",
            dos: DOS_COLLATERAL_KEY_MISMATCH,
        });
    }
    Ok(())
}

fn check_ping_against_record(
    record: &MasternodeRecord,
    ping: &MasternodePing,
    config: &MasternodeConfig,
) -> Result<(), MasternodeError> {
    if record.status.is_terminal() {
        return Err(MasternodeError::StaleData(format!("masternode {} is {}", record.collateral, record.status)));
    }
    if let Some(previous) = record.last_ping_time() {
        let min_spacing = config.min_ping_interval_secs.saturating_sub(60);
        if ping.sig_time <= previous || ping.sig_time - previous < min_spacing {
            return Err(MasternodeError::StaleData(format!(
                "ping for {} at {} too soon after {}",
                record.collateral, ping.sig_time, previous
            )));
        }
    }
    Ok(())
}
