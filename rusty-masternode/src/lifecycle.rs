//! Periodic status recomputation and removal of dead records.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, info};
use rusty_crypto::verify_raw;
use rusty_shared_types::{MasternodeID, MasternodeRecord, MasternodeStatus};

use crate::config::MasternodeConfig;
use crate::governance::GovernanceDirtyQueue;
use crate::interfaces::ChainView;
use crate::registry::{MasternodeRegistry, RecordUpdate, RegistrySnapshot};
use crate::verification::{record_pose_failure, VerificationManager};

/// Everything besides the record itself that decides its status.
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs {
    pub now: u64,
    pub spent: bool,
    pub confirmations: u32,
    pub signature_valid: bool,
    pub watchdog_active: bool,
}

/// Status rules, first match wins.
pub fn compute_status(record: &MasternodeRecord, inputs: &StatusInputs, config: &MasternodeConfig) -> MasternodeStatus {
    if record.status == MasternodeStatus::OutpointSpent || inputs.spent {
        return MasternodeStatus::OutpointSpent;
    }
    if record.status == MasternodeStatus::PoseBanned || record.pose_ban_score >= config.pose_ban_max_score {
        return MasternodeStatus::PoseBanned;
    }
    if !inputs.signature_valid {
        return MasternodeStatus::NewStartRequired;
    }
    if record.protocol_version < config.min_protocol_version {
        return MasternodeStatus::UpdateRequired;
    }

    let ping_time = record.last_ping_time();
    let silent_for = inputs.now.saturating_sub(ping_time.unwrap_or(record.sig_time));
    if silent_for >= config.new_start_required_secs {
        return MasternodeStatus::NewStartRequired;
    }
    if inputs.watchdog_active && inputs.now.saturating_sub(record.last_watchdog_vote) >= config.watchdog_max_secs {
        return MasternodeStatus::WatchdogExpired;
    }
    if silent_for >= config.expiration_secs {
        return MasternodeStatus::Expired;
    }

    let pinged_after_start = ping_time
        .map_or(false, |t| t.saturating_sub(record.sig_time) >= config.min_ping_interval_secs);
    if inputs.confirmations < config.min_confirmations() || !pinged_after_start {
        return MasternodeStatus::PreEnabled;
    }
    MasternodeStatus::Enabled
}

/// Whether the stored announcement signature still matches the stored collateral key.
pub fn broadcast_signature_valid(record: &MasternodeRecord) -> bool {
    let mnb = record.to_broadcast();
    verify_raw(&record.collateral_pubkey, &mnb.signing_bytes(), &record.signature).is_ok()
}

/// Collaborators a pass works against.
pub struct PassContext<'a> {
    pub registry: &'a MasternodeRegistry,
    pub chain: &'a dyn ChainView,
    pub verification: &'a VerificationManager,
    pub governance: &'a GovernanceDirtyQueue,
    pub config: &'a MasternodeConfig,
    pub now: u64,
    pub watchdog_active: bool,
}

#[derive(Debug, Default)]
pub struct PassReport {
    pub status_changes: usize,
    pub removed: Vec<MasternodeID>,
    pub timed_out: Vec<SocketAddr>,
}

/// Drives lifecycle passes; concurrent triggers coalesce into the running pass.
#[derive(Debug, Default)]
pub struct LifecycleMonitor {
    running: AtomicBool,
    passes: AtomicU64,
    coalesced: AtomicU64,
}

struct PassGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl LifecycleMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_begin(&self) -> Option<PassGuard<'_>> {
        match self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Some(PassGuard { running: &self.running }),
            Err(_) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Completed passes.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Triggers dropped because a pass was already running.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Runs one pass, or returns `None` if another pass is in progress.
    pub fn run_pass(&self, ctx: &PassContext<'_>) -> Option<PassReport> {
        let _guard = self.try_begin()?;
        let mut report = PassReport::default();

        report.timed_out = ctx.verification.expire(ctx.now);
        if !report.timed_out.is_empty() {
            let height = ctx.chain.best_block().0;
            let timed_out: HashSet<SocketAddr> = report.timed_out.iter().copied().collect();
            ctx.registry.update_all(|record| {
                if timed_out.contains(&record.service_addr) {
                    record_pose_failure(record, height, ctx.config, ctx.now);
                }
            });
            debug!("{} verification requests timed out", timed_out.len());
        }

        let snapshot = ctx.registry.snapshot();
        let updates = self.plan(&snapshot, ctx);
        let outcome = ctx.registry.apply_batch(updates);

        for (id, from, to) in &outcome.status_changes {
            info!("Masternode {} {} -> {}", id, from, to);
        }
        for record in &outcome.removed {
            info!("Removing masternode {} ({})", record.collateral, record.status);
            ctx.governance.extend(record.governance_votes.keys().copied());
        }

        report.status_changes = outcome.status_changes.len();
        report.removed = outcome.removed.into_iter().map(|r| r.collateral).collect();
        self.passes.fetch_add(1, Ordering::Relaxed);
        Some(report)
    }

    /// Computes status changes and removals from a snapshot without touching the registry.
    pub fn plan(&self, snapshot: &RegistrySnapshot, ctx: &PassContext<'_>) -> Vec<RecordUpdate> {
        let mut updates = Vec::new();
        for record in snapshot.iter() {
            if record.status.is_terminal()
                && ctx.now.saturating_sub(record.status_since) >= ctx.config.retention_grace_secs
            {
                updates.push(RecordUpdate::RemoveTerminal {
                    id: record.collateral.clone(),
                    status_since: record.status_since,
                });
                continue;
            }

            let inputs = StatusInputs {
                now: ctx.now,
                spent: ctx.chain.is_spent(&record.collateral.0),
                confirmations: ctx.chain.confirmations(&record.collateral.0),
                signature_valid: broadcast_signature_valid(record),
                watchdog_active: ctx.watchdog_active,
            };
            let status = compute_status(record, &inputs, ctx.config);
            if status != record.status {
                updates.push(RecordUpdate::Status {
                    id: record.collateral.clone(),
                    status,
                    at: ctx.now,
                    observed_sig_time: record.sig_time,
                    observed_ping_time: record.last_ping_time(),
                });
            }
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_shared_types::{MasternodeBroadcast, MasternodePing, OutPoint};

    fn dummy_record() -> MasternodeRecord {
        let mnb = MasternodeBroadcast {
            collateral: MasternodeID(OutPoint::new([1; 32], 0)),
            service_addr: "10.0.0.1:6518".parse().unwrap(),
            collateral_pubkey: [1; 32],
            service_pubkey: [2; 32],
            protocol_version: 70206,
            sig_time: 10_000,
            signature: vec![],
            last_ping: None,
        };
        MasternodeRecord::from_broadcast(&mnb, 10_000)
    }

    fn pinged(mut record: MasternodeRecord, at: u64) -> MasternodeRecord {
        record.last_ping = Some(MasternodePing {
            collateral: record.collateral.clone(),
            block_hash: [0; 32],
            sig_time: at,
            signature: vec![],
        });
        record
    }

    fn inputs(now: u64) -> StatusInputs {
        StatusInputs { now, spent: false, confirmations: 100, signature_valid: true, watchdog_active: false }
    }

    #[test]
    fn test_status_progression() {
        let config = MasternodeConfig::default();
        let record = dummy_record();
        assert_eq!(compute_status(&record, &inputs(10_100), &config), MasternodeStatus::PreEnabled);

        let record = pinged(record, 10_000 + config.min_ping_interval_secs);
        let now = 10_000 + config.min_ping_interval_secs + 10;
        assert_eq!(compute_status(&record, &inputs(now), &config), MasternodeStatus::Enabled);

        let mut low_confs = inputs(now);
        low_confs.confirmations = 1;
        assert_eq!(compute_status(&record, &low_confs, &config), MasternodeStatus::PreEnabled);

        let last_ping = 10_000 + config.min_ping_interval_secs;
        assert_eq!(
            compute_status(&record, &inputs(last_ping + config.expiration_secs), &config),
            MasternodeStatus::Expired
        );
        assert_eq!(
            compute_status(&record, &inputs(last_ping + config.new_start_required_secs), &config),
            MasternodeStatus::NewStartRequired
        );
    }

    #[test]
    fn test_spent_and_banned_take_precedence() {
        let config = MasternodeConfig::default();
        let mut record = pinged(dummy_record(), 10_700);
        let mut spent = inputs(10_800);
        spent.spent = true;
        assert_eq!(compute_status(&record, &spent, &config), MasternodeStatus::OutpointSpent);

        record.pose_ban_score = config.pose_ban_max_score;
        assert_eq!(compute_status(&record, &inputs(10_800), &config), MasternodeStatus::PoseBanned);

        record.status = MasternodeStatus::OutpointSpent;
        assert_eq!(compute_status(&record, &inputs(10_800), &config), MasternodeStatus::OutpointSpent);
    }

    #[test]
    fn test_watchdog_and_protocol_rules() {
        let config = MasternodeConfig::default();
        let mut record = pinged(dummy_record(), 10_700);
        let mut watchdog = inputs(10_000 + config.watchdog_max_secs);
        watchdog.watchdog_active = true;
        record.last_ping.as_mut().unwrap().sig_time = 10_000 + config.watchdog_max_secs - 60;
        assert_eq!(compute_status(&record, &watchdog, &config), MasternodeStatus::WatchdogExpired);

        record.protocol_version = config.min_protocol_version - 1;
        assert_eq!(compute_status(&record, &watchdog, &config), MasternodeStatus::UpdateRequired);

        let mut bad_sig = inputs(10_800);
        bad_sig.signature_valid = false;
        assert_eq!(compute_status(&record, &bad_sig, &config), MasternodeStatus::NewStartRequired);
    }

    #[test]
    fn test_concurrent_trigger_is_coalesced() {
        let monitor = LifecycleMonitor::new();
        let guard = monitor.try_begin().unwrap();
        assert!(monitor.is_running());
        assert!(monitor.try_begin().is_none());
        assert_eq!(monitor.coalesced(), 1);
        drop(guard);
        assert!(!monitor.is_running());
        assert!(monitor.try_begin().is_some());
    }
}
