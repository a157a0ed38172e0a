//! The authoritative set of known masternodes.
//!
//! One mutex guards the records and every secondary index, so a reader never
//! sees an index that disagrees with the record table.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use rusty_shared_types::{Hash, MasternodeID, MasternodeRecord, MasternodeStatus, PublicKey};

use crate::error::MasternodeError;

#[derive(Debug, Default)]
struct RegistryState {
    records: HashMap<MasternodeID, MasternodeRecord>,
    by_service_key: HashMap<PublicKey, BTreeSet<MasternodeID>>,
    by_payee_script: HashMap<Vec<u8>, BTreeSet<MasternodeID>>,
}

impl RegistryState {
    fn insert(&mut self, record: MasternodeRecord) {
        let id = record.collateral.clone();
        self.by_service_key.entry(record.service_pubkey).or_default().insert(id.clone());
        self.by_payee_script.entry(record.payee_script()).or_default().insert(id.clone());
        self.records.insert(id, record);
    }

    fn remove(&mut self, id: &MasternodeID) -> Option<MasternodeRecord> {
        let record = self.records.remove(id)?;
        unindex(&mut self.by_service_key, &record.service_pubkey, id);
        unindex(&mut self.by_payee_script, &record.payee_script(), id);
        Some(record)
    }

    fn first_indexed<K>(&self, index: &HashMap<K, BTreeSet<MasternodeID>>, key: &K) -> Option<MasternodeRecord>
    where
        K: std::hash::Hash + Eq,
    {
        index
            .get(key)
            .and_then(|ids| ids.iter().next())
            .and_then(|id| self.records.get(id))
            .cloned()
    }
}

fn unindex<K>(index: &mut HashMap<K, BTreeSet<MasternodeID>>, key: &K, id: &MasternodeID)
where
    K: std::hash::Hash + Eq,
{
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// A change computed from a snapshot, applied later in one batch.
///
/// Each variant carries what was observed in the snapshot; the change is
/// skipped if the record moved on in the meantime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordUpdate {
    Status {
        id: MasternodeID,
        status: MasternodeStatus,
        at: u64,
        observed_sig_time: u64,
        observed_ping_time: Option<u64>,
    },
    RemoveTerminal {
        id: MasternodeID,
        status_since: u64,
    },
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub status_changes: Vec<(MasternodeID, MasternodeStatus, MasternodeStatus)>,
    pub removed: Vec<MasternodeRecord>,
}

/// Immutable point-in-time copy of the registry, sorted by collateral.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    records: Vec<MasternodeRecord>,
}

impl RegistrySnapshot {
    pub fn new(mut records: Vec<MasternodeRecord>) -> Self {
        records.sort_by(|a, b| a.collateral.cmp(&b.collateral));
        Self { records }
    }

    pub fn records(&self) -> &[MasternodeRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &MasternodeRecord> {
        self.records.iter()
    }

    pub fn get(&self, id: &MasternodeID) -> Option<&MasternodeRecord> {
        self.records
            .binary_search_by(|record| record.collateral.cmp(id))
            .ok()
            .map(|index| &self.records[index])
    }

    pub fn at_addr<'a>(&'a self, addr: &'a SocketAddr) -> impl Iterator<Item = &'a MasternodeRecord> + 'a {
        self.records.iter().filter(move |record| record.service_addr == *addr)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<MasternodeRecord> {
        self.records
    }
}

/// Masternode registry owned by the node context and shared through `Arc`.
#[derive(Debug, Default)]
pub struct MasternodeRegistry {
    state: Mutex<RegistryState>,
}

impl MasternodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a new record; fails if the collateral is already registered.
    pub fn add(&self, record: MasternodeRecord) -> Result<(), MasternodeError> {
        let mut state = self.lock();
        if state.records.contains_key(&record.collateral) {
            return Err(MasternodeError::DuplicateEntry);
        }
        state.insert(record);
        Ok(())
    }

    /// Atomically updates the existing record or inserts `make()` when absent.
    ///
    /// Returns `true` when a new record was inserted.
    pub fn upsert<M, F>(&self, id: &MasternodeID, make: M, update: F) -> Result<bool, MasternodeError>
    where
        M: FnOnce() -> MasternodeRecord,
        F: FnOnce(&mut MasternodeRecord) -> Result<(), MasternodeError>,
    {
        let mut state = self.lock();
        match state.remove(id) {
            Some(mut record) => {
                let result = update(&mut record);
                state.insert(record);
                result.map(|_| false)
            }
            None => {
                state.insert(make());
                Ok(true)
            }
        }
    }

    /// Runs `f` on the record under the lock, re-indexing afterwards.
    pub fn update<F, R>(&self, id: &MasternodeID, f: F) -> Option<R>
    where
        F: FnOnce(&mut MasternodeRecord) -> R,
    {
        let mut state = self.lock();
        let mut record = state.remove(id)?;
        let result = f(&mut record);
        debug_assert_eq!(&record.collateral, id);
        state.insert(record);
        Some(result)
    }

    /// Runs `f` on every record under one lock acquisition.
    pub fn update_all<F>(&self, mut f: F)
    where
        F: FnMut(&mut MasternodeRecord),
    {
        let mut state = self.lock();
        // Only non-indexed fields may change here.
        for record in state.records.values_mut() {
            f(record);
        }
    }

    pub fn remove(&self, id: &MasternodeID) -> Option<MasternodeRecord> {
        self.lock().remove(id)
    }

    /// Applies a batch of snapshot-derived changes in one critical section.
    pub fn apply_batch(&self, updates: Vec<RecordUpdate>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut state = self.lock();
        for update in updates {
            match update {
                RecordUpdate::Status { id, status, at, observed_sig_time, observed_ping_time } => {
                    let Some(record) = state.records.get_mut(&id) else { continue };
                    if record.sig_time != observed_sig_time || record.last_ping_time() != observed_ping_time {
                        debug!("Skipping status update for {}, record changed since snapshot", id);
                        continue;
                    }
                    if record.status == MasternodeStatus::OutpointSpent {
                        continue;
                    }
                    let previous = record.status;
                    if previous != status {
                        record.set_status(status, at);
                        outcome.status_changes.push((id, previous, status));
                    }
                }
                RecordUpdate::RemoveTerminal { id, status_since } => {
                    let still_terminal = state
                        .records
                        .get(&id)
                        .map_or(false, |r| r.status.is_terminal() && r.status_since == status_since);
                    if still_terminal {
                        if let Some(record) = state.remove(&id) {
                            outcome.removed.push(record);
                        }
                    }
                }
            }
        }
        outcome
    }

    /// Replaces the whole content, e.g. after loading a cache.
    pub fn replace_all(&self, records: Vec<MasternodeRecord>) {
        let mut state = self.lock();
        *state = RegistryState::default();
        for record in records {
            state.insert(record);
        }
    }

    pub fn clear(&self) {
        *self.lock() = RegistryState::default();
    }

    pub fn find_by_collateral(&self, id: &MasternodeID) -> Option<MasternodeRecord> {
        self.lock().records.get(id).cloned()
    }

    /// First record (by collateral order) announcing this service key.
    pub fn find_by_service_key(&self, service_pubkey: &PublicKey) -> Option<MasternodeRecord> {
        let state = self.lock();
        state.first_indexed(&state.by_service_key, service_pubkey)
    }

    pub fn find_by_payee_script(&self, script: &[u8]) -> Option<MasternodeRecord> {
        let state = self.lock();
        state.first_indexed(&state.by_payee_script, &script.to_vec())
    }

    pub fn contains(&self, id: &MasternodeID) -> bool {
        self.lock().records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Records announcing at least `min_protocol_version`.
    pub fn count(&self, min_protocol_version: u32) -> usize {
        self.lock()
            .records
            .values()
            .filter(|r| r.protocol_version >= min_protocol_version)
            .count()
    }

    pub fn count_enabled(&self, min_protocol_version: u32) -> usize {
        self.lock()
            .records
            .values()
            .filter(|r| r.is_enabled() && r.protocol_version >= min_protocol_version)
            .count()
    }

    /// Governance objects any record has voted on.
    pub fn governance_vote_hashes(&self) -> BTreeSet<Hash> {
        self.lock()
            .records
            .values()
            .flat_map(|r| r.governance_votes.keys().copied())
            .collect()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let records: Vec<MasternodeRecord> = self.lock().records.values().cloned().collect();
        RegistrySnapshot::new(records)
    }
}
