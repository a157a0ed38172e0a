use std::sync::{Mutex, PoisonError};

use rusty_shared_types::Hash;

/// Governance objects whose vote tallies must be recomputed.
///
/// Filled when masternodes carrying votes leave the registry; drained by the
/// governance subsystem. Entries may repeat; consumers treat them as a set.
#[derive(Debug, Default)]
pub struct GovernanceDirtyQueue {
    hashes: Mutex<Vec<Hash>>,
}

impl GovernanceDirtyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, hash: Hash) {
        self.hashes.lock().unwrap_or_else(PoisonError::into_inner).push(hash);
    }

    pub fn extend<I: IntoIterator<Item = Hash>>(&self, hashes: I) {
        self.hashes.lock().unwrap_or_else(PoisonError::into_inner).extend(hashes);
    }

    /// Returns every queued hash and empties the queue in one step.
    pub fn drain(&self) -> Vec<Hash> {
        std::mem::take(&mut *self.hashes.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.hashes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
