//! Per-key request rate limiting.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Remembers when each key last made a request and allows one request per interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestThrottle<K: Eq + Hash> {
    interval_secs: u64,
    last_request: HashMap<K, u64>,
}

impl<K: Eq + Hash> RequestThrottle<K> {
    pub fn new(interval_secs: u64) -> Self {
        Self { interval_secs, last_request: HashMap::new() }
    }

    /// Records the request and returns `true` if `key` is outside its interval.
    pub fn check_and_record(&mut self, key: K, now: u64) -> bool {
        if let Some(last) = self.last_request.get(&key) {
            if now < last.saturating_add(self.interval_secs) {
                return false;
            }
        }
        self.last_request.insert(key, now);
        true
    }

    pub fn last_request(&self, key: &K) -> Option<u64> {
        self.last_request.get(key).copied()
    }

    /// Drops entries whose interval has passed.
    pub fn prune(&mut self, now: u64) {
        let interval = self.interval_secs;
        self.last_request.retain(|_, last| now < last.saturating_add(interval));
    }

    pub fn len(&self) -> usize {
        self.last_request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_request.is_empty()
    }
}
