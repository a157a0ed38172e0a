//! Registry synchronization between peers.

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use rusty_shared_types::{MasternodeID, MasternodeMessage, MasternodeRecord, MasternodeStatus, SyncScope};
use serde::{Deserialize, Serialize};

use crate::config::MasternodeConfig;
use crate::error::MasternodeError;
use crate::interfaces::{ChainView, PeerTransport};
use crate::registry::MasternodeRegistry;
use crate::throttle::RequestThrottle;

/// The only view of the registry the sync driver gets.
pub trait SyncSource: Send + Sync {
    /// Copies of the records a request for `scope` covers.
    fn sync_entries(&self, scope: &SyncScope) -> Vec<MasternodeRecord>;
}

impl SyncSource for MasternodeRegistry {
    fn sync_entries(&self, scope: &SyncScope) -> Vec<MasternodeRecord> {
        match scope {
            SyncScope::FullList => self.snapshot().into_records(),
            SyncScope::Entry(id) => self.find_by_collateral(id).into_iter().collect(),
        }
    }
}

/// Rate limits for both directions of sync traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncThrottles {
    /// Peers that asked us for the full list
    pub asked_us_for_list: RequestThrottle<SocketAddr>,
    /// Peers that asked us for one entry
    pub asked_us_for_entry: RequestThrottle<(SocketAddr, MasternodeID)>,
    /// Peers we asked for the full list
    pub we_asked_for_list: RequestThrottle<SocketAddr>,
    /// Entries we asked any peer for
    pub we_asked_for_entry: RequestThrottle<MasternodeID>,
}

impl SyncThrottles {
    pub fn new(config: &MasternodeConfig) -> Self {
        Self {
            asked_us_for_list: RequestThrottle::new(config.dseg_update_secs),
            asked_us_for_entry: RequestThrottle::new(config.dseg_update_secs),
            we_asked_for_list: RequestThrottle::new(config.dseg_update_secs),
            we_asked_for_entry: RequestThrottle::new(config.dseg_update_secs),
        }
    }

    pub fn prune(&mut self, now: u64) {
        self.asked_us_for_list.prune(now);
        self.asked_us_for_entry.prune(now);
        self.we_asked_for_list.prune(now);
        self.we_asked_for_entry.prune(now);
    }
}

/// Answers and issues sync requests.
pub struct SyncDriver {
    min_confirmations: u32,
    throttles: Mutex<SyncThrottles>,
}

impl SyncDriver {
    pub fn new(config: &MasternodeConfig) -> Self {
        Self { min_confirmations: config.min_confirmations(), throttles: Mutex::new(SyncThrottles::new(config)) }
    }

    fn throttles(&self) -> MutexGuard<'_, SyncThrottles> {
        self.throttles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn export_throttles(&self) -> SyncThrottles {
        self.throttles().clone()
    }

    pub fn restore_throttles(&self, throttles: SyncThrottles) {
        *self.throttles() = throttles;
    }

    pub fn prune(&self, now: u64) {
        self.throttles().prune(now);
    }

    /// Streams the requested entries to `peer`, returning how many were sent.
    pub fn handle_sync_request<S: SyncSource + ?Sized>(
        &self,
        source: &S,
        chain: &dyn ChainView,
        transport: &dyn PeerTransport,
        peer: SocketAddr,
        scope: &SyncScope,
        now: u64,
    ) -> Result<usize, MasternodeError> {
        let allowed = {
            let mut throttles = self.throttles();
            match scope {
                SyncScope::FullList => throttles.asked_us_for_list.check_and_record(peer, now),
                SyncScope::Entry(id) => throttles.asked_us_for_entry.check_and_record((peer, id.clone()), now),
            }
        };
        if !allowed {
            debug!("Ignoring repeated sync request from {}", peer);
            return Err(MasternodeError::ThrottleViolation);
        }

        let entries: Vec<MasternodeRecord> = source
            .sync_entries(scope)
            .into_iter()
            .filter(|record| self.is_shareable(record, chain))
            .collect();

        for record in &entries {
            transport.send(&peer, MasternodeMessage::Broadcast(record.to_broadcast()));
            if let Some(ping) = &record.last_ping {
                transport.send(&peer, MasternodeMessage::Ping(ping.clone()));
            }
        }

        match scope {
            SyncScope::FullList => {
                transport.send(&peer, MasternodeMessage::SyncStatusCount { count: entries.len() as u32 });
                info!("Sent {} masternode entries to {}", entries.len(), peer);
            }
            SyncScope::Entry(id) => {
                if entries.is_empty() {
                    debug!("Peer {} asked for unknown or unshareable masternode {}", peer, id);
                }
            }
        }
        Ok(entries.len())
    }

    fn is_shareable(&self, record: &MasternodeRecord, chain: &dyn ChainView) -> bool {
        !matches!(record.status, MasternodeStatus::PoseBanned | MasternodeStatus::OutpointSpent)
            && chain.confirmations(&record.collateral.0) >= self.min_confirmations
    }

    /// Asks `peer` for its whole list, at most once per interval per peer.
    pub fn request_full_list(&self, transport: &dyn PeerTransport, peer: SocketAddr, now: u64) -> Result<(), MasternodeError> {
        if !self.throttles().we_asked_for_list.check_and_record(peer, now) {
            debug!("Already asked {} for the masternode list", peer);
            return Err(MasternodeError::ThrottleViolation);
        }
        transport.send(&peer, MasternodeMessage::SyncRequest(SyncScope::FullList));
        Ok(())
    }

    /// Asks `peer` for a single entry, at most once per interval per entry.
    pub fn ask_for_entry(
        &self,
        transport: &dyn PeerTransport,
        peer: SocketAddr,
        id: &MasternodeID,
        now: u64,
    ) -> Result<(), MasternodeError> {
        if !self.throttles().we_asked_for_entry.check_and_record(id.clone(), now) {
            return Err(MasternodeError::ThrottleViolation);
        }
        debug!("Asking {} for masternode {}", peer, id);
        transport.send(&peer, MasternodeMessage::SyncRequest(SyncScope::Entry(id.clone())));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryChain, Outbound, QueuedTransport};
    use rusty_shared_types::{ChainParams, MasternodeBroadcast, OutPoint};

    fn dummy_id(n: u8) -> MasternodeID {
        MasternodeID(OutPoint::new([n; 32], 0))
    }

    fn record(n: u8, status: MasternodeStatus) -> MasternodeRecord {
        let mnb = MasternodeBroadcast {
            collateral: dummy_id(n),
            service_addr: format!("10.0.0.{}:26518", n).parse().unwrap(),
            collateral_pubkey: [n; 32],
            service_pubkey: [n; 32],
            protocol_version: 70206,
            sig_time: 100,
            signature: vec![],
            last_ping: None,
        };
        let mut record = MasternodeRecord::from_broadcast(&mnb, 100);
        record.status = status;
        record
    }

    struct Fixed(Vec<MasternodeRecord>);

    impl SyncSource for Fixed {
        fn sync_entries(&self, scope: &SyncScope) -> Vec<MasternodeRecord> {
            match scope {
                SyncScope::FullList => self.0.clone(),
                SyncScope::Entry(id) => self.0.iter().filter(|r| &r.collateral == id).cloned().collect(),
            }
        }
    }

    #[test]
    fn test_full_list_excludes_banned_spent_and_unconfirmed() {
        let config = MasternodeConfig::for_network(ChainParams::regtest());
        let chain = InMemoryChain::new([0; 32]);
        chain.extend_to(10);
        for n in 1..=3 {
            chain.add_collateral(dummy_id(n).0, 5);
        }
        chain.add_collateral(dummy_id(4).0, 0);
        let source = Fixed(vec![
            record(1, MasternodeStatus::Enabled),
            record(2, MasternodeStatus::PoseBanned),
            record(3, MasternodeStatus::OutpointSpent),
            record(4, MasternodeStatus::PreEnabled),
        ]);
        let (transport, mut outgoing) = QueuedTransport::new();
        let driver = SyncDriver::new(&config);
        let peer: SocketAddr = "10.1.1.1:26518".parse().unwrap();

        let sent = driver.handle_sync_request(&source, &chain, &transport, peer, &SyncScope::FullList, 1_000).unwrap();
        assert_eq!(sent, 1);

        let mut messages = Vec::new();
        while let Ok(Outbound::Send { message, .. }) = outgoing.try_recv() {
            messages.push(message);
        }
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], MasternodeMessage::Broadcast(mnb) if mnb.collateral == dummy_id(1)));
        assert_eq!(messages[1], MasternodeMessage::SyncStatusCount { count: 1 });
    }

    #[test]
    fn test_repeated_full_list_is_throttled_per_peer() {
        let config = MasternodeConfig::for_network(ChainParams::regtest());
        let chain = InMemoryChain::new([0; 32]);
        let (transport, _outgoing) = QueuedTransport::new();
        let driver = SyncDriver::new(&config);
        let source = Fixed(vec![]);
        let a: SocketAddr = "10.1.1.1:26518".parse().unwrap();
        let b: SocketAddr = "10.1.1.2:26518".parse().unwrap();

        assert!(driver.handle_sync_request(&source, &chain, &transport, a, &SyncScope::FullList, 0).is_ok());
        assert!(matches!(
            driver.handle_sync_request(&source, &chain, &transport, a, &SyncScope::FullList, 60),
            Err(MasternodeError::ThrottleViolation)
        ));
        assert!(driver.handle_sync_request(&source, &chain, &transport, b, &SyncScope::FullList, 60).is_ok());
        assert!(driver
            .handle_sync_request(&source, &chain, &transport, a, &SyncScope::FullList, config.dseg_update_secs)
            .is_ok());
        assert_eq!(transport.misbehavior_score(&a), 0);
    }

    #[test]
    fn test_entry_requests_are_tracked_per_collateral() {
        let config = MasternodeConfig::default();
        let chain = InMemoryChain::new([0; 32]);
        let (transport, mut outgoing) = QueuedTransport::new();
        let driver = SyncDriver::new(&config);
        let peer: SocketAddr = "10.1.1.1:6518".parse().unwrap();
        let source = Fixed(vec![]);

        assert!(driver.handle_sync_request(&source, &chain, &transport, peer, &SyncScope::Entry(dummy_id(1)), 0).is_ok());
        assert!(driver.handle_sync_request(&source, &chain, &transport, peer, &SyncScope::Entry(dummy_id(2)), 0).is_ok());
        assert!(driver.handle_sync_request(&source, &chain, &transport, peer, &SyncScope::Entry(dummy_id(1)), 1).is_err());

        assert!(driver.ask_for_entry(&transport, peer, &dummy_id(1), 0).is_ok());
        assert!(driver.ask_for_entry(&transport, "10.1.1.2:6518".parse().unwrap(), &dummy_id(1), 5).is_err());
        assert!(driver.request_full_list(&transport, peer, 0).is_ok());
        assert!(driver.request_full_list(&transport, peer, 10).is_err());

        let mut sent = 0;
        while outgoing.try_recv().is_ok() {
            sent += 1;
        }
        assert_eq!(sent, 2);
    }
}
