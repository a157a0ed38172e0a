#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use rusty_crypto::RustyKeyPair;
use rusty_masternode::{
    ChainView, InMemoryChain, LocalMasternode, ManualClock, MasternodeConfig, MasternodeManager, MasternodeRegistry,
    Outbound, PeerInfo, QueuedTransport,
};
use rusty_shared_types::{
    ChainParams, Hash, MasternodeBroadcast, MasternodeID, MasternodePing, MasternodeStatus, OutPoint,
};
use tokio::sync::mpsc::UnboundedReceiver;

pub const START_TIME: u64 = 1_700_000_000;
pub const CHAIN_HEIGHT: u64 = 4_300;
pub const PROTOCOL_VERSION: u32 = 70206;

pub fn dummy_hash(seed: u8) -> Hash {
    [seed; 32]
}

pub fn dummy_id(seed: u8) -> MasternodeID {
    MasternodeID(OutPoint::new(dummy_hash(seed), 0))
}

pub fn peer(seed: u8) -> PeerInfo {
    PeerInfo::new(format!("192.168.0.{}:26518", seed).parse().unwrap(), PROTOCOL_VERSION)
}

pub fn regtest_config() -> MasternodeConfig {
    MasternodeConfig::for_network(ChainParams::regtest())
}

pub fn new_chain() -> Arc<InMemoryChain> {
    let chain = Arc::new(InMemoryChain::new(dummy_hash(0)));
    chain.extend_to(CHAIN_HEIGHT);
    chain
}

/// Keys and collateral of one masternode operator.
pub struct Operator {
    pub collateral: MasternodeID,
    pub collateral_key: RustyKeyPair,
    pub service_key: Arc<RustyKeyPair>,
    pub addr: SocketAddr,
}

impl Operator {
    pub fn new(seed: u8) -> Self {
        Operator {
            collateral: dummy_id(seed),
            collateral_key: RustyKeyPair::from_secret_bytes(&[seed; 32]).unwrap(),
            service_key: Arc::new(RustyKeyPair::from_secret_bytes(&[seed.wrapping_add(100); 32]).unwrap()),
            addr: format!("10.0.0.{}:26518", seed).parse().unwrap(),
        }
    }

    pub fn broadcast(&self, sig_time: u64) -> MasternodeBroadcast {
        let mut mnb = MasternodeBroadcast {
            collateral: self.collateral.clone(),
            service_addr: self.addr,
            collateral_pubkey: self.collateral_key.public_key_bytes(),
            service_pubkey: self.service_key.public_key_bytes(),
            protocol_version: PROTOCOL_VERSION,
            sig_time,
            signature: vec![],
            last_ping: None,
        };
        mnb.signature = self.collateral_key.sign_to_vec(&mnb.signing_bytes());
        mnb
    }

    pub fn ping(&self, block_hash: Hash, sig_time: u64) -> MasternodePing {
        let mut ping = MasternodePing { collateral: self.collateral.clone(), block_hash, sig_time, signature: vec![] };
        ping.signature = self.service_key.sign_to_vec(&ping.signing_bytes());
        ping
    }

    pub fn local(&self) -> LocalMasternode {
        LocalMasternode {
            collateral: self.collateral.clone(),
            service_addr: self.addr,
            service_key: Arc::clone(&self.service_key),
        }
    }
}

/// One node: a manager over in-memory collaborators.
pub struct TestNode {
    pub manager: MasternodeManager,
    pub chain: Arc<InMemoryChain>,
    pub transport: Arc<QueuedTransport>,
    pub outgoing: UnboundedReceiver<Outbound>,
    pub clock: Arc<ManualClock>,
}

impl TestNode {
    pub fn new() -> Self {
        Self::build(regtest_config(), new_chain(), Arc::new(ManualClock::new(START_TIME)), None)
    }

    pub fn with_config(config: MasternodeConfig) -> Self {
        Self::build(config, new_chain(), Arc::new(ManualClock::new(START_TIME)), None)
    }

    pub fn build(
        config: MasternodeConfig,
        chain: Arc<InMemoryChain>,
        clock: Arc<ManualClock>,
        local: Option<LocalMasternode>,
    ) -> Self {
        let (transport, outgoing) = QueuedTransport::new();
        let transport = Arc::new(transport);
        let mut manager = MasternodeManager::new(
            config,
            Arc::new(MasternodeRegistry::new()),
            chain.clone(),
            transport.clone(),
            clock.clone(),
        );
        if let Some(local) = local {
            manager = manager.with_local_masternode(local);
        }
        TestNode { manager, chain, transport, outgoing, clock }
    }

    pub fn now(&self) -> u64 {
        use rusty_masternode::Clock;
        self.clock.now()
    }

    pub fn tip_hash(&self) -> Hash {
        self.chain.best_block().1
    }

    /// Gives the operator's collateral `confirmations` and processes its broadcast.
    pub fn announce(&self, operator: &Operator, confirmations: u32) -> MasternodeBroadcast {
        self.chain.add_collateral(operator.collateral.0.clone(), confirmations);
        let mnb = operator.broadcast(self.now());
        self.manager.process_broadcast(&peer(1), &mnb).unwrap();
        mnb
    }

    /// Processes a fresh ping from every operator.
    pub fn ping_all(&self, operators: &[&Operator]) {
        for operator in operators {
            let ping = operator.ping(self.tip_hash(), self.now());
            self.manager.process_ping(&peer(1), &ping).unwrap();
        }
    }

    /// Announces the operators and pings them once the minimum ping interval has passed.
    pub fn enable(&self, operators: &[&Operator]) {
        for operator in operators {
            self.announce(operator, 20);
        }
        self.clock.advance(self.manager.config().min_ping_interval_secs);
        self.ping_all(operators);
    }

    pub fn status(&self, id: &MasternodeID) -> Option<MasternodeStatus> {
        self.manager.registry().find_by_collateral(id).map(|record| record.status)
    }

    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outgoing.try_recv() {
            messages.push(message);
        }
        messages
    }
}
