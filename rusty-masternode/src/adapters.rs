//! In-process implementations of [`ChainView`] and [`PeerTransport`].
//!
//! The node wires these to its block layer and socket layer; tests drive them directly.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError, RwLock};

use log::debug;
use rusty_shared_types::{Hash, MasternodeMessage, OutPoint};
use tokio::sync::{mpsc, watch};

use crate::interfaces::{ChainView, PeerTransport};

#[derive(Debug, Clone, Copy)]
struct CollateralState {
    /// Height of the block that confirmed the output; `None` while unconfirmed.
    included_at: Option<u64>,
    spent: bool,
}

#[derive(Debug, Default)]
struct ChainState {
    /// Block hashes indexed by height.
    blocks: Vec<Hash>,
    collateral: HashMap<OutPoint, CollateralState>,
}

/// Chain view backed by a list of block hashes and a collateral table.
pub struct InMemoryChain {
    state: RwLock<ChainState>,
    tip: watch::Sender<(u64, Hash)>,
}

impl InMemoryChain {
    pub fn new(genesis: Hash) -> Self {
        let (tip, _) = watch::channel((0, genesis));
        Self {
            state: RwLock::new(ChainState { blocks: vec![genesis], collateral: HashMap::new() }),
            tip,
        }
    }

    /// Appends a block and returns its height.
    pub fn push_block(&self, hash: Hash) -> u64 {
        let height = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.blocks.push(hash);
            (state.blocks.len() - 1) as u64
        };
        self.tip.send_replace((height, hash));
        height
    }

    /// Appends blocks up to `height`, each hashed from its own height.
    pub fn extend_to(&self, height: u64) {
        let mut next = self.best_block().0 + 1;
        while next <= height {
            self.push_block(rusty_shared_types::hash_bytes(&next.to_le_bytes()));
            next += 1;
        }
    }

    /// Registers a collateral output that currently has `confirmations` confirmations.
    pub fn add_collateral(&self, outpoint: OutPoint, confirmations: u32) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let tip = (state.blocks.len() - 1) as u64;
        let included_at = match confirmations {
            0 => None,
            n => Some((tip + 1).saturating_sub(n as u64)),
        };
        state.collateral.insert(outpoint, CollateralState { included_at, spent: false });
    }

    /// Confirms a pending collateral output in the current tip.
    pub fn confirm_collateral(&self, outpoint: &OutPoint) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let tip = (state.blocks.len() - 1) as u64;
        if let Some(entry) = state.collateral.get_mut(outpoint) {
            entry.included_at.get_or_insert(tip);
        }
    }

    pub fn spend(&self, outpoint: &OutPoint) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = state.collateral.get_mut(outpoint) {
            entry.spent = true;
        }
    }

    /// Receiver notified on every new best block.
    pub fn subscribe_tips(&self) -> watch::Receiver<(u64, Hash)> {
        self.tip.subscribe()
    }
}

impl ChainView for InMemoryChain {
    fn best_block(&self) -> (u64, Hash) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let height = state.blocks.len() - 1;
        (height as u64, state.blocks[height])
    }

    fn confirmations(&self, outpoint: &OutPoint) -> u32 {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let tip = (state.blocks.len() - 1) as u64;
        match state.collateral.get(outpoint) {
            Some(CollateralState { included_at: Some(height), spent: false }) if *height <= tip => {
                (tip - height + 1) as u32
            }
            _ => 0,
        }
    }

    fn is_spent(&self, outpoint: &OutPoint) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.collateral.get(outpoint).map_or(false, |entry| entry.spent)
    }

    fn block_hash_at(&self, height: u64) -> Option<Hash> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.blocks.get(height as usize).copied()
    }
}

/// A message handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Send { peer: SocketAddr, message: MasternodeMessage },
    Relay(MasternodeMessage),
}

/// Transport that queues outbound messages on a tokio channel for the socket layer to drain.
pub struct QueuedTransport {
    outgoing: mpsc::UnboundedSender<Outbound>,
    reachable: RwLock<HashSet<SocketAddr>>,
    misbehavior: Mutex<HashMap<SocketAddr, u32>>,
}

impl QueuedTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outgoing, incoming) = mpsc::unbounded_channel();
        let transport = Self {
            outgoing,
            reachable: RwLock::new(HashSet::new()),
            misbehavior: Mutex::new(HashMap::new()),
        };
        (transport, incoming)
    }

    pub fn mark_reachable(&self, addr: SocketAddr) {
        self.reachable.write().unwrap_or_else(PoisonError::into_inner).insert(addr);
    }

    pub fn mark_unreachable(&self, addr: &SocketAddr) {
        self.reachable.write().unwrap_or_else(PoisonError::into_inner).remove(addr);
    }

    /// Accumulated misbehavior score of a peer.
    pub fn misbehavior_score(&self, peer: &SocketAddr) -> u32 {
        let scores = self.misbehavior.lock().unwrap_or_else(PoisonError::into_inner);
        scores.get(peer).copied().unwrap_or(0)
    }

    fn enqueue(&self, outbound: Outbound) {
        if let Err(err) = self.outgoing.send(outbound) {
            debug!("Dropping outbound {} message, transport closed", command(&err.0));
        }
    }
}

fn command(outbound: &Outbound) -> &'static str {
    match outbound {
        Outbound::Send { message, .. } | Outbound::Relay(message) => message.command(),
    }
}

impl PeerTransport for QueuedTransport {
    fn send(&self, peer: &SocketAddr, message: MasternodeMessage) {
        self.enqueue(Outbound::Send { peer: *peer, message });
    }

    fn relay(&self, message: MasternodeMessage) {
        self.enqueue(Outbound::Relay(message));
    }

    fn misbehaving(&self, peer: &SocketAddr, score: u32) {
        let mut scores = self.misbehavior.lock().unwrap_or_else(PoisonError::into_inner);
        *scores.entry(*peer).or_insert(0) += score;
    }

    fn is_reachable(&self, addr: &SocketAddr) -> bool {
        self.reachable.read().unwrap_or_else(PoisonError::into_inner).contains(addr)
    }
}
