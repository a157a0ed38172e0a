//! Static per-network constants consumed by the masternode layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" | "mainnet" => Ok(Network::Mainnet),
            "test" | "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// Defines the network parameters the masternode registry depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub network: Network,
    /// Default P2P port; mainnet masternodes must announce exactly this port.
    pub default_port: u16,
    /// Confirmations a collateral output needs before its masternode is admitted.
    pub masternode_minimum_confirmations: u32,
    /// First height at which masternode payments are scheduled.
    pub masternode_payments_start_block: u64,
    /// Target block spacing in seconds.
    pub target_spacing_secs: u64,
    /// How long a fulfilled peer request is remembered (seconds).
    pub fulfilled_request_expire_secs: u64,
}

impl ChainParams {
    pub fn mainnet() -> Self {
        ChainParams {
            network: Network::Mainnet,
            default_port: 6518,
            masternode_minimum_confirmations: 15,
            masternode_payments_start_block: 20100,
            target_spacing_secs: 60,
            fulfilled_request_expire_secs: 60 * 60,
        }
    }

    pub fn testnet() -> Self {
        ChainParams {
            network: Network::Testnet,
            default_port: 16518,
            masternode_minimum_confirmations: 1,
            masternode_payments_start_block: 4010,
            target_spacing_secs: 60,
            fulfilled_request_expire_secs: 5 * 60,
        }
    }

    pub fn regtest() -> Self {
        ChainParams {
            network: Network::Regtest,
            default_port: 26518,
            masternode_minimum_confirmations: 1,
            masternode_payments_start_block: 4010,
            target_spacing_secs: 60,
            fulfilled_request_expire_secs: 5 * 60,
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
            Network::Regtest => Self::regtest(),
        }
    }

    /// Mainnet masternodes must listen on the default port, and no other
    /// network may reuse the mainnet port.
    pub fn is_valid_masternode_port(&self, port: u16) -> bool {
        match self.network {
            Network::Mainnet => port == self.default_port,
            _ => port != Self::mainnet().default_port,
        }
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::mainnet()
    }
}
