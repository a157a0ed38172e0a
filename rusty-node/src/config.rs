use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use rusty_masternode::MasternodeConfig;
use rusty_shared_types::{ChainParams, Network};
use serde::{Deserialize, Serialize};

use crate::Args;

pub const APP_NAME: &str = "rusty-masternode";
pub const CONFIG_NAME: &str = "node-config";

/// Persistent node settings, stored with confy between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub network: String,
    /// Directory holding the masternode cache. Defaults to the config directory.
    pub data_dir: Option<PathBuf>,
    /// Seconds between maintenance ticks (lifecycle pass, proof-of-service step).
    pub check_interval_secs: u64,
    /// Seconds between cache snapshots.
    pub save_interval_secs: u64,
    /// Regtest only: seconds between locally produced blocks, 0 disables.
    pub block_interval_secs: u64,
    /// Peers asked for the full masternode list when there is no usable cache.
    #[serde(default)]
    pub sync_peers: Vec<SocketAddr>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            data_dir: None,
            check_interval_secs: 60,
            save_interval_secs: 5 * 60,
            block_interval_secs: 0,
            sync_peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Command line arguments take precedence over the stored configuration.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(network) = &args.network {
            self.network = network.clone();
        }
        if let Some(data_dir) = &args.data_dir {
            self.data_dir = Some(data_dir.clone());
        }
        if let Some(secs) = args.check_interval_secs {
            self.check_interval_secs = secs;
        }
        if let Some(secs) = args.block_interval_secs {
            self.block_interval_secs = secs;
        }
        if !args.sync_peer.is_empty() {
            self.sync_peers = args.sync_peer.clone();
        }
    }

    pub fn network(&self) -> anyhow::Result<Network> {
        self.network.parse::<Network>().map_err(|e| anyhow!(e))
    }

    pub fn masternode_config(&self) -> anyhow::Result<MasternodeConfig> {
        Ok(MasternodeConfig::for_network(ChainParams::for_network(self.network()?)))
    }

    pub fn resolve_data_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let path = confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
            .context("locating configuration directory")?;
        path.parent()
            .map(|dir| dir.join(&self.network))
            .ok_or_else(|| anyhow!("configuration path {} has no parent", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    #[test]
    fn test_args_override_stored_values() {
        let mut cfg = NodeConfig::default();
        let args = Args::parse_from([
            "rusty-node",
            "--network",
            "regtest",
            "--check-interval-secs",
            "5",
            "--sync-peer",
            "127.0.0.1:26518",
            "--sync-peer",
            "127.0.0.2:26518",
        ]);
        cfg.apply_args(&args);

        assert_eq!(cfg.network, "regtest");
        assert_eq!(cfg.check_interval_secs, 5);
        assert_eq!(cfg.save_interval_secs, NodeConfig::default().save_interval_secs);
        assert_eq!(cfg.network().unwrap(), Network::Regtest);
        assert_eq!(cfg.masternode_config().unwrap().min_confirmations(), 1);
        assert_eq!(cfg.sync_peers.len(), 2);
    }

    #[test]
    fn test_unknown_network_is_an_error() {
        let cfg = NodeConfig { network: "moonnet".into(), ..NodeConfig::default() };
        assert!(cfg.network().is_err());
        assert!(cfg.masternode_config().is_err());
    }

    #[test]
    fn test_config_round_trips_through_confy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node-config.toml");
        let cfg = NodeConfig {
            network: "testnet".into(),
            data_dir: Some(dir.path().to_path_buf()),
            block_interval_secs: 30,
            sync_peers: vec!["10.0.0.1:6518".parse().unwrap()],
            ..NodeConfig::default()
        };
        confy::store_path(&path, &cfg).unwrap();
        let loaded: NodeConfig = confy::load_path(&path).unwrap();
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.resolve_data_dir().unwrap(), dir.path());
    }

    #[test]
    fn test_config_without_sync_peers_still_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node-config.toml");
        std::fs::write(
            &path,
            "network = \"regtest\"\ncheck_interval_secs = 60\nsave_interval_secs = 300\nblock_interval_secs = 0\n",
        )
        .unwrap();
        let loaded: NodeConfig = confy::load_path(&path).unwrap();
        assert_eq!(loaded.network, "regtest");
        assert!(loaded.sync_peers.is_empty());
    }
}
