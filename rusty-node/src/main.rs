use std::fs::{self, File};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use confy::{load, store};
use rusty_masternode::{
    InMemoryChain, MasternodeManager, MasternodeRegistry, Outbound, QueuedTransport, SystemClock, CACHE_FILE_NAME,
};
use rusty_shared_types::{hash_bytes, Network};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod config;

use config::{NodeConfig, APP_NAME, CONFIG_NAME};

/// Rusty Coin masternode registry node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Network to run on (mainnet, testnet, regtest)
    #[arg(long)]
    network: Option<String>,

    /// Directory for the masternode cache
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seconds between maintenance ticks
    #[arg(long)]
    check_interval_secs: Option<u64>,

    /// Regtest only: seconds between locally produced blocks
    #[arg(long)]
    block_interval_secs: Option<u64>,

    /// Peer to request the masternode list from when there is no usable cache (repeatable)
    #[arg(long)]
    sync_peer: Vec<SocketAddr>,

    /// Set logging level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Path to the log file (optional). If not provided, logs will only go to stdout.
    #[arg(long)]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber_builder = FmtSubscriber::builder().with_max_level(args.log_level.parse::<Level>().unwrap_or(Level::INFO));
    // Keeps the background log writer alive until shutdown.
    let _log_guard = match &args.log_file {
        Some(log_file_path) => {
            let file = File::create(log_file_path).with_context(|| format!("creating log file {}", log_file_path))?;
            let (non_blocking_writer, guard) = tracing_appender::non_blocking(file);
            subscriber_builder
                .with_writer(non_blocking_writer)
                .try_init()
                .map_err(|e| anyhow::anyhow!(e))?;
            Some(guard)
        }
        None => {
            subscriber_builder.try_init().map_err(|e| anyhow::anyhow!(e))?;
            None
        }
    };

    let path = confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)?;
    info!("Configuration file path: {:?}", path);

    let mut cfg: NodeConfig = match load(APP_NAME, CONFIG_NAME) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:?}. Using default.", e);
            NodeConfig::default()
        }
    };
    cfg.apply_args(&args);
    info!("Loaded configuration: {:#?}", cfg);

    let network = cfg.network()?;
    let masternode_config = cfg.masternode_config()?;
    let data_dir = cfg.resolve_data_dir()?;
    fs::create_dir_all(&data_dir).with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let cache_path = data_dir.join(CACHE_FILE_NAME);

    let chain = Arc::new(InMemoryChain::new(hash_bytes(network.as_str().as_bytes())));
    let (transport, outgoing) = QueuedTransport::new();
    let manager = Arc::new(MasternodeManager::new(
        masternode_config,
        Arc::new(MasternodeRegistry::new()),
        chain.clone(),
        Arc::new(transport),
        Arc::new(SystemClock),
    ));

    let restored = match manager.load(&cache_path) {
        Ok(true) => {
            info!("Restored {} masternodes from {}", manager.registry().len(), cache_path.display());
            true
        }
        Ok(false) => {
            info!("No usable masternode cache at {}, starting empty", cache_path.display());
            false
        }
        Err(e) => {
            warn!("Could not read {}: {}", cache_path.display(), e);
            false
        }
    };
    if !restored {
        request_initial_sync(&manager, &cfg.sync_peers);
    }

    let (shutdown_sender, _shutdown_receiver) = broadcast::channel::<()>(1);

    tokio::spawn(run_maintenance(
        manager.clone(),
        Duration::from_secs(cfg.check_interval_secs.max(1)),
        shutdown_sender.subscribe(),
    ));
    tokio::spawn(follow_tips(manager.clone(), chain.clone(), shutdown_sender.subscribe()));
    tokio::spawn(log_outbound(outgoing, shutdown_sender.subscribe()));
    tokio::spawn(save_periodically(
        manager.clone(),
        cache_path.clone(),
        Duration::from_secs(cfg.save_interval_secs.max(1)),
        shutdown_sender.subscribe(),
    ));
    if network == Network::Regtest && cfg.block_interval_secs > 0 {
        tokio::spawn(produce_blocks(
            chain.clone(),
            Duration::from_secs(cfg.block_interval_secs),
            shutdown_sender.subscribe(),
        ));
    }

    info!("Masternode node running on {}. Press Ctrl+C to shut down gracefully.", network);

    signal::ctrl_c().await.context("listening for ctrl-c")?;
    info!("Ctrl+C received, sending shutdown signal.");
    let _ = shutdown_sender.send(());

    match manager.save(&cache_path) {
        Ok(()) => info!("Saved {} masternodes to {}", manager.registry().len(), cache_path.display()),
        Err(e) => error!("Failed to save masternode cache: {}", e),
    }

    match store(APP_NAME, CONFIG_NAME, &cfg) {
        Ok(_) => info!("Configuration updated and stored."),
        Err(e) => error!("Failed to store configuration: {:?}", e),
    };

    Ok(())
}

/// Rebuilds the registry from peers after starting without a cache.
fn request_initial_sync(manager: &MasternodeManager, peers: &[SocketAddr]) -> usize {
    if peers.is_empty() {
        warn!("No sync peers configured, the masternode list stays empty until a peer connects");
        return 0;
    }
    peers.iter().filter(|peer| manager.on_peer_connected(**peer)).count()
}

/// Periodic lifecycle pass plus proof-of-service work.
async fn run_maintenance(manager: Arc<MasternodeManager>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match manager.on_timer() {
                    Some(report) if report.status_changes > 0 || !report.removed.is_empty() => info!(
                        "Lifecycle pass: {} status changes, {} removed, {} verifications timed out",
                        report.status_changes,
                        report.removed.len(),
                        report.timed_out.len()
                    ),
                    Some(_) => debug!("Lifecycle pass: no changes"),
                    None => debug!("Lifecycle pass already running"),
                }
            }
            _ = shutdown.recv() => {
                info!("Maintenance task received shutdown signal.");
                break;
            }
        }
    }
}

async fn follow_tips(manager: Arc<MasternodeManager>, chain: Arc<InMemoryChain>, mut shutdown: broadcast::Receiver<()>) {
    let mut tips = chain.subscribe_tips();
    loop {
        tokio::select! {
            changed = tips.changed() => {
                if changed.is_err() {
                    break;
                }
                let (height, hash) = *tips.borrow_and_update();
                manager.updated_block_tip(height, &hash);
                if let Some((next, payee)) = manager.next_payees(height + 1, 1).first() {
                    debug!("Next masternode payee at height {}: {}", next, payee);
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Without a peer layer attached, outbound messages are only logged.
async fn log_outbound(mut outgoing: mpsc::UnboundedReceiver<Outbound>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            message = outgoing.recv() => match message {
                Some(Outbound::Send { peer, message }) => debug!("-> {} {}", peer, message.command()),
                Some(Outbound::Relay(message)) => debug!("-> relay {}", message.command()),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

async fn save_periodically(
    manager: Arc<MasternodeManager>,
    path: PathBuf,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = manager.save(&path) {
                    warn!("Failed to save masternode cache: {}", e);
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn produce_blocks(chain: Arc<InMemoryChain>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    let mut counter: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                counter += 1;
                let height = chain.push_block(hash_bytes(&counter.to_le_bytes()));
                debug!("Produced regtest block {}", height);
            }
            _ = shutdown.recv() => break,
        }
    }
}
