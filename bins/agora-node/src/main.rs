//! Agora full node binary.
//!
//! Starts the node coordinator: peer discovery and connections, mempool,
//! and (optionally) the proof-of-work mining loop.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use agora_network::NetworkType;
use agora_node_lib::{Node, NodeConfig};

/// Agora full node: proof of work with a quadratic-voting voice.
#[derive(Parser, Debug)]
#[command(name = "agora-node", version, about = "Agora full node daemon")]
struct Args {
    /// Path to a TOML config file; flags override file values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for peer cache and breaker snapshots.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// P2P listen port (0 = network default).
    #[arg(long)]
    port: Option<u16>,

    /// Connect to the public test network instead of mainnet.
    #[arg(long, conflicts_with = "devnet")]
    testnet: bool,

    /// Run against the local development network.
    #[arg(long, conflicts_with = "testnet")]
    devnet: bool,

    /// Start mining on boot, paying rewards to --miner-address.
    #[arg(long, requires = "miner_address")]
    auto_mine: bool,

    /// Address receiving mined rewards.
    #[arg(long)]
    miner_address: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<NodeConfig> {
        let mut config =
            NodeConfig::load(self.config.as_deref()).context("loading configuration")?;

        if self.testnet {
            config.network_type = NetworkType::Testnet;
        } else if self.devnet {
            config.network_type = NetworkType::Devnet;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.auto_mine {
            config.auto_mine = true;
        }
        if self.miner_address.is_some() {
            config.miner_address = self.miner_address;
        }
        config.log_level = self.log_level;

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = args.log_level.clone();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    let config = args.into_config()?;
    std::fs::create_dir_all(&config.data_dir).context("creating data directory")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        network = ?config.network_type,
        port = config.effective_port(),
        auto_mine = config.auto_mine,
        "starting agora-node"
    );

    let node = Node::new(config);
    let handles = node.clone().start().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(tasks = handles.len(), "node started");

    tokio::signal::ctrl_c().await.ok();
    warn!("received SIGINT, shutting down");

    node.engine.interrupt();
    for handle in handles {
        handle.abort();
    }
    node.run_maintenance();

    info!("shutdown complete");
    Ok(())
}
