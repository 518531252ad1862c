//! Node configuration.
//!
//! [`NodeConfig`] carries the recognized node options with sane defaults
//! and can be loaded from a TOML file plus `AGORA_`-prefixed environment
//! variables. Durations travel as seconds in the file format.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use agora_network::{NetworkConfig, NetworkType};

/// Configuration for a full node instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Which network to join (selects seeds and default ports).
    pub network_type: NetworkType,
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Peer listen port; `0` means the network's default.
    pub port: u16,
    /// Outbound connection ceiling.
    pub max_peers: usize,
    /// Below this many peers a warning is logged each maintenance tick.
    pub min_peers: usize,
    /// Per-peer socket timeout, seconds.
    pub connection_timeout_secs: u64,
    /// Maintenance tick, seconds.
    pub prune_interval_secs: u64,
    /// Ban threshold for peer misbehavior scores.
    pub max_ban_score: u32,
    /// Ban duration, seconds.
    pub ban_time_secs: u64,
    /// Orphan pool cap (applies to blocks and transactions separately).
    pub max_orphans: usize,
    /// Start the mining loop on boot.
    pub auto_mine: bool,
    /// Address receiving mined rewards; required when `auto_mine` is set.
    pub miner_address: Option<String>,
    /// Log filter string (e.g. "info", "agora_node=debug").
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agora");
        Self {
            network_type: NetworkType::Mainnet,
            data_dir,
            port: 0,
            max_peers: 125,
            min_peers: 8,
            connection_timeout_secs: 10,
            prune_interval_secs: 3600,
            max_ban_score: 100,
            ban_time_secs: 24 * 60 * 60,
            max_orphans: 100,
            auto_mine: false,
            miner_address: None,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from an optional TOML file layered under
    /// `AGORA_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("AGORA"));
        let loaded: NodeConfig = builder.build()?.try_deserialize()?;
        Ok(loaded)
    }

    /// The effective listen port (resolving `0` to the network default).
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            self.network_type.default_port()
        } else {
            self.port
        }
    }

    /// Derive the network layer's configuration.
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            port: self.effective_port(),
            max_peers: self.max_peers,
            min_peers: self.min_peers,
            connection_timeout: Duration::from_secs(self.connection_timeout_secs),
            ..NetworkConfig::for_network(self.network_type)
        }
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn ban_time(&self) -> Duration {
        Duration::from_secs(self.ban_time_secs)
    }

    /// Where the discovery peer cache persists.
    pub fn peer_cache_path(&self) -> PathBuf {
        self.data_dir.join("peers.json")
    }

    /// Where circuit-breaker snapshots persist.
    pub fn breaker_snapshot_path(&self) -> PathBuf {
        self.data_dir.join("breakers.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.network_type, NetworkType::Mainnet);
        assert_eq!(cfg.max_peers, 125);
        assert_eq!(cfg.max_ban_score, 100);
        assert_eq!(cfg.ban_time_secs, 24 * 60 * 60);
        assert_eq!(cfg.prune_interval_secs, 3600);
        assert!(!cfg.auto_mine);
        assert!(cfg.data_dir.ends_with("agora"));
    }

    #[test]
    fn effective_port_resolves_zero() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.effective_port(), NetworkType::Mainnet.default_port());

        let cfg = NodeConfig { port: 9000, ..NodeConfig::default() };
        assert_eq!(cfg.effective_port(), 9000);
    }

    #[test]
    fn network_config_inherits_fields() {
        let cfg = NodeConfig {
            max_peers: 7,
            min_peers: 2,
            connection_timeout_secs: 3,
            ..NodeConfig::default()
        };
        let net = cfg.network_config();
        assert_eq!(net.max_peers, 7);
        assert_eq!(net.min_peers, 2);
        assert_eq!(net.connection_timeout, Duration::from_secs(3));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = NodeConfig::load(None).unwrap();
        assert_eq!(cfg.max_peers, 125);
    }

    #[test]
    fn load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agora.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "network_type = \"testnet\"\nmax_peers = 50\nauto_mine = true\nminer_address = \"ag1miner\""
        )
        .unwrap();

        let cfg = NodeConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.network_type, NetworkType::Testnet);
        assert_eq!(cfg.max_peers, 50);
        assert!(cfg.auto_mine);
        assert_eq!(cfg.miner_address.as_deref(), Some("ag1miner"));
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.min_peers, 8);
    }

    #[test]
    fn paths_live_under_data_dir() {
        let cfg = NodeConfig { data_dir: PathBuf::from("/tmp/agora-test"), ..NodeConfig::default() };
        assert_eq!(cfg.peer_cache_path(), PathBuf::from("/tmp/agora-test/peers.json"));
        assert_eq!(
            cfg.breaker_snapshot_path(),
            PathBuf::from("/tmp/agora-test/breakers.json")
        );
    }
}
