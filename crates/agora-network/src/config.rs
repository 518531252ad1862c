//! Network configuration.

use std::time::Duration;

use agora_core::constants::DEFAULT_P2P_PORT;

/// Which deployment network this node joins. Selects the seed set and the
/// default listen port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
    Devnet,
}

impl NetworkType {
    /// Built-in DNS seed domains for this network.
    pub fn seed_domains(&self) -> Vec<String> {
        let seeds: &[&str] = match self {
            NetworkType::Mainnet => &[
                "seed1.agorachain.org",
                "seed2.agorachain.org",
                "seed.agora-nodes.net",
            ],
            NetworkType::Testnet => &["test-seed1.agorachain.org", "test-seed2.agorachain.org"],
            NetworkType::Devnet => &[],
        };
        seeds.iter().map(|s| s.to_string()).collect()
    }

    /// Default P2P listen port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            NetworkType::Mainnet => DEFAULT_P2P_PORT,
            NetworkType::Testnet => DEFAULT_P2P_PORT + 1,
            NetworkType::Devnet => DEFAULT_P2P_PORT + 2,
        }
    }
}

/// Configuration for the P2P layer.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network_type: NetworkType,
    /// IP address to listen on.
    pub listen_addr: String,
    /// TCP listen port.
    pub port: u16,
    /// Outbound connection ceiling.
    pub max_peers: usize,
    /// Below this many peers the coordinator logs a warning.
    pub min_peers: usize,
    /// Per-peer socket timeout.
    pub connection_timeout: Duration,
    /// DNS seed domains; defaults to the network's built-in set.
    pub seed_domains: Vec<String>,
    /// Retries per seed during a discovery pass.
    pub max_retries: u32,
    /// Base delay between seed retries (scales with the attempt number).
    pub retry_delay: Duration,
    /// Timeout for one DNS lookup.
    pub resolve_timeout: Duration,
    /// Seed failures before the seed is dropped from the cache.
    pub ban_threshold: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::for_network(NetworkType::Mainnet)
    }
}

impl NetworkConfig {
    /// Defaults for a given network.
    pub fn for_network(network_type: NetworkType) -> Self {
        Self {
            network_type,
            listen_addr: "0.0.0.0".to_string(),
            port: network_type.default_port(),
            max_peers: 125,
            min_peers: 8,
            connection_timeout: Duration::from_secs(10),
            seed_domains: network_type.seed_domains(),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            resolve_timeout: Duration::from_secs(5),
            ban_threshold: 5,
        }
    }

    /// The socket address string this node listens on.
    pub fn listen_socket(&self) -> String {
        format!("{}:{}", self.listen_addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_mainnet() {
        let cfg = NetworkConfig::default();
        assert_eq!(cfg.network_type, NetworkType::Mainnet);
        assert_eq!(cfg.port, DEFAULT_P2P_PORT);
        assert!(!cfg.seed_domains.is_empty());
    }

    #[test]
    fn networks_get_distinct_ports() {
        let mainnet = NetworkType::Mainnet.default_port();
        let testnet = NetworkType::Testnet.default_port();
        let devnet = NetworkType::Devnet.default_port();
        assert_ne!(mainnet, testnet);
        assert_ne!(testnet, devnet);
    }

    #[test]
    fn devnet_has_no_seeds() {
        assert!(NetworkType::Devnet.seed_domains().is_empty());
        let cfg = NetworkConfig::for_network(NetworkType::Devnet);
        assert!(cfg.seed_domains.is_empty());
    }

    #[test]
    fn max_peers_default_is_sane() {
        // Deliberately far below the reference deployment's 100000.
        assert_eq!(NetworkConfig::default().max_peers, 125);
    }

    #[test]
    fn listen_socket_format() {
        let cfg = NetworkConfig::default();
        assert_eq!(cfg.listen_socket(), format!("0.0.0.0:{DEFAULT_P2P_PORT}"));
    }
}
