//! Per-peer, per-message-kind rate limiting with a sliding 60-second
//! window.
//!
//! Each peer keeps one timestamp queue per message kind. On every check
//! the queue is pruned to the window, then its length is compared against
//! the kind's limit. Over-limit messages are dropped silently; only the
//! DDoS counter increments.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::debug;

/// The sliding window duration.
const WINDOW: Duration = Duration::from_secs(60);

/// Per-kind message limits per window.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub blocks_per_min: usize,
    pub txs_per_min: usize,
    pub invs_per_min: usize,
    pub getdata_per_min: usize,
    pub addrs_per_min: usize,
    pub pings_per_min: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            blocks_per_min: 30,
            txs_per_min: 600,
            invs_per_min: 300,
            getdata_per_min: 300,
            addrs_per_min: 30,
            pings_per_min: 60,
        }
    }
}

impl RateLimitConfig {
    /// The window limit for a message kind. Unlisted kinds (handshakes)
    /// are not rate limited.
    fn limit_for(&self, kind: &str) -> Option<usize> {
        match kind {
            "block" => Some(self.blocks_per_min),
            "tx" => Some(self.txs_per_min),
            "inv" => Some(self.invs_per_min),
            "getdata" => Some(self.getdata_per_min),
            "addr" => Some(self.addrs_per_min),
            "ping" | "pong" => Some(self.pings_per_min),
            _ => None,
        }
    }
}

#[derive(Default)]
struct PeerWindows {
    by_kind: HashMap<&'static str, VecDeque<Instant>>,
}

/// Sliding-window rate limiter over all connected peers.
pub struct RateLimiter {
    config: RateLimitConfig,
    peers: HashMap<SocketAddr, PeerWindows>,
    /// Messages dropped over-limit since startup.
    dropped: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            peers: HashMap::new(),
            dropped: 0,
        }
    }

    fn prune(queue: &mut VecDeque<Instant>) {
        let cutoff = Instant::now() - WINDOW;
        while queue.front().is_some_and(|t| *t <= cutoff) {
            queue.pop_front();
        }
    }

    /// Whether a message of `kind` from `peer` is within its limit.
    ///
    /// Over-limit messages should be dropped without a reply; this method
    /// counts the drop. Kinds without a configured limit always pass.
    pub fn check(&mut self, peer: SocketAddr, kind: &'static str) -> bool {
        let Some(limit) = self.config.limit_for(kind) else {
            return true;
        };

        let queue = self
            .peers
            .entry(peer)
            .or_default()
            .by_kind
            .entry(kind)
            .or_default();
        Self::prune(queue);

        let ok = queue.len() < limit;
        if !ok {
            self.dropped += 1;
            debug!(%peer, kind, count = queue.len(), limit, "rate_limiter: over limit, dropping");
        }
        ok
    }

    /// Record a processed message of `kind` from `peer`.
    pub fn record(&mut self, peer: SocketAddr, kind: &'static str) {
        if self.config.limit_for(kind).is_none() {
            return;
        }
        self.peers
            .entry(peer)
            .or_default()
            .by_kind
            .entry(kind)
            .or_default()
            .push_back(Instant::now());
    }

    /// Drop tracking for a disconnected peer.
    pub fn remove_peer(&mut self, peer: &SocketAddr) {
        self.peers.remove(peer);
    }

    /// Messages dropped over-limit since startup (the DDoS counter).
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
