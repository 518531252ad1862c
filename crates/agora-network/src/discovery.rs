//! DNS-seed peer discovery.
//!
//! A discovery pass resolves the configured seed domains (three lookups
//! raced per seed: IPv4, IPv6, and generic, each under a timeout, with
//! per-seed retries), merges the results into a ranked peer cache, and
//! returns the best candidates. Passes are single-flight: one runs at a
//! time and callers arriving during a pass receive its result. The whole
//! pass sits behind the seeder's circuit breaker, so repeated total
//! failures fast-fail until the reset window.
//!
//! Seeds that keep failing are dropped from the seed table at the ban
//! threshold; peers go stale when unseen for twice the connection
//! timeout. Every eviction fires the observable hook so metrics and the
//! audit log can record it.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use agora_core::breaker::CircuitRegistry;
use agora_core::constants::NODE_NETWORK;
use agora_core::error::DiscoveryError;

use crate::config::NetworkConfig;

/// Circuit-breaker endpoint key for the whole seeder.
pub const SEEDER_ENDPOINT: &str = "dns-seeder";

/// A completed pass satisfies callers arriving within this window, so
/// concurrent requests share one resolution.
const PASS_RESULT_TTL_MS: u64 = 2_000;

/// Resolves seed domains to addresses. The concrete DNS binding is an
/// external collaborator; [`TokioResolver`] is the default.
#[async_trait]
pub trait SeedResolver: Send + Sync {
    async fn resolve_v4(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError>;
    async fn resolve_v6(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError>;
    async fn resolve_any(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError>;
}

/// Default resolver backed by the runtime's `lookup_host`.
pub struct TokioResolver {
    port: u16,
}

impl TokioResolver {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    async fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
        let addrs = tokio::net::lookup_host((domain, self.port))
            .await
            .map_err(|e| DiscoveryError::ResolutionFailed {
                domain: domain.to_string(),
                reason: e.to_string(),
            })?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

#[async_trait]
impl SeedResolver for TokioResolver {
    async fn resolve_v4(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
        Ok(self
            .lookup(domain)
            .await?
            .into_iter()
            .filter(IpAddr::is_ipv4)
            .collect())
    }

    async fn resolve_v6(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
        Ok(self
            .lookup(domain)
            .await?
            .into_iter()
            .filter(IpAddr::is_ipv6)
            .collect())
    }

    async fn resolve_any(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
        self.lookup(domain).await
    }
}

/// Strict seed-domain check: dotted labels of alphanumerics and interior
/// hyphens, an alphabetic TLD of at least two characters, and at most 253
/// characters overall.
pub fn is_valid_seed_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    for label in &labels {
        if label.is_empty()
            || label.len() > 63
            || label.starts_with('-')
            || label.ends_with('-')
            || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return false;
        }
    }
    let tld = labels[labels.len() - 1];
    tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
}

/// Parse a peer address string, discarding anything malformed (IPv4 with
/// out-of-range octets, non-hex IPv6, junk).
pub fn validate_address(s: &str) -> Option<IpAddr> {
    s.parse::<IpAddr>().ok()
}

/// A known peer in the discovery cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerCandidate {
    pub address: SocketAddr,
    /// Advertised service bits.
    pub services: u64,
    /// Milliseconds since the Unix epoch.
    pub last_seen_ms: u64,
    pub attempts: u32,
    pub failures: u32,
    /// Smoothed latency sample, milliseconds.
    pub latency_ms: u64,
}

impl PeerCandidate {
    /// Ranking score: `100 − 10·failures − latency/100 − 2·hours_unseen`,
    /// clamped at zero.
    pub fn score(&self, now_ms: u64) -> u64 {
        let hours_unseen = now_ms.saturating_sub(self.last_seen_ms) / (60 * 60 * 1000);
        let penalty =
            10 * self.failures as i64 + (self.latency_ms / 100) as i64 + 2 * hours_unseen as i64;
        (100 - penalty).max(0) as u64
    }
}

/// Per-seed resolution statistics.
#[derive(Debug, Clone, Default)]
struct SeedStats {
    last_seen_ms: u64,
    latency_ms: u64,
    attempts: u32,
    failures: u32,
}

type EvictionHook = Box<dyn Fn(&str) + Send + Sync>;

/// DNS-seed discovery and the ranked peer cache.
pub struct PeerDiscovery {
    config: NetworkConfig,
    resolver: Arc<dyn SeedResolver>,
    breakers: Arc<CircuitRegistry>,
    cache: Mutex<HashMap<SocketAddr, PeerCandidate>>,
    seeds: Mutex<HashMap<String, SeedStats>>,
    /// Single-flight pass gate.
    pass_lock: tokio::sync::Mutex<()>,
    /// Most recent pass result, shared with callers that queued behind it.
    recent: Mutex<Option<(u64, Vec<SocketAddr>)>>,
    eviction_hook: Mutex<Option<EvictionHook>>,
    clock_ms: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl PeerDiscovery {
    pub fn new(
        config: NetworkConfig,
        resolver: Arc<dyn SeedResolver>,
        breakers: Arc<CircuitRegistry>,
    ) -> Self {
        Self::with_clock(config, resolver, breakers, || {
            chrono::Utc::now().timestamp_millis() as u64
        })
    }

    /// Like [`new`](Self::new) but with an injected millisecond clock.
    pub fn with_clock(
        config: NetworkConfig,
        resolver: Arc<dyn SeedResolver>,
        breakers: Arc<CircuitRegistry>,
        clock_ms: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            resolver,
            breakers,
            cache: Mutex::new(HashMap::new()),
            seeds: Mutex::new(HashMap::new()),
            pass_lock: tokio::sync::Mutex::new(()),
            recent: Mutex::new(None),
            eviction_hook: Mutex::new(None),
            clock_ms: Box::new(clock_ms),
        }
    }

    /// Register the eviction hook fired whenever a seed or peer is
    /// dropped from the cache.
    pub fn set_eviction_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.eviction_hook.lock() = Some(Box::new(hook));
    }

    fn fire_eviction(&self, what: &str) {
        if let Some(hook) = self.eviction_hook.lock().as_ref() {
            hook(what);
        }
    }

    /// Run (or join) a discovery pass and return the ranked candidates.
    ///
    /// Fast-fails with the seeder's circuit open; otherwise resolves all
    /// seeds, merges into the cache, and returns up to `max_peers`
    /// addresses ranked by score.
    pub async fn discover_peers(&self) -> Result<Vec<SocketAddr>, DiscoveryError> {
        let _pass = self.pass_lock.lock().await;

        // A pass that just finished satisfies callers that queued behind it.
        let now = (self.clock_ms)();
        if let Some((at, peers)) = self.recent.lock().as_ref() {
            if now.saturating_sub(*at) < PASS_RESULT_TTL_MS {
                debug!(count = peers.len(), "discovery: joining recent pass result");
                return Ok(peers.clone());
            }
        }

        self.breakers.guard(SEEDER_ENDPOINT)?;

        match self.run_pass().await {
            Ok(peers) => {
                self.breakers.on_success(SEEDER_ENDPOINT);
                *self.recent.lock() = Some(((self.clock_ms)(), peers.clone()));
                Ok(peers)
            }
            Err(e) => {
                self.breakers.on_failure(SEEDER_ENDPOINT);
                Err(e)
            }
        }
    }

    async fn run_pass(&self) -> Result<Vec<SocketAddr>, DiscoveryError> {
        let valid_seeds: Vec<String> = self
            .config
            .seed_domains
            .iter()
            .filter(|domain| {
                let ok = is_valid_seed_domain(domain);
                if !ok {
                    warn!(domain = %domain, "discovery: dropping invalid seed domain");
                }
                ok
            })
            .cloned()
            .collect();

        if valid_seeds.is_empty() {
            return Err(DiscoveryError::NoSeeds);
        }

        let mut unique: HashSet<IpAddr> = HashSet::new();
        let mut any_success = false;
        let mut last_error = DiscoveryError::NoSeeds;

        for domain in &valid_seeds {
            // Seeds already dropped at the ban threshold stay dropped.
            if self
                .seeds
                .lock()
                .get(domain)
                .is_some_and(|s| s.failures >= self.config.ban_threshold)
            {
                continue;
            }

            match self.resolve_seed(domain).await {
                Ok((addrs, latency_ms)) => {
                    any_success = true;
                    self.record_seed_success(domain, latency_ms);
                    unique.extend(addrs);
                }
                Err(e) => {
                    warn!(domain = %domain, error = %e, "discovery: seed resolution failed");
                    self.record_seed_failure(domain);
                    last_error = e;
                }
            }
        }

        if !any_success {
            return Err(last_error);
        }

        self.merge_candidates(&unique);
        Ok(self.ranked_peers())
    }

    /// Resolve one seed: three lookups raced under the configured timeout,
    /// retried with a delay scaling in the attempt number.
    async fn resolve_seed(
        &self,
        domain: &str,
    ) -> Result<(Vec<IpAddr>, u64), DiscoveryError> {
        let attempts = self.config.max_retries + 1;
        for attempt in 0..attempts {
            let started = Instant::now();
            let (v4, v6, any) = tokio::join!(
                timeout(self.config.resolve_timeout, self.resolver.resolve_v4(domain)),
                timeout(self.config.resolve_timeout, self.resolver.resolve_v6(domain)),
                timeout(self.config.resolve_timeout, self.resolver.resolve_any(domain)),
            );

            let mut addrs: HashSet<IpAddr> = HashSet::new();
            for result in [v4, v6, any] {
                if let Ok(Ok(list)) = result {
                    addrs.extend(list);
                }
            }

            if !addrs.is_empty() {
                let latency = started.elapsed().as_millis() as u64;
                return Ok((addrs.into_iter().collect(), latency));
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.config.retry_delay * (attempt + 1)).await;
            }
        }

        Err(DiscoveryError::ResolutionTimeout(domain.to_string()))
    }

    fn record_seed_success(&self, domain: &str, latency_sample_ms: u64) {
        let now = (self.clock_ms)();
        let mut seeds = self.seeds.lock();
        let stats = seeds.entry(domain.to_string()).or_default();
        stats.last_seen_ms = now;
        stats.latency_ms = if stats.latency_ms == 0 {
            latency_sample_ms
        } else {
            (stats.latency_ms + latency_sample_ms) / 2
        };
        stats.attempts += 1;
    }

    fn record_seed_failure(&self, domain: &str) {
        let crossed_threshold = {
            let mut seeds = self.seeds.lock();
            let stats = seeds.entry(domain.to_string()).or_default();
            stats.attempts += 1;
            stats.failures += 1;
            stats.failures == self.config.ban_threshold
        };
        if crossed_threshold {
            info!(domain = %domain, "discovery: seed dropped at ban threshold");
            self.fire_eviction(domain);
        }
    }

    fn merge_candidates(&self, addrs: &HashSet<IpAddr>) {
        let now = (self.clock_ms)();
        let mut cache = self.cache.lock();
        for ip in addrs {
            let address = SocketAddr::new(*ip, self.config.port);
            cache
                .entry(address)
                .and_modify(|candidate| {
                    candidate.last_seen_ms = now;
                })
                .or_insert(PeerCandidate {
                    address,
                    services: NODE_NETWORK,
                    last_seen_ms: now,
                    attempts: 0,
                    failures: 0,
                    latency_ms: 0,
                });
        }
    }

    /// Cached candidates ranked by score, best first, capped at
    /// `max_peers`.
    pub fn ranked_peers(&self) -> Vec<SocketAddr> {
        let now = (self.clock_ms)();
        let cache = self.cache.lock();
        let mut candidates: Vec<&PeerCandidate> = cache.values().collect();
        candidates.sort_by(|a, b| b.score(now).cmp(&a.score(now)));
        candidates
            .into_iter()
            .take(self.config.max_peers)
            .map(|c| c.address)
            .collect()
    }

    /// Merge one advertised peer (from `addr` gossip) into the cache.
    pub fn add_candidate(&self, address: SocketAddr, services: u64, last_seen_ms: u64) {
        let mut cache = self.cache.lock();
        cache
            .entry(address)
            .and_modify(|candidate| {
                candidate.services = services;
                candidate.last_seen_ms = candidate.last_seen_ms.max(last_seen_ms);
            })
            .or_insert(PeerCandidate {
                address,
                services,
                last_seen_ms,
                attempts: 0,
                failures: 0,
                latency_ms: 0,
            });
    }

    /// Record the outcome of a dial or exchange with a cached peer.
    pub fn record_peer_outcome(&self, address: SocketAddr, success: bool, latency_ms: u64) {
        let now = (self.clock_ms)();
        let mut cache = self.cache.lock();
        let candidate = cache.entry(address).or_insert(PeerCandidate {
            address,
            services: NODE_NETWORK,
            last_seen_ms: now,
            attempts: 0,
            failures: 0,
            latency_ms: 0,
        });
        candidate.attempts += 1;
        if success {
            candidate.last_seen_ms = now;
            candidate.latency_ms = if candidate.latency_ms == 0 {
                latency_ms
            } else {
                (candidate.latency_ms + latency_ms) / 2
            };
        } else {
            candidate.failures += 1;
        }
    }

    /// Evict peers unseen for longer than twice the connection timeout and
    /// peers whose failures exhausted their score.
    pub fn evict_stale(&self) {
        let now = (self.clock_ms)();
        let stale_cutoff = 2 * self.config.connection_timeout.as_millis() as u64;
        let mut evicted = Vec::new();
        {
            let mut cache = self.cache.lock();
            cache.retain(|address, candidate| {
                let stale = now.saturating_sub(candidate.last_seen_ms) > stale_cutoff;
                let dead = candidate.failures >= self.config.ban_threshold
                    && candidate.score(now) == 0;
                if stale || dead {
                    evicted.push(address.to_string());
                    false
                } else {
                    true
                }
            });
        }
        for address in evicted {
            info!(peer = %address, "discovery: evicted stale peer");
            self.fire_eviction(&address);
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn get_candidate(&self, address: &SocketAddr) -> Option<PeerCandidate> {
        self.cache.lock().get(address).cloned()
    }

    /// Persist the peer cache as JSON.
    pub fn save_cache(&self, path: &Path) -> Result<(), DiscoveryError> {
        let cache = self.cache.lock();
        let peers: Vec<&PeerCandidate> = cache.values().collect();
        let bytes = serde_json::to_vec_pretty(&peers)
            .map_err(|e| DiscoveryError::CachePersistence(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| DiscoveryError::CachePersistence(e.to_string()))
    }

    /// Load a persisted peer cache; a missing file is fine.
    pub fn load_cache(&self, path: &Path) -> Result<usize, DiscoveryError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(DiscoveryError::CachePersistence(e.to_string())),
        };
        let peers: Vec<PeerCandidate> = serde_json::from_slice(&bytes)
            .map_err(|e| DiscoveryError::CachePersistence(e.to_string()))?;
        let count = peers.len();
        let mut cache = self.cache.lock();
        for peer in peers {
            cache.insert(peer.address, peer);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use agora_core::breaker::BreakerConfig;

    const NOW_MS: u64 = 1_700_000_000_000;

    // ------------------------------------------------------------------
    // Stub resolver
    // ------------------------------------------------------------------

    struct StubResolver {
        answers: HashMap<String, Vec<IpAddr>>,
        calls: AtomicU32,
    }

    impl StubResolver {
        fn with(answers: &[(&str, &[&str])]) -> Self {
            let mut map = HashMap::new();
            for (domain, ips) in answers {
                map.insert(
                    domain.to_string(),
                    ips.iter().map(|ip| ip.parse().unwrap()).collect(),
                );
            }
            Self { answers: map, calls: AtomicU32::new(0) }
        }

        fn empty() -> Self {
            Self { answers: HashMap::new(), calls: AtomicU32::new(0) }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl SeedResolver for StubResolver {
        async fn resolve_v4(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.answers.get(domain) {
                Some(ips) => Ok(ips.iter().filter(|ip| ip.is_ipv4()).copied().collect()),
                None => Err(DiscoveryError::ResolutionFailed {
                    domain: domain.to_string(),
                    reason: "nxdomain".into(),
                }),
            }
        }

        async fn resolve_v6(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.answers.get(domain) {
                Some(ips) => Ok(ips.iter().filter(|ip| ip.is_ipv6()).copied().collect()),
                None => Err(DiscoveryError::ResolutionFailed {
                    domain: domain.to_string(),
                    reason: "nxdomain".into(),
                }),
            }
        }

        async fn resolve_any(&self, domain: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.answers.get(domain).cloned().ok_or_else(|| {
                DiscoveryError::ResolutionFailed {
                    domain: domain.to_string(),
                    reason: "nxdomain".into(),
                }
            })
        }
    }

    fn fast_config(seeds: &[&str]) -> NetworkConfig {
        NetworkConfig {
            seed_domains: seeds.iter().map(|s| s.to_string()).collect(),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
            resolve_timeout: Duration::from_millis(200),
            ban_threshold: 2,
            connection_timeout: Duration::from_secs(10),
            ..NetworkConfig::default()
        }
    }

    fn discovery(seeds: &[&str], resolver: Arc<dyn SeedResolver>) -> PeerDiscovery {
        PeerDiscovery::with_clock(
            fast_config(seeds),
            resolver,
            Arc::new(CircuitRegistry::new(BreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(60),
            })),
            || NOW_MS,
        )
    }

    // ------------------------------------------------------------------
    // Domain and address validation
    // ------------------------------------------------------------------

    #[test]
    fn valid_domains_accepted() {
        assert!(is_valid_seed_domain("seed1.agorachain.org"));
        assert!(is_valid_seed_domain("a-b.example.com"));
        assert!(is_valid_seed_domain("x1.io"));
    }

    #[test]
    fn invalid_domains_rejected() {
        assert!(!is_valid_seed_domain(""));
        assert!(!is_valid_seed_domain("nodots"));
        assert!(!is_valid_seed_domain("-lead.example.com"));
        assert!(!is_valid_seed_domain("trail-.example.com"));
        assert!(!is_valid_seed_domain("spa ce.example.com"));
        assert!(!is_valid_seed_domain("example.c"));
        assert!(!is_valid_seed_domain("example.123"));
        assert!(!is_valid_seed_domain(&format!("{}.com", "a".repeat(64))));
    }

    #[test]
    fn address_validation() {
        assert!(validate_address("10.0.0.1").is_some());
        assert!(validate_address("::1").is_some());
        assert!(validate_address("2001:db8::2").is_some());
        assert!(validate_address("256.1.1.1").is_none());
        assert!(validate_address("10.0.0").is_none());
        assert!(validate_address("gggg::1").is_none());
        assert!(validate_address("not-an-ip").is_none());
    }

    // ------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------

    fn candidate(failures: u32, latency_ms: u64, last_seen_ms: u64) -> PeerCandidate {
        PeerCandidate {
            address: "10.0.0.1:28333".parse().unwrap(),
            services: NODE_NETWORK,
            last_seen_ms,
            attempts: 0,
            failures,
            latency_ms,
        }
    }

    #[test]
    fn score_formula() {
        // Fresh, no failures, no latency: full marks.
        assert_eq!(candidate(0, 0, NOW_MS).score(NOW_MS), 100);
        // Each failure costs 10.
        assert_eq!(candidate(3, 0, NOW_MS).score(NOW_MS), 70);
        // 250 ms latency costs 2.
        assert_eq!(candidate(0, 250, NOW_MS).score(NOW_MS), 98);
        // 5 hours unseen costs 10.
        assert_eq!(
            candidate(0, 0, NOW_MS - 5 * 3_600_000).score(NOW_MS),
            90
        );
        // Composite.
        assert_eq!(
            candidate(2, 300, NOW_MS - 3_600_000).score(NOW_MS),
            100 - 20 - 3 - 2
        );
    }

    #[test]
    fn score_clamps_at_zero() {
        assert_eq!(candidate(20, 0, NOW_MS).score(NOW_MS), 0);
    }

    // ------------------------------------------------------------------
    // Discovery passes
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn pass_merges_and_dedupes_addresses() {
        let resolver = Arc::new(StubResolver::with(&[
            ("seed1.example.com", &["10.0.0.1", "10.0.0.2"]),
            ("seed2.example.com", &["10.0.0.2", "2001:db8::5"]),
        ]));
        let discovery = discovery(
            &["seed1.example.com", "seed2.example.com"],
            resolver.clone(),
        );

        let peers = discovery.discover_peers().await.unwrap();
        assert_eq!(peers.len(), 3, "duplicates merged");
        assert_eq!(discovery.cache_len(), 3);
    }

    #[tokio::test]
    async fn invalid_seed_domains_are_dropped() {
        let resolver = Arc::new(StubResolver::with(&[("good.example.com", &["10.0.0.1"])]));
        let discovery = discovery(&["good.example.com", "bad domain!"], resolver);
        let peers = discovery.discover_peers().await.unwrap();
        assert_eq!(peers.len(), 1);
    }

    #[tokio::test]
    async fn all_invalid_seeds_error() {
        let resolver = Arc::new(StubResolver::empty());
        let discovery = discovery(&["no-dots"], resolver);
        let err = discovery.discover_peers().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NoSeeds));
    }

    #[tokio::test]
    async fn failing_seed_is_retried() {
        let resolver = Arc::new(StubResolver::empty());
        let discovery = discovery(&["seed.example.com"], resolver.clone());
        let _ = discovery.discover_peers().await.unwrap_err();
        // max_retries = 1 → 2 attempts × 3 lookups each.
        assert_eq!(resolver.calls(), 6);
    }

    #[tokio::test]
    async fn repeated_pass_failures_open_the_circuit() {
        let resolver = Arc::new(StubResolver::empty());
        let discovery = discovery(&["seed.example.com"], resolver);

        // Breaker threshold is 2 in the test config.
        assert!(!matches!(
            discovery.discover_peers().await.unwrap_err(),
            DiscoveryError::Circuit(_)
        ));
        assert!(!matches!(
            discovery.discover_peers().await.unwrap_err(),
            DiscoveryError::Circuit(_)
        ));
        let err = discovery.discover_peers().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Circuit(_)), "fast-fail once open");
    }

    #[tokio::test]
    async fn seed_dropped_at_ban_threshold_fires_hook() {
        let resolver = Arc::new(StubResolver::empty());
        let discovery = discovery(&["seed.example.com"], resolver);

        let evictions = Arc::new(Mutex::new(Vec::new()));
        let evictions_clone = Arc::clone(&evictions);
        discovery.set_eviction_hook(move |what| evictions_clone.lock().push(what.to_string()));

        // ban_threshold = 2 failures.
        let _ = discovery.discover_peers().await;
        let _ = discovery.discover_peers().await;
        assert_eq!(*evictions.lock(), vec!["seed.example.com".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_pass() {
        let resolver = Arc::new(StubResolver::with(&[("seed.example.com", &["10.0.0.1"])]));
        let discovery = Arc::new(discovery(&["seed.example.com"], resolver.clone()));

        let a = discovery.clone();
        let b = discovery.clone();
        let (ra, rb) = tokio::join!(a.discover_peers(), b.discover_peers());
        assert_eq!(ra.unwrap(), rb.unwrap());
        // One pass resolved (3 lookups); the second caller joined its result.
        assert_eq!(resolver.calls(), 3);
    }

    // ------------------------------------------------------------------
    // Peer cache maintenance
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn peer_outcomes_update_ranking() {
        let resolver = Arc::new(StubResolver::with(&[(
            "seed.example.com",
            &["10.0.0.1", "10.0.0.2"],
        )]));
        let discovery = discovery(&["seed.example.com"], resolver);
        discovery.discover_peers().await.unwrap();

        let flaky: SocketAddr = format!("10.0.0.1:{}", discovery.config.port).parse().unwrap();
        let good: SocketAddr = format!("10.0.0.2:{}", discovery.config.port).parse().unwrap();
        discovery.record_peer_outcome(flaky, false, 0);
        discovery.record_peer_outcome(flaky, false, 0);
        discovery.record_peer_outcome(good, true, 50);

        let ranked = discovery.ranked_peers();
        assert_eq!(ranked[0], good);
        assert_eq!(ranked[1], flaky);

        let candidate = discovery.get_candidate(&good).unwrap();
        assert_eq!(candidate.attempts, 1);
        assert_eq!(candidate.latency_ms, 50);
    }

    #[tokio::test]
    async fn latency_is_averaged() {
        let resolver = Arc::new(StubResolver::with(&[("seed.example.com", &["10.0.0.1"])]));
        let discovery = discovery(&["seed.example.com"], resolver);
        discovery.discover_peers().await.unwrap();

        let addr: SocketAddr = format!("10.0.0.1:{}", discovery.config.port).parse().unwrap();
        discovery.record_peer_outcome(addr, true, 100);
        discovery.record_peer_outcome(addr, true, 300);
        assert_eq!(discovery.get_candidate(&addr).unwrap().latency_ms, 200);
    }

    #[test]
    fn evict_stale_fires_hook() {
        let resolver = Arc::new(StubResolver::empty());
        let config = fast_config(&["seed.example.com"]);
        let discovery = PeerDiscovery::with_clock(
            config,
            resolver,
            Arc::new(CircuitRegistry::new(BreakerConfig::default())),
            || NOW_MS,
        );

        let fresh: SocketAddr = "10.0.0.1:28333".parse().unwrap();
        let stale: SocketAddr = "10.0.0.2:28333".parse().unwrap();
        discovery.cache.lock().insert(fresh, candidate(0, 0, NOW_MS));
        discovery
            .cache
            .lock()
            .insert(stale, PeerCandidate { address: stale, ..candidate(0, 0, NOW_MS - 60_000) });

        let evictions = Arc::new(Mutex::new(Vec::new()));
        let evictions_clone = Arc::clone(&evictions);
        discovery.set_eviction_hook(move |what| evictions_clone.lock().push(what.to_string()));

        // connection_timeout = 10s → stale cutoff 20s; the 60s-old peer goes.
        discovery.evict_stale();
        assert_eq!(discovery.cache_len(), 1);
        assert_eq!(*evictions.lock(), vec![stale.to_string()]);
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn cache_persistence_roundtrip() {
        let resolver = Arc::new(StubResolver::with(&[(
            "seed.example.com",
            &["10.0.0.1", "10.0.0.2"],
        )]));
        let discovery = discovery(&["seed.example.com"], resolver.clone());
        discovery.discover_peers().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        discovery.save_cache(&path).unwrap();

        let restored = self::discovery(&["seed.example.com"], resolver);
        assert_eq!(restored.load_cache(&path).unwrap(), 2);
        assert_eq!(restored.cache_len(), 2);
    }

    #[test]
    fn missing_cache_file_is_fine() {
        let resolver = Arc::new(StubResolver::empty());
        let discovery = discovery(&["seed.example.com"], resolver);
        let loaded = discovery
            .load_cache(Path::new("/nonexistent/peers.json"))
            .unwrap();
        assert_eq!(loaded, 0);
    }
}
