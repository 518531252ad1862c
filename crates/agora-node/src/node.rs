//! Full node composition and message dispatch.
//!
//! The [`Node`] owns the peer connection table, the orphan block and
//! transaction pools, and the maintenance timer, and wires the chain
//! store, mempool, PoW engine, and discovery together. Inbound messages
//! are dispatched by tag; every handler returns the outbound messages it
//! wants sent, so the dispatch logic is testable without sockets.
//!
//! Misbehavior feeds the peer score board (+20 double-spend, +10 invalid
//! payload, +1 protocol slip); a peer crossing the ban threshold is
//! disconnected and banned. Per-kind rate limits drop floods silently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use agora_core::breaker::{BreakerConfig, CircuitRegistry};
use agora_core::chain_state::MemoryChainStore;
use agora_core::constants::{CURRENT_VERSION, NODE_MINER, NODE_NETWORK, NODE_VOTING};
use agora_core::crypto::HybridKeyManager;
use agora_core::error::{AgoraError, MempoolError, TransactionError};
use agora_core::pow::is_valid_hash_format;
use agora_core::traits::{
    AuditSink, ChainStore, KeyManager, MetricsSink, NullAudit, NullMetrics, UtxoStore,
    VoteEligibility,
};
use agora_core::types::{Block, Hash256, Transaction};
use agora_mempool::{Mempool, MempoolConfig};
use agora_network::circuit_breaker::CircuitBreakerService;
use agora_network::discovery::{validate_address, PeerDiscovery, TokioResolver};
use agora_network::protocol::{
    read_message, write_message, InvItem, InvType, Message, PeerAddress, VersionPayload, VoteStats,
};
use agora_network::rate_limiter::RateLimiter;
use agora_network::peer_scoring::{
    PeerScoreBoard, SCORE_DOUBLE_SPEND, SCORE_INVALID_TX, SCORE_PROTOCOL_ERROR,
};
use agora_pow::{PowEngine, PowEngineConfig};

use crate::config::NodeConfig;

/// Orphans older than this are evicted by maintenance.
const ORPHAN_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Idle bound for mining workers before the health sweep recycles them.
const WORKER_MAX_IDLE: Duration = Duration::from_secs(60);

/// Peers advertised per `addr` reply.
const ADDRS_PER_REPLY: usize = 10;

/// A connected peer's handshake state.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub address: SocketAddr,
    pub services: u64,
    pub height: u64,
    pub version: u32,
    pub connected_at: Instant,
    pub last_seen: Instant,
}

/// Runtime counters. Relaxed atomics: approximate, never consensus.
#[derive(Default)]
pub struct NodeMetrics {
    pub blocks_connected: AtomicU64,
    pub txs_admitted: AtomicU64,
    pub orphan_blocks_held: AtomicU64,
    pub orphan_txs_held: AtomicU64,
}

/// Default vote gate: an address is vote-eligible when it holds any
/// unspent voting collateral. The richer policy (account age, reputation,
/// cooldowns) lives in the external voting module and replaces this seam
/// in full deployments.
pub struct CollateralVoteGate {
    utxos: Arc<dyn UtxoStore>,
}

impl VoteEligibility for CollateralVoteGate {
    fn check_eligibility(
        &self,
        address: &str,
        _current_height: u64,
    ) -> Result<(), TransactionError> {
        let utxos = self
            .utxos
            .find_utxos_for_voting(address)
            .map_err(|e| TransactionError::VoteIneligible(e.to_string()))?;
        if self.utxos.calculate_voting_power(&utxos) == 0 {
            return Err(TransactionError::VoteIneligible(format!(
                "{address} holds no voting collateral"
            )));
        }
        Ok(())
    }

    fn validate_work(&self, _address: &str, _difficulty_millis: u64) -> Result<bool, AgoraError> {
        Ok(true)
    }
}

/// The full node.
pub struct Node {
    config: NodeConfig,
    pub store: Arc<MemoryChainStore>,
    pub mempool: Arc<Mempool>,
    pub engine: Arc<PowEngine>,
    pub discovery: Arc<PeerDiscovery>,
    breaker_service: Arc<CircuitBreakerService>,
    breakers: Arc<CircuitRegistry>,
    keys: Arc<HybridKeyManager>,
    peers: Mutex<HashMap<SocketAddr, PeerInfo>>,
    senders: Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Message>>>,
    scores: Mutex<PeerScoreBoard>,
    limiter: Mutex<RateLimiter>,
    /// Orphan blocks keyed by the missing parent's hash.
    orphan_blocks: Mutex<HashMap<Hash256, (Block, Instant)>>,
    orphan_txs: Mutex<HashMap<Hash256, (Transaction, Instant)>>,
    pub metrics: NodeMetrics,
    audit: Arc<dyn AuditSink>,
}

impl Node {
    /// Compose a node. No sockets are opened here; call
    /// [`start`](Self::start) to begin listening and background work.
    pub fn new(config: NodeConfig) -> Arc<Self> {
        let store = Arc::new(MemoryChainStore::new());
        let keys = Arc::new(HybridKeyManager::generate());
        let audit: Arc<dyn AuditSink> = Arc::new(NullAudit);
        let metrics_sink: Arc<dyn MetricsSink> = Arc::new(NullMetrics);

        let votes: Arc<dyn VoteEligibility> =
            Arc::new(CollateralVoteGate { utxos: store.clone() });

        let mempool = Arc::new(Mempool::new(
            MempoolConfig::default(),
            store.clone(),
            store.clone(),
            votes,
            keys.clone(),
            audit.clone(),
            metrics_sink.clone(),
        ));

        let engine = Arc::new(PowEngine::new(
            PowEngineConfig::default(),
            store.clone(),
            store.clone(),
            keys.clone(),
            mempool.clone(),
            audit.clone(),
            metrics_sink.clone(),
        ));

        let breaker_service = Arc::new(CircuitBreakerService::new(
            BreakerConfig::default(),
            Some(config.breaker_snapshot_path()),
        ));
        let breakers = breaker_service.registry();

        let network_config = config.network_config();
        let resolver = Arc::new(TokioResolver::new(network_config.port));
        let discovery = Arc::new(PeerDiscovery::new(
            network_config,
            resolver,
            breakers.clone(),
        ));
        if let Ok(count) = discovery.load_cache(&config.peer_cache_path()) {
            if count > 0 {
                info!(count, "node: peer cache restored");
            }
        }

        let scores = Mutex::new(PeerScoreBoard::new(config.max_ban_score, config.ban_time()));

        Arc::new(Self {
            config,
            store,
            mempool,
            engine,
            discovery,
            breaker_service,
            breakers,
            keys,
            peers: Mutex::new(HashMap::new()),
            senders: Mutex::new(HashMap::new()),
            scores,
            limiter: Mutex::new(RateLimiter::default()),
            orphan_blocks: Mutex::new(HashMap::new()),
            orphan_txs: Mutex::new(HashMap::new()),
            metrics: NodeMetrics::default(),
            audit,
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// This node's handshake message.
    pub fn version_message(&self) -> Message {
        let height = self.store.current_height().unwrap_or(0);
        let timestamp_ms = chrono::Utc::now().timestamp_millis() as u64;
        let public_key = self.keys.public_key();
        let handshake = format!("{CURRENT_VERSION}:{height}:{timestamp_ms}");
        let signature = self.keys.sign(handshake.as_bytes()).unwrap_or_default();

        let mut services = NODE_NETWORK | NODE_VOTING;
        if self.config.auto_mine {
            services |= NODE_MINER;
        }

        Message::Version(VersionPayload {
            version: CURRENT_VERSION,
            services,
            height,
            public_key: hex::encode(public_key),
            signature: hex::encode(signature),
            timestamp_ms,
            miner: self.config.auto_mine,
            vote_stats: VoteStats::default(),
        })
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Dispatch one inbound message; returns the outbound messages to
    /// send. Banned peers and over-limit floods are dropped silently.
    pub async fn handle_message(
        &self,
        peer: SocketAddr,
        message: Message,
    ) -> Vec<(SocketAddr, Message)> {
        if self.scores.lock().is_banned(&peer) {
            debug!(%peer, "dispatch: dropping message from banned peer");
            return Vec::new();
        }

        let kind = message.kind();
        {
            let mut limiter = self.limiter.lock();
            if !limiter.check(peer, kind) {
                return Vec::new();
            }
            limiter.record(peer, kind);
        }

        if let Some(info) = self.peers.lock().get_mut(&peer) {
            info.last_seen = Instant::now();
        }

        match message {
            Message::Version(payload) => self.handle_version(peer, payload),
            Message::Addr(addrs) => {
                self.handle_addr(addrs);
                Vec::new()
            }
            Message::Inv(items) => self.handle_inv(peer, items),
            Message::GetData(items) => self.handle_getdata(peer, items),
            Message::Block(block) => self.handle_block(peer, block).await,
            Message::Tx(tx) => self.handle_tx(peer, tx).await,
            Message::Ping { nonce } => vec![(peer, Message::Pong { nonce })],
            Message::Pong { .. } => Vec::new(),
        }
    }

    fn handle_version(
        &self,
        peer: SocketAddr,
        payload: VersionPayload,
    ) -> Vec<(SocketAddr, Message)> {
        let known = self.peers.lock().contains_key(&peer);
        self.peers.lock().insert(
            peer,
            PeerInfo {
                address: peer,
                services: payload.services,
                height: payload.height,
                version: payload.version,
                connected_at: Instant::now(),
                last_seen: Instant::now(),
            },
        );
        info!(%peer, height = payload.height, services = payload.services, "peer handshake");

        let mut replies = Vec::new();
        if !known {
            replies.push((peer, self.version_message()));
        }

        // Share our best-ranked candidates.
        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        let addrs: Vec<PeerAddress> = self
            .discovery
            .ranked_peers()
            .into_iter()
            .take(ADDRS_PER_REPLY)
            .map(|address| PeerAddress {
                address: address.to_string(),
                services: NODE_NETWORK,
                last_seen_ms: now_ms,
            })
            .collect();
        if !addrs.is_empty() {
            replies.push((peer, Message::Addr(addrs)));
        }
        replies
    }

    fn handle_addr(&self, addrs: Vec<PeerAddress>) {
        for advert in addrs {
            // Accept "ip:port" or a bare IP (using our network's port).
            let parsed: Option<SocketAddr> = advert
                .address
                .parse()
                .ok()
                .or_else(|| {
                    validate_address(&advert.address)
                        .map(|ip| SocketAddr::new(ip, self.config.effective_port()))
                });
            match parsed {
                Some(address) => {
                    self.discovery
                        .add_candidate(address, advert.services, advert.last_seen_ms);
                }
                None => {
                    debug!(address = %advert.address, "addr: discarding malformed address");
                }
            }
        }
    }

    fn handle_inv(&self, peer: SocketAddr, items: Vec<InvItem>) -> Vec<(SocketAddr, Message)> {
        let mut wanted = Vec::new();
        for item in items {
            if !is_valid_hash_format(&item.hash) {
                self.penalize(peer, SCORE_PROTOCOL_ERROR);
                continue;
            }
            let Some(hash) = Hash256::from_hex(&item.hash) else {
                self.penalize(peer, SCORE_PROTOCOL_ERROR);
                continue;
            };

            let unknown = match item.kind {
                InvType::Block => self
                    .store
                    .get_block_by_hash(&hash)
                    .ok()
                    .flatten()
                    .is_none(),
                InvType::Tx => {
                    !self.mempool.contains(&hash)
                        && !self.store.has_transaction(&hash).unwrap_or(false)
                }
            };
            if unknown {
                wanted.push(item);
            }
        }

        if wanted.is_empty() {
            Vec::new()
        } else {
            vec![(peer, Message::GetData(wanted))]
        }
    }

    fn handle_getdata(&self, peer: SocketAddr, items: Vec<InvItem>) -> Vec<(SocketAddr, Message)> {
        let mut replies = Vec::new();
        for item in items {
            let Some(hash) = Hash256::from_hex(&item.hash) else {
                self.penalize(peer, SCORE_PROTOCOL_ERROR);
                continue;
            };
            match item.kind {
                InvType::Block => {
                    if let Ok(Some(block)) = self.store.get_block_by_hash(&hash) {
                        replies.push((peer, Message::Block(block)));
                    }
                }
                InvType::Tx => {
                    if let Some(entry) = self.mempool.get(&hash) {
                        replies.push((peer, Message::Tx(entry.tx)));
                    }
                }
            }
        }
        replies
    }

    async fn handle_block(&self, peer: SocketAddr, block: Block) -> Vec<(SocketAddr, Message)> {
        let hash = block.hash();
        let height = block.header.height;

        if self.store.get_block_by_hash(&hash).ok().flatten().is_some() {
            return Vec::new();
        }

        let next_height = self
            .store
            .current_height()
            .map(|h| h + 1)
            .unwrap_or(0);

        if height > next_height {
            // Parent not connected yet: park and ask for it.
            let parent = block.header.previous_hash;
            self.park_orphan_block(block);
            return vec![(
                peer,
                Message::GetData(vec![InvItem { kind: InvType::Block, hash: parent.to_string() }]),
            )];
        }
        if height < next_height {
            debug!(%hash, height, "block: stale height, ignoring");
            return Vec::new();
        }

        match self.engine.submit_block(&block).await {
            Ok(_) => {
                self.metrics.blocks_connected.fetch_add(1, Ordering::Relaxed);
                self.engine.inflight.complete(height);
                let mut out = self.broadcast_except(
                    peer,
                    Message::Inv(vec![InvItem { kind: InvType::Block, hash: hash.to_string() }]),
                );
                out.extend(self.attach_orphans(hash).await);
                self.retry_orphan_txs().await;
                out
            }
            Err(e) => {
                warn!(%peer, %hash, error = %e, "block rejected");
                self.audit.record(
                    "block_rejected",
                    serde_json::json!({ "hash": hash.to_string(), "reason": e.to_string() }),
                );
                self.penalize(peer, SCORE_INVALID_TX);
                Vec::new()
            }
        }
    }

    async fn handle_tx(&self, peer: SocketAddr, tx: Transaction) -> Vec<(SocketAddr, Message)> {
        let txid = match tx.txid() {
            Ok(txid) => txid,
            Err(_) => {
                self.penalize(peer, SCORE_PROTOCOL_ERROR);
                return Vec::new();
            }
        };

        match self.mempool.submit(tx.clone()).await {
            Ok(_) => {
                self.metrics.txs_admitted.fetch_add(1, Ordering::Relaxed);
                self.broadcast_except(
                    peer,
                    Message::Inv(vec![InvItem { kind: InvType::Tx, hash: txid.to_string() }]),
                )
            }
            Err(MempoolError::AlreadyExists(_)) => Vec::new(),
            Err(MempoolError::Conflict { .. }) | Err(MempoolError::ReplacementFeeTooLow { .. }) => {
                self.penalize(peer, SCORE_DOUBLE_SPEND);
                Vec::new()
            }
            Err(MempoolError::Transaction(TransactionError::UnknownUtxo(_))) => {
                // Inputs not known yet: park until a block provides them.
                self.park_orphan_tx(txid, tx);
                Vec::new()
            }
            Err(MempoolError::NetworkUnhealthy)
            | Err(MempoolError::PoolCritical)
            | Err(MempoolError::PoolFull)
            | Err(MempoolError::LockTimeout(_))
            | Err(MempoolError::Internal(_)) => Vec::new(),
            Err(e) => {
                debug!(%peer, %txid, error = %e, "tx rejected");
                self.penalize(peer, SCORE_INVALID_TX);
                Vec::new()
            }
        }
    }

    // ------------------------------------------------------------------
    // Orphans
    // ------------------------------------------------------------------

    fn park_orphan_block(&self, block: Block) {
        let mut orphans = self.orphan_blocks.lock();
        if orphans.len() >= self.config.max_orphans {
            // Evict the oldest to stay bounded.
            if let Some(oldest) = orphans
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| *k)
            {
                orphans.remove(&oldest);
            }
        }
        let parent = block.header.previous_hash;
        debug!(height = block.header.height, %parent, "orphan block parked");
        orphans.insert(parent, (block, Instant::now()));
        self.metrics
            .orphan_blocks_held
            .store(orphans.len() as u64, Ordering::Relaxed);
    }

    fn park_orphan_tx(&self, txid: Hash256, tx: Transaction) {
        let mut orphans = self.orphan_txs.lock();
        if orphans.len() >= self.config.max_orphans {
            if let Some(oldest) = orphans
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| *k)
            {
                orphans.remove(&oldest);
            }
        }
        debug!(%txid, "orphan tx parked");
        orphans.insert(txid, (tx, Instant::now()));
        self.metrics
            .orphan_txs_held
            .store(orphans.len() as u64, Ordering::Relaxed);
    }

    /// Connect any orphans whose parent just landed, cascading.
    async fn attach_orphans(&self, mut parent_hash: Hash256) -> Vec<(SocketAddr, Message)> {
        let mut out = Vec::new();
        loop {
            let orphan = self.orphan_blocks.lock().remove(&parent_hash);
            let Some((block, _)) = orphan else { break };
            let hash = block.hash();
            match self.engine.submit_block(&block).await {
                Ok(_) => {
                    info!(height = block.header.height, %hash, "orphan block connected");
                    self.metrics.blocks_connected.fetch_add(1, Ordering::Relaxed);
                    out.extend(self.broadcast_to_all(Message::Inv(vec![InvItem {
                        kind: InvType::Block,
                        hash: hash.to_string(),
                    }])));
                    parent_hash = hash;
                }
                Err(e) => {
                    warn!(%hash, error = %e, "orphan block failed validation, dropping");
                    break;
                }
            }
        }
        out
    }

    /// Re-submit parked transactions; those still missing inputs go back
    /// to the orphan pool.
    async fn retry_orphan_txs(&self) {
        let parked: Vec<(Hash256, Transaction)> = {
            let mut orphans = self.orphan_txs.lock();
            orphans.drain().map(|(txid, (tx, _))| (txid, tx)).collect()
        };
        for (txid, tx) in parked {
            match self.mempool.submit(tx.clone()).await {
                Ok(_) => {
                    info!(%txid, "orphan tx admitted");
                    self.metrics.txs_admitted.fetch_add(1, Ordering::Relaxed);
                }
                Err(MempoolError::Transaction(TransactionError::UnknownUtxo(_))) => {
                    self.park_orphan_tx(txid, tx);
                }
                Err(e) => {
                    debug!(%txid, error = %e, "orphan tx dropped");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Scoring / broadcast
    // ------------------------------------------------------------------

    fn penalize(&self, peer: SocketAddr, delta: u32) {
        let banned_now = self.scores.lock().penalize(peer, delta);
        if banned_now {
            self.audit.record(
                "peer_banned",
                serde_json::json!({ "peer": peer.to_string() }),
            );
            self.disconnect(peer);
        }
    }

    /// Drop a peer's connection state (the ban record, if any, stays).
    pub fn disconnect(&self, peer: SocketAddr) {
        self.peers.lock().remove(&peer);
        self.senders.lock().remove(&peer);
        self.limiter.lock().remove_peer(&peer);
        info!(%peer, "peer disconnected");
    }

    fn broadcast_except(&self, origin: SocketAddr, message: Message) -> Vec<(SocketAddr, Message)> {
        self.peers
            .lock()
            .keys()
            .filter(|addr| **addr != origin)
            .map(|addr| (*addr, message.clone()))
            .collect()
    }

    fn broadcast_to_all(&self, message: Message) -> Vec<(SocketAddr, Message)> {
        self.peers
            .lock()
            .keys()
            .map(|addr| (*addr, message.clone()))
            .collect()
    }

    /// Queue outbound messages onto their connections' writer tasks.
    pub fn send_all(&self, outbound: Vec<(SocketAddr, Message)>) {
        let senders = self.senders.lock();
        for (peer, message) in outbound {
            if let Some(tx) = senders.get(&peer) {
                if tx.send(message).is_err() {
                    debug!(%peer, "send: writer task gone");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Dial an outbound peer through its circuit breaker.
    pub async fn dial(self: Arc<Self>, address: SocketAddr) -> Result<(), AgoraError> {
        let endpoint = format!("peer:{address}");
        self.breakers.guard(&endpoint)?;

        let started = Instant::now();
        let connect = timeout(
            Duration::from_secs(self.config.connection_timeout_secs),
            TcpStream::connect(address),
        )
        .await;

        match connect {
            Ok(Ok(stream)) => {
                let latency = started.elapsed().as_millis() as u64;
                self.breakers.on_success(&endpoint);
                self.discovery.record_peer_outcome(address, true, latency);
                let version = self.version_message();
                Arc::clone(&self).register_connection(address, stream);
                self.send_all(vec![(address, version)]);
                Ok(())
            }
            Ok(Err(e)) => {
                self.breakers.on_failure(&endpoint);
                self.discovery.record_peer_outcome(address, false, 0);
                Err(AgoraError::Network(
                    agora_core::error::NetworkError::PeerDisconnected(e.to_string()),
                ))
            }
            Err(_) => {
                self.breakers.on_failure(&endpoint);
                self.discovery.record_peer_outcome(address, false, 0);
                Err(AgoraError::Network(agora_core::error::NetworkError::Timeout))
            }
        }
    }

    /// Spawn reader and writer tasks for an established connection.
    fn register_connection(self: Arc<Self>, address: SocketAddr, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().insert(address, tx);

        let node = Arc::clone(&self);
        tokio::spawn(async move {
            node.writer_loop(address, write_half, rx).await;
        });

        tokio::spawn(async move {
            self.reader_loop(address, read_half).await;
            self.disconnect(address);
        });
    }

    async fn writer_loop<W: AsyncWrite + Unpin>(
        &self,
        address: SocketAddr,
        mut writer: W,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(message) = rx.recv().await {
            if let Err(e) = write_message(&mut writer, &message).await {
                debug!(peer = %address, error = %e, "writer: send failed");
                break;
            }
        }
    }

    async fn reader_loop<R: AsyncRead + Unpin>(&self, address: SocketAddr, mut reader: R) {
        loop {
            match read_message(&mut reader).await {
                Ok(message) => {
                    let outbound = self.handle_message(address, message).await;
                    self.send_all(outbound);
                }
                Err(e) => {
                    debug!(peer = %address, error = %e, "reader: connection closed");
                    break;
                }
            }
        }
    }

    /// Bind the listen socket and accept inbound connections.
    pub async fn spawn_listener(self: Arc<Self>) -> Result<JoinHandle<()>, AgoraError> {
        let listen = format!("0.0.0.0:{}", self.config.effective_port());
        let listener = TcpListener::bind(&listen)
            .await
            .map_err(|e| AgoraError::Storage(e.to_string()))?;
        info!(%listen, "listening for peers");

        let node = self;
        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, address)) => {
                        if node.scores.lock().is_banned(&address) {
                            debug!(%address, "accept: refusing banned peer");
                            continue;
                        }
                        if node.peer_count() >= node.config.max_peers {
                            debug!(%address, "accept: at peer capacity");
                            continue;
                        }
                        Arc::clone(&node).register_connection(address, stream);
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        }))
    }

    /// Run a discovery pass and dial the returned candidates.
    pub async fn bootstrap(self: Arc<Self>) -> usize {
        let candidates = match self.discovery.discover_peers().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "bootstrap: discovery failed");
                return 0;
            }
        };

        let mut connected = 0;
        for address in candidates {
            if self.peer_count() >= self.config.max_peers {
                break;
            }
            if Arc::clone(&self).dial(address).await.is_ok() {
                connected += 1;
            }
        }
        connected
    }

    // ------------------------------------------------------------------
    // Background work
    // ------------------------------------------------------------------

    /// One maintenance pass: orphan expiry, ban expiry, stale-peer
    /// eviction, worker recycling, low-peer warning, peer-cache persist.
    pub fn run_maintenance(&self) {
        let now = Instant::now();
        {
            let mut orphans = self.orphan_blocks.lock();
            orphans.retain(|_, (_, at)| now.duration_since(*at) < ORPHAN_EXPIRY);
            self.metrics
                .orphan_blocks_held
                .store(orphans.len() as u64, Ordering::Relaxed);
        }
        {
            let mut orphans = self.orphan_txs.lock();
            orphans.retain(|_, (_, at)| now.duration_since(*at) < ORPHAN_EXPIRY);
            self.metrics
                .orphan_txs_held
                .store(orphans.len() as u64, Ordering::Relaxed);
        }

        for peer in self.scores.lock().unban_expired() {
            debug!(%peer, "maintenance: ban lifted");
        }
        self.discovery.evict_stale();
        self.engine.sweep_workers(WORKER_MAX_IDLE);

        let peer_count = self.peer_count();
        if peer_count < self.config.min_peers {
            warn!(
                peer_count,
                min = self.config.min_peers,
                "maintenance: below minimum peer target"
            );
        }

        if let Err(e) = self.discovery.save_cache(&self.config.peer_cache_path()) {
            debug!(error = %e, "maintenance: peer cache save skipped");
        }
    }

    /// Spawn the maintenance timer at the configured prune interval.
    pub fn spawn_maintenance(self: Arc<Self>) -> JoinHandle<()> {
        let node = self;
        let interval = node.config.prune_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                node.run_maintenance();
            }
        })
    }

    /// Spawn the mining loop: mine, append, announce, repeat.
    pub fn spawn_miner(self: Arc<Self>, miner_address: String) -> JoinHandle<()> {
        let node = self;
        tokio::spawn(async move {
            loop {
                match node.engine.mine_block(&miner_address).await {
                    Ok(block) => {
                        let hash = block.hash();
                        match node.engine.submit_block(&block).await {
                            Ok(_) => {
                                node.metrics.blocks_connected.fetch_add(1, Ordering::Relaxed);
                                let inv = Message::Inv(vec![InvItem {
                                    kind: InvType::Block,
                                    hash: hash.to_string(),
                                }]);
                                let outbound = node.broadcast_to_all(inv);
                                node.send_all(outbound);
                            }
                            Err(e) => {
                                warn!(error = %e, "miner: submission rejected");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "miner: stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Start all background tasks: listener, maintenance, circuit-breaker
    /// monitor, mempool maintenance, and (when configured) the miner.
    pub async fn start(self: Arc<Self>) -> Result<Vec<JoinHandle<()>>, AgoraError> {
        let mut handles = Vec::new();
        handles.push(Arc::clone(&self).spawn_listener().await?);
        handles.push(Arc::clone(&self).spawn_maintenance());
        handles.push(self.breaker_service.clone().spawn());
        handles.push(Arc::clone(&self.mempool).spawn_maintenance());

        if self.config.auto_mine {
            let Some(miner_address) = self.config.miner_address.clone() else {
                return Err(AgoraError::Storage(
                    "auto_mine requires miner_address".to_string(),
                ));
            };
            handles.push(Arc::clone(&self).spawn_miner(miner_address));
        }

        self.bootstrap().await;
        Ok(handles)
    }
}
