//! The mining engine.
//!
//! [`PowEngine`] builds block templates from the mempool, drives the nonce
//! search, and validates and appends found or received blocks. The search
//! tries strategies in order: an optional GPU backend (guarded by a
//! circuit breaker) → parallel CPU over disjoint worker ranges →
//! single-threaded scan. A template whose age exceeds the refresh window
//! or whose mempool snapshot went stale is rebuilt rather than mined to
//! exhaustion.
//!
//! Consecutive attempt failures back off exponentially
//! (`backoff_base × 2^failures`, capped) and stop the loop entirely at
//! `max_failures`; an external restart is then required.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use primitive_types::U256;
use tracing::{debug, info, warn};

use agora_core::breaker::{BreakerConfig, CircuitRegistry};
use agora_core::constants::{INITIAL_DIFFICULTY_MILLIS, MAX_NONCE};
use agora_core::difficulty;
use agora_core::error::{BlockError, MiningError};
use agora_core::merkle;
use agora_core::pow::{hash_header, meets_target, target_from_difficulty};
use agora_core::reward::expected_reward;
use agora_core::traits::{AuditSink, ChainStore, KeyManager, MetricsSink, UtxoStore};
use agora_core::types::{Block, BlockHeader, Hash256};
use agora_mempool::Mempool;

use crate::inflight::InflightTracker;
use crate::template::{
    build_coinbase, max_time, select_transactions, selection_budget, version_bounds, BlockTemplate,
};
use crate::validation::{validate_block_with_timeout, BlockContext};
use crate::workers::{MiningOutcome, MiningTask, WorkerPool};

/// Circuit-breaker endpoint key for the GPU backend.
const GPU_ENDPOINT: &str = "gpu-miner";

/// Bound on the template and solution caches.
const MAX_CACHED: usize = 64;

/// Optional accelerator backend. No built-in implementation ships; a
/// backend plugs in behind the engine's circuit breaker.
pub trait GpuMiner: Send + Sync {
    fn mine(&self, task: &MiningTask) -> Result<MiningOutcome, MiningError>;
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct PowEngineConfig {
    /// Nonces per interrupt check inside a worker.
    pub batch_size: u64,
    /// Nonces assigned to each worker per attempt window.
    pub window_per_worker: u64,
    /// Seconds before a template is considered stale and rebuilt.
    pub template_refresh_secs: u64,
    /// Consecutive failures that stop the mining loop.
    pub max_failures: u32,
    /// Backoff base in milliseconds (doubles per failure).
    pub backoff_base_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub backoff_cap_ms: u64,
    /// Worker pool bound; defaults to hardware parallelism.
    pub worker_capacity: usize,
}

impl Default for PowEngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            window_per_worker: 100_000,
            template_refresh_secs: 10,
            max_failures: 5,
            backoff_base_ms: 5_000,
            backoff_cap_ms: 30_000,
            worker_capacity: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Snapshot of the engine's runtime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinerStatus {
    pub blocks_mined: u64,
    pub consecutive_failures: u32,
    pub interrupted: bool,
}

/// Block production and validation engine.
pub struct PowEngine {
    config: PowEngineConfig,
    chain: Arc<dyn ChainStore>,
    utxos: Arc<dyn UtxoStore>,
    keys: Arc<dyn KeyManager>,
    mempool: Arc<Mempool>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
    workers: Arc<WorkerPool>,
    gpu: Option<Arc<dyn GpuMiner>>,
    breakers: CircuitRegistry,
    /// Serializes template construction over the mempool snapshot.
    selection: tokio::sync::Mutex<()>,
    template_cache: Mutex<HashMap<Hash256, BlockTemplate>>,
    /// `(previous_hash, merkle_root) → (nonce, hash)` for solved work.
    solution_cache: Mutex<HashMap<(Hash256, Hash256), (u64, Hash256)>>,
    pub inflight: InflightTracker,
    interrupt: Arc<AtomicBool>,
    /// Interrupt flag of the attempt currently scanning, if any.
    current_attempt: Mutex<Option<Arc<AtomicBool>>>,
    consecutive_failures: AtomicU32,
    blocks_mined: AtomicU64,
    /// Millisecond wall clock, injectable for tests.
    clock_ms: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl PowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PowEngineConfig,
        chain: Arc<dyn ChainStore>,
        utxos: Arc<dyn UtxoStore>,
        keys: Arc<dyn KeyManager>,
        mempool: Arc<Mempool>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self::with_clock(config, chain, utxos, keys, mempool, audit, metrics, || {
            chrono::Utc::now().timestamp_millis() as u64
        })
    }

    /// Like [`new`](Self::new) but with an injected millisecond clock.
    #[allow(clippy::too_many_arguments)]
    pub fn with_clock(
        config: PowEngineConfig,
        chain: Arc<dyn ChainStore>,
        utxos: Arc<dyn UtxoStore>,
        keys: Arc<dyn KeyManager>,
        mempool: Arc<Mempool>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn MetricsSink>,
        clock_ms: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        let workers = Arc::new(WorkerPool::new(config.worker_capacity));
        Self {
            config,
            chain,
            utxos,
            keys,
            mempool,
            audit,
            metrics,
            workers,
            gpu: None,
            breakers: CircuitRegistry::new(BreakerConfig::default()),
            selection: tokio::sync::Mutex::new(()),
            template_cache: Mutex::new(HashMap::new()),
            solution_cache: Mutex::new(HashMap::new()),
            inflight: InflightTracker::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
            current_attempt: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            blocks_mined: AtomicU64::new(0),
            clock_ms: Box::new(clock_ms),
        }
    }

    /// Plug in a GPU backend. Its failures are isolated behind the
    /// engine's circuit breaker; the CPU strategies remain the fallback.
    pub fn set_gpu(&mut self, gpu: Arc<dyn GpuMiner>) {
        self.gpu = Some(gpu);
    }

    /// Request cooperative cancellation of the current and future mining
    /// work. Clear with [`resume`](Self::resume).
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
        if let Some(flag) = self.current_attempt.lock().as_ref() {
            flag.store(true, Ordering::Relaxed);
        }
    }

    /// Clear the interrupt flag.
    pub fn resume(&self) {
        self.interrupt.store(false, Ordering::Relaxed);
    }

    pub fn status(&self) -> MinerStatus {
        MinerStatus {
            blocks_mined: self.blocks_mined.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            interrupted: self.interrupt.load(Ordering::Relaxed),
        }
    }

    /// Worker pool health sweep; forwarded so the coordinator's
    /// maintenance timer can drive it.
    pub fn sweep_workers(&self, max_idle: Duration) {
        self.workers.sweep_idle(max_idle);
    }

    // ------------------------------------------------------------------
    // Template construction
    // ------------------------------------------------------------------

    /// Build a block template for `miner_address` at the current tip.
    ///
    /// Selection is serialized with other template builds over a mempool
    /// snapshot so concurrent builds cannot double-include a transaction.
    pub async fn get_block_template(
        &self,
        miner_address: &str,
    ) -> Result<BlockTemplate, MiningError> {
        let _selection = self.selection.lock().await;

        let now_ms = (self.clock_ms)();
        let now_secs = now_ms / 1000;

        let (height, previous_hash, prev_timestamp, parent_difficulty) = self.tip_context()?;

        let difficulty_millis = self.expected_difficulty_at(height, parent_difficulty);
        let target = target_from_difficulty(difficulty_millis)?;

        let snapshot = self.mempool.snapshot_by_fee_rate();
        let selection = select_transactions(
            &snapshot,
            self.chain.as_ref(),
            self.utxos.as_ref(),
            self.keys.as_ref(),
            now_ms,
            selection_budget(),
        );
        if !selection.skipped.is_empty() {
            debug!(skipped = selection.skipped.len(), "template: dropped stale candidates");
        }

        let extra_nonce: u32 = rand::random();
        let coinbase = build_coinbase(
            miner_address,
            height,
            expected_reward(height),
            extra_nonce,
            now_ms,
        );

        let mut transactions = Vec::with_capacity(1 + selection.transactions.len());
        transactions.push(coinbase);
        transactions.extend(selection.transactions);

        let mut txids = Vec::with_capacity(transactions.len());
        for tx in &transactions {
            let txid = tx.txid().map_err(|e| MiningError::Store(e.to_string()))?;
            txids.push(txid);
        }
        let merkle_root = merkle::merkle_root(&txids);

        let (min_version, max_version, default_version) = version_bounds();
        let template = BlockTemplate {
            version: default_version,
            height,
            previous_hash,
            timestamp: now_secs.max(prev_timestamp),
            difficulty: difficulty_millis,
            transactions,
            merkle_root,
            target,
            min_time: prev_timestamp,
            max_time: max_time(now_secs),
            min_version,
            max_version,
            default_version,
            miner_address: miner_address.to_string(),
        };

        let mut cache = self.template_cache.lock();
        if cache.len() >= MAX_CACHED {
            cache.clear();
        }
        cache.insert(template.template_hash(), template.clone());

        Ok(template)
    }

    /// Previously built template by its cache key.
    pub fn cached_template(&self, template_hash: &Hash256) -> Option<BlockTemplate> {
        self.template_cache.lock().get(template_hash).cloned()
    }

    /// Previously solved work for a `(previous_hash, merkle_root)` pair.
    pub fn cached_solution(&self, previous_hash: &Hash256, merkle_root: &Hash256) -> Option<(u64, Hash256)> {
        self.solution_cache
            .lock()
            .get(&(*previous_hash, *merkle_root))
            .copied()
    }

    /// `(next_height, tip_hash, tip_timestamp, tip_difficulty)`; an empty
    /// chain maps to the genesis mining context.
    fn tip_context(&self) -> Result<(u64, Hash256, u64, u64), MiningError> {
        match self.chain.current_height() {
            Ok(height) => {
                let tip = self
                    .chain
                    .get_block_by_height(height)
                    .map_err(|e| MiningError::Store(e.to_string()))?
                    .ok_or(MiningError::Block(BlockError::InvalidPrevHash))?;
                Ok((height + 1, tip.hash(), tip.header.timestamp, tip.header.difficulty))
            }
            Err(_) => Ok((0, Hash256::ZERO, 0, INITIAL_DIFFICULTY_MILLIS)),
        }
    }

    fn expected_difficulty_at(&self, height: u64, parent_difficulty: u64) -> u64 {
        difficulty::expected_difficulty(height, parent_difficulty, |h| {
            self.chain
                .get_block_by_height(h)
                .ok()
                .flatten()
                .map(|b| b.header.timestamp)
        })
    }

    // ------------------------------------------------------------------
    // Mining loop
    // ------------------------------------------------------------------

    /// Mine one block for `miner_address`.
    ///
    /// Loops over template builds and attempt windows until a solution is
    /// found, the engine is interrupted, or `max_failures` consecutive
    /// attempt errors stop the loop.
    pub async fn mine_block(&self, miner_address: &str) -> Result<Block, MiningError> {
        loop {
            if self.interrupt.load(Ordering::Relaxed) {
                return Err(MiningError::Interrupted);
            }

            let template = self.get_block_template(miner_address).await?;
            let cache_key = (template.previous_hash, template.merkle_root);

            if let Some((nonce, hash)) = self.cached_solution(&cache_key.0, &cache_key.1) {
                debug!(%hash, nonce, "miner: solution cache hit");
                return Ok(self.finish_block(&template, nonce, hash));
            }

            match self.mine_attempt(&template).await {
                Ok(Some((nonce, hash))) => {
                    let mut cache = self.solution_cache.lock();
                    if cache.len() >= MAX_CACHED {
                        cache.clear();
                    }
                    cache.insert(cache_key, (nonce, hash));
                    drop(cache);

                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    self.blocks_mined.fetch_add(1, Ordering::Relaxed);
                    self.metrics.inc_counter("blocks_mined_total", 1);
                    self.audit.record(
                        "block_mined",
                        serde_json::json!({
                            "height": template.height,
                            "hash": hash.to_string(),
                            "nonce": nonce,
                        }),
                    );
                    info!(height = template.height, %hash, nonce, "miner: block found");
                    return Ok(self.finish_block(&template, nonce, hash));
                }
                Ok(None) => {
                    // Stale template or exhausted window: rebuild and retry.
                    continue;
                }
                Err(MiningError::Interrupted) => return Err(MiningError::Interrupted),
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    self.metrics.inc_counter("mining_failures_total", 1);
                    if failures >= self.config.max_failures {
                        warn!(failures, "miner: stopping after repeated failures");
                        return Err(MiningError::TooManyFailures(failures));
                    }
                    let backoff = (self.config.backoff_base_ms << failures.min(16))
                        .min(self.config.backoff_cap_ms);
                    warn!(failures, backoff_ms = backoff, error = %e, "miner: attempt failed, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    fn finish_block(&self, template: &BlockTemplate, nonce: u64, hash: Hash256) -> Block {
        let validators = self.chain.get_validators().unwrap_or_default();
        let block = template.to_block(nonce, validators);
        debug_assert_eq!(block.hash(), hash);
        block
    }

    /// One attempt: scan nonce windows for this template until found,
    /// interrupted, stale, or the space is exhausted.
    ///
    /// `Ok(None)` means the caller should rebuild the template.
    async fn mine_attempt(
        &self,
        template: &BlockTemplate,
    ) -> Result<Option<(u64, Hash256)>, MiningError> {
        let attempt_flag = Arc::new(AtomicBool::new(false));
        *self.current_attempt.lock() = Some(attempt_flag.clone());

        let deadline = Instant::now() + Duration::from_secs(self.config.template_refresh_secs);
        let mempool_fingerprint = self.mempool.len();
        let window = self.config.window_per_worker * self.workers.capacity() as u64;

        let mut window_start = 0u64;
        while window_start < MAX_NONCE {
            if self.interrupt.load(Ordering::Relaxed) {
                return Err(MiningError::Interrupted);
            }
            if Instant::now() >= deadline || self.mempool.len() != mempool_fingerprint {
                debug!("miner: structure update needed, rebuilding template");
                return Ok(None);
            }

            let window_end = window_start.saturating_add(window).min(MAX_NONCE);

            // Strategy 1: GPU, when present and its circuit is closed.
            if let Some(gpu) = &self.gpu {
                if self.breakers.guard(GPU_ENDPOINT).is_ok() {
                    let task = self.make_task(template, window_start, window_end, &attempt_flag);
                    match gpu.mine(&task) {
                        Ok(MiningOutcome::Found { nonce, hash }) => {
                            self.breakers.on_success(GPU_ENDPOINT);
                            return Ok(Some((nonce, hash)));
                        }
                        Ok(MiningOutcome::Exhausted) => {
                            self.breakers.on_success(GPU_ENDPOINT);
                            window_start = window_end;
                            continue;
                        }
                        Ok(MiningOutcome::Interrupted) => {
                            return Err(MiningError::Interrupted);
                        }
                        Err(e) => {
                            warn!(error = %e, "miner: GPU backend failed, falling back to CPU");
                            self.breakers.on_failure(GPU_ENDPOINT);
                        }
                    }
                }
            }

            // Strategy 2: parallel CPU over disjoint worker ranges.
            let outcome = {
                let pool = Arc::clone(&self.workers);
                let header_base = template.header_base();
                let target = template.target;
                let batch = self.config.batch_size;
                let cancel = attempt_flag.clone();
                tokio::task::spawn_blocking(move || {
                    run_parallel(&pool, header_base, target, window_start, window_end, batch, cancel)
                })
                .await
                .map_err(|e| MiningError::Store(e.to_string()))?
            };

            match outcome {
                Ok(MiningOutcome::Found { nonce, hash }) => return Ok(Some((nonce, hash))),
                Ok(MiningOutcome::Exhausted) => {
                    window_start = window_end;
                    continue;
                }
                Ok(MiningOutcome::Interrupted) => return Err(MiningError::Interrupted),
                Err(e) => {
                    // Strategy 3: single-threaded scan of the same window.
                    warn!(error = %e, "miner: worker pool unavailable, scanning single-threaded");
                    match self.run_single(template, window_start, window_end, &attempt_flag) {
                        MiningOutcome::Found { nonce, hash } => return Ok(Some((nonce, hash))),
                        MiningOutcome::Exhausted => {
                            window_start = window_end;
                            continue;
                        }
                        MiningOutcome::Interrupted => return Err(MiningError::Interrupted),
                    }
                }
            }
        }

        // The full nonce space is spent for this header; a fresh template
        // (new timestamp, new extra-nonce) reopens the search.
        Ok(None)
    }

    fn make_task(
        &self,
        template: &BlockTemplate,
        start: u64,
        end: u64,
        cancel: &Arc<AtomicBool>,
    ) -> MiningTask {
        MiningTask {
            start_nonce: start,
            end_nonce: end,
            target: template.target,
            header_base: template.header_base(),
            batch_size: self.config.batch_size,
            interrupt: cancel.clone(),
        }
    }

    fn run_single(
        &self,
        template: &BlockTemplate,
        start: u64,
        end: u64,
        cancel: &Arc<AtomicBool>,
    ) -> MiningOutcome {
        let mut header = template.header_base();
        let mut nonce = start;
        let batch = self.config.batch_size.max(1);

        while nonce < end {
            if cancel.load(Ordering::Relaxed) || self.interrupt.load(Ordering::Relaxed) {
                return MiningOutcome::Interrupted;
            }
            let batch_end = nonce.saturating_add(batch).min(end);
            while nonce < batch_end {
                header.nonce = nonce;
                let hash = hash_header(&header);
                if meets_target(&hash, &template.target) {
                    return MiningOutcome::Found { nonce, hash };
                }
                nonce += 1;
            }
        }
        MiningOutcome::Exhausted
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Validate and append a block: structure → header → coinbase →
    /// transactions → merkle → chain append → mempool sweep → metrics →
    /// audit.
    pub async fn submit_block(&self, block: &Block) -> Result<Hash256, MiningError> {
        let hash = block.hash();
        let height = block.header.height;

        let (prev_hash, prev_timestamp, parent_difficulty) = if height == 0 {
            (Hash256::ZERO, 0, INITIAL_DIFFICULTY_MILLIS)
        } else {
            let parent = self
                .chain
                .get_block_by_height(height - 1)
                .map_err(|e| MiningError::Store(e.to_string()))?
                .ok_or(MiningError::Block(BlockError::InvalidPrevHash))?;
            (parent.hash(), parent.header.timestamp, parent.header.difficulty)
        };

        let ctx = BlockContext {
            height,
            prev_hash,
            prev_timestamp,
            expected_difficulty: self.expected_difficulty_at(height, parent_difficulty),
            current_time: (self.clock_ms)() / 1000,
            expected_reward: expected_reward(height),
            expected_validators: self.chain.get_validators().unwrap_or_default(),
        };

        let validated = validate_block_with_timeout(
            block.clone(),
            ctx,
            Arc::clone(&self.utxos),
            Arc::clone(&self.keys),
        )
        .await?;

        if !validated.absent_validators.is_empty() {
            self.mempool
                .report_absent_validators(&validated.absent_validators);
        }

        self.chain
            .save_block(block)
            .map_err(|e| MiningError::Store(e.to_string()))?;
        self.mempool.remove_confirmed_block(block);

        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.metrics.inc_counter("blocks_accepted_total", 1);
        self.metrics.set_gauge("chain_height", height as f64);
        self.metrics
            .observe_histogram("block_fees", validated.total_fees as f64);
        self.audit.record(
            "block_added",
            serde_json::json!({
                "height": height,
                "hash": hash.to_string(),
                "txs": block.transactions.len(),
                "fees": validated.total_fees,
            }),
        );
        info!(height, %hash, txs = block.transactions.len(), "block added to chain");

        Ok(hash)
    }
}

/// Race the worker pool over disjoint sub-ranges of `[start, end)`.
///
/// The first worker to find a solution raises the shared cancel flag so
/// the rest stop at their next batch boundary.
fn run_parallel(
    pool: &WorkerPool,
    header_base: BlockHeader,
    target: U256,
    start: u64,
    end: u64,
    batch_size: u64,
    cancel: Arc<AtomicBool>,
) -> Result<MiningOutcome, MiningError> {
    let lanes = pool.capacity().max(1) as u64;
    let span = end.saturating_sub(start);
    if span == 0 {
        return Ok(MiningOutcome::Exhausted);
    }
    let per_lane = (span / lanes).max(1);

    let mut handles = Vec::new();
    for _ in 0..lanes.min(span) {
        handles.push(pool.acquire()?);
    }

    let found: Mutex<Option<(u64, Hash256)>> = Mutex::new(None);
    std::thread::scope(|scope| {
        for (lane, handle) in handles.iter().enumerate() {
            let lane_start = start + lane as u64 * per_lane;
            let lane_end = if lane + 1 == handles.len() {
                end
            } else {
                (lane_start + per_lane).min(end)
            };
            if lane_start >= lane_end {
                continue;
            }

            let task = MiningTask {
                start_nonce: lane_start,
                end_nonce: lane_end,
                target,
                header_base: header_base.clone(),
                batch_size,
                interrupt: cancel.clone(),
            };
            let found = &found;
            let cancel = cancel.clone();
            scope.spawn(move || {
                if let Ok(MiningOutcome::Found { nonce, hash }) = handle.run(task) {
                    *found.lock() = Some((nonce, hash));
                    cancel.store(true, Ordering::Relaxed);
                }
            });
        }
    });
    drop(handles);

    if let Some((nonce, hash)) = *found.lock() {
        return Ok(MiningOutcome::Found { nonce, hash });
    }
    if cancel.load(Ordering::Relaxed) {
        Ok(MiningOutcome::Interrupted)
    } else {
        Ok(MiningOutcome::Exhausted)
    }
}
