//! The mempool: admission pipeline, replace-by-fee, ancestry limits,
//! congestion pricing, and maintenance.
//!
//! # Admission
//!
//! [`Mempool::submit`] runs the candidate through the pipeline under a
//! per-txid mutex (bounded by `admission_timeout`):
//!
//! 1. network-health and pool-health gates
//! 2. structural validation (shape, version, timestamp window, size)
//! 3. fee floor (`fee ≥ vsize × min_fee_rate`)
//! 4. UTXO validation per input (existence, unspent, amount match),
//!    resolving chained parents from the pool itself
//! 5. type-specific gates (quadratic-vote eligibility, PoW-reward
//!    maturity and work proof)
//! 6. replace-by-fee arbitration over conflicting spends
//! 7. ancestry limits (≤ 25 ancestors, ≤ 25 descendants)
//! 8. congestion-priced dynamic fee floor
//! 9. atomic insert into entries, outpoint index, and fee buckets
//! 10. audit and metrics
//!
//! Pool-dependent checks are re-run under the write lock immediately
//! before insertion, so two racing admissions of conflicting transactions
//! cannot both land.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agora_core::constants::{
    CURRENT_VERSION, MAX_INPUTS, MAX_OUTPUTS, MAX_TX_SIZE, MIN_FEE_RATE, COINBASE_MATURITY,
    INITIAL_DIFFICULTY_MILLIS, TX_FUTURE_DRIFT_MS, TX_PAST_DRIFT_MS,
};
use agora_core::error::{MempoolError, TransactionError};
use agora_core::reward;
use agora_core::traits::{AuditSink, ChainStore, KeyManager, MetricsSink, UtxoStore, VoteEligibility};
use agora_core::types::{Hash256, OutPoint, Transaction, TxType};

use crate::buckets::FeeBuckets;
use crate::entry::{fee_rate, MempoolEntry};
use crate::fees;
use crate::info::{FeeHistogram, Health, MempoolInfo, RawMempoolEntry};
use crate::locks::TxLockMap;

/// Tuning knobs for the pool.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of pooled transactions.
    pub max_size: usize,
    /// Maximum total virtual bytes.
    pub max_memory_bytes: usize,
    /// Base admission fee floor, grains per virtual byte.
    pub min_fee_rate: f64,
    /// Occupancy above which the dynamic floor applies.
    pub high_congestion_threshold: f64,
    /// Ancestor set cap at admission.
    pub max_ancestors: usize,
    /// Descendant set cap at admission.
    pub max_descendants: usize,
    /// A replacement must beat `rbf_increment × Σ conflict rates`.
    pub rbf_increment: f64,
    /// Entries older than this are expired by maintenance.
    pub max_age: Duration,
    /// Maintenance tick interval.
    pub cleanup_interval: Duration,
    /// Bound on per-txid lock acquisition.
    pub admission_timeout: Duration,
    /// Base delay for transient UTXO fetch retries (doubles per attempt).
    pub retry_base_delay: Duration,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: 50_000,
            max_memory_bytes: 256 * 1024 * 1024,
            min_fee_rate: MIN_FEE_RATE,
            high_congestion_threshold: 0.75,
            max_ancestors: 25,
            max_descendants: 25,
            rbf_increment: 1.10,
            max_age: Duration::from_secs(72 * 60 * 60),
            cleanup_interval: Duration::from_secs(10),
            admission_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Transient UTXO fetches are retried this many times.
const UTXO_FETCH_ATTEMPTS: u32 = 3;

#[derive(Default)]
struct PoolInner {
    entries: HashMap<Hash256, MempoolEntry>,
    /// Spent outpoint → txid of the pool transaction spending it.
    by_outpoint: HashMap<OutPoint, Hash256>,
    buckets: FeeBuckets,
    total_bytes: usize,
}

/// The unconfirmed transaction pool.
pub struct Mempool {
    config: MempoolConfig,
    inner: RwLock<PoolInner>,
    locks: TxLockMap,
    utxos: Arc<dyn UtxoStore>,
    chain: Arc<dyn ChainStore>,
    votes: Arc<dyn VoteEligibility>,
    keys: Arc<dyn KeyManager>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
    /// Set by the coordinator from its view of peer connectivity.
    network_healthy: AtomicBool,
    /// Last dynamic fee that computed cleanly; the fallback seed.
    last_valid_fee: Mutex<f64>,
    /// Millisecond wall clock, injectable for tests.
    clock: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl Mempool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MempoolConfig,
        utxos: Arc<dyn UtxoStore>,
        chain: Arc<dyn ChainStore>,
        votes: Arc<dyn VoteEligibility>,
        keys: Arc<dyn KeyManager>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self::with_clock(config, utxos, chain, votes, keys, audit, metrics, || {
            chrono::Utc::now().timestamp_millis() as u64
        })
    }

    /// Like [`new`](Self::new) but with an injected millisecond clock.
    #[allow(clippy::too_many_arguments)]
    pub fn with_clock(
        config: MempoolConfig,
        utxos: Arc<dyn UtxoStore>,
        chain: Arc<dyn ChainStore>,
        votes: Arc<dyn VoteEligibility>,
        keys: Arc<dyn KeyManager>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn MetricsSink>,
        clock: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        let base = config.min_fee_rate;
        Self {
            config,
            inner: RwLock::new(PoolInner::default()),
            locks: TxLockMap::new(),
            utxos,
            chain,
            votes,
            keys,
            audit,
            metrics,
            network_healthy: AtomicBool::new(true),
            last_valid_fee: Mutex::new(base),
            clock: Box::new(clock),
        }
    }

    /// Update the coordinator's network-health signal.
    pub fn set_network_healthy(&self, healthy: bool) {
        self.network_healthy.store(healthy, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Submit a candidate transaction for admission.
    ///
    /// Serialized per transaction id; unrelated ids admit in parallel.
    /// On success the txid is returned; every failure carries the specific
    /// rejection reason and is audited either way.
    pub async fn submit(&self, tx: Transaction) -> Result<Hash256, MempoolError> {
        let txid = tx.txid().map_err(MempoolError::from)?;
        let _guard = self
            .locks
            .acquire(&txid, self.config.admission_timeout)
            .await?;

        let result = self.admit(txid, &tx).await;
        match &result {
            Ok(_) => {
                self.metrics.inc_counter("mempool_admitted_total", 1);
                self.audit.record(
                    "mempool_admit",
                    serde_json::json!({ "txid": txid.to_string(), "type": tx.tx_type.name() }),
                );
                info!(%txid, tx_type = tx.tx_type.name(), "mempool: admitted");
            }
            Err(e) => {
                self.metrics.inc_counter("mempool_rejected_total", 1);
                self.audit.record(
                    "mempool_reject",
                    serde_json::json!({ "txid": txid.to_string(), "reason": e.to_string() }),
                );
                debug!(%txid, reason = %e, "mempool: rejected");
            }
        }
        result
    }

    async fn admit(&self, txid: Hash256, tx: &Transaction) -> Result<Hash256, MempoolError> {
        let now_ms = (self.clock)();

        // 1. Health gates.
        if !self.network_healthy.load(Ordering::Relaxed) {
            return Err(MempoolError::NetworkUnhealthy);
        }
        if self.health() == Health::Critical {
            return Err(MempoolError::PoolCritical);
        }

        // 2. Structural validation.
        self.validate_structure(tx, now_ms)?;

        // Duplicate checks: pool, then chain.
        if self.inner.read().entries.contains_key(&txid) {
            return Err(MempoolError::AlreadyExists(txid.to_string()));
        }
        if self
            .chain
            .has_transaction(&txid)
            .map_err(|e| MempoolError::Internal(e.to_string()))?
        {
            return Err(MempoolError::AlreadyExists(txid.to_string()));
        }

        // 3. Size vs fee floor.
        let vsize = tx.vsize()?;
        let new_rate = fee_rate(tx.fee, vsize);
        if new_rate < self.config.min_fee_rate {
            return Err(MempoolError::FeeTooLow {
                rate: new_rate,
                required: self.config.min_fee_rate,
            });
        }

        // 4. UTXO validation per input.
        let current_height = self.chain.current_height().unwrap_or(0);
        self.validate_inputs(tx, current_height).await?;

        // 5. Type-specific gates.
        self.validate_type_gate(tx, current_height)?;

        // 6–9. Arbitration and insert under the write lock; pool-dependent
        // state may have shifted while we were fetching UTXOs, so conflicts
        // and ancestry are established here, atomically with the insert.
        let mut inner = self.inner.write();

        if inner.entries.contains_key(&txid) {
            return Err(MempoolError::AlreadyExists(txid.to_string()));
        }

        let mut seen = HashSet::new();
        let mut parents = HashSet::new();
        let mut conflicts: HashSet<Hash256> = HashSet::new();
        for input in &tx.inputs {
            if !seen.insert(input.previous_output.clone()) {
                return Err(TransactionError::DuplicateInput(
                    input.previous_output.to_string(),
                )
                .into());
            }
            if inner.entries.contains_key(&input.previous_output.txid) {
                parents.insert(input.previous_output.txid);
            }
            if let Some(spender) = inner.by_outpoint.get(&input.previous_output) {
                conflicts.insert(*spender);
            }
        }

        // 6. Replace-by-fee arbitration.
        if !conflicts.is_empty() {
            let conflict_rate_sum: f64 = conflicts
                .iter()
                .filter_map(|id| inner.entries.get(id))
                .map(|e| e.fee_rate)
                .sum();
            let floor = self.config.rbf_increment * conflict_rate_sum;
            if new_rate <= floor {
                return Err(MempoolError::ReplacementFeeTooLow { rate: new_rate, floor });
            }
            for conflict in conflicts {
                let evicted = Self::remove_with_descendants_locked(&mut inner, conflict);
                info!(
                    replaced = %conflict,
                    by = %txid,
                    evicted = evicted.len(),
                    "mempool: replace-by-fee eviction"
                );
                self.metrics
                    .inc_counter("mempool_rbf_evicted_total", evicted.len() as u64);
            }
        }

        // 7. Ancestry limits.
        let ancestors = Self::collect_ancestors_locked(&inner, &parents);
        if ancestors.len() > self.config.max_ancestors {
            return Err(MempoolError::TooManyAncestors {
                count: ancestors.len(),
                max: self.config.max_ancestors,
            });
        }
        for parent in &parents {
            let descendants = Self::collect_descendants_locked(&inner, parent);
            if descendants.len() + 1 > self.config.max_descendants {
                return Err(MempoolError::TooManyDescendants {
                    count: descendants.len() + 1,
                    max: self.config.max_descendants,
                });
            }
        }

        // Capacity.
        if inner.entries.len() >= self.config.max_size
            || inner.total_bytes + vsize > self.config.max_memory_bytes
        {
            return Err(MempoolError::PoolFull);
        }

        // 8. Congestion gate.
        let occupancy = inner.entries.len() as f64 / self.config.max_size.max(1) as f64;
        if occupancy > self.config.high_congestion_threshold {
            let dynamic = self.dynamic_floor(occupancy);
            if new_rate <= dynamic {
                return Err(MempoolError::FeeTooLow { rate: new_rate, required: dynamic });
            }
        }

        // 9. Insert.
        let bucket_key = inner.buckets.insert(txid, new_rate);
        for input in &tx.inputs {
            inner.by_outpoint.insert(input.previous_output.clone(), txid);
        }
        for parent in &parents {
            if let Some(p) = inner.entries.get_mut(parent) {
                p.children.insert(txid);
            }
        }
        inner.total_bytes += vsize;
        inner.entries.insert(
            txid,
            MempoolEntry {
                tx: tx.clone(),
                txid,
                fee: tx.fee,
                vsize,
                fee_rate: new_rate,
                bucket_key,
                admitted_at_ms: now_ms,
                parents,
                children: HashSet::new(),
            },
        );
        self.metrics.set_gauge("mempool_size", inner.entries.len() as f64);
        self.metrics.set_gauge("mempool_bytes", inner.total_bytes as f64);

        Ok(txid)
    }

    /// Context-free shape checks (step 2).
    fn validate_structure(&self, tx: &Transaction, now_ms: u64) -> Result<(), MempoolError> {
        if tx.version != CURRENT_VERSION {
            return Err(TransactionError::UnsupportedVersion(tx.version).into());
        }

        if tx.tx_type.is_reward() {
            if !tx.inputs.is_empty() || tx.outputs.len() != 1 || tx.fee != 0 {
                return Err(TransactionError::InvalidCoinbase(
                    "reward tx must have zero inputs, one output, zero fee".into(),
                )
                .into());
            }
        } else {
            if tx.inputs.is_empty() || tx.outputs.is_empty() {
                return Err(TransactionError::EmptyInputsOrOutputs.into());
            }
            if tx.inputs.len() > MAX_INPUTS || tx.outputs.len() > MAX_OUTPUTS {
                return Err(TransactionError::TooManyInputsOrOutputs {
                    inputs: tx.inputs.len(),
                    outputs: tx.outputs.len(),
                }
                .into());
            }
        }

        for (i, output) in tx.outputs.iter().enumerate() {
            if output.amount == 0 {
                return Err(TransactionError::ZeroValueOutput(i).into());
            }
        }

        let earliest = now_ms.saturating_sub(TX_PAST_DRIFT_MS);
        let latest = now_ms.saturating_add(TX_FUTURE_DRIFT_MS);
        if tx.timestamp_ms < earliest || tx.timestamp_ms > latest {
            return Err(TransactionError::TimestampOutOfWindow(tx.timestamp_ms).into());
        }

        let vsize = tx.vsize()?;
        if vsize > MAX_TX_SIZE {
            return Err(TransactionError::OversizedTransaction { size: vsize, max: MAX_TX_SIZE }
                .into());
        }

        let computed = tx.computed_fee()?;
        if tx.fee != computed {
            return Err(TransactionError::FeeMismatch { declared: tx.fee, computed }.into());
        }

        Ok(())
    }

    /// Per-input UTXO validation (step 4). Inputs may resolve against
    /// either the confirmed UTXO set or the outputs of a pooled parent.
    async fn validate_inputs(
        &self,
        tx: &Transaction,
        current_height: u64,
    ) -> Result<(), MempoolError> {
        for (index, input) in tx.inputs.iter().enumerate() {
            // A pool parent resolves the input without touching the UTXO
            // store; `Some(None)` means the parent exists but lacks the
            // referenced output index.
            let pool_parent_amount = {
                let inner = self.inner.read();
                inner.entries.get(&input.previous_output.txid).map(|parent| {
                    parent
                        .tx
                        .outputs
                        .iter()
                        .find(|o| o.index == input.previous_output.index)
                        .map(|o| o.amount)
                })
            };

            let utxo_amount = match pool_parent_amount {
                Some(Some(amount)) => amount,
                Some(None) => {
                    return Err(TransactionError::UnknownUtxo(
                        input.previous_output.to_string(),
                    )
                    .into());
                }
                None => {
                    let utxo = self
                        .fetch_utxo_with_retry(&input.previous_output)
                        .await?
                        .ok_or_else(|| {
                            TransactionError::UnknownUtxo(input.previous_output.to_string())
                        })?;
                    if utxo.spent {
                        return Err(TransactionError::UtxoSpent(
                            input.previous_output.to_string(),
                        )
                        .into());
                    }
                    if !utxo.is_mature(current_height) {
                        return Err(TransactionError::ImmatureCoinbase { index }.into());
                    }
                    utxo.output.amount
                }
            };

            if input.amount != utxo_amount {
                return Err(TransactionError::AmountMismatch {
                    input: input.amount,
                    utxo: utxo_amount,
                }
                .into());
            }

            // Signature check: required whenever a public key is attached.
            if !input.public_key.is_empty() {
                let expected = self
                    .keys
                    .derive_address(&input.public_key)
                    .map_err(|_| TransactionError::InvalidSignature { index })?;
                if expected != input.address {
                    return Err(TransactionError::InvalidSignature { index }.into());
                }
                let payload = tx.signable_payload()?;
                let ok = self
                    .keys
                    .verify(&payload, &input.signature, &input.public_key)
                    .map_err(|_| TransactionError::InvalidSignature { index })?;
                if !ok {
                    return Err(TransactionError::InvalidSignature { index }.into());
                }
            }
        }
        Ok(())
    }

    /// Type-specific admission gates (step 5).
    fn validate_type_gate(
        &self,
        tx: &Transaction,
        current_height: u64,
    ) -> Result<(), MempoolError> {
        match tx.tx_type {
            TxType::QuadraticVote => {
                let sender = tx
                    .inputs
                    .first()
                    .map(|i| i.address.clone())
                    .ok_or(TransactionError::EmptyInputsOrOutputs)?;
                self.votes.check_eligibility(&sender, current_height)?;
                let difficulty = self.current_difficulty();
                let valid = self
                    .votes
                    .validate_work(&sender, difficulty)
                    .map_err(|e| MempoolError::Internal(e.to_string()))?;
                if !valid {
                    return Err(TransactionError::InvalidWorkProof(sender).into());
                }
            }
            TxType::PowReward => {
                if current_height < COINBASE_MATURITY {
                    return Err(TransactionError::InvalidCoinbase(format!(
                        "reward claim before maturity height {COINBASE_MATURITY}"
                    ))
                    .into());
                }
                let output = &tx.outputs[0];
                let expected = reward::expected_reward(current_height);
                if output.amount > expected {
                    return Err(TransactionError::InvalidCoinbase(format!(
                        "reward {} exceeds expected {expected}",
                        output.amount
                    ))
                    .into());
                }
                let difficulty = self.current_difficulty();
                let valid = self
                    .votes
                    .validate_work(&output.address, difficulty)
                    .map_err(|e| MempoolError::Internal(e.to_string()))?;
                if !valid {
                    return Err(TransactionError::InvalidWorkProof(output.address.clone()).into());
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Difficulty of the chain tip, falling back to the initial difficulty
    /// on an empty chain.
    fn current_difficulty(&self) -> u64 {
        self.chain
            .current_height()
            .ok()
            .and_then(|h| self.chain.get_block_by_height(h).ok().flatten())
            .map(|b| b.header.difficulty)
            .unwrap_or(INITIAL_DIFFICULTY_MILLIS)
    }

    /// Fetch a UTXO, retrying transient store failures with exponential
    /// backoff (1×, 2×, 4× the base delay).
    async fn fetch_utxo_with_retry(
        &self,
        outpoint: &OutPoint,
    ) -> Result<Option<agora_core::types::UtxoEntry>, MempoolError> {
        let mut delay = self.config.retry_base_delay;
        let mut last_err = String::new();
        for attempt in 0..UTXO_FETCH_ATTEMPTS {
            match self.utxos.get_utxo(outpoint) {
                Ok(utxo) => return Ok(utxo),
                Err(e) => {
                    last_err = e.to_string();
                    warn!(%outpoint, attempt, error = %last_err, "mempool: transient UTXO fetch failure");
                    if attempt + 1 < UTXO_FETCH_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(MempoolError::Internal(format!(
            "utxo fetch failed after {UTXO_FETCH_ATTEMPTS} attempts: {last_err}"
        )))
    }

    // ------------------------------------------------------------------
    // Ancestry
    // ------------------------------------------------------------------

    fn collect_ancestors_locked(inner: &PoolInner, parents: &HashSet<Hash256>) -> HashSet<Hash256> {
        let mut seen: HashSet<Hash256> = HashSet::new();
        let mut queue: VecDeque<Hash256> = parents.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(entry) = inner.entries.get(&id) {
                queue.extend(entry.parents.iter().copied());
            }
        }
        seen
    }

    fn collect_descendants_locked(inner: &PoolInner, root: &Hash256) -> HashSet<Hash256> {
        let mut seen: HashSet<Hash256> = HashSet::new();
        let mut queue: VecDeque<Hash256> = inner
            .entries
            .get(root)
            .map(|e| e.children.iter().copied().collect())
            .unwrap_or_default();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(entry) = inner.entries.get(&id) {
                queue.extend(entry.children.iter().copied());
            }
        }
        seen
    }

    /// Ancestor set of a pooled transaction (empty if unknown).
    pub fn ancestors(&self, txid: &Hash256) -> HashSet<Hash256> {
        let inner = self.inner.read();
        match inner.entries.get(txid) {
            Some(e) => Self::collect_ancestors_locked(&inner, &e.parents),
            None => HashSet::new(),
        }
    }

    /// Descendant set of a pooled transaction (empty if unknown).
    pub fn descendants(&self, txid: &Hash256) -> HashSet<Hash256> {
        let inner = self.inner.read();
        Self::collect_descendants_locked(&inner, txid)
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    fn remove_locked(inner: &mut PoolInner, txid: Hash256) -> Option<MempoolEntry> {
        let entry = inner.entries.remove(&txid)?;
        for input in &entry.tx.inputs {
            if inner.by_outpoint.get(&input.previous_output) == Some(&txid) {
                inner.by_outpoint.remove(&input.previous_output);
            }
        }
        inner.buckets.remove(&txid, entry.bucket_key);
        inner.total_bytes = inner.total_bytes.saturating_sub(entry.vsize);

        // Unlink from the ancestry graph.
        for parent in &entry.parents {
            if let Some(p) = inner.entries.get_mut(parent) {
                p.children.remove(&txid);
            }
        }
        for child in &entry.children {
            if let Some(c) = inner.entries.get_mut(child) {
                c.parents.remove(&txid);
            }
        }
        Some(entry)
    }

    fn remove_with_descendants_locked(inner: &mut PoolInner, txid: Hash256) -> Vec<Hash256> {
        let mut removed = Vec::new();
        let mut queue = VecDeque::from([txid]);
        while let Some(id) = queue.pop_front() {
            if let Some(entry) = Self::remove_locked(inner, id) {
                queue.extend(entry.children.iter().copied());
                removed.push(id);
            }
        }
        removed
    }

    /// Remove a transaction by id. Returns the entry if it was present.
    pub fn remove(&self, txid: &Hash256) -> Option<MempoolEntry> {
        Self::remove_locked(&mut self.inner.write(), *txid)
    }

    /// Remove a transaction and everything that descends from it.
    pub fn remove_with_descendants(&self, txid: &Hash256) -> Vec<Hash256> {
        Self::remove_with_descendants_locked(&mut self.inner.write(), *txid)
    }

    /// Remove transactions confirmed in `block` and any pool transactions
    /// that conflict with the block's spent outpoints.
    pub fn remove_confirmed_block(&self, block: &agora_core::types::Block) {
        let mut inner = self.inner.write();
        let mut spent: HashSet<OutPoint> = HashSet::new();

        for tx in &block.transactions {
            if let Ok(txid) = tx.txid() {
                Self::remove_locked(&mut inner, txid);
            }
            for input in &tx.inputs {
                spent.insert(input.previous_output.clone());
            }
        }

        let conflicting: Vec<Hash256> = spent
            .iter()
            .filter_map(|op| inner.by_outpoint.get(op).copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for txid in conflicting {
            let evicted = Self::remove_with_descendants_locked(&mut inner, txid);
            if !evicted.is_empty() {
                debug!(count = evicted.len(), "mempool: evicted block-conflicting txs");
            }
        }

        self.metrics.set_gauge("mempool_size", inner.entries.len() as f64);
    }

    // ------------------------------------------------------------------
    // Dynamic fee
    // ------------------------------------------------------------------

    fn dynamic_floor(&self, occupancy: f64) -> f64 {
        match fees::dynamic_min_fee(self.config.min_fee_rate, occupancy) {
            Some(rate) => rate,
            None => fees::fallback_min_fee(*self.last_valid_fee.lock()),
        }
    }

    /// The current congestion-priced admission floor.
    pub fn current_dynamic_min_fee(&self) -> f64 {
        let occupancy = {
            let inner = self.inner.read();
            inner.entries.len() as f64 / self.config.max_size.max(1) as f64
        };
        self.dynamic_floor(occupancy)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// One maintenance pass: expiry, fee refresh, bucket compaction, lock
    /// eviction.
    pub fn run_maintenance(&self) {
        let now_ms = (self.clock)();
        let max_age_ms = self.config.max_age.as_millis() as u64;

        let mut inner = self.inner.write();

        // Expire old entries (and their now-parentless descendants).
        let expired: Vec<Hash256> = inner
            .entries
            .values()
            .filter(|e| e.age_ms(now_ms) > max_age_ms)
            .map(|e| e.txid)
            .collect();
        for txid in &expired {
            let removed = Self::remove_with_descendants_locked(&mut inner, *txid);
            if !removed.is_empty() {
                info!(%txid, cascade = removed.len(), "mempool: expired");
                self.metrics
                    .inc_counter("mempool_expired_total", removed.len() as u64);
            }
        }

        // Refresh the last-valid dynamic fee.
        let occupancy = inner.entries.len() as f64 / self.config.max_size.max(1) as f64;
        if let Some(rate) = fees::dynamic_min_fee(self.config.min_fee_rate, occupancy) {
            *self.last_valid_fee.lock() = rate;
        }

        // Compact fee buckets, updating moved entries' keys.
        for (txid, new_key) in inner.buckets.compact() {
            if let Some(entry) = inner.entries.get_mut(&txid) {
                entry.bucket_key = new_key;
            }
        }

        let live: HashSet<Hash256> = inner.entries.keys().copied().collect();
        drop(inner);

        // Evict admission locks for transactions no longer pooled.
        self.locks.evict_except(|txid| live.contains(txid));
    }

    /// Spawn the periodic maintenance task. The returned handle owns the
    /// loop; abort it on shutdown.
    pub fn spawn_maintenance(self: Arc<Self>) -> JoinHandle<()> {
        let pool = self;
        let interval = pool.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pool.run_maintenance();
            }
        })
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.read().total_bytes
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.inner.read().entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<MempoolEntry> {
        self.inner.read().entries.get(txid).cloned()
    }

    /// Number of admission locks currently tracked.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Snapshot of all entries sorted by fee rate, highest first. This is
    /// what block-template selection consumes.
    pub fn snapshot_by_fee_rate(&self) -> Vec<MempoolEntry> {
        let inner = self.inner.read();
        let mut entries: Vec<MempoolEntry> = inner.entries.values().cloned().collect();
        entries.sort_by(|a, b| b.fee_rate.total_cmp(&a.fee_rate));
        entries
    }

    /// Pool health from load factor and memory pressure.
    pub fn health(&self) -> Health {
        let inner = self.inner.read();
        let load = inner.entries.len() as f64 / self.config.max_size.max(1) as f64;
        let memory = inner.total_bytes as f64 / self.config.max_memory_bytes.max(1) as f64;
        Health::classify(load, memory)
    }

    /// Aggregate pool snapshot for operators and the RPC surface.
    pub fn info(&self) -> MempoolInfo {
        let inner = self.inner.read();
        let load_factor = inner.entries.len() as f64 / self.config.max_size.max(1) as f64;
        let memory_fraction =
            inner.total_bytes as f64 / self.config.max_memory_bytes.max(1) as f64;
        let health = Health::classify(load_factor, memory_fraction);

        let mut tx_type_distribution: HashMap<String, usize> = HashMap::new();
        for entry in inner.entries.values() {
            *tx_type_distribution
                .entry(entry.tx.tx_type.name().to_string())
                .or_default() += 1;
        }

        MempoolInfo {
            size: inner.entries.len(),
            bytes: inner.total_bytes,
            load_factor,
            fee_histogram: FeeHistogram::from_rates(
                inner.entries.values().map(|e| e.fee_rate).collect(),
            ),
            tx_type_distribution,
            oldest_ms: inner.entries.values().map(|e| e.admitted_at_ms).min(),
            youngest_ms: inner.entries.values().map(|e| e.admitted_at_ms).max(),
            health,
            is_accepting: health != Health::Critical
                && self.network_healthy.load(Ordering::Relaxed),
        }
    }

    /// Per-transaction detail map keyed by txid hex.
    ///
    /// With `verbose = false` only the keys are populated (empty detail
    /// map values are omitted and the ids are returned instead).
    pub fn raw_mempool(&self, verbose: bool) -> RawMempool {
        let inner = self.inner.read();
        if !verbose {
            return RawMempool::Ids(inner.entries.keys().map(Hash256::to_string).collect());
        }

        let mut out = HashMap::new();
        for entry in inner.entries.values() {
            let ancestors = Self::collect_ancestors_locked(&inner, &entry.parents);
            let descendants = Self::collect_descendants_locked(&inner, &entry.txid);
            let sum_vsize = |ids: &HashSet<Hash256>| {
                ids.iter()
                    .filter_map(|id| inner.entries.get(id))
                    .map(|e| e.vsize)
                    .sum()
            };
            out.insert(
                entry.txid.to_string(),
                RawMempoolEntry {
                    fee: entry.fee,
                    vsize: entry.vsize,
                    weight: entry.vsize * 4,
                    time_ms: entry.admitted_at_ms,
                    height: entry.tx.block_height.unwrap_or(0),
                    ancestor_count: ancestors.len(),
                    ancestor_size: sum_vsize(&ancestors),
                    descendant_count: descendants.len(),
                    descendant_size: sum_vsize(&descendants),
                    depends: entry.parents.iter().map(Hash256::to_string).collect(),
                },
            );
        }
        RawMempool::Verbose(out)
    }

    /// Quorum absence handler: block validation reports validators that
    /// failed to attest so their absence is auditable.
    pub fn report_absent_validators(&self, absent: &[String]) {
        if absent.is_empty() {
            return;
        }
        self.metrics
            .inc_counter("validators_absent_total", absent.len() as u64);
        self.audit.record(
            "validators_absent",
            serde_json::json!({ "validators": absent }),
        );
        warn!(count = absent.len(), "mempool: absent validators reported");
    }
}

/// Result of [`Mempool::raw_mempool`].
#[derive(Debug, Clone)]
pub enum RawMempool {
    /// Just the transaction ids (`verbose = false`).
    Ids(Vec<String>),
    /// Full per-transaction detail (`verbose = true`).
    Verbose(HashMap<String, RawMempoolEntry>),
}
