//! Test harness: a wired store + mempool + engine with a fixed clock.

use std::sync::Arc;
use std::time::Duration;

use agora_core::chain_state::MemoryChainStore;
use agora_core::constants::CURRENT_VERSION;
use agora_core::crypto::HybridKeyManager;
use agora_core::error::{AgoraError, TransactionError};
use agora_core::traits::{NullAudit, NullMetrics, VoteEligibility};
use agora_core::types::{
    Currency, Hash256, OutPoint, Script, Transaction, TxInput, TxOutput, TxStatus, TxType,
    UtxoEntry, SEQUENCE_FINAL,
};
use agora_mempool::{Mempool, MempoolConfig};
use agora_pow::{PowEngine, PowEngineConfig};

/// Fixed wall clock used across harness components, milliseconds.
pub const NOW_MS: u64 = 1_700_000_000_000;

/// Vote gate that accepts everyone (the voting module is out of scope for
/// these scenarios).
pub struct OpenVotes;

impl VoteEligibility for OpenVotes {
    fn check_eligibility(&self, _address: &str, _height: u64) -> Result<(), TransactionError> {
        Ok(())
    }

    fn validate_work(&self, _address: &str, _difficulty_millis: u64) -> Result<bool, AgoraError> {
        Ok(true)
    }
}

/// A wired store + mempool + PoW engine sharing one in-memory chain.
pub struct Harness {
    pub store: Arc<MemoryChainStore>,
    pub mempool: Arc<Mempool>,
    pub engine: PowEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_mempool_config(MempoolConfig {
            retry_base_delay: Duration::from_millis(1),
            ..MempoolConfig::default()
        })
    }

    pub fn with_mempool_config(config: MempoolConfig) -> Self {
        let store = Arc::new(MemoryChainStore::new());
        let keys = Arc::new(HybridKeyManager::generate());
        let mempool = Arc::new(Mempool::with_clock(
            config,
            store.clone(),
            store.clone(),
            Arc::new(OpenVotes),
            keys.clone(),
            Arc::new(NullAudit),
            Arc::new(NullMetrics),
            || NOW_MS,
        ));
        let engine = PowEngine::with_clock(
            PowEngineConfig {
                worker_capacity: 2,
                window_per_worker: 4_096,
                batch_size: 256,
                ..PowEngineConfig::default()
            },
            store.clone(),
            store.clone(),
            keys,
            mempool.clone(),
            Arc::new(NullAudit),
            Arc::new(NullMetrics),
            || NOW_MS,
        );
        Self { store, mempool, engine }
    }

    /// Seed a confirmed, spendable UTXO and return its outpoint.
    pub fn fund(&self, seed: u8, amount: u64) -> OutPoint {
        let op = OutPoint { txid: Hash256([seed; 32]), index: 0 };
        self.store.insert_utxo(
            op.clone(),
            UtxoEntry {
                output: TxOutput {
                    address: "ag1spender".into(),
                    amount,
                    script: Script::default(),
                    index: 0,
                    currency: Currency::default(),
                },
                block_height: 0,
                is_coinbase: false,
                spent: false,
            },
        );
        op
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// An unsigned standard transaction spending `op` with the given fee.
pub fn spend(op: OutPoint, amount: u64, fee: u64) -> Transaction {
    Transaction {
        version: CURRENT_VERSION,
        tx_type: TxType::Standard,
        status: TxStatus::Pending,
        inputs: vec![TxInput {
            previous_output: op,
            signature: vec![],
            public_key: vec![],
            address: "ag1spender".into(),
            amount,
            script: Script::default(),
            sequence: SEQUENCE_FINAL,
            confirmations: 0,
        }],
        outputs: vec![TxOutput {
            address: "ag1recipient".into(),
            amount: amount - fee,
            script: Script::default(),
            index: 0,
            currency: Currency::default(),
        }],
        timestamp_ms: NOW_MS,
        fee,
        lock_time: None,
        witness: None,
        block_height: None,
        signature: vec![],
    }
}
