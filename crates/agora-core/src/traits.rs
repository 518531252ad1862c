//! Trait interfaces between the core and its collaborators.
//!
//! These traits define the contracts the node core consumes:
//! - [`UtxoStore`]: linearizable UTXO lookups for admission
//! - [`ChainStore`]: block storage and chain tip queries
//! - [`AuditSink`] / [`MetricsSink`]: non-blocking observability sinks
//! - [`KeyManager`]: hybrid signature and address derivation seam
//! - [`VoteEligibility`]: quadratic-voting gate consumed by mempool
//!   admission (the voting module itself lives outside the core)

use crate::error::{AddressError, AgoraError, CryptoError, TransactionError};
use crate::types::{Block, Hash256, OutPoint, UtxoEntry};

/// Integer square root (floor), used for quadratic voting power.
fn isqrt(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// Linearizable view of the unspent transaction output set.
///
/// Admission depends on reads here being linearizable: a UTXO reported
/// unspent must not have been spent by any previously acknowledged write.
pub trait UtxoStore: Send + Sync {
    /// Look up a UTXO by outpoint. Returns `None` if unknown.
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, AgoraError>;

    /// Transactionally mark an outpoint as spent.
    fn mark_spent(&self, outpoint: &OutPoint) -> Result<(), AgoraError>;

    /// All unspent outputs held by `address` that are eligible as voting
    /// collateral.
    fn find_utxos_for_voting(
        &self,
        address: &str,
    ) -> Result<Vec<(OutPoint, UtxoEntry)>, AgoraError>;

    /// Quadratic voting power of a UTXO set: the sum of the integer square
    /// roots of the amounts.
    fn calculate_voting_power(&self, utxos: &[(OutPoint, UtxoEntry)]) -> u128 {
        utxos
            .iter()
            .map(|(_, e)| isqrt(e.output.amount) as u128)
            .sum()
    }
}

/// Block storage and chain tip queries.
pub trait ChainStore: Send + Sync {
    /// Get a block by height. Returns `None` beyond the tip.
    fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, AgoraError>;

    /// Get a block by its header hash.
    fn get_block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, AgoraError>;

    /// Height of the current chain tip. Errors on an empty chain.
    fn current_height(&self) -> Result<u64, AgoraError>;

    /// Header hash of the current chain tip.
    fn tip_hash(&self) -> Result<Hash256, AgoraError>;

    /// Append a validated block at the tip, spending its inputs and
    /// creating its outputs.
    fn save_block(&self, block: &Block) -> Result<(), AgoraError>;

    /// Whether a transaction id appears anywhere in the stored chain.
    fn has_transaction(&self, txid: &Hash256) -> Result<bool, AgoraError>;

    /// Addresses of the validators expected to attest blocks.
    fn get_validators(&self) -> Result<Vec<String>, AgoraError>;

    /// Record a difficulty override for the block with the given hash.
    fn update_difficulty(&self, hash: &Hash256, difficulty_millis: u64) -> Result<(), AgoraError>;
}

/// Append-only audit event sink.
///
/// Implementations must tolerate back-pressure without blocking the caller;
/// dropping events under load is acceptable, blocking admission is not.
pub trait AuditSink: Send + Sync {
    fn record(&self, event_type: &str, payload: serde_json::Value);
}

/// Audit sink that discards everything.
pub struct NullAudit;

impl AuditSink for NullAudit {
    fn record(&self, _event_type: &str, _payload: serde_json::Value) {}
}

/// Audit sink that forwards events to the tracing subscriber.
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event_type: &str, payload: serde_json::Value) {
        tracing::info!(target: "audit", event = event_type, %payload);
    }
}

/// Non-blocking metrics sink.
pub trait MetricsSink: Send + Sync {
    fn inc_counter(&self, name: &str, by: u64);
    fn set_gauge(&self, name: &str, value: f64);
    fn observe_histogram(&self, name: &str, value: f64);
}

/// Metrics sink that discards everything.
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn inc_counter(&self, _name: &str, _by: u64) {}
    fn set_gauge(&self, _name: &str, _value: f64) {}
    fn observe_histogram(&self, _name: &str, _value: f64) {}
}

/// Hybrid (classical + post-quantum) signature and address seam.
///
/// The core only requires this interface; the concrete algorithm pairing
/// lives in the implementation (see
/// [`HybridKeyManager`](crate::crypto::HybridKeyManager)).
pub trait KeyManager: Send + Sync {
    /// Derive the canonical address string for a public key.
    fn derive_address(&self, public_key: &[u8]) -> Result<String, AddressError>;

    /// Recover the pubkey digest committed to by an address.
    fn address_to_hash(&self, address: &str) -> Result<Vec<u8>, AddressError>;

    /// Sign a message with this manager's keypair.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify a hybrid signature against a message and public key.
    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8])
        -> Result<bool, CryptoError>;
}

/// Eligibility gate for quadratic-vote transactions.
///
/// Checked during mempool admission for [`TxType::QuadraticVote`]
/// (account age, reputation, cooldown, votes-in-window) and for
/// [`TxType::PowReward`] work proofs. `validate_work` is address-keyed:
/// the proof binds work to a participant, not to a block header.
///
/// [`TxType::QuadraticVote`]: crate::types::TxType::QuadraticVote
/// [`TxType::PowReward`]: crate::types::TxType::PowReward
pub trait VoteEligibility: Send + Sync {
    /// Check all vote-eligibility rules for `address` at the current
    /// height. Returns the specific failure on rejection.
    fn check_eligibility(&self, address: &str, current_height: u64)
        -> Result<(), TransactionError>;

    /// Validate the address-bound proof-of-work contribution at the given
    /// difficulty.
    fn validate_work(&self, address: &str, difficulty_millis: u64) -> Result<bool, AgoraError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, Script, TxOutput};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn entry(amount: u64) -> UtxoEntry {
        UtxoEntry {
            output: TxOutput {
                address: "ag1holder".into(),
                amount,
                script: Script::default(),
                index: 0,
                currency: Currency::default(),
            },
            block_height: 0,
            is_coinbase: false,
            spent: false,
        }
    }

    fn op(seed: u8) -> OutPoint {
        OutPoint { txid: Hash256([seed; 32]), index: 0 }
    }

    // ------------------------------------------------------------------
    // Mock UtxoStore
    // ------------------------------------------------------------------

    struct MockUtxoStore {
        utxos: Mutex<HashMap<OutPoint, UtxoEntry>>,
    }

    impl UtxoStore for MockUtxoStore {
        fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, AgoraError> {
            Ok(self.utxos.lock().unwrap().get(outpoint).cloned())
        }

        fn mark_spent(&self, outpoint: &OutPoint) -> Result<(), AgoraError> {
            let mut utxos = self.utxos.lock().unwrap();
            match utxos.get_mut(outpoint) {
                Some(e) => {
                    e.spent = true;
                    Ok(())
                }
                None => Err(TransactionError::UnknownUtxo(outpoint.to_string()).into()),
            }
        }

        fn find_utxos_for_voting(
            &self,
            address: &str,
        ) -> Result<Vec<(OutPoint, UtxoEntry)>, AgoraError> {
            Ok(self
                .utxos
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, e)| !e.spent && e.output.address == address)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }
    }

    #[test]
    fn isqrt_values() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(3), 1);
        assert_eq!(isqrt(4), 2);
        assert_eq!(isqrt(99), 9);
        assert_eq!(isqrt(100), 10);
        assert_eq!(isqrt(u64::MAX), u32::MAX as u64);
    }

    #[test]
    fn voting_power_is_quadratic() {
        let store = MockUtxoStore { utxos: Mutex::new(HashMap::new()) };
        // 100 + 10_000 grains → sqrt 10 + sqrt 100 = 110, not 10_100.
        let utxos = vec![(op(1), entry(100)), (op(2), entry(10_000))];
        assert_eq!(store.calculate_voting_power(&utxos), 110);
    }

    #[test]
    fn voting_power_empty_is_zero() {
        let store = MockUtxoStore { utxos: Mutex::new(HashMap::new()) };
        assert_eq!(store.calculate_voting_power(&[]), 0);
    }

    #[test]
    fn mark_spent_flips_flag() {
        let store = MockUtxoStore { utxos: Mutex::new(HashMap::new()) };
        store.utxos.lock().unwrap().insert(op(1), entry(500));

        store.mark_spent(&op(1)).unwrap();
        assert!(store.get_utxo(&op(1)).unwrap().unwrap().spent);
    }

    #[test]
    fn mark_spent_unknown_errors() {
        let store = MockUtxoStore { utxos: Mutex::new(HashMap::new()) };
        assert!(store.mark_spent(&op(9)).is_err());
    }

    #[test]
    fn find_voting_utxos_excludes_spent() {
        let store = MockUtxoStore { utxos: Mutex::new(HashMap::new()) };
        store.utxos.lock().unwrap().insert(op(1), entry(100));
        store.utxos.lock().unwrap().insert(op(2), entry(200));
        store.mark_spent(&op(2)).unwrap();

        let found = store.find_utxos_for_voting("ag1holder").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, op(1));
    }

    // ------------------------------------------------------------------
    // Null sinks
    // ------------------------------------------------------------------

    #[test]
    fn null_sinks_are_inert() {
        NullAudit.record("test", serde_json::json!({"k": 1}));
        NullMetrics.inc_counter("c", 1);
        NullMetrics.set_gauge("g", 1.0);
        NullMetrics.observe_histogram("h", 1.0);
    }

    // ------------------------------------------------------------------
    // Object safety
    // ------------------------------------------------------------------

    fn _assert_object_safe(
        _u: &dyn UtxoStore,
        _c: &dyn ChainStore,
        _a: &dyn AuditSink,
        _m: &dyn MetricsSink,
        _k: &dyn KeyManager,
        _v: &dyn VoteEligibility,
    ) {
    }
}
