//! Block template construction and transaction selection.
//!
//! A template is everything a miner needs to start the nonce search:
//! header fields, the selected transaction set (coinbase first), the
//! merkle root, and the derived target. Selection greedily packs the
//! mempool snapshot by descending fee rate, re-validating each candidate
//! against the current tip so stale pool entries never reach a block.

use std::collections::{HashMap, HashSet};

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use agora_core::constants::{
    CURRENT_VERSION, MAX_BLOCK_SIZE, MAX_BLOCK_VERSION, MAX_FUTURE_BLOCK_TIME, MAX_TX_SIZE,
    MIN_BLOCK_VERSION,
};
use agora_core::traits::{ChainStore, KeyManager, UtxoStore};
use agora_core::types::{
    Block, BlockHeader, Currency, Hash256, OutPoint, Script, Transaction, TxOutput, TxStatus,
    TxType,
};
use agora_mempool::MempoolEntry;

/// Tag string embedded in every coinbase script this node mines.
pub const MINER_TAG: &str = "agora";

/// Maximum absolute drift between a selected transaction's timestamp and
/// the template's wall clock, in milliseconds.
pub const MAX_TIME_DRIFT_MS: u64 = 2 * 60 * 60 * 1000;

/// Encode the coinbase script: height (8 hex) ‖ miner tag ‖ extra nonce
/// (8 hex).
pub fn encode_coinbase_script(height: u64, extra_nonce: u32) -> Vec<u8> {
    format!("{:08x}{}{:08x}", height & 0xFFFF_FFFF, MINER_TAG, extra_nonce).into_bytes()
}

/// Parse a coinbase script back into `(height, extra_nonce)`.
///
/// Returns `None` when the shape or the embedded tag is wrong.
pub fn parse_coinbase_script(bytes: &[u8]) -> Option<(u64, u32)> {
    let s = std::str::from_utf8(bytes).ok()?;
    if s.len() != 8 + MINER_TAG.len() + 8 {
        return None;
    }
    let (height_hex, rest) = s.split_at(8);
    let (tag, nonce_hex) = rest.split_at(MINER_TAG.len());
    if tag != MINER_TAG {
        return None;
    }
    let height = u64::from_str_radix(height_hex, 16).ok()?;
    let extra_nonce = u32::from_str_radix(nonce_hex, 16).ok()?;
    Some((height, extra_nonce))
}

/// A ready-to-mine block template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub version: u32,
    pub height: u64,
    pub previous_hash: Hash256,
    /// Proposed header timestamp, seconds.
    pub timestamp: u64,
    /// Difficulty in millis.
    pub difficulty: u64,
    /// Coinbase first, then the selected transactions.
    pub transactions: Vec<Transaction>,
    pub merkle_root: Hash256,
    pub target: U256,
    /// Earliest acceptable header timestamp (parent's timestamp).
    pub min_time: u64,
    /// Latest acceptable header timestamp (`now + 7200`).
    pub max_time: u64,
    pub min_version: u32,
    pub max_version: u32,
    pub default_version: u32,
    pub miner_address: String,
}

impl BlockTemplate {
    /// Cache key: hash over the fields that identify this template's work.
    pub fn template_hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(32 + 32 + 8);
        data.extend_from_slice(self.previous_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.height.to_be_bytes());
        Hash256::digest(&data)
    }

    /// Assemble the block this template describes, with the given nonce.
    pub fn to_block(&self, nonce: u64, validators: Vec<String>) -> Block {
        Block {
            header: BlockHeader {
                version: self.version,
                previous_hash: self.previous_hash,
                merkle_root: self.merkle_root,
                timestamp: self.timestamp,
                difficulty: self.difficulty,
                nonce,
                height: self.height,
                miner_address: self.miner_address.clone(),
            },
            transactions: self.transactions.clone(),
            validators,
        }
    }

    /// The header base handed to mining workers (nonce zeroed).
    pub fn header_base(&self) -> BlockHeader {
        BlockHeader {
            version: self.version,
            previous_hash: self.previous_hash,
            merkle_root: self.merkle_root,
            timestamp: self.timestamp,
            difficulty: self.difficulty,
            nonce: 0,
            height: self.height,
            miner_address: self.miner_address.clone(),
        }
    }
}

/// Build the coinbase transaction paying `reward` to `miner_address`.
pub fn build_coinbase(
    miner_address: &str,
    height: u64,
    reward: u64,
    extra_nonce: u32,
    timestamp_ms: u64,
) -> Transaction {
    Transaction {
        version: CURRENT_VERSION,
        tx_type: TxType::Coinbase,
        status: TxStatus::Pending,
        inputs: vec![],
        outputs: vec![TxOutput {
            address: miner_address.to_string(),
            amount: reward,
            script: Script::P2pkh(encode_coinbase_script(height, extra_nonce)),
            index: 0,
            currency: Currency::default(),
        }],
        timestamp_ms,
        fee: 0,
        lock_time: None,
        witness: None,
        block_height: Some(height),
        signature: vec![],
    }
}

/// Outcome of greedy transaction selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionOutcome {
    pub transactions: Vec<Transaction>,
    pub total_fees: u64,
    /// Candidates dropped during re-validation, by txid.
    pub skipped: Vec<Hash256>,
}

/// Greedily pack mempool entries by descending fee rate.
///
/// Every candidate is re-validated against the current tip: size bounds,
/// timestamp drift, unspent inputs (resolving parents selected earlier in
/// this same template), no intra-template double-spend, and signatures.
/// Rejected candidates are skipped, never fatal: a stale pool entry must
/// not prevent the miner from producing a block.
pub fn select_transactions(
    snapshot: &[MempoolEntry],
    chain: &dyn ChainStore,
    utxos: &dyn UtxoStore,
    keys: &dyn KeyManager,
    now_ms: u64,
    max_bytes: usize,
) -> SelectionOutcome {
    let mut entries: Vec<&MempoolEntry> = snapshot.iter().collect();
    entries.sort_by(|a, b| b.fee_rate.total_cmp(&a.fee_rate));

    let mut outcome = SelectionOutcome::default();
    let mut remaining = max_bytes;
    let mut seen: HashSet<Hash256> = HashSet::new();
    let mut spent: HashSet<OutPoint> = HashSet::new();
    // Outputs created by transactions already selected into this template.
    let mut template_outputs: HashMap<OutPoint, u64> = HashMap::new();

    'candidates: for entry in entries {
        let tx = &entry.tx;

        if !seen.insert(entry.txid) {
            continue;
        }
        if tx.is_coinbase() {
            outcome.skipped.push(entry.txid);
            continue;
        }
        if chain.has_transaction(&entry.txid).unwrap_or(true) {
            outcome.skipped.push(entry.txid);
            continue;
        }
        if entry.vsize > MAX_TX_SIZE || entry.vsize > remaining {
            outcome.skipped.push(entry.txid);
            continue;
        }
        if tx.timestamp_ms.abs_diff(now_ms) > MAX_TIME_DRIFT_MS {
            outcome.skipped.push(entry.txid);
            continue;
        }

        // Inputs: unspent, not consumed earlier in this template.
        for input in &tx.inputs {
            if spent.contains(&input.previous_output) {
                outcome.skipped.push(entry.txid);
                continue 'candidates;
            }
            let available = match template_outputs.get(&input.previous_output) {
                Some(&amount) => amount == input.amount,
                None => match utxos.get_utxo(&input.previous_output) {
                    Ok(Some(utxo)) => !utxo.spent && utxo.output.amount == input.amount,
                    _ => false,
                },
            };
            if !available {
                outcome.skipped.push(entry.txid);
                continue 'candidates;
            }

            if !input.public_key.is_empty() {
                let Ok(payload) = tx.signable_payload() else {
                    outcome.skipped.push(entry.txid);
                    continue 'candidates;
                };
                let valid = keys
                    .verify(&payload, &input.signature, &input.public_key)
                    .unwrap_or(false);
                if !valid {
                    outcome.skipped.push(entry.txid);
                    continue 'candidates;
                }
            }
        }

        // Commit the candidate.
        for input in &tx.inputs {
            spent.insert(input.previous_output.clone());
        }
        for output in &tx.outputs {
            template_outputs.insert(
                OutPoint { txid: entry.txid, index: output.index },
                output.amount,
            );
        }
        remaining -= entry.vsize;
        outcome.total_fees = outcome.total_fees.saturating_add(entry.fee);
        outcome.transactions.push(tx.clone());
    }

    outcome
}

/// Default byte budget for selected transactions: the block limit less a
/// small allowance for the header and coinbase.
pub fn selection_budget() -> usize {
    MAX_BLOCK_SIZE - 4096
}

/// Version bounds advertised in templates.
pub fn version_bounds() -> (u32, u32, u32) {
    (MIN_BLOCK_VERSION, MAX_BLOCK_VERSION, MIN_BLOCK_VERSION)
}

/// Latest acceptable timestamp for a block relative to `now` seconds.
pub fn max_time(now_secs: u64) -> u64 {
    now_secs + MAX_FUTURE_BLOCK_TIME
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as StdHashSet;
    use std::sync::Arc;

    use agora_core::chain_state::MemoryChainStore;
    use agora_core::constants::COIN;
    use agora_core::crypto::HybridKeyManager;
    use agora_core::types::{TxInput, UtxoEntry, SEQUENCE_FINAL};

    const NOW_MS: u64 = 1_700_000_000_000;

    // ------------------------------------------------------------------
    // Coinbase script
    // ------------------------------------------------------------------

    #[test]
    fn coinbase_script_roundtrip() {
        let script = encode_coinbase_script(1234, 0xDEADBEEF);
        assert_eq!(parse_coinbase_script(&script), Some((1234, 0xDEADBEEF)));
    }

    #[test]
    fn coinbase_script_shape() {
        let script = encode_coinbase_script(1, 2);
        let s = String::from_utf8(script).unwrap();
        assert_eq!(s.len(), 8 + MINER_TAG.len() + 8);
        assert!(s.starts_with("00000001"));
        assert!(s.ends_with("00000002"));
        assert!(s.contains(MINER_TAG));
    }

    #[test]
    fn coinbase_script_rejects_bad_tag() {
        let mut script = encode_coinbase_script(1, 2);
        script[9] = b'X';
        assert_eq!(parse_coinbase_script(&script), None);
    }

    #[test]
    fn coinbase_script_rejects_wrong_length() {
        assert_eq!(parse_coinbase_script(b"short"), None);
        assert_eq!(parse_coinbase_script(&[]), None);
    }

    #[test]
    fn build_coinbase_shape() {
        let cb = build_coinbase("ag1miner", 42, 50 * COIN, 7, NOW_MS);
        assert!(cb.is_coinbase());
        assert_eq!(cb.outputs[0].amount, 50 * COIN);
        assert_eq!(cb.outputs[0].address, "ag1miner");
        assert_eq!(cb.fee, 0);
        assert_eq!(cb.block_height, Some(42));
        let (height, extra) = parse_coinbase_script(cb.outputs[0].script.payload()).unwrap();
        assert_eq!(height, 42);
        assert_eq!(extra, 7);
    }

    // ------------------------------------------------------------------
    // Template plumbing
    // ------------------------------------------------------------------

    fn sample_template() -> BlockTemplate {
        BlockTemplate {
            version: 1,
            height: 5,
            previous_hash: Hash256([0x11; 32]),
            timestamp: NOW_MS / 1000,
            difficulty: 1000,
            transactions: vec![build_coinbase("ag1miner", 5, 50 * COIN, 1, NOW_MS)],
            merkle_root: Hash256([0x22; 32]),
            target: U256::MAX,
            min_time: NOW_MS / 1000 - 60,
            max_time: max_time(NOW_MS / 1000),
            min_version: MIN_BLOCK_VERSION,
            max_version: MAX_BLOCK_VERSION,
            default_version: MIN_BLOCK_VERSION,
            miner_address: "ag1miner".into(),
        }
    }

    #[test]
    fn template_hash_stable_and_sensitive() {
        let t = sample_template();
        assert_eq!(t.template_hash(), t.template_hash());

        let mut other = t.clone();
        other.merkle_root = Hash256([0x33; 32]);
        assert_ne!(t.template_hash(), other.template_hash());
    }

    #[test]
    fn to_block_carries_template_fields() {
        let t = sample_template();
        let block = t.to_block(99, vec!["v1".into()]);
        assert_eq!(block.header.nonce, 99);
        assert_eq!(block.header.height, 5);
        assert_eq!(block.header.merkle_root, t.merkle_root);
        assert_eq!(block.validators, vec!["v1".to_string()]);
        assert_eq!(block.transactions.len(), 1);
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    fn entry_for(tx: Transaction, fee: u64) -> MempoolEntry {
        let txid = tx.txid().unwrap();
        let vsize = tx.vsize().unwrap();
        MempoolEntry {
            fee_rate: fee as f64 / vsize as f64,
            bucket_key: 0.0,
            admitted_at_ms: NOW_MS,
            parents: StdHashSet::new(),
            children: StdHashSet::new(),
            tx,
            txid,
            fee,
            vsize,
        }
    }

    fn spend_tx(op: OutPoint, amount: u64, fee: u64) -> Transaction {
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

    fn seeded_store(ops: &[(OutPoint, u64)]) -> Arc<MemoryChainStore> {
        let store = Arc::new(MemoryChainStore::new());
        for (op, amount) in ops {
            store.insert_utxo(
                op.clone(),
                UtxoEntry {
                    output: TxOutput {
                        address: "ag1spender".into(),
                        amount: *amount,
                        script: Script::default(),
                        index: op.index,
                        currency: Currency::default(),
                    },
                    block_height: 0,
                    is_coinbase: false,
                    spent: false,
                },
            );
        }
        store
    }

    fn op(seed: u8) -> OutPoint {
        OutPoint { txid: Hash256([seed; 32]), index: 0 }
    }

    #[test]
    fn selects_by_descending_fee_rate() {
        let store = seeded_store(&[(op(1), 100 * COIN), (op(2), 100 * COIN), (op(3), 100 * COIN)]);
        let keys = HybridKeyManager::generate();

        let snapshot = vec![
            entry_for(spend_tx(op(1), 100 * COIN, 1_000), 1_000),
            entry_for(spend_tx(op(2), 100 * COIN, 9_000), 9_000),
            entry_for(spend_tx(op(3), 100 * COIN, 5_000), 5_000),
        ];

        let outcome = select_transactions(
            &snapshot,
            store.as_ref(),
            store.as_ref(),
            &keys,
            NOW_MS,
            selection_budget(),
        );

        assert_eq!(outcome.transactions.len(), 3);
        assert_eq!(outcome.transactions[0].fee, 9_000);
        assert_eq!(outcome.transactions[1].fee, 5_000);
        assert_eq!(outcome.transactions[2].fee, 1_000);
        assert_eq!(outcome.total_fees, 15_000);
    }

    #[test]
    fn skips_intra_template_double_spend() {
        let store = seeded_store(&[(op(1), 100 * COIN)]);
        let keys = HybridKeyManager::generate();

        // Two candidates spending the same outpoint; higher fee wins.
        let mut low = spend_tx(op(1), 100 * COIN, 1_000);
        low.lock_time = Some(1);
        let snapshot = vec![
            entry_for(spend_tx(op(1), 100 * COIN, 9_000), 9_000),
            entry_for(low, 1_000),
        ];

        let outcome = select_transactions(
            &snapshot,
            store.as_ref(),
            store.as_ref(),
            &keys,
            NOW_MS,
            selection_budget(),
        );
        assert_eq!(outcome.transactions.len(), 1);
        assert_eq!(outcome.transactions[0].fee, 9_000);
        assert_eq!(outcome.skipped.len(), 1);
    }

    #[test]
    fn skips_unknown_and_spent_utxos() {
        let store = seeded_store(&[(op(1), 100 * COIN)]);
        store.mark_spent(&op(1)).unwrap();
        let keys = HybridKeyManager::generate();

        let snapshot = vec![
            entry_for(spend_tx(op(1), 100 * COIN, 5_000), 5_000), // spent
            entry_for(spend_tx(op(9), 100 * COIN, 5_000), 5_000), // unknown
        ];

        let outcome = select_transactions(
            &snapshot,
            store.as_ref(),
            store.as_ref(),
            &keys,
            NOW_MS,
            selection_budget(),
        );
        assert!(outcome.transactions.is_empty());
        assert_eq!(outcome.skipped.len(), 2);
    }

    #[test]
    fn skips_stale_timestamps() {
        let store = seeded_store(&[(op(1), 100 * COIN)]);
        let keys = HybridKeyManager::generate();

        let mut tx = spend_tx(op(1), 100 * COIN, 5_000);
        tx.timestamp_ms = NOW_MS - MAX_TIME_DRIFT_MS - 1;
        let snapshot = vec![entry_for(tx, 5_000)];

        let outcome = select_transactions(
            &snapshot,
            store.as_ref(),
            store.as_ref(),
            &keys,
            NOW_MS,
            selection_budget(),
        );
        assert!(outcome.transactions.is_empty());
    }

    #[test]
    fn respects_byte_budget() {
        let store = seeded_store(&[(op(1), 100 * COIN), (op(2), 100 * COIN)]);
        let keys = HybridKeyManager::generate();

        let e1 = entry_for(spend_tx(op(1), 100 * COIN, 9_000), 9_000);
        let budget = e1.vsize; // room for exactly one
        let snapshot = vec![e1, entry_for(spend_tx(op(2), 100 * COIN, 5_000), 5_000)];

        let outcome = select_transactions(
            &snapshot,
            store.as_ref(),
            store.as_ref(),
            &keys,
            NOW_MS,
            budget,
        );
        assert_eq!(outcome.transactions.len(), 1);
    }

    #[test]
    fn resolves_parent_selected_into_same_template() {
        let store = seeded_store(&[(op(1), 100 * COIN)]);
        let keys = HybridKeyManager::generate();

        let parent = spend_tx(op(1), 100 * COIN, 9_000);
        let parent_id = parent.txid().unwrap();
        let child = spend_tx(
            OutPoint { txid: parent_id, index: 0 },
            100 * COIN - 9_000,
            5_000,
        );

        let snapshot = vec![entry_for(parent, 9_000), entry_for(child, 5_000)];
        let outcome = select_transactions(
            &snapshot,
            store.as_ref(),
            store.as_ref(),
            &keys,
            NOW_MS,
            selection_budget(),
        );
        assert_eq!(outcome.transactions.len(), 2, "child follows parent in");
    }

    #[test]
    fn skips_transactions_already_in_chain() {
        // A store whose has_transaction always answers yes.
        let store = seeded_store(&[(op(1), 100 * COIN)]);
        let tx = spend_tx(op(1), 100 * COIN, 5_000);

        // Connect a block carrying the tx so has_transaction reports it.
        let block = Block {
            header: BlockHeader {
                version: 1,
                previous_hash: Hash256::ZERO,
                merkle_root: Hash256::ZERO,
                timestamp: NOW_MS / 1000,
                difficulty: 1000,
                nonce: 0,
                height: 0,
                miner_address: "ag1miner".into(),
            },
            transactions: vec![tx.clone()],
            validators: vec![],
        };
        store.save_block(&block).unwrap();

        let keys = HybridKeyManager::generate();
        let outcome = select_transactions(
            &[entry_for(tx, 5_000)],
            store.as_ref(),
            store.as_ref(),
            &keys,
            NOW_MS,
            selection_budget(),
        );
        assert!(outcome.transactions.is_empty());
    }

    #[test]
    fn rejects_bad_signature() {
        let store = seeded_store(&[(op(1), 100 * COIN)]);
        let keys = HybridKeyManager::generate();

        let mut tx = spend_tx(op(1), 100 * COIN, 5_000);
        // Attach a real public key with a garbage signature frame.
        tx.inputs[0].public_key = keys.public_key();
        tx.inputs[0].signature = vec![0u8; 66];

        let outcome = select_transactions(
            &[entry_for(tx, 5_000)],
            store.as_ref(),
            store.as_ref(),
            &keys,
            NOW_MS,
            selection_budget(),
        );
        assert!(outcome.transactions.is_empty());
    }

    #[test]
    fn accepts_valid_signature() {
        let store = seeded_store(&[(op(1), 100 * COIN)]);
        let keys = HybridKeyManager::generate();

        let mut tx = spend_tx(op(1), 100 * COIN, 5_000);
        tx.inputs[0].public_key = keys.public_key();
        tx.inputs[0].address = keys.address().unwrap();
        let payload = tx.signable_payload().unwrap();
        tx.inputs[0].signature = keys.sign(&payload).unwrap();

        let outcome = select_transactions(
            &[entry_for(tx, 5_000)],
            store.as_ref(),
            store.as_ref(),
            &keys,
            NOW_MS,
            selection_budget(),
        );
        assert_eq!(outcome.transactions.len(), 1);
    }
}
