//! Full block validation.
//!
//! Validation is contextual: the caller supplies a [`BlockContext`]
//! describing the expected parent linkage, difficulty, timing, reward, and
//! validator set for the height being validated. Checks run in a fixed
//! order so rejection reasons are deterministic:
//!
//! 1. version bounds and parent linkage
//! 2. timestamp window (`[parent, now + 7200]`)
//! 3. difficulty equals the expected retarget value
//! 4. proof-of-work against the derived target
//! 5. coinbase shape, reward bound, script well-formedness
//! 6. merkle root over transaction ids
//! 7. per-transaction validation with intra-block double-spend tracking
//! 8. validator quorum (≥ 67 % of the expected set)

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use agora_core::constants::{
    MAX_BLOCK_SIZE, MAX_BLOCK_VERSION, MAX_FUTURE_BLOCK_TIME, MAX_TX_SIZE, MIN_BLOCK_VERSION,
    QUORUM_DENOMINATOR, QUORUM_NUMERATOR,
};
use agora_core::error::{BlockError, TransactionError};
use agora_core::merkle;
use agora_core::pow::{meets_target, target_from_difficulty};
use agora_core::traits::{KeyManager, UtxoStore};
use agora_core::types::{Block, Hash256, OutPoint, Transaction};

use crate::template::parse_coinbase_script;

/// Ceiling on the wall-clock cost of validating one block.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Expected chain context for the block under validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    /// Height the block claims.
    pub height: u64,
    /// Hash of the expected parent.
    pub prev_hash: Hash256,
    /// Parent's header timestamp (seconds).
    pub prev_timestamp: u64,
    /// Difficulty the retargeter expects at this height (millis).
    pub expected_difficulty: u64,
    /// Wall clock now, seconds.
    pub current_time: u64,
    /// Reward ceiling for the coinbase output.
    pub expected_reward: u64,
    /// Validators expected to attest this block.
    pub expected_validators: Vec<String>,
}

/// Summary of a successfully validated block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBlock {
    /// Sum of non-coinbase fees in grains.
    pub total_fees: u64,
    /// Value of the coinbase output in grains.
    pub coinbase_value: u64,
    /// Expected validators that did not attest (already below the quorum
    /// rejection threshold; reported so absences are auditable).
    pub absent_validators: Vec<String>,
}

/// Validate a block against its expected context.
pub fn validate_block(
    block: &Block,
    ctx: &BlockContext,
    utxos: &dyn UtxoStore,
    keys: &dyn KeyManager,
) -> Result<ValidatedBlock, BlockError> {
    let header = &block.header;

    // --- Header: version, linkage, timing, difficulty, PoW ---

    if header.version < MIN_BLOCK_VERSION || header.version > MAX_BLOCK_VERSION {
        return Err(BlockError::UnsupportedVersion(header.version));
    }
    if header.previous_hash != ctx.prev_hash || header.height != ctx.height {
        return Err(BlockError::InvalidPrevHash);
    }
    if header.timestamp < ctx.prev_timestamp {
        return Err(BlockError::TimestampBeforeParent);
    }
    let max_time = ctx.current_time + MAX_FUTURE_BLOCK_TIME;
    if header.timestamp > max_time {
        return Err(BlockError::TimestampTooFar(header.timestamp));
    }
    if header.difficulty != ctx.expected_difficulty {
        return Err(BlockError::InvalidDifficulty {
            got: header.difficulty,
            expected: ctx.expected_difficulty,
        });
    }

    let target = target_from_difficulty(header.difficulty)?;
    let hash = block.hash();
    if !meets_target(&hash, &target) {
        return Err(BlockError::InvalidPoW);
    }

    // --- Size ---

    let size = block
        .size()
        .map_err(|e| BlockError::TransactionError { index: 0, source: e })?;
    if size > MAX_BLOCK_SIZE {
        return Err(BlockError::OversizedBlock { size, max: MAX_BLOCK_SIZE });
    }

    // --- Coinbase ---

    let Some(coinbase) = block.transactions.first() else {
        return Err(BlockError::NoCoinbase);
    };
    if !coinbase.is_coinbase() {
        return Err(BlockError::FirstTxNotCoinbase);
    }
    let coinbase_value = coinbase.outputs[0].amount;
    if coinbase_value > ctx.expected_reward {
        return Err(BlockError::InvalidReward {
            got: coinbase_value,
            expected: ctx.expected_reward,
        });
    }
    match parse_coinbase_script(coinbase.outputs[0].script.payload()) {
        Some((script_height, _)) if script_height == ctx.height & 0xFFFF_FFFF => {}
        Some((script_height, _)) => {
            return Err(BlockError::MalformedCoinbaseScript(format!(
                "height {script_height} does not match block height {}",
                ctx.height
            )));
        }
        None => {
            return Err(BlockError::MalformedCoinbaseScript("unparseable".into()));
        }
    }

    for tx in block.transactions.iter().skip(1) {
        if tx.is_coinbase() || tx.tx_type.is_reward() {
            return Err(BlockError::MultipleCoinbase);
        }
    }

    // --- Merkle root over transaction ids ---

    let mut txids = Vec::with_capacity(block.transactions.len());
    for (index, tx) in block.transactions.iter().enumerate() {
        let txid = tx
            .txid()
            .map_err(|source| BlockError::TransactionError { index, source })?;
        txids.push(txid);
    }
    {
        let mut seen = HashSet::new();
        for txid in &txids {
            if !seen.insert(*txid) {
                return Err(BlockError::DuplicateTxid(txid.to_string()));
            }
        }
    }
    if merkle::merkle_root(&txids) != header.merkle_root {
        return Err(BlockError::InvalidMerkleRoot);
    }

    // --- Transactions ---

    let mut spent: HashSet<OutPoint> = HashSet::new();
    let mut block_outputs: HashMap<OutPoint, u64> = HashMap::new();
    for output in &coinbase.outputs {
        block_outputs.insert(OutPoint { txid: txids[0], index: output.index }, output.amount);
    }

    let mut total_fees: u64 = 0;
    for (index, tx) in block.transactions.iter().enumerate().skip(1) {
        let fee = validate_block_transaction(
            tx,
            &txids[index],
            ctx.height,
            &mut spent,
            &mut block_outputs,
            utxos,
            keys,
        )
        .map_err(|source| BlockError::TransactionError { index, source })?;
        total_fees = total_fees.saturating_add(fee);
    }

    // --- Validator quorum ---

    let absent_validators = check_quorum(&ctx.expected_validators, &block.validators)?;

    debug!(
        height = ctx.height,
        txs = block.transactions.len(),
        fees = total_fees,
        "block validated"
    );

    Ok(ValidatedBlock { total_fees, coinbase_value, absent_validators })
}

/// Validate a block with the overall [`VALIDATION_TIMEOUT`] applied.
pub async fn validate_block_with_timeout(
    block: Block,
    ctx: BlockContext,
    utxos: Arc<dyn UtxoStore>,
    keys: Arc<dyn KeyManager>,
) -> Result<ValidatedBlock, BlockError> {
    let work = tokio::task::spawn_blocking(move || {
        validate_block(&block, &ctx, utxos.as_ref(), keys.as_ref())
    });
    match tokio::time::timeout(VALIDATION_TIMEOUT, work).await {
        Ok(Ok(result)) => result,
        Ok(Err(_join_error)) => Err(BlockError::ValidationTimeout(
            VALIDATION_TIMEOUT.as_secs(),
        )),
        Err(_elapsed) => Err(BlockError::ValidationTimeout(VALIDATION_TIMEOUT.as_secs())),
    }
}

/// Validate one non-coinbase transaction inside a block.
///
/// Inputs may spend confirmed UTXOs or outputs created earlier in the same
/// block. Returns the transaction's fee.
fn validate_block_transaction(
    tx: &Transaction,
    txid: &Hash256,
    height: u64,
    spent: &mut HashSet<OutPoint>,
    block_outputs: &mut HashMap<OutPoint, u64>,
    utxos: &dyn UtxoStore,
    keys: &dyn KeyManager,
) -> Result<u64, TransactionError> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TransactionError::EmptyInputsOrOutputs);
    }
    let vsize = tx.vsize()?;
    if vsize > MAX_TX_SIZE {
        return Err(TransactionError::OversizedTransaction { size: vsize, max: MAX_TX_SIZE });
    }

    let mut input_total: u64 = 0;
    for (index, input) in tx.inputs.iter().enumerate() {
        if spent.contains(&input.previous_output) {
            return Err(TransactionError::DuplicateInput(
                input.previous_output.to_string(),
            ));
        }

        let amount = match block_outputs.get(&input.previous_output) {
            Some(&amount) => amount,
            None => {
                let utxo = utxos
                    .get_utxo(&input.previous_output)
                    .map_err(|e| TransactionError::UnknownUtxo(e.to_string()))?
                    .ok_or_else(|| {
                        TransactionError::UnknownUtxo(input.previous_output.to_string())
                    })?;
                if utxo.spent {
                    return Err(TransactionError::UtxoSpent(
                        input.previous_output.to_string(),
                    ));
                }
                if !utxo.is_mature(height) {
                    return Err(TransactionError::ImmatureCoinbase { index });
                }
                utxo.output.amount
            }
        };

        if input.amount != amount {
            return Err(TransactionError::AmountMismatch { input: input.amount, utxo: amount });
        }

        if !input.public_key.is_empty() {
            let payload = tx.signable_payload()?;
            let valid = keys
                .verify(&payload, &input.signature, &input.public_key)
                .map_err(|_| TransactionError::InvalidSignature { index })?;
            if !valid {
                return Err(TransactionError::InvalidSignature { index });
            }
        }

        input_total = input_total
            .checked_add(amount)
            .ok_or(TransactionError::ValueOverflow)?;
        spent.insert(input.previous_output.clone());
    }

    let output_total = tx
        .total_output_value()
        .ok_or(TransactionError::ValueOverflow)?;
    let fee = input_total
        .checked_sub(output_total)
        .ok_or(TransactionError::InsufficientFunds { have: input_total, need: output_total })?;

    for output in &tx.outputs {
        block_outputs.insert(OutPoint { txid: *txid, index: output.index }, output.amount);
    }

    Ok(fee)
}

/// Enforce the ≥ 67 % validator quorum. Returns the absent validators on
/// success so the caller can report them.
fn check_quorum(expected: &[String], present: &[String]) -> Result<Vec<String>, BlockError> {
    if expected.is_empty() {
        return Ok(Vec::new());
    }

    let present_set: HashSet<&String> = present.iter().collect();
    let attending = expected.iter().filter(|v| present_set.contains(v)).count();

    if attending * QUORUM_DENOMINATOR < expected.len() * QUORUM_NUMERATOR {
        return Err(BlockError::QuorumNotMet { present: attending, expected: expected.len() });
    }

    Ok(expected
        .iter()
        .filter(|v| !present_set.contains(v))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use agora_core::chain_state::MemoryChainStore;
    use agora_core::constants::{COIN, CURRENT_VERSION, COINBASE_MATURITY};
    use agora_core::crypto::HybridKeyManager;
    use agora_core::types::{
        BlockHeader, Currency, Script, TxInput, TxOutput, TxStatus, TxType, UtxoEntry,
        SEQUENCE_FINAL,
    };

    use crate::template::build_coinbase;

    const NOW: u64 = 1_700_000_000;

    fn ctx(height: u64, prev_hash: Hash256) -> BlockContext {
        BlockContext {
            height,
            prev_hash,
            prev_timestamp: NOW - 600,
            expected_difficulty: 1000,
            current_time: NOW,
            expected_reward: 50 * COIN,
            expected_validators: vec![],
        }
    }

    fn op(seed: u8) -> OutPoint {
        OutPoint { txid: Hash256([seed; 32]), index: 0 }
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
            timestamp_ms: NOW * 1000,
            fee,
            lock_time: None,
            witness: None,
            block_height: None,
            signature: vec![],
        }
    }

    fn seeded_store(ops: &[(OutPoint, u64)]) -> Arc<MemoryChainStore> {
        let store = Arc::new(MemoryChainStore::new());
        for (o, amount) in ops {
            store.insert_utxo(
                o.clone(),
                UtxoEntry {
                    output: TxOutput {
                        address: "ag1spender".into(),
                        amount: *amount,
                        script: Script::default(),
                        index: o.index,
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

    /// A structurally valid block at `height` with easy PoW (difficulty 1).
    fn build_block(height: u64, prev_hash: Hash256, txs: Vec<Transaction>) -> Block {
        let mut transactions = vec![build_coinbase("ag1miner", height, 50 * COIN, 1, NOW * 1000)];
        transactions.extend(txs);
        let txids: Vec<Hash256> = transactions.iter().map(|t| t.txid().unwrap()).collect();
        Block {
            header: BlockHeader {
                version: 1,
                previous_hash: prev_hash,
                merkle_root: merkle::merkle_root(&txids),
                timestamp: NOW,
                difficulty: 1000,
                nonce: 0,
                height,
                miner_address: "ag1miner".into(),
            },
            transactions,
            validators: vec![],
        }
    }

    // ------------------------------------------------------------------
    // Happy path
    // ------------------------------------------------------------------

    #[test]
    fn valid_empty_block_passes() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let block = build_block(1, Hash256([0xAA; 32]), vec![]);

        let result =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap();
        assert_eq!(result.total_fees, 0);
        assert_eq!(result.coinbase_value, 50 * COIN);
        assert!(result.absent_validators.is_empty());
    }

    #[test]
    fn valid_block_with_transactions_accumulates_fees() {
        let store = seeded_store(&[(op(1), 100 * COIN), (op(2), 100 * COIN)]);
        let keys = HybridKeyManager::generate();
        let block = build_block(
            1,
            Hash256([0xAA; 32]),
            vec![
                spend_tx(op(1), 100 * COIN, 1_000),
                spend_tx(op(2), 100 * COIN, 2_000),
            ],
        );

        let result =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap();
        assert_eq!(result.total_fees, 3_000);
    }

    #[test]
    fn chained_transactions_within_block_pass() {
        let store = seeded_store(&[(op(1), 100 * COIN)]);
        let keys = HybridKeyManager::generate();

        let parent = spend_tx(op(1), 100 * COIN, 1_000);
        let parent_id = parent.txid().unwrap();
        let child = spend_tx(
            OutPoint { txid: parent_id, index: 0 },
            100 * COIN - 1_000,
            1_000,
        );
        let block = build_block(1, Hash256([0xAA; 32]), vec![parent, child]);

        let result =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap();
        assert_eq!(result.total_fees, 2_000);
    }

    // ------------------------------------------------------------------
    // Header rejections
    // ------------------------------------------------------------------

    #[test]
    fn rejects_bad_version() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let mut block = build_block(1, Hash256([0xAA; 32]), vec![]);
        block.header.version = 99;
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert_eq!(err, BlockError::UnsupportedVersion(99));
    }

    #[test]
    fn rejects_wrong_prev_hash() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let block = build_block(1, Hash256([0xBB; 32]), vec![]);
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert_eq!(err, BlockError::InvalidPrevHash);
    }

    #[test]
    fn rejects_timestamp_before_parent() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let mut block = build_block(1, Hash256([0xAA; 32]), vec![]);
        block.header.timestamp = NOW - 601 - 1;
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert_eq!(err, BlockError::TimestampBeforeParent);
    }

    #[test]
    fn rejects_timestamp_too_far_ahead() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let mut block = build_block(1, Hash256([0xAA; 32]), vec![]);
        block.header.timestamp = NOW + MAX_FUTURE_BLOCK_TIME + 1;
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert!(matches!(err, BlockError::TimestampTooFar(_)));
    }

    #[test]
    fn rejects_difficulty_mismatch() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let mut block = build_block(1, Hash256([0xAA; 32]), vec![]);
        block.header.difficulty = 2000;
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert_eq!(err, BlockError::InvalidDifficulty { got: 2000, expected: 1000 });
    }

    // ------------------------------------------------------------------
    // Coinbase rejections
    // ------------------------------------------------------------------

    #[test]
    fn rejects_empty_block() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let mut block = build_block(1, Hash256([0xAA; 32]), vec![]);
        block.transactions.clear();
        block.header.merkle_root = merkle::merkle_root(&[]);
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert_eq!(err, BlockError::NoCoinbase);
    }

    #[test]
    fn rejects_excessive_reward() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let mut block = build_block(1, Hash256([0xAA; 32]), vec![]);
        block.transactions[0].outputs[0].amount = 51 * COIN;
        let txids: Vec<Hash256> = block.transactions.iter().map(|t| t.txid().unwrap()).collect();
        block.header.merkle_root = merkle::merkle_root(&txids);
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert!(matches!(err, BlockError::InvalidReward { .. }));
    }

    #[test]
    fn rejects_malformed_coinbase_script() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let mut block = build_block(1, Hash256([0xAA; 32]), vec![]);
        block.transactions[0].outputs[0].script = Script::P2pkh(b"garbage".to_vec());
        let txids: Vec<Hash256> = block.transactions.iter().map(|t| t.txid().unwrap()).collect();
        block.header.merkle_root = merkle::merkle_root(&txids);
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert!(matches!(err, BlockError::MalformedCoinbaseScript(_)));
    }

    #[test]
    fn rejects_coinbase_script_height_mismatch() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let mut block = build_block(1, Hash256([0xAA; 32]), vec![]);
        // Script encodes height 9, block is at height 1.
        block.transactions[0] = build_coinbase("ag1miner", 9, 50 * COIN, 1, NOW * 1000);
        block.transactions[0].block_height = Some(1);
        let txids: Vec<Hash256> = block.transactions.iter().map(|t| t.txid().unwrap()).collect();
        block.header.merkle_root = merkle::merkle_root(&txids);
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert!(matches!(err, BlockError::MalformedCoinbaseScript(_)));
    }

    #[test]
    fn rejects_second_coinbase() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let mut block = build_block(1, Hash256([0xAA; 32]), vec![]);
        block
            .transactions
            .push(build_coinbase("ag1other", 1, COIN, 2, NOW * 1000));
        let txids: Vec<Hash256> = block.transactions.iter().map(|t| t.txid().unwrap()).collect();
        block.header.merkle_root = merkle::merkle_root(&txids);
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert_eq!(err, BlockError::MultipleCoinbase);
    }

    // ------------------------------------------------------------------
    // Merkle / transaction rejections
    // ------------------------------------------------------------------

    #[test]
    fn rejects_wrong_merkle_root() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let mut block = build_block(1, Hash256([0xAA; 32]), vec![]);
        block.header.merkle_root = Hash256([0xFF; 32]);
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert_eq!(err, BlockError::InvalidMerkleRoot);
    }

    #[test]
    fn rejects_double_spend_across_block_txs() {
        let store = seeded_store(&[(op(1), 100 * COIN)]);
        let keys = HybridKeyManager::generate();

        let tx_a = spend_tx(op(1), 100 * COIN, 1_000);
        let mut tx_b = spend_tx(op(1), 100 * COIN, 2_000);
        tx_b.lock_time = Some(5);
        let block = build_block(1, Hash256([0xAA; 32]), vec![tx_a, tx_b]);

        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert!(matches!(
            err,
            BlockError::TransactionError {
                index: 2,
                source: TransactionError::DuplicateInput(_)
            }
        ));
    }

    #[test]
    fn rejects_unknown_utxo_spend() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let block = build_block(1, Hash256([0xAA; 32]), vec![spend_tx(op(7), COIN, 1_000)]);
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert!(matches!(
            err,
            BlockError::TransactionError { source: TransactionError::UnknownUtxo(_), .. }
        ));
    }

    #[test]
    fn rejects_immature_coinbase_spend() {
        let store = Arc::new(MemoryChainStore::new());
        store.insert_utxo(
            op(1),
            UtxoEntry {
                output: TxOutput {
                    address: "ag1spender".into(),
                    amount: 50 * COIN,
                    script: Script::default(),
                    index: 0,
                    currency: Currency::default(),
                },
                block_height: 0,
                is_coinbase: true,
                spent: false,
            },
        );
        let keys = HybridKeyManager::generate();

        // Height 1 << maturity window.
        let block = build_block(1, Hash256([0xAA; 32]), vec![spend_tx(op(1), 50 * COIN, 1_000)]);
        let err =
            validate_block(&block, &ctx(1, Hash256([0xAA; 32])), store.as_ref(), &keys).unwrap_err();
        assert!(matches!(
            err,
            BlockError::TransactionError {
                source: TransactionError::ImmatureCoinbase { .. },
                ..
            }
        ));
        assert!(COINBASE_MATURITY > 1);
    }

    // ------------------------------------------------------------------
    // Quorum
    // ------------------------------------------------------------------

    #[test]
    fn quorum_trivial_when_no_validators_expected() {
        assert!(check_quorum(&[], &[]).unwrap().is_empty());
    }

    #[test]
    fn quorum_met_at_two_thirds() {
        let expected: Vec<String> = (0..3).map(|i| format!("v{i}")).collect();
        // 2 of 3 = 66.7% < 67% → not met.
        let present = vec!["v0".to_string(), "v1".to_string()];
        assert!(check_quorum(&expected, &present).is_err());

        // 3 of 3 met, none absent.
        let all: Vec<String> = expected.clone();
        assert!(check_quorum(&expected, &all).unwrap().is_empty());
    }

    #[test]
    fn quorum_reports_absentees() {
        let expected: Vec<String> = (0..4).map(|i| format!("v{i}")).collect();
        // 3 of 4 = 75% ≥ 67% → met, one absent.
        let present = vec!["v0".to_string(), "v1".to_string(), "v2".to_string()];
        let absent = check_quorum(&expected, &present).unwrap();
        assert_eq!(absent, vec!["v3".to_string()]);
    }

    #[test]
    fn block_with_quorum_failure_rejected() {
        let store = seeded_store(&[]);
        let keys = HybridKeyManager::generate();
        let block = build_block(1, Hash256([0xAA; 32]), vec![]);

        let mut context = ctx(1, Hash256([0xAA; 32]));
        context.expected_validators = vec!["v0".into(), "v1".into(), "v2".into()];
        let err = validate_block(&block, &context, store.as_ref(), &keys).unwrap_err();
        assert!(matches!(err, BlockError::QuorumNotMet { present: 0, expected: 3 }));
    }

    // ------------------------------------------------------------------
    // Timeout wrapper
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn timeout_wrapper_passes_valid_block() {
        let store = seeded_store(&[]);
        let keys: Arc<HybridKeyManager> = Arc::new(HybridKeyManager::generate());
        let block = build_block(1, Hash256([0xAA; 32]), vec![]);

        let result = validate_block_with_timeout(
            block,
            ctx(1, Hash256([0xAA; 32])),
            store,
            keys,
        )
        .await
        .unwrap();
        assert_eq!(result.coinbase_value, 50 * COIN);
    }
}
