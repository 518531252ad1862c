//! In-memory chain store.
//!
//! [`MemoryChainStore`] implements [`ChainStore`] and [`UtxoStore`] behind a
//! `parking_lot::RwLock`, so a single `Arc` can serve the mempool, the PoW
//! engine, and the coordinator concurrently. The on-disk block database is
//! an external collaborator; this store backs tests and single-process
//! deployments.
//!
//! Blocks passed to [`ChainStore::save_block`] must already be validated.
//! The store performs only height-linkage and duplicate sanity checks.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::error::{AgoraError, ChainStateError, TransactionError};
use crate::types::{Block, Hash256, OutPoint, UtxoEntry};
use crate::traits::{ChainStore, UtxoStore};

#[derive(Default)]
struct Inner {
    blocks_by_hash: HashMap<Hash256, Block>,
    hash_by_height: Vec<Hash256>,
    utxos: HashMap<OutPoint, UtxoEntry>,
    tx_ids: HashSet<Hash256>,
    validators: Vec<String>,
}

/// In-memory chain state with interior mutability.
#[derive(Default)]
pub struct MemoryChainStore {
    inner: RwLock<Inner>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the expected validator set.
    pub fn set_validators(&self, validators: Vec<String>) {
        self.inner.write().validators = validators;
    }

    /// Insert a UTXO directly, bypassing block connection. Test scaffolding
    /// and genesis funding both use this.
    pub fn insert_utxo(&self, outpoint: OutPoint, entry: UtxoEntry) {
        self.inner.write().utxos.insert(outpoint, entry);
    }

    /// Number of blocks connected.
    pub fn block_count(&self) -> usize {
        self.inner.read().hash_by_height.len()
    }

    /// Number of tracked UTXOs (spent and unspent).
    pub fn utxo_count(&self) -> usize {
        self.inner.read().utxos.len()
    }
}

impl ChainStore for MemoryChainStore {
    fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, AgoraError> {
        let inner = self.inner.read();
        Ok(inner
            .hash_by_height
            .get(height as usize)
            .and_then(|h| inner.blocks_by_hash.get(h))
            .cloned())
    }

    fn get_block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, AgoraError> {
        Ok(self.inner.read().blocks_by_hash.get(hash).cloned())
    }

    fn current_height(&self) -> Result<u64, AgoraError> {
        let inner = self.inner.read();
        if inner.hash_by_height.is_empty() {
            return Err(ChainStateError::EmptyChain.into());
        }
        Ok(inner.hash_by_height.len() as u64 - 1)
    }

    fn tip_hash(&self) -> Result<Hash256, AgoraError> {
        let inner = self.inner.read();
        inner
            .hash_by_height
            .last()
            .copied()
            .ok_or_else(|| ChainStateError::EmptyChain.into())
    }

    fn save_block(&self, block: &Block) -> Result<(), AgoraError> {
        let mut inner = self.inner.write();
        let hash = block.hash();

        if inner.blocks_by_hash.contains_key(&hash) {
            return Err(ChainStateError::DuplicateBlock(hash.to_string()).into());
        }

        let expected = inner.hash_by_height.len() as u64;
        if block.header.height != expected {
            return Err(ChainStateError::HeightMismatch {
                expected,
                got: block.header.height,
            }
            .into());
        }

        // Spend inputs and create outputs.
        for tx in &block.transactions {
            let txid = tx.txid().map_err(AgoraError::from)?;

            for input in &tx.inputs {
                if let Some(entry) = inner.utxos.get_mut(&input.previous_output) {
                    entry.spent = true;
                }
            }

            let is_coinbase = tx.is_coinbase();
            for output in &tx.outputs {
                inner.utxos.insert(
                    OutPoint { txid, index: output.index },
                    UtxoEntry {
                        output: output.clone(),
                        block_height: block.header.height,
                        is_coinbase,
                        spent: false,
                    },
                );
            }

            inner.tx_ids.insert(txid);
        }

        inner.hash_by_height.push(hash);
        inner.blocks_by_hash.insert(hash, block.clone());
        Ok(())
    }

    fn has_transaction(&self, txid: &Hash256) -> Result<bool, AgoraError> {
        Ok(self.inner.read().tx_ids.contains(txid))
    }

    fn get_validators(&self) -> Result<Vec<String>, AgoraError> {
        Ok(self.inner.read().validators.clone())
    }

    fn update_difficulty(&self, hash: &Hash256, difficulty_millis: u64) -> Result<(), AgoraError> {
        let mut inner = self.inner.write();
        match inner.blocks_by_hash.get_mut(hash) {
            Some(block) => {
                block.header.difficulty = difficulty_millis;
                Ok(())
            }
            None => Err(ChainStateError::BlockNotFound(hash.to_string()).into()),
        }
    }
}

impl UtxoStore for MemoryChainStore {
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, AgoraError> {
        Ok(self.inner.read().utxos.get(outpoint).cloned())
    }

    fn mark_spent(&self, outpoint: &OutPoint) -> Result<(), AgoraError> {
        let mut inner = self.inner.write();
        match inner.utxos.get_mut(outpoint) {
            Some(entry) => {
                entry.spent = true;
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
            .inner
            .read()
            .utxos
            .iter()
            .filter(|(_, e)| !e.spent && e.output.address == address)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COIN, CURRENT_VERSION};
    use crate::types::{
        BlockHeader, Currency, Script, Transaction, TxOutput, TxStatus, TxType,
    };

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn coinbase(amount: u64, tag: u8) -> Transaction {
        Transaction {
            version: CURRENT_VERSION,
            tx_type: TxType::Coinbase,
            status: TxStatus::Pending,
            inputs: vec![],
            outputs: vec![TxOutput {
                address: "ag1miner".into(),
                amount,
                script: Script::P2pkh(vec![tag; 20]),
                index: 0,
                currency: Currency::default(),
            }],
            timestamp_ms: 1_700_000_000_000 + tag as u64,
            fee: 0,
            lock_time: None,
            witness: None,
            block_height: None,
            signature: vec![],
        }
    }

    fn block_at(height: u64, previous_hash: Hash256, tag: u8) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                previous_hash,
                merkle_root: Hash256([tag; 32]),
                timestamp: 1_700_000_000 + height,
                difficulty: 1000,
                nonce: 0,
                height,
                miner_address: "ag1miner".into(),
            },
            transactions: vec![coinbase(50 * COIN, tag)],
            validators: vec![],
        }
    }

    // ------------------------------------------------------------------
    // Tip tracking
    // ------------------------------------------------------------------

    #[test]
    fn empty_chain_errors() {
        let store = MemoryChainStore::new();
        assert!(store.current_height().is_err());
        assert!(store.tip_hash().is_err());
    }

    #[test]
    fn connect_advances_tip() {
        let store = MemoryChainStore::new();
        let genesis = block_at(0, Hash256::ZERO, 1);
        store.save_block(&genesis).unwrap();

        assert_eq!(store.current_height().unwrap(), 0);
        assert_eq!(store.tip_hash().unwrap(), genesis.hash());

        let next = block_at(1, genesis.hash(), 2);
        store.save_block(&next).unwrap();
        assert_eq!(store.current_height().unwrap(), 1);
        assert_eq!(store.tip_hash().unwrap(), next.hash());
    }

    #[test]
    fn rejects_height_gap() {
        let store = MemoryChainStore::new();
        let err = store.save_block(&block_at(5, Hash256::ZERO, 1)).unwrap_err();
        assert!(matches!(
            err,
            AgoraError::ChainState(ChainStateError::HeightMismatch { expected: 0, got: 5 })
        ));
    }

    #[test]
    fn rejects_duplicate_block() {
        let store = MemoryChainStore::new();
        let genesis = block_at(0, Hash256::ZERO, 1);
        store.save_block(&genesis).unwrap();
        let err = store.save_block(&genesis).unwrap_err();
        assert!(matches!(
            err,
            AgoraError::ChainState(ChainStateError::DuplicateBlock(_))
        ));
    }

    // ------------------------------------------------------------------
    // UTXO bookkeeping
    // ------------------------------------------------------------------

    #[test]
    fn connect_creates_utxos() {
        let store = MemoryChainStore::new();
        let genesis = block_at(0, Hash256::ZERO, 1);
        store.save_block(&genesis).unwrap();

        let txid = genesis.transactions[0].txid().unwrap();
        let entry = store
            .get_utxo(&OutPoint { txid, index: 0 })
            .unwrap()
            .unwrap();
        assert_eq!(entry.output.amount, 50 * COIN);
        assert!(entry.is_coinbase);
        assert!(!entry.spent);
    }

    #[test]
    fn has_transaction_after_connect() {
        let store = MemoryChainStore::new();
        let genesis = block_at(0, Hash256::ZERO, 1);
        let txid = genesis.transactions[0].txid().unwrap();
        assert!(!store.has_transaction(&txid).unwrap());

        store.save_block(&genesis).unwrap();
        assert!(store.has_transaction(&txid).unwrap());
    }

    #[test]
    fn lookups_by_height_and_hash() {
        let store = MemoryChainStore::new();
        let genesis = block_at(0, Hash256::ZERO, 1);
        store.save_block(&genesis).unwrap();

        assert_eq!(store.get_block_by_height(0).unwrap(), Some(genesis.clone()));
        assert_eq!(store.get_block_by_height(1).unwrap(), None);
        assert_eq!(
            store.get_block_by_hash(&genesis.hash()).unwrap(),
            Some(genesis)
        );
        assert_eq!(store.get_block_by_hash(&Hash256::ZERO).unwrap(), None);
    }

    // ------------------------------------------------------------------
    // Validators / difficulty
    // ------------------------------------------------------------------

    #[test]
    fn validators_roundtrip() {
        let store = MemoryChainStore::new();
        assert!(store.get_validators().unwrap().is_empty());
        store.set_validators(vec!["v1".into(), "v2".into()]);
        assert_eq!(store.get_validators().unwrap().len(), 2);
    }

    #[test]
    fn update_difficulty_rewrites_header() {
        let store = MemoryChainStore::new();
        let genesis = block_at(0, Hash256::ZERO, 1);
        store.save_block(&genesis).unwrap();

        store.update_difficulty(&genesis.hash(), 2000).unwrap();
        let stored = store.get_block_by_hash(&genesis.hash()).unwrap().unwrap();
        assert_eq!(stored.header.difficulty, 2000);
    }

    #[test]
    fn update_difficulty_unknown_block_errors() {
        let store = MemoryChainStore::new();
        assert!(store.update_difficulty(&Hash256([9; 32]), 2000).is_err());
    }
}
