//! Core protocol types: transactions, blocks, UTXOs.
//!
//! All monetary values are in grains (1 AGR = 10^8 grains). Transaction
//! timestamps are milliseconds since the Unix epoch; block header timestamps
//! are seconds. Difficulty is u64 fixed-point with
//! [`DIFFICULTY_SCALE`](crate::constants::DIFFICULTY_SCALE) millis per unit.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

use crate::constants::{
    COINBASE_MATURITY, CURRENCY_DECIMALS, CURRENCY_NAME, CURRENCY_SYMBOL,
};
use crate::error::TransactionError;
pub use crate::script::Script;

/// A 32-byte hash value, rendered as 64 lowercase hex characters at trust
/// boundaries.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used as the genesis previous-hash.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// SHA3-256 of arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha3_256::digest(data).into())
    }

    /// Parse from a 64-character lowercase hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let bytes = hex::decode(s).ok()?;
        bytes.try_into().ok().map(Self)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
///
/// Uniquely names a UTXO.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within that transaction.
    pub index: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// Descriptor of the currency an output is denominated in.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Currency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Default for Currency {
    fn default() -> Self {
        Self {
            name: CURRENCY_NAME.to_string(),
            symbol: CURRENCY_SYMBOL.to_string(),
            decimals: CURRENCY_DECIMALS,
        }
    }
}

/// Default input sequence: final, not replaceable by sequence signalling.
pub const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent.
    pub previous_output: OutPoint,
    /// Hybrid signature over the transaction's signable payload.
    pub signature: Vec<u8>,
    /// Spender's public key bytes.
    pub public_key: Vec<u8>,
    /// Spender's address (derived from `public_key`).
    pub address: String,
    /// Amount of the referenced UTXO, in grains. Must match the UTXO at
    /// validation time.
    pub amount: u64,
    /// Input script.
    pub script: Script,
    /// Sequence number; defaults to [`SEQUENCE_FINAL`].
    pub sequence: u32,
    /// Confirmations of the referenced output (derived, not hashed).
    pub confirmations: u64,
}

/// A transaction output, creating a new UTXO.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Recipient address.
    pub address: String,
    /// Value in grains. Must be positive.
    pub amount: u64,
    /// Output script.
    pub script: Script,
    /// Index of this output within its transaction.
    pub index: u32,
    /// Currency descriptor.
    pub currency: Currency,
}

/// Transaction type tag.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    #[default]
    Standard,
    Transfer,
    Coinbase,
    PowReward,
    QuadraticVote,
    Regular,
}

impl TxType {
    /// Whether this type mints new coins (no inputs, single output).
    pub fn is_reward(&self) -> bool {
        matches!(self, TxType::Coinbase | TxType::PowReward)
    }

    /// Name used in logs and the mempool type distribution.
    pub fn name(&self) -> &'static str {
        match self {
            TxType::Standard => "standard",
            TxType::Transfer => "transfer",
            TxType::Coinbase => "coinbase",
            TxType::PowReward => "pow_reward",
            TxType::QuadraticVote => "quadratic_vote",
            TxType::Regular => "regular",
        }
    }
}

/// Transaction lifecycle status.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    #[default]
    Pending,
    Confirmed,
    Failed,
}

/// A transaction transferring value, minting a reward, or casting a vote.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version; must equal [`CURRENT_VERSION`](crate::constants::CURRENT_VERSION).
    pub version: u32,
    pub tx_type: TxType,
    pub status: TxStatus,
    /// Inputs consuming previous outputs. Empty only for reward types.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Declared fee: `Σ inputs − Σ outputs`. Zero for reward types.
    pub fee: u64,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: Option<u32>,
    /// Optional witness stack.
    pub witness: Option<Vec<Vec<u8>>>,
    /// Set when the transaction is included in a block.
    pub block_height: Option<u64>,
    /// Transaction-level hybrid signature.
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Normalized copy used for hashing and sizing.
    ///
    /// Mutable bookkeeping (status, inclusion height, per-input
    /// confirmations) is zeroed so the id is stable across the transaction's
    /// lifecycle.
    fn canonical(&self) -> Transaction {
        let mut tx = self.clone();
        tx.status = TxStatus::Pending;
        tx.block_height = None;
        for input in &mut tx.inputs {
            input.confirmations = 0;
        }
        tx
    }

    /// Canonical byte encoding (bincode, standard config) of the normalized
    /// transaction.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::encode_to_vec(self.canonical(), bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Compute the transaction ID: SHA3-256 of the canonical encoding.
    pub fn txid(&self) -> Result<Hash256, TransactionError> {
        Ok(Hash256::digest(&self.canonical_bytes()?))
    }

    /// Virtual size in bytes: the canonical encoded length.
    pub fn vsize(&self) -> Result<usize, TransactionError> {
        Ok(self.canonical_bytes()?.len())
    }

    /// Block weight as exposed by mempool introspection: `4 × vsize`.
    pub fn weight(&self) -> Result<usize, TransactionError> {
        Ok(self.vsize()? * 4)
    }

    /// The byte payload covered by input and transaction signatures: the
    /// canonical encoding with all signature fields cleared.
    pub fn signable_payload(&self) -> Result<Vec<u8>, TransactionError> {
        let mut tx = self.canonical();
        tx.signature.clear();
        for input in &mut tx.inputs {
            input.signature.clear();
        }
        bincode::encode_to_vec(tx, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Whether this is a reward transaction (coinbase or PoW reward):
    /// zero inputs and exactly one output.
    pub fn is_coinbase(&self) -> bool {
        self.tx_type.is_reward() && self.inputs.is_empty() && self.outputs.len() == 1
    }

    /// Sum of all input amounts. `None` on overflow.
    pub fn total_input_value(&self) -> Option<u64> {
        self.inputs
            .iter()
            .try_fold(0u64, |acc, i| acc.checked_add(i.amount))
    }

    /// Sum of all output amounts. `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
    }

    /// Fee implied by inputs minus outputs.
    ///
    /// Errors on value overflow or when outputs exceed inputs for a
    /// non-reward transaction.
    pub fn computed_fee(&self) -> Result<u64, TransactionError> {
        if self.tx_type.is_reward() {
            return Ok(0);
        }
        let inputs = self.total_input_value().ok_or(TransactionError::ValueOverflow)?;
        let outputs = self.total_output_value().ok_or(TransactionError::ValueOverflow)?;
        inputs
            .checked_sub(outputs)
            .ok_or(TransactionError::InsufficientFunds { have: inputs, need: outputs })
    }
}

/// Block header containing the proof-of-work puzzle.
///
/// The header hash covers only the six canonical fields of the wire
/// encoding (see [`pow::header_bytes`](crate::pow::header_bytes)); `height`
/// and `miner_address` ride along for template bookkeeping.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Block format version.
    pub version: u32,
    /// Hash of the previous block header.
    pub previous_hash: Hash256,
    /// Merkle root of the block's transaction ids.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Difficulty in millis (fixed point, 1000 == 1.0).
    pub difficulty: u64,
    /// Proof-of-work nonce, searched in `[0, 2^53)`.
    pub nonce: u64,
    /// Height of this block.
    pub height: u64,
    /// Address receiving the coinbase reward.
    pub miner_address: String,
}

impl BlockHeader {
    /// Compute the header hash (SHA3-256 over the canonical encoding).
    pub fn hash(&self) -> Hash256 {
        crate::pow::hash_header(self)
    }
}

/// A complete block: header plus transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    pub header: BlockHeader,
    /// Ordered transactions. First must be the coinbase.
    pub transactions: Vec<Transaction>,
    /// Addresses of validators that attested this block.
    pub validators: Vec<String>,
}

impl Block {
    /// The block hash: the header hash.
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// The coinbase transaction, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Serialized size of the full block in bytes.
    pub fn size(&self) -> Result<usize, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map(|b| b.len())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }
}

/// An entry in the unspent transaction output set.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct UtxoEntry {
    /// The output itself.
    pub output: TxOutput,
    /// Height of the block that created this output.
    pub block_height: u64,
    /// Whether this output is from a coinbase/PoW-reward transaction.
    pub is_coinbase: bool,
    /// Whether this output has been spent.
    pub spent: bool,
}

impl UtxoEntry {
    /// Coinbase outputs require [`COINBASE_MATURITY`] confirmations before
    /// they may be spent. Non-coinbase outputs are always mature.
    pub fn is_mature(&self, current_height: u64) -> bool {
        if !self.is_coinbase {
            return true;
        }
        current_height.saturating_sub(self.block_height) >= COINBASE_MATURITY
    }
}
