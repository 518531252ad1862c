//! Error types for the Agora protocol.
//!
//! Every rejection reason is an enumerable variant so audit events can
//! record it verbatim. The [`ErrorKind`] taxonomy classifies errors by how
//! callers should react (retry, fast-fail, drop, abort); see
//! [`AgoraError::kind`].
use thiserror::Error;

/// Coarse classification of an error for retry/propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local validation failure; not retried, peer ban score may apply.
    ValidationRejected,
    /// Transient infrastructure failure; retried with backoff.
    Transient,
    /// An explicit deadline elapsed.
    TimedOut,
    /// Circuit breaker is open; fast-fail until the reset window.
    CircuitOpen,
    /// Dropped by rate limiting; only the DDoS counter increments.
    RateLimited,
    /// Unrecoverable invariant violation; aborts the current operation.
    Fatal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("unknown UTXO: {0}")] UnknownUtxo(String),
    #[error("UTXO already spent: {0}")] UtxoSpent(String),
    #[error("input amount {input} does not match UTXO amount {utxo}")] AmountMismatch { input: u64, utxo: u64 },
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("invalid signature on input {index}")] InvalidSignature { index: usize },
    #[error("duplicate input outpoint: {0}")] DuplicateInput(String),
    #[error("oversized: {size} > {max}")] OversizedTransaction { size: usize, max: usize },
    #[error("empty inputs or outputs")] EmptyInputsOrOutputs,
    #[error("too many inputs or outputs: {inputs}/{outputs}")] TooManyInputsOrOutputs { inputs: usize, outputs: usize },
    #[error("unsupported version: {0}")] UnsupportedVersion(u32),
    #[error("timestamp out of window: {0}")] TimestampOutOfWindow(u64),
    #[error("value overflow")] ValueOverflow,
    #[error("zero-value output at index {0}")] ZeroValueOutput(usize),
    #[error("invalid coinbase: {0}")] InvalidCoinbase(String),
    #[error("immature coinbase spend at input {index}")] ImmatureCoinbase { index: usize },
    #[error("fee mismatch: declared {declared}, computed {computed}")] FeeMismatch { declared: u64, computed: u64 },
    #[error("vote ineligible: {0}")] VoteIneligible(String),
    #[error("invalid proof-of-work contribution for {0}")] InvalidWorkProof(String),
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid PoW: hash exceeds target")] InvalidPoW,
    #[error("zero difficulty")] ZeroDifficulty,
    #[error("invalid difficulty: got {got}, expected {expected}")] InvalidDifficulty { got: u64, expected: u64 },
    #[error("unsupported block version: {0}")] UnsupportedVersion(u32),
    #[error("invalid prev hash")] InvalidPrevHash,
    #[error("timestamp too far in the future: {0}")] TimestampTooFar(u64),
    #[error("timestamp before parent")] TimestampBeforeParent,
    #[error("invalid merkle root")] InvalidMerkleRoot,
    #[error("hash mismatch: claimed {claimed}, computed {computed}")] HashMismatch { claimed: String, computed: String },
    #[error("invalid reward: got {got}, expected at most {expected}")] InvalidReward { got: u64, expected: u64 },
    #[error("no coinbase")] NoCoinbase,
    #[error("first transaction is not coinbase")] FirstTxNotCoinbase,
    #[error("multiple coinbase transactions")] MultipleCoinbase,
    #[error("malformed coinbase script: {0}")] MalformedCoinbaseScript(String),
    #[error("duplicate txid: {0}")] DuplicateTxid(String),
    #[error("double spend across transactions: {0}")] DoubleSpend(String),
    #[error("oversized: {size} > {max}")] OversizedBlock { size: usize, max: usize },
    #[error("validator quorum not met: {present}/{expected}")] QuorumNotMet { present: usize, expected: usize },
    #[error("validation timed out after {0}s")] ValidationTimeout(u64),
    #[error("tx error at index {index}: {source}")] TransactionError { index: usize, source: TransactionError },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")] AlreadyExists(String),
    #[error("network unhealthy, admission suspended")] NetworkUnhealthy,
    #[error("mempool critical, admission suspended")] PoolCritical,
    #[error("pool full")] PoolFull,
    #[error("fee too low: rate {rate:.5} < required {required:.5}")] FeeTooLow { rate: f64, required: f64 },
    #[error("replacement fee insufficient: {rate:.5} <= {floor:.5}")] ReplacementFeeTooLow { rate: f64, floor: f64 },
    #[error("conflicts with pool tx {existing_txid} on outpoint {outpoint}")] Conflict { existing_txid: String, outpoint: String },
    #[error("ancestor limit exceeded: {count} > {max}")] TooManyAncestors { count: usize, max: usize },
    #[error("descendant limit exceeded: {count} > {max}")] TooManyDescendants { count: usize, max: usize },
    #[error("admission lock timed out for {0}")] LockTimeout(String),
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error("internal: {0}")] Internal(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("no idle worker available")] NoIdleWorker,
    #[error("worker pool shut down")] PoolShutDown,
    #[error("mining interrupted")] Interrupted,
    #[error("nonce range exhausted")] RangeExhausted,
    #[error("block structure update needed")] StructureUpdateNeeded,
    #[error("too many consecutive failures: {0}")] TooManyFailures(u32),
    #[error("inflight table full")] InflightFull,
    #[error("height already in flight: {0}")] HeightInFlight(u64),
    #[error("store: {0}")] Store(String),
    #[error(transparent)] Block(#[from] BlockError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitError {
    #[error("circuit open for {0}")] Open(String),
    #[error("persistence: {0}")] Persistence(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no seed domains configured")] NoSeeds,
    #[error("invalid seed domain: {0}")] InvalidSeedDomain(String),
    #[error("resolution failed for {domain}: {reason}")] ResolutionFailed { domain: String, reason: String },
    #[error("resolution timed out for {0}")] ResolutionTimeout(String),
    #[error(transparent)] Circuit(#[from] CircuitError),
    #[error("cache persistence: {0}")] CachePersistence(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("peer disconnected: {0}")] PeerDisconnected(String),
    #[error("peer banned: {0}")] PeerBanned(String),
    #[error("message too large: {size}")] MessageTooLarge { size: usize },
    #[error("malformed message: {0}")] MalformedMessage(String),
    #[error("rate limited")] RateLimited,
    #[error("timeout")] Timeout,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("malformed hybrid signature frame")] MalformedHybridFrame,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58: {0}")] InvalidBase58(String),
    #[error("invalid length")] InvalidLength,
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid version byte: {0}")] InvalidVersion(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("empty chain: no blocks connected")] EmptyChain,
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("duplicate block: {0}")] DuplicateBlock(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgoraError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error(transparent)] Mining(#[from] MiningError),
    #[error(transparent)] Circuit(#[from] CircuitError),
    #[error(transparent)] Discovery(#[from] DiscoveryError),
    #[error(transparent)] Network(#[from] NetworkError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] ChainState(#[from] ChainStateError),
    #[error("timed out: {0}")] TimedOut(String),
    #[error("transient failure after retries: {0}")] TransientFailed(String),
    #[error("storage: {0}")] Storage(String),
}

impl AgoraError {
    /// Classify this error for retry and propagation policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgoraError::Transaction(_) | AgoraError::Address(_) | AgoraError::Crypto(_) => {
                ErrorKind::ValidationRejected
            }
            AgoraError::Block(BlockError::ValidationTimeout(_)) => ErrorKind::TimedOut,
            AgoraError::Block(_) => ErrorKind::ValidationRejected,
            AgoraError::Mempool(MempoolError::LockTimeout(_)) => ErrorKind::TimedOut,
            AgoraError::Mempool(_) => ErrorKind::ValidationRejected,
            AgoraError::Mining(MiningError::TooManyFailures(_)) => ErrorKind::Fatal,
            AgoraError::Mining(_) => ErrorKind::Transient,
            AgoraError::Circuit(_) => ErrorKind::CircuitOpen,
            AgoraError::Discovery(DiscoveryError::Circuit(_)) => ErrorKind::CircuitOpen,
            AgoraError::Discovery(DiscoveryError::ResolutionTimeout(_)) => ErrorKind::TimedOut,
            AgoraError::Discovery(_) => ErrorKind::Transient,
            AgoraError::Network(NetworkError::RateLimited) => ErrorKind::RateLimited,
            AgoraError::Network(NetworkError::Timeout) => ErrorKind::TimedOut,
            AgoraError::Network(_) => ErrorKind::Transient,
            AgoraError::ChainState(_) => ErrorKind::Fatal,
            AgoraError::TimedOut(_) => ErrorKind::TimedOut,
            AgoraError::TransientFailed(_) | AgoraError::Storage(_) => ErrorKind::Transient,
        }
    }
}
