//! Protocol constants. All monetary values in grains (1 AGR = 10^8 grains).

pub const COIN: u64 = 100_000_000;

/// Maximum mining supply across all halving epochs.
pub const MAX_SUPPLY: u64 = 21_000_000 * COIN;

pub const INITIAL_REWARD: u64 = 50 * COIN;
pub const HALVING_INTERVAL: u64 = 210_000;

/// Target spacing between blocks, in seconds.
pub const TARGET_BLOCK_TIME_SECS: u64 = 600;

/// Number of blocks between difficulty retargets.
pub const ADJUSTMENT_INTERVAL: u64 = 2016;

/// Fixed-point scale for difficulty: 1000 millis == difficulty 1.0.
pub const DIFFICULTY_SCALE: u64 = 1000;

/// Starting difficulty, in millis (1.0).
pub const INITIAL_DIFFICULTY_MILLIS: u64 = 1000;

/// Conservative dampener applied to every retarget ratio.
///
/// Tunable: preserved from the reference deployment, where the primitive
/// hashes faster than SHA-256 and undamped retargets overshoot.
pub const RETARGET_DAMPENER: f64 = 0.75;

/// Retarget ratio clamp bounds (applied after the dampener).
pub const RETARGET_MIN_RATIO: f64 = 0.25;
pub const RETARGET_MAX_RATIO: f64 = 4.0;

/// Nonce search space is `[0, 2^53)` so nonces survive JSON round-trips.
pub const MAX_NONCE: u64 = 1 << 53;

/// Transaction format version accepted by validation.
pub const CURRENT_VERSION: u32 = 1;

pub const MAX_INPUTS: usize = 1500;
pub const MAX_OUTPUTS: usize = 1500;
pub const MAX_TX_SIZE: usize = 100_000;
pub const MAX_BLOCK_SIZE: usize = 1_048_576;

/// Admission-time transaction timestamp window, in milliseconds.
pub const TX_PAST_DRIFT_MS: u64 = 2 * 60 * 60 * 1000;
pub const TX_FUTURE_DRIFT_MS: u64 = 15 * 60 * 1000;

/// Maximum seconds a block timestamp may lie in the future.
pub const MAX_FUTURE_BLOCK_TIME: u64 = 7200;

/// Confirmations before a coinbase output may be spent.
pub const COINBASE_MATURITY: u64 = 100;

/// Block version bounds accepted by header validation.
pub const MIN_BLOCK_VERSION: u32 = 1;
pub const MAX_BLOCK_VERSION: u32 = 2;

/// Floor fee rate in grains per virtual byte.
pub const MIN_FEE_RATE: f64 = 1.0;

/// Fraction of expected validators that must be present in a block.
pub const QUORUM_NUMERATOR: usize = 67;
pub const QUORUM_DENOMINATOR: usize = 100;

/// Service bits advertised in version handshakes.
pub const NODE_NETWORK: u64 = 1;
pub const NODE_VOTING: u64 = 1 << 1;
pub const NODE_MINER: u64 = 1 << 2;

pub const DEFAULT_P2P_PORT: u16 = 28333;
pub const MAGIC_BYTES: [u8; 4] = [0x41, 0x47, 0x4F, 0x52]; // "AGOR"

/// Default currency descriptor values.
pub const CURRENCY_NAME: &str = "Agora";
pub const CURRENCY_SYMBOL: &str = "AGR";
pub const CURRENCY_DECIMALS: u8 = 8;
