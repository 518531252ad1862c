//! Proof-of-work hash and target arithmetic.
//!
//! The header hash is SHA3-256 over a canonical big-endian byte layout; the
//! target is a 256-bit integer derived from the difficulty. Both are shared
//! by the miner and the validator so every endpoint computes identical
//! hashes; a divergence here means no block ever validates remotely.
//!
//! # Canonical header encoding
//!
//! `version(u32) ‖ previous_hash(32B) ‖ merkle_root(32B) ‖
//! timestamp(u64 seconds) ‖ difficulty(u64 millis) ‖ nonce(u64)`,
//! all fixed-width big-endian. `height` and `miner_address` are template
//! bookkeeping and are deliberately excluded.

use primitive_types::U256;

use crate::constants::DIFFICULTY_SCALE;
use crate::error::BlockError;
use crate::types::{BlockHeader, Hash256};

/// Easiest possible target: every hash passes at difficulty 1.
pub const MAX_TARGET: U256 = U256::MAX;

/// Serialized size of the canonical header encoding.
pub const HEADER_BYTES: usize = 4 + 32 + 32 + 8 + 8 + 8;

/// Hashes with more than this many zero nibbles are rejected as malformed
/// (real SHA3 output essentially never produces them).
const MAX_ZERO_NIBBLES: usize = 60;

/// Canonical byte encoding of a header for hashing.
pub fn header_bytes(header: &BlockHeader) -> [u8; HEADER_BYTES] {
    let mut out = [0u8; HEADER_BYTES];
    let mut at = 0;
    out[at..at + 4].copy_from_slice(&header.version.to_be_bytes());
    at += 4;
    out[at..at + 32].copy_from_slice(header.previous_hash.as_bytes());
    at += 32;
    out[at..at + 32].copy_from_slice(header.merkle_root.as_bytes());
    at += 32;
    out[at..at + 8].copy_from_slice(&header.timestamp.to_be_bytes());
    at += 8;
    out[at..at + 8].copy_from_slice(&header.difficulty.to_be_bytes());
    at += 8;
    out[at..at + 8].copy_from_slice(&header.nonce.to_be_bytes());
    out
}

/// Compute the block header hash: SHA3-256 over the canonical encoding.
pub fn hash_header(header: &BlockHeader) -> Hash256 {
    Hash256::digest(&header_bytes(header))
}

/// Derive the PoW target from a fixed-point difficulty.
///
/// `target = MAX_TARGET / floor(difficulty)`, with the integer divisor
/// floored at 1 so sub-unit difficulties behave as difficulty 1.
/// Errors on zero difficulty.
pub fn target_from_difficulty(difficulty_millis: u64) -> Result<U256, BlockError> {
    if difficulty_millis == 0 {
        return Err(BlockError::ZeroDifficulty);
    }
    let whole = (difficulty_millis / DIFFICULTY_SCALE).max(1);
    Ok(MAX_TARGET / U256::from(whole))
}

/// Whether a hash satisfies a target.
///
/// The hash is interpreted as an unsigned 256-bit big-endian integer and
/// accepted iff it is at most the target.
pub fn meets_target(hash: &Hash256, target: &U256) -> bool {
    U256::from_big_endian(hash.as_bytes()) <= *target
}

/// Check that a string is a well-formed block hash: exactly 64 lowercase
/// hex characters, and not suspiciously zero-heavy (more than
/// 60 zero nibbles is an entropy smell, not a real hash).
pub fn is_valid_hash_format(s: &str) -> bool {
    if s.len() != 64 {
        return false;
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return false;
    }
    let zeros = s.chars().filter(|&c| c == '0').count();
    zeros <= MAX_ZERO_NIBBLES
}
