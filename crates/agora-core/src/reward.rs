//! Reward schedule and halving logic.
//!
//! The mining reward follows a halving schedule: the base reward starts at
//! [`INITIAL_REWARD`](crate::constants::INITIAL_REWARD) (50 AGR) and halves
//! every [`HALVING_INTERVAL`](crate::constants::HALVING_INTERVAL) (210,000)
//! blocks. Block validation enforces `coinbase_output ≤
//! expected_reward(height) + fees`.

use crate::constants::{HALVING_INTERVAL, INITIAL_REWARD};

/// The expected base reward (in grains) for a block at `height`.
///
/// `INITIAL_REWARD >> (height / HALVING_INTERVAL)`, zero once the shift
/// truncates to nothing (epoch ≥ 33 with current constants) or the epoch
/// exceeds 63 (shift-overflow guard).
pub fn expected_reward(height: u64) -> u64 {
    epoch_reward(halving_epoch(height))
}

/// The reward (in grains) for a given halving epoch.
pub fn epoch_reward(epoch: u64) -> u64 {
    if epoch >= 64 {
        return 0;
    }
    INITIAL_REWARD >> epoch
}

/// Which halving epoch a block height falls in.
pub fn halving_epoch(height: u64) -> u64 {
    height / HALVING_INTERVAL
}
