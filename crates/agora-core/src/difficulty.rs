//! Difficulty retargeting.
//!
//! Every [`ADJUSTMENT_INTERVAL`] blocks the difficulty is recomputed from
//! the actual versus expected timespan of the closing window:
//!
//! 1. `expected = TARGET_BLOCK_TIME_SECS × interval`
//! 2. `ratio = clamp(expected / actual, 0.25, 4.0) × RETARGET_DAMPENER`
//! 3. `new = max(old × ratio, INITIAL_DIFFICULTY_MILLIS / 4)`
//!
//! The per-window ratio is clamped before the dampener, so a single
//! retarget moves difficulty by a factor in `[0.25 × 0.75, 4.0 × 0.75]`.
//! The 0.75 dampener is preserved from the reference deployment (see
//! [`RETARGET_DAMPENER`]); it biases retargets conservatively downward to
//! compensate for the faster-than-SHA256 primitive.
//!
//! Difficulty is u64 fixed-point millis (1000 == 1.0); the ratio math runs
//! in f64 and rounds back to millis.

use crate::constants::{
    ADJUSTMENT_INTERVAL, INITIAL_DIFFICULTY_MILLIS, RETARGET_DAMPENER, RETARGET_MAX_RATIO,
    RETARGET_MIN_RATIO, TARGET_BLOCK_TIME_SECS,
};

/// Difficulty never falls below a quarter of the initial difficulty.
pub const MIN_DIFFICULTY_MILLIS: u64 = INITIAL_DIFFICULTY_MILLIS / 4;

/// Whether the block at `height` opens a new retarget window.
pub fn is_retarget_height(height: u64) -> bool {
    height > 0 && height % ADJUSTMENT_INTERVAL == 0
}

/// Compute the next difficulty from the closing window's actual timespan.
///
/// `actual_timespan_secs` is the wall-clock span of the last `interval`
/// blocks; a zero span is treated as one second to avoid a division blowup
/// (the clamp would saturate it anyway).
pub fn next_difficulty(old_millis: u64, actual_timespan_secs: u64, interval: u64) -> u64 {
    let expected = (TARGET_BLOCK_TIME_SECS * interval) as f64;
    let actual = actual_timespan_secs.max(1) as f64;

    let ratio = (expected / actual).clamp(RETARGET_MIN_RATIO, RETARGET_MAX_RATIO)
        * RETARGET_DAMPENER;

    let new = (old_millis as f64 * ratio).round() as u64;
    new.max(MIN_DIFFICULTY_MILLIS)
}

/// The difficulty expected for the block at `height`.
///
/// `parent_millis` is the difficulty of the block at `height − 1`.
/// `get_timestamp` returns the header timestamp (seconds) of the block at a
/// given height, or `None` if unknown, in which case the parent difficulty
/// carries over unchanged.
///
/// Off a retarget boundary the parent difficulty carries over. On a
/// boundary the window spans blocks `[height − interval, height − 1]`.
pub fn expected_difficulty(
    height: u64,
    parent_millis: u64,
    get_timestamp: impl Fn(u64) -> Option<u64>,
) -> u64 {
    if !is_retarget_height(height) {
        return parent_millis;
    }

    let last = height - 1;
    let first = height - ADJUSTMENT_INTERVAL;

    let (Some(first_ts), Some(last_ts)) = (get_timestamp(first), get_timestamp(last)) else {
        return parent_millis;
    };

    let actual = last_ts.saturating_sub(first_ts);
    next_difficulty(parent_millis, actual, ADJUSTMENT_INTERVAL)
}
