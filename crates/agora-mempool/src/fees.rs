//! Congestion-priced minimum fee.
//!
//! The admission fee floor scales with pool occupancy: flat to 50 %, linear
//! to 75 %, quadratic to 90 %, then steep above that, capped at 20× the
//! base rate. The pool recomputes the current value on every maintenance
//! tick and falls back to the last known-good value when the computation
//! cannot produce a sane number.

use agora_core::constants::MIN_FEE_RATE;

/// Hard cap on the congestion multiplier.
pub const MAX_FEE_MULTIPLIER: f64 = 20.0;

/// The congestion multiplier for an occupancy `c ∈ [0, 1]`.
///
/// - `c ≤ 0.50` → `1.0`
/// - `c ≤ 0.75` → `1 + (c − 0.5)·2` (linear, up to 1.5)
/// - `c ≤ 0.90` → `1.5 + (c − 0.75)²·8` (quadratic, up to 1.68)
/// - `c > 0.90` → `4 + (c − 0.9)²·16` (steep)
pub fn congestion_multiplier(c: f64) -> f64 {
    let m = if c <= 0.5 {
        1.0
    } else if c <= 0.75 {
        1.0 + (c - 0.5) * 2.0
    } else if c <= 0.90 {
        1.5 + (c - 0.75).powi(2) * 8.0
    } else {
        4.0 + (c - 0.9).powi(2) * 16.0
    };
    m.min(MAX_FEE_MULTIPLIER)
}

/// The dynamic minimum fee rate for a given occupancy.
///
/// `min(base × multiplier(c), 20 × base)`. Returns `None` when the inputs
/// cannot yield a finite rate (caller falls back per
/// [`fallback_min_fee`]).
pub fn dynamic_min_fee(base_rate: f64, congestion: f64) -> Option<f64> {
    if !base_rate.is_finite() || !congestion.is_finite() || base_rate <= 0.0 {
        return None;
    }
    let c = congestion.clamp(0.0, 1.0);
    let rate = (base_rate * congestion_multiplier(c)).min(base_rate * MAX_FEE_MULTIPLIER);
    rate.is_finite().then_some(rate)
}

/// Fallback floor when the dynamic computation fails:
/// `max(MIN_FEE_RATE, last_valid_fee, MIN_FEE_RATE × 2)`.
pub fn fallback_min_fee(last_valid_fee: f64) -> f64 {
    MIN_FEE_RATE.max(last_valid_fee).max(MIN_FEE_RATE * 2.0)
}
