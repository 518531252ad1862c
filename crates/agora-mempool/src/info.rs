//! Mempool introspection types.
//!
//! [`MempoolInfo`] and [`RawMempoolEntry`] are the read-only contract the
//! RPC layer and operators consume. Health thresholds: load factor or
//! memory above 90 % of limits → [`Health::Critical`] (admission blocked),
//! above 70 % → [`Health::Degraded`], else [`Health::Healthy`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Aggregate pool health.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Critical,
}

impl Health {
    /// Classify a pool from its load factor and memory fraction.
    pub fn classify(load_factor: f64, memory_fraction: f64) -> Self {
        let worst = load_factor.max(memory_fraction);
        if worst > 0.9 {
            Health::Critical
        } else if worst > 0.7 {
            Health::Degraded
        } else {
            Health::Healthy
        }
    }
}

/// Summary statistics over pool fee rates.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct FeeHistogram {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl FeeHistogram {
    /// Build from a set of fee rates. Zeroed for an empty pool.
    pub fn from_rates(mut rates: Vec<f64>) -> Self {
        if rates.is_empty() {
            return Self::default();
        }
        rates.sort_by(|a, b| a.total_cmp(b));
        let n = rates.len();
        let median = if n % 2 == 1 {
            rates[n / 2]
        } else {
            (rates[n / 2 - 1] + rates[n / 2]) / 2.0
        };
        Self {
            mean: rates.iter().sum::<f64>() / n as f64,
            median,
            min: rates[0],
            max: rates[n - 1],
        }
    }
}

/// Snapshot returned by [`Mempool::info`](crate::pool::Mempool::info).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MempoolInfo {
    /// Transactions currently pooled.
    pub size: usize,
    /// Total virtual bytes pooled.
    pub bytes: usize,
    /// `size / max_size`.
    pub load_factor: f64,
    pub fee_histogram: FeeHistogram,
    /// Count per transaction type name.
    pub tx_type_distribution: HashMap<String, usize>,
    /// Admission time of the oldest entry (ms), if any.
    pub oldest_ms: Option<u64>,
    /// Admission time of the youngest entry (ms), if any.
    pub youngest_ms: Option<u64>,
    pub health: Health,
    /// Whether admission is currently open.
    pub is_accepting: bool,
}

/// Per-transaction detail returned by
/// [`Mempool::raw_mempool`](crate::pool::Mempool::raw_mempool).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RawMempoolEntry {
    pub fee: u64,
    pub vsize: usize,
    /// Block weight: `4 × vsize`.
    pub weight: usize,
    /// Admission time, milliseconds since the Unix epoch.
    pub time_ms: u64,
    /// Chain height at admission.
    pub height: u64,
    pub ancestor_count: usize,
    pub ancestor_size: usize,
    pub descendant_count: usize,
    pub descendant_size: usize,
    /// Txids of in-pool parents this transaction depends on.
    pub depends: Vec<String>,
}
