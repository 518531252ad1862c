//! Fee-rate buckets.
//!
//! Buckets group pool transactions by fee rate rounded to five decimal
//! places. Every pool transaction appears in exactly one bucket; the pool
//! records each entry's bucket key so removal is exact. Periodic compaction
//! drops empty buckets and, above [`MAX_BUCKETS`], merges undersized
//! buckets into their next-higher neighbor.

use std::collections::{BTreeMap, HashSet};

use ordered_float::OrderedFloat;
use tracing::debug;

use agora_core::types::Hash256;

/// Bucket count above which undersized buckets are merged.
pub const MAX_BUCKETS: usize = 1000;

/// Buckets smaller than this are merge candidates during compaction.
pub const MIN_BUCKET_SIZE: usize = 5;

/// Matching tolerance between a fee rate and a bucket key.
const RATE_TOLERANCE: f64 = 1e-5;

/// Round a fee rate to the 5-decimal bucket precision.
pub fn bucket_key(rate: f64) -> f64 {
    (rate * 100_000.0).round() / 100_000.0
}

/// Fee-rate-keyed buckets of transaction ids.
#[derive(Debug, Default)]
pub struct FeeBuckets {
    buckets: BTreeMap<OrderedFloat<f64>, HashSet<Hash256>>,
}

impl FeeBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the bucket key matching `rate`, or create one.
    ///
    /// Scans existing keys for a match within [`RATE_TOLERANCE`] before
    /// falling back to the rounded rate as a fresh key.
    pub fn find_bucket(&mut self, rate: f64) -> f64 {
        for key in self.buckets.keys() {
            if (key.into_inner() - rate).abs() < RATE_TOLERANCE {
                return key.into_inner();
            }
        }
        let key = bucket_key(rate);
        self.buckets.entry(OrderedFloat(key)).or_default();
        key
    }

    /// File a transaction under the bucket for `rate`. Returns the bucket
    /// key the caller must remember for removal.
    pub fn insert(&mut self, txid: Hash256, rate: f64) -> f64 {
        let key = self.find_bucket(rate);
        self.buckets
            .entry(OrderedFloat(key))
            .or_default()
            .insert(txid);
        key
    }

    /// Remove a transaction from its bucket.
    pub fn remove(&mut self, txid: &Hash256, key: f64) {
        if let Some(set) = self.buckets.get_mut(&OrderedFloat(key)) {
            set.remove(txid);
            if set.is_empty() {
                self.buckets.remove(&OrderedFloat(key));
            }
        }
    }

    /// Number of buckets currently allocated.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total transactions across all buckets.
    pub fn tx_count(&self) -> usize {
        self.buckets.values().map(HashSet::len).sum()
    }

    /// How many buckets a transaction id appears in (invariant: 0 or 1).
    pub fn membership_count(&self, txid: &Hash256) -> usize {
        self.buckets.values().filter(|s| s.contains(txid)).count()
    }

    /// Compact the bucket table.
    ///
    /// Drops empty buckets unconditionally. When the bucket count exceeds
    /// [`MAX_BUCKETS`], merges every bucket smaller than
    /// [`MIN_BUCKET_SIZE`] into its next-higher neighbor. Returns the new
    /// key for every moved transaction so the pool can update its entries.
    pub fn compact(&mut self) -> Vec<(Hash256, f64)> {
        self.buckets.retain(|_, set| !set.is_empty());

        let mut moved = Vec::new();
        if self.buckets.len() <= MAX_BUCKETS {
            return moved;
        }

        let keys: Vec<OrderedFloat<f64>> = self.buckets.keys().copied().collect();
        for (i, key) in keys.iter().enumerate() {
            let Some(next_key) = keys.get(i + 1) else { break };
            let small = self
                .buckets
                .get(key)
                .map(|s| s.len() < MIN_BUCKET_SIZE)
                .unwrap_or(false);
            if !small {
                continue;
            }
            if let Some(set) = self.buckets.remove(key) {
                debug!(
                    from = key.into_inner(),
                    into = next_key.into_inner(),
                    count = set.len(),
                    "fee_buckets: merging undersized bucket"
                );
                for txid in set {
                    moved.push((txid, next_key.into_inner()));
                    self.buckets
                        .entry(*next_key)
                        .or_default()
                        .insert(txid);
                }
            }
        }
        moved
    }

    /// Iterate over `(rate, txids)` ascending by rate.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &HashSet<Hash256>)> {
        self.buckets.iter().map(|(k, v)| (k.into_inner(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(seed: u8) -> Hash256 {
        Hash256([seed; 32])
    }

    #[test]
    fn rounding_to_five_decimals() {
        assert_eq!(bucket_key(1.234_567_9), 1.23457);
        assert_eq!(bucket_key(2.0), 2.0);
    }

    #[test]
    fn insert_files_under_rounded_key() {
        let mut buckets = FeeBuckets::new();
        let key = buckets.insert(id(1), 1.234_567_9);
        assert_eq!(key, 1.23457);
        assert_eq!(buckets.bucket_count(), 1);
        assert_eq!(buckets.tx_count(), 1);
    }

    #[test]
    fn nearby_rates_share_a_bucket() {
        let mut buckets = FeeBuckets::new();
        let k1 = buckets.insert(id(1), 1.000_001);
        let k2 = buckets.insert(id(2), 1.000_005);
        assert_eq!(k1, k2);
        assert_eq!(buckets.bucket_count(), 1);
        assert_eq!(buckets.tx_count(), 2);
    }

    #[test]
    fn distant_rates_get_separate_buckets() {
        let mut buckets = FeeBuckets::new();
        buckets.insert(id(1), 1.0);
        buckets.insert(id(2), 2.0);
        assert_eq!(buckets.bucket_count(), 2);
    }

    #[test]
    fn each_tx_in_exactly_one_bucket() {
        let mut buckets = FeeBuckets::new();
        for seed in 0..20 {
            buckets.insert(id(seed), seed as f64 * 0.37);
        }
        for seed in 0..20 {
            assert_eq!(buckets.membership_count(&id(seed)), 1, "txid {seed}");
        }
    }

    #[test]
    fn remove_clears_empty_bucket() {
        let mut buckets = FeeBuckets::new();
        let key = buckets.insert(id(1), 1.5);
        buckets.remove(&id(1), key);
        assert_eq!(buckets.bucket_count(), 0);
        assert_eq!(buckets.membership_count(&id(1)), 0);
    }

    #[test]
    fn compact_drops_empty_buckets() {
        let mut buckets = FeeBuckets::new();
        let key = buckets.find_bucket(3.0); // creates an empty bucket
        assert_eq!(key, 3.0);
        assert_eq!(buckets.bucket_count(), 1);
        buckets.compact();
        assert_eq!(buckets.bucket_count(), 0);
    }

    #[test]
    fn compact_under_limit_does_not_merge() {
        let mut buckets = FeeBuckets::new();
        buckets.insert(id(1), 1.0);
        buckets.insert(id(2), 2.0);
        let moved = buckets.compact();
        assert!(moved.is_empty());
        assert_eq!(buckets.bucket_count(), 2);
    }

    #[test]
    fn compact_over_limit_merges_small_buckets_upward() {
        let mut buckets = FeeBuckets::new();
        // MAX_BUCKETS + 1 singleton buckets, all below MIN_BUCKET_SIZE.
        for i in 0..=(MAX_BUCKETS as u32) {
            let seed = [(i >> 8) as u8, i as u8];
            let mut raw = [0u8; 32];
            raw[0] = seed[0];
            raw[1] = seed[1];
            buckets.insert(Hash256(raw), 1.0 + i as f64);
        }
        assert!(buckets.bucket_count() > MAX_BUCKETS);
        let before = buckets.tx_count();

        let moved = buckets.compact();
        assert!(!moved.is_empty());
        // No transactions lost, each still in exactly one bucket.
        assert_eq!(buckets.tx_count(), before);
        assert!(buckets.bucket_count() < MAX_BUCKETS + 1);
    }
}
