//! # agora-mempool
//! In-memory pool of unconfirmed transactions.
//!
//! The pool admits transactions through a ten-step pipeline (health gate,
//! structural checks, fee floor, UTXO validation, type-specific gates,
//! replace-by-fee arbitration, ancestry limits, congestion pricing), keeps
//! fee-rate buckets for selection and eviction, and prices admission
//! dynamically under congestion.

pub mod buckets;
pub mod entry;
pub mod fees;
pub mod info;
pub mod locks;
pub mod pool;

pub use buckets::FeeBuckets;
pub use entry::MempoolEntry;
pub use fees::{congestion_multiplier, dynamic_min_fee};
pub use info::{FeeHistogram, Health, MempoolInfo, RawMempoolEntry};
pub use pool::{Mempool, MempoolConfig, RawMempool};
