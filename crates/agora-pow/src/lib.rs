//! # agora-pow
//! Proof-of-work engine.
//!
//! Owns the mining worker pool, builds block templates from the mempool,
//! runs the nonce search with strategy fallback, validates and submits
//! blocks, and tracks in-flight block downloads.

pub mod engine;
pub mod inflight;
pub mod template;
pub mod validation;
pub mod workers;

pub use engine::{MinerStatus, PowEngine, PowEngineConfig};
pub use inflight::{InflightEvent, InflightTracker};
pub use template::BlockTemplate;
pub use workers::{MiningOutcome, MiningTask, Progress, WorkerPool};
