//! # agora-node-lib
//! Full node composition: wires the chain store, mempool, PoW engine, and
//! network layer together and dispatches inbound peer messages.

pub mod config;
pub mod node;

pub use config::NodeConfig;
pub use node::{Node, NodeMetrics};
