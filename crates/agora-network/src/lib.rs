//! # agora-network
//! Peer-facing plumbing: DNS-seed discovery, peer scoring and banning,
//! per-peer rate limiting, circuit-breaker supervision, and the tagged
//! wire protocol.

pub mod circuit_breaker;
pub mod config;
pub mod discovery;
pub mod peer_scoring;
pub mod protocol;
pub mod rate_limiter;

pub use circuit_breaker::CircuitBreakerService;
pub use config::{NetworkConfig, NetworkType};
pub use discovery::{PeerCandidate, PeerDiscovery, SeedResolver, TokioResolver};
pub use peer_scoring::{PeerScoreBoard, SCORE_DOUBLE_SPEND, SCORE_INVALID_TX, SCORE_PROTOCOL_ERROR};
pub use protocol::{InvItem, InvType, Message, PeerAddress, VersionPayload};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
