//! Peer ban scoring.
//!
//! Misbehavior adds to a per-peer ban score: a double-spend relay weighs
//! [`SCORE_DOUBLE_SPEND`], an invalid transaction [`SCORE_INVALID_TX`],
//! and any other protocol slip [`SCORE_PROTOCOL_ERROR`]. A peer whose
//! score reaches the configured ceiling is disconnected and banned for
//! the ban duration. Call [`PeerScoreBoard::unban_expired`] from the
//! maintenance timer to lift expired bans.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Ban-score increment for relaying a double-spend.
pub const SCORE_DOUBLE_SPEND: u32 = 20;
/// Ban-score increment for relaying an invalid transaction.
pub const SCORE_INVALID_TX: u32 = 10;
/// Ban-score increment for a generic protocol error.
pub const SCORE_PROTOCOL_ERROR: u32 = 1;

/// Default ban threshold.
pub const DEFAULT_MAX_BAN_SCORE: u32 = 100;
/// Default ban duration.
pub const DEFAULT_BAN_TIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-peer score record.
#[derive(Debug, Clone)]
pub struct PeerScore {
    /// Accumulated ban score.
    pub score: u32,
    /// When the current ban lifts, if banned.
    pub banned_until: Option<Instant>,
    /// Lifetime penalty points for diagnostics.
    pub total_penalties: u64,
}

impl PeerScore {
    fn new() -> Self {
        Self { score: 0, banned_until: None, total_penalties: 0 }
    }
}

/// Ban-score bookkeeping for all known peers.
pub struct PeerScoreBoard {
    scores: HashMap<SocketAddr, PeerScore>,
    max_ban_score: u32,
    ban_time: Duration,
}

impl PeerScoreBoard {
    pub fn new(max_ban_score: u32, ban_time: Duration) -> Self {
        Self {
            scores: HashMap::new(),
            max_ban_score,
            ban_time,
        }
    }

    /// Add `delta` to a peer's ban score.
    ///
    /// Returns `true` when this penalty crossed the threshold and banned
    /// the peer (callers should then disconnect it).
    pub fn penalize(&mut self, peer: SocketAddr, delta: u32) -> bool {
        let entry = self.scores.entry(peer).or_insert_with(PeerScore::new);

        if entry.banned_until.is_some_and(|until| Instant::now() < until) {
            debug!(%peer, "peer_score: already banned, penalty skipped");
            return false;
        }

        entry.score = entry.score.saturating_add(delta);
        entry.total_penalties = entry.total_penalties.saturating_add(delta as u64);
        debug!(%peer, score = entry.score, delta, "peer_score: penalty applied");

        if entry.score >= self.max_ban_score {
            entry.banned_until = Some(Instant::now() + self.ban_time);
            warn!(%peer, score = entry.score, "peer_score: peer banned");
            return true;
        }
        false
    }

    /// Whether the peer is currently banned.
    pub fn is_banned(&self, peer: &SocketAddr) -> bool {
        self.scores
            .get(peer)
            .and_then(|s| s.banned_until)
            .is_some_and(|until| Instant::now() < until)
    }

    /// Current score, zero for unknown peers.
    pub fn score(&self, peer: &SocketAddr) -> u32 {
        self.scores.get(peer).map(|s| s.score).unwrap_or(0)
    }

    /// Lift bans whose duration has elapsed, resetting their scores.
    /// Returns the peers whose bans were lifted.
    pub fn unban_expired(&mut self) -> Vec<SocketAddr> {
        let now = Instant::now();
        let mut unbanned = Vec::new();
        for (peer, record) in self.scores.iter_mut() {
            if record.banned_until.is_some_and(|until| now >= until) {
                record.banned_until = None;
                record.score = 0;
                unbanned.push(*peer);
                info!(%peer, "peer_score: ban expired");
            }
        }
        unbanned
    }

    /// Drop all tracking for a peer (call on disconnect of a non-banned
    /// peer; banned peers keep their record so the ban holds).
    pub fn remove_peer(&mut self, peer: &SocketAddr) {
        if !self.is_banned(peer) {
            self.scores.remove(peer);
        }
    }

    /// All currently banned peers.
    pub fn banned_peers(&self) -> Vec<SocketAddr> {
        let now = Instant::now();
        self.scores
            .iter()
            .filter(|(_, s)| s.banned_until.is_some_and(|until| now < until))
            .map(|(peer, _)| *peer)
            .collect()
    }

    /// Snapshot of a peer's record.
    pub fn peer_info(&self, peer: &SocketAddr) -> Option<PeerScore> {
        self.scores.get(peer).cloned()
    }
}

impl Default for PeerScoreBoard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BAN_SCORE, DEFAULT_BAN_TIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> SocketAddr {
        format!("10.0.0.{n}:28333").parse().unwrap()
    }

    #[test]
    fn unknown_peer_scores_zero() {
        let board = PeerScoreBoard::default();
        assert_eq!(board.score(&peer(1)), 0);
        assert!(!board.is_banned(&peer(1)));
    }

    #[test]
    fn penalties_accumulate() {
        let mut board = PeerScoreBoard::default();
        board.penalize(peer(1), SCORE_INVALID_TX);
        board.penalize(peer(1), SCORE_PROTOCOL_ERROR);
        assert_eq!(board.score(&peer(1)), 11);
    }

    #[test]
    fn ban_at_threshold() {
        let mut board = PeerScoreBoard::default();
        // Four double-spends (80) then an invalid tx (90): not yet banned.
        for _ in 0..4 {
            assert!(!board.penalize(peer(1), SCORE_DOUBLE_SPEND));
        }
        assert!(!board.penalize(peer(1), SCORE_INVALID_TX));
        // One more double-spend crosses 100.
        assert!(board.penalize(peer(1), SCORE_DOUBLE_SPEND));
        assert!(board.is_banned(&peer(1)));
        assert_eq!(board.banned_peers(), vec![peer(1)]);
    }

    #[test]
    fn banned_peer_skips_further_penalties() {
        let mut board = PeerScoreBoard::new(10, Duration::from_secs(60));
        assert!(board.penalize(peer(1), 10));
        let score = board.score(&peer(1));
        assert!(!board.penalize(peer(1), 10));
        assert_eq!(board.score(&peer(1)), score);
    }

    #[test]
    fn ban_expires() {
        let mut board = PeerScoreBoard::new(10, Duration::ZERO);
        board.penalize(peer(1), 10);
        // Zero ban duration: immediately expired.
        assert!(!board.is_banned(&peer(1)));

        let unbanned = board.unban_expired();
        assert_eq!(unbanned, vec![peer(1)]);
        assert_eq!(board.score(&peer(1)), 0);
    }

    #[test]
    fn remove_peer_preserves_active_bans() {
        let mut board = PeerScoreBoard::new(10, Duration::from_secs(600));
        board.penalize(peer(1), 10);
        assert!(board.is_banned(&peer(1)));

        board.remove_peer(&peer(1));
        assert!(board.is_banned(&peer(1)), "ban must survive disconnect");

        board.penalize(peer(2), 5);
        board.remove_peer(&peer(2));
        assert!(board.peer_info(&peer(2)).is_none());
    }

    #[test]
    fn independent_peers() {
        let mut board = PeerScoreBoard::default();
        board.penalize(peer(1), 99);
        assert_eq!(board.score(&peer(2)), 0);
        assert!(!board.is_banned(&peer(2)));
    }
}
