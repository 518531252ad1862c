//! In-flight block download tracking.
//!
//! Bounded map of `height → request state`. Each height appears at most
//! once and at most [`MAX_BLOCKS_IN_FLIGHT`] requests run concurrently.
//! Timed-out requests are retried with a timeout scaled by the attempt
//! count; after [`MAX_RETRY_ATTEMPTS`] the entry is dropped and a
//! failure event is emitted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use agora_core::error::MiningError;
use agora_core::types::Hash256;

/// Concurrent in-flight request bound.
pub const MAX_BLOCKS_IN_FLIGHT: usize = 16;

/// Attempts before a request is abandoned.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base request timeout; attempt `n` waits `n × BLOCK_TIMEOUT`.
pub const BLOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// State of one outstanding block request.
#[derive(Debug, Clone)]
pub struct InflightBlock {
    pub height: u64,
    pub hash: Hash256,
    pub started_at: Instant,
    pub attempts: u32,
    /// When the current attempt times out.
    pub deadline: Instant,
}

/// Emitted by [`InflightTracker::check_timeouts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InflightEvent {
    /// The request timed out and was rescheduled with a longer deadline.
    Rescheduled { height: u64, hash: Hash256, attempts: u32 },
    /// The request exhausted its attempts and was dropped.
    Failed { height: u64, hash: Hash256 },
}

/// Tracks outstanding block downloads.
pub struct InflightTracker {
    entries: Mutex<HashMap<u64, InflightBlock>>,
    timeout: Duration,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::with_timeout(BLOCK_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Begin tracking a block request. Fails when the table is full or the
    /// height is already tracked.
    pub fn track(&self, height: u64, hash: Hash256) -> Result<(), MiningError> {
        let mut entries = self.entries.lock();
        if entries.len() >= MAX_BLOCKS_IN_FLIGHT {
            return Err(MiningError::InflightFull);
        }
        if entries.contains_key(&height) {
            return Err(MiningError::HeightInFlight(height));
        }

        let now = Instant::now();
        entries.insert(
            height,
            InflightBlock {
                height,
                hash,
                started_at: now,
                attempts: 1,
                deadline: now + self.timeout,
            },
        );
        debug!(height, %hash, "inflight: tracking block request");
        Ok(())
    }

    /// The block arrived; stop tracking it.
    pub fn complete(&self, height: u64) -> Option<InflightBlock> {
        let removed = self.entries.lock().remove(&height);
        if removed.is_some() {
            debug!(height, "inflight: request completed");
        }
        removed
    }

    /// Sweep for timed-out requests.
    ///
    /// Each expired entry is either rescheduled with `attempts × timeout`
    /// or, at [`MAX_RETRY_ATTEMPTS`], dropped with a
    /// [`InflightEvent::Failed`].
    pub fn check_timeouts(&self) -> Vec<InflightEvent> {
        let now = Instant::now();
        let mut events = Vec::new();
        let mut entries = self.entries.lock();

        let expired: Vec<u64> = entries
            .values()
            .filter(|e| now >= e.deadline)
            .map(|e| e.height)
            .collect();

        for height in expired {
            let Some(entry) = entries.get_mut(&height) else { continue };
            entry.attempts += 1;
            if entry.attempts >= MAX_RETRY_ATTEMPTS {
                let hash = entry.hash;
                entries.remove(&height);
                warn!(height, %hash, "inflight: request failed after max attempts");
                events.push(InflightEvent::Failed { height, hash });
            } else {
                entry.deadline = now + self.timeout * entry.attempts;
                events.push(InflightEvent::Rescheduled {
                    height,
                    hash: entry.hash,
                    attempts: entry.attempts,
                });
            }
        }

        events
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, height: u64) -> bool {
        self.entries.lock().contains_key(&height)
    }

    pub fn get(&self, height: u64) -> Option<InflightBlock> {
        self.entries.lock().get(&height).cloned()
    }
}

impl Default for InflightTracker {
    fn default() -> Self {
        Self::new()
    }
}
