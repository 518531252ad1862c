//! Circuit breaker state machine.
//!
//! Per-endpoint `closed → open → half-open → closed` machine. Failures are
//! counted while closed; at the threshold the circuit opens and all calls
//! short-circuit. After the reset timeout one probe is allowed (half-open);
//! its success closes the circuit, its failure reopens it.
//!
//! Transitions are driven lazily on [`CircuitBreaker::try_acquire`] from
//! elapsed time, so the machine works without a background task; the
//! network layer additionally runs a monitor that calls
//! [`CircuitRegistry::tick_all`] for prompt open→half-open transitions and
//! persists registry snapshots.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CircuitError;

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Current position in the breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// A single endpoint's breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether a call may proceed right now.
    ///
    /// Lazily moves open → half-open once the reset timeout has elapsed.
    /// In half-open, exactly one probe is admitted until its outcome is
    /// recorded.
    pub fn try_acquire(&mut self) -> bool {
        self.advance_from_elapsed();
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Drive the open → half-open transition from elapsed time. Called by
    /// the background monitor and lazily by [`try_acquire`](Self::try_acquire).
    pub fn advance_from_elapsed(&mut self) {
        if self.state == CircuitState::Open {
            let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed >= self.config.reset_timeout {
                self.state = CircuitState::HalfOpen;
                self.probe_in_flight = false;
            }
        }
    }

    /// Record a successful call: closes the circuit and clears failures.
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    /// Record a failed call. Returns `true` if this failure opened (or
    /// reopened) the circuit.
    pub fn record_failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
                self.probe_in_flight = false;
                true
            }
            CircuitState::Closed if self.failures >= self.config.failure_threshold => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    fn to_snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failures: self.failures,
            open_age_ms: self.opened_at.map(|t| t.elapsed().as_millis() as u64),
        }
    }

    fn from_snapshot(snapshot: &BreakerSnapshot, config: BreakerConfig) -> Self {
        let opened_at = snapshot
            .open_age_ms
            .map(|age| Instant::now() - Duration::from_millis(age));
        Self {
            config,
            state: snapshot.state,
            failures: snapshot.failures,
            opened_at,
            probe_in_flight: false,
        }
    }
}

/// Serializable view of one breaker, used for periodic persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    /// Milliseconds since the circuit opened, if open.
    pub open_age_ms: Option<u64>,
}

/// Serializable snapshot of a whole registry.
pub type RegistrySnapshot = HashMap<String, BreakerSnapshot>;

/// A keyed collection of breakers, one per endpoint.
pub struct CircuitRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Fast-fail guard: errors with [`CircuitError::Open`] when the
    /// endpoint's circuit refuses the call.
    pub fn guard(&self, endpoint: &str) -> Result<(), CircuitError> {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()));
        if breaker.try_acquire() {
            Ok(())
        } else {
            Err(CircuitError::Open(endpoint.to_string()))
        }
    }

    pub fn on_success(&self, endpoint: &str) {
        if let Some(breaker) = self.breakers.lock().get_mut(endpoint) {
            if breaker.state() != CircuitState::Closed {
                info!(endpoint, "circuit: closed after successful call");
            }
            breaker.record_success();
        }
    }

    pub fn on_failure(&self, endpoint: &str) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()));
        if breaker.record_failure() {
            warn!(
                endpoint,
                failures = breaker.failures(),
                timeout_secs = self.config.reset_timeout.as_secs(),
                "circuit: opened"
            );
        }
    }

    pub fn state_of(&self, endpoint: &str) -> Option<CircuitState> {
        self.breakers.lock().get(endpoint).map(|b| b.state())
    }

    /// Drive time-based transitions on every breaker.
    pub fn tick_all(&self) {
        for breaker in self.breakers.lock().values_mut() {
            breaker.advance_from_elapsed();
        }
    }

    /// Snapshot the full map for persistence.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.breakers
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.to_snapshot()))
            .collect()
    }

    /// Restore breakers from a persisted snapshot, replacing current state.
    pub fn restore(&self, snapshot: RegistrySnapshot) {
        let mut breakers = self.breakers.lock();
        breakers.clear();
        for (endpoint, snap) in snapshot {
            breakers.insert(
                endpoint,
                CircuitBreaker::from_snapshot(&snap, self.config.clone()),
            );
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.lock().is_empty()
    }
}
