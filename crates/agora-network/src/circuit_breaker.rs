//! Circuit-breaker supervision: background monitor and snapshot
//! persistence.
//!
//! The state machine itself lives in
//! [`agora_core::breaker`]; this service owns a registry, drives its
//! open → half-open transitions on a monitor tick, and round-trips the
//! full breaker map to disk so cooldowns survive restarts. A missing
//! snapshot file on boot is normal (first run) and tolerated.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agora_core::breaker::{BreakerConfig, CircuitRegistry, RegistrySnapshot};
use agora_core::error::CircuitError;

/// Tick driving open→half-open transitions.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// How often the registry snapshot is written to disk.
pub const SAVE_INTERVAL: Duration = Duration::from_secs(60);

/// Registry plus its persistence location.
pub struct CircuitBreakerService {
    registry: Arc<CircuitRegistry>,
    snapshot_path: Option<PathBuf>,
}

impl CircuitBreakerService {
    /// Create a service around a fresh registry. When `snapshot_path` is
    /// set, a previous snapshot is loaded immediately (a missing file is
    /// fine).
    pub fn new(config: BreakerConfig, snapshot_path: Option<PathBuf>) -> Self {
        let service = Self {
            registry: Arc::new(CircuitRegistry::new(config)),
            snapshot_path,
        };
        if let Err(e) = service.load() {
            warn!(error = %e, "circuit: snapshot load failed, starting fresh");
        }
        service
    }

    /// The shared registry handle for callers that guard endpoints.
    pub fn registry(&self) -> Arc<CircuitRegistry> {
        Arc::clone(&self.registry)
    }

    /// Load the persisted snapshot, if the file exists.
    pub fn load(&self) -> Result<(), CircuitError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "circuit: no snapshot yet");
                return Ok(());
            }
            Err(e) => return Err(CircuitError::Persistence(e.to_string())),
        };
        let snapshot: RegistrySnapshot =
            serde_json::from_slice(&bytes).map_err(|e| CircuitError::Persistence(e.to_string()))?;
        let count = snapshot.len();
        self.registry.restore(snapshot);
        info!(count, path = %path.display(), "circuit: snapshot restored");
        Ok(())
    }

    /// Write the current snapshot to disk.
    pub fn save(&self) -> Result<(), CircuitError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = self.registry.snapshot();
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| CircuitError::Persistence(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| CircuitError::Persistence(e.to_string()))?;
        Ok(())
    }

    /// Spawn the monitor loop: tick transitions every
    /// [`MONITOR_INTERVAL`], persist every [`SAVE_INTERVAL`]. The handle
    /// owns the loop; abort it on shutdown.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut monitor = tokio::time::interval(MONITOR_INTERVAL);
            monitor.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let ticks_per_save = (SAVE_INTERVAL.as_secs() / MONITOR_INTERVAL.as_secs()).max(1);
            let mut until_save = ticks_per_save;

            loop {
                monitor.tick().await;
                self.registry.tick_all();

                until_save -= 1;
                if until_save == 0 {
                    until_save = ticks_per_save;
                    if let Err(e) = self.save() {
                        warn!(error = %e, "circuit: snapshot save failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::breaker::CircuitState;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn missing_snapshot_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breakers.json");
        let service = CircuitBreakerService::new(fast_config(), Some(path));
        assert!(service.registry().is_empty());
    }

    #[test]
    fn no_path_means_no_persistence() {
        let service = CircuitBreakerService::new(fast_config(), None);
        assert!(service.save().is_ok());
        assert!(service.load().is_ok());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breakers.json");

        let service = CircuitBreakerService::new(fast_config(), Some(path.clone()));
        let registry = service.registry();
        registry.on_failure("stats-endpoint");
        registry.on_failure("stats-endpoint");
        assert_eq!(registry.state_of("stats-endpoint"), Some(CircuitState::Open));
        service.save().unwrap();

        let reloaded = CircuitBreakerService::new(fast_config(), Some(path));
        assert_eq!(
            reloaded.registry().state_of("stats-endpoint"),
            Some(CircuitState::Open),
            "open circuit must survive a restart"
        );
    }

    #[test]
    fn corrupt_snapshot_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breakers.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let service = CircuitBreakerService {
            registry: Arc::new(CircuitRegistry::new(fast_config())),
            snapshot_path: Some(path),
        };
        assert!(matches!(service.load(), Err(CircuitError::Persistence(_))));
    }

    #[tokio::test]
    async fn monitor_loop_runs_and_aborts() {
        let service = Arc::new(CircuitBreakerService::new(fast_config(), None));
        let handle = service.clone().spawn();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
