//! Mining worker pool.
//!
//! A bounded pool of OS threads scanning disjoint nonce ranges. Workers are
//! spawned on demand up to the bound, handed out FIFO by
//! [`WorkerPool::acquire`], and recycled by the health sweep when idle too
//! long. A worker that errors more than [`MAX_WORKER_ERRORS`] times is
//! terminated and a fresh one takes its slot on the next acquire.
//!
//! The nonce scan is cooperative: the interrupt flag is checked once per
//! batch, and progress is reported roughly every
//! [`PROGRESS_INTERVAL`] while a task runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use primitive_types::U256;
use tracing::{debug, info, warn};

use agora_core::error::MiningError;
use agora_core::pow::{hash_header, meets_target};
use agora_core::types::{BlockHeader, Hash256};

/// Errors tolerated before a worker is terminated and replaced.
pub const MAX_WORKER_ERRORS: u32 = 3;

/// Workers idle longer than this are recycled by the health sweep.
pub const MAX_IDLE: Duration = Duration::from_secs(60);

/// Approximate interval between progress reports from a busy worker.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// A nonce-range assignment for one worker.
#[derive(Clone)]
pub struct MiningTask {
    pub start_nonce: u64,
    pub end_nonce: u64,
    pub target: U256,
    /// Header to mine; the nonce field is overwritten during the scan.
    pub header_base: BlockHeader,
    /// Nonces scanned between interrupt checks.
    pub batch_size: u64,
    /// Cooperative cancellation, checked once per batch.
    pub interrupt: Arc<AtomicBool>,
}

/// Result of running a [`MiningTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningOutcome {
    /// A nonce satisfying the target was found.
    Found { nonce: u64, hash: Hash256 },
    /// The assigned range was scanned without success.
    Exhausted,
    /// The interrupt flag was raised mid-scan.
    Interrupted,
}

/// Periodic progress report from a busy worker.
#[derive(Debug, Clone)]
pub struct Progress {
    pub worker_id: usize,
    pub current_nonce: u64,
    pub at: Instant,
}

enum Command {
    Mine(MiningTask, Sender<MiningOutcome>),
    Shutdown,
}

struct WorkerRecord {
    sender: Sender<Command>,
    errors: u32,
    idle_since: Instant,
}

struct State {
    workers: HashMap<usize, WorkerRecord>,
    idle: VecDeque<usize>,
    next_id: usize,
    /// FIFO tickets: acquire is served strictly in arrival order.
    next_ticket: u64,
    serving_ticket: u64,
    shutdown: bool,
}

struct Shared {
    capacity: usize,
    state: Mutex<State>,
    available: Condvar,
    progress: Mutex<Option<Sender<Progress>>>,
}

/// Bounded pool of mining worker threads.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a pool bounded at `capacity` workers. Workers spawn lazily on
    /// first acquire.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                state: Mutex::new(State {
                    workers: HashMap::new(),
                    idle: VecDeque::new(),
                    next_id: 0,
                    next_ticket: 0,
                    serving_ticket: 0,
                    shutdown: false,
                }),
                available: Condvar::new(),
                progress: Mutex::new(None),
            }),
        }
    }

    /// Create a pool sized to the machine's hardware parallelism.
    pub fn with_hardware_parallelism() -> Self {
        let n = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(n)
    }

    /// Register a progress listener. Busy workers send a report roughly
    /// every [`PROGRESS_INTERVAL`].
    pub fn set_progress_listener(&self, tx: Sender<Progress>) {
        *self.shared.progress.lock() = Some(tx);
    }

    /// Pool capacity.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of currently spawned workers (idle + leased).
    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().workers.len()
    }

    /// Number of idle workers ready for lease.
    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    /// Acquire a worker handle, blocking until one is available.
    ///
    /// Requests are served strictly FIFO: a caller that arrived first gets
    /// the next idle worker even if later callers are also waiting.
    pub fn acquire(&self) -> Result<WorkerHandle, MiningError> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(MiningError::PoolShutDown);
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;

        loop {
            if state.shutdown {
                return Err(MiningError::PoolShutDown);
            }
            let my_turn = state.serving_ticket == ticket;
            if my_turn {
                if let Some(id) = state.idle.pop_front() {
                    state.serving_ticket += 1;
                    self.shared.available.notify_all();
                    return Ok(WorkerHandle { id, shared: Arc::clone(&self.shared) });
                }
                if state.workers.len() < self.shared.capacity {
                    let id = Self::spawn_worker(&self.shared, &mut state);
                    state.serving_ticket += 1;
                    self.shared.available.notify_all();
                    return Ok(WorkerHandle { id, shared: Arc::clone(&self.shared) });
                }
            }
            self.shared.available.wait(&mut state);
        }
    }

    fn spawn_worker(shared: &Arc<Shared>, state: &mut State) -> usize {
        let id = state.next_id;
        state.next_id += 1;

        let (tx, rx) = mpsc::channel::<Command>();
        let shared_clone = Arc::clone(shared);
        thread::Builder::new()
            .name(format!("agora-miner-{id}"))
            .spawn(move || worker_loop(id, rx, shared_clone))
            .expect("spawning a mining worker thread");

        state.workers.insert(
            id,
            WorkerRecord { sender: tx, errors: 0, idle_since: Instant::now() },
        );
        debug!(worker = id, "worker_pool: spawned");
        id
    }

    /// Health sweep: terminate workers idle longer than `max_idle`.
    ///
    /// Terminated slots respawn on demand at the next acquire.
    pub fn sweep_idle(&self, max_idle: Duration) {
        let mut state = self.shared.state.lock();
        let stale: Vec<usize> = state
            .idle
            .iter()
            .filter(|id| {
                state
                    .workers
                    .get(id)
                    .map(|w| w.idle_since.elapsed() > max_idle)
                    .unwrap_or(false)
            })
            .copied()
            .collect();

        for id in stale {
            state.idle.retain(|w| *w != id);
            if let Some(record) = state.workers.remove(&id) {
                let _ = record.sender.send(Command::Shutdown);
                info!(worker = id, "worker_pool: recycled idle worker");
            }
        }
    }

    /// Shut down every worker and reject future acquires.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        for (_, record) in state.workers.drain() {
            let _ = record.sender.send(Command::Shutdown);
        }
        state.idle.clear();
        self.shared.available.notify_all();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exclusive lease on one worker. Returning the handle (drop) puts the
/// worker back in the idle queue.
pub struct WorkerHandle {
    id: usize,
    shared: Arc<Shared>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Run a mining task to completion on the leased worker.
    ///
    /// A worker whose channels break is charged an error; past
    /// [`MAX_WORKER_ERRORS`] it is terminated and will not rejoin the idle
    /// queue.
    pub fn run(&self, task: MiningTask) -> Result<MiningOutcome, MiningError> {
        let sender = {
            let state = self.shared.state.lock();
            state
                .workers
                .get(&self.id)
                .map(|w| w.sender.clone())
                .ok_or(MiningError::NoIdleWorker)?
        };

        let (resp_tx, resp_rx) = mpsc::channel();
        if sender.send(Command::Mine(task, resp_tx)).is_err() {
            self.charge_error();
            return Err(MiningError::NoIdleWorker);
        }
        match resp_rx.recv() {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                self.charge_error();
                Err(MiningError::NoIdleWorker)
            }
        }
    }

    fn charge_error(&self) {
        let mut state = self.shared.state.lock();
        let errors = match state.workers.get_mut(&self.id) {
            Some(record) => {
                record.errors += 1;
                record.errors
            }
            None => return,
        };
        if errors > MAX_WORKER_ERRORS {
            warn!(worker = self.id, errors, "worker_pool: terminating failing worker");
            if let Some(record) = state.workers.remove(&self.id) {
                let _ = record.sender.send(Command::Shutdown);
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if let Some(record) = state.workers.get_mut(&self.id) {
            record.idle_since = Instant::now();
            state.idle.push_back(self.id);
            self.shared.available.notify_all();
        }
    }
}

/// The worker thread body: scan assigned ranges batch by batch.
fn worker_loop(id: usize, rx: Receiver<Command>, shared: Arc<Shared>) {
    while let Ok(command) = rx.recv() {
        match command {
            Command::Shutdown => break,
            Command::Mine(task, resp) => {
                let outcome = scan_range(id, &task, &shared);
                let _ = resp.send(outcome);
            }
        }
    }
    debug!(worker = id, "worker_pool: worker exited");
}

/// Scan `[start_nonce, end_nonce)` in batches, checking the interrupt flag
/// between batches and reporting progress periodically.
fn scan_range(id: usize, task: &MiningTask, shared: &Shared) -> MiningOutcome {
    let mut header = task.header_base.clone();
    let mut nonce = task.start_nonce;
    let batch = task.batch_size.max(1);
    let mut last_report = Instant::now();

    while nonce < task.end_nonce {
        if task.interrupt.load(Ordering::Relaxed) {
            return MiningOutcome::Interrupted;
        }

        let batch_end = nonce.saturating_add(batch).min(task.end_nonce);
        while nonce < batch_end {
            header.nonce = nonce;
            let hash = hash_header(&header);
            if meets_target(&hash, &task.target) {
                return MiningOutcome::Found { nonce, hash };
            }
            nonce += 1;
        }

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            last_report = Instant::now();
            if let Some(tx) = shared.progress.lock().as_ref() {
                let _ = tx.send(Progress { worker_id: id, current_nonce: nonce, at: last_report });
            }
        }
    }

    MiningOutcome::Exhausted
}
