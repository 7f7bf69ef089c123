//! Bounded worker pool
//!
//! Up to `max_workers` OS threads, each blocked on its own single-slot
//! channel. Idle workers sit on a LIFO stack so the most recently used
//! (cache-warm) worker takes the next job. A reaper thread periodically
//! stops workers idle longer than `max_idle_secs`, scanning from the
//! least recently used end.
//!
//! A worker's only sender travels with each job and returns to the idle
//! stack when the job is done. Dropping it from the stack disconnects the
//! channel, which is how idle workers are told to exit.

use crate::clock::Clock;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use hostwall_common::{AtomicCounter, HostwallError, HostwallResult};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Work executed by pool workers
pub trait JobHandler<J>: Send + Sync + 'static {
    /// Process one job
    fn handle(&self, job: J);
}

impl<J, F> JobHandler<J> for F
where
    F: Fn(J) + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, job: J) {
        self(job)
    }
}

/// What `serve` does when every worker is busy and the cap is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Fail immediately
    Reject,
    /// Wait up to `timeout_ms` for a worker to become idle
    Wait {
        /// Upper bound on the wait
        timeout_ms: u64,
    },
}

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum live workers
    pub max_workers: usize,
    /// Idle time after which a worker is reaped
    pub max_idle_secs: u64,
    /// Reaper scan interval
    pub reap_interval_secs: u64,
    /// Behavior at saturation
    pub overflow: OverflowPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            max_workers: 256 * cores,
            max_idle_secs: 10,
            reap_interval_secs: 10,
            overflow: OverflowPolicy::Reject,
        }
    }
}

/// `serve` failure. The job is handed back so the caller can still act on it.
#[derive(Error)]
pub enum ServeError<J> {
    /// No idle worker and the pool is at capacity
    #[error("worker pool saturated")]
    Saturated(J),

    /// Pool is shutting down
    #[error("worker pool stopped")]
    Stopped(J),

    /// OS refused to create a thread
    #[error("failed to spawn worker: {reason}")]
    SpawnFailed {
        /// Rejected job
        job: J,
        /// OS error text
        reason: String,
    },
}

impl<J> ServeError<J> {
    /// Recover the job
    pub fn into_job(self) -> J {
        match self {
            ServeError::Saturated(job) | ServeError::Stopped(job) => job,
            ServeError::SpawnFailed { job, .. } => job,
        }
    }
}

impl<J> fmt::Debug for ServeError<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::Saturated(_) => f.write_str("Saturated(..)"),
            ServeError::Stopped(_) => f.write_str("Stopped(..)"),
            ServeError::SpawnFailed { reason, .. } => write!(f, "SpawnFailed({reason})"),
        }
    }
}

struct Assignment<J> {
    job: J,
    // The worker's slot, handed back on release
    slot: Sender<Assignment<J>>,
}

struct IdleWorker<J> {
    slot: Sender<Assignment<J>>,
    last_used: u64,
}

struct PoolState<J> {
    // Oldest idle worker at index 0
    ready: Vec<IdleWorker<J>>,
    workers_count: usize,
    must_stop: bool,
}

struct Shared<J> {
    config: PoolConfig,
    handler: Box<dyn JobHandler<J>>,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState<J>>,
    // Signalled when a worker goes idle or exits
    changed: Condvar,

    served: AtomicCounter,
    rejected: AtomicCounter,
    spawned: AtomicCounter,
    reaped: AtomicCounter,
}

impl<J: Send + 'static> Shared<J> {
    /// Push a worker back on the idle stack. False if it must exit instead.
    fn release(&self, slot: Sender<Assignment<J>>) -> bool {
        let mut state = self.state.lock();
        if state.must_stop {
            return false;
        }
        state.ready.push(IdleWorker {
            slot,
            last_used: self.clock.now_secs(),
        });
        drop(state);
        self.changed.notify_all();
        true
    }

    // Ends when the slot is dropped instead of released
    fn worker_loop(&self, rx: Receiver<Assignment<J>>) {
        while let Ok(Assignment { job, slot }) = rx.recv() {
            self.handler.handle(job);
            self.served.inc();
            if !self.release(slot) {
                break;
            }
        }
    }
}

/// Decrements the live count when a worker thread ends, including by panic
struct WorkerExit<J: Send + 'static>(Arc<Shared<J>>);

impl<J: Send + 'static> Drop for WorkerExit<J> {
    fn drop(&mut self) {
        self.0.state.lock().workers_count -= 1;
        self.0.changed.notify_all();
    }
}

struct Reaper {
    stop: Sender<()>,
    thread: thread::JoinHandle<()>,
}

/// Bounded pool of job-processing threads
pub struct WorkerPool<J: Send + 'static> {
    shared: Arc<Shared<J>>,
    reaper: Mutex<Option<Reaper>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Start the pool and its reaper. Workers are spawned lazily.
    pub fn start(
        config: PoolConfig,
        handler: impl JobHandler<J>,
        clock: Arc<dyn Clock>,
    ) -> HostwallResult<Self> {
        let reap_interval = Duration::from_secs(config.reap_interval_secs.max(1));
        let shared = Arc::new(Shared {
            config,
            handler: Box::new(handler),
            clock,
            state: Mutex::new(PoolState {
                ready: Vec::new(),
                workers_count: 0,
                must_stop: false,
            }),
            changed: Condvar::new(),
            served: AtomicCounter::new(0),
            rejected: AtomicCounter::new(0),
            spawned: AtomicCounter::new(0),
            reaped: AtomicCounter::new(0),
        });

        let (stop, stopped) = bounded::<()>(0);
        let reaper_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("hostwall-reaper".into())
            .spawn(move || loop {
                match stopped.recv_timeout(reap_interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        reap(&reaper_shared);
                    }
                    _ => break,
                }
            })
            .map_err(|e| HostwallError::SpawnFailed(e.to_string()))?;

        tracing::debug!(
            max_workers = shared.config.max_workers,
            max_idle_secs = shared.config.max_idle_secs,
            "worker pool started"
        );

        Ok(Self {
            shared,
            reaper: Mutex::new(Some(Reaper { stop, thread })),
        })
    }

    /// Hand a job to a worker
    ///
    /// Uses the most recently idled worker, else spawns one below the cap,
    /// else applies the overflow policy. Never blocks under
    /// [`OverflowPolicy::Reject`].
    pub fn serve(&self, job: J) -> Result<(), ServeError<J>> {
        let shared = &self.shared;
        let deadline = match shared.config.overflow {
            OverflowPolicy::Reject => None,
            OverflowPolicy::Wait { timeout_ms } => {
                Some(Instant::now() + Duration::from_millis(timeout_ms))
            }
        };

        let mut job = job;
        let mut state = shared.state.lock();
        loop {
            if state.must_stop {
                return Err(ServeError::Stopped(job));
            }

            if let Some(worker) = state.ready.pop() {
                drop(state);
                let slot = worker.slot.clone();
                match worker.slot.send(Assignment { job, slot }) {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        // Worker vanished between going idle and now
                        job = err.into_inner().job;
                        state = shared.state.lock();
                        continue;
                    }
                }
            }

            if state.workers_count < shared.config.max_workers {
                state.workers_count += 1;
                drop(state);
                return self.spawn(job);
            }

            let timed_out = match deadline {
                None => true,
                Some(deadline) => shared.changed.wait_until(&mut state, deadline).timed_out(),
            };
            let at_cap = state.workers_count >= shared.config.max_workers;
            if timed_out && state.ready.is_empty() && at_cap {
                drop(state);
                shared.rejected.inc();
                return Err(ServeError::Saturated(job));
            }
        }
    }

    // Caller has already reserved a slot in workers_count
    fn spawn(&self, job: J) -> Result<(), ServeError<J>> {
        let (slot, rx) = bounded(1);

        let id = self.shared.spawned.inc();
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("hostwall-worker-{id}"))
            .spawn(move || {
                let _exit = WorkerExit(shared.clone());
                shared.worker_loop(rx);
            });

        if let Err(e) = spawned {
            {
                let mut state = self.shared.state.lock();
                state.workers_count -= 1;
            }
            self.shared.changed.notify_all();
            return Err(ServeError::SpawnFailed { job, reason: e.to_string() });
        }

        // The first job is sent only once the thread exists, so a failed
        // spawn still owns it
        let first = slot.clone();
        slot.send(Assignment { job, slot: first }).map_err(|err| ServeError::SpawnFailed {
            job: err.into_inner().job,
            reason: "worker exited before its first job".into(),
        })
    }

    /// Stop idle workers past the idle threshold. Returns how many.
    pub fn reap_idle(&self) -> usize {
        reap(&self.shared)
    }

    /// Refuse new jobs, stop idle workers and the reaper
    ///
    /// Busy workers finish their current job and then exit.
    pub fn stop(&self) {
        let idle = {
            let mut state = self.shared.state.lock();
            state.must_stop = true;
            std::mem::take(&mut state.ready)
        };
        self.shared.changed.notify_all();
        // Disconnects each idle worker's channel
        drop(idle);

        if let Some(reaper) = self.reaper.lock().take() {
            drop(reaper.stop);
            let _ = reaper.thread.join();
        }
    }

    /// Wait until every worker has exited. False on timeout.
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.workers_count > 0 {
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return state.workers_count == 0;
            }
        }
        true
    }

    /// Check if stopped
    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().must_stop
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let (live, idle) = {
            let state = self.shared.state.lock();
            (state.workers_count, state.ready.len())
        };
        PoolStats {
            served: self.shared.served.get(),
            rejected: self.shared.rejected.get(),
            spawned: self.shared.spawned.get(),
            reaped: self.shared.reaped.get(),
            live,
            idle,
        }
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reap<J: Send + 'static>(shared: &Shared<J>) -> usize {
    let now = shared.clock.now_secs();
    let max_idle = shared.config.max_idle_secs;

    let stale: Vec<IdleWorker<J>> = {
        let mut state = shared.state.lock();
        // Idle stack is ordered by last_used, so expired workers form a prefix
        let expired = state
            .ready
            .iter()
            .position(|w| now.saturating_sub(w.last_used) <= max_idle)
            .unwrap_or(state.ready.len());
        state.ready.drain(..expired).collect()
    };

    let count = stale.len();
    drop(stale);
    if count > 0 {
        shared.reaped.add(count as u64);
        tracing::debug!(reaped = count, "reaped idle workers");
    }
    count
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Jobs completed
    pub served: u64,
    /// Jobs refused at saturation
    pub rejected: u64,
    /// Workers ever spawned
    pub spawned: u64,
    /// Workers stopped by the reaper
    pub reaped: u64,
    /// Live workers
    pub live: usize,
    /// Idle workers
    pub idle: usize,
}
