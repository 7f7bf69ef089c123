//! Coarse clock
//!
//! Worker idle timestamps only need second resolution. A background thread
//! refreshes an atomic once per second so hot paths read a plain load
//! instead of querying the OS clock.

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use hostwall_common::{HostwallError, HostwallResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Source of coarse monotonic seconds
pub trait Clock: Send + Sync {
    /// Seconds since the clock's origin
    fn now_secs(&self) -> u64;
}

/// Clock refreshed by a background ticker thread
pub struct CoarseClock {
    secs: Arc<AtomicU64>,
    ticker: Mutex<Option<Ticker>>,
}

struct Ticker {
    stop: Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl CoarseClock {
    /// Start the ticker
    pub fn start() -> HostwallResult<Self> {
        Self::with_resolution(Duration::from_secs(1))
    }

    /// Start with a custom refresh interval
    pub fn with_resolution(resolution: Duration) -> HostwallResult<Self> {
        let origin = Instant::now();
        let secs = Arc::new(AtomicU64::new(0));
        let (stop, stopped) = bounded::<()>(0);

        let shared = secs.clone();
        let thread = thread::Builder::new()
            .name("hostwall-clock".into())
            .spawn(move || loop {
                match stopped.recv_timeout(resolution) {
                    Err(RecvTimeoutError::Timeout) => {
                        shared.store(origin.elapsed().as_secs(), Ordering::Relaxed);
                    }
                    _ => break,
                }
            })
            .map_err(|e| HostwallError::SpawnFailed(e.to_string()))?;

        Ok(Self {
            secs,
            ticker: Mutex::new(Some(Ticker { stop, thread })),
        })
    }

    /// Stop the ticker thread. The clock keeps its last value.
    pub fn stop(&self) {
        if let Some(ticker) = self.ticker.lock().take() {
            drop(ticker.stop);
            let _ = ticker.thread.join();
        }
    }
}

impl Clock for CoarseClock {
    #[inline(always)]
    fn now_secs(&self) -> u64 {
        self.secs.load(Ordering::Relaxed)
    }
}

impl Drop for CoarseClock {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clock advanced by hand
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    /// Create at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move forward
    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    #[inline(always)]
    fn now_secs(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
