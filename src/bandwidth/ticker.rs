//! Clock abstraction supplying microsecond readings to the bucket math.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
///
/// All bucket arithmetic runs against a ticker's timeline; `sleep` is the
/// waiting primitive used by blocking acquisitions.
pub trait Ticker: Send + Sync + fmt::Debug {
    /// Microseconds elapsed on this ticker's timeline.
    fn elapsed_micros(&self) -> u64;

    /// Sleep for the given number of microseconds.
    fn sleep(&self, micros: u64) {
        thread::sleep(Duration::from_micros(micros));
    }
}

/// Wall-clock ticker: microseconds since the UNIX epoch.
///
/// This is the default because persisted bucket timestamps keyed to the
/// epoch stay meaningful across process restarts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTicker;

impl Ticker for SystemTicker {
    fn elapsed_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }
}

/// Monotonic ticker backed by `Instant::now()`.
///
/// Notes: resets when the process restarts; use [`SystemTicker`] when
/// bucket state is persisted to a durable store.
#[derive(Debug, Clone)]
pub struct MonotonicTicker {
    start: Instant,
}

impl Default for MonotonicTicker {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Ticker for MonotonicTicker {
    fn elapsed_micros(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven ticker for deterministic tests: `sleep` advances the
/// timeline instead of blocking.
#[derive(Debug, Default)]
pub struct ManualTicker {
    micros: AtomicU64,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, micros: u64) {
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }

    pub fn set(&self, micros: u64) {
        self.micros.store(micros, Ordering::SeqCst);
    }
}

impl Ticker for ManualTicker {
    fn elapsed_micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }

    fn sleep(&self, micros: u64) {
        self.advance(micros);
    }
}
