//! Token-bucket limiters: one bucket per match token, plus the composite
//! limiter handed out for direct use.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::bandwidth::{Bandwidth, StoreFacade, Ticker};
use crate::error::Result;

/// A limiter over one token bucket.
///
/// Acquisitions are synchronous; a wait is a plain sleep on the injected
/// ticker. When bound to a store, every mutating reservation writes the
/// updated bucket state through, so persisted state reflects consumption
/// even if the process dies between reservations.
#[derive(Debug)]
pub struct RateLimiter {
    bandwidth: Mutex<Bandwidth>,
    ticker: Arc<dyn Ticker>,
    store: Option<StoreBinding>,
}

#[derive(Debug)]
struct StoreBinding {
    facade: Arc<StoreFacade>,
    key: String,
}

impl RateLimiter {
    /// A limiter with no persistence.
    pub fn new(bandwidth: Bandwidth, ticker: Arc<dyn Ticker>) -> Self {
        Self {
            bandwidth: Mutex::new(bandwidth),
            ticker,
            store: None,
        }
    }

    /// A limiter that writes bucket state through to `facade` under `key`
    /// after every mutating reservation.
    pub fn with_store(
        bandwidth: Bandwidth,
        ticker: Arc<dyn Ticker>,
        facade: Arc<StoreFacade>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            bandwidth: Mutex::new(bandwidth),
            ticker,
            store: Some(StoreBinding {
                facade,
                key: key.into(),
            }),
        }
    }

    pub fn permits_per_second(&self) -> f64 {
        self.bandwidth.lock().permits_per_second()
    }

    /// Snapshot of the current bucket state.
    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth.lock().clone()
    }

    /// Acquire `permits` without blocking.
    ///
    /// # Panics
    /// If `permits` is zero.
    pub fn try_acquire(&self, permits: u64) -> Result<bool> {
        self.try_acquire_for(permits, Duration::ZERO)
    }

    /// Acquire `permits`, waiting at most `timeout`.
    ///
    /// Admits iff the earliest-available instant for the request lies
    /// within the timeout; returns immediately when it does not. Waits
    /// sleep on the ticker, never busy-spin. Abandoning the wait cannot
    /// double-book: a smoothing reservation is committed before the sleep
    /// and the sleep merely elapses time, while an all-or-nothing
    /// reservation commits only at the instant of grant.
    ///
    /// # Panics
    /// If `permits` is zero.
    pub fn try_acquire_for(&self, permits: u64, timeout: Duration) -> Result<bool> {
        assert!(permits > 0, "requested permits must be positive");
        let timeout_micros = u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX);
        let start = self.ticker.elapsed_micros();
        let deadline = start.saturating_add(timeout_micros);
        loop {
            let now = self.ticker.elapsed_micros();
            let remaining = deadline.saturating_sub(now);
            let (granted_at, committed) = {
                let mut bandwidth = self.bandwidth.lock();
                let earliest = bandwidth.query_earliest_available(now);
                if earliest.saturating_sub(now) > remaining {
                    trace!(
                        wait_micros = earliest.saturating_sub(now),
                        timeout_micros = remaining,
                        "Earliest availability exceeds timeout"
                    );
                    return Ok(false);
                }
                let granted_at = bandwidth.reserve_earliest_available(permits, now);
                let committed = !bandwidth.is_all_or_nothing() || granted_at <= now;
                if committed {
                    self.persist(&bandwidth)?;
                }
                (granted_at, committed)
            };
            if granted_at <= now {
                return Ok(true);
            }
            if granted_at > deadline {
                // all-or-nothing shortfall past the deadline; nothing was taken
                return Ok(false);
            }
            self.ticker.sleep(granted_at - now);
            if committed {
                // the grant was booked; the wait has elapsed
                return Ok(true);
            }
            // all-or-nothing: permits may have refilled by now, poll again
        }
    }

    /// Acquire `permits`, blocking as long as it takes. Returns the
    /// seconds spent waiting.
    ///
    /// # Panics
    /// If `permits` is zero.
    pub fn acquire(&self, permits: u64) -> Result<f64> {
        assert!(permits > 0, "requested permits must be positive");
        let mut waited_micros: u64 = 0;
        loop {
            let now = self.ticker.elapsed_micros();
            let (granted_at, committed) = {
                let mut bandwidth = self.bandwidth.lock();
                let granted_at = bandwidth.reserve_earliest_available(permits, now);
                let committed = !bandwidth.is_all_or_nothing() || granted_at <= now;
                if committed {
                    self.persist(&bandwidth)?;
                }
                (granted_at, committed)
            };
            if granted_at <= now {
                return Ok(micros_to_secs(waited_micros));
            }
            let wait = granted_at - now;
            self.ticker.sleep(wait);
            waited_micros = waited_micros.saturating_add(wait);
            if committed {
                return Ok(micros_to_secs(waited_micros));
            }
        }
    }

    fn persist(&self, bandwidth: &Bandwidth) -> Result<()> {
        if let Some(binding) = &self.store {
            binding.facade.put(&binding.key, bandwidth)?;
        }
        Ok(())
    }
}

fn micros_to_secs(micros: u64) -> f64 {
    micros as f64 / 1_000_000.0
}

/// The limiter resolved for a lookup key: none, one, or several buckets
/// that must all grant.
#[derive(Debug)]
pub enum Limiter {
    /// The key matched nothing; every acquisition is admitted.
    NoLimit,
    Single(Arc<RateLimiter>),
    All(Vec<Arc<RateLimiter>>),
}

impl Limiter {
    pub(crate) fn from_resolved(mut limiters: Vec<Arc<RateLimiter>>) -> Self {
        match limiters.len() {
            0 => Limiter::NoLimit,
            1 => Limiter::Single(limiters.remove(0)),
            _ => Limiter::All(limiters),
        }
    }

    pub fn try_acquire(&self, permits: u64) -> Result<bool> {
        self.try_acquire_for(permits, Duration::ZERO)
    }

    /// Acquire from every member limiter; the timeout applies to each
    /// member individually.
    pub fn try_acquire_for(&self, permits: u64, timeout: Duration) -> Result<bool> {
        match self {
            Limiter::NoLimit => Ok(true),
            Limiter::Single(limiter) => limiter.try_acquire_for(permits, timeout),
            Limiter::All(limiters) => {
                for limiter in limiters {
                    if !limiter.try_acquire_for(permits, timeout)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Blocking acquire; returns the total seconds spent waiting.
    pub fn acquire(&self, permits: u64) -> Result<f64> {
        match self {
            Limiter::NoLimit => Ok(0.0),
            Limiter::Single(limiter) => limiter.acquire(permits),
            Limiter::All(limiters) => {
                let mut waited = 0.0;
                for limiter in limiters {
                    waited += limiter.acquire(permits)?;
                }
                Ok(waited)
            }
        }
    }

    pub fn limiter_count(&self) -> usize {
        match self {
            Limiter::NoLimit => 0,
            Limiter::Single(_) => 1,
            Limiter::All(limiters) => limiters.len(),
        }
    }
}
