//! Smoothing ("bursty") token bucket.
//!
//! Permits are generated lazily from elapsed time, never on a timer. A
//! reservation is granted at the pre-advance free-ticket instant and the
//! cost of fresh (not yet stored) permits is pushed onto future callers,
//! so the first request after idle time is served immediately while the
//! sustained rate still holds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::saturating_add_micros;

/// State of one smoothing token bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothBandwidth {
    permits_per_second: f64,
    max_permits: f64,
    stable_interval_micros: f64,
    stored_permits: f64,
    next_free_ticket_micros: u64,
}

impl SmoothBandwidth {
    /// Bucket issuing `permits` per `window`, anchored at `now_micros`.
    ///
    /// A zero window with positive permits is unlimited; zero permits is
    /// deny-all.
    pub fn from_rate(permits: u64, window: Duration, now_micros: u64) -> Self {
        if permits == 0 {
            return Self {
                permits_per_second: 0.0,
                max_permits: 0.0,
                stable_interval_micros: f64::INFINITY,
                stored_permits: 0.0,
                next_free_ticket_micros: u64::MAX,
            };
        }
        if window.is_zero() {
            return Self {
                permits_per_second: f64::INFINITY,
                max_permits: f64::MAX,
                stable_interval_micros: 0.0,
                stored_permits: f64::MAX,
                next_free_ticket_micros: now_micros,
            };
        }
        let permits_per_second = permits as f64 / window.as_secs_f64();
        Self {
            permits_per_second,
            max_permits: permits as f64,
            stable_interval_micros: 1_000_000.0 / permits_per_second,
            stored_permits: 0.0,
            next_free_ticket_micros: now_micros,
        }
    }

    /// Fold elapsed time into stored permits, capped at the burst ceiling.
    fn resync(&mut self, now_micros: u64) {
        if now_micros > self.next_free_ticket_micros {
            if self.stable_interval_micros > 0.0 {
                let fresh =
                    (now_micros - self.next_free_ticket_micros) as f64 / self.stable_interval_micros;
                self.stored_permits = (self.stored_permits + fresh).min(self.max_permits);
            } else {
                self.stored_permits = self.max_permits;
            }
            self.next_free_ticket_micros = now_micros;
        }
    }

    /// An equivalent bucket advanced to `now_micros`.
    pub fn with_clock_reading(&self, now_micros: u64) -> Self {
        let mut advanced = self.clone();
        advanced.resync(now_micros);
        advanced
    }

    /// Earliest instant the next single permit would be available. Pure.
    pub fn query_earliest_available(&self, now_micros: u64) -> u64 {
        self.next_free_ticket_micros.max(now_micros)
    }

    /// Book `permits` and return the instant the grant takes effect.
    ///
    /// The returned instant is the pre-advance free ticket; the wait for
    /// fresh permits is charged to the next reservation.
    pub fn reserve_earliest_available(&mut self, permits: u64, now_micros: u64) -> u64 {
        assert!(permits > 0, "requested permits must be positive");
        self.resync(now_micros);
        let granted_at = self.next_free_ticket_micros.max(now_micros);
        let requested = permits as f64;
        let stored_spend = requested.min(self.stored_permits);
        let fresh = requested - stored_spend;
        if fresh > 0.0 {
            let wait_micros = fresh * self.stable_interval_micros;
            self.next_free_ticket_micros =
                saturating_add_micros(self.next_free_ticket_micros, wait_micros);
        }
        self.stored_permits -= stored_spend;
        granted_at
    }

    pub fn permits_per_second(&self) -> f64 {
        self.permits_per_second
    }

    pub fn stored_permits(&self) -> f64 {
        self.stored_permits
    }

    pub fn next_free_ticket_micros(&self) -> u64 {
        self.next_free_ticket_micros
    }
}
