//! All-or-nothing token bucket.
//!
//! No smoothing and no borrowing ahead: a reservation commits only when
//! the entire requested permit count is currently available, otherwise
//! the call fails and consumption state is unchanged. The bucket starts
//! full and refills continuously up to its capacity.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::saturating_add_micros;

/// State of one all-or-nothing token bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllOrNothingBandwidth {
    permits_per_second: f64,
    max_permits: f64,
    available_permits: f64,
    last_refill_micros: u64,
}

impl AllOrNothingBandwidth {
    /// Bucket holding `permits` per `window`, full at `now_micros`.
    ///
    /// A zero window with positive permits is unlimited; zero permits is
    /// deny-all.
    pub fn from_rate(permits: u64, window: Duration, now_micros: u64) -> Self {
        if permits > 0 && window.is_zero() {
            return Self {
                permits_per_second: f64::INFINITY,
                max_permits: f64::MAX,
                available_permits: f64::MAX,
                last_refill_micros: now_micros,
            };
        }
        let max_permits = permits as f64;
        let permits_per_second = if permits == 0 {
            0.0
        } else {
            permits as f64 / window.as_secs_f64()
        };
        Self {
            permits_per_second,
            max_permits,
            available_permits: max_permits,
            last_refill_micros: now_micros,
        }
    }

    /// Fold elapsed time into available permits, capped at capacity.
    fn refill(&mut self, now_micros: u64) {
        if now_micros <= self.last_refill_micros {
            return;
        }
        if self.permits_per_second.is_infinite() {
            self.available_permits = self.max_permits;
        } else {
            let elapsed_secs = (now_micros - self.last_refill_micros) as f64 / 1_000_000.0;
            self.available_permits = (self.available_permits
                + elapsed_secs * self.permits_per_second)
                .min(self.max_permits);
        }
        self.last_refill_micros = now_micros;
    }

    /// An equivalent bucket advanced to `now_micros`.
    pub fn with_clock_reading(&self, now_micros: u64) -> Self {
        let mut advanced = self.clone();
        advanced.refill(now_micros);
        advanced
    }

    /// Earliest instant the next single permit would be available. Pure.
    pub fn query_earliest_available(&self, now_micros: u64) -> u64 {
        let view = self.with_clock_reading(now_micros);
        if view.available_permits >= 1.0 {
            now_micros
        } else {
            view.earliest_for(1.0, now_micros)
        }
    }

    /// Take `permits` if the whole request fits, returning `now_micros`;
    /// otherwise return the earliest instant the full request could
    /// succeed, leaving consumption unchanged.
    pub fn reserve_earliest_available(&mut self, permits: u64, now_micros: u64) -> u64 {
        assert!(permits > 0, "requested permits must be positive");
        self.refill(now_micros);
        let requested = permits as f64;
        if requested <= self.available_permits {
            self.available_permits -= requested;
            now_micros
        } else {
            self.earliest_for(requested, now_micros)
        }
    }

    fn earliest_for(&self, requested: f64, now_micros: u64) -> u64 {
        if requested > self.max_permits || self.permits_per_second <= 0.0 {
            return u64::MAX;
        }
        let missing = requested - self.available_permits;
        let wait_micros = missing / self.permits_per_second * 1_000_000.0;
        saturating_add_micros(now_micros, wait_micros)
    }

    pub fn permits_per_second(&self) -> f64 {
        self.permits_per_second
    }

    pub fn available_permits(&self) -> f64 {
        self.available_permits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: u64 = 1_000_000;

    #[test]
    fn test_starts_full_and_allows_burst() {
        let mut bw = AllOrNothingBandwidth::from_rate(3, Duration::from_secs(1), 0);
        assert_eq!(bw.reserve_earliest_available(1, 0), 0);
        assert_eq!(bw.reserve_earliest_available(2, 0), 0);
        assert!(bw.reserve_earliest_available(1, 0) > 0);
    }

    #[test]
    fn test_oversized_request_fails_without_consuming() {
        let mut bw = AllOrNothingBandwidth::from_rate(5, Duration::from_secs(1), 0);
        bw.reserve_earliest_available(2, 0);
        assert_eq!(bw.available_permits(), 3.0);

        // 4 > 3 available: the whole call fails, nothing is taken
        let at = bw.reserve_earliest_available(4, 0);
        assert!(at > 0);
        assert_eq!(bw.available_permits(), 3.0);

        // a smaller request still fits
        assert_eq!(bw.reserve_earliest_available(3, 0), 0);
        assert_eq!(bw.available_permits(), 0.0);
    }

    #[test]
    fn test_refills_continuously_up_to_capacity() {
        let mut bw = AllOrNothingBandwidth::from_rate(2, Duration::from_secs(1), 0);
        assert_eq!(bw.reserve_earliest_available(2, 0), 0);
        assert!(bw.reserve_earliest_available(1, 0) > 0);

        // half a second refills one permit
        assert_eq!(bw.reserve_earliest_available(1, SECOND / 2), SECOND / 2);
        // idle time never exceeds capacity
        let advanced = bw.with_clock_reading(10 * SECOND);
        assert_eq!(advanced.available_permits(), 2.0);
    }

    #[test]
    fn test_shortfall_reports_earliest_full_availability() {
        let mut bw = AllOrNothingBandwidth::from_rate(2, Duration::from_secs(1), 0);
        bw.reserve_earliest_available(2, 0);
        // two permits refill in one second
        assert_eq!(bw.reserve_earliest_available(2, 0), SECOND);
    }

    #[test]
    fn test_request_beyond_capacity_is_never_available() {
        let mut bw = AllOrNothingBandwidth::from_rate(2, Duration::from_secs(1), 0);
        assert_eq!(bw.reserve_earliest_available(3, 0), u64::MAX);
        assert_eq!(bw.available_permits(), 2.0);
    }

    #[test]
    fn test_zero_window_is_unlimited() {
        let mut bw = AllOrNothingBandwidth::from_rate(1, Duration::ZERO, 0);
        for _ in 0..1_000 {
            assert_eq!(bw.reserve_earliest_available(50, 0), 0);
        }
    }

    #[test]
    fn test_zero_permits_never_grants() {
        let mut bw = AllOrNothingBandwidth::from_rate(0, Duration::from_secs(1), 0);
        assert_eq!(bw.reserve_earliest_available(1, 0), u64::MAX);
        assert_eq!(bw.query_earliest_available(0), u64::MAX);
    }
}
