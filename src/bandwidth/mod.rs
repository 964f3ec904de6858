//! Token-bucket primitives and their persistence.
//!
//! A [`Bandwidth`] holds the mutable state of one permit-issuing bucket.
//! The closed set of algorithms is selected per rate limit by identifier
//! through the [`BandwidthFactories`] registry; buckets are persisted
//! through a [`BandwidthsStore`] behind the lock-disciplined
//! [`StoreFacade`].

mod all_or_nothing;
mod factory;
mod smooth;
mod store;
mod ticker;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use all_or_nothing::AllOrNothingBandwidth;
pub use factory::{AllOrNothingFactory, BandwidthFactories, BandwidthFactory, BurstyFactory};
pub use smooth::SmoothBandwidth;
pub use store::{BandwidthsStore, InMemoryBandwidthsStore, JsonFileBandwidthsStore, StoreFacade};
pub use ticker::{ManualTicker, MonotonicTicker, SystemTicker, Ticker};

/// Identifier of the smoothing bucket algorithm.
pub const BURSTY: &str = "bursty";
/// Identifier of the all-or-nothing bucket algorithm.
pub const ALL_OR_NOTHING: &str = "all_or_nothing";

/// The state of one token bucket, in one of the supported algorithms.
///
/// The serialized form is self-describing, so a bucket adopted from a
/// store keeps its algorithm across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Bandwidth {
    Bursty(SmoothBandwidth),
    AllOrNothing(AllOrNothingBandwidth),
}

impl Bandwidth {
    /// Smoothing bucket issuing `permits` per `window`.
    pub fn bursty(permits: u64, window: Duration, now_micros: u64) -> Self {
        Bandwidth::Bursty(SmoothBandwidth::from_rate(permits, window, now_micros))
    }

    /// All-or-nothing bucket holding `permits` per `window`.
    pub fn all_or_nothing(permits: u64, window: Duration, now_micros: u64) -> Self {
        Bandwidth::AllOrNothing(AllOrNothingBandwidth::from_rate(permits, window, now_micros))
    }

    /// A bucket that admits everything immediately.
    pub fn unlimited(now_micros: u64) -> Self {
        Bandwidth::Bursty(SmoothBandwidth::from_rate(1, Duration::ZERO, now_micros))
    }

    /// An equivalent bucket advanced to `now_micros` (lazy refill).
    pub fn with_clock_reading(&self, now_micros: u64) -> Self {
        match self {
            Bandwidth::Bursty(bw) => Bandwidth::Bursty(bw.with_clock_reading(now_micros)),
            Bandwidth::AllOrNothing(bw) => {
                Bandwidth::AllOrNothing(bw.with_clock_reading(now_micros))
            }
        }
    }

    /// Earliest instant the next single permit would be available,
    /// without mutating state.
    pub fn query_earliest_available(&self, now_micros: u64) -> u64 {
        match self {
            Bandwidth::Bursty(bw) => bw.query_earliest_available(now_micros),
            Bandwidth::AllOrNothing(bw) => bw.query_earliest_available(now_micros),
        }
    }

    /// Advance bookkeeping for a grant of `permits` and return the
    /// instant the grant takes effect; see the algorithm types for each
    /// variant's commit semantics.
    pub fn reserve_earliest_available(&mut self, permits: u64, now_micros: u64) -> u64 {
        match self {
            Bandwidth::Bursty(bw) => bw.reserve_earliest_available(permits, now_micros),
            Bandwidth::AllOrNothing(bw) => bw.reserve_earliest_available(permits, now_micros),
        }
    }

    pub fn permits_per_second(&self) -> f64 {
        match self {
            Bandwidth::Bursty(bw) => bw.permits_per_second(),
            Bandwidth::AllOrNothing(bw) => bw.permits_per_second(),
        }
    }

    /// Whether a future-dated reservation from this bucket is a failed
    /// (uncommitted) attempt rather than a booked grant.
    pub fn is_all_or_nothing(&self) -> bool {
        matches!(self, Bandwidth::AllOrNothing(_))
    }
}

/// Add a microsecond quantity expressed as `f64` onto a base instant,
/// saturating instead of wrapping.
pub(crate) fn saturating_add_micros(base_micros: u64, add_micros: f64) -> u64 {
    if !add_micros.is_finite() {
        return u64::MAX;
    }
    if add_micros <= 0.0 {
        return base_micros;
    }
    // `as` saturates on overflow for float-to-int casts
    base_micros.saturating_add(add_micros as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_form_is_self_describing() {
        let bursty = Bandwidth::bursty(2, Duration::from_secs(1), 0);
        let json = serde_json::to_string(&bursty).unwrap();
        assert!(json.contains("\"algorithm\":\"bursty\""));

        let aon = Bandwidth::all_or_nothing(2, Duration::from_secs(1), 0);
        let json = serde_json::to_string(&aon).unwrap();
        assert!(json.contains("\"algorithm\":\"all_or_nothing\""));

        let back: Bandwidth = serde_json::from_str(&json).unwrap();
        assert!(back.is_all_or_nothing());
        assert_eq!(back, aon);
    }

    #[test]
    fn test_unlimited_always_grants_now() {
        let mut bw = Bandwidth::unlimited(42);
        assert_eq!(bw.query_earliest_available(42), 42);
        assert_eq!(bw.reserve_earliest_available(1_000_000, 42), 42);
        assert_eq!(bw.query_earliest_available(42), 42);
    }

    #[test]
    fn test_saturating_add_micros() {
        assert_eq!(saturating_add_micros(10, 5.0), 15);
        assert_eq!(saturating_add_micros(10, -1.0), 10);
        assert_eq!(saturating_add_micros(10, f64::INFINITY), u64::MAX);
        assert_eq!(saturating_add_micros(u64::MAX - 1, 1e30), u64::MAX);
    }
}
