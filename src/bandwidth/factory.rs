//! Bucket construction, keyed by algorithm identifier.
//!
//! The registry is explicitly constructed and explicitly scoped: it is
//! passed through configuration rather than living in process-wide
//! mutable state, and can be extended with custom algorithms.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Bandwidth, ALL_OR_NOTHING, BURSTY};
use crate::error::{Result, TollgateError};
use crate::rate::Rate;

/// Builds a [`Bandwidth`] from one rate limit clause.
pub trait BandwidthFactory: Send + Sync {
    fn create(&self, rate: &Rate, now_micros: u64) -> Bandwidth;
}

/// Factory for the smoothing bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct BurstyFactory;

impl BandwidthFactory for BurstyFactory {
    fn create(&self, rate: &Rate, now_micros: u64) -> Bandwidth {
        Bandwidth::bursty(rate.permits, rate.window, now_micros)
    }
}

/// Factory for the all-or-nothing bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllOrNothingFactory;

impl BandwidthFactory for AllOrNothingFactory {
    fn create(&self, rate: &Rate, now_micros: u64) -> Bandwidth {
        Bandwidth::all_or_nothing(rate.permits, rate.window, now_micros)
    }
}

/// Registry of bucket factories, keyed by algorithm identifier.
#[derive(Clone)]
pub struct BandwidthFactories {
    factories: HashMap<String, Arc<dyn BandwidthFactory>>,
}

impl Default for BandwidthFactories {
    fn default() -> Self {
        Self::standard()
    }
}

impl BandwidthFactories {
    /// Registry with the built-in algorithms registered.
    pub fn standard() -> Self {
        let mut factories = Self {
            factories: HashMap::new(),
        };
        factories.register(BURSTY, Arc::new(BurstyFactory));
        factories.register(ALL_OR_NOTHING, Arc::new(AllOrNothingFactory));
        factories
    }

    /// Register (or replace) a factory under `algorithm`.
    pub fn register(&mut self, algorithm: impl Into<String>, factory: Arc<dyn BandwidthFactory>) {
        self.factories.insert(algorithm.into(), factory);
    }

    /// Whether `algorithm` is registered.
    pub fn supports(&self, algorithm: &str) -> bool {
        self.factories.contains_key(algorithm)
    }

    /// Build a bucket for `rate` using its declared algorithm.
    pub fn create(&self, rate: &Rate, now_micros: u64) -> Result<Bandwidth> {
        let factory = self.factories.get(&rate.algorithm).ok_or_else(|| {
            TollgateError::Config(format!("unknown bucket algorithm '{}'", rate.algorithm))
        })?;
        Ok(factory.create(rate, now_micros))
    }
}

impl fmt::Debug for BandwidthFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("BandwidthFactories")
            .field("algorithms", &ids)
            .finish()
    }
}
