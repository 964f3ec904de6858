//! Limiter cache: one lazily-built limiter per match token.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::bandwidth::{Bandwidth, BandwidthFactories, StoreFacade, Ticker};
use crate::error::{Result, TollgateError};
use crate::rate::Rates;

use super::RateLimiter;

/// Maps a match token to its cached limiter, constructing on first use.
///
/// Construction happens at most once per token: concurrent first-access
/// races collapse to a single stored instance, and later callers receive
/// it. Bucket state is adopted from the store when present so consumption
/// survives process and tree restarts; otherwise it is synthesized from
/// the rate declaration.
pub struct RateLimiterProvider {
    limiters: DashMap<String, Arc<RateLimiter>>,
    store: Arc<StoreFacade>,
    factories: BandwidthFactories,
    ticker: Arc<dyn Ticker>,
}

impl RateLimiterProvider {
    pub fn new(
        store: Arc<StoreFacade>,
        factories: BandwidthFactories,
        ticker: Arc<dyn Ticker>,
    ) -> Self {
        Self {
            limiters: DashMap::new(),
            store,
            factories,
            ticker,
        }
    }

    /// The limiter for `token`, backed by `rates.limits[index]`.
    ///
    /// With zero limits declared, index 0 yields an always-admit limiter
    /// (the node is a pure grouping scope); any other index is a fatal
    /// configuration error.
    pub fn get_or_create(
        &self,
        token: &str,
        rates: &Rates,
        index: usize,
    ) -> Result<Arc<RateLimiter>> {
        if let Some(existing) = self.limiters.get(token) {
            return Ok(Arc::clone(&existing));
        }
        let bandwidth = match self.store.get(token)? {
            Some(stored) => {
                debug!(token = token, "Adopting persisted bandwidth");
                stored
            }
            None => {
                let bandwidth = self.synthesize(rates, index)?;
                debug!(
                    token = token,
                    index = index,
                    permits_per_second = bandwidth.permits_per_second(),
                    "Creating new limiter"
                );
                bandwidth
            }
        };
        let limiter = Arc::new(RateLimiter::with_store(
            bandwidth,
            Arc::clone(&self.ticker),
            Arc::clone(&self.store),
            token,
        ));
        // first writer wins; a racing construction is dropped here
        let entry = self.limiters.entry(token.to_string()).or_insert(limiter);
        Ok(Arc::clone(&entry))
    }

    fn synthesize(&self, rates: &Rates, index: usize) -> Result<Bandwidth> {
        let now = self.ticker.elapsed_micros();
        if rates.limits.is_empty() {
            if index == 0 {
                return Ok(Bandwidth::unlimited(now));
            }
            return Err(TollgateError::Config(format!(
                "limit index {} out of range: no limits defined",
                index,
            )));
        }
        let rate = rates.limits.get(index).ok_or_else(|| {
            TollgateError::Config(format!(
                "limit index {} out of range for {} limits",
                index,
                rates.limits.len(),
            ))
        })?;
        self.factories.create(rate, now)
    }

    pub fn ticker(&self) -> &Arc<dyn Ticker> {
        &self.ticker
    }

    pub fn store(&self) -> &Arc<StoreFacade> {
        &self.store
    }

    /// Number of limiters constructed so far.
    pub fn limiter_count(&self) -> usize {
        self.limiters.len()
    }
}

impl std::fmt::Debug for RateLimiterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterProvider")
            .field("limiters", &self.limiters.len())
            .field("factories", &self.factories)
            .finish_non_exhaustive()
    }
}
