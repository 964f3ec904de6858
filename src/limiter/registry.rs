//! Public facade: build a registry from configuration, then admit or
//! reject lookup keys against it.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bandwidth::{
    BandwidthFactories, BandwidthsStore, InMemoryBandwidthsStore, StoreFacade, SystemTicker,
    Ticker,
};
use crate::config::RateLimitProperties;
use crate::error::{Result, TollgateError};
use crate::matcher::{ExpressionMatchers, NoExpressions};
use crate::rate::RateConfig;
use crate::tree::Node;

use super::{
    resolve_contexts, FallbackPolicy, Limiter, LimiterContext, RateLimiter, RateLimiterProvider,
    RateLimiterTree,
};

/// Hierarchical admission control over a rate configuration tree.
///
/// A key is admitted iff every limiter it resolves to grants; a key that
/// resolves to nothing is unlimited. Concurrent use from multiple threads
/// is supported; the registry itself never spawns any.
pub struct RateLimiterRegistry<K> {
    tree: RateLimiterTree<K>,
}

impl<K: AsRef<str> + 'static> RateLimiterRegistry<K> {
    pub fn builder() -> RateLimiterRegistryBuilder<K> {
        RateLimiterRegistryBuilder::new()
    }

    /// Admit or reject `key` without blocking.
    pub fn try_consume(&self, key: &K, permits: u64) -> Result<bool> {
        self.try_consume_for(key, permits, Duration::ZERO)
    }

    /// Admit or reject `key`, waiting at most `timeout` in total across
    /// every limiter the key resolves to. A single rejection anywhere
    /// fails the key.
    pub fn try_consume_for(&self, key: &K, permits: u64, timeout: Duration) -> Result<bool> {
        let ticker = Arc::clone(self.tree.provider().ticker());
        let start = ticker.elapsed_micros();
        let timeout_micros = u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX);
        let deadline = start.saturating_add(timeout_micros);
        self.tree.visit(key, &mut |token, limiter, _context, _index| {
            let now = ticker.elapsed_micros();
            let remaining = Duration::from_micros(deadline.saturating_sub(now));
            let admitted = limiter.try_acquire_for(permits, remaining)?;
            if !admitted {
                debug!(key = key.as_ref(), token = token, "Admission rejected");
            }
            Ok(admitted)
        })
    }

    /// Resolve `key` to a reusable [`Limiter`] for direct, repeated use.
    ///
    /// Resolution happens once; condition matchers are evaluated against
    /// the key at resolution time, so re-resolve if conditions depend on
    /// state that changes between requests.
    pub fn limiter(&self, key: &K) -> Result<Limiter> {
        let mut resolved = Vec::new();
        self.tree.visit(key, &mut |_token, limiter, _context, _index| {
            resolved.push(Arc::clone(limiter));
            Ok(true)
        })?;
        Ok(Limiter::from_resolved(resolved))
    }

    /// Custom verdict composition over the limiters `key` resolves to.
    pub fn visit<F>(&self, key: &K, visitor: &mut F) -> Result<bool>
    where
        F: FnMut(&str, &Arc<RateLimiter>, &LimiterContext<K>, Option<usize>) -> Result<bool>,
    {
        self.tree.visit(key, visitor)
    }

    pub fn tree(&self) -> &RateLimiterTree<K> {
        &self.tree
    }
}

impl<K> std::fmt::Debug for RateLimiterRegistry<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("tree", &self.tree)
            .finish()
    }
}

/// Builder for [`RateLimiterRegistry`].
pub struct RateLimiterRegistryBuilder<K> {
    store: Arc<dyn BandwidthsStore>,
    ticker: Arc<dyn Ticker>,
    policy: FallbackPolicy,
    expressions: Box<dyn ExpressionMatchers<K>>,
    factories: BandwidthFactories,
}

impl<K: AsRef<str> + 'static> Default for RateLimiterRegistryBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: AsRef<str> + 'static> RateLimiterRegistryBuilder<K> {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryBandwidthsStore::new()),
            ticker: Arc::new(SystemTicker),
            policy: FallbackPolicy::default(),
            expressions: Box::new(NoExpressions),
            factories: BandwidthFactories::standard(),
        }
    }

    /// Persist bucket state in `store` instead of the in-memory default.
    pub fn store(mut self, store: Arc<dyn BandwidthsStore>) -> Self {
        self.store = store;
        self
    }

    /// Read time from `ticker` instead of the wall clock.
    pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    /// Select the limit-presence fallback policy. One policy governs the
    /// whole tree.
    pub fn policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve condition expressions through `expressions`.
    pub fn expressions(mut self, expressions: impl ExpressionMatchers<K> + 'static) -> Self {
        self.expressions = Box::new(expressions);
        self
    }

    /// Use a custom bucket algorithm registry.
    pub fn factories(mut self, factories: BandwidthFactories) -> Self {
        self.factories = factories;
        self
    }

    /// Build from a pre-built configuration tree.
    ///
    /// The root must be the value-less anchor named `"root"`. Every
    /// configuration error — invalid rate groups, unknown algorithms,
    /// unsupported condition expressions — surfaces here, before any
    /// traffic is gated.
    pub fn build_from_tree(self, root: &Node<RateConfig>) -> Result<RateLimiterRegistry<K>> {
        if root.value().is_some() || root.name() != "root" {
            return Err(TollgateError::Config(
                "the configuration tree must be anchored at a value-less node named 'root'"
                    .to_string(),
            ));
        }
        self.validate_algorithms(root)?;
        let contexts = resolve_contexts(root, self.expressions.as_ref(), self.policy)?;
        let facade = Arc::new(StoreFacade::new(self.store));
        let provider = RateLimiterProvider::new(facade, self.factories, self.ticker);
        Ok(RateLimiterRegistry {
            tree: RateLimiterTree::new(contexts, provider),
        })
    }

    /// Build from flat/nested properties (see [`RateLimitProperties`]).
    pub fn build_from_properties(
        self,
        properties: &RateLimitProperties,
    ) -> Result<RateLimiterRegistry<K>> {
        let root = properties.to_node()?;
        self.build_from_tree(&root)
    }

    fn validate_algorithms(&self, root: &Node<RateConfig>) -> Result<()> {
        let mut unknown: Option<String> = None;
        root.visit_all(&mut |node| {
            if unknown.is_some() {
                return;
            }
            if let Some(config) = node.value() {
                for limit in &config.rates.limits {
                    if !self.factories.supports(&limit.algorithm) {
                        unknown = Some(format!(
                            "node '{}' uses unknown bucket algorithm '{}'",
                            node.name(),
                            limit.algorithm,
                        ));
                        return;
                    }
                }
            }
        });
        match unknown {
            Some(message) => Err(TollgateError::Config(message)),
            None => Ok(()),
        }
    }
}

impl<K> std::fmt::Debug for RateLimiterRegistryBuilder<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterRegistryBuilder")
            .field("policy", &self.policy)
            .field("factories", &self.factories)
            .finish_non_exhaustive()
    }
}
