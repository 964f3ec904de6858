//! Bottom-up resolution of a lookup key to its applicable limiters.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::matcher::{compose_results, is_match};
use crate::rate::Operator;
use crate::tree::Node;

use super::{LimiterContext, RateLimiter, RateLimiterProvider, SubMatcher};

/// The resolution engine: a context tree plus its value-carrying leaves,
/// collected once in stable insertion order.
///
/// `visit` walks every leaf up to (but never including) the root,
/// evaluates each node's matchers against the key, and hands every
/// distinct match to the visitor exactly once per call. Leaves sharing an
/// ancestor produce the same ancestor token, and the per-call token set
/// keeps the shared bucket from being charged once per sharing leaf.
pub struct RateLimiterTree<K> {
    root: Node<LimiterContext<K>>,
    leaves: Vec<Node<LimiterContext<K>>>,
    provider: RateLimiterProvider,
}

impl<K: AsRef<str> + 'static> RateLimiterTree<K> {
    pub(crate) fn new(root: Node<LimiterContext<K>>, provider: RateLimiterProvider) -> Self {
        let mut leaves = Vec::new();
        root.visit_all(&mut |node| {
            if node.is_leaf() && node.value().is_some() {
                leaves.push(node.clone());
            }
        });
        Self {
            root,
            leaves,
            provider,
        }
    }

    pub fn root(&self) -> &Node<LimiterContext<K>> {
        &self.root
    }

    pub fn provider(&self) -> &RateLimiterProvider {
        &self.provider
    }

    /// Resolve `key` to its applicable limiters, invoking `visitor` with
    /// `(token, limiter, context, limit_index)` for each distinct match.
    ///
    /// The visitor returns `Ok(false)` to stop the traversal early; the
    /// overall result is `Ok(false)` iff it did. A key that matches
    /// nothing completes with `Ok(true)` and zero visits.
    pub fn visit<F>(&self, key: &K, visitor: &mut F) -> Result<bool>
    where
        F: FnMut(&str, &Arc<RateLimiter>, &LimiterContext<K>, Option<usize>) -> Result<bool>,
    {
        let mut visited: HashSet<String> = HashSet::new();
        for leaf in &self.leaves {
            let mut current = Some(leaf.clone());
            while let Some(node) = current {
                if node.ptr_eq(&self.root) {
                    // the root is a structural anchor, never matched
                    break;
                }
                if let Some(context) = node.value() {
                    if !self.visit_node(context, key, &mut visited, visitor)? {
                        return Ok(false);
                    }
                }
                current = node.parent();
            }
        }
        Ok(true)
    }

    fn visit_node<F>(
        &self,
        context: &LimiterContext<K>,
        key: &K,
        visited: &mut HashSet<String>,
        visitor: &mut F,
    ) -> Result<bool>
    where
        F: FnMut(&str, &Arc<RateLimiter>, &LimiterContext<K>, Option<usize>) -> Result<bool>,
    {
        let main = context.main_matcher().match_key(key);
        if !is_match(&main) {
            return Ok(true);
        }
        trace!(
            key = key.as_ref(),
            token = main.as_str(),
            "Matched rate node"
        );
        if context.has_sub_conditions() {
            let operator = context.rates().operator;
            for (index, sub_matcher) in context.sub_matchers().iter().enumerate() {
                let token = match sub_matcher {
                    SubMatcher::Conditioned(matcher) => {
                        let sub = matcher.match_key(key);
                        if !is_match(&sub) {
                            continue;
                        }
                        compose_results(&main, &sub)
                    }
                    // no sub-condition to evaluate: the limit applies on the
                    // main match alone, indexed so sibling buckets stay
                    // distinct
                    SubMatcher::Unconditioned => format!("{}_{}", main, index),
                };
                if visited.insert(token.clone()) {
                    let limiter = self.provider.get_or_create(&token, context.rates(), index)?;
                    if !visitor(&token, &limiter, context, Some(index))? {
                        return Ok(false);
                    }
                }
                if operator == Operator::Or {
                    // first matching sub-limit decides for the group
                    break;
                }
            }
        } else if visited.insert(main.clone()) {
            let limiter = self.provider.get_or_create(&main, context.rates(), 0)?;
            if !visitor(&main, &limiter, context, None)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl<K> std::fmt::Debug for RateLimiterTree<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterTree")
            .field("leaves", &self.leaves.len())
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}
