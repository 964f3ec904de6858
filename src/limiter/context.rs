//! Per-node resolution of rate configuration into executable matchers.

use std::collections::HashSet;
use std::fmt;

use crate::error::{Result, TollgateError};
use crate::matcher::{compose, match_none, ExpressionMatchers, Matcher, NameSetMatcher};
use crate::rate::{RateConfig, Rates};
use crate::tree::Node;

/// How a node without limits of its own decides whether it is still
/// eligible for matching.
///
/// The two policies are mutually exclusive per tree; pick one per
/// registry and keep it consistent across a deployment. `BottomUp` checks
/// ancestors and is the default: leaf nodes vastly outnumber group nodes,
/// so an O(depth) ancestor walk beats descending whole subtrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// A limit-less node is active if any ancestor carries limits.
    #[default]
    BottomUp,
    /// A limit-less node is active if any descendant carries limits.
    TopDown,
}

/// Matcher slot for one limit within a group.
///
/// An `Unconditioned` slot has no condition to evaluate: the limit
/// applies whenever the node's main matcher matches. Keeping the slot
/// (instead of dropping the limit) preserves index-based correlation
/// between matchers and limits.
pub enum SubMatcher<K> {
    Unconditioned,
    Conditioned(Box<dyn Matcher<K>>),
}

impl<K> fmt::Debug for SubMatcher<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubMatcher::Unconditioned => f.write_str("Unconditioned"),
            SubMatcher::Conditioned(_) => f.write_str("Conditioned"),
        }
    }
}

/// The executable form of one configuration node: its rate config plus
/// the matchers derived from it.
pub struct LimiterContext<K> {
    rate_config: RateConfig,
    main_matcher: Box<dyn Matcher<K>>,
    sub_matchers: Vec<SubMatcher<K>>,
}

impl<K: AsRef<str> + 'static> LimiterContext<K> {
    /// Derive the context for `config` at `node`'s position in the tree.
    ///
    /// A node with no limits anywhere along its policy-defined reach gets
    /// the permanent no-match matcher and never gates traffic. Otherwise
    /// the main matcher is the subtree-identity matcher, AND-composed
    /// with the group condition when present; sub-matchers are derived
    /// one per limit whenever per-limit matching is required.
    pub(crate) fn resolve(
        node: &Node<RateConfig>,
        config: &RateConfig,
        expressions: &dyn ExpressionMatchers<K>,
        policy: FallbackPolicy,
    ) -> Result<Self> {
        config.rates.validate()?;
        if !Self::is_active(node, &config.rates, policy) {
            return Ok(Self {
                rate_config: config.clone(),
                main_matcher: match_none(),
                sub_matchers: Vec::new(),
            });
        }

        let mut names = HashSet::new();
        node.visit_all(&mut |n| {
            names.insert(n.name().to_string());
        });
        let mut main_matcher: Box<dyn Matcher<K>> =
            Box::new(NameSetMatcher::new(node.name(), names));
        if let Some(expression) = &config.rates.condition {
            main_matcher = compose(main_matcher, resolve_expression(expressions, expression)?);
        }

        let sub_matchers = if config.rates.has_sub_conditions() {
            config
                .rates
                .limits
                .iter()
                .map(|limit| match &limit.condition {
                    Some(expression) => Ok(SubMatcher::Conditioned(resolve_expression(
                        expressions,
                        expression,
                    )?)),
                    None => Ok(SubMatcher::Unconditioned),
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        Ok(Self {
            rate_config: config.clone(),
            main_matcher,
            sub_matchers,
        })
    }

    fn is_active(node: &Node<RateConfig>, rates: &Rates, policy: FallbackPolicy) -> bool {
        if rates.has_limits() {
            return true;
        }
        match policy {
            FallbackPolicy::BottomUp => {
                let mut current = node.parent();
                while let Some(ancestor) = current {
                    if ancestor
                        .value()
                        .map_or(false, |config| config.rates.has_limits())
                    {
                        return true;
                    }
                    current = ancestor.parent();
                }
                false
            }
            FallbackPolicy::TopDown => node
                .find_first_child(|n| n.value().map_or(false, |config| config.rates.has_limits()))
                .is_some(),
        }
    }
}

impl<K> LimiterContext<K> {
    pub fn rate_config(&self) -> &RateConfig {
        &self.rate_config
    }

    pub fn rates(&self) -> &Rates {
        &self.rate_config.rates
    }

    pub fn main_matcher(&self) -> &dyn Matcher<K> {
        self.main_matcher.as_ref()
    }

    pub fn sub_matchers(&self) -> &[SubMatcher<K>] {
        &self.sub_matchers
    }

    pub fn has_sub_conditions(&self) -> bool {
        self.rate_config.rates.has_sub_conditions()
    }
}

impl<K> fmt::Debug for LimiterContext<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterContext")
            .field("rate_config", &self.rate_config)
            .field("sub_matchers", &self.sub_matchers)
            .finish_non_exhaustive()
    }
}

fn resolve_expression<K>(
    expressions: &dyn ExpressionMatchers<K>,
    expression: &str,
) -> Result<Box<dyn Matcher<K>>> {
    if !expressions.is_supported(expression) {
        return Err(TollgateError::UnsupportedExpression(expression.to_string()));
    }
    expressions.matcher(expression)
}

/// Turn a rate configuration tree into an executable context tree,
/// resolving every condition expression up front so configuration errors
/// surface at build time.
pub(crate) fn resolve_contexts<K: AsRef<str> + 'static>(
    root: &Node<RateConfig>,
    expressions: &dyn ExpressionMatchers<K>,
    policy: FallbackPolicy,
) -> Result<Node<LimiterContext<K>>> {
    root.try_transform(&|node| node.name().to_string(), &|node, config| {
        LimiterContext::resolve(node, config, expressions, policy)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{from_fn, FnExpressionMatchers, NoExpressions, NO_MATCH};
    use crate::rate::{Rate, RateSource};

    fn config(id: &str, rates: Rates) -> RateConfig {
        let rate_limited = rates.has_limits();
        RateConfig::new(RateSource::named(id).rate_limited(rate_limited), rates)
    }

    fn resolve_at(
        node: &Node<RateConfig>,
        policy: FallbackPolicy,
    ) -> LimiterContext<String> {
        LimiterContext::resolve(node, node.value().unwrap(), &NoExpressions, policy).unwrap()
    }

    #[test]
    fn test_parity_between_sub_matchers_and_limits() {
        let root = Node::new_root("root");
        let rates = Rates::all(vec![
            Rate::per_second(1),
            Rate::per_second(3),
            Rate::per_minute(10),
        ]);
        let node = Node::of("api", config("api", rates), &root).unwrap();

        let context = resolve_at(&node, FallbackPolicy::BottomUp);
        assert!(context.has_sub_conditions());
        assert_eq!(
            context.sub_matchers().len(),
            context.rates().limits.len()
        );
    }

    #[test]
    fn test_single_unconditioned_limit_needs_no_sub_matchers() {
        let root = Node::new_root("root");
        let node = Node::of("api", config("api", Rates::of(Rate::per_second(1))), &root).unwrap();

        let context = resolve_at(&node, FallbackPolicy::BottomUp);
        assert!(!context.has_sub_conditions());
        assert!(context.sub_matchers().is_empty());
        assert_eq!(context.main_matcher().match_key(&"api".to_string()), "api");
    }

    #[test]
    fn test_untouched_node_never_matches() {
        let root = Node::new_root("root");
        let node = Node::of("idle", config("idle", Rates::empty()), &root).unwrap();

        let context = resolve_at(&node, FallbackPolicy::BottomUp);
        assert_eq!(
            context.main_matcher().match_key(&"idle".to_string()),
            NO_MATCH
        );
    }

    #[test]
    fn test_bottom_up_fallback_activates_limit_less_member() {
        let root = Node::new_root("root");
        let owner = Node::of(
            "owner",
            config("owner", Rates::of(Rate::per_second(1))),
            &root,
        )
        .unwrap();
        let member = Node::of("member", config("member", Rates::empty()), &owner).unwrap();

        let context = resolve_at(&member, FallbackPolicy::BottomUp);
        assert_eq!(
            context.main_matcher().match_key(&"member".to_string()),
            "member"
        );
        // top-down looks the other way and sees nothing below the member
        let context = resolve_at(&member, FallbackPolicy::TopDown);
        assert_eq!(
            context.main_matcher().match_key(&"member".to_string()),
            NO_MATCH
        );
    }

    #[test]
    fn test_top_down_fallback_activates_group_above_limits() {
        let root = Node::new_root("root");
        let group = Node::of("group", config("group", Rates::empty()), &root).unwrap();
        Node::of(
            "leaf",
            config("leaf", Rates::of(Rate::per_second(1))),
            &group,
        )
        .unwrap();

        let context = resolve_at(&group, FallbackPolicy::TopDown);
        assert_eq!(
            context.main_matcher().match_key(&"group".to_string()),
            "group"
        );
    }

    #[test]
    fn test_main_matcher_covers_whole_subtree() {
        let root = Node::new_root("root");
        let group = Node::of(
            "group",
            config("group", Rates::of(Rate::per_second(1))),
            &root,
        )
        .unwrap();
        Node::of("inner", config("inner", Rates::empty()), &group).unwrap();

        let context = resolve_at(&group, FallbackPolicy::BottomUp);
        assert_eq!(
            context.main_matcher().match_key(&"inner".to_string()),
            "group"
        );
        assert_eq!(
            context.main_matcher().match_key(&"elsewhere".to_string()),
            NO_MATCH
        );
    }

    #[test]
    fn test_group_condition_gates_main_matcher() {
        let expressions = FnExpressionMatchers::new(
            |expr| expr == "key.vip",
            |_| {
                from_fn(|key: &String| {
                    if key.contains("vip") {
                        "vip".to_string()
                    } else {
                        NO_MATCH.to_string()
                    }
                })
            },
        );
        let root = Node::new_root("root");
        let rates = Rates::of(Rate::per_second(1)).with_condition("key.vip");
        let lane = Node::of("lane", config("lane", rates), &root).unwrap();
        Node::of("lane.vip", config("lane.vip", Rates::empty()), &lane).unwrap();

        let context =
            LimiterContext::resolve(&lane, lane.value().unwrap(), &expressions, FallbackPolicy::BottomUp)
                .unwrap();
        // identity alone is not enough: the condition must also hold
        assert_eq!(context.main_matcher().match_key(&"lane".to_string()), NO_MATCH);
        // both hold: composite token
        assert_eq!(
            context.main_matcher().match_key(&"lane.vip".to_string()),
            "lane_vip"
        );
        assert_eq!(
            context.main_matcher().match_key(&"elsewhere".to_string()),
            NO_MATCH
        );
    }

    #[test]
    fn test_unsupported_expression_fails_resolution() {
        let root = Node::new_root("root");
        let rates = Rates::of(Rate::per_second(1).with_condition("sys.memory > 1g"));
        let node = Node::of("api", config("api", rates), &root).unwrap();

        let err =
            LimiterContext::<String>::resolve(&node, node.value().unwrap(), &NoExpressions, FallbackPolicy::BottomUp)
                .unwrap_err();
        assert!(matches!(err, TollgateError::UnsupportedExpression(_)));
    }

    #[test]
    fn test_resolve_contexts_transforms_whole_tree() {
        let root = Node::new_root("root");
        let owner = Node::of(
            "owner",
            config("owner", Rates::of(Rate::per_second(2))),
            &root,
        )
        .unwrap();
        Node::of("member", config("member", Rates::empty()), &owner).unwrap();

        let contexts: Node<LimiterContext<String>> =
            resolve_contexts(&root, &NoExpressions, FallbackPolicy::BottomUp).unwrap();
        assert_eq!(contexts.size(), 3);
        assert!(contexts.value().is_none());
    }
}
