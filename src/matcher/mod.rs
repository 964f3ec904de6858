//! Matcher algebra: predicates that map a lookup key to a match token.
//!
//! A matcher either produces a non-empty match token (the string identity
//! of the match, which doubles as the limiter cache and store key) or the
//! well-known [`NO_MATCH`] sentinel.

mod expression;

use std::collections::HashSet;

pub use expression::{ExpressionMatchers, FnExpressionMatchers, NoExpressions};

/// The result of a failed match: the empty token.
pub const NO_MATCH: &str = "";

/// Whether a match result is a real match.
pub fn is_match(result: &str) -> bool {
    !result.is_empty()
}

/// A predicate over lookup keys.
///
/// Implementations must be pure: the same key yields the same token, so
/// tokens stay stable across calls and process restarts.
pub trait Matcher<K>: Send + Sync {
    /// The match token for `key`, or [`NO_MATCH`].
    fn match_key(&self, key: &K) -> String;

    fn matches(&self, key: &K) -> bool {
        is_match(&self.match_key(key))
    }
}

/// The permanent no-op matcher: never matches anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchNone;

impl<K> Matcher<K> for MatchNone {
    fn match_key(&self, _key: &K) -> String {
        NO_MATCH.to_string()
    }
}

/// The well-known no-op matcher.
pub fn match_none<K: 'static>() -> Box<dyn Matcher<K>> {
    Box::new(MatchNone)
}

/// Build a matcher from a token-producing closure.
pub fn from_fn<K, F>(f: F) -> Box<dyn Matcher<K>>
where
    K: 'static,
    F: Fn(&K) -> String + Send + Sync + 'static,
{
    struct FnMatcher<F>(F);
    impl<K, F> Matcher<K> for FnMatcher<F>
    where
        F: Fn(&K) -> String + Send + Sync,
    {
        fn match_key(&self, key: &K) -> String {
            (self.0)(key)
        }
    }
    Box::new(FnMatcher(f))
}

/// AND-compose two matchers: both must match, tokens are combined with
/// [`compose_results`].
pub fn compose<K: 'static>(left: Box<dyn Matcher<K>>, right: Box<dyn Matcher<K>>) -> Box<dyn Matcher<K>> {
    struct AndMatcher<K> {
        left: Box<dyn Matcher<K>>,
        right: Box<dyn Matcher<K>>,
    }
    impl<K> Matcher<K> for AndMatcher<K> {
        fn match_key(&self, key: &K) -> String {
            let left = self.left.match_key(key);
            if !is_match(&left) {
                return NO_MATCH.to_string();
            }
            let right = self.right.match_key(key);
            if !is_match(&right) {
                return NO_MATCH.to_string();
            }
            compose_results(&left, &right)
        }
    }
    Box::new(AndMatcher { left, right })
}

/// Combine a main token with a secondary token into one composite token.
///
/// A secondary token that adds no information (empty, or identical to the
/// main token) leaves the main token unchanged.
pub fn compose_results(main: &str, secondary: &str) -> String {
    if secondary.is_empty() || secondary == main {
        main.to_string()
    } else {
        format!("{}_{}", main, secondary)
    }
}

/// Matches keys naming any member of a fixed name set, always producing
/// the same token.
///
/// This is the node-identity matcher: the set holds a node's own name and
/// every descendant name, so a key designating anything inside the
/// subtree resolves to the node's token.
#[derive(Debug, Clone)]
pub struct NameSetMatcher {
    token: String,
    names: HashSet<String>,
}

impl NameSetMatcher {
    pub fn new(token: impl Into<String>, names: HashSet<String>) -> Self {
        Self {
            token: token.into(),
            names,
        }
    }
}

impl<K: AsRef<str>> Matcher<K> for NameSetMatcher {
    fn match_key(&self, key: &K) -> String {
        if self.names.contains(key.as_ref()) {
            self.token.clone()
        } else {
            NO_MATCH.to_string()
        }
    }
}
