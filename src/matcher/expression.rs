//! Boundary to the external condition-expression evaluator.
//!
//! The engine does not interpret condition strings itself; it hands them
//! to an [`ExpressionMatchers`] implementation at tree-resolve time. An
//! unsupported expression is a configuration error there, never at
//! request time.

use super::Matcher;
use crate::error::{Result, TollgateError};

/// Resolves condition expressions to matchers.
pub trait ExpressionMatchers<K>: Send + Sync {
    /// Whether `expression` can be resolved by this evaluator.
    fn is_supported(&self, expression: &str) -> bool;

    /// Resolve `expression` to a matcher.
    fn matcher(&self, expression: &str) -> Result<Box<dyn Matcher<K>>>;
}

/// The default evaluator: supports no expressions at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpressions;

impl<K> ExpressionMatchers<K> for NoExpressions {
    fn is_supported(&self, _expression: &str) -> bool {
        false
    }

    fn matcher(&self, expression: &str) -> Result<Box<dyn Matcher<K>>> {
        Err(TollgateError::UnsupportedExpression(expression.to_string()))
    }
}

/// Closure-backed evaluator for embedders and tests.
pub struct FnExpressionMatchers<K> {
    supports: Box<dyn Fn(&str) -> bool + Send + Sync>,
    #[allow(clippy::type_complexity)]
    factory: Box<dyn Fn(&str) -> Box<dyn Matcher<K>> + Send + Sync>,
}

impl<K> FnExpressionMatchers<K> {
    pub fn new<S, F>(supports: S, factory: F) -> Self
    where
        S: Fn(&str) -> bool + Send + Sync + 'static,
        F: Fn(&str) -> Box<dyn Matcher<K>> + Send + Sync + 'static,
    {
        Self {
            supports: Box::new(supports),
            factory: Box::new(factory),
        }
    }
}

impl<K> ExpressionMatchers<K> for FnExpressionMatchers<K> {
    fn is_supported(&self, expression: &str) -> bool {
        (self.supports)(expression)
    }

    fn matcher(&self, expression: &str) -> Result<Box<dyn Matcher<K>>> {
        if !self.is_supported(expression) {
            return Err(TollgateError::UnsupportedExpression(expression.to_string()));
        }
        Ok((self.factory)(expression))
    }
}
