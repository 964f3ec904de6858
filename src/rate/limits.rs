//! Rate limit clauses and their grouping.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bandwidth::BURSTY;
use crate::error::{Result, TollgateError};

/// Operator joining multiple limits within one rate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Every matching limit must grant.
    And,
    /// The first matching limit decides for the group.
    Or,
    /// No grouping semantics; at most one unconditioned limit.
    None,
}

/// One limit clause: `permits` per `window`.
///
/// A zero `window` with positive permits means unlimited; zero permits is
/// a deny-all clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    /// Permits issued per window.
    pub permits: u64,
    /// The window over which permits replenish.
    pub window: Duration,
    /// Optional condition expression gating this limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Identifier of the bucket algorithm backing this limit.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

fn default_algorithm() -> String {
    BURSTY.to_string()
}

impl Rate {
    /// A limit of `permits` per `window`.
    pub fn new(permits: u64, window: Duration) -> Self {
        Self {
            permits,
            window,
            condition: None,
            algorithm: default_algorithm(),
        }
    }

    pub fn per_second(permits: u64) -> Self {
        Self::new(permits, Duration::from_secs(1))
    }

    pub fn per_minute(permits: u64) -> Self {
        Self::new(permits, Duration::from_secs(60))
    }

    pub fn per_hour(permits: u64) -> Self {
        Self::new(permits, Duration::from_secs(3600))
    }

    pub fn per_day(permits: u64) -> Self {
        Self::new(permits, Duration::from_secs(86400))
    }

    /// Gate this limit on a condition expression.
    pub fn with_condition(mut self, expression: impl Into<String>) -> Self {
        self.condition = Some(expression.into());
        self
    }

    /// Select the bucket algorithm backing this limit.
    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }
}

/// An ordered group of limits joined by an [`Operator`], with an optional
/// group-level condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub limits: Vec<Rate>,
}

impl Default for Rates {
    fn default() -> Self {
        Self::empty()
    }
}

impl Rates {
    /// A bare group marker: no limits, no operator semantics.
    pub fn empty() -> Self {
        Self {
            operator: Operator::None,
            condition: None,
            limits: Vec::new(),
        }
    }

    /// A single limit.
    pub fn of(limit: Rate) -> Self {
        Self {
            operator: Operator::None,
            condition: None,
            limits: vec![limit],
        }
    }

    /// Limits joined with AND: every matching limit must grant.
    pub fn all(limits: Vec<Rate>) -> Self {
        Self {
            operator: Operator::And,
            condition: None,
            limits,
        }
    }

    /// Limits joined with OR: the first matching limit decides.
    pub fn any(limits: Vec<Rate>) -> Self {
        Self {
            operator: Operator::Or,
            condition: None,
            limits,
        }
    }

    /// Gate the whole group on a condition expression.
    pub fn with_condition(mut self, expression: impl Into<String>) -> Self {
        self.condition = Some(expression.into());
        self
    }

    pub fn has_limits(&self) -> bool {
        !self.limits.is_empty()
    }

    /// Whether per-limit matching is required: more than one limit, or any
    /// limit carrying its own condition.
    pub fn has_sub_conditions(&self) -> bool {
        self.limits.len() > 1 || self.limits.iter().any(|limit| limit.condition.is_some())
    }

    /// Enforce the group invariant: a limit-less group carries no
    /// operator semantics.
    pub fn validate(&self) -> Result<()> {
        if self.limits.is_empty() && self.operator != Operator::None {
            return Err(TollgateError::Config(format!(
                "a group without limits must use operator 'none', found {:?}",
                self.operator,
            )));
        }
        Ok(())
    }
}
