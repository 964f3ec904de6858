//! Source descriptors: what a configuration tree node represents.

use serde::{Deserialize, Serialize};

use super::Rates;

/// Identifies what a node stands for: a group marker, an owner-level or
/// member-level declaration, or a property-sourced entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSource {
    /// Unique among siblings of the same parent; doubles as the node name.
    pub id: String,
    /// The enclosing scope, e.g. a member's owning entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declarer: Option<String>,
    /// Whether this source is a grouping scope rather than a direct
    /// declaration.
    #[serde(default)]
    pub group_type: bool,
    /// Whether the source declares limits of its own.
    #[serde(default)]
    pub rate_limited: bool,
}

impl RateSource {
    /// A plain named source.
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            declarer: None,
            group_type: false,
            rate_limited: false,
        }
    }

    /// A grouping scope.
    pub fn group(id: impl Into<String>) -> Self {
        Self {
            group_type: true,
            ..Self::named(id)
        }
    }

    /// A member declared inside an enclosing scope.
    pub fn member(id: impl Into<String>, declarer: impl Into<String>) -> Self {
        Self {
            declarer: Some(declarer.into()),
            ..Self::named(id)
        }
    }

    pub fn rate_limited(mut self, rate_limited: bool) -> Self {
        self.rate_limited = rate_limited;
        self
    }
}

/// The value attached to a configuration tree node: a source plus its
/// declared rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    pub source: RateSource,
    pub rates: Rates,
}

impl RateConfig {
    pub fn new(source: RateSource, rates: Rates) -> Self {
        Self { source, rates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::Rate;

    #[test]
    fn test_source_constructors() {
        let group = RateSource::group("api");
        assert!(group.group_type);
        assert!(group.declarer.is_none());

        let member = RateSource::member("list", "api").rate_limited(true);
        assert_eq!(member.declarer.as_deref(), Some("api"));
        assert!(member.rate_limited);
    }

    #[test]
    fn test_rate_config_carries_rates() {
        let config = RateConfig::new(
            RateSource::named("api").rate_limited(true),
            Rates::of(Rate::per_second(10)),
        );
        assert!(config.rates.has_limits());
        assert_eq!(config.source.id, "api");
    }
}
