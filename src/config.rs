//! Properties-based configuration: a named map of rate declarations that
//! builds the configuration tree.
//!
//! This is the non-declarative input path: entries are keyed by name,
//! optionally nested through `members`, and loaded from YAML.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::rate::{Operator, Rate, RateConfig, RateSource, Rates};
use crate::tree::Node;

/// A complete rate limit configuration: entry name to declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitProperties {
    /// Top-level entries, attached directly under the root.
    #[serde(default)]
    pub limits: BTreeMap<String, LimitEntry>,
}

/// One configuration entry.
///
/// Entries form a tree: an entry with `members` is a grouping scope whose
/// members inherit its limits through the fallback policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitEntry {
    /// Operator joining the `rates`; defaults to `or` for multiple rates.
    #[serde(default)]
    pub operator: Option<Operator>,
    /// Condition expression gating the whole entry.
    #[serde(default)]
    pub condition: Option<String>,
    /// The limit clauses declared on this entry.
    #[serde(default)]
    pub rates: Vec<RateEntry>,
    /// Nested member entries.
    #[serde(default)]
    pub members: BTreeMap<String, LimitEntry>,
}

/// One limit clause in properties form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateEntry {
    pub permits: u64,
    /// Named window unit.
    #[serde(default)]
    pub per: Option<TimeUnit>,
    /// Raw window in microseconds; zero means unlimited. Mutually
    /// exclusive with `per`.
    #[serde(default)]
    pub window_micros: Option<u64>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
}

/// Window vocabulary for properties entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Millis,
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Millis => Duration::from_millis(1),
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

impl RateEntry {
    fn to_rate(&self) -> Result<Rate> {
        let window = match (self.per, self.window_micros) {
            (Some(_), Some(_)) => {
                return Err(TollgateError::Config(
                    "a rate declares either 'per' or 'window_micros', not both".to_string(),
                ))
            }
            (Some(unit), None) => unit.duration(),
            (None, Some(micros)) => Duration::from_micros(micros),
            (None, None) => TimeUnit::Second.duration(),
        };
        let mut rate = Rate::new(self.permits, window);
        if let Some(condition) = &self.condition {
            rate = rate.with_condition(condition.clone());
        }
        if let Some(algorithm) = &self.algorithm {
            rate = rate.with_algorithm(algorithm.clone());
        }
        Ok(rate)
    }
}

impl LimitEntry {
    fn to_rates(&self) -> Result<Rates> {
        let limits = self
            .rates
            .iter()
            .map(RateEntry::to_rate)
            .collect::<Result<Vec<_>>>()?;
        let operator = match self.operator {
            Some(operator) => operator,
            None if limits.len() > 1 => Operator::Or,
            None => Operator::None,
        };
        let rates = Rates {
            operator,
            condition: self.condition.clone(),
            limits,
        };
        rates.validate()?;
        Ok(rates)
    }
}

impl RateLimitProperties {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit properties");
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|err| {
            TollgateError::Config(format!("failed to parse rate limit properties: {}", err))
        })
    }

    /// Build the configuration tree: a value-less `"root"` anchor with
    /// one subtree per entry.
    pub fn to_node(&self) -> Result<Node<RateConfig>> {
        let root = Node::new_root("root");
        for (name, entry) in &self.limits {
            attach_entry(&root, name, entry)?;
        }
        Ok(root)
    }
}

fn attach_entry(parent: &Node<RateConfig>, name: &str, entry: &LimitEntry) -> Result<()> {
    let rates = entry.to_rates()?;
    let mut source = match parent.parent() {
        Some(_) => RateSource::member(name, parent.name()),
        None => RateSource::named(name),
    };
    source.group_type = !entry.members.is_empty();
    source.rate_limited = rates.has_limits();

    let node = Node::of(name, RateConfig::new(source, rates), parent)?;
    for (member_name, member) in &entry.members {
        attach_entry(&node, member_name, member)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_properties() {
        let yaml = r#"
limits:
  api:
    rates:
      - permits: 100
        per: second
"#;
        let properties = RateLimitProperties::from_yaml(yaml).unwrap();
        assert_eq!(properties.limits.len(), 1);
        let api = &properties.limits["api"];
        assert_eq!(api.rates.len(), 1);
        assert_eq!(api.rates[0].permits, 100);
    }

    #[test]
    fn test_time_unit_durations() {
        assert_eq!(TimeUnit::Millis.duration(), Duration::from_millis(1));
        assert_eq!(TimeUnit::Second.duration(), Duration::from_secs(1));
        assert_eq!(TimeUnit::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeUnit::Hour.duration(), Duration::from_secs(3600));
        assert_eq!(TimeUnit::Day.duration(), Duration::from_secs(86400));
    }

    #[test]
    fn test_to_node_builds_anchored_tree() {
        let yaml = r#"
limits:
  api:
    operator: and
    rates:
      - permits: 1
        per: second
      - permits: 30
        per: minute
  jobs:
    rates:
      - permits: 10
        per: hour
        algorithm: all_or_nothing
"#;
        let properties = RateLimitProperties::from_yaml(yaml).unwrap();
        let root = properties.to_node().unwrap();

        assert_eq!(root.name(), "root");
        assert!(root.value().is_none());
        assert_eq!(root.children().len(), 2);

        let api = root.find_first_child(|n| n.name() == "api").unwrap();
        let config = api.value().unwrap();
        assert_eq!(config.rates.operator, Operator::And);
        assert_eq!(config.rates.limits.len(), 2);
        assert!(config.source.rate_limited);
        assert!(!config.source.group_type);

        let jobs = root.find_first_child(|n| n.name() == "jobs").unwrap();
        assert_eq!(
            jobs.value().unwrap().rates.limits[0].algorithm,
            "all_or_nothing"
        );
    }

    #[test]
    fn test_members_become_subtrees() {
        let yaml = r#"
limits:
  service:
    rates:
      - permits: 5
        per: second
    members:
      read: {}
      write:
        rates:
          - permits: 1
            per: second
"#;
        let properties = RateLimitProperties::from_yaml(yaml).unwrap();
        let root = properties.to_node().unwrap();

        let service = root.find_first_child(|n| n.name() == "service").unwrap();
        assert!(service.value().unwrap().source.group_type);
        assert_eq!(service.children().len(), 2);

        let read = root.find_first_child(|n| n.name() == "read").unwrap();
        let source = &read.value().unwrap().source;
        assert_eq!(source.declarer.as_deref(), Some("service"));
        assert!(!source.rate_limited);

        let write = root.find_first_child(|n| n.name() == "write").unwrap();
        assert!(write.value().unwrap().source.rate_limited);
    }

    #[test]
    fn test_default_operator_depends_on_rate_count() {
        let yaml = r#"
limits:
  multi:
    rates:
      - permits: 1
      - permits: 2
  single:
    rates:
      - permits: 1
"#;
        let properties = RateLimitProperties::from_yaml(yaml).unwrap();
        let root = properties.to_node().unwrap();

        let multi = root.find_first_child(|n| n.name() == "multi").unwrap();
        assert_eq!(multi.value().unwrap().rates.operator, Operator::Or);
        let single = root.find_first_child(|n| n.name() == "single").unwrap();
        assert_eq!(single.value().unwrap().rates.operator, Operator::None);
        // the bare default window is one second
        assert_eq!(
            single.value().unwrap().rates.limits[0].window,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_zero_window_micros_is_expressible() {
        let yaml = r#"
limits:
  free:
    rates:
      - permits: 1
        window_micros: 0
"#;
        let properties = RateLimitProperties::from_yaml(yaml).unwrap();
        let root = properties.to_node().unwrap();
        let free = root.find_first_child(|n| n.name() == "free").unwrap();
        assert!(free.value().unwrap().rates.limits[0].window.is_zero());
    }

    #[test]
    fn test_conflicting_window_declarations_rejected() {
        let yaml = r#"
limits:
  bad:
    rates:
      - permits: 1
        per: second
        window_micros: 5
"#;
        let properties = RateLimitProperties::from_yaml(yaml).unwrap();
        assert!(matches!(
            properties.to_node().unwrap_err(),
            TollgateError::Config(_)
        ));
    }

    #[test]
    fn test_explicit_operator_without_limits_rejected() {
        let yaml = r#"
limits:
  bad:
    operator: and
"#;
        let properties = RateLimitProperties::from_yaml(yaml).unwrap();
        assert!(matches!(
            properties.to_node().unwrap_err(),
            TollgateError::Config(_)
        ));
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = RateLimitProperties::from_yaml("limits: [not, a, map]").unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }
}
