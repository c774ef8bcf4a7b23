//! Flow rule registry.
//!
//! Holds the active rule set grouped by resource and answers the two
//! questions the checker asks on every call: which rules apply to a
//! resource, and whether an origin is "other" for it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::rule::{FlowRule, FlowRuleConfig, LimitApp};
use crate::error::{Result, TollgateError};

/// Ordered rules for one resource, shared with callers without copying.
pub type RuleSet = Arc<[Arc<FlowRule>]>;

/// Source of the flow rules that apply to a resource.
pub trait RuleProvider: Send + Sync {
    /// Rules for `resource` in evaluation order, or `None` if it has none.
    fn flow_rules(&self, resource: &str) -> Option<RuleSet>;
}

/// Answers whether an origin is covered by the `other` filter on a resource.
pub trait OriginClassifier: Send + Sync {
    /// `true` when no rule on `resource` explicitly targets `origin`.
    fn is_other_origin(&self, origin: &str, resource: &str) -> bool;
}

/// A rule file: a list of rules, optionally under a `rules` key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowRulesConfig {
    #[serde(default)]
    pub rules: Vec<FlowRuleConfig>,
}

/// In-memory registry of the active flow rules.
#[derive(Debug, Default)]
pub struct FlowRuleManager {
    rules: RwLock<HashMap<String, RuleSet>>,
}

impl FlowRuleManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML or JSON file (chosen by extension).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = Self::new();
        manager.load_file(path)?;
        Ok(manager)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manager = Self::new();
        manager.load_config(parse_yaml(yaml)?);
        Ok(manager)
    }

    /// Replace the active rules with the contents of a rule file.
    ///
    /// Returns the number of rules loaded.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading flow rules");

        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            parse_json(&contents)?
        } else {
            parse_yaml(&contents)?
        };
        Ok(self.load_config(config))
    }

    /// Replace the active rules with a parsed rule file.
    ///
    /// Invalid entries are skipped with a warning. Returns the number of
    /// rules loaded.
    pub fn load_config(&self, config: FlowRulesConfig) -> usize {
        let rules = config
            .rules
            .into_iter()
            .filter_map(|entry| {
                let resource = entry.resource.clone();
                match FlowRule::try_from(entry) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        warn!(resource = %resource, error = %e, "Skipping invalid flow rule");
                        None
                    }
                }
            })
            .collect::<Vec<_>>();
        self.load_rules(rules)
    }

    /// Replace the active rules. Rules keep their relative order per resource.
    ///
    /// Returns the number of rules loaded.
    pub fn load_rules(&self, rules: impl IntoIterator<Item = FlowRule>) -> usize {
        let mut grouped: HashMap<String, Vec<Arc<FlowRule>>> = HashMap::new();
        let mut total = 0;
        for rule in rules {
            total += 1;
            grouped
                .entry(rule.resource().to_string())
                .or_default()
                .push(Arc::new(rule));
        }

        let resources = grouped.len();
        let grouped = grouped
            .into_iter()
            .map(|(resource, rules)| (resource, RuleSet::from(rules)))
            .collect();
        *self.rules.write() = grouped;

        info!(rules = total, resources = resources, "Flow rules loaded");
        total
    }

    /// Whether any rule targets `resource`.
    pub fn has_config(&self, resource: &str) -> bool {
        self.rules.read().contains_key(resource)
    }

    /// Snapshot of every active rule, ordered by resource name.
    pub fn all_rules(&self) -> Vec<Arc<FlowRule>> {
        let rules = self.rules.read();
        let mut resources: Vec<&String> = rules.keys().collect();
        resources.sort();
        resources
            .into_iter()
            .flat_map(|resource| rules[resource].iter().cloned())
            .collect()
    }

    /// Number of resources with at least one rule.
    pub fn resource_count(&self) -> usize {
        self.rules.read().len()
    }
}

impl RuleProvider for FlowRuleManager {
    fn flow_rules(&self, resource: &str) -> Option<RuleSet> {
        self.rules.read().get(resource).cloned()
    }
}

impl OriginClassifier for FlowRuleManager {
    fn is_other_origin(&self, origin: &str, resource: &str) -> bool {
        if origin.is_empty() {
            return false;
        }
        let rules = self.rules.read();
        match rules.get(resource) {
            Some(rules) => !rules
                .iter()
                .any(|rule| matches!(rule.limit_app(), Some(LimitApp::Origin(app)) if app == origin)),
            None => true,
        }
    }
}

/// Accept either a bare list of rules or a `rules:` document.
fn parse_yaml(yaml: &str) -> Result<FlowRulesConfig> {
    if let Ok(rules) = serde_yaml::from_str::<Vec<FlowRuleConfig>>(yaml) {
        return Ok(FlowRulesConfig { rules });
    }
    serde_yaml::from_str(yaml)
        .map_err(|e| TollgateError::Config(format!("Failed to parse flow rules: {}", e)))
}

fn parse_json(json: &str) -> Result<FlowRulesConfig> {
    if let Ok(rules) = serde_json::from_str::<Vec<FlowRuleConfig>>(json) {
        return Ok(FlowRulesConfig { rules });
    }
    serde_json::from_str(json)
        .map_err(|e| TollgateError::Config(format!("Failed to parse flow rules: {}", e)))
}
