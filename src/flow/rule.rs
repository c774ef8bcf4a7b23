//! Flow rule model.
//!
//! Rules are immutable once built. They come either from the builder or from
//! the serde-friendly [`FlowRuleConfig`] form used by rule files:
//!
//! ```yaml
//! rules:
//!   - resource: checkout
//!     limit_app: app-a
//!     grade: thread
//!     count: 5
//!   - resource: checkout
//!     strategy: relate
//!     ref_resource: payment
//!     count: 100
//!     cluster:
//!       flow_id: 42
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::shaper::{DefaultShaper, TrafficShaper};
use crate::error::{Result, TollgateError};

/// Origin filter value that applies a rule to every caller.
pub const LIMIT_APP_DEFAULT: &str = "default";
/// Origin filter value that applies a rule to callers no sibling rule names.
pub const LIMIT_APP_OTHER: &str = "other";

/// Which callers a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LimitApp {
    /// Every caller
    Default,
    /// Callers not explicitly targeted by another rule on the same resource
    Other,
    /// One specific caller
    Origin(String),
}

impl LimitApp {
    /// Target a specific origin.
    pub fn origin(origin: impl Into<String>) -> Self {
        LimitApp::Origin(origin.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            LimitApp::Default => LIMIT_APP_DEFAULT,
            LimitApp::Other => LIMIT_APP_OTHER,
            LimitApp::Origin(origin) => origin,
        }
    }
}

impl From<&str> for LimitApp {
    fn from(value: &str) -> Self {
        match value {
            LIMIT_APP_DEFAULT => LimitApp::Default,
            LIMIT_APP_OTHER => LimitApp::Other,
            origin => LimitApp::Origin(origin.to_string()),
        }
    }
}

impl fmt::Display for LimitApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which statistic a rule's threshold is measured against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// The resource's own statistics
    #[default]
    Direct,
    /// Another resource's aggregate statistics
    Relate,
    /// This resource, only when entered through a named context
    Chain,
}

/// The metric a threshold limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    /// Admitted permits per statistic window
    #[default]
    Qps,
    /// Concurrent entries in flight
    Thread,
}

/// How the token server interprets a cluster rule's threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    /// Threshold is shared by the whole cluster
    #[default]
    Global,
    /// Threshold is per client, multiplied by the connected client count
    AvgLocal,
}

/// Cluster parameters of a rule. Presence puts the rule in cluster mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterFlowConfig {
    /// Cluster-wide identifier of the rule
    pub flow_id: u64,
    #[serde(default)]
    pub threshold_type: ThresholdType,
    /// Evaluate locally when the token service is unavailable or inconclusive
    #[serde(default = "default_fallback")]
    pub fallback_to_local_when_fail: bool,
}

fn default_fallback() -> bool {
    true
}

impl ClusterFlowConfig {
    pub fn new(flow_id: u64) -> Self {
        Self {
            flow_id,
            threshold_type: ThresholdType::Global,
            fallback_to_local_when_fail: default_fallback(),
        }
    }

    pub fn with_threshold_type(mut self, threshold_type: ThresholdType) -> Self {
        self.threshold_type = threshold_type;
        self
    }

    pub fn with_fallback_to_local(mut self, fallback: bool) -> Self {
        self.fallback_to_local_when_fail = fallback;
        self
    }
}

/// A validated, immutable flow rule.
#[derive(Debug, Clone)]
pub struct FlowRule {
    resource: String,
    limit_app: Option<LimitApp>,
    grade: Grade,
    count: f64,
    strategy: Strategy,
    ref_resource: Option<String>,
    cluster_config: Option<ClusterFlowConfig>,
    shaper: Arc<dyn TrafficShaper>,
}

impl FlowRule {
    /// Start building a rule for `resource`.
    pub fn builder(resource: impl Into<String>) -> FlowRuleBuilder {
        FlowRuleBuilder::new(resource)
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Origin filter; `None` makes the rule inert.
    pub fn limit_app(&self) -> Option<&LimitApp> {
        self.limit_app.as_ref()
    }

    pub fn grade(&self) -> Grade {
        self.grade
    }

    /// Threshold for the rule's grade.
    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Resource consulted by relate and chain rules. Empty when unset.
    pub fn ref_resource(&self) -> &str {
        self.ref_resource.as_deref().unwrap_or_default()
    }

    pub fn cluster_config(&self) -> Option<&ClusterFlowConfig> {
        self.cluster_config.as_ref()
    }

    pub fn is_cluster_mode(&self) -> bool {
        self.cluster_config.is_some()
    }

    /// The pass test applied to the selected statistic node.
    pub fn shaper(&self) -> &Arc<dyn TrafficShaper> {
        &self.shaper
    }
}

impl fmt::Display for FlowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resource={} limit_app={} grade={:?} count={} strategy={:?}",
            self.resource,
            self.limit_app.as_ref().map_or("<none>", LimitApp::as_str),
            self.grade,
            self.count,
            self.strategy,
        )?;
        if let Some(ref_resource) = &self.ref_resource {
            write!(f, " ref_resource={}", ref_resource)?;
        }
        if let Some(cluster) = &self.cluster_config {
            write!(
                f,
                " flow_id={} fallback={}",
                cluster.flow_id, cluster.fallback_to_local_when_fail
            )?;
        }
        Ok(())
    }
}

/// Builder for [`FlowRule`]. Validation happens in [`FlowRuleBuilder::build`].
#[derive(Debug, Clone)]
pub struct FlowRuleBuilder {
    resource: String,
    limit_app: Option<LimitApp>,
    grade: Grade,
    count: f64,
    strategy: Strategy,
    ref_resource: Option<String>,
    cluster_config: Option<ClusterFlowConfig>,
    shaper: Option<Arc<dyn TrafficShaper>>,
}

impl FlowRuleBuilder {
    fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            limit_app: Some(LimitApp::Default),
            grade: Grade::default(),
            count: 0.0,
            strategy: Strategy::default(),
            ref_resource: None,
            cluster_config: None,
            shaper: None,
        }
    }

    pub fn limit_app(mut self, limit_app: impl Into<LimitApp>) -> Self {
        self.limit_app = Some(limit_app.into());
        self
    }

    /// Leave the origin filter unset, making the rule inert.
    pub fn without_limit_app(mut self) -> Self {
        self.limit_app = None;
        self
    }

    pub fn grade(mut self, grade: Grade) -> Self {
        self.grade = grade;
        self
    }

    pub fn count(mut self, count: f64) -> Self {
        self.count = count;
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn ref_resource(mut self, ref_resource: impl Into<String>) -> Self {
        self.ref_resource = Some(ref_resource.into());
        self
    }

    pub fn cluster(mut self, config: ClusterFlowConfig) -> Self {
        self.cluster_config = Some(config);
        self
    }

    /// Replace the default threshold shaper.
    pub fn shaper(mut self, shaper: Arc<dyn TrafficShaper>) -> Self {
        self.shaper = Some(shaper);
        self
    }

    pub fn build(self) -> Result<FlowRule> {
        if self.resource.trim().is_empty() {
            return Err(TollgateError::InvalidRule("resource must not be empty".into()));
        }
        if !self.count.is_finite() || self.count < 0.0 {
            return Err(TollgateError::InvalidRule(format!(
                "count must be a non-negative number, got {} for resource `{}`",
                self.count, self.resource
            )));
        }
        if let Some(cluster) = &self.cluster_config {
            if cluster.flow_id == 0 {
                return Err(TollgateError::InvalidRule(format!(
                    "cluster rule for resource `{}` needs a non-zero flow_id",
                    self.resource
                )));
            }
        }

        let shaper = self
            .shaper
            .unwrap_or_else(|| Arc::new(DefaultShaper::new(self.grade, self.count)));

        Ok(FlowRule {
            resource: self.resource,
            limit_app: self.limit_app,
            grade: self.grade,
            count: self.count,
            strategy: self.strategy,
            ref_resource: self.ref_resource.filter(|r| !r.is_empty()),
            cluster_config: self.cluster_config,
            shaper,
        })
    }
}

/// Serialized form of a flow rule, as found in rule files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRuleConfig {
    pub resource: String,
    /// Origin filter; an explicit null makes the rule inert
    #[serde(default = "default_limit_app")]
    pub limit_app: Option<String>,
    #[serde(default)]
    pub grade: Grade,
    pub count: f64,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub ref_resource: Option<String>,
    #[serde(default)]
    pub cluster: Option<ClusterFlowConfig>,
}

fn default_limit_app() -> Option<String> {
    Some(LIMIT_APP_DEFAULT.to_string())
}

impl TryFrom<FlowRuleConfig> for FlowRule {
    type Error = TollgateError;

    fn try_from(config: FlowRuleConfig) -> Result<Self> {
        let mut builder = FlowRule::builder(config.resource)
            .grade(config.grade)
            .count(config.count)
            .strategy(config.strategy);

        builder = match config.limit_app {
            Some(limit_app) => builder.limit_app(limit_app.as_str()),
            None => builder.without_limit_app(),
        };
        if let Some(ref_resource) = config.ref_resource {
            builder = builder.ref_resource(ref_resource);
        }
        if let Some(cluster) = config.cluster {
            builder = builder.cluster(cluster);
        }
        builder.build()
    }
}

impl From<&FlowRule> for FlowRuleConfig {
    fn from(rule: &FlowRule) -> Self {
        Self {
            resource: rule.resource.clone(),
            limit_app: rule.limit_app.as_ref().map(|app| app.as_str().to_string()),
            grade: rule.grade,
            count: rule.count,
            strategy: rule.strategy,
            ref_resource: rule.ref_resource.clone(),
            cluster: rule.cluster_config.clone(),
        }
    }
}
