//! Per-invocation calling context.

use std::sync::Arc;

use super::statistic::StatisticNode;

/// Identity of the caller and the context chain for one protected call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Name of the entry chain, matched by chain-strategy rules
    name: String,
    /// Caller identity, possibly empty
    origin: String,
    /// Statistics for (resource, origin)
    origin_node: Option<Arc<StatisticNode>>,
}

impl CallContext {
    pub fn new(name: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: origin.into(),
            origin_node: None,
        }
    }

    /// Attach the origin's statistic node.
    pub fn with_origin_node(mut self, node: Option<Arc<StatisticNode>>) -> Self {
        self.origin_node = node;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn origin_node(&self) -> Option<&Arc<StatisticNode>> {
        self.origin_node.as_ref()
    }
}
