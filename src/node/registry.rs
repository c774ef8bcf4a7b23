//! Node registry: one cluster node per resource, one context node per
//! (context, resource) pair.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::context::CallContext;
use super::statistic::{ClusterNode, ContextNode};

/// Lookup of a resource's aggregate node, used by cross-resource rules.
pub trait ClusterNodeLookup: Send + Sync {
    /// The aggregate node of `resource`, if it has seen any traffic.
    fn cluster_node(&self, resource: &str) -> Option<Arc<ClusterNode>>;
}

/// Key of a context node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ContextKey {
    context: String,
    resource: String,
}

/// Thread-safe registry of statistic nodes.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    clusters: DashMap<String, Arc<ClusterNode>>,
    contexts: DashMap<ContextKey, Arc<ContextNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the aggregate node for `resource`, creating it on first use.
    pub fn get_or_create_cluster_node(&self, resource: &str) -> Arc<ClusterNode> {
        if let Some(node) = self.clusters.get(resource) {
            return node.clone();
        }
        self.clusters
            .entry(resource.to_string())
            .or_insert_with(|| {
                debug!(resource = %resource, "Creating cluster node");
                Arc::new(ClusterNode::new(resource))
            })
            .clone()
    }

    /// Get the node for `resource` within `context`, creating it on first use.
    pub fn get_or_create_context_node(&self, context: &str, resource: &str) -> Arc<ContextNode> {
        let key = ContextKey {
            context: context.to_string(),
            resource: resource.to_string(),
        };
        if let Some(node) = self.contexts.get(&key) {
            return node.clone();
        }
        let cluster = self.get_or_create_cluster_node(resource);
        self.contexts
            .entry(key)
            .or_insert_with(|| Arc::new(ContextNode::new(context, cluster)))
            .clone()
    }

    /// Build the call context for one entry on `resource`.
    ///
    /// The origin node is only resolved for a non-empty origin.
    pub fn call_context(&self, context: &str, origin: &str, resource: &str) -> CallContext {
        let origin_node = if origin.is_empty() {
            None
        } else {
            Some(
                self.get_or_create_cluster_node(resource)
                    .get_or_create_origin_node(origin),
            )
        };
        CallContext::new(context, origin).with_origin_node(origin_node)
    }

    /// Number of resources with an aggregate node.
    pub fn cluster_node_count(&self) -> usize {
        self.clusters.len()
    }

    /// Drop every node. Primarily useful for testing.
    pub fn clear(&self) {
        self.contexts.clear();
        self.clusters.clear();
    }
}

impl ClusterNodeLookup for NodeRegistry {
    fn cluster_node(&self, resource: &str) -> Option<Arc<ClusterNode>> {
        self.clusters.get(resource).map(|n| n.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_node_shared_across_contexts() {
        let registry = NodeRegistry::new();
        let a = registry.get_or_create_context_node("ctx-a", "res");
        let b = registry.get_or_create_context_node("ctx-b", "res");

        assert!(!Arc::ptr_eq(a.stats(), b.stats()));
        assert!(Arc::ptr_eq(a.cluster_node(), b.cluster_node()));
        assert_eq!(registry.cluster_node_count(), 1);
    }

    #[test]
    fn test_context_node_reused() {
        let registry = NodeRegistry::new();
        let first = registry.get_or_create_context_node("ctx", "res");
        let second = registry.get_or_create_context_node("ctx", "res");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_lookup_only_finds_existing_nodes() {
        let registry = NodeRegistry::new();
        assert!(registry.cluster_node("res").is_none());

        registry.get_or_create_cluster_node("res");
        assert!(registry.cluster_node("res").is_some());
    }

    #[test]
    fn test_call_context_origin_node() {
        let registry = NodeRegistry::new();

        let ctx = registry.call_context("ctx", "app-a", "res");
        let origin_node = ctx.origin_node().unwrap();
        let expected = registry
            .get_or_create_cluster_node("res")
            .get_or_create_origin_node("app-a");
        assert!(Arc::ptr_eq(origin_node, &expected));

        let anonymous = registry.call_context("ctx", "", "res");
        assert!(anonymous.origin_node().is_none());
    }

    #[test]
    fn test_clear() {
        let registry = NodeRegistry::new();
        registry.get_or_create_context_node("ctx", "res");
        registry.clear();
        assert_eq!(registry.cluster_node_count(), 0);
    }
}
