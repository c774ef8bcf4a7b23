//! Entry point for protected calls.
//!
//! [`FlowGuard`] wires the rule registry, the statistic nodes and the cluster
//! state into a [`FlowRuleChecker`]. Each admitted call gets an [`Entry`]
//! that counts as one in-flight call until it is dropped.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cluster::{ClusterMode, ClusterStateManager, EmbeddedTokenServer};
use crate::config::TollgateConfig;
use crate::error::{BlockError, Result};
use crate::flow::{FlowRule, FlowRuleChecker, FlowRuleManager, RuleProvider, Verdict};
use crate::node::{ContextNode, NodeRegistry, StatisticNode};

/// Context name used when the caller does not name one.
pub const DEFAULT_CONTEXT_NAME: &str = "tollgate_default_context";

/// Admission control for protected resources.
#[derive(Debug)]
pub struct FlowGuard {
    rules: Arc<FlowRuleManager>,
    nodes: Arc<NodeRegistry>,
    cluster: Arc<ClusterStateManager>,
    embedded_server: Option<Arc<EmbeddedTokenServer>>,
    checker: FlowRuleChecker,
}

impl FlowGuard {
    /// Create a guard over existing collaborators.
    pub fn new(
        rules: Arc<FlowRuleManager>,
        nodes: Arc<NodeRegistry>,
        cluster: Arc<ClusterStateManager>,
    ) -> Self {
        let checker = FlowRuleChecker::new(rules.clone(), nodes.clone(), cluster.clone());
        Self {
            rules,
            nodes,
            cluster,
            embedded_server: None,
            checker,
        }
    }

    /// Build a guard from configuration.
    ///
    /// Loads the configured rule file and sets up the cluster role. In server
    /// mode an embedded token server is started with the cluster rules. Client
    /// mode needs a token client registered on [`FlowGuard::cluster`]; until
    /// then cluster rules fall back.
    pub fn from_config(config: &TollgateConfig) -> Result<Self> {
        let rules = match &config.rules.path {
            Some(path) => FlowRuleManager::from_file(path)?,
            None => FlowRuleManager::new(),
        };

        let mut guard = Self::new(
            Arc::new(rules),
            Arc::new(NodeRegistry::new()),
            Arc::new(ClusterStateManager::new()),
        );

        match config.cluster.mode {
            ClusterMode::Server => {
                let server = Arc::new(EmbeddedTokenServer::new(config.cluster.server.clone()));
                server.load_rules(guard.rules.all_rules().iter().map(|r| r.as_ref()));
                guard.cluster.set_to_server(server.clone());
                guard.embedded_server = Some(server);
            }
            ClusterMode::Client => {
                warn!("Client mode configured without a token client; cluster rules will fall back");
                guard.cluster.set_mode(ClusterMode::Client);
            }
            ClusterMode::NotStarted => {}
        }

        info!(
            resources = guard.rules.resource_count(),
            cluster_mode = ?guard.cluster.mode(),
            "Flow guard initialized"
        );
        Ok(guard)
    }

    /// Replace the active rules, including those served by the embedded server.
    pub fn load_rules(&self, rules: Vec<FlowRule>) -> usize {
        let loaded = self.rules.load_rules(rules);
        if let Some(server) = &self.embedded_server {
            server.load_rules(self.rules.all_rules().iter().map(|r| r.as_ref()));
        }
        loaded
    }

    /// Enter `resource` with `count` permits.
    pub fn entry(
        &self,
        resource: &str,
        context: &str,
        origin: &str,
        count: u32,
    ) -> std::result::Result<Entry, BlockError> {
        self.do_entry(resource, context, origin, count, false)
    }

    /// Enter `resource` as a prioritized call.
    ///
    /// Prioritized calls may be asked by the token server to wait for the
    /// next window, which blocks the calling thread.
    pub fn entry_prioritized(
        &self,
        resource: &str,
        context: &str,
        origin: &str,
        count: u32,
    ) -> std::result::Result<Entry, BlockError> {
        self.do_entry(resource, context, origin, count, true)
    }

    fn do_entry(
        &self,
        resource: &str,
        context: &str,
        origin: &str,
        count: u32,
        prioritized: bool,
    ) -> std::result::Result<Entry, BlockError> {
        let context = if context.is_empty() {
            DEFAULT_CONTEXT_NAME
        } else {
            context
        };
        let node = self.nodes.get_or_create_context_node(context, resource);
        let call = self.nodes.call_context(context, origin, resource);

        let provider: &dyn RuleProvider = &*self.rules;
        match self
            .checker
            .check_flow(Some(provider), resource, &call, &node, count, prioritized)
        {
            Verdict::Pass => {
                node.add_pass(count);
                node.increase_thread();
                let origin_node = call.origin_node().cloned();
                if let Some(origin_node) = &origin_node {
                    origin_node.add_pass(count);
                    origin_node.increase_thread();
                }
                Ok(Entry {
                    node,
                    origin_node,
                    count,
                })
            }
            Verdict::Blocked { limit_app, rule } => {
                node.add_block(count);
                if let Some(origin_node) = call.origin_node() {
                    origin_node.add_block(count);
                }
                debug!(resource = %resource, origin = %origin, limit_app = %limit_app, "Entry blocked");
                Err(BlockError::Flow {
                    resource: resource.to_string(),
                    limit_app,
                    rule,
                })
            }
        }
    }

    pub fn rules(&self) -> &Arc<FlowRuleManager> {
        &self.rules
    }

    pub fn nodes(&self) -> &Arc<NodeRegistry> {
        &self.nodes
    }

    pub fn cluster(&self) -> &Arc<ClusterStateManager> {
        &self.cluster
    }

    pub fn checker(&self) -> &FlowRuleChecker {
        &self.checker
    }
}

/// An admitted call. Dropping it ends the call.
#[derive(Debug)]
pub struct Entry {
    node: Arc<ContextNode>,
    origin_node: Option<Arc<StatisticNode>>,
    count: u32,
}

impl Entry {
    pub fn resource(&self) -> &str {
        self.node.resource()
    }

    pub fn context(&self) -> &str {
        self.node.context()
    }

    /// Permits acquired by this entry.
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.node.decrease_thread();
        if let Some(origin_node) = &self.origin_node {
            origin_node.decrease_thread();
        }
    }
}
