//! Statistic nodes consulted by flow rules.
//!
//! Three views of the same traffic are kept:
//! - [`ClusterNode`]: everything that hit a resource, across contexts and origins
//! - per-origin [`StatisticNode`]s owned by the cluster node
//! - [`ContextNode`]: traffic for one resource inside one named context

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use super::counter::{WindowCounter, DEFAULT_WINDOW};

/// Pass, block and concurrency statistics for one slice of traffic.
#[derive(Debug)]
pub struct StatisticNode {
    /// Admitted permits in the current window
    pass: WindowCounter,
    /// Rejected permits in the current window
    block: WindowCounter,
    /// Entries currently in flight
    threads: AtomicU64,
}

impl StatisticNode {
    /// Create a node with the default one-second window.
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Create a node with a custom statistic window.
    pub fn with_window(window: Duration) -> Self {
        Self {
            pass: WindowCounter::new(window),
            block: WindowCounter::new(window),
            threads: AtomicU64::new(0),
        }
    }

    /// Permits admitted in the current window.
    pub fn pass_qps(&self) -> u64 {
        self.pass.current()
    }

    /// Permits rejected in the current window.
    pub fn block_qps(&self) -> u64 {
        self.block.current()
    }

    /// Number of entries currently holding this node.
    pub fn cur_thread_num(&self) -> u64 {
        self.threads.load(Ordering::SeqCst)
    }

    pub fn add_pass(&self, count: u32) {
        self.pass.add(u64::from(count));
    }

    pub fn add_block(&self, count: u32) {
        self.block.add(u64::from(count));
    }

    pub fn increase_thread(&self) {
        self.threads.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrease_thread(&self) {
        // Never wrap below zero if releases outnumber acquisitions.
        let _ = self
            .threads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

impl Default for StatisticNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate node for a resource, shared by every context and origin.
pub struct ClusterNode {
    resource: String,
    stats: Arc<StatisticNode>,
    origins: DashMap<String, Arc<StatisticNode>>,
}

impl ClusterNode {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            stats: Arc::new(StatisticNode::new()),
            origins: DashMap::new(),
        }
    }

    /// The resource this node aggregates.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Aggregate statistics for the resource.
    pub fn stats(&self) -> &Arc<StatisticNode> {
        &self.stats
    }

    /// Get the node for `origin`, creating it on first use.
    pub fn get_or_create_origin_node(&self, origin: &str) -> Arc<StatisticNode> {
        if let Some(node) = self.origins.get(origin) {
            return node.clone();
        }
        self.origins
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(StatisticNode::new()))
            .clone()
    }

    /// Get the node for `origin` if one has been created.
    pub fn origin_node(&self, origin: &str) -> Option<Arc<StatisticNode>> {
        self.origins.get(origin).map(|n| n.clone())
    }

    /// Number of distinct origins seen on this resource.
    pub fn origin_count(&self) -> usize {
        self.origins.len()
    }
}

impl fmt::Debug for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterNode")
            .field("resource", &self.resource)
            .field("stats", &self.stats)
            .field("origins", &self.origins.len())
            .finish()
    }
}

/// Statistics for one resource inside one named context.
#[derive(Debug)]
pub struct ContextNode {
    context: String,
    stats: Arc<StatisticNode>,
    cluster: Arc<ClusterNode>,
}

impl ContextNode {
    pub fn new(context: impl Into<String>, cluster: Arc<ClusterNode>) -> Self {
        Self {
            context: context.into(),
            stats: Arc::new(StatisticNode::new()),
            cluster,
        }
    }

    /// Name of the context this node belongs to.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// The resource this node tracks.
    pub fn resource(&self) -> &str {
        self.cluster.resource()
    }

    /// Statistics scoped to this context.
    pub fn stats(&self) -> &Arc<StatisticNode> {
        &self.stats
    }

    /// Aggregate node of the resource, across all contexts.
    pub fn cluster_node(&self) -> &Arc<ClusterNode> {
        &self.cluster
    }

    /// Record an admitted entry here and on the resource aggregate.
    pub fn add_pass(&self, count: u32) {
        self.stats.add_pass(count);
        self.cluster.stats().add_pass(count);
    }

    /// Record a rejected entry here and on the resource aggregate.
    pub fn add_block(&self, count: u32) {
        self.stats.add_block(count);
        self.cluster.stats().add_block(count);
    }

    pub fn increase_thread(&self) {
        self.stats.increase_thread();
        self.cluster.stats().increase_thread();
    }

    pub fn decrease_thread(&self) {
        self.stats.decrease_thread();
        self.cluster.stats().decrease_thread();
    }
}
