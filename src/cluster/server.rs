//! Embedded token server.
//!
//! Grants tokens for cluster-mode rules from counters held in this process,
//! for deployments where one instance acts as the token server for its peers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, trace};

use super::token::{TokenError, TokenResult, TokenService, TokenStatus};
use crate::config::TokenServerConfig;
use crate::flow::{FlowRule, ThresholdType};
use crate::node::WindowCounter;

/// Server-side view of a cluster rule.
#[derive(Debug, Clone, PartialEq)]
struct ClusterFlowRule {
    resource: String,
    /// Tokens per window for the whole cluster
    threshold: f64,
}

/// Token server that keeps per-flow counters in memory.
pub struct EmbeddedTokenServer {
    config: TokenServerConfig,
    window: Duration,
    rules: RwLock<HashMap<u64, ClusterFlowRule>>,
    counters: DashMap<u64, Arc<WindowCounter>>,
    /// Requests handled in the current window, across every flow
    requests: WindowCounter,
}

impl EmbeddedTokenServer {
    pub fn new(config: TokenServerConfig) -> Self {
        let window = Duration::from_millis(config.window_ms.max(1));
        Self {
            config,
            window,
            rules: RwLock::new(HashMap::new()),
            counters: DashMap::new(),
            requests: WindowCounter::new(window),
        }
    }

    /// Replace the served rules with the cluster-mode rules among `rules`.
    ///
    /// Counters of flows that remain are kept. Returns the number of flows served.
    pub fn load_rules<'a>(&self, rules: impl IntoIterator<Item = &'a FlowRule>) -> usize {
        let clients = f64::from(self.config.connected_clients.max(1));
        let served: HashMap<u64, ClusterFlowRule> = rules
            .into_iter()
            .filter_map(|rule| {
                let cluster = rule.cluster_config()?;
                let threshold = match cluster.threshold_type {
                    ThresholdType::Global => rule.count(),
                    ThresholdType::AvgLocal => rule.count() * clients,
                };
                Some((
                    cluster.flow_id,
                    ClusterFlowRule {
                        resource: rule.resource().to_string(),
                        threshold,
                    },
                ))
            })
            .collect();

        self.counters.retain(|flow_id, _| served.contains_key(flow_id));
        let count = served.len();
        *self.rules.write() = served;

        info!(flows = count, "Token server rules loaded");
        count
    }

    /// Number of flows the server has rules for.
    pub fn flow_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Tokens granted so far in the current window for `flow_id`.
    pub fn granted(&self, flow_id: u64) -> u64 {
        self.counters
            .get(&flow_id)
            .map(|c| c.current())
            .unwrap_or(0)
    }

    fn counter(&self, flow_id: u64) -> Arc<WindowCounter> {
        if let Some(counter) = self.counters.get(&flow_id) {
            return counter.clone();
        }
        self.counters
            .entry(flow_id)
            .or_insert_with(|| Arc::new(WindowCounter::new(self.window)))
            .clone()
    }

    fn acquire(&self, flow_id: u64, count: u32, prioritized: bool) -> TokenResult {
        if count == 0 {
            return TokenResult::new(TokenStatus::BadRequest);
        }

        if self.requests.add(1) as f64 > self.config.max_allowed_qps {
            debug!(flow_id = flow_id, "Token server over its request budget");
            return TokenResult::new(TokenStatus::TooManyRequest);
        }

        let Some(rule) = self.rules.read().get(&flow_id).cloned() else {
            return TokenResult::new(TokenStatus::NoRuleExists);
        };

        let limit = rule.threshold.floor() as u64;
        let requested = u64::from(count);
        let counter = self.counter(flow_id);

        if counter.try_add(requested, limit) {
            let remaining = limit.saturating_sub(counter.current());
            trace!(flow_id = flow_id, resource = %rule.resource, remaining = remaining, "Tokens granted");
            return TokenResult::ok(remaining);
        }

        if prioritized {
            let wait = counter.duration_until_reset();
            let max_wait = Duration::from_millis(self.config.max_occupy_wait_ms);
            if wait <= max_wait && counter.occupy_next(requested, limit) {
                let wait_ms = ceil_millis(wait);
                debug!(
                    flow_id = flow_id,
                    resource = %rule.resource,
                    wait_ms = wait_ms,
                    "Tokens booked against the next window"
                );
                return TokenResult::should_wait(wait_ms);
            }
        }

        debug!(flow_id = flow_id, resource = %rule.resource, limit = limit, "Tokens denied");
        TokenResult::blocked()
    }
}

fn ceil_millis(duration: Duration) -> u64 {
    let millis = duration.as_micros().div_ceil(1000);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

impl TokenService for EmbeddedTokenServer {
    fn request_token(
        &self,
        flow_id: u64,
        count: u32,
        prioritized: bool,
    ) -> Result<TokenResult, TokenError> {
        Ok(self.acquire(flow_id, count, prioritized))
    }
}

impl std::fmt::Debug for EmbeddedTokenServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedTokenServer")
            .field("config", &self.config)
            .field("flows", &self.flow_count())
            .finish()
    }
}
