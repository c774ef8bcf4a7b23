//! Flow rule checking.
//!
//! For every protected call the checker walks the rules of the resource in
//! order and stops at the first one that denies. A rule is checked either
//! locally, against the statistic node picked by [`select_node`], or through
//! the cluster token service when it carries a cluster config. Cluster
//! checks that cannot reach a conclusive answer fall back to the local check
//! or, if fallback is disabled, let the call through.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::manager::{OriginClassifier, RuleProvider};
use super::rule::{ClusterFlowConfig, FlowRule, LimitApp, Strategy, LIMIT_APP_DEFAULT, LIMIT_APP_OTHER};
use crate::cluster::{TokenResult, TokenService, TokenServiceProvider, TokenStatus};
use crate::node::{CallContext, ClusterNodeLookup, ContextNode, StatisticNode};

/// Outcome of checking all flow rules of a resource.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Every applicable rule admitted the call
    Pass,
    /// A rule denied the call
    Blocked {
        /// Origin filter of the denying rule
        limit_app: String,
        /// The denying rule
        rule: Arc<FlowRule>,
    },
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// Evaluates flow rules against statistic nodes and the cluster token service.
///
/// Holds no per-call state; one checker serves all threads.
pub struct FlowRuleChecker {
    origins: Arc<dyn OriginClassifier>,
    nodes: Arc<dyn ClusterNodeLookup>,
    cluster: Arc<dyn TokenServiceProvider>,
}

impl FlowRuleChecker {
    pub fn new(
        origins: Arc<dyn OriginClassifier>,
        nodes: Arc<dyn ClusterNodeLookup>,
        cluster: Arc<dyn TokenServiceProvider>,
    ) -> Self {
        Self {
            origins,
            nodes,
            cluster,
        }
    }

    /// Check every rule of `resource`, stopping at the first denial.
    ///
    /// A missing provider or a resource without rules always passes.
    pub fn check_flow(
        &self,
        provider: Option<&dyn RuleProvider>,
        resource: &str,
        context: &CallContext,
        node: &ContextNode,
        count: u32,
        prioritized: bool,
    ) -> Verdict {
        let Some(rules) = provider.and_then(|p| p.flow_rules(resource)) else {
            return Verdict::Pass;
        };

        for rule in rules.iter() {
            if !self.can_pass_check(rule, context, node, count, prioritized) {
                let limit_app = rule
                    .limit_app()
                    .map(|app| app.as_str().to_string())
                    .unwrap_or_default();
                debug!(
                    resource = %resource,
                    origin = %context.origin(),
                    limit_app = %limit_app,
                    count = count,
                    "Flow rule denied call"
                );
                return Verdict::Blocked {
                    limit_app,
                    rule: rule.clone(),
                };
            }
        }

        Verdict::Pass
    }

    /// Check a single rule.
    pub fn can_pass_check(
        &self,
        rule: &FlowRule,
        context: &CallContext,
        node: &ContextNode,
        count: u32,
        prioritized: bool,
    ) -> bool {
        if rule.limit_app().is_none() {
            return true;
        }

        let passed = match rule.cluster_config() {
            Some(cluster) => self.pass_cluster_check(rule, cluster, context, node, count, prioritized),
            None => self.pass_local_check(rule, context, node, count, prioritized),
        };
        trace!(resource = %rule.resource(), cluster = rule.is_cluster_mode(), passed = passed, "Rule checked");
        passed
    }

    /// Check a rule against local statistics only.
    pub fn pass_local_check(
        &self,
        rule: &FlowRule,
        context: &CallContext,
        node: &ContextNode,
        count: u32,
        prioritized: bool,
    ) -> bool {
        match self.select_node(rule, context, node) {
            Some(selected) => rule.shaper().can_pass(&selected, count, prioritized),
            None => true,
        }
    }

    /// The statistic node `rule` should be measured against for this call.
    pub fn select_node(
        &self,
        rule: &FlowRule,
        context: &CallContext,
        node: &ContextNode,
    ) -> Option<Arc<StatisticNode>> {
        select_node(rule, context, node, &*self.origins, &*self.nodes)
    }

    fn pass_cluster_check(
        &self,
        rule: &FlowRule,
        cluster: &ClusterFlowConfig,
        context: &CallContext,
        node: &ContextNode,
        count: u32,
        prioritized: bool,
    ) -> bool {
        let Some(service) = self.pick_cluster_service() else {
            debug!(
                resource = %rule.resource(),
                flow_id = cluster.flow_id,
                "No token service available for cluster rule"
            );
            return self.fallback_to_local_or_pass(rule, cluster, context, node, count, prioritized);
        };

        match service.request_token(cluster.flow_id, count, prioritized) {
            Ok(result) => self.apply_token_result(result, rule, cluster, context, node, count, prioritized),
            Err(e) => {
                warn!(
                    resource = %rule.resource(),
                    flow_id = cluster.flow_id,
                    error = %e,
                    "Request cluster token unexpectedly failed"
                );
                self.fallback_to_local_or_pass(rule, cluster, context, node, count, prioritized)
            }
        }
    }

    fn pick_cluster_service(&self) -> Option<Arc<dyn TokenService>> {
        if self.cluster.is_client() {
            return self.cluster.client();
        }
        if self.cluster.is_server() {
            return self.cluster.embedded_server();
        }
        None
    }

    /// Turn a token service response into a decision.
    ///
    /// `ShouldWait` parks the calling thread for the full wait and then
    /// admits without asking again. The sleep cannot be cut short.
    #[allow(clippy::too_many_arguments)]
    fn apply_token_result(
        &self,
        result: TokenResult,
        rule: &FlowRule,
        cluster: &ClusterFlowConfig,
        context: &CallContext,
        node: &ContextNode,
        count: u32,
        prioritized: bool,
    ) -> bool {
        match result.status {
            TokenStatus::Ok => true,
            TokenStatus::ShouldWait => {
                trace!(flow_id = cluster.flow_id, wait_ms = result.wait_ms, "Waiting for next tick");
                std::thread::sleep(Duration::from_millis(result.wait_ms));
                true
            }
            TokenStatus::Blocked => false,
            TokenStatus::NoRuleExists
            | TokenStatus::BadRequest
            | TokenStatus::Fail
            | TokenStatus::TooManyRequest => {
                debug!(
                    resource = %rule.resource(),
                    flow_id = cluster.flow_id,
                    status = %result.status,
                    "Token service inconclusive"
                );
                self.fallback_to_local_or_pass(rule, cluster, context, node, count, prioritized)
            }
        }
    }

    fn fallback_to_local_or_pass(
        &self,
        rule: &FlowRule,
        cluster: &ClusterFlowConfig,
        context: &CallContext,
        node: &ContextNode,
        count: u32,
        prioritized: bool,
    ) -> bool {
        if cluster.fallback_to_local_when_fail {
            self.pass_local_check(rule, context, node, count, prioritized)
        } else {
            // The rule is not enforced for this call.
            true
        }
    }
}

impl std::fmt::Debug for FlowRuleChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRuleChecker").finish_non_exhaustive()
    }
}

/// Pick the statistic node a rule is measured against.
///
/// An exact origin match wins over `default`, which wins over `other`.
/// Non-direct strategies resolve through [`select_reference_node`].
/// `None` means the rule does not apply to this call.
pub fn select_node(
    rule: &FlowRule,
    context: &CallContext,
    node: &ContextNode,
    origins: &dyn OriginClassifier,
    nodes: &dyn ClusterNodeLookup,
) -> Option<Arc<StatisticNode>> {
    let limit_app = rule.limit_app()?;
    let origin = context.origin();
    let direct = rule.strategy() == Strategy::Direct;

    let origin_matches = matches!(limit_app, LimitApp::Origin(app) if app == origin) && filter_origin(origin);

    if origin_matches {
        if direct {
            return context.origin_node().cloned();
        }
        return select_reference_node(rule, context, node, nodes);
    }

    match limit_app {
        LimitApp::Default => {
            if direct {
                return Some(node.cluster_node().stats().clone());
            }
            select_reference_node(rule, context, node, nodes)
        }
        LimitApp::Other if origins.is_other_origin(origin, rule.resource()) => {
            if direct {
                return context.origin_node().cloned();
            }
            select_reference_node(rule, context, node, nodes)
        }
        _ => None,
    }
}

/// Resolve the node for relate and chain rules.
///
/// Relate reads the aggregate node of the referenced resource; chain reads
/// the current context node only when entered through the referenced context.
pub fn select_reference_node(
    rule: &FlowRule,
    context: &CallContext,
    node: &ContextNode,
    nodes: &dyn ClusterNodeLookup,
) -> Option<Arc<StatisticNode>> {
    let ref_resource = rule.ref_resource();
    if ref_resource.is_empty() {
        return None;
    }

    match rule.strategy() {
        Strategy::Relate => nodes
            .cluster_node(ref_resource)
            .map(|cluster| cluster.stats().clone()),
        Strategy::Chain if ref_resource == context.name() => Some(node.stats().clone()),
        Strategy::Chain | Strategy::Direct => None,
    }
}

/// Origins named like the sentinel filters never match literally.
fn filter_origin(origin: &str) -> bool {
    origin != LIMIT_APP_DEFAULT && origin != LIMIT_APP_OTHER
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use crate::cluster::{ClusterStateManager, TokenError};
    use crate::flow::{ClusterFlowConfig, FlowRuleManager, Grade, TrafficShaper};
    use crate::node::NodeRegistry;

    const RESOURCE: &str = "res";

    /// Shaper that records calls and answers a fixed value.
    #[derive(Debug)]
    struct RecordingShaper {
        answer: bool,
        calls: AtomicUsize,
    }

    impl RecordingShaper {
        fn new(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TrafficShaper for RecordingShaper {
        fn can_pass(&self, _node: &StatisticNode, _acquire: u32, _prioritized: bool) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    /// Token service that replays one response.
    struct ScriptedTokenService {
        response: fn() -> Result<TokenResult, TokenError>,
        calls: AtomicUsize,
    }

    impl ScriptedTokenService {
        fn new(response: fn() -> Result<TokenResult, TokenError>) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl TokenService for ScriptedTokenService {
        fn request_token(&self, _: u64, _: u32, _: bool) -> Result<TokenResult, TokenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.response)()
        }
    }

    struct Fixture {
        rules: Arc<FlowRuleManager>,
        nodes: Arc<NodeRegistry>,
        cluster: Arc<ClusterStateManager>,
        checker: FlowRuleChecker,
    }

    impl Fixture {
        fn new() -> Self {
            let rules = Arc::new(FlowRuleManager::new());
            let nodes = Arc::new(NodeRegistry::new());
            let cluster = Arc::new(ClusterStateManager::new());
            let checker = FlowRuleChecker::new(rules.clone(), nodes.clone(), cluster.clone());
            Self {
                rules,
                nodes,
                cluster,
                checker,
            }
        }

        fn call(&self, context: &str, origin: &str) -> (CallContext, Arc<ContextNode>) {
            (
                self.nodes.call_context(context, origin, RESOURCE),
                self.nodes.get_or_create_context_node(context, RESOURCE),
            )
        }

        fn select(&self, rule: &FlowRule, context: &str, origin: &str) -> Option<Arc<StatisticNode>> {
            let (ctx, node) = self.call(context, origin);
            self.checker.select_node(rule, &ctx, &node)
        }
    }

    fn rule(limit_app: &str) -> FlowRule {
        FlowRule::builder(RESOURCE)
            .limit_app(limit_app)
            .count(1.0)
            .build()
            .unwrap()
    }

    fn cluster_rule(fallback: bool, shaper: Arc<RecordingShaper>) -> FlowRule {
        FlowRule::builder(RESOURCE)
            .count(1.0)
            .cluster(ClusterFlowConfig::new(11).with_fallback_to_local(fallback))
            .shaper(shaper)
            .build()
            .unwrap()
    }

    #[test]
    fn test_absent_limit_app_always_passes() {
        let fx = Fixture::new();
        let shaper = RecordingShaper::new(false);
        let inert = FlowRule::builder(RESOURCE)
            .without_limit_app()
            .shaper(shaper.clone())
            .build()
            .unwrap();

        assert!(fx.select(&inert, "ctx", "app-a").is_none());

        let (ctx, node) = fx.call("ctx", "app-a");
        assert!(fx.checker.can_pass_check(&inert, &ctx, &node, 1, false));
        assert_eq!(shaper.calls(), 0);
    }

    #[test]
    fn test_exact_origin_selects_origin_node() {
        let fx = Fixture::new();
        let (ctx, node) = fx.call("ctx", "app-a");

        let selected = fx.checker.select_node(&rule("app-a"), &ctx, &node).unwrap();
        assert!(Arc::ptr_eq(&selected, ctx.origin_node().unwrap()));
    }

    #[test]
    fn test_exact_origin_mismatch_selects_nothing() {
        let fx = Fixture::new();
        assert!(fx.select(&rule("app-a"), "ctx", "app-b").is_none());
        assert!(fx.select(&rule("app-a"), "ctx", "").is_none());
    }

    #[test]
    fn test_sentinel_names_never_match_as_origin() {
        let fx = Fixture::new();
        let literal = FlowRule::builder(RESOURCE)
            .limit_app(LimitApp::origin("other"))
            .count(1.0)
            .build()
            .unwrap();

        // Nothing on the resource names "other", yet the literal filter
        // must not treat the caller named "other" as a match.
        assert!(fx.select(&literal, "ctx", "other").is_none());
    }

    #[test]
    fn test_default_selects_cluster_node_for_any_origin() {
        let fx = Fixture::new();
        for origin in ["app-a", "", "default"] {
            let (ctx, node) = fx.call("ctx", origin);
            let selected = fx.checker.select_node(&rule("default"), &ctx, &node).unwrap();
            assert!(Arc::ptr_eq(&selected, node.cluster_node().stats()));
        }
    }

    #[test]
    fn test_other_selects_origin_node_when_unclaimed() {
        let fx = Fixture::new();
        fx.rules.load_rules(vec![rule("app-a"), rule("other")]);

        let (ctx, node) = fx.call("ctx", "app-b");
        let selected = fx.checker.select_node(&rule("other"), &ctx, &node).unwrap();
        assert!(Arc::ptr_eq(&selected, ctx.origin_node().unwrap()));

        // app-a has its own rule, so the `other` rule does not cover it.
        assert!(fx.select(&rule("other"), "ctx", "app-a").is_none());
    }

    #[test]
    fn test_relate_selects_referenced_cluster_node() {
        let fx = Fixture::new();
        let related = fx.nodes.get_or_create_cluster_node("payment");
        let relate = FlowRule::builder(RESOURCE)
            .strategy(Strategy::Relate)
            .ref_resource("payment")
            .count(1.0)
            .build()
            .unwrap();

        let (ctx, node) = fx.call("ctx", "app-a");
        let selected = fx.checker.select_node(&relate, &ctx, &node).unwrap();
        assert!(Arc::ptr_eq(&selected, related.stats()));
        assert!(!Arc::ptr_eq(&selected, node.cluster_node().stats()));
    }

    #[test]
    fn test_relate_to_unseen_resource_selects_nothing() {
        let fx = Fixture::new();
        let relate = FlowRule::builder(RESOURCE)
            .strategy(Strategy::Relate)
            .ref_resource("never-called")
            .count(1.0)
            .build()
            .unwrap();
        assert!(fx.select(&relate, "ctx", "app-a").is_none());
    }

    #[test]
    fn test_chain_matches_context_name_only() {
        let fx = Fixture::new();
        let chain = FlowRule::builder(RESOURCE)
            .strategy(Strategy::Chain)
            .ref_resource("entry-a")
            .count(1.0)
            .build()
            .unwrap();

        let (ctx, node) = fx.call("entry-a", "app-a");
        let selected = fx.checker.select_node(&chain, &ctx, &node).unwrap();
        assert!(Arc::ptr_eq(&selected, node.stats()));

        assert!(fx.select(&chain, "entry-b", "app-a").is_none());
    }

    #[test]
    fn test_reference_strategies_without_ref_resource_select_nothing() {
        let fx = Fixture::new();
        fx.nodes.get_or_create_cluster_node("");
        for strategy in [Strategy::Relate, Strategy::Chain] {
            let rule = FlowRule::builder(RESOURCE)
                .strategy(strategy)
                .count(0.0)
                .build()
                .unwrap();
            assert!(fx.select(&rule, "", "app-a").is_none());
        }
    }

    #[test]
    fn test_exact_origin_with_chain_strategy() {
        let fx = Fixture::new();
        let chain = FlowRule::builder(RESOURCE)
            .limit_app("app-a")
            .strategy(Strategy::Chain)
            .ref_resource("entry-a")
            .count(1.0)
            .build()
            .unwrap();

        let (ctx, node) = fx.call("entry-a", "app-a");
        let selected = fx.checker.select_node(&chain, &ctx, &node).unwrap();
        assert!(Arc::ptr_eq(&selected, node.stats()));
    }

    #[test]
    fn test_local_check_routes_to_shaper() {
        let fx = Fixture::new();
        let rule = FlowRule::builder(RESOURCE)
            .grade(Grade::Qps)
            .count(2.0)
            .build()
            .unwrap();

        let (ctx, node) = fx.call("ctx", "app-a");
        assert!(fx.checker.pass_local_check(&rule, &ctx, &node, 2, false));

        node.add_pass(2);
        assert!(!fx.checker.pass_local_check(&rule, &ctx, &node, 1, false));
    }

    #[test]
    fn test_check_flow_without_rules_passes() {
        let fx = Fixture::new();
        let (ctx, node) = fx.call("ctx", "app-a");

        assert!(fx.checker.check_flow(None, RESOURCE, &ctx, &node, 1, false).is_pass());
        let provider: &dyn RuleProvider = &*fx.rules;
        assert!(fx
            .checker
            .check_flow(Some(provider), RESOURCE, &ctx, &node, 1, false)
            .is_pass());
    }

    #[test]
    fn test_check_flow_stops_at_first_denial() {
        let fx = Fixture::new();
        let first = RecordingShaper::new(false);
        let second = RecordingShaper::new(true);
        fx.rules.load_rules(vec![
            FlowRule::builder(RESOURCE)
                .limit_app("app-a")
                .shaper(first.clone())
                .build()
                .unwrap(),
            FlowRule::builder(RESOURCE).shaper(second.clone()).build().unwrap(),
        ]);

        let (ctx, node) = fx.call("ctx", "app-a");
        let provider: &dyn RuleProvider = &*fx.rules;
        let verdict = fx.checker.check_flow(Some(provider), RESOURCE, &ctx, &node, 1, false);

        match verdict {
            Verdict::Blocked { limit_app, rule } => {
                assert_eq!(limit_app, "app-a");
                assert_eq!(rule.limit_app(), Some(&LimitApp::origin("app-a")));
            }
            Verdict::Pass => panic!("expected the first rule to deny"),
        }
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
    }

    #[test]
    fn test_check_flow_evaluates_all_rules_when_passing() {
        let fx = Fixture::new();
        let first = RecordingShaper::new(true);
        let second = RecordingShaper::new(true);
        fx.rules.load_rules(vec![
            FlowRule::builder(RESOURCE).shaper(first.clone()).build().unwrap(),
            FlowRule::builder(RESOURCE).shaper(second.clone()).build().unwrap(),
        ]);

        let (ctx, node) = fx.call("ctx", "app-a");
        let provider: &dyn RuleProvider = &*fx.rules;
        assert!(fx
            .checker
            .check_flow(Some(provider), RESOURCE, &ctx, &node, 1, false)
            .is_pass());
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[test]
    fn test_cluster_ok_admits_without_local_check() {
        let fx = Fixture::new();
        let service = ScriptedTokenService::new(|| Ok(TokenResult::ok(5)));
        fx.cluster.set_to_client(service.clone());
        let shaper = RecordingShaper::new(false);

        let (ctx, node) = fx.call("ctx", "app-a");
        assert!(fx
            .checker
            .can_pass_check(&cluster_rule(true, shaper.clone()), &ctx, &node, 1, false));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert_eq!(shaper.calls(), 0);
    }

    #[test]
    fn test_cluster_should_wait_sleeps_then_admits() {
        let fx = Fixture::new();
        fx.cluster
            .set_to_client(ScriptedTokenService::new(|| Ok(TokenResult::should_wait(50))));
        let shaper = RecordingShaper::new(false);

        let (ctx, node) = fx.call("ctx", "app-a");
        let start = Instant::now();
        assert!(fx
            .checker
            .can_pass_check(&cluster_rule(true, shaper.clone()), &ctx, &node, 1, false));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(shaper.calls(), 0);
    }

    #[test]
    fn test_cluster_blocked_denies_without_fallback() {
        let fx = Fixture::new();
        fx.cluster
            .set_to_client(ScriptedTokenService::new(|| Ok(TokenResult::blocked())));
        let shaper = RecordingShaper::new(true);

        let (ctx, node) = fx.call("ctx", "app-a");
        assert!(!fx
            .checker
            .can_pass_check(&cluster_rule(true, shaper.clone()), &ctx, &node, 1, false));
        assert_eq!(shaper.calls(), 0);
    }

    #[test]
    fn test_cluster_inconclusive_statuses_fall_back() {
        let responses: [fn() -> Result<TokenResult, TokenError>; 4] = [
            || Ok(TokenResult::new(TokenStatus::NoRuleExists)),
            || Ok(TokenResult::new(TokenStatus::BadRequest)),
            || Ok(TokenResult::new(TokenStatus::Fail)),
            || Ok(TokenResult::new(TokenStatus::TooManyRequest)),
        ];

        for response in responses {
            let fx = Fixture::new();
            fx.cluster.set_to_client(ScriptedTokenService::new(response));
            let (ctx, node) = fx.call("ctx", "app-a");

            let denying = RecordingShaper::new(false);
            assert!(!fx
                .checker
                .can_pass_check(&cluster_rule(true, denying.clone()), &ctx, &node, 1, false));
            assert_eq!(denying.calls(), 1);

            let unused = RecordingShaper::new(false);
            assert!(fx
                .checker
                .can_pass_check(&cluster_rule(false, unused.clone()), &ctx, &node, 1, false));
            assert_eq!(unused.calls(), 0);
        }
    }

    #[test]
    fn test_cluster_transport_fault_with_fallback_matches_local() {
        let fx = Fixture::new();
        fx.cluster.set_to_client(ScriptedTokenService::new(|| {
            Err(TokenError::Transport("connection reset".into()))
        }));
        let (ctx, node) = fx.call("ctx", "app-a");

        for answer in [true, false] {
            let rule = cluster_rule(true, RecordingShaper::new(answer));
            let local = fx.checker.pass_local_check(&rule, &ctx, &node, 1, false);
            let clustered = fx.checker.can_pass_check(&rule, &ctx, &node, 1, false);
            assert_eq!(clustered, local);
            assert_eq!(clustered, answer);
        }
    }

    #[test]
    fn test_cluster_transport_fault_without_fallback_admits() {
        let fx = Fixture::new();
        fx.cluster
            .set_to_client(ScriptedTokenService::new(|| Err(TokenError::NotConnected)));
        let shaper = RecordingShaper::new(false);

        let (ctx, node) = fx.call("ctx", "app-a");
        assert!(fx
            .checker
            .can_pass_check(&cluster_rule(false, shaper.clone()), &ctx, &node, 1, false));
        assert_eq!(shaper.calls(), 0);
    }

    #[test]
    fn test_no_cluster_role_falls_back() {
        let fx = Fixture::new();
        let shaper = RecordingShaper::new(false);

        let (ctx, node) = fx.call("ctx", "app-a");
        assert!(!fx
            .checker
            .can_pass_check(&cluster_rule(true, shaper.clone()), &ctx, &node, 1, false));
        assert_eq!(shaper.calls(), 1);
    }

    #[test]
    fn test_client_role_without_registered_client_falls_back() {
        let fx = Fixture::new();
        fx.cluster.set_mode(crate::cluster::ClusterMode::Client);
        fx.cluster
            .register_embedded_server(ScriptedTokenService::new(|| Ok(TokenResult::blocked())));
        let shaper = RecordingShaper::new(true);

        let (ctx, node) = fx.call("ctx", "app-a");
        assert!(fx
            .checker
            .can_pass_check(&cluster_rule(true, shaper.clone()), &ctx, &node, 1, false));
        assert_eq!(shaper.calls(), 1);
    }

    #[test]
    fn test_server_role_uses_embedded_server() {
        let fx = Fixture::new();
        let server = ScriptedTokenService::new(|| Ok(TokenResult::blocked()));
        fx.cluster.register_client(ScriptedTokenService::new(|| Ok(TokenResult::ok(1))));
        fx.cluster.set_to_server(server.clone());

        let (ctx, node) = fx.call("ctx", "app-a");
        assert!(!fx
            .checker
            .can_pass_check(&cluster_rule(true, RecordingShaper::new(true)), &ctx, &node, 1, false));
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
    }
}
