//! Flow rules and their evaluation.

mod checker;
mod manager;
mod rule;
mod shaper;

pub use checker::{select_node, select_reference_node, FlowRuleChecker, Verdict};
pub use manager::{FlowRuleManager, FlowRulesConfig, OriginClassifier, RuleProvider, RuleSet};
pub use rule::{
    ClusterFlowConfig, FlowRule, FlowRuleBuilder, FlowRuleConfig, Grade, LimitApp, Strategy,
    ThresholdType, LIMIT_APP_DEFAULT, LIMIT_APP_OTHER,
};
pub use shaper::{DefaultShaper, TrafficShaper};
