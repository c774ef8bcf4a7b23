//! Statistic nodes and calling context.

mod context;
mod counter;
mod registry;
mod statistic;

pub use context::CallContext;
pub use counter::{WindowCounter, DEFAULT_WINDOW};
pub use registry::{ClusterNodeLookup, NodeRegistry};
pub use statistic::{ClusterNode, ContextNode, StatisticNode};
