//! Pass tests applied to a selected statistic node.

use std::fmt::Debug;

use super::rule::Grade;
use crate::node::StatisticNode;

/// Decides whether `acquire` more permits fit on a statistic node.
///
/// Implementations must be thread-safe: one shaper is shared by every call
/// evaluated against its rule.
pub trait TrafficShaper: Send + Sync + Debug {
    fn can_pass(&self, node: &StatisticNode, acquire: u32, prioritized: bool) -> bool;
}

/// Rejects once the node's current QPS or concurrency plus the request
/// exceeds the threshold.
///
/// `prioritized` is accepted but not acted on; this shaper never borrows
/// from future windows.
#[derive(Debug, Clone, Copy)]
pub struct DefaultShaper {
    grade: Grade,
    count: f64,
}

impl DefaultShaper {
    pub fn new(grade: Grade, count: f64) -> Self {
        Self { grade, count }
    }

    fn current(&self, node: &StatisticNode) -> u64 {
        match self.grade {
            Grade::Qps => node.pass_qps(),
            Grade::Thread => node.cur_thread_num(),
        }
    }
}

impl TrafficShaper for DefaultShaper {
    fn can_pass(&self, node: &StatisticNode, acquire: u32, _prioritized: bool) -> bool {
        self.current(node) as f64 + f64::from(acquire) <= self.count
    }
}
