//! Tollgate - flow-control rule evaluation
//!
//! This crate decides, for every call against a protected resource, whether
//! the call may proceed. Rules are checked against local per-resource,
//! per-origin and per-context statistics, or against a cluster token service
//! for rules enforced across several instances, with a local fallback when
//! the cluster path is unavailable.

pub mod cluster;
pub mod config;
pub mod entry;
pub mod error;
pub mod flow;
pub mod node;

pub use entry::{Entry, FlowGuard};
pub use error::{BlockError, Result, TollgateError};
