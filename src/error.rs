//! Error types for Tollgate.

use std::sync::Arc;

use thiserror::Error;

use crate::flow::FlowRule;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A flow rule failed validation
    #[error("Invalid flow rule: {0}")]
    InvalidRule(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for TollgateError {
    fn from(err: ::config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Signal returned to the caller of a protected resource when a rule denies it.
#[derive(Error, Debug, Clone)]
pub enum BlockError {
    /// A flow rule rejected the call.
    #[error("Flow blocked on resource `{resource}` (limit app: {limit_app})")]
    Flow {
        /// The protected resource
        resource: String,
        /// Origin filter of the denying rule
        limit_app: String,
        /// The denying rule itself
        rule: Arc<FlowRule>,
    },
}

impl BlockError {
    /// The rule that produced the denial.
    pub fn rule(&self) -> &Arc<FlowRule> {
        match self {
            BlockError::Flow { rule, .. } => rule,
        }
    }

    /// The origin filter value of the denying rule.
    pub fn limit_app(&self) -> &str {
        match self {
            BlockError::Flow { limit_app, .. } => limit_app,
        }
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
