//! Token request protocol between a flow checker and a token service.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome category of a token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// Tokens granted
    Ok,
    /// Tokens granted after the caller waits `wait_ms`
    ShouldWait,
    /// Tokens denied
    Blocked,
    /// The service has no rule for the requested flow id
    NoRuleExists,
    /// The request was malformed
    BadRequest,
    /// The service failed internally
    Fail,
    /// The service is over its own request budget
    TooManyRequest,
}

impl TokenStatus {
    /// Statuses after which the caller should fall back to local checking.
    pub fn is_inconclusive(&self) -> bool {
        matches!(
            self,
            TokenStatus::NoRuleExists
                | TokenStatus::BadRequest
                | TokenStatus::Fail
                | TokenStatus::TooManyRequest
        )
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenStatus::Ok => "ok",
            TokenStatus::ShouldWait => "should_wait",
            TokenStatus::Blocked => "blocked",
            TokenStatus::NoRuleExists => "no_rule_exists",
            TokenStatus::BadRequest => "bad_request",
            TokenStatus::Fail => "fail",
            TokenStatus::TooManyRequest => "too_many_request",
        };
        f.write_str(name)
    }
}

/// Response to a token request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResult {
    pub status: TokenStatus,
    /// Milliseconds to wait; only meaningful for [`TokenStatus::ShouldWait`]
    #[serde(default)]
    pub wait_ms: u64,
    /// Tokens left in the current window, when the service reports it
    #[serde(default)]
    pub remaining: u64,
}

impl TokenResult {
    pub fn new(status: TokenStatus) -> Self {
        Self {
            status,
            wait_ms: 0,
            remaining: 0,
        }
    }

    pub fn ok(remaining: u64) -> Self {
        Self::new(TokenStatus::Ok).with_remaining(remaining)
    }

    pub fn should_wait(wait_ms: u64) -> Self {
        Self {
            wait_ms,
            ..Self::new(TokenStatus::ShouldWait)
        }
    }

    pub fn blocked() -> Self {
        Self::new(TokenStatus::Blocked)
    }

    pub fn with_remaining(mut self, remaining: u64) -> Self {
        self.remaining = remaining;
        self
    }

    /// The wait as a duration.
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

/// Transport-level failure of a token request.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token service transport error: {0}")]
    Transport(String),
    #[error("Token request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Token service not connected")]
    NotConnected,
}

/// A service that grants or denies tokens for cluster-mode rules.
///
/// Implementations are called from many caller threads at once and must not
/// require external coordination.
pub trait TokenService: Send + Sync {
    fn request_token(
        &self,
        flow_id: u64,
        count: u32,
        prioritized: bool,
    ) -> Result<TokenResult, TokenError>;
}
