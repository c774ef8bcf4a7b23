//! Cluster flow control: token protocol, cluster role, embedded token server.
//!
//! Cluster-mode rules ask a [`TokenService`] for permission instead of
//! consulting local statistics. Which service is asked depends on the
//! instance's [`ClusterMode`]: a remote client in client mode, the
//! [`EmbeddedTokenServer`] in server mode.

mod server;
mod state;
mod token;

pub use server::EmbeddedTokenServer;
pub use state::{ClusterMode, ClusterStateManager, TokenServiceProvider};
pub use token::{TokenError, TokenResult, TokenService, TokenStatus};
