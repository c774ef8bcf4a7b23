//! Cluster role of this instance and the token services it can reach.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::token::TokenService;

/// Role of this instance in cluster flow control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// No cluster role; cluster rules fall back immediately
    #[default]
    NotStarted = 0,
    /// Tokens come from a remote token server
    Client = 1,
    /// This instance hosts the token server
    Server = 2,
}

impl From<u8> for ClusterMode {
    fn from(value: u8) -> Self {
        match value {
            1 => ClusterMode::Client,
            2 => ClusterMode::Server,
            _ => ClusterMode::NotStarted,
        }
    }
}

/// Role query and token service access used by the flow checker.
pub trait TokenServiceProvider: Send + Sync {
    fn is_client(&self) -> bool;
    fn is_server(&self) -> bool;
    /// The remote token client, if one is registered.
    fn client(&self) -> Option<Arc<dyn TokenService>>;
    /// The embedded token server, if one is registered.
    fn embedded_server(&self) -> Option<Arc<dyn TokenService>>;
}

/// Holds the current cluster mode and the registered token services.
///
/// Populated by the composition root; the checker only reads it.
#[derive(Default)]
pub struct ClusterStateManager {
    mode: AtomicU8,
    client: RwLock<Option<Arc<dyn TokenService>>>,
    server: RwLock<Option<Arc<dyn TokenService>>>,
}

impl ClusterStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ClusterMode {
        ClusterMode::from(self.mode.load(Ordering::Acquire))
    }

    pub fn set_mode(&self, mode: ClusterMode) {
        let previous = ClusterMode::from(self.mode.swap(mode as u8, Ordering::AcqRel));
        if previous != mode {
            info!(from = ?previous, to = ?mode, "Cluster mode changed");
        }
    }

    pub fn register_client(&self, client: Arc<dyn TokenService>) {
        *self.client.write() = Some(client);
    }

    pub fn register_embedded_server(&self, server: Arc<dyn TokenService>) {
        *self.server.write() = Some(server);
    }

    /// Register a client and switch to client mode.
    pub fn set_to_client(&self, client: Arc<dyn TokenService>) {
        self.register_client(client);
        self.set_mode(ClusterMode::Client);
    }

    /// Register an embedded server and switch to server mode.
    pub fn set_to_server(&self, server: Arc<dyn TokenService>) {
        self.register_embedded_server(server);
        self.set_mode(ClusterMode::Server);
    }
}

impl std::fmt::Debug for ClusterStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterStateManager")
            .field("mode", &self.mode())
            .field("client", &self.client.read().is_some())
            .field("server", &self.server.read().is_some())
            .finish()
    }
}

impl TokenServiceProvider for ClusterStateManager {
    fn is_client(&self) -> bool {
        self.mode() == ClusterMode::Client
    }

    fn is_server(&self) -> bool {
        self.mode() == ClusterMode::Server
    }

    fn client(&self) -> Option<Arc<dyn TokenService>> {
        self.client.read().clone()
    }

    fn embedded_server(&self) -> Option<Arc<dyn TokenService>> {
        self.server.read().clone()
    }
}
