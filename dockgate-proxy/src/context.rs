//! Shared application context
//!
//! One `AppContext` is threaded through every frontend and request
//! handler. The configuration and the endpoint pool are immutable
//! snapshots behind a pointer swap: the reload job publishes a complete
//! replacement and in-flight requests keep the snapshot they started with.

use crate::auth::AuthRegistry;
use dockgate_core::ProxyConfig;
use dockgate_discovery::EndpointPool;
use dockgate_tls::ChallengeRegistry;
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use parking_lot::RwLock;
use std::sync::Arc;

/// Process-wide state shared by the frontends, the routing core, the ACME
/// client and the scheduler.
pub struct AppContext {
    /// Live configuration snapshot
    config: RwLock<Arc<ProxyConfig>>,

    /// Live endpoint pool snapshot
    endpoints: RwLock<Arc<EndpointPool>>,

    /// Pending ACME challenges, answered by the plaintext frontend
    pub challenges: Arc<ChallengeRegistry>,

    /// Registered authentication handlers
    pub auth: AuthRegistry,

    /// Shared client for upstream dispatch (backends are cleartext HTTP)
    pub(crate) upstream_client: Client<HttpConnector, Incoming>,
}

impl AppContext {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            endpoints: RwLock::new(Arc::new(EndpointPool::new())),
            challenges: Arc::new(ChallengeRegistry::new()),
            auth: AuthRegistry::with_builtin_handlers(),
            upstream_client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<ProxyConfig> {
        self.config.read().clone()
    }

    /// Atomically publish a new configuration snapshot.
    pub fn publish_config(&self, config: ProxyConfig) {
        *self.config.write() = Arc::new(config);
    }

    /// Current endpoint pool snapshot.
    pub fn endpoints(&self) -> Arc<EndpointPool> {
        self.endpoints.read().clone()
    }

    /// Atomically publish a freshly collected endpoint pool.
    pub fn publish_endpoints(&self, pool: EndpointPool) {
        *self.endpoints.write() = Arc::new(pool);
    }
}
