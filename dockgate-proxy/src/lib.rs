//! Dockgate Proxy Module
//!
//! The request path of the proxy:
//! - Routing core: host → slug → endpoint resolution with per-domain
//!   policy (force-TLS redirect, authentication gate)
//! - Auth plugin bus with the built-in `basic-auth` handler
//! - The three frontends (plaintext, SNI TLS, metrics) and their
//!   cooperative exit signalling
//! - Prometheus metrics and the per-request access log

// MARK: - Modules

pub mod auth;
pub mod context;
pub mod metrics;
pub mod router;
pub mod server;

// MARK: - Exports

pub use auth::{AuthError, AuthHandler, AuthOutcome, AuthRegistry};
pub use context::AppContext;
pub use router::ProxyBody;
pub use server::{Frontend, ListenerExit};
