//! Proxy configuration
//!
//! Declarative routing policy: hostname to slug mappings, per-domain TLS
//! and authentication settings, Docker discovery hosts and the listen
//! addresses of the three frontends.

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{
    AuthenticationConfig, DockerConfig, DomainConfig, ProxyConfig, SslConfig,
};
