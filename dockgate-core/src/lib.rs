//! Dockgate Core Library
//!
//! This crate provides the shared foundation for the Dockgate reverse
//! proxy: the declarative proxy configuration (domains, SSL material,
//! authentication, discovery hosts, listen addresses) and the common
//! error type.

pub mod config;
pub mod error;

pub use config::{AuthenticationConfig, ConfigLoader, DomainConfig, ProxyConfig};
pub use error::{Error, Result};

/// Dockgate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
