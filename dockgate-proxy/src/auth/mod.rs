//! Auth plugin bus
//!
//! Registry of named authentication handlers. A domain names its handler
//! in `authentication.type` and carries an opaque payload each handler
//! re-coerces into its own typed configuration. Handlers signal denial by
//! returning the challenge headers (e.g. `WWW-Authenticate`) the routing
//! core merges into its 401 response.

mod basic;

pub use basic::BasicAuth;

use async_trait::async_trait;
use http::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by an authentication handler itself (not by a bad
/// credential, which is a regular `Denied`).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid handler configuration: {0}")]
    Config(String),

    #[error("authentication handler failed: {0}")]
    Internal(String),
}

/// Outcome of an authentication check.
#[derive(Debug)]
pub enum AuthOutcome {
    /// Request may proceed to the backend
    Granted,
    /// Request is rejected; `headers` carry the handler's challenge
    Denied { headers: HeaderMap },
}

/// Contract for authentication handlers.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// Check a request against the handler's opaque configuration.
    ///
    /// - Parameters:
    ///   - config: the `authentication.config` payload of the domain
    ///   - headers: the request headers
    ///   - host: the request host, for challenge realms
    async fn check(
        &self,
        config: &serde_json::Value,
        headers: &HeaderMap,
        host: &str,
    ) -> Result<AuthOutcome, AuthError>;
}

/// Registry of named authentication handlers.
pub struct AuthRegistry {
    handlers: HashMap<String, Arc<dyn AuthHandler>>,
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry pre-populated with the in-tree handlers.
    pub fn with_builtin_handlers() -> Self {
        let mut registry = Self::new();
        registry.register("basic-auth", Arc::new(BasicAuth));
        registry
    }

    /// Register a handler under a unique name.
    ///
    /// Double registration is a programming error and panics at startup.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn AuthHandler>) {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            panic!("auth handler '{}' already registered", name);
        }
        tracing::debug!("registered auth handler {}", name);
        self.handlers.insert(name, handler);
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn AuthHandler>> {
        self.handlers.get(name).cloned()
    }
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::with_builtin_handlers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_handlers_present() {
        let registry = AuthRegistry::with_builtin_handlers();
        assert!(registry.get("basic-auth").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_double_registration_panics() {
        let mut registry = AuthRegistry::with_builtin_handlers();
        registry.register("basic-auth", Arc::new(BasicAuth));
    }
}
