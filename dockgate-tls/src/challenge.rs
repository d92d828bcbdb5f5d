//! Pending HTTP-01 challenge registry
//!
//! Shared between the ACME client (writer) and the plaintext frontend
//! (reader): while an authorization is pending, the frontend answers the
//! challenge path for the domain with the registered response body.

use parking_lot::RwLock;
use std::collections::HashMap;

/// A pending challenge: the well-known path and the body to answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub path: String,
    pub response: String,
}

/// Concurrent map of pending domain → challenge.
///
/// Entries are overwritten when a new authorization starts for the same
/// domain and kept until process exit; they are only consulted during the
/// short challenge window.
#[derive(Default)]
pub struct ChallengeRegistry {
    inner: RwLock<HashMap<String, Challenge>>,
}

impl ChallengeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the challenge for a domain, replacing any previous entry.
    pub fn publish(&self, domain: impl Into<String>, challenge: Challenge) {
        self.inner.write().insert(domain.into(), challenge);
    }

    /// Most recent challenge registered for a domain.
    pub fn lookup(&self, domain: &str) -> Option<Challenge> {
        self.inner.read().get(domain).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_lookup() {
        let registry = ChallengeRegistry::new();
        assert_eq!(registry.lookup("a.example.com"), None);

        registry.publish(
            "a.example.com",
            Challenge {
                path: "/.well-known/acme-challenge/XYZ".to_string(),
                response: "PAYLOAD".to_string(),
            },
        );

        let challenge = registry.lookup("a.example.com").unwrap();
        assert_eq!(challenge.path, "/.well-known/acme-challenge/XYZ");
        assert_eq!(challenge.response, "PAYLOAD");
    }

    #[test]
    fn test_publish_overwrites() {
        let registry = ChallengeRegistry::new();
        registry.publish(
            "a.example.com",
            Challenge {
                path: "/.well-known/acme-challenge/OLD".to_string(),
                response: "OLD".to_string(),
            },
        );
        registry.publish(
            "a.example.com",
            Challenge {
                path: "/.well-known/acme-challenge/NEW".to_string(),
                response: "NEW".to_string(),
            },
        );

        assert_eq!(
            registry.lookup("a.example.com").unwrap().response,
            "NEW"
        );
    }
}
