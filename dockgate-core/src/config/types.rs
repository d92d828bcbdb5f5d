//! Configuration type definitions
//!
//! These types represent the runtime configuration for Dockgate. The file
//! on disk may be written in YAML or JSON; both deserialize into the same
//! structures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for Dockgate
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxyConfig {
    /// Per-hostname routing policy (exact match on the request host)
    #[serde(default)]
    pub domains: HashMap<String, DomainConfig>,

    /// Suffix used to derive a slug from otherwise-unknown hostnames.
    /// A request to `foo.apps.example.com` with generic `.apps.example.com`
    /// yields the slug `foo`.
    #[serde(default)]
    pub generic: String,

    /// Docker discovery settings
    #[serde(default)]
    pub docker: DockerConfig,

    /// Bind address of the plaintext HTTP frontend
    #[serde(default, rename = "listenHTTP")]
    pub listen_http: String,

    /// Bind address of the SNI TLS frontend
    #[serde(default, rename = "listenHTTPS")]
    pub listen_https: String,

    /// Bind address of the Prometheus metrics listener
    #[serde(default = "default_listen_metrics", rename = "listenMetrics")]
    pub listen_metrics: String,
}

fn default_listen_metrics() -> String {
    "127.0.0.1:9000".to_string()
}

impl ProxyConfig {
    /// All domains that participate in ACME issuance, in deterministic order.
    pub fn letsencrypt_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self
            .domains
            .iter()
            .filter(|(_, cfg)| cfg.letsencrypt)
            .map(|(name, _)| name.clone())
            .collect();
        domains.sort();
        domains
    }
}

/// Per-hostname declarative policy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DomainConfig {
    /// Key into the endpoint pool map
    #[serde(default)]
    pub slug: String,

    /// Redirect plaintext requests to HTTPS with a 301
    #[serde(default)]
    pub force_ssl: bool,

    /// Pre-provisioned certificate material
    #[serde(default)]
    pub ssl: SslConfig,

    /// Domain participates in ACME issuance
    #[serde(default)]
    pub letsencrypt: bool,

    /// Optional authentication gate for this host
    #[serde(default)]
    pub authentication: Option<AuthenticationConfig>,
}

/// Paths to a pre-provisioned PEM certificate/key pair
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SslConfig {
    #[serde(default)]
    pub cert: String,

    #[serde(default)]
    pub key: String,
}

/// Authentication settings for a domain.
///
/// The `config` payload is opaque at this layer; the named auth handler
/// re-coerces it into its own typed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    /// Name of the registered auth handler (e.g. `basic-auth`)
    #[serde(rename = "type")]
    pub kind: String,

    /// Handler-specific configuration, structure-preserving
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Docker discovery settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DockerConfig {
    /// Mapping of internal daemon address to the public address backends
    /// are reached on
    #[serde(default)]
    pub hosts: HashMap<String, String>,

    /// Docker daemon port
    #[serde(default)]
    pub port: u16,
}
