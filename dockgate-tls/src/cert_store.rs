//! Certificate store and SNI resolution
//!
//! 🔐 In-memory set of certificate bundles indexed by every Subject
//! Alternative Name of the leaf. The store is built once per SNI frontend
//! run and turned into a rustls server configuration; renewal happens by
//! rebuilding the store and restarting the frontend, never by mutation in
//! place.

use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use x509_parser::prelude::*;

// MARK: - Errors

#[derive(Debug, Error)]
pub enum CertStoreError {
    #[error("💥 IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("⚠️ Invalid certificate: {0}")]
    Invalid(String),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

// MARK: - Types

/// A certificate bundle: full PEM chain (leaf first, intermediates
/// following) plus the private key in PEM.
#[derive(Debug, Clone)]
pub struct CertBundle {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Cipher suites offered by the SNI frontend, in server preference order.
///
/// The RSA AES-GCM suites are joined by their ECDSA counterparts since
/// ACME-issued keys are ECDSA.
static CIPHER_SUITES: &[rustls::SupportedCipherSuite] = &[
    rustls::crypto::ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    rustls::crypto::ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    rustls::crypto::ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    rustls::crypto::ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
];

// MARK: - Certificate Store

/// Set of certificates addressable by SNI server name.
#[derive(Default)]
pub struct CertStore {
    by_name: HashMap<String, Arc<CertifiedKey>>,
}

impl CertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of server names the store can answer for.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Add a bundle, indexing it under every DNS SAN of its leaf.
    pub fn add_bundle(&mut self, bundle: &CertBundle) -> Result<(), CertStoreError> {
        let certs: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut BufReader::new(bundle.cert_pem.as_bytes()))
                .collect::<Result<_, _>>()
                .map_err(|e| CertStoreError::Invalid(format!("bad certificate PEM: {}", e)))?;

        let leaf = certs
            .first()
            .ok_or_else(|| CertStoreError::Invalid("bundle contains no certificate".to_string()))?;

        let names = leaf_dns_names(leaf)?;
        if names.is_empty() {
            return Err(CertStoreError::Invalid(
                "leaf certificate carries no DNS names".to_string(),
            ));
        }

        let key = rustls_pemfile::private_key(&mut BufReader::new(bundle.key_pem.as_bytes()))
            .map_err(|e| CertStoreError::Invalid(format!("bad key PEM: {}", e)))?
            .ok_or_else(|| CertStoreError::Invalid("bundle contains no private key".to_string()))?;

        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
            .map_err(|e| CertStoreError::Invalid(format!("unsupported key type: {}", e)))?;

        let certified = Arc::new(CertifiedKey::new(certs, signing_key));

        for name in names {
            tracing::debug!("certificate store answers for {}", name);
            self.by_name.insert(name, certified.clone());
        }

        Ok(())
    }

    /// Load a PEM certificate/key pair from disk and add it.
    pub fn load_pem_pair(
        &mut self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), CertStoreError> {
        let bundle = CertBundle {
            cert_pem: std::fs::read_to_string(cert_path)?,
            key_pem: std::fs::read_to_string(key_path)?,
        };
        self.add_bundle(&bundle)
    }

    /// Exact-match lookup by server name.
    pub fn lookup(&self, name: &str) -> Option<Arc<CertifiedKey>> {
        self.by_name.get(name).cloned()
    }

    /// Turn the store into the rustls server configuration of the SNI
    /// frontend: TLS 1.2 floor, server cipher-suite order, `http/1.1` ALPN
    /// and exact-SAN certificate selection.
    pub fn into_server_config(self) -> Result<rustls::ServerConfig, CertStoreError> {
        let provider = CryptoProvider {
            cipher_suites: CIPHER_SUITES.to_vec(),
            ..rustls::crypto::ring::default_provider()
        };

        let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&[&rustls::version::TLS12])?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(SniResolver {
                by_name: self.by_name,
            }));

        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(config)
    }
}

// MARK: - SNI Resolver

/// Certificate selection by exact SAN match on the SNI server name.
#[derive(Debug)]
struct SniResolver {
    by_name: HashMap<String, Arc<CertifiedKey>>,
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let name = client_hello.server_name()?;
        self.by_name.get(name).cloned()
    }
}

// MARK: - Helpers

/// DNS entries of the leaf's Subject Alternative Name extension.
fn leaf_dns_names(leaf: &CertificateDer<'_>) -> Result<Vec<String>, CertStoreError> {
    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| CertStoreError::Invalid(format!("unparsable leaf: {}", e)))?;

    let mut names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for general_name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = general_name {
                names.push(dns.to_string());
            }
        }
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed(domains: &[&str]) -> CertBundle {
        let params = rcgen::CertificateParams::new(
            domains.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        )
        .unwrap();
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let cert = params.self_signed(&key).unwrap();
        CertBundle {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }

    #[test]
    fn test_bundle_indexed_by_all_sans() {
        let mut store = CertStore::new();
        store
            .add_bundle(&self_signed(&["a.example.com", "b.example.com"]))
            .unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.lookup("a.example.com").is_some());
        assert!(store.lookup("b.example.com").is_some());
        assert!(store.lookup("c.example.com").is_none());
    }

    #[test]
    fn test_exact_match_only() {
        let mut store = CertStore::new();
        store.add_bundle(&self_signed(&["a.example.com"])).unwrap();

        // No wildcard or suffix semantics
        assert!(store.lookup("sub.a.example.com").is_none());
        assert!(store.lookup("example.com").is_none());
    }

    #[test]
    fn test_garbage_bundle_rejected() {
        let mut store = CertStore::new();
        let result = store.add_bundle(&CertBundle {
            cert_pem: "garbage".to_string(),
            key_pem: "garbage".to_string(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_server_config_advertises_http1() {
        let mut store = CertStore::new();
        store.add_bundle(&self_signed(&["a.example.com"])).unwrap();

        let config = store.into_server_config().unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }
}
