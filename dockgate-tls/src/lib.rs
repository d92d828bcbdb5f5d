//! Dockgate TLS Module
//!
//! Certificate lifecycle management for the SNI frontend:
//! - ACME protocol client (Let's Encrypt)
//! - Persistent certificate/account cache
//! - Pending HTTP-01 challenge registry
//! - In-memory certificate store with SNI resolution
//! - Grouping of related domains onto multi-SAN certificates

pub mod acme;
pub mod cache;
pub mod cert_store;
pub mod challenge;
pub mod grouping;

pub use acme::{directory, AcmeClient, AcmeError};
pub use cache::{multi_domain_hash, CacheError, CachedCertificate, CertCache};
pub use cert_store::{CertBundle, CertStore, CertStoreError};
pub use challenge::{Challenge, ChallengeRegistry};
pub use grouping::group_by_second_level;
