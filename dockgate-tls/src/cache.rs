//! Persistent certificate cache
//!
//! 💾 One file holds the ACME account credentials and every issued
//! certificate, keyed by a hash over the domain set it covers. The account
//! credentials are written once and reused for the lifetime of the file;
//! a corrupt cache is refused rather than silently clobbered.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// On-disk format version this build reads and writes
const CACHE_VERSION: u32 = 1;

/// Cache filename below the user configuration directory
const CACHE_FILE: &str = "dockerproxy.lecache";

/// Environment override for the cache location (used by the test harness)
pub const CACHE_PATH_ENV: &str = "DOCKGATE_LECACHE";

/// A certificate is re-issued once its remaining lifetime drops below this
const RENEWAL_WINDOW_SECS: i64 = 30 * 24 * 60 * 60;

// MARK: - Errors

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("💥 IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("⚠️ Corrupt cache: {0}")]
    Corrupt(String),

    #[error("⚠️ Unsupported cache version {0} (expected {CACHE_VERSION})")]
    UnsupportedVersion(u32),
}

// MARK: - Data Structures

/// A cached certificate bundle: full chain plus its private key, both PEM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

impl CachedCertificate {
    /// A cached entry is fresh iff its leaf expires more than the renewal
    /// window from now. An unparsable leaf counts as stale.
    pub fn is_fresh(&self) -> bool {
        let Some(not_after) = leaf_not_after(&self.cert_pem) else {
            return false;
        };
        not_after - unix_now() > RENEWAL_WINDOW_SECS
    }
}

/// Serialized cache record
#[derive(Serialize, Deserialize)]
struct CacheRecord {
    version: u32,
    /// ACME account credentials, kept opaque so the record round-trips
    /// independently of the ACME client types
    account: Option<serde_json::Value>,
    certificates: HashMap<String, CachedCertificate>,
}

impl Default for CacheRecord {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            account: None,
            certificates: HashMap::new(),
        }
    }
}

// MARK: - Cache

/// The persistent certificate/account cache.
pub struct CertCache {
    path: PathBuf,
    record: CacheRecord,
}

impl CertCache {
    /// Resolve the cache location: the `DOCKGATE_LECACHE` environment
    /// variable if set, otherwise `dockerproxy.lecache` in the user
    /// configuration directory.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CACHE_PATH_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CACHE_FILE)
    }

    /// Load the cache from disk. A missing file yields an empty cache; a
    /// file that cannot be parsed or carries an unknown version is an
    /// error so an existing account key is never overwritten.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();

        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    path,
                    record: CacheRecord::default(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let record: CacheRecord = serde_json::from_slice(&content)
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;

        if record.version != CACHE_VERSION {
            return Err(CacheError::UnsupportedVersion(record.version));
        }

        Ok(Self { path, record })
    }

    /// Persist the cache as a whole-file rewrite through a temporary file,
    /// so a successful save atomically replaces the previous contents.
    pub fn save(&self) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
                }
            }
        }

        let json = serde_json::to_string_pretty(&self.record)
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp)?;
            file.write_all(json.as_bytes())?;
        }
        #[cfg(not(unix))]
        {
            std::fs::write(&tmp, &json)?;
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Stored ACME account credentials, if any.
    pub fn account(&self) -> Option<&serde_json::Value> {
        self.record.account.as_ref()
    }

    /// Record the account credentials. Set exactly once per cache file.
    pub fn set_account(&mut self, credentials: serde_json::Value) {
        self.record.account = Some(credentials);
    }

    /// Look up a cached certificate by domain-set hash.
    pub fn certificate(&self, hash: &str) -> Option<&CachedCertificate> {
        self.record.certificates.get(hash)
    }

    /// Store a certificate under the given domain-set hash.
    pub fn insert_certificate(&mut self, hash: impl Into<String>, cert: CachedCertificate) {
        self.record.certificates.insert(hash.into(), cert);
    }
}

// MARK: - Helpers

/// Deterministic hash over a domain set: `sha1(sorted(domains).join("::"))`,
/// invariant under permutation of the input.
pub fn multi_domain_hash(domains: &[String]) -> String {
    let mut sorted = domains.to_vec();
    sorted.sort();

    let mut hasher = Sha1::new();
    hasher.update(sorted.join("::").as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `notAfter` of the first certificate in a PEM bundle as a Unix timestamp.
fn leaf_not_after(cert_pem: &str) -> Option<i64> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes()).ok()?;
    let cert = pem.parse_x509().ok()?;
    Some(cert.validity().not_after.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed(domain: &str, expiry_year: i32) -> CachedCertificate {
        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        params.not_after = rcgen::date_time_ymd(expiry_year, 1, 1);
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let cert = params.self_signed(&key).unwrap();
        CachedCertificate {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }

    #[test]
    fn test_hash_invariant_under_permutation() {
        let a = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        let b = vec!["b.example.com".to_string(), "a.example.com".to_string()];
        assert_eq!(multi_domain_hash(&a), multi_domain_hash(&b));
    }

    #[test]
    fn test_hash_stable() {
        // sha1("a.example.com::b.example.com")
        let domains = vec!["b.example.com".to_string(), "a.example.com".to_string()];
        assert_eq!(
            multi_domain_hash(&domains),
            "cb7b92d1cece2583cf858a60dcaad11190704889"
        );
    }

    #[test]
    fn test_hash_differs_per_set() {
        let a = vec!["a.example.com".to_string()];
        let b = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        assert_ne!(multi_domain_hash(&a), multi_domain_hash(&b));
    }

    #[test]
    fn test_fresh_and_stale_certificates() {
        let fresh = self_signed("a.example.com", 2099);
        assert!(fresh.is_fresh());

        // Already expired counts as stale, same as nearly-expired.
        let expired = self_signed("a.example.com", 2020);
        assert!(!expired.is_fresh());
    }

    #[test]
    fn test_unparsable_leaf_is_stale() {
        let cert = CachedCertificate {
            cert_pem: "not a pem".to_string(),
            key_pem: String::new(),
        };
        assert!(!cert.is_fresh());
    }

    #[test]
    fn test_roundtrip_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockerproxy.lecache");

        let mut cache = CertCache::load(&path).unwrap();
        assert!(cache.account().is_none());

        cache.set_account(serde_json::json!({"id": "acct-1"}));
        cache.insert_certificate(
            "deadbeef",
            CachedCertificate {
                cert_pem: "CERT".to_string(),
                key_pem: "KEY".to_string(),
            },
        );
        cache.save().unwrap();

        let reloaded = CertCache::load(&path).unwrap();
        assert_eq!(reloaded.account().unwrap()["id"], "acct-1");
        assert_eq!(reloaded.certificate("deadbeef").unwrap().cert_pem, "CERT");
    }

    #[test]
    fn test_corrupt_cache_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockerproxy.lecache");
        std::fs::write(&path, b"\x00\x01 not json").unwrap();

        assert!(matches!(
            CertCache::load(&path),
            Err(CacheError::Corrupt(_))
        ));
    }

    #[test]
    fn test_unknown_version_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockerproxy.lecache");
        std::fs::write(
            &path,
            serde_json::json!({"version": 99, "account": null, "certificates": {}}).to_string(),
        )
        .unwrap();

        assert!(matches!(
            CertCache::load(&path),
            Err(CacheError::UnsupportedVersion(99))
        ));
    }
}
