//! ACME Protocol Client
//!
//! 🔐 Obtains and renews multi-SAN certificates from an ACME directory
//! using HTTP-01 challenges. The challenge responses are published into the
//! shared [`ChallengeRegistry`] and answered by the plaintext frontend; the
//! account credentials and every issued certificate are persisted in the
//! [`CertCache`] so the account is registered exactly once and fresh
//! certificates are returned without network I/O.

use crate::cache::{multi_domain_hash, CacheError, CachedCertificate, CertCache};
use crate::cert_store::CertBundle;
use crate::challenge::{Challenge, ChallengeRegistry};
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, OrderStatus,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

// MARK: - Constants

/// ACME directory URLs for Let's Encrypt.
pub mod directory {
    /// 🏭 Let's Encrypt Production - Trusted certificates.
    pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

    /// 🧪 Let's Encrypt Staging - Testing only (untrusted root).
    pub const LETS_ENCRYPT_STAGING: &str =
        "https://acme-staging-v02.api.letsencrypt.org/directory";
}

/// Delay between polls of a pending authorization or order
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls before a pending authorization or order is abandoned
const POLL_ATTEMPTS: u32 = 30;

// MARK: - Errors

/// Errors that can occur during ACME operations.
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("🔴 ACME directory rejected the request: {0}")]
    Protocol(#[from] instant_acme::Error),

    #[error("⚠️ HTTP-01 validation did not succeed: {0}")]
    ChallengeFailed(String),

    #[error("❌ Order never became issuable: {0}")]
    OrderFailed(String),

    #[error("🔧 Could not produce certificate material: {0}")]
    CertGeneration(String),

    #[error("👤 Trouble with the ACME account: {0}")]
    Account(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("refusing to fetch a certificate for an empty domain set")]
    EmptyDomainSet,
}

// MARK: - ACME Client

/// The high-level client for ACME operations.
pub struct AcmeClient {
    /// ACME directory endpoint
    directory_url: String,

    /// Persistent account/certificate cache; single writer at a time
    cache: Mutex<CertCache>,
}

impl AcmeClient {
    /// Creates a client against the given directory, backed by the cache.
    pub fn new(directory_url: impl Into<String>, cache: CertCache) -> Self {
        Self {
            directory_url: directory_url.into(),
            cache: Mutex::new(cache),
        }
    }

    /// ACME directory endpoint this client talks to.
    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// Obtains one multi-SAN certificate covering `domains`.
    ///
    /// **Logic Flow:**
    /// 1. Cache lookup by domain-set hash; a fresh entry is returned
    ///    without network I/O (an expired one counts as stale).
    /// 2. Ensure the account exists, registering and persisting it once.
    /// 3. Solve one HTTP-01 challenge per domain in the given order.
    /// 4. Issue against a CSR whose CN is `domains[0]` and whose SAN set
    ///    is the full domain list, with a fresh certificate key.
    /// 5. Persist the result under the domain-set hash and return it.
    pub async fn fetch_multi_domain(
        &self,
        domains: &[String],
        challenges: &ChallengeRegistry,
    ) -> Result<CertBundle, AcmeError> {
        if domains.is_empty() {
            return Err(AcmeError::EmptyDomainSet);
        }

        let hash = multi_domain_hash(domains);
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.certificate(&hash) {
            if cached.is_fresh() {
                tracing::debug!("✅ Cache Hit: valid certificate for {:?}", domains);
                return Ok(CertBundle {
                    cert_pem: cached.cert_pem.clone(),
                    key_pem: cached.key_pem.clone(),
                });
            }
            tracing::info!("⏰ Certificate for {:?} is stale, re-issuing", domains);
        }

        let account = self.ensure_account(&mut cache).await?;
        let bundle = self.issue(&account, domains, challenges).await?;

        cache.insert_certificate(
            hash,
            CachedCertificate {
                cert_pem: bundle.cert_pem.clone(),
                key_pem: bundle.key_pem.clone(),
            },
        );
        cache.save()?;

        tracing::info!("🎉 Certificate acquired for {:?}", domains);
        Ok(bundle)
    }

    /// Restore the account from cached credentials, or register a new one
    /// and persist its credentials. The credentials are never regenerated
    /// while a valid record is on disk.
    async fn ensure_account(&self, cache: &mut CertCache) -> Result<Account, AcmeError> {
        if let Some(stored) = cache.account() {
            let credentials: AccountCredentials = serde_json::from_value(stored.clone())
                .map_err(|e| AcmeError::Account(format!("stored credentials unusable: {}", e)))?;
            return Ok(Account::from_credentials(credentials).await?);
        }

        tracing::info!("👤 Registering new ACME account at {}", self.directory_url);

        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await?;

        let serialized = serde_json::to_value(&credentials)
            .map_err(|e| AcmeError::Account(format!("credentials not serializable: {}", e)))?;
        cache.set_account(serialized);
        cache.save()?;

        Ok(account)
    }

    /// Run the issuance workflow: authorize every domain over HTTP-01,
    /// then finalize a CSR and download the chain.
    async fn issue(
        &self,
        account: &Account,
        domains: &[String],
        challenges: &ChallengeRegistry,
    ) -> Result<CertBundle, AcmeError> {
        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|d| Identifier::Dns(d.clone()))
            .collect();

        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderFailed(format!("failed to create order: {}", e)))?;

        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::OrderFailed(format!("failed to fetch authorizations: {}", e)))?;

        for authz in authorizations {
            if authz.status == AuthorizationStatus::Valid {
                continue;
            }

            let domain = match &authz.identifier {
                Identifier::Dns(domain) => domain.clone(),
            };
            tracing::info!("🧩 Solving HTTP-01 challenge for {}", domain);

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Http01)
                .ok_or_else(|| {
                    AcmeError::ChallengeFailed(format!(
                        "no HTTP-01 challenge offered for {}",
                        domain
                    ))
                })?;

            let key_authorization = order.key_authorization(challenge);
            challenges.publish(
                domain.clone(),
                Challenge {
                    path: http01_challenge_path(&challenge.token),
                    response: key_authorization.as_str().to_string(),
                },
            );

            order
                .set_challenge_ready(&challenge.url)
                .await
                .map_err(|e| AcmeError::ChallengeFailed(format!("failed to set ready: {}", e)))?;

            self.await_authorization(&mut order, &domain).await?;
        }

        self.await_order_ready(&mut order).await?;

        // Fresh certificate key, distinct from the account key
        let mut params = rcgen::CertificateParams::new(domains.to_vec())
            .map_err(|e| AcmeError::CertGeneration(e.to_string()))?;
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, domains[0].clone());

        let cert_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| AcmeError::CertGeneration(e.to_string()))?;
        let csr = params
            .serialize_request(&cert_key)
            .map_err(|e| AcmeError::CertGeneration(e.to_string()))?;

        order.finalize(csr.der()).await?;

        let cert_pem = self.await_certificate(&mut order).await?;

        Ok(CertBundle {
            cert_pem,
            key_pem: cert_key.serialize_pem(),
        })
    }

    /// Block until the authorization for `domain` resolves; an error or a
    /// timeout aborts the whole fetch.
    async fn await_authorization(
        &self,
        order: &mut instant_acme::Order,
        domain: &str,
    ) -> Result<(), AcmeError> {
        for _ in 0..POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;

            order.refresh().await?;
            let authorizations = order.authorizations().await?;
            let status = authorizations
                .iter()
                .find(|a| matches!(&a.identifier, Identifier::Dns(d) if d == domain))
                .map(|a| &a.status);

            match status {
                Some(AuthorizationStatus::Valid) => {
                    tracing::info!("✅ Authorization valid for {}", domain);
                    return Ok(());
                }
                Some(AuthorizationStatus::Invalid) => {
                    return Err(AcmeError::ChallengeFailed(format!(
                        "authorization failed for {}",
                        domain
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(AcmeError::OrderFailed(format!(
                        "authorization for {} disappeared",
                        domain
                    )));
                }
            }
        }

        Err(AcmeError::ChallengeFailed(format!(
            "authorization timeout for {}",
            domain
        )))
    }

    /// Wait for the order to leave the pending state.
    async fn await_order_ready(&self, order: &mut instant_acme::Order) -> Result<(), AcmeError> {
        for _ in 0..POLL_ATTEMPTS {
            match order.state().status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(AcmeError::OrderFailed("order became invalid".to_string()));
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                    order.refresh().await?;
                }
            }
        }

        Err(AcmeError::OrderFailed("order timeout".to_string()))
    }

    /// Poll until the issued chain is available.
    async fn await_certificate(
        &self,
        order: &mut instant_acme::Order,
    ) -> Result<String, AcmeError> {
        for _ in 0..POLL_ATTEMPTS {
            order.refresh().await?;

            match order.state().status {
                OrderStatus::Valid => {
                    if let Some(cert) = order.certificate().await? {
                        return Ok(cert);
                    }
                    return Err(AcmeError::CertGeneration(
                        "order valid but no certificate returned".to_string(),
                    ));
                }
                OrderStatus::Processing => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                status => {
                    return Err(AcmeError::CertGeneration(format!(
                        "unexpected order status {:?}",
                        status
                    )));
                }
            }
        }

        Err(AcmeError::CertGeneration("certificate timeout".to_string()))
    }
}

// MARK: - Helpers

/// Well-known path the plaintext frontend answers for a challenge token.
fn http01_challenge_path(token: &str) -> String {
    format!("/.well-known/acme-challenge/{}", token)
}
