//! HTTP Basic authentication handler
//!
//! Registered as `basic-auth`. Its typed configuration is a plain
//! username → password map re-coerced from the domain's opaque payload.

use super::{AuthError, AuthHandler, AuthOutcome};
use async_trait::async_trait;
use base64::Engine as _;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue};
use std::collections::HashMap;

pub struct BasicAuth;

#[async_trait]
impl AuthHandler for BasicAuth {
    async fn check(
        &self,
        config: &serde_json::Value,
        headers: &HeaderMap,
        host: &str,
    ) -> Result<AuthOutcome, AuthError> {
        let users: HashMap<String, String> = serde_json::from_value(config.clone())
            .map_err(|e| AuthError::Config(e.to_string()))?;

        if let Some((username, password)) = parse_authorization(headers) {
            if users.get(&username) == Some(&password) {
                return Ok(AuthOutcome::Granted);
            }
        }

        Ok(AuthOutcome::Denied {
            headers: challenge_headers(host)?,
        })
    }
}

/// Credentials from an `Authorization: Basic` header, if present and sane.
fn parse_authorization(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn challenge_headers(host: &str) -> Result<HeaderMap, AuthError> {
    let mut headers = HeaderMap::new();
    let realm = HeaderValue::from_str(&format!("Basic realm=\"{}\"", host))
        .map_err(|e| AuthError::Internal(e.to_string()))?;
    headers.insert(WWW_AUTHENTICATE, realm);
    Ok(headers)
}
