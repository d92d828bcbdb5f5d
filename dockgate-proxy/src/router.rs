//! Routing core
//!
//! Every request that reaches this layer (from the TLS terminator or the
//! plaintext frontend's non-challenge path) goes through the same steps:
//! slug resolution, per-domain policy (force-TLS redirect, authentication
//! gate), then transparent dispatch against a randomly chosen endpoint of
//! the slug's pool. CONNECT is never tunnelled.

use crate::auth::AuthOutcome;
use crate::context::AppContext;
use bytes::Bytes;
use dockgate_core::ProxyConfig;
use http::header::{HeaderValue, LOCATION};
use http::uri::Uri;
use http::{Method, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use rand::Rng;

/// Unified response body: local responses and streamed upstream bodies.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

const UNAVAILABLE_BODY: &str = "This host is currently not available";

/// Handle one request end-to-end. `tls` tells whether the request arrived
/// over the TLS frontend; `client_ip` is the peer address with port and
/// IPv6 brackets already stripped.
pub async fn handle(
    ctx: &AppContext,
    req: Request<Incoming>,
    client_ip: String,
    tls: bool,
) -> Response<ProxyBody> {
    // This is a reverse proxy, never a tunnel.
    if req.method() == Method::CONNECT {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "");
    }

    let config = ctx.config();
    let host = request_host(&req).to_string();

    if let Some(domain) = config.domains.get(&host) {
        if domain.force_ssl && !tls {
            return force_tls_redirect(&host, request_uri(&req));
        }

        if let Some(auth) = &domain.authentication {
            if !auth.kind.is_empty() {
                let Some(handler) = ctx.auth.get(&auth.kind) else {
                    tracing::error!("unknown auth handler '{}' for {}", auth.kind, host);
                    return text_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Authentication system is misconfigured for this host.",
                    );
                };

                match handler.check(&auth.config, req.headers(), &host).await {
                    Err(e) => {
                        tracing::error!("auth handler '{}' failed for {}: {}", auth.kind, host, e);
                        return text_response(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Authentication system threw an error.",
                        );
                    }
                    Ok(AuthOutcome::Denied { headers }) => {
                        let mut response =
                            text_response(StatusCode::UNAUTHORIZED, "Unauthorized.");
                        response.headers_mut().extend(headers);
                        return response;
                    }
                    Ok(AuthOutcome::Granted) => {}
                }
            }
        }
    }

    let slug = resolve_slug(&config, &host);

    let endpoint = {
        let endpoints = ctx.endpoints();
        match endpoints.get(&slug) {
            Some(pool) if !slug.is_empty() && !pool.is_empty() => pick_endpoint(pool).clone(),
            _ => return text_response(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_BODY),
        }
    };

    proxy_to(ctx, req, &endpoint, &client_ip, &config).await
}

/// Slug for a request host: the exact domain entry wins, then the generic
/// suffix, then none.
pub fn resolve_slug(config: &ProxyConfig, host: &str) -> String {
    if let Some(domain) = config.domains.get(host) {
        return domain.slug.clone();
    }
    if !config.generic.is_empty() {
        if let Some(stripped) = host.strip_suffix(config.generic.as_str()) {
            return stripped.to_string();
        }
    }
    String::new()
}

/// Uniform random choice over the slug's endpoint pool. Selection is
/// stateless per request.
fn pick_endpoint(pool: &[String]) -> &String {
    &pool[rand::thread_rng().gen_range(0..pool.len())]
}

/// Rewrite the request to the chosen endpoint and dispatch it.
///
/// The original `Host` header travels unchanged; the client address is
/// appended as `X-Forwarded-For`. Unreachable backends map to the same 503
/// an empty pool produces.
async fn proxy_to(
    ctx: &AppContext,
    req: Request<Incoming>,
    endpoint: &str,
    client_ip: &str,
    config: &ProxyConfig,
) -> Response<ProxyBody> {
    let (mut parts, body) = req.into_parts();

    let Ok(uri) = upstream_uri(endpoint, &parts.uri) else {
        tracing::warn!("endpoint '{}' does not form a valid URI", endpoint);
        return text_response(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_BODY);
    };
    parts.uri = uri;

    if let Ok(value) = HeaderValue::from_str(client_ip) {
        parts.headers.append("x-forwarded-for", value);
    }

    match ctx
        .upstream_client
        .request(Request::from_parts(parts, body))
        .await
    {
        Ok(response) => {
            let mut response = response.map(|body| body.boxed());
            rewrite_location(&mut response, config);
            response
        }
        Err(e) => {
            tracing::warn!("upstream {} unreachable: {}", endpoint, e);
            text_response(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_BODY)
        }
    }
}

/// Absolute upstream URI: cleartext scheme, chosen endpoint, original
/// path and query.
fn upstream_uri(endpoint: &str, original: &Uri) -> Result<Uri, http::uri::InvalidUri> {
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("http://{}{}", endpoint, path_and_query).parse()
}

/// A backend redirect pointing at a force-TLS domain over plain HTTP gets
/// its scheme upgraded before it reaches the visitor.
fn rewrite_location(response: &mut Response<ProxyBody>, config: &ProxyConfig) {
    let Some(location) = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
    else {
        return;
    };

    let Ok(uri) = location.parse::<Uri>() else {
        return;
    };
    if uri.scheme_str() != Some("http") {
        return;
    }
    let Some(host) = uri.host() else { return };
    let force_ssl = config
        .domains
        .get(host)
        .map(|domain| domain.force_ssl)
        .unwrap_or(false);
    if !force_ssl {
        return;
    }

    let mut parts = uri.into_parts();
    parts.scheme = Some(http::uri::Scheme::HTTPS);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(http::uri::PathAndQuery::from_static("/"));
    }

    if let Ok(rewritten) = Uri::from_parts(parts) {
        if let Ok(value) = HeaderValue::from_str(&rewritten.to_string()) {
            response.headers_mut().insert(LOCATION, value);
        }
    }
}

/// 301 to the same host and request URI over HTTPS.
fn force_tls_redirect(host: &str, request_uri: &str) -> Response<ProxyBody> {
    let location = format!("https://{}{}", host, request_uri);
    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    if let Ok(value) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(LOCATION, value);
    }
    response
}

/// Request host with any `:port` suffix stripped.
pub(crate) fn request_host(req: &Request<Incoming>) -> &str {
    let host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| req.uri().host())
        .unwrap_or_default();
    host.split(':').next().unwrap_or(host)
}

/// Origin-form request URI (path plus query).
pub(crate) fn request_uri(req: &Request<Incoming>) -> &str {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
}

pub(crate) fn text_response(status: StatusCode, body: &str) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(body.to_string()));
    *response.status_mut() = status;
    response
}

pub(crate) fn full_body(text: impl Into<Bytes>) -> ProxyBody {
    Full::new(text.into())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) fn empty_body() -> ProxyBody {
    full_body(Bytes::new())
}
