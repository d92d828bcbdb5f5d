//! Frontends
//!
//! 📡 The three accept loops of the proxy. Each owns its socket until it
//! terminates and reports a [`ListenerExit`] to the supervisor: the SNI
//! frontend can be stopped cooperatively for a certificate-store rebuild,
//! everything else only ever exits fatally.

use crate::context::AppContext;
use crate::metrics;
use crate::router;
use crate::router::ProxyBody;
use dockgate_core::Error;
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_rustls::TlsAcceptor;

// MARK: - Exit signalling

/// Why a frontend's accept loop ended.
#[derive(Debug)]
pub enum ListenerExit {
    /// Intentional cooperative stop (SNI frontend only)
    Stopped,
    /// Anything else; fatal to the process
    Fatal(Error),
}

/// The three listeners the supervisor watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frontend {
    Http,
    Https,
    Metrics,
}

impl std::fmt::Display for Frontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frontend::Http => write!(f, "http"),
            Frontend::Https => write!(f, "https"),
            Frontend::Metrics => write!(f, "metrics"),
        }
    }
}

/// Listen addresses may use the Go-style `:port` shorthand.
pub fn normalize_listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

// MARK: - Plaintext frontend

/// Plaintext HTTP frontend: answers pending ACME challenges locally and
/// hands everything else to the routing core (which owns the force-TLS
/// redirect).
pub async fn run_http_frontend(ctx: Arc<AppContext>, addr: String) -> ListenerExit {
    let listener = match TcpListener::bind(normalize_listen_addr(&addr)).await {
        Ok(listener) => listener,
        Err(e) => return ListenerExit::Fatal(e.into()),
    };
    tracing::info!("📡 HTTP frontend listening on {}", addr);

    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => return ListenerExit::Fatal(e.into()),
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service =
                service_fn(move |req| plain_service(ctx.clone(), req, remote));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!("http connection from {} ended: {}", remote, e);
            }
        });
    }
}

async fn plain_service(
    ctx: Arc<AppContext>,
    req: Request<Incoming>,
    remote: SocketAddr,
) -> Result<Response<ProxyBody>, Infallible> {
    let start = Instant::now();
    let host = router::request_host(&req).to_string();

    // Pending challenge for this host and the exact challenge path
    if let Some(body) = pending_challenge(&ctx.challenges, &host, req.uri().path()) {
        tracing::info!("got challenge request for domain {} and answered", host);
        let response = router::text_response(StatusCode::OK, &body);
        return Ok(finish_request(metrics::HANDLER_ACME, &req, remote, start, response));
    }

    // Stray ACME probes never reach a backend
    if req.uri().path().contains(".well-known/acme-challenge") {
        let response =
            router::text_response(StatusCode::NOT_FOUND, "Invalid acme-challenge");
        return Ok(finish_request(metrics::HANDLER_ACME, &req, remote, start, response));
    }

    Ok(handle_instrumented(&ctx, req, remote, false, start).await)
}

/// Response body for a request hitting the exact challenge path registered
/// for its host, if any.
fn pending_challenge(
    challenges: &dockgate_tls::ChallengeRegistry,
    host: &str,
    path: &str,
) -> Option<String> {
    let challenge = challenges.lookup(host)?;
    (path == challenge.path).then_some(challenge.response)
}

// MARK: - SNI TLS frontend

/// SNI TLS frontend. The certificate set is fixed for the lifetime of one
/// run; `stop` unblocks only the accept loop, in-flight connections finish
/// on their own tasks.
pub async fn run_https_frontend(
    ctx: Arc<AppContext>,
    addr: String,
    tls_config: rustls::ServerConfig,
    stop: Arc<Notify>,
) -> ListenerExit {
    let listener = match TcpListener::bind(normalize_listen_addr(&addr)).await {
        Ok(listener) => listener,
        Err(e) => return ListenerExit::Fatal(e.into()),
    };
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    tracing::info!("🔐 HTTPS frontend listening on {}", addr);

    loop {
        tokio::select! {
            _ = stop.notified() => {
                tracing::info!("HTTPS frontend stopping for certificate reload");
                return ListenerExit::Stopped;
            }
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => return ListenerExit::Fatal(e.into()),
                };

                let ctx = ctx.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(e) => {
                            tracing::debug!("TLS handshake with {} failed: {}", remote, e);
                            return;
                        }
                    };

                    let io = TokioIo::new(tls_stream);
                    let service = service_fn(move |req| {
                        let ctx = ctx.clone();
                        async move {
                            Ok::<_, Infallible>(
                                handle_instrumented(&ctx, req, remote, true, Instant::now())
                                    .await,
                            )
                        }
                    });
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        tracing::debug!("https connection from {} ended: {}", remote, e);
                    }
                });
            }
        }
    }
}

// MARK: - Metrics frontend

/// Metrics listener: `GET /metrics` in the Prometheus text format.
pub async fn run_metrics_frontend(addr: String) -> ListenerExit {
    let listener = match TcpListener::bind(normalize_listen_addr(&addr)).await {
        Ok(listener) => listener,
        Err(e) => return ListenerExit::Fatal(e.into()),
    };
    tracing::info!("📊 Metrics listening on http://{}/metrics", addr);

    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => return ListenerExit::Fatal(e.into()),
        };

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(metrics_service);
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!("metrics connection from {} ended: {}", remote, e);
            }
        });
    }
}

async fn metrics_service(req: Request<Incoming>) -> Result<Response<ProxyBody>, Infallible> {
    if req.method() == Method::GET && req.uri().path() == "/metrics" {
        let mut response = Response::new(router::full_body(metrics::gather()));
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; version=0.0.4"),
        );
        Ok(response)
    } else {
        Ok(router::text_response(StatusCode::NOT_FOUND, "Not Found"))
    }
}

// MARK: - Instrumentation

/// Route a request and record metrics plus the access line for it.
async fn handle_instrumented(
    ctx: &AppContext,
    req: Request<Incoming>,
    remote: SocketAddr,
    tls: bool,
    start: Instant,
) -> Response<ProxyBody> {
    let observed = RequestObservation::of(&req, remote);
    let response = router::handle(ctx, req, remote.ip().to_string(), tls).await;
    observed.finish(metrics::HANDLER_PROXY, start, response)
}

fn finish_request(
    handler: &'static str,
    req: &Request<Incoming>,
    remote: SocketAddr,
    start: Instant,
    response: Response<ProxyBody>,
) -> Response<ProxyBody> {
    RequestObservation::of(req, remote).finish(handler, start, response)
}

/// Request fields captured before the request is consumed by routing.
struct RequestObservation {
    client_ip: String,
    host: String,
    method: String,
    request_uri: String,
    user_agent: String,
}

impl RequestObservation {
    fn of(req: &Request<Incoming>, remote: SocketAddr) -> Self {
        Self {
            client_ip: remote.ip().to_string(),
            host: router::request_host(req).to_string(),
            method: req.method().to_string(),
            request_uri: router::request_uri(req).to_string(),
            user_agent: req
                .headers()
                .get(http::header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-")
                .to_string(),
        }
    }

    fn finish(
        self,
        handler: &'static str,
        start: Instant,
        response: Response<ProxyBody>,
    ) -> Response<ProxyBody> {
        let status = response.status().as_u16();
        let bytes = response.body().size_hint().exact().unwrap_or(0);
        let micros = start.elapsed().as_micros() as f64;

        metrics::observe(handler, &self.method, status, bytes, micros);

        tracing::info!(
            "{} {} \"{} {}\" {} {} \"{}\"",
            self.client_ip,
            self.host,
            self.method,
            self.request_uri,
            status,
            bytes,
            self.user_agent
        );

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockgate_tls::{Challenge, ChallengeRegistry};

    #[test]
    fn test_pending_challenge_exact_path() {
        let registry = ChallengeRegistry::new();
        registry.publish(
            "a.example.com",
            Challenge {
                path: "/.well-known/acme-challenge/XYZ".to_string(),
                response: "PAYLOAD".to_string(),
            },
        );

        assert_eq!(
            pending_challenge(&registry, "a.example.com", "/.well-known/acme-challenge/XYZ"),
            Some("PAYLOAD".to_string())
        );
        // A different token for the same host is not answered
        assert_eq!(
            pending_challenge(&registry, "a.example.com", "/.well-known/acme-challenge/OTHER"),
            None
        );
        // Hosts without a pending authorization are not answered
        assert_eq!(
            pending_challenge(&registry, "b.example.com", "/.well-known/acme-challenge/XYZ"),
            None
        );
    }

    #[test]
    fn test_normalize_listen_addr() {
        assert_eq!(normalize_listen_addr(":80"), "0.0.0.0:80");
        assert_eq!(normalize_listen_addr("127.0.0.1:9000"), "127.0.0.1:9000");
    }

    #[test]
    fn test_frontend_display() {
        assert_eq!(Frontend::Http.to_string(), "http");
        assert_eq!(Frontend::Https.to_string(), "https");
        assert_eq!(Frontend::Metrics.to_string(), "metrics");
    }
}
