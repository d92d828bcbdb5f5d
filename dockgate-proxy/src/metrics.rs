//! Prometheus Metrics for Dockgate
//!
//! Provides metrics collection for request counts, response sizes and
//! latency, exported on the dedicated metrics listener.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;

/// Label value for requests handled by the routing core
pub const HANDLER_PROXY: &str = "dockerproxy";

/// Label value for ACME challenge traffic on the plaintext frontend
pub const HANDLER_ACME: &str = "acme";

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Total requests processed
pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["handler", "method", "code"],
    )
    .expect("metric can be created")
});

/// Response body sizes in bytes
pub static RESPONSE_SIZE_BYTES: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new("http_response_size_bytes", "HTTP response sizes in bytes")
            .buckets(prometheus::exponential_buckets(256.0, 4.0, 8).unwrap()),
        &["handler"],
    )
    .expect("metric can be created")
});

/// Request latency in microseconds
pub static REQUEST_DURATION_MICROSECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_microseconds",
            "HTTP request latency in microseconds",
        )
        .buckets(prometheus::exponential_buckets(100.0, 10.0, 7).unwrap()),
        &["handler"],
    )
    .expect("metric can be created")
});

/// Register all metric families. Idempotent.
pub fn init() {
    let _ = REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RESPONSE_SIZE_BYTES.clone()));
    let _ = REGISTRY.register(Box::new(REQUEST_DURATION_MICROSECONDS.clone()));
}

/// Record one finished request.
pub fn observe(handler: &str, method: &str, code: u16, bytes: u64, micros: f64) {
    REQUESTS_TOTAL
        .with_label_values(&[handler, method, &code.to_string()])
        .inc();
    RESPONSE_SIZE_BYTES
        .with_label_values(&[handler])
        .observe(bytes as f64);
    REQUEST_DURATION_MICROSECONDS
        .with_label_values(&[handler])
        .observe(micros);
}

/// Gather metrics in Prometheus text format
pub fn gather() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
