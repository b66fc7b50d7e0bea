//! Prometheus metrics for the HTTP surface.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

/// Metric handles registered against one registry at startup.
pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub build_info: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("bleepstore_http_requests_total", "HTTP requests processed"),
            &["method", "status"],
        )
        .expect("valid counter opts");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "bleepstore_http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["method"],
        )
        .expect("valid histogram opts");

        let build_info = IntGauge::with_opts(
            Opts::new("bleepstore_build_info", "Build metadata")
                .const_label("version", env!("CARGO_PKG_VERSION")),
        )
        .expect("valid gauge opts");
        build_info.set(1);

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("register requests counter");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("register duration histogram");
        registry
            .register(Box::new(build_info.clone()))
            .expect("register build info");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            build_info,
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<Arc<crate::AppState>>) -> Response {
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// Record count and latency for every request passing through the router.
pub async fn http_metrics_middleware(
    State(state): State<Arc<crate::AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let method = req.method().as_str().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    state
        .metrics
        .http_requests_total
        .with_label_values(&[&method, &status])
        .inc();
    state
        .metrics
        .http_request_duration_seconds
        .with_label_values(&[&method])
        .observe(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_metrics() {
        let metrics = Metrics::new();
        metrics
            .http_requests_total
            .with_label_values(&["GET", "200"])
            .inc();
        let rendered = metrics.render();
        assert!(rendered.contains("bleepstore_http_requests_total"));
        assert!(rendered.contains("bleepstore_build_info"));
    }
}
