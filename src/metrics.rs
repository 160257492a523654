use crate::pipeline::Pipeline;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Request counters for one pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub transforms: AtomicU64,
    pub joined: AtomicU64,
    pub errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Prometheus text exposition.
    pub fn render(&self) -> String {
        let counters = [
            ("cache_hits", "Requests served from an existing cache entry", &self.cache_hits),
            ("cache_misses", "Requests that found no cache entry", &self.cache_misses),
            ("transforms", "Artifacts produced by running the transcoder", &self.transforms),
            ("joined", "Misses served by another request's production", &self.joined),
            ("errors", "Requests that ended in an error response", &self.errors),
        ];
        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP webp_proxy_{name}_total {help}\n\
                 # TYPE webp_proxy_{name}_total counter\n\
                 webp_proxy_{name}_total {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        out
    }
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    use serde_json::json;

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "webp-proxy"
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
pub async fn metrics_handler(State(pipeline): State<Arc<Pipeline>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        pipeline.metrics().render(),
    )
}
