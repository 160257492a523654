use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod fetch;
pub mod fingerprint;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod transform;

use crate::pipeline::Pipeline;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Fetch error: {0}")]
    Fetch(String),
    #[error("Origin responded with status {0}")]
    UpstreamStatus(u16),
    #[error("Transformation error: {0}")]
    Transform(String),
    #[error("Invalid argument: {0}")]
    ClientInput(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ClientInput(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
            // A miss never reaches the boundary on its own; if one does, the
            // entry vanished after being produced.
            ProxyError::NotFound(_)
            | ProxyError::Fetch(_)
            | ProxyError::Transform(_)
            | ProxyError::Io(_)
            | ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

/// `GET /?url=<asset>&w=<width>&h=<height>&q=<quality>`
async fn transform_handler(State(pipeline): State<Arc<Pipeline>>, uri: Uri) -> Response {
    match pipeline.handle(uri.path(), uri.query()).await {
        Ok(artifact) => artifact.into_response(),
        Err(e) => e.into_response(),
    }
}

fn cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    if allowed_origins.is_empty() {
        return None;
    }
    let layer = CorsLayer::new().allow_methods([Method::GET]);
    if allowed_origins.iter().any(|o| o == "*") {
        return Some(layer.allow_origin(Any));
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    Some(layer.allow_origin(AllowOrigin::list(origins)))
}

/// Build the proxy's router around a ready pipeline.
pub fn router(pipeline: Arc<Pipeline>, allowed_origins: &[String]) -> Router {
    let mut app = Router::new()
        .route("/", get(transform_handler))
        .route("/health", get(metrics::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(pipeline)
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(allowed_origins) {
        tracing::info!("CORS enabled for {:?}", allowed_origins);
        app = app.layer(cors);
    }
    app
}
