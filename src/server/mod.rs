//! HTTP front end
//!
//! Every path is proxied to the cluster of the authenticated user, except
//! `GET /metrics` which renders the gateway's counters.

use crate::core::GatewayError;
use crate::metrics::ProxyMetrics;
use crate::proxy::{BackendRequest, BackendResponse, Credentials, ReverseProxy};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Largest request body the gateway buffers before forwarding
pub const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ReverseProxy>,
    pub metrics: Arc<ProxyMetrics>,
}

impl AppState {
    pub fn new(proxy: Arc<ReverseProxy>, metrics: Arc<ProxyMetrics>) -> Self {
        Self { proxy, metrics }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .fallback(proxy_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

async fn proxy_request(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("can't read request body: {}", err),
            )
                .into_response();
        }
    };

    let query = parts.uri.query();
    let credentials = Credentials::from_request(&parts.headers, query);
    let path_and_query = match query.and_then(crate::proxy::credentials::strip_credentials) {
        Some(query) => format!("{}?{}", parts.uri.path(), query),
        None => parts.uri.path().to_string(),
    };

    let request = BackendRequest {
        method: parts.method,
        path_and_query,
        headers: parts.headers,
        body,
    };

    match state.proxy.serve(&credentials, request).await {
        Ok(response) => backend_response(response),
        Err(err) => err.into_response(),
    }
}

fn backend_response(response: BackendResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::AdmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Transport { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::ConfigIntegrity(_)
            | GatewayError::Config(_)
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            GatewayError::ConfigIntegrity(_) => error!(error = %self, "configuration integrity violation"),
            GatewayError::Unauthorized(_) | GatewayError::AdmissionRejected { .. } => {
                warn!(error = %self, "request rejected")
            }
            _ => warn!(error = %self, "request failed"),
        }

        (status, self.to_string()).into_response()
    }
}
