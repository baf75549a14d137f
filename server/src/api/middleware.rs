//! HTTP middleware (CORS, request tracing, 404 handler)

use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::{Method, header};
use axum::response::IntoResponse;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};

use super::types::ApiError;

const MAX_404_BODY_LOG: usize = 64 * 1024;

/// Test servers call the API from arbitrary hosts, so any origin is allowed
pub fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
}

/// Log each request at debug with its status and latency
pub fn trace() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .on_response(DefaultOnResponse::new().level(tracing::Level::DEBUG))
}

/// Handle 404 Not Found with logging
pub async fn handle_404(req: Request) -> impl IntoResponse {
    let method = req.method().clone();
    let uri = req.uri().clone();

    if tracing::enabled!(tracing::Level::DEBUG) {
        match to_bytes(req.into_body(), MAX_404_BODY_LOG).await {
            Ok(body) if !body.is_empty() => {
                tracing::debug!(%method, %uri, body = %String::from_utf8_lossy(&body), "[404]");
            }
            Ok(_) => tracing::debug!(%method, %uri, "[404]"),
            Err(_) => tracing::debug!(%method, %uri, "[404] (failed to read body)"),
        }
    }

    ApiError::not_found("ROUTE_NOT_FOUND", format!("no route for {} {}", method, uri))
}
