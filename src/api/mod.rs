use std::{sync::Arc, time::Instant};

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::from_fn,
    response::Response,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Level;
use uuid::Uuid;

use crate::{
    api::handlers::{events_stream, healthz, metrics, post_message, surfaces_stream},
    app_state::AppState,
};

pub mod control;
pub mod handlers;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/v1/message", post(post_message))
        .route("/api/v1/events", get(events_stream))
        .route("/api/v1/surfaces", get(surfaces_stream))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(set_request_id))
                .layer(from_fn(trace_log))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn set_request_id(mut req: Request, next: axum::middleware::Next) -> Response {
    let req_id = req
        .headers()
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value =
        HeaderValue::from_str(&req_id).unwrap_or(HeaderValue::from_static("gen-failed"));

    req.headers_mut().insert("x-request-id", header_value.clone());
    let mut resp = next.run(req).await;
    resp.headers_mut().insert("x-request-id", header_value);
    resp
}

async fn trace_log(req: Request, next: axum::middleware::Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let req_id = req
        .headers()
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let resp = next.run(req).await;
    let status = resp.status();
    let elapsed = start.elapsed().as_millis();
    tracing::event!(
        Level::INFO,
        request_id = %req_id,
        method = %method,
        path = %path,
        status = %status.as_u16(),
        elapsed_ms = %elapsed,
        "http_request"
    );
    resp
}
