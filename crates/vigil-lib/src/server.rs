//! Node status API.
//!
//! Runs on port 8080 by default, on the tokio runtime, independent of the
//! control loop. Read-only with respect to node state. CORS-permissive so
//! dashboards on other origins can poll it.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::info;

use vigil_core::types::{HealthResponse, TextSubmission};

use crate::error::Result;
use crate::state::NodeStatus;

/// Build the axum router over a shared [`NodeStatus`].
pub fn router(status: NodeStatus) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/text", post(text))
        .layer(CorsLayer::permissive())
        .with_state(status)
}

/// Bind `addr` and serve until the task is dropped.
pub async fn serve(addr: SocketAddr, status: NodeStatus) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "status server listening");
    axum::serve(listener, router(status)).await?;
    Ok(())
}

async fn health(State(status): State<NodeStatus>) -> Json<HealthResponse> {
    Json(HealthResponse::ok(status.snapshot()))
}

async fn text(headers: HeaderMap, body: Bytes) -> (StatusCode, &'static str) {
    match submitted_text(&headers, &body) {
        Ok(text) => {
            info!(text = %text, "text received");
            (StatusCode::OK, "OK")
        }
        Err(msg) => (StatusCode::BAD_REQUEST, msg),
    }
}

/// Extract the submitted text from a JSON `{"text": …}` body or a raw body.
fn submitted_text(headers: &HeaderMap, body: &[u8]) -> std::result::Result<String, &'static str> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));

    let text = if is_json {
        serde_json::from_slice::<TextSubmission>(body)
            .map_err(|_| "Invalid JSON body")?
            .text
    } else {
        std::str::from_utf8(body)
            .map_err(|_| "Body is not valid UTF-8")?
            .to_string()
    };

    // Only a zero-length payload is empty; whitespace is passed through.
    if text.is_empty() {
        return Err("Empty text payload");
    }
    Ok(text)
}
