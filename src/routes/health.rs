//! Status and message routes for the healthcheck onion.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;
use tracing::info;

use crate::routes::json_response;
use crate::server::AppState;

/// `GET /` and `GET /status` — full instance status for the peer poller.
pub async fn handle_status(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let status = state.status.report().await;
    json_response(StatusCode::OK, &status)
}

/// `POST /message` — store a short note from a peer operator.
///
/// The body is opaque: whatever the peer sends is stored verbatim and
/// handed back through the status document. Only an empty body is
/// rejected.
pub async fn handle_message(state: Arc<AppState>, body: Bytes) -> Response<Full<Bytes>> {
    let text = String::from_utf8_lossy(&body).trim().to_string();
    if text.is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            &serde_json::json!({ "error": "message body must not be empty" }),
        );
    }

    let id = state.messages.push(text);
    info!(id, "relay message accepted");
    json_response(StatusCode::OK, &serde_json::json!({ "stored": true, "id": id }))
}
