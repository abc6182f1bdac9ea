//! `POST /register` — accept a peer's key escrow.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;
use tracing::debug;

use crate::registration::RegisterRequest;
use crate::routes::{error_response, json_response};
use crate::server::AppState;

pub async fn handle_register(state: Arc<AppState>, body: Bytes) -> Response<Full<Bytes>> {
    let req: RegisterRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "register body rejected");
            return json_response(
                StatusCode::BAD_REQUEST,
                &serde_json::json!({ "error": format!("invalid request body: {e}") }),
            );
        }
    };

    match state.registration.register(&req) {
        Ok(resp) => json_response(StatusCode::OK, &resp),
        Err(e) => error_response(&e),
    }
}
