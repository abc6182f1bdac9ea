//! HTTP routes for the healthcheck endpoint.

pub mod health;
pub mod register;

pub use health::{handle_message, handle_status};
pub use register::handle_register;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::types::CellarError;

/// Serialize `body` as a JSON response with the given status.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_default()
}

/// Map a service error onto the wire per the error contract: bad input is
/// the caller's fault, a locked master key is a distinct 503 so peers can
/// tell "fix your request" from "try again after unlock".
pub fn error_response(err: &CellarError) -> Response<Full<Bytes>> {
    match err {
        CellarError::Validation(msg) => json_response(
            StatusCode::BAD_REQUEST,
            &serde_json::json!({ "error": msg }),
        ),
        CellarError::Locked => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &serde_json::json!({
                "error": "master key is locked; an operator must unlock it",
                "locked": true,
            }),
        ),
        other => {
            error!(error = %other, "request failed");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &serde_json::json!({ "error": "internal error" }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_maps_to_503_with_the_locked_flag() {
        let resp = error_response(&CellarError::Locked);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn validation_maps_to_400() {
        let resp = error_response(&CellarError::Validation("bad address".into()));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn everything_else_is_a_500() {
        let resp = error_response(&CellarError::Crypto("tag mismatch".into()));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
