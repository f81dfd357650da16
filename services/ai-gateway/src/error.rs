//! Service-specific error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Per-request errors surfaced to API clients.
///
/// Provider failures are not listed here: routes answer with their
/// heuristic fallback instead of failing the request.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("AI features are disabled: no API keys configured")]
    AiDisabled,
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::AiDisabled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::AiDisabled => "ai_disabled",
        }
    }

    /// Render as the JSON error envelope tagged with `request_id`.
    pub fn into_response_with_id(self, request_id: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "request_id": request_id,
            }
        });
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

/// Fresh request identifier in the `req_<uuid>` form.
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages_are_descriptive() {
        assert_eq!(
            Error::InvalidRequest("text must not be empty".into()).to_string(),
            "invalid request: text must not be empty"
        );
        assert!(Error::AiDisabled.to_string().contains("disabled"));
    }

    #[test]
    fn status_codes_match_variants() {
        assert_eq!(
            Error::InvalidRequest(String::new()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::AiDisabled.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn response_body_is_json_envelope() {
        let response =
            Error::InvalidRequest("empty".into()).into_response_with_id("req_abc123");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "invalid_request");
        assert_eq!(json["error"]["request_id"], "req_abc123");
        assert_eq!(json["error"]["message"], "invalid request: empty");
    }

    #[test]
    fn request_ids_are_prefixed_and_unique() {
        let a = new_request_id();
        let b = new_request_id();
        assert!(a.starts_with("req_"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
    }
}
