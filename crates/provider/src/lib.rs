//! Provider abstraction for outbound generative-AI calls
//!
//! Defines the `Provider` trait that decouples the key rotation layer from the
//! concrete AI vendor. A provider performs one physical call with the credential
//! it is handed; it never chooses credentials itself. `GeminiProvider` is the
//! production implementation backed by the Gemini `generateContent` endpoint.

pub mod gemini;

pub use gemini::{DEFAULT_BASE_URL, GeminiProvider};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Classification of a failed provider call.
///
/// Only the message text is available for classification; the upstream does
/// not expose a structured quota error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Quota or rate limit hit on this credential. Rotate and retry once.
    QuotaExceeded,
    /// Anything else. Propagate without touching the credential pool.
    Other,
}

/// Per-call options forwarded to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOptions {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl ProviderOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_output_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

/// Errors from a single physical provider call.
///
/// The Display output is what quota classification inspects, so upstream
/// status codes and bodies are kept verbatim.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("provider returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// HTTP status of the upstream response, when the call got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// A generative-AI backend that turns a prompt into response text.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Provider>`).
pub trait Provider: Send + Sync {
    /// Identifier for logging (e.g. "gemini")
    fn id(&self) -> &str;

    /// Run one completion with the given credential.
    ///
    /// Implementations must not retry on their own; retry policy belongs to
    /// the caller.
    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        prompt: &'a str,
        options: &'a ProviderOptions,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_display_keeps_status_and_body() {
        let err = ProviderError::Upstream {
            status: 429,
            body: r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#.into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("429"), "got: {msg}");
        assert!(msg.contains("RESOURCE_EXHAUSTED"), "got: {msg}");
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn non_upstream_errors_have_no_status() {
        assert_eq!(ProviderError::Http("connection refused".into()).status(), None);
        assert_eq!(ProviderError::Other("boom".into()).status(), None);
    }

    #[test]
    fn options_builder_sets_fields() {
        let options = ProviderOptions::new("gemini-2.0-flash")
            .with_temperature(0.3)
            .with_max_output_tokens(512);
        assert_eq!(options.model, "gemini-2.0-flash");
        assert_eq!(options.temperature, Some(0.3));
        assert_eq!(options.max_output_tokens, Some(512));
    }

    #[test]
    fn options_skip_unset_fields_when_serialized() {
        let json = serde_json::to_value(ProviderOptions::new("m")).unwrap();
        assert_eq!(json, serde_json::json!({ "model": "m" }));
    }
}
