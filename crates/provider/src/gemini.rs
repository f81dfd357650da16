//! Gemini provider: plain HTTP client for the `generateContent` endpoint.
//!
//! Holds a shared `reqwest::Client` and sends the credential it is given in the
//! `x-goog-api-key` header. Non-success responses become
//! `ProviderError::Upstream` with the status and raw body so the quota
//! classifier can inspect them.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Provider, ProviderError, ProviderOptions, Result};

/// Public Gemini API host.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Gemini `generateContent` client.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }

    async fn generate_content(
        &self,
        api_key: &str,
        prompt: &str,
        options: &ProviderOptions,
    ) -> Result<String> {
        let generation_config = if options.temperature.is_some() || options.max_output_tokens.is_some()
        {
            Some(GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_output_tokens,
            })
        } else {
            None
        };
        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config,
        };

        debug!(model = %options.model, prompt_len = prompt.len(), "sending generateContent");

        let response = self
            .client
            .post(self.endpoint(&options.model))
            .header("x-goog-api-key", api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("generateContent request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("undecodable body: {e}")))?;

        extract_text(parsed)
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: GenerateContentResponse) -> Result<String> {
    let block_reason = response
        .prompt_feedback
        .and_then(|f| f.block_reason)
        .unwrap_or_default();

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(ProviderError::InvalidResponse(if block_reason.is_empty() {
            "no candidates returned".to_string()
        } else {
            format!("prompt blocked: {block_reason}")
        }));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(ProviderError::InvalidResponse(format!(
            "candidate contained no text (finish reason: {reason})"
        )));
    }
    Ok(text)
}

impl Provider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        prompt: &'a str,
        options: &'a ProviderOptions,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.generate_content(api_key, prompt, options))
    }
}
