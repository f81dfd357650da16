//! HTTP routes
//!
//! NLP endpoints call the model through the rotating key pool and fall
//! back to keyword heuristics whenever it cannot answer. Clients never see
//! raw provider errors.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use key_pool::RotatingClient;
use metrics_exporter_prometheus::PrometheusHandle;
use provider::{ProviderError, ProviderOptions};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::error::{Error, new_request_id};
use crate::metrics;
use crate::nlp::{self, IntentResult};

const ROUTE_INTENT: &str = "intent";
const ROUTE_SUMMARIZE: &str = "summarize";

/// Per-route model options.
pub struct ModelSettings {
    pub intent: ProviderOptions,
    pub summary: ProviderOptions,
    pub summary_language: String,
}

/// Service-level counters reported by `/health`.
#[derive(Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub ai_fallbacks_total: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            ai_fallbacks_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    /// `None` when no usable API keys were configured.
    pub ai: Option<Arc<RotatingClient>>,
    pub models: Arc<ModelSettings>,
    pub metrics: ServiceMetrics,
    pub prometheus: PrometheusHandle,
}

impl AppState {
    fn fallback(&self, route: &'static str, reason: &'static str) {
        self.metrics
            .ai_fallbacks_total
            .fetch_add(1, Ordering::Relaxed);
        metrics::record_ai_fallback(route, reason);
    }
}

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` caps concurrent in-flight requests.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/api/nlp/intent", post(intent_handler))
        .route("/api/nlp/summarize", post(summarize_handler))
        .route("/admin/keys/reset", post(reset_keys_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Reject blank input before touching the model.
fn validate_text(request: &TextRequest, request_id: &str) -> Result<String, Response> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(Error::InvalidRequest("text must not be empty".into())
            .into_response_with_id(request_id));
    }
    Ok(text.to_string())
}

async fn intent_handler(
    State(state): State<AppState>,
    Json(request): Json<TextRequest>,
) -> Response {
    let started = Instant::now();
    let request_id = new_request_id();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let text = match validate_text(&request, &request_id) {
        Ok(text) => text,
        Err(response) => {
            metrics::record_request(ROUTE_INTENT, "error", started.elapsed().as_secs_f64());
            return response;
        }
    };

    let (result, source) = match classify_with_model(&state, &text, &request_id).await {
        Some(result) => (result, "ai"),
        None => (nlp::classify_by_keywords(&text), "fallback"),
    };

    metrics::record_request(ROUTE_INTENT, source, started.elapsed().as_secs_f64());
    Json(serde_json::json!({
        "intent": result.intent,
        "confidence": result.confidence,
        "entities": result.entities,
        "source": source,
    }))
    .into_response()
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn classify_with_model(
    state: &AppState,
    text: &str,
    request_id: &str,
) -> Option<IntentResult> {
    let Some(ai) = &state.ai else {
        state.fallback(ROUTE_INTENT, "disabled");
        return None;
    };

    match ai
        .invoke(&nlp::intent_prompt(text), &state.models.intent)
        .await
    {
        Ok(reply) => match nlp::parse_intent_reply(&reply) {
            Some(result) => Some(result),
            None => {
                warn!(reply_len = reply.len(), "model reply was not a valid intent, using keywords");
                state.fallback(ROUTE_INTENT, "unparseable");
                None
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                status = e.provider_error().and_then(ProviderError::status),
                retried = e.was_retried(),
                quota = e.is_quota(),
                "intent classification failed, using keywords"
            );
            state.fallback(ROUTE_INTENT, "provider_error");
            None
        }
    }
}

async fn summarize_handler(
    State(state): State<AppState>,
    Json(request): Json<TextRequest>,
) -> Response {
    let started = Instant::now();
    let request_id = new_request_id();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let text = match validate_text(&request, &request_id) {
        Ok(text) => text,
        Err(response) => {
            metrics::record_request(ROUTE_SUMMARIZE, "error", started.elapsed().as_secs_f64());
            return response;
        }
    };

    let (summary, source) = match summarize_with_model(&state, &text, &request_id).await {
        Some(summary) => (summary, "ai"),
        None => (nlp::fallback_summary(&text), "fallback"),
    };

    metrics::record_request(ROUTE_SUMMARIZE, source, started.elapsed().as_secs_f64());
    Json(serde_json::json!({
        "original_length": text.chars().count(),
        "summary_length": summary.chars().count(),
        "summary": summary,
        "source": source,
    }))
    .into_response()
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn summarize_with_model(state: &AppState, text: &str, request_id: &str) -> Option<String> {
    let Some(ai) = &state.ai else {
        state.fallback(ROUTE_SUMMARIZE, "disabled");
        return None;
    };

    let prompt = nlp::summary_prompt(text, &state.models.summary_language);
    match ai.invoke(&prompt, &state.models.summary).await {
        Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
        Ok(_) => {
            warn!("model returned a blank summary, using heuristic summary");
            state.fallback(ROUTE_SUMMARIZE, "unparseable");
            None
        }
        Err(e) => {
            warn!(
                error = %e,
                status = e.provider_error().and_then(ProviderError::status),
                retried = e.was_retried(),
                quota = e.is_quota(),
                "summarization failed, using heuristic summary"
            );
            state.fallback(ROUTE_SUMMARIZE, "provider_error");
            None
        }
    }
}

/// Clear every key's quota cooldown.
async fn reset_keys_handler(State(state): State<AppState>) -> Response {
    let request_id = new_request_id();
    let Some(ai) = &state.ai else {
        return Error::AiDisabled.into_response_with_id(&request_id);
    };

    ai.pool().reset_failures();
    info!(request_id = %request_id, "key cooldowns reset by admin request");
    Json(serde_json::json!({
        "status": "reset",
        "pool": ai.pool().health(),
    }))
    .into_response()
}

/// Health endpoint: service status plus key pool health.
///
/// Always 200 while the process serves; with AI disabled or every key
/// cooling down, routes still answer from their heuristics.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let fallbacks = state.metrics.ai_fallbacks_total.load(Ordering::Relaxed);

    let body = match &state.ai {
        Some(ai) => {
            let pool = ai.pool().health();
            serde_json::json!({
                "status": pool["status"].clone(),
                "ai": "enabled",
                "provider": ai.provider_id(),
                "model": state.models.intent.model,
                "uptime_seconds": uptime,
                "requests_served": requests,
                "ai_fallbacks": fallbacks,
                "pool": pool,
            })
        }
        None => serde_json::json!({
            "status": "degraded",
            "ai": "disabled",
            "uptime_seconds": uptime,
            "requests_served": requests,
            "ai_fallbacks": fallbacks,
        }),
    };

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
