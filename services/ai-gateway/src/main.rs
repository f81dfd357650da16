//! AI Gateway
//!
//! Single-binary Rust service that:
//! 1. Loads a pool of Gemini API keys
//! 2. Serves intent classification and summarization endpoints
//! 3. Rotates to the next key when one hits its quota
//! 4. Falls back to keyword heuristics when the model cannot answer

mod config;
mod error;
mod metrics;
mod nlp;
mod routes;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use key_pool::{KeyPool, RotatingClient};
use provider::{GeminiProvider, ProviderOptions};

use crate::config::{Config, GeminiConfig};
use crate::routes::{AppState, ModelSettings, ServiceMetrics, build_router};

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting ai-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.gemini.base_url,
        model = %config.gemini.model,
        cooldown_secs = config.gemini.cooldown_secs,
        "configuration loaded"
    );

    let http_client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let app_state = AppState {
        ai: build_ai_client(&config.gemini, http_client),
        models: Arc::new(model_settings(&config.gemini)),
        metrics: ServiceMetrics::new(),
        prometheus: prometheus_handle,
    };
    let requests_total = app_state.metrics.requests_total.clone();

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt: notify the server to drain,
    // then race the drain against DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!(
        requests_served = requests_total.load(Ordering::Relaxed),
        "shutdown complete"
    );
    Ok(())
}

/// Build the rotating Gemini client, or `None` when no usable keys exist.
///
/// A missing or empty key list disables AI features instead of failing startup.
fn build_ai_client(
    gemini: &GeminiConfig,
    http_client: reqwest::Client,
) -> Option<Arc<RotatingClient>> {
    let Some(keys) = gemini.api_keys.as_ref() else {
        warn!(
            env = config::API_KEYS_ENV,
            "no Gemini API keys configured, AI features disabled"
        );
        return None;
    };

    let pool = match KeyPool::with_cooldown(keys.expose(), gemini.cooldown()) {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "failed to initialize API key pool, AI features disabled");
            return None;
        }
    };

    let provider = GeminiProvider::new(http_client, gemini.base_url.clone(), gemini.timeout());
    Some(Arc::new(RotatingClient::new(
        Arc::new(pool),
        Arc::new(provider),
    )))
}

fn model_settings(gemini: &GeminiConfig) -> ModelSettings {
    let options = |temperature: f32| {
        let options = ProviderOptions::new(gemini.model.clone()).with_temperature(temperature);
        match gemini.max_output_tokens {
            Some(limit) => options.with_max_output_tokens(limit),
            None => options,
        }
    };
    ModelSettings {
        intent: options(gemini.intent_temperature),
        summary: options(gemini.summary_temperature),
        summary_language: gemini.summary_language.clone(),
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Secret;

    fn gemini_config(keys: Option<&str>) -> GeminiConfig {
        GeminiConfig {
            api_keys: keys.map(|k| Secret::new(k.to_string())),
            ..GeminiConfig::default()
        }
    }

    #[test]
    fn missing_keys_disable_ai() {
        let client = build_ai_client(&gemini_config(None), reqwest::Client::new());
        assert!(client.is_none());
    }

    #[test]
    fn delimiter_only_keys_disable_ai() {
        let client = build_ai_client(&gemini_config(Some(" , ,")), reqwest::Client::new());
        assert!(client.is_none());
    }

    #[test]
    fn configured_keys_build_pool_with_cooldown() {
        let mut gemini = gemini_config(Some("AIza-one,AIza-two"));
        gemini.cooldown_secs = 90;

        let client = build_ai_client(&gemini, reqwest::Client::new()).unwrap();
        assert_eq!(client.pool().len(), 2);
        assert_eq!(client.pool().cooldown(), Duration::from_secs(90));
        assert_eq!(client.provider_id(), "gemini");
    }

    #[test]
    fn model_settings_carry_per_route_temperatures() {
        let settings = model_settings(&gemini_config(None));
        assert_eq!(settings.intent.model, "gemini-2.0-flash");
        assert_eq!(settings.intent.temperature, Some(0.1));
        assert_eq!(settings.summary.temperature, Some(0.3));
        assert_eq!(settings.summary_language, "Vietnamese");
        assert_eq!(settings.intent.max_output_tokens, None);
    }

    #[test]
    fn model_settings_apply_output_token_limit() {
        let mut gemini = gemini_config(None);
        gemini.max_output_tokens = Some(256);

        let settings = model_settings(&gemini);
        assert_eq!(settings.intent.max_output_tokens, Some(256));
        assert_eq!(settings.summary.max_output_tokens, Some(256));
    }
}
