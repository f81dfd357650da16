//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Gemini API keys are loaded from the GEMINI_API_KEYS env var or
//! api_keys_file, never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var holding the comma-separated Gemini API keys.
pub const API_KEYS_ENV: &str = "GEMINI_API_KEYS";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Generative-AI provider settings
#[derive(Debug, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// How long a key that hit quota is skipped.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_intent_temperature")]
    pub intent_temperature: f32,
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,
    #[serde(default = "default_summary_language")]
    pub summary_language: String,
    /// Upper bound on generated tokens per call. Unset leaves the model default.
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// Path to a file containing comma-separated keys (alternative to GEMINI_API_KEYS)
    #[serde(default)]
    pub api_keys_file: Option<PathBuf>,
    #[serde(skip)]
    pub api_keys: Option<Secret<String>>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
            cooldown_secs: default_cooldown(),
            intent_temperature: default_intent_temperature(),
            summary_temperature: default_summary_temperature(),
            summary_language: default_summary_language(),
            max_output_tokens: None,
            api_keys_file: None,
            api_keys: None,
        }
    }
}

impl GeminiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_base_url() -> String {
    provider::DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_cooldown() -> u64 {
    key_pool::DEFAULT_COOLDOWN.as_secs()
}

fn default_intent_temperature() -> f32 {
    0.1
}

fn default_summary_temperature() -> f32 {
    0.3
}

fn default_summary_language() -> String {
    "Vietnamese".to_string()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// API key resolution order:
    /// 1. GEMINI_API_KEYS env var
    /// 2. api_keys_file path from config
    ///
    /// A blank env var counts as unset. Missing keys are not an error here:
    /// the service starts with AI features disabled.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        let env_keys = std::env::var(API_KEYS_ENV)
            .ok()
            .filter(|keys| !keys.trim().is_empty());

        if let Some(keys) = env_keys {
            config.gemini.api_keys = Some(Secret::new(keys));
        } else if let Some(ref keys_file) = config.gemini.api_keys_file {
            let keys = std::fs::read_to_string(keys_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read api_keys_file {}: {e}",
                    keys_file.display()
                ))
            })?;
            let keys = keys.trim().to_owned();
            if !keys.is_empty() {
                config.gemini.api_keys = Some(Secret::new(keys));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.gemini.base_url.starts_with("http://")
            && !self.gemini.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.gemini.base_url
            )));
        }
        if self.gemini.timeout_secs == 0 {
            return Err(common::Error::config("timeout_secs must be greater than 0"));
        }
        if self.gemini.cooldown_secs == 0 {
            return Err(common::Error::config("cooldown_secs must be greater than 0"));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::config(
                "max_connections must be greater than 0",
            ));
        }
        for (name, value) in [
            ("intent_temperature", self.gemini.intent_temperature),
            ("summary_temperature", self.gemini.summary_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(common::Error::Config(format!(
                    "{name} must be between 0 and 2, got: {value}"
                )));
            }
        }
        if self.gemini.max_output_tokens == Some(0) {
            return Err(common::Error::config(
                "max_output_tokens must be greater than 0",
            ));
        }
        if self.gemini.model.trim().is_empty() {
            return Err(common::Error::config("model must not be empty"));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("ai-gateway.toml")
    }
}
