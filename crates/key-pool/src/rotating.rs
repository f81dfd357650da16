//! One-shot failover wrapper around provider calls
//!
//! `RotatingClient` composes a `KeyPool` with a `Provider`. Each logical call
//! takes the pool's current key and runs the provider call with the pool lock
//! released. A quota failure marks the key, takes a fresh one, and retries
//! exactly once; the retry's outcome is final. Any other failure propagates
//! immediately and leaves the pool untouched.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use common::redact_hint;
use provider::{ErrorClassification, Provider, ProviderError, ProviderOptions};
use tracing::{debug, info, warn};

use crate::pool::KeyPool;
use crate::quota::{classify_error, is_quota_error};

/// Failure of a logical call, tagged by whether the failover already ran.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// First attempt failed with a non-quota error. Nothing was retried.
    #[error("provider call failed: {0}")]
    Provider(#[source] ProviderError),

    /// First attempt hit a quota failure, the key was rotated, and the single
    /// retry failed as well.
    #[error("provider call failed after key rotation: {0}")]
    RetryFailed(#[source] ProviderError),

    #[error("blocking runtime unavailable: {0}")]
    Runtime(String),
}

impl InvokeError {
    /// Whether the one-shot failover was spent on this call.
    pub fn was_retried(&self) -> bool {
        matches!(self, InvokeError::RetryFailed(_))
    }

    /// Whether the final failure is itself quota-shaped.
    pub fn is_quota(&self) -> bool {
        self.provider_error().is_some_and(is_quota_error)
    }

    /// The provider error that ended the call, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            InvokeError::Provider(e) | InvokeError::RetryFailed(e) => Some(e),
            InvokeError::Runtime(_) => None,
        }
    }
}

/// Provider client with key rotation on quota failures.
///
/// Cheap to share: wrap in `Arc` and hand the same instance to every caller.
pub struct RotatingClient {
    pool: Arc<KeyPool>,
    provider: Arc<dyn Provider>,
    last_key: Mutex<Option<String>>,
}

impl RotatingClient {
    pub fn new(pool: Arc<KeyPool>, provider: Arc<dyn Provider>) -> Self {
        Self {
            pool,
            provider,
            last_key: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Credential most recently handed to a provider call.
    pub fn last_key(&self) -> Option<String> {
        self.last_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `prompt` through the provider with one-shot quota failover.
    pub async fn invoke(
        &self,
        prompt: &str,
        options: &ProviderOptions,
    ) -> Result<String, InvokeError> {
        self.call_with_failover(|key| async move {
            self.provider.generate(&key, prompt, options).await
        })
        .await
    }

    /// Blocking form of [`invoke`](Self::invoke).
    ///
    /// Drives each attempt on a private current-thread runtime, so it must be
    /// called from threads with no tokio context; async callers use `invoke`.
    /// With a runtime handle present (including `spawn_blocking` threads) it
    /// fails with `InvokeError::Runtime` before selecting a key.
    pub fn invoke_blocking(
        &self,
        prompt: &str,
        options: &ProviderOptions,
    ) -> Result<String, InvokeError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(InvokeError::Runtime(
                "invoke_blocking called from async context".into(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| InvokeError::Runtime(e.to_string()))?;

        self.call_with_failover_blocking(|key| {
            runtime.block_on(self.provider.generate(&key, prompt, options))
        })
    }

    /// Apply the failover contract to an arbitrary async call taking a credential.
    ///
    /// `call` runs at most twice. The pool lock is never held while it runs.
    pub async fn call_with_failover<T, F, Fut>(&self, mut call: F) -> Result<T, InvokeError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = provider::Result<T>>,
    {
        let key = self.select_key();
        let err = match call(key.clone()).await {
            Ok(value) => return Ok(self.succeeded(value, "success")),
            Err(err) => err,
        };

        let retry_key = self.failover(&key, err)?;
        match call(retry_key).await {
            Ok(value) => Ok(self.succeeded(value, "recovered")),
            Err(err) => Err(self.retry_failed(err)),
        }
    }

    /// Blocking counterpart of [`call_with_failover`](Self::call_with_failover).
    pub fn call_with_failover_blocking<T, F>(&self, mut call: F) -> Result<T, InvokeError>
    where
        F: FnMut(String) -> provider::Result<T>,
    {
        let key = self.select_key();
        let err = match call(key.clone()) {
            Ok(value) => return Ok(self.succeeded(value, "success")),
            Err(err) => err,
        };

        let retry_key = self.failover(&key, err)?;
        match call(retry_key) {
            Ok(value) => Ok(self.succeeded(value, "recovered")),
            Err(err) => Err(self.retry_failed(err)),
        }
    }

    fn select_key(&self) -> String {
        let key = self.pool.current_key();
        *self.last_key.lock().unwrap_or_else(PoisonError::into_inner) = Some(key.clone());
        key
    }

    /// Decide what happens after a failed first attempt.
    ///
    /// Returns the key for the retry on a quota failure; otherwise the error
    /// is handed back untouched.
    fn failover(&self, failed_key: &str, err: ProviderError) -> Result<String, InvokeError> {
        if classify_error(&err) == ErrorClassification::Other {
            metrics::counter!("key_pool_calls_total", "outcome" => "failed").increment(1);
            debug!(
                provider = self.provider.id(),
                error = %err,
                "non-quota provider error, not retrying"
            );
            return Err(InvokeError::Provider(err));
        }

        warn!(
            provider = self.provider.id(),
            key = %redact_hint(failed_key),
            error = %err,
            "quota error detected, rotating API key"
        );
        if let Err(e) = self.pool.mark_key_failed(failed_key) {
            warn!(error = %e, "could not mark API key as failed");
        }
        metrics::counter!("key_pool_failovers_total").increment(1);

        let retry_key = self.select_key();
        info!(
            key = %redact_hint(&retry_key),
            "retrying with new API key"
        );
        Ok(retry_key)
    }

    fn succeeded<T>(&self, value: T, outcome: &'static str) -> T {
        metrics::counter!("key_pool_calls_total", "outcome" => outcome).increment(1);
        value
    }

    fn retry_failed(&self, err: ProviderError) -> InvokeError {
        metrics::counter!("key_pool_calls_total", "outcome" => "retry_failed").increment(1);
        warn!(
            provider = self.provider.id(),
            error = %err,
            "provider call failed after key rotation"
        );
        InvokeError::RetryFailed(err)
    }
}
