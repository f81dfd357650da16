//! Secret wrapper for credentials
//!
//! Provider API keys travel through configuration and logs. `Secret` keeps the
//! raw value out of Debug/Display output and wipes it on drop; `redact_hint`
//! produces a short, stable label for log lines that must identify a key.

use std::fmt;
use zeroize::Zeroize;

/// Number of leading characters kept by `redact_hint`.
const HINT_PREFIX_LEN: usize = 6;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Loggable hint for a credential: a short prefix plus the total length.
///
/// Keys shorter than twice the prefix are fully masked.
pub fn redact_hint(value: &str) -> String {
    let len = value.chars().count();
    if len < HINT_PREFIX_LEN * 2 {
        return format!("***({len} chars)");
    }
    let prefix: String = value.chars().take(HINT_PREFIX_LEN).collect();
    format!("{prefix}***({len} chars)")
}
