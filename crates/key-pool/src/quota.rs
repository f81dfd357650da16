//! Quota detection for provider failures
//!
//! The provider reports quota and rate-limit exhaustion only through its error
//! text, so classification is substring matching on the lowercased message.
//! `QUOTA_PATTERNS` is the single list every call site goes through.

use std::fmt::Display;

use provider::ErrorClassification;

/// Lowercase substrings that mark a failure as quota or rate-limit exhaustion.
pub const QUOTA_PATTERNS: &[&str] = &["quota", "rate limit", "429", "resource exhausted"];

/// Whether an error message names a quota or rate-limit failure (case-insensitive).
pub fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Whether an error's display text names a quota or rate-limit failure.
pub fn is_quota_error<E: Display + ?Sized>(err: &E) -> bool {
    is_quota_message(&err.to_string())
}

/// Classify an error for the failover decision.
pub fn classify_error<E: Display + ?Sized>(err: &E) -> ErrorClassification {
    if is_quota_error(err) {
        ErrorClassification::QuotaExceeded
    } else {
        ErrorClassification::Other
    }
}
