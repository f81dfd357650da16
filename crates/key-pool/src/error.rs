//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable credential survived parsing. Fatal to AI features only.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("key not in pool: {0}")]
    UnknownKey(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
