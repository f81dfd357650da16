//! Shared types for the AI gateway workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, redact_hint};
