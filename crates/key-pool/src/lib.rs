//! API key rotation and failover for a quota-limited generative-AI provider
//!
//! Holds a pool of provider credentials, hands out a usable one per call, and
//! quarantines keys that hit quota or rate limits for a cooldown window. The
//! `RotatingClient` wraps any provider call with a one-shot failover: on a
//! quota failure it marks the key, takes the next one, and retries exactly once.
//!
//! Key lifecycle:
//! 1. Pool built once at startup from a comma-separated credential string
//! 2. `current_key` returns the first key at or after the cursor not cooling down
//! 3. Provider call fails with a quota message → `mark_key_failed`, cursor advances
//! 4. Cooldown expires → entry purged lazily on the next read, key usable again
//! 5. Every key cooling down → the cursor key is served anyway, with a warning

pub mod error;
pub mod pool;
pub mod quota;
pub mod rotating;

pub use error::{Error, Result};
pub use pool::{DEFAULT_COOLDOWN, KeyPool, PoolSnapshot};
pub use quota::{QUOTA_PATTERNS, classify_error, is_quota_error, is_quota_message};
pub use rotating::{InvokeError, RotatingClient};
