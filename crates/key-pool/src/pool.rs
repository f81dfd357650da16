//! Credential pool with cursor-based rotation and lazy cooldown expiry
//!
//! The pool holds the ordered credential list, a cursor naming the "current"
//! key, and a failure map from key to the instant it failed. There is no
//! background timer: every read first drops failure entries older than the
//! cooldown, so a key becomes usable again the first time anyone looks after
//! its window closes.
//!
//! All bookkeeping sits behind one `std::sync::Mutex`. The lock is taken for
//! pure in-memory work only and is never held across an `.await`, so a slow
//! provider call on one request cannot stall key selection for another.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::redact_hint;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Cooldown applied to a key after a quota failure.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Delimiter between credentials in the configuration string.
const KEY_DELIMITER: char = ',';

/// Point-in-time view of the pool, taken after purging expired failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub keys: Vec<String>,
    pub cursor: usize,
    /// Keys still inside their cooldown window, in pool order.
    pub cooling_down: Vec<String>,
    /// Time left in the cooldown window for each key in `cooling_down`.
    pub cooldown_remaining: HashMap<String, Duration>,
}

struct PoolState {
    keys: Vec<String>,
    cursor: usize,
    failures: HashMap<String, Instant>,
}

impl PoolState {
    /// Drop failure entries whose cooldown has elapsed.
    fn purge_expired(&mut self, now: Instant, cooldown: Duration) {
        self.failures
            .retain(|_, failed_at| now.saturating_duration_since(*failed_at) < cooldown);
    }

    fn remaining_cooldown(&self, key: &str, now: Instant, cooldown: Duration) -> Option<Duration> {
        self.failures
            .get(key)
            .map(|failed_at| cooldown.saturating_sub(now.saturating_duration_since(*failed_at)))
    }
}

/// Process-wide pool of provider API keys.
///
/// Built once at startup and shared via `Arc`. Cheap to query: every operation
/// is O(pool size) under a single lock.
pub struct KeyPool {
    state: Mutex<PoolState>,
    cooldown: Duration,
}

impl KeyPool {
    /// Build a pool from a comma-separated credential string with the default cooldown.
    pub fn from_config(keys: &str) -> Result<Self> {
        Self::with_cooldown(keys, DEFAULT_COOLDOWN)
    }

    /// Build a pool with an explicit cooldown.
    ///
    /// Entries are trimmed; blanks and exact duplicates are dropped. Fails with
    /// `Error::Configuration` if nothing usable remains.
    pub fn with_cooldown(keys: &str, cooldown: Duration) -> Result<Self> {
        let keys = parse_keys(keys);
        if keys.is_empty() {
            return Err(Error::Configuration("no API keys provided".into()));
        }
        info!(
            keys = keys.len(),
            cooldown_secs = cooldown.as_secs(),
            "initialized API key pool"
        );
        Ok(Self {
            state: Mutex::new(PoolState {
                keys,
                cursor: 0,
                failures: HashMap::new(),
            }),
            cooldown,
        })
    }

    /// Return the key to use for the next call.
    ///
    /// Scans from the cursor for the first key not cooling down, advancing the
    /// cursor past each cooling key it skips. If every key is cooling down, the
    /// key at the cursor is returned anyway: availability wins over quarantine.
    pub fn current_key(&self) -> String {
        let mut state = self.lock();
        state.purge_expired(Instant::now(), self.cooldown);

        let n = state.keys.len();
        for _ in 0..n {
            let idx = state.cursor;
            if !state.failures.contains_key(&state.keys[idx]) {
                return state.keys[idx].clone();
            }
            state.cursor = (idx + 1) % n;
        }

        metrics::counter!("key_pool_exhausted_total").increment(1);
        warn!(
            keys = n,
            key = %redact_hint(&state.keys[state.cursor]),
            "all API keys are in cooldown, using current key anyway"
        );
        state.keys[state.cursor].clone()
    }

    /// Quarantine `key` for the cooldown window and advance the cursor by one.
    ///
    /// A repeated failure overwrites the earlier timestamp. Keys that are not
    /// in the pool are rejected with `Error::UnknownKey` and change nothing.
    pub fn mark_key_failed(&self, key: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.keys.iter().any(|k| k == key) {
            warn!(key = %redact_hint(key), "refusing to mark unknown API key as failed");
            return Err(Error::UnknownKey(redact_hint(key)));
        }

        state.failures.insert(key.to_string(), Instant::now());
        let n = state.keys.len();
        state.cursor = (state.cursor + 1) % n;

        metrics::counter!("key_pool_keys_failed_total").increment(1);
        warn!(
            key = %redact_hint(key),
            cooldown_secs = self.cooldown.as_secs(),
            "API key marked as failed"
        );
        info!(
            next_key = %redact_hint(&state.keys[state.cursor]),
            "rotated to next API key"
        );
        Ok(())
    }

    /// Forget every recorded failure. The cursor stays where it is.
    pub fn reset_failures(&self) {
        let mut state = self.lock();
        let cleared = state.failures.len();
        state.failures.clear();
        info!(cleared, "all API key failures reset");
    }

    /// Number of keys in the pool. Constant for the pool's lifetime.
    pub fn len(&self) -> usize {
        self.lock().keys.len()
    }

    /// Always false: construction rejects empty key lists.
    pub fn is_empty(&self) -> bool {
        self.lock().keys.is_empty()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Copy of the current state, for tests and diagnostics.
    pub fn snapshot(&self) -> PoolSnapshot {
        let mut state = self.lock();
        let now = Instant::now();
        state.purge_expired(now, self.cooldown);

        let mut cooling_down = Vec::new();
        let mut cooldown_remaining = HashMap::new();
        for key in &state.keys {
            if let Some(remaining) = state.remaining_cooldown(key, now, self.cooldown) {
                cooling_down.push(key.clone());
                cooldown_remaining.insert(key.clone(), remaining);
            }
        }
        PoolSnapshot {
            keys: state.keys.clone(),
            cursor: state.cursor,
            cooling_down,
            cooldown_remaining,
        }
    }

    /// Pool health summary for the health endpoint.
    ///
    /// Keys are reported by redacted hint only. Status mapping: all available
    /// → healthy, some available → degraded, none available → unhealthy.
    pub fn health(&self) -> serde_json::Value {
        let mut state = self.lock();
        let now = Instant::now();
        state.purge_expired(now, self.cooldown);

        let mut keys = Vec::with_capacity(state.keys.len());
        let mut available = 0usize;
        for key in &state.keys {
            match state.remaining_cooldown(key, now, self.cooldown) {
                Some(remaining) => keys.push(serde_json::json!({
                    "key": redact_hint(key),
                    "status": "cooling_down",
                    "cooldown_remaining_secs": remaining.as_secs(),
                })),
                None => {
                    available += 1;
                    keys.push(serde_json::json!({
                        "key": redact_hint(key),
                        "status": "available",
                    }));
                }
            }
        }

        let total = state.keys.len();
        let status = if available == total {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "keys_total": total,
            "keys_available": available,
            "keys_cooling_down": total - available,
            "cooldown_secs": self.cooldown.as_secs(),
            "keys": keys,
        })
    }

    /// Every critical section leaves the state consistent, so a poisoned
    /// lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Split, trim, drop blanks and duplicates (first occurrence wins).
fn parse_keys(raw: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in raw.split(KEY_DELIMITER).map(str::trim) {
        if key.is_empty() {
            continue;
        }
        if keys.iter().any(|k| k == key) {
            debug!(key = %redact_hint(key), "dropping duplicate API key");
            continue;
        }
        keys.push(key.to_string());
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pool(keys: &str) -> KeyPool {
        KeyPool::from_config(keys).unwrap()
    }

    #[test]
    fn parses_trimmed_non_empty_keys() {
        let pool = pool("k1, k2 ,,k3");
        assert_eq!(pool.snapshot().keys, vec!["k1", "k2", "k3"]);
        assert_eq!(pool.len(), 3);
        assert!(!pool.is_empty());
    }

    #[test]
    fn only_separators_and_whitespace_is_configuration_error() {
        for raw in ["", " ", ",,,", " , ,\t, "] {
            let err = KeyPool::from_config(raw).err().expect("must fail");
            assert!(matches!(err, Error::Configuration(_)), "input {raw:?}");
        }
    }

    #[test]
    fn duplicate_keys_are_dropped() {
        let pool = pool("k1,k2,k1, k2 ,k3");
        assert_eq!(pool.snapshot().keys, vec!["k1", "k2", "k3"]);
    }

    #[test]
    fn default_cooldown_is_sixty_seconds() {
        assert_eq!(pool("k1").cooldown(), Duration::from_secs(60));
    }

    #[test]
    fn fresh_pool_returns_first_key_without_moving_cursor() {
        let pool = pool("k1,k2,k3");
        assert_eq!(pool.current_key(), "k1");
        assert_eq!(pool.current_key(), "k1");
        assert_eq!(pool.snapshot().cursor, 0);
    }

    #[test]
    fn failed_key_is_skipped_while_others_available() {
        let pool = pool("k1,k2");
        pool.mark_key_failed("k1").unwrap();

        for _ in 0..5 {
            assert_eq!(pool.current_key(), "k2");
        }
    }

    #[test]
    fn mark_failed_advances_cursor_by_one() {
        let pool = pool("k1,k2,k3");
        pool.mark_key_failed("k1").unwrap();
        assert_eq!(pool.snapshot().cursor, 1);
        pool.mark_key_failed("k2").unwrap();
        assert_eq!(pool.snapshot().cursor, 2);
        assert_eq!(pool.current_key(), "k3");
    }

    #[test]
    fn scan_advances_cursor_past_cooling_keys() {
        let pool = pool("k1,k2,k3");
        // Fail k2 and k3; cursor ends on k3 (index 2)
        pool.mark_key_failed("k2").unwrap();
        pool.mark_key_failed("k3").unwrap();
        assert_eq!(pool.snapshot().cursor, 2);

        // Scan skips k3, wraps to k1
        assert_eq!(pool.current_key(), "k1");
        assert_eq!(pool.snapshot().cursor, 0);
    }

    #[test]
    fn mark_failed_twice_overwrites_timestamp() {
        let pool = pool("k1,k2");
        pool.mark_key_failed("k1").unwrap();
        pool.mark_key_failed("k1").unwrap();
        assert_eq!(pool.snapshot().cooling_down, vec!["k1"]);
        // Cursor advanced twice and wrapped back to k1's slot
        assert_eq!(pool.snapshot().cursor, 0);
        assert_eq!(pool.current_key(), "k2");
    }

    #[test]
    fn unknown_key_is_rejected_without_side_effects() {
        let pool = pool("k1,k2");
        let err = pool.mark_key_failed("not-in-pool").unwrap_err();
        assert!(matches!(err, Error::UnknownKey(_)));

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.cursor, 0);
        assert!(snapshot.cooling_down.is_empty());
    }

    #[test]
    fn unknown_key_error_does_not_leak_value() {
        let pool = pool("k1");
        let err = pool
            .mark_key_failed("AIzaSySuperSecretValue123")
            .unwrap_err();
        assert!(!err.to_string().contains("SuperSecretValue123"), "got: {err}");
    }

    #[test]
    fn all_cooling_down_still_returns_pool_member() {
        let pool = pool("k1,k2,k3");
        for key in ["k1", "k2", "k3"] {
            pool.mark_key_failed(key).unwrap();
        }

        let key = pool.current_key();
        assert!(["k1", "k2", "k3"].contains(&key.as_str()), "got {key}");
        assert_eq!(pool.snapshot().cooling_down.len(), 3);
    }

    #[test]
    fn all_cooling_down_returns_key_at_cursor() {
        let pool = pool("k1,k2,k3");
        pool.mark_key_failed("k1").unwrap();
        pool.mark_key_failed("k2").unwrap();
        pool.mark_key_failed("k3").unwrap();
        // Three advances from 0 wraps back to 0
        assert_eq!(pool.current_key(), "k1");
        assert_eq!(pool.snapshot().cursor, 0);
    }

    #[test]
    fn single_key_pool_serves_despite_cooldown() {
        let pool = pool("only");
        pool.mark_key_failed("only").unwrap();
        assert_eq!(pool.snapshot().cursor, 0);
        assert_eq!(pool.current_key(), "only");
    }

    #[test]
    fn reset_clears_failures_but_keeps_cursor() {
        let pool = pool("k1,k2,k3");
        pool.mark_key_failed("k1").unwrap();
        pool.mark_key_failed("k2").unwrap();
        assert_eq!(pool.snapshot().cursor, 2);

        pool.reset_failures();

        let snapshot = pool.snapshot();
        assert!(snapshot.cooling_down.is_empty());
        assert_eq!(snapshot.cursor, 2);
        assert_eq!(pool.current_key(), "k3");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_key_returns_after_cooldown() {
        let pool = KeyPool::with_cooldown("k1,k2", Duration::from_secs(60)).unwrap();
        pool.mark_key_failed("k1").unwrap();
        assert_eq!(pool.current_key(), "k2");

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(pool.snapshot().cooling_down, vec!["k1"]);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(pool.snapshot().cooling_down.is_empty());

        // k1 is selectable again once k2 fails
        pool.mark_key_failed("k2").unwrap();
        assert_eq!(pool.current_key(), "k1");
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_lazy_and_per_key() {
        let pool = KeyPool::with_cooldown("k1,k2,k3", Duration::from_secs(30)).unwrap();
        pool.mark_key_failed("k1").unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        pool.mark_key_failed("k2").unwrap();
        tokio::time::advance(Duration::from_secs(15)).await;

        // k1 failed 35s ago (expired), k2 failed 15s ago (still cooling)
        assert_eq!(pool.snapshot().cooling_down, vec!["k2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_remaining_cooldown() {
        let pool = KeyPool::with_cooldown("k1,k2,k3", Duration::from_secs(60)).unwrap();
        pool.mark_key_failed("k1").unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        pool.mark_key_failed("k2").unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.cooling_down, vec!["k1", "k2"]);
        assert_eq!(snapshot.cooldown_remaining.len(), 2);
        assert_eq!(snapshot.cooldown_remaining["k1"], Duration::from_secs(35));
        assert_eq!(snapshot.cooldown_remaining["k2"], Duration::from_secs(55));
        assert!(!snapshot.cooldown_remaining.contains_key("k3"));

        pool.reset_failures();
        assert!(pool.snapshot().cooldown_remaining.is_empty());
    }

    #[test]
    fn zero_cooldown_never_quarantines() {
        let pool = KeyPool::with_cooldown("k1,k2", Duration::ZERO).unwrap();
        pool.mark_key_failed("k1").unwrap();
        assert!(pool.snapshot().cooling_down.is_empty());
        // Cursor still moved past k1
        assert_eq!(pool.current_key(), "k2");
    }

    #[test]
    fn health_all_available_is_healthy() {
        let health = pool("AIzaSyKeyNumberOne,AIzaSyKeyNumberTwo").health();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["keys_total"], 2);
        assert_eq!(health["keys_available"], 2);
        assert_eq!(health["cooldown_secs"], 60);
    }

    #[test]
    fn health_some_cooling_is_degraded_with_remaining_secs() {
        let pool = pool("k1,k2");
        pool.mark_key_failed("k1").unwrap();

        let health = pool.health();
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["keys_cooling_down"], 1);
        let keys = health["keys"].as_array().unwrap();
        assert_eq!(keys[0]["status"], "cooling_down");
        let remaining = keys[0]["cooldown_remaining_secs"].as_u64().unwrap();
        assert!(remaining > 0 && remaining <= 60, "got {remaining}");
        assert_eq!(keys[1]["status"], "available");
    }

    #[test]
    fn health_all_cooling_is_unhealthy() {
        let pool = pool("k1");
        pool.mark_key_failed("k1").unwrap();
        assert_eq!(pool.health()["status"], "unhealthy");
    }

    #[test]
    fn health_never_exposes_raw_keys() {
        let pool = pool("AIzaSyVerySecretKeyValue");
        let rendered = pool.health().to_string();
        assert!(!rendered.contains("VerySecretKeyValue"), "got: {rendered}");
    }

    #[test]
    fn concurrent_threads_keep_state_consistent() {
        let keys = ["k1", "k2", "k3", "k4", "k5"];
        let pool = Arc::new(pool(&keys.join(",")));

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let pool = Arc::clone(&pool);
                scope.spawn(move || {
                    for i in 0..500 {
                        let key = pool.current_key();
                        assert!(keys.contains(&key.as_str()));
                        if (i + worker) % 3 == 0 {
                            pool.mark_key_failed(&key).unwrap();
                        }
                        if i % 97 == 0 {
                            pool.reset_failures();
                        }
                    }
                });
            }
        });

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.keys, keys);
        assert!(snapshot.cursor < keys.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tasks_keep_state_consistent() {
        let pool = Arc::new(pool("a,b,c"));
        let mut handles = Vec::new();
        for task in 0..64 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let key = pool.current_key();
                if task % 2 == 0 {
                    pool.mark_key_failed(&key).unwrap();
                }
                tokio::task::yield_now().await;
                pool.current_key()
            }));
        }
        for handle in handles {
            let key = handle.await.unwrap();
            assert!(["a", "b", "c"].contains(&key.as_str()));
        }

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.keys, vec!["a", "b", "c"]);
        assert!(snapshot.cursor < 3);
    }
}
