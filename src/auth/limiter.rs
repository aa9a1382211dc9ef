//! Login attempt accounting and lockout.
//!
//! Counters are keyed by normalized credential key. A key is locked once it
//! reaches the maximum number of consecutive failures, until the lockout
//! window has elapsed since its last failed attempt. At that point the
//! counter is discarded entirely.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credential::normalize_key;
use super::session::{LOCKOUT_DURATION_SECS, MAX_LOGIN_ATTEMPTS};
use crate::clock::elapsed_millis;

/// Consecutive failures for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptCounter {
    /// Failed attempts since the last reset.
    pub count: u32,
    /// Time of the most recent failure.
    pub last_attempt_at: DateTime<Utc>,
}

/// Result of a lockout check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitResult {
    /// Verification may proceed.
    Allowed,
    /// The window elapsed and the counter was discarded; verification may
    /// proceed and the counters should be persisted.
    Reset,
    /// Locked for the given whole seconds (rounded up).
    Locked(u64),
}

/// Per-key failure counters with a fixed lockout policy.
#[derive(Debug, Clone)]
pub struct LoginLimiter {
    counters: HashMap<String, AttemptCounter>,
    max_attempts: u32,
    lockout_ms: i64,
}

impl Default for LoginLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginLimiter {
    /// Create a limiter with the default policy (5 attempts, 15 minutes).
    pub fn new() -> Self {
        Self::with_config(MAX_LOGIN_ATTEMPTS, LOCKOUT_DURATION_SECS)
    }

    /// Create a limiter with a custom policy.
    pub fn with_config(max_attempts: u32, lockout_secs: u64) -> Self {
        Self {
            counters: HashMap::new(),
            max_attempts,
            lockout_ms: i64::try_from(lockout_secs.saturating_mul(1000)).unwrap_or(i64::MAX),
        }
    }

    /// Maximum failures before lockout.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Check whether `key` may attempt verification at `now`.
    pub fn check(&mut self, key: &str, now: DateTime<Utc>) -> LimitResult {
        let key = normalize_key(key);
        let Some(counter) = self.counters.get(&key).copied() else {
            return LimitResult::Allowed;
        };

        let elapsed = elapsed_millis(counter.last_attempt_at, now);
        if counter.count >= self.max_attempts && elapsed < self.lockout_ms {
            let remaining_ms = self.lockout_ms - elapsed;
            let remaining_secs = (remaining_ms + 999) / 1000;
            return LimitResult::Locked(u64::try_from(remaining_secs).unwrap_or(0));
        }

        if elapsed >= self.lockout_ms {
            self.counters.remove(&key);
            debug!(key = %key, "Lockout window elapsed, counter reset");
            return LimitResult::Reset;
        }

        LimitResult::Allowed
    }

    /// Record a failed attempt. Returns the new count.
    pub fn record_failure(&mut self, key: &str, now: DateTime<Utc>) -> u32 {
        let key = normalize_key(key);
        let counter = self.counters.entry(key.clone()).or_insert(AttemptCounter {
            count: 0,
            last_attempt_at: now,
        });
        counter.count = counter.count.saturating_add(1);
        counter.last_attempt_at = now;

        debug!(key = %key, attempt_count = counter.count, "Recorded failed login attempt");
        counter.count
    }

    /// Attempts left before lockout for a given failure count.
    pub fn remaining_attempts(&self, count: u32) -> u32 {
        self.max_attempts.saturating_sub(count)
    }

    /// Clear the counter for a key. Returns whether one existed.
    pub fn clear(&mut self, key: &str) -> bool {
        self.counters.remove(&normalize_key(key)).is_some()
    }

    /// Current failure count for a key.
    pub fn attempt_count(&self, key: &str) -> u32 {
        self.counters
            .get(&normalize_key(key))
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Failure count for a key whose window has not elapsed at `now`.
    pub fn active_count(&self, key: &str, now: DateTime<Utc>) -> u32 {
        self.counters
            .get(&normalize_key(key))
            .filter(|c| elapsed_millis(c.last_attempt_at, now) < self.lockout_ms)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Put back a counter snapshot taken with [`counter`](Self::counter).
    pub fn restore(&mut self, key: &str, snapshot: Option<AttemptCounter>) {
        let key = normalize_key(key);
        match snapshot {
            Some(counter) => {
                self.counters.insert(key, counter);
            }
            None => {
                self.counters.remove(&key);
            }
        }
    }

    /// Number of keys with a counter.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether no key has a counter.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Counter for a key, if any.
    pub fn counter(&self, key: &str) -> Option<&AttemptCounter> {
        self.counters.get(&normalize_key(key))
    }

    /// Drop counters whose window has elapsed. Returns how many were removed.
    pub fn cleanup(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.counters.len();
        let lockout_ms = self.lockout_ms;
        self.counters
            .retain(|_, c| elapsed_millis(c.last_attempt_at, now) < lockout_ms);
        before - self.counters.len()
    }

    /// Replace all counters, e.g. with ones loaded from the session store.
    pub fn load(&mut self, counters: HashMap<String, AttemptCounter>) {
        self.counters = counters
            .into_iter()
            .map(|(k, v)| (normalize_key(&k), v))
            .collect();
    }

    /// Serialize the counters for the session store.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.counters)
    }

    /// Decode stored counters.
    pub fn parse_counters(raw: &str) -> serde_json::Result<HashMap<String, AttemptCounter>> {
        serde_json::from_str(raw)
    }
}
