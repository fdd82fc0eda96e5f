//! Rate limiter for login attempts
//!
//! Protects against credential guessing by counting failed logins per
//! normalized login key inside a sliding window.

use crate::config::ThrottleConfig;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Login rate limiter
pub struct LoginRateLimiter {
    /// Failed login attempts by login key
    attempts: Arc<RwLock<HashMap<String, Vec<DateTime<Utc>>>>>,
    max_attempts: usize,
    window: Duration,
}

impl LoginRateLimiter {
    /// Create a new rate limiter
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Arc::new(RwLock::new(HashMap::new())),
            max_attempts,
            window,
        }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(config.max_attempts, Duration::seconds(config.window_seconds))
    }

    /// Check if a login key has used up its failures for the window
    pub async fn is_limited(&self, login_key: &str) -> bool {
        let mut attempts = self.attempts.write().await;
        let cutoff = Utc::now() - self.window;

        let key_attempts = match attempts.get_mut(login_key) {
            Some(times) => times,
            None => return false,
        };

        // Remove old attempts
        key_attempts.retain(|time| *time > cutoff);

        key_attempts.len() >= self.max_attempts
    }

    /// Count an attempt against `login_key` unless it is already limited
    ///
    /// The check and the count happen under one lock, so concurrent
    /// attempts cannot overshoot `max_attempts`. Returns the recorded
    /// timestamp, or `None` when limited. A successful attempt should
    /// [`clear`](Self::clear) the key; one that ended for a reason other
    /// than bad credentials should be handed back to
    /// [`cancel_attempt`](Self::cancel_attempt).
    pub async fn begin_attempt(&self, login_key: &str) -> Option<DateTime<Utc>> {
        let mut attempts = self.attempts.write().await;
        let now = Utc::now();
        let cutoff = now - self.window;

        let key_attempts = attempts.entry(login_key.to_string()).or_default();
        key_attempts.retain(|time| *time > cutoff);
        if key_attempts.len() >= self.max_attempts {
            return None;
        }
        key_attempts.push(now);
        Some(now)
    }

    /// Uncount an attempt recorded by [`begin_attempt`](Self::begin_attempt)
    pub async fn cancel_attempt(&self, login_key: &str, started: DateTime<Utc>) {
        let mut attempts = self.attempts.write().await;
        if let Some(times) = attempts.get_mut(login_key) {
            if let Some(pos) = times.iter().position(|time| *time == started) {
                times.remove(pos);
            }
            if times.is_empty() {
                attempts.remove(login_key);
            }
        }
    }

    /// Clear failed attempts (on successful login)
    pub async fn clear(&self, login_key: &str) {
        self.attempts.write().await.remove(login_key);
    }

    /// Clean up old entries (should be called periodically)
    pub async fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - self.window;
        let mut attempts = self.attempts.write().await;
        let before = attempts.len();
        attempts.retain(|_, times| {
            times.retain(|time| *time > cutoff);
            !times.is_empty()
        });
        before - attempts.len()
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::from_config(&ThrottleConfig::default())
    }
}
