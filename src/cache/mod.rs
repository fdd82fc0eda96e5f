//! Session read cache
//!
//! An optional in-process cache in front of the session repository, built
//! on moka. It is never authoritative: every revocation is committed to the
//! store first and only then removed from here.
//!
//! Read-through inserts race with revocations. To keep a revoked session
//! from being cached again, every invalidation bumps an epoch under a lock,
//! and a reader may only insert if the epoch it saw before reading the store
//! is still current.

use crate::config::CacheConfig;
use crate::models::{IdentityId, Session};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Token-keyed cache of active sessions
pub struct SessionCache {
    cache: Cache<String, Session>,
    epoch: Mutex<u64>,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl SessionCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            epoch: Mutex::new(0),
        }
    }

    /// Build a cache from config, or `None` when caching is disabled
    pub fn from_config(config: &CacheConfig) -> Option<Arc<Self>> {
        if !config.enabled {
            return None;
        }
        Some(Arc::new(Self::new(
            config.capacity,
            Duration::from_secs(config.ttl_seconds),
        )))
    }

    /// Look up a cached session
    pub async fn get(&self, token: &str) -> Option<Session> {
        self.cache.get(token).await
    }

    /// Current invalidation epoch. Read this before querying the store.
    pub async fn epoch(&self) -> u64 {
        *self.epoch.lock().await
    }

    /// Cache `session` unless an invalidation happened after `observed`
    /// was read. Returns whether the entry was stored.
    pub async fn insert_if_current(&self, observed: u64, session: Session) -> bool {
        let epoch = self.epoch.lock().await;
        if *epoch != observed {
            return false;
        }
        self.cache.insert(session.token.clone(), session).await;
        true
    }

    /// Drop one token
    pub async fn invalidate(&self, token: &str) {
        let mut epoch = self.epoch.lock().await;
        *epoch += 1;
        self.cache.invalidate(token).await;
    }

    /// Drop every cached session of an identity
    pub async fn invalidate_identity(&self, identity_id: IdentityId) {
        let mut epoch = self.epoch.lock().await;
        *epoch += 1;
        let tokens: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(_, session)| session.identity_id == identity_id)
            .map(|(token, _)| token)
            .collect();
        for token in tokens {
            self.cache.invalidate(token.as_str()).await;
        }
    }

    /// Drop cached sessions that have expired at `now`
    pub async fn invalidate_expired(&self, now: DateTime<Utc>) {
        let mut epoch = self.epoch.lock().await;
        *epoch += 1;
        let tokens: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(_, session)| session.expires_at <= now)
            .map(|(token, _)| token)
            .collect();
        for token in tokens {
            self.cache.invalidate(token.as_str()).await;
        }
    }
}
