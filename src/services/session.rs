//! Session manager
//!
//! Issues, resolves and revokes opaque session tokens.
//!
//! A session is `Active` until it expires or is revoked; both end states
//! are terminal. The store is the source of truth and every transition is
//! a single conditional update, so a `resolve` racing a `revoke` on the
//! same token either completes before the revoke or sees `Revoked`.

use crate::cache::SessionCache;
use crate::config::{ConfigError, ExpiryPolicy, SessionConfig, MAX_TOKEN_BYTES, MIN_TOKEN_BYTES};
use crate::db::repositories::{IdentityRepository, SessionRepository};
use crate::models::{IdentityId, Session, SessionState};
use crate::services::credential::SessionInvalidator;
use crate::services::error::AuthError;
use argon2::password_hash::rand_core::{OsRng, RngCore};
use async_trait::async_trait;
use chrono::Utc;
use data_encoding::BASE64URL_NOPAD;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Session manager
pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
    identities: Arc<dyn IdentityRepository>,
    config: SessionConfig,
    cache: Option<Arc<SessionCache>>,
}

impl SessionManager {
    /// Create a session manager with the given repositories
    ///
    /// Fails if `config` would issue tokens that cannot be resolved or
    /// could never store one.
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        identities: Arc<dyn IdentityRepository>,
        config: SessionConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            sessions,
            identities,
            config,
            cache: None,
        })
    }

    /// Attach a read cache. Ignored under sliding expiry, where every
    /// resolve writes to the store anyway.
    pub fn with_cache(mut self, cache: Option<Arc<SessionCache>>) -> Self {
        if cache.is_some() && self.config.expiry == ExpiryPolicy::Sliding {
            warn!("Session cache is not used with sliding expiry");
            self.cache = None;
        } else {
            self.cache = cache;
        }
        self
    }

    /// Issue a new session for an existing identity
    ///
    /// # Errors
    ///
    /// - `NotFound` if the identity does not exist
    /// - `Storage` if no unique token could be stored within the
    ///   configured number of attempts
    pub async fn issue(&self, identity_id: IdentityId) -> Result<Session, AuthError> {
        if self.identities.get_by_id(identity_id).await?.is_none() {
            return Err(AuthError::NotFound);
        }

        let now = Utc::now();
        let expires_at = now + self.config.ttl();

        for attempt in 1..=self.config.max_issue_attempts {
            let token = generate_token(self.config.token_bytes);
            let session = Session::new(token, identity_id, now, expires_at);

            if self.sessions.insert(&session).await? {
                debug!(identity_id, token_len = session.token.len(), "Session issued");
                return Ok(session);
            }
            warn!(identity_id, attempt, "Session token collision, retrying");
        }

        error!(identity_id, "Could not store a unique session token");
        Err(AuthError::Storage(anyhow::anyhow!(
            "Failed to generate a unique session token after {} attempts",
            self.config.max_issue_attempts
        )))
    }

    /// Resolve a token to the identity it was issued for
    ///
    /// Under sliding expiry a successful resolve pushes `expires_at` to
    /// `now + ttl`.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the token is malformed or unknown
    /// - `Expired` if the session passed its expiry
    /// - `Revoked` if the session was revoked
    pub async fn resolve(&self, token: &str) -> Result<IdentityId, AuthError> {
        if !is_well_formed(token) {
            return Err(AuthError::InvalidToken);
        }

        let now = Utc::now();

        if let Some(cache) = &self.cache {
            if let Some(session) = cache.get(token).await {
                if session.state_at(now) == SessionState::Active {
                    return Ok(session.identity_id);
                }
            }
        }

        // Read before the store so an invalidation during the read is noticed
        let epoch = match &self.cache {
            Some(cache) => Some(cache.epoch().await),
            None => None,
        };

        let session = self
            .sessions
            .get(token)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        check_state(&session, now)?;

        if self.config.expiry == ExpiryPolicy::Sliding {
            return self.slide(session).await;
        }

        if let (Some(cache), Some(epoch)) = (&self.cache, epoch) {
            cache.insert_if_current(epoch, session.clone()).await;
        }

        Ok(session.identity_id)
    }

    async fn slide(&self, session: Session) -> Result<IdentityId, AuthError> {
        let now = Utc::now();
        let expires_at = now + self.config.ttl();

        if self.sessions.refresh(&session.token, expires_at, now).await? {
            return Ok(session.identity_id);
        }

        // No row changed: either the session ended after our read, or a
        // concurrent resolve already pushed the expiry past ours
        let current = self
            .sessions
            .get(&session.token)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        check_state(&current, Utc::now())?;
        Ok(current.identity_id)
    }

    /// Revoke a session
    ///
    /// Revoking a session that is already revoked or expired succeeds.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the token is malformed or unknown
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        if !is_well_formed(token) {
            return Err(AuthError::InvalidToken);
        }

        let changed = self.sessions.revoke(token, Utc::now()).await?;
        if let Some(cache) = &self.cache {
            cache.invalidate(token).await;
        }

        if changed {
            debug!(token_len = token.len(), "Session revoked");
            return Ok(());
        }

        match self.sessions.get(token).await? {
            Some(_) => Ok(()),
            None => Err(AuthError::InvalidToken),
        }
    }

    /// Revoke every live session of an identity, returning how many
    pub async fn revoke_all(&self, identity_id: IdentityId) -> Result<u64, AuthError> {
        let count = self
            .sessions
            .revoke_by_identity(identity_id, Utc::now())
            .await?;
        if let Some(cache) = &self.cache {
            cache.invalidate_identity(identity_id).await;
        }

        info!(identity_id, count, "Revoked all sessions");
        Ok(count)
    }

    /// Delete every session whose expiry has passed, returning how many
    ///
    /// A session refreshed concurrently no longer matches the delete and
    /// survives.
    pub async fn sweep_expired(&self) -> Result<u64, AuthError> {
        let now = Utc::now();
        let removed = self.sessions.delete_expired(now).await?;
        if let Some(cache) = &self.cache {
            cache.invalidate_expired(now).await;
        }

        if removed > 0 {
            info!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    /// Sessions of an identity that are active right now, newest first
    pub async fn active_sessions(&self, identity_id: IdentityId) -> Result<Vec<Session>, AuthError> {
        let now = Utc::now();
        let sessions = self.sessions.list_by_identity(identity_id).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.state_at(now) == SessionState::Active)
            .collect())
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `period` until the
    /// returned task is aborted
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_expired().await {
                    error!("Session sweep failed: {}", e);
                }
            }
        })
    }
}

#[async_trait]
impl SessionInvalidator for SessionManager {
    async fn revoke_all(&self, identity_id: IdentityId) -> Result<u64, AuthError> {
        SessionManager::revoke_all(self, identity_id).await
    }
}

fn check_state(session: &Session, now: chrono::DateTime<Utc>) -> Result<(), AuthError> {
    match session.state_at(now) {
        SessionState::Active => Ok(()),
        SessionState::Expired => Err(AuthError::Expired),
        SessionState::Revoked => Err(AuthError::Revoked),
    }
}

/// `bytes` random bytes from the OS, base64url without padding
fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    BASE64URL_NOPAD.encode(&buf)
}

/// Whether `token` could have been produced by [`generate_token`]
fn is_well_formed(token: &str) -> bool {
    if token.len() > BASE64URL_NOPAD.encode_len(MAX_TOKEN_BYTES) {
        return false;
    }
    match BASE64URL_NOPAD.decode(token.as_bytes()) {
        Ok(raw) => (MIN_TOKEN_BYTES..=MAX_TOKEN_BYTES).contains(&raw.len()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        MemoryIdentityRepository, MemorySessionRepository, SqlxIdentityRepository,
        SqlxSessionRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::NewIdentity;
    use chrono::Duration as ChronoDuration;

    struct Harness {
        manager: Arc<SessionManager>,
        sessions: Arc<MemorySessionRepository>,
        identity_id: IdentityId,
    }

    async fn harness_with(config: SessionConfig, cache: Option<Arc<SessionCache>>) -> Harness {
        let sessions = Arc::new(MemorySessionRepository::new());
        let identities = Arc::new(MemoryIdentityRepository::with_sessions(sessions.clone()));
        let identity = identities
            .create(&NewIdentity::new("owner", "hash"))
            .await
            .unwrap()
            .unwrap();

        let manager = SessionManager::new(sessions.clone(), identities, config)
            .unwrap()
            .with_cache(cache);
        Harness {
            manager: Arc::new(manager),
            sessions,
            identity_id: identity.id,
        }
    }

    async fn harness() -> Harness {
        harness_with(SessionConfig::default(), None).await
    }

    fn sliding() -> SessionConfig {
        SessionConfig {
            expiry: ExpiryPolicy::Sliding,
            ..SessionConfig::default()
        }
    }

    fn test_cache() -> Option<Arc<SessionCache>> {
        Some(Arc::new(SessionCache::new(100, Duration::from_secs(60))))
    }

    /// Insert a well-formed session directly, bypassing issue()
    async fn plant(h: &Harness, expires_in: ChronoDuration) -> String {
        let token = generate_token(32);
        let now = Utc::now();
        h.sessions
            .insert(&Session::new(token.clone(), h.identity_id, now, now + expires_in))
            .await
            .unwrap();
        token
    }

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token(32);
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(generate_token(32), generate_token(32));
    }

    #[test]
    fn test_is_well_formed() {
        assert!(is_well_formed(&generate_token(16)));
        assert!(is_well_formed(&generate_token(64)));
        assert!(!is_well_formed(&generate_token(8)));
        assert!(!is_well_formed(&generate_token(65)));
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("not a token!"));
        assert!(!is_well_formed(&"A".repeat(10_000)));
    }

    #[tokio::test]
    async fn test_issue_then_resolve() {
        let h = harness().await;

        let session = h.manager.issue(h.identity_id).await.unwrap();

        assert_eq!(h.manager.resolve(&session.token).await.unwrap(), h.identity_id);
        assert_eq!(session.expires_at - session.created_at, ChronoDuration::days(7));
        assert_eq!(session.token.len(), 43);
    }

    #[tokio::test]
    async fn test_issue_honors_token_bytes() {
        let config = SessionConfig {
            token_bytes: 16,
            ..SessionConfig::default()
        };
        let h = harness_with(config, None).await;

        let session = h.manager.issue(h.identity_id).await.unwrap();
        assert_eq!(BASE64URL_NOPAD.decode(session.token.as_bytes()).unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_issue_unknown_identity() {
        let h = harness().await;
        assert!(matches!(
            h.manager.issue(h.identity_id + 1).await.unwrap_err(),
            AuthError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_issue_gives_up_after_collisions() {
        /// Claims every token is taken
        struct AlwaysTaken;

        #[async_trait]
        impl SessionRepository for AlwaysTaken {
            async fn insert(&self, _: &Session) -> anyhow::Result<bool> {
                Ok(false)
            }
            async fn get(&self, _: &str) -> anyhow::Result<Option<Session>> {
                Ok(None)
            }
            async fn refresh(
                &self,
                _: &str,
                _: chrono::DateTime<Utc>,
                _: chrono::DateTime<Utc>,
            ) -> anyhow::Result<bool> {
                Ok(false)
            }
            async fn revoke(&self, _: &str, _: chrono::DateTime<Utc>) -> anyhow::Result<bool> {
                Ok(false)
            }
            async fn revoke_by_identity(
                &self,
                _: IdentityId,
                _: chrono::DateTime<Utc>,
            ) -> anyhow::Result<u64> {
                Ok(0)
            }
            async fn delete_expired(&self, _: chrono::DateTime<Utc>) -> anyhow::Result<u64> {
                Ok(0)
            }
            async fn list_by_identity(&self, _: IdentityId) -> anyhow::Result<Vec<Session>> {
                Ok(Vec::new())
            }
        }

        let identities = Arc::new(MemoryIdentityRepository::new());
        let owner = identities
            .create(&NewIdentity::new("owner", "hash"))
            .await
            .unwrap()
            .unwrap();
        let manager =
            SessionManager::new(Arc::new(AlwaysTaken), identities, SessionConfig::default()).unwrap();

        let err = manager.issue(owner.id).await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let h = harness().await;

        assert!(matches!(
            h.manager.resolve("garbage!").await.unwrap_err(),
            AuthError::InvalidToken
        ));
        assert!(matches!(
            h.manager.resolve(&generate_token(32)).await.unwrap_err(),
            AuthError::InvalidToken
        ));

        let expired = plant(&h, -ChronoDuration::seconds(1)).await;
        assert!(matches!(
            h.manager.resolve(&expired).await.unwrap_err(),
            AuthError::Expired
        ));
    }

    #[tokio::test]
    async fn test_revoke_then_resolve() {
        let h = harness().await;
        let session = h.manager.issue(h.identity_id).await.unwrap();

        h.manager.revoke(&session.token).await.unwrap();

        assert!(matches!(
            h.manager.resolve(&session.token).await.unwrap_err(),
            AuthError::Revoked
        ));
        // Idempotent
        h.manager.revoke(&session.token).await.unwrap();
    }

    #[tokio::test]
    async fn test_revoke_expired_and_unknown() {
        let h = harness().await;
        let expired = plant(&h, -ChronoDuration::seconds(1)).await;

        h.manager.revoke(&expired).await.unwrap();
        assert!(matches!(
            h.manager.resolve(&expired).await.unwrap_err(),
            AuthError::Expired
        ));

        assert!(matches!(
            h.manager.revoke(&generate_token(32)).await.unwrap_err(),
            AuthError::InvalidToken
        ));
        assert!(matches!(
            h.manager.revoke("%%%").await.unwrap_err(),
            AuthError::InvalidToken
        ));
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let h = harness().await;
        let a = h.manager.issue(h.identity_id).await.unwrap();
        let b = h.manager.issue(h.identity_id).await.unwrap();
        let expired = plant(&h, -ChronoDuration::seconds(1)).await;

        assert_eq!(h.manager.revoke_all(h.identity_id).await.unwrap(), 2);

        for token in [&a.token, &b.token] {
            assert!(matches!(
                h.manager.resolve(token).await.unwrap_err(),
                AuthError::Revoked
            ));
        }
        assert!(matches!(
            h.manager.resolve(&expired).await.unwrap_err(),
            AuthError::Expired
        ));
        assert_eq!(h.manager.revoke_all(h.identity_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let h = harness().await;
        let live = h.manager.issue(h.identity_id).await.unwrap();
        plant(&h, -ChronoDuration::seconds(1)).await;
        plant(&h, -ChronoDuration::days(2)).await;

        assert_eq!(h.manager.sweep_expired().await.unwrap(), 2);
        assert_eq!(h.manager.resolve(&live.token).await.unwrap(), h.identity_id);
        assert_eq!(h.manager.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_active_sessions() {
        let h = harness().await;
        let a = h.manager.issue(h.identity_id).await.unwrap();
        let b = h.manager.issue(h.identity_id).await.unwrap();
        plant(&h, -ChronoDuration::seconds(1)).await;
        h.manager.revoke(&b.token).await.unwrap();

        let active = h.manager.active_sessions(h.identity_id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token, a.token);
    }

    #[tokio::test]
    async fn test_sliding_expiry_extends() {
        let h = harness_with(sliding(), None).await;
        let token = plant(&h, ChronoDuration::minutes(1)).await;
        let before = h.sessions.get(&token).await.unwrap().unwrap().expires_at;

        assert_eq!(h.manager.resolve(&token).await.unwrap(), h.identity_id);

        let after = h.sessions.get(&token).await.unwrap().unwrap().expires_at;
        assert!(after > before);
        assert!(after - Utc::now() > ChronoDuration::days(6));
    }

    #[tokio::test]
    async fn test_sliding_expiry_does_not_revive() {
        let h = harness_with(sliding(), None).await;
        let expired = plant(&h, -ChronoDuration::seconds(1)).await;
        let revoked = h.manager.issue(h.identity_id).await.unwrap();
        h.manager.revoke(&revoked.token).await.unwrap();

        assert!(matches!(
            h.manager.resolve(&expired).await.unwrap_err(),
            AuthError::Expired
        ));
        assert!(matches!(
            h.manager.resolve(&revoked.token).await.unwrap_err(),
            AuthError::Revoked
        ));
    }

    #[tokio::test]
    async fn test_fixed_expiry_does_not_extend() {
        let h = harness().await;
        let token = plant(&h, ChronoDuration::minutes(1)).await;
        let before = h.sessions.get(&token).await.unwrap().unwrap().expires_at;

        h.manager.resolve(&token).await.unwrap();

        assert_eq!(h.sessions.get(&token).await.unwrap().unwrap().expires_at, before);
    }

    #[tokio::test]
    async fn test_cache_never_serves_revoked() {
        let h = harness_with(SessionConfig::default(), test_cache()).await;
        let session = h.manager.issue(h.identity_id).await.unwrap();

        // Warm the cache
        h.manager.resolve(&session.token).await.unwrap();
        h.manager.resolve(&session.token).await.unwrap();

        h.manager.revoke(&session.token).await.unwrap();
        assert!(matches!(
            h.manager.resolve(&session.token).await.unwrap_err(),
            AuthError::Revoked
        ));

        let other = h.manager.issue(h.identity_id).await.unwrap();
        h.manager.resolve(&other.token).await.unwrap();
        h.manager.revoke_all(h.identity_id).await.unwrap();
        assert!(matches!(
            h.manager.resolve(&other.token).await.unwrap_err(),
            AuthError::Revoked
        ));
    }

    #[tokio::test]
    async fn test_cache_ignored_under_sliding_expiry() {
        let h = harness_with(sliding(), test_cache()).await;
        assert!(h.manager.cache.is_none());
    }

    /// Race 32 resolves against one revoke. A resolve that starts after the
    /// revoke returned must see `Revoked`; one that overlaps it may see
    /// either outcome, and nothing else.
    async fn race_resolve_and_revoke(manager: Arc<SessionManager>, identity_id: IdentityId) {
        use std::sync::atomic::{AtomicBool, Ordering};

        let token = manager.issue(identity_id).await.unwrap().token;
        let barrier = Arc::new(tokio::sync::Barrier::new(33));
        let revoked = Arc::new(AtomicBool::new(false));

        let mut readers = Vec::new();
        for _ in 0..32 {
            let manager = manager.clone();
            let token = token.clone();
            let barrier = barrier.clone();
            let revoked = revoked.clone();
            readers.push(tokio::spawn(async move {
                barrier.wait().await;
                let mut outcomes = Vec::new();
                for _ in 0..8 {
                    let after_revoke = revoked.load(Ordering::SeqCst);
                    outcomes.push((after_revoke, manager.resolve(&token).await));
                    tokio::task::yield_now().await;
                }
                outcomes
            }));
        }
        let revoker = {
            let manager = manager.clone();
            let token = token.clone();
            let barrier = barrier.clone();
            let revoked = revoked.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                let result = manager.revoke(&token).await;
                revoked.store(true, Ordering::SeqCst);
                result
            })
        };

        for reader in readers {
            for (after_revoke, outcome) in reader.await.unwrap() {
                match outcome {
                    Ok(id) if !after_revoke => assert_eq!(id, identity_id),
                    Ok(_) => panic!("resolved after revoke returned"),
                    Err(AuthError::Revoked) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
        }
        revoker.await.unwrap().unwrap();

        assert!(matches!(
            manager.resolve(&token).await.unwrap_err(),
            AuthError::Revoked
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolve_and_revoke_linearizable() {
        for _ in 0..10 {
            let h = harness().await;
            race_resolve_and_revoke(h.manager.clone(), h.identity_id).await;

            let h = harness_with(SessionConfig::default(), test_cache()).await;
            race_resolve_and_revoke(h.manager.clone(), h.identity_id).await;

            let h = harness_with(sliding(), None).await;
            race_resolve_and_revoke(h.manager.clone(), h.identity_id).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolve_and_revoke_linearizable_sqlite() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let identities = SqlxIdentityRepository::boxed(pool.clone());
        let owner = identities
            .create(&NewIdentity::new("owner", "hash"))
            .await
            .unwrap()
            .unwrap();

        for config in [SessionConfig::default(), sliding()] {
            for _ in 0..5 {
                let manager = SessionManager::new(
                    SqlxSessionRepository::boxed(pool.clone()),
                    identities.clone(),
                    config.clone(),
                )
                .unwrap();
                race_resolve_and_revoke(Arc::new(manager), owner.id).await;
            }
        }
    }

    #[tokio::test]
    async fn test_new_rejects_unusable_config() {
        let sessions = Arc::new(MemorySessionRepository::new());
        let identities = Arc::new(MemoryIdentityRepository::new());

        for config in [
            SessionConfig {
                token_bytes: 8,
                ..SessionConfig::default()
            },
            SessionConfig {
                token_bytes: MAX_TOKEN_BYTES + 1,
                ..SessionConfig::default()
            },
            SessionConfig {
                max_issue_attempts: 0,
                ..SessionConfig::default()
            },
            SessionConfig {
                ttl_seconds: 0,
                ..SessionConfig::default()
            },
        ] {
            assert!(matches!(
                SessionManager::new(sessions.clone(), identities.clone(), config),
                Err(ConfigError::ValidationError(_))
            ));
        }

        let edge = SessionConfig {
            token_bytes: MIN_TOKEN_BYTES,
            max_issue_attempts: 1,
            ..SessionConfig::default()
        };
        assert!(SessionManager::new(sessions, identities, edge).is_ok());
    }

    #[tokio::test]
    async fn test_sweeper_task_runs() {
        let h = harness().await;
        plant(&h, -ChronoDuration::seconds(1)).await;

        let handle = h.manager.clone().spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(h
            .manager
            .active_sessions(h.identity_id)
            .await
            .unwrap()
            .is_empty());
        assert!(h.sessions.list_by_identity(h.identity_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_outage_propagates() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let identities = SqlxIdentityRepository::boxed(pool.clone());
        let owner = identities
            .create(&NewIdentity::new("owner", "hash"))
            .await
            .unwrap()
            .unwrap();
        let manager = SessionManager::new(
            SqlxSessionRepository::boxed(pool.clone()),
            identities,
            SessionConfig::default(),
        )
        .unwrap();
        let session = manager.issue(owner.id).await.unwrap();
        assert_eq!(manager.resolve(&session.token).await.unwrap(), owner.id);

        pool.close().await;

        assert!(matches!(
            manager.resolve(&session.token).await.unwrap_err(),
            AuthError::Storage(_)
        ));
        assert!(matches!(
            manager.revoke(&session.token).await.unwrap_err(),
            AuthError::Storage(_)
        ));
        assert!(matches!(
            manager.sweep_expired().await.unwrap_err(),
            AuthError::Storage(_)
        ));
    }

    #[tokio::test]
    async fn test_sqlite_revoke_all_on_credential_change_flow() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let identities = SqlxIdentityRepository::boxed(pool.clone());
        let owner = identities
            .create(&NewIdentity::new("owner", "hash"))
            .await
            .unwrap()
            .unwrap();
        let manager = SessionManager::new(
            SqlxSessionRepository::boxed(pool),
            identities,
            SessionConfig::default(),
        )
        .unwrap();

        let tokens: Vec<String> = {
            let mut tokens = Vec::new();
            for _ in 0..3 {
                tokens.push(manager.issue(owner.id).await.unwrap().token);
            }
            tokens
        };

        let invalidator: &dyn SessionInvalidator = &manager;
        assert_eq!(invalidator.revoke_all(owner.id).await.unwrap(), 3);

        for token in &tokens {
            assert!(matches!(
                manager.resolve(token).await.unwrap_err(),
                AuthError::Revoked
            ));
        }
    }
}
