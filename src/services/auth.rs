//! Authenticator
//!
//! The login/logout surface a request layer calls. Combines the credential
//! store, the session manager and login throttling:
//! - `login`: throttle check, verify, issue
//! - `logout`: revoke the presented token
//! - `authenticate`: token to identity
//! - `change_credential`: re-verify, replace, sign out everywhere, issue anew

use crate::models::{normalize_login_key, Identity, IdentityId, Session};
use crate::services::credential::CredentialStore;
use crate::services::error::AuthError;
use crate::services::rate_limiter::LoginRateLimiter;
use crate::services::session::SessionManager;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Input for login
#[derive(Clone)]
pub struct LoginInput {
    pub login_key: String,
    pub credential: String,
}

impl LoginInput {
    /// Create a new login input
    pub fn new(login_key: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            login_key: login_key.into(),
            credential: credential.into(),
        }
    }
}

impl fmt::Debug for LoginInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginInput")
            .field("login_key", &self.login_key)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Login facade over the credential store and session manager
pub struct Authenticator {
    credentials: Arc<CredentialStore>,
    sessions: Arc<SessionManager>,
    limiter: Arc<LoginRateLimiter>,
}

impl Authenticator {
    pub fn new(
        credentials: Arc<CredentialStore>,
        sessions: Arc<SessionManager>,
        limiter: Arc<LoginRateLimiter>,
    ) -> Self {
        Self {
            credentials,
            sessions,
            limiter,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn limiter(&self) -> &Arc<LoginRateLimiter> {
        &self.limiter
    }

    /// Verify a credential and issue a session
    ///
    /// # Errors
    ///
    /// - `RateLimited` if the login key has too many recent failures
    /// - `NotFound` / `AuthenticationFailed` from verification; callers
    ///   should show [`AuthError::public_message`] for both
    /// - `AuthenticationFailed` if the credential was changed while the
    ///   session was being issued
    pub async fn login(&self, input: LoginInput) -> Result<Session, AuthError> {
        let login_key = normalize_login_key(&input.login_key);

        let started = match self.limiter.begin_attempt(&login_key).await {
            Some(started) => started,
            None => {
                warn!("Login throttled");
                return Err(AuthError::RateLimited);
            }
        };

        let identity = match self
            .credentials
            .verify_identity(&login_key, &input.credential)
            .await
        {
            Ok(identity) => identity,
            Err(e @ (AuthError::NotFound | AuthError::AuthenticationFailed)) => return Err(e),
            Err(e) => {
                self.limiter.cancel_attempt(&login_key, started).await;
                return Err(e);
            }
        };

        self.limiter.clear(&login_key).await;
        let session = self
            .issue_for_current(identity.id, &input.credential, Some(&identity.credential_secret))
            .await?;
        info!(identity_id = identity.id, "Login succeeded");
        Ok(session)
    }

    /// Issue a session, then make sure `plaintext` was not superseded in
    /// the meantime
    ///
    /// A credential change revokes sessions only after storing the new
    /// secret. If the stored secret still accepts `plaintext` after the
    /// insert, any later change will revoke this session too. Otherwise
    /// the session is revoked here.
    async fn issue_for_current(
        &self,
        identity_id: IdentityId,
        plaintext: &str,
        verified_secret: Option<&str>,
    ) -> Result<Session, AuthError> {
        let session = self.sessions.issue(identity_id).await?;

        let current = match self
            .credentials
            .is_current(identity_id, plaintext, verified_secret)
            .await
        {
            Ok(current) => current,
            Err(e) => {
                if let Err(revoke_err) = self.sessions.revoke(&session.token).await {
                    warn!(identity_id, "Failed to revoke unconfirmed session: {}", revoke_err);
                }
                return Err(e);
            }
        };

        if !current {
            self.sessions.revoke(&session.token).await?;
            warn!(identity_id, "Credential changed during sign-in, session revoked");
            return Err(AuthError::AuthenticationFailed);
        }

        Ok(session)
    }

    /// Revoke the presented session
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.sessions.revoke(token).await
    }

    /// Resolve a token to its identity record
    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let identity_id = self.sessions.resolve(token).await?;
        // Sessions cascade with their identity, so a miss means it was just removed
        self.credentials
            .get(identity_id)
            .await?
            .ok_or(AuthError::InvalidToken)
    }

    /// Change the credential of the signed-in identity
    ///
    /// Every existing session, including the presented one, is revoked.
    /// Returns a fresh session for the caller.
    pub async fn change_credential(
        &self,
        token: &str,
        current: &str,
        new: &str,
    ) -> Result<Session, AuthError> {
        let identity = self.authenticate(token).await?;
        self.credentials.verify(&identity.login_key, current).await?;
        self.credentials.update_credential(identity.id, new).await?;
        self.issue_for_current(identity.id, new, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialPolicy, SessionConfig};
    use crate::db::repositories::{
        MemoryIdentityRepository, MemorySessionRepository, SessionRepository,
        SqlxIdentityRepository, SqlxSessionRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::services::password::test_hasher;
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;

    fn build(
        identities: Arc<dyn crate::db::repositories::IdentityRepository>,
        sessions: Arc<dyn crate::db::repositories::SessionRepository>,
    ) -> Authenticator {
        let manager = Arc::new(
            SessionManager::new(sessions, identities.clone(), SessionConfig::default()).unwrap(),
        );
        let store = Arc::new(CredentialStore::new(
            identities,
            Arc::new(test_hasher()),
            CredentialPolicy::default(),
            manager.clone(),
        ));
        Authenticator::new(
            store,
            manager,
            Arc::new(LoginRateLimiter::new(3, Duration::minutes(15))),
        )
    }

    fn setup() -> Authenticator {
        let sessions = Arc::new(MemorySessionRepository::new());
        let identities = Arc::new(MemoryIdentityRepository::with_sessions(sessions.clone()));
        build(identities, sessions)
    }

    async fn setup_sqlite() -> Authenticator {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        build(
            SqlxIdentityRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool),
        )
    }

    #[test]
    fn test_login_input_debug_redacts_credential() {
        let input = LoginInput::new("alice", "hunter2");
        let debug = format!("{:?}", input);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_login_authenticate_logout() {
        let auth = setup();
        let id = auth.credentials().register("a@example.com", "pw").await.unwrap();

        let session = auth.login(LoginInput::new("A@example.com", "pw")).await.unwrap();
        assert_eq!(session.identity_id, id);

        let identity = auth.authenticate(&session.token).await.unwrap();
        assert_eq!(identity.id, id);
        assert_eq!(identity.login_key, "a@example.com");

        auth.logout(&session.token).await.unwrap();
        assert!(matches!(
            auth.authenticate(&session.token).await.unwrap_err(),
            AuthError::Revoked
        ));
    }

    #[tokio::test]
    async fn test_login_failures() {
        let auth = setup();
        auth.credentials().register("a", "pw").await.unwrap();

        assert!(matches!(
            auth.login(LoginInput::new("a", "nope")).await.unwrap_err(),
            AuthError::AuthenticationFailed
        ));
        assert!(matches!(
            auth.login(LoginInput::new("b", "pw")).await.unwrap_err(),
            AuthError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_login_throttled_after_failures() {
        let auth = setup();
        auth.credentials().register("a", "pw").await.unwrap();

        for _ in 0..3 {
            let _ = auth.login(LoginInput::new("a", "wrong")).await;
        }

        // Even the right credential is refused while throttled
        assert!(matches!(
            auth.login(LoginInput::new("A", "pw")).await.unwrap_err(),
            AuthError::RateLimited
        ));

        auth.limiter().clear("a").await;
        assert!(auth.login(LoginInput::new("a", "pw")).await.is_ok());
    }

    #[tokio::test]
    async fn test_successful_login_clears_failures() {
        let auth = setup();
        auth.credentials().register("a", "pw").await.unwrap();

        for _ in 0..2 {
            let _ = auth.login(LoginInput::new("a", "wrong")).await;
        }
        auth.login(LoginInput::new("a", "pw")).await.unwrap();
        for _ in 0..2 {
            let _ = auth.login(LoginInput::new("a", "wrong")).await;
        }

        assert!(auth.login(LoginInput::new("a", "pw")).await.is_ok());
    }

    #[tokio::test]
    async fn test_change_credential_signs_out_everywhere() {
        let auth = setup();
        auth.credentials().register("a", "old").await.unwrap();
        let first = auth.login(LoginInput::new("a", "old")).await.unwrap();
        let second = auth.login(LoginInput::new("a", "old")).await.unwrap();

        let fresh = auth
            .change_credential(&first.token, "old", "new")
            .await
            .unwrap();

        for token in [&first.token, &second.token] {
            assert!(matches!(
                auth.sessions().resolve(token).await.unwrap_err(),
                AuthError::Revoked | AuthError::Expired
            ));
        }
        assert!(auth.authenticate(&fresh.token).await.is_ok());
        assert!(auth.login(LoginInput::new("a", "new")).await.is_ok());
        assert!(matches!(
            auth.login(LoginInput::new("a", "old")).await.unwrap_err(),
            AuthError::AuthenticationFailed
        ));
    }

    #[tokio::test]
    async fn test_change_credential_requires_current() {
        let auth = setup();
        auth.credentials().register("a", "old").await.unwrap();
        let session = auth.login(LoginInput::new("a", "old")).await.unwrap();

        assert!(matches!(
            auth.change_credential(&session.token, "guess", "new")
                .await
                .unwrap_err(),
            AuthError::AuthenticationFailed
        ));
        // Session untouched
        assert!(auth.authenticate(&session.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_identity_ends_sessions() {
        let auth = setup();
        let id = auth.credentials().register("a", "pw").await.unwrap();
        let session = auth.login(LoginInput::new("a", "pw")).await.unwrap();

        auth.credentials().remove(id).await.unwrap();

        assert!(matches!(
            auth.authenticate(&session.token).await.unwrap_err(),
            AuthError::InvalidToken
        ));
    }

    /// Session repository that changes a credential right before the next
    /// insert, between verification and issuance
    struct ChangeBeforeInsert {
        inner: Arc<MemorySessionRepository>,
        pending: std::sync::Mutex<Option<(Arc<CredentialStore>, IdentityId, &'static str)>>,
    }

    #[async_trait::async_trait]
    impl SessionRepository for ChangeBeforeInsert {
        async fn insert(&self, session: &Session) -> anyhow::Result<bool> {
            let pending = self.pending.lock().unwrap().take();
            if let Some((store, id, new)) = pending {
                store.update_credential(id, new).await?;
            }
            self.inner.insert(session).await
        }
        async fn get(&self, token: &str) -> anyhow::Result<Option<Session>> {
            self.inner.get(token).await
        }
        async fn refresh(
            &self,
            token: &str,
            expires_at: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            self.inner.refresh(token, expires_at, now).await
        }
        async fn revoke(&self, token: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
            self.inner.revoke(token, now).await
        }
        async fn revoke_by_identity(
            &self,
            identity_id: IdentityId,
            now: DateTime<Utc>,
        ) -> anyhow::Result<u64> {
            self.inner.revoke_by_identity(identity_id, now).await
        }
        async fn delete_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
            self.inner.delete_expired(now).await
        }
        async fn list_by_identity(&self, identity_id: IdentityId) -> anyhow::Result<Vec<Session>> {
            self.inner.list_by_identity(identity_id).await
        }
    }

    fn setup_with_change_hook() -> (Authenticator, Arc<ChangeBeforeInsert>) {
        let inner = Arc::new(MemorySessionRepository::new());
        let identities = Arc::new(MemoryIdentityRepository::with_sessions(inner.clone()));
        let hooked = Arc::new(ChangeBeforeInsert {
            inner,
            pending: std::sync::Mutex::new(None),
        });
        (build(identities, hooked.clone()), hooked)
    }

    #[tokio::test]
    async fn test_login_racing_credential_change_leaves_no_session() {
        let (auth, hook) = setup_with_change_hook();
        let id = auth.credentials().register("a", "old").await.unwrap();
        *hook.pending.lock().unwrap() = Some((auth.credentials().clone(), id, "new"));

        assert!(matches!(
            auth.login(LoginInput::new("a", "old")).await.unwrap_err(),
            AuthError::AuthenticationFailed
        ));
        assert!(hook.pending.lock().unwrap().is_none());
        assert!(auth.sessions().active_sessions(id).await.unwrap().is_empty());

        assert!(auth.login(LoginInput::new("a", "new")).await.is_ok());
        assert_eq!(auth.sessions().active_sessions(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_change_credential_racing_another_change() {
        let (auth, hook) = setup_with_change_hook();
        let id = auth.credentials().register("a", "old").await.unwrap();
        let session = auth.login(LoginInput::new("a", "old")).await.unwrap();
        *hook.pending.lock().unwrap() = Some((auth.credentials().clone(), id, "other"));

        assert!(matches!(
            auth.change_credential(&session.token, "old", "new")
                .await
                .unwrap_err(),
            AuthError::AuthenticationFailed
        ));
        assert!(auth.sessions().active_sessions(id).await.unwrap().is_empty());
        assert!(auth.login(LoginInput::new("a", "other")).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_storage_error_is_not_counted() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let auth = build(
            SqlxIdentityRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
        );
        pool.close().await;

        for _ in 0..5 {
            assert!(matches!(
                auth.login(LoginInput::new("a", "pw")).await.unwrap_err(),
                AuthError::Storage(_)
            ));
        }
        assert!(!auth.limiter().is_limited("a").await);
    }

    #[tokio::test]
    async fn test_sqlite_end_to_end() {
        let auth = setup_sqlite().await;
        let id = auth.credentials().register("a@example.com", "pw").await.unwrap();

        let session = auth.login(LoginInput::new("a@example.com", "pw")).await.unwrap();
        assert_eq!(auth.authenticate(&session.token).await.unwrap().id, id);

        auth.credentials().update_credential(id, "pw2").await.unwrap();
        assert!(matches!(
            auth.authenticate(&session.token).await.unwrap_err(),
            AuthError::Revoked
        ));

        let session = auth.login(LoginInput::new("a@example.com", "pw2")).await.unwrap();
        auth.credentials().remove(id).await.unwrap();
        assert!(matches!(
            auth.authenticate(&session.token).await.unwrap_err(),
            AuthError::InvalidToken
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(10))]

        /// Login followed by authenticate returns the registered identity,
        /// and logout ends it
        #[test]
        fn property_login_roundtrip(
            login_key in "[a-z]{3,10}@[a-z]{3,8}\\.org",
            credential in "[a-zA-Z0-9!@#$%^&*]{8,20}"
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let result: Result<(), TestCaseError> = rt.block_on(async {
                let auth = setup();
                let id = auth.credentials().register(&login_key, &credential).await
                    .expect("Registration should succeed");

                let session = auth.login(LoginInput::new(login_key.clone(), credential.clone())).await
                    .expect("Login should succeed with valid credentials");
                let identity = auth.authenticate(&session.token).await
                    .expect("Session should authenticate");
                prop_assert_eq!(identity.id, id);

                auth.logout(&session.token).await.expect("Logout should succeed");
                prop_assert!(matches!(
                    auth.authenticate(&session.token).await,
                    Err(AuthError::Revoked)
                ));
                Ok(())
            });
            result?;
        }
    }
}
