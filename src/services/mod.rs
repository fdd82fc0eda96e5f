//! Services layer - Authentication logic
//!
//! Services are responsible for:
//! - Hashing and verifying credentials
//! - Issuing, resolving and revoking sessions
//! - Mapping storage outcomes to typed authentication errors

pub mod auth;
pub mod credential;
pub mod error;
pub mod password;
pub mod rate_limiter;
pub mod session;

pub use auth::{Authenticator, LoginInput};
pub use credential::{CredentialStore, SessionInvalidator};
pub use error::AuthError;
pub use password::CredentialHasher;
pub use rate_limiter::LoginRateLimiter;
pub use session::SessionManager;

use crate::cache::SessionCache;
use crate::config::Config;
use crate::db::repositories::{SqlxIdentityRepository, SqlxSessionRepository};
use crate::db::DynDatabasePool;
use std::sync::Arc;

/// Wire every service over one database pool
pub fn build_authenticator(pool: DynDatabasePool, config: &Config) -> anyhow::Result<Authenticator> {
    let identity_repo = SqlxIdentityRepository::boxed(pool.clone());
    let session_repo = SqlxSessionRepository::boxed(pool);

    let sessions = Arc::new(
        SessionManager::new(session_repo, identity_repo.clone(), config.session.clone())?
            .with_cache(SessionCache::from_config(&config.cache)),
    );
    let credentials = Arc::new(CredentialStore::new(
        identity_repo,
        Arc::new(CredentialHasher::from_config(&config.hash)?),
        config.credential.clone(),
        sessions.clone(),
    ));
    let limiter = Arc::new(LoginRateLimiter::from_config(&config.throttle));

    Ok(Authenticator::new(credentials, sessions, limiter))
}
