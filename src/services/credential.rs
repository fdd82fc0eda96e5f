//! Credential store
//!
//! Owns identity records and the one-way secrets derived from their
//! credentials:
//! - Registration with login key normalization and credential policy
//! - Verification with equal cost for unknown keys and wrong credentials
//! - Credential change, which revokes every session of the identity
//! - Opportunistic rehash when the configured work parameters change

use crate::config::CredentialPolicy;
use crate::db::repositories::IdentityRepository;
use crate::models::{normalize_login_key, Identity, IdentityId, NewIdentity, MAX_LOGIN_KEY_LENGTH};
use crate::services::error::AuthError;
use crate::services::password::CredentialHasher;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Revokes sessions when an identity's credential changes or the identity
/// is removed. Implemented by the session manager.
#[async_trait]
pub trait SessionInvalidator: Send + Sync {
    /// Revoke every live session of `identity_id`, returning how many
    async fn revoke_all(&self, identity_id: IdentityId) -> Result<u64, AuthError>;
}

/// Credential store
pub struct CredentialStore {
    identities: Arc<dyn IdentityRepository>,
    hasher: Arc<CredentialHasher>,
    policy: CredentialPolicy,
    sessions: Arc<dyn SessionInvalidator>,
}

impl CredentialStore {
    pub fn new(
        identities: Arc<dyn IdentityRepository>,
        hasher: Arc<CredentialHasher>,
        policy: CredentialPolicy,
        sessions: Arc<dyn SessionInvalidator>,
    ) -> Self {
        Self {
            identities,
            hasher,
            policy,
            sessions,
        }
    }

    /// Register a new identity
    ///
    /// # Errors
    ///
    /// - `InvalidLoginKey` if the key is empty after trimming or too long
    /// - `InvalidCredential` if the plaintext fails the credential policy
    /// - `DuplicateKey` if the normalized key is already registered
    pub async fn register(&self, login_key: &str, plaintext: &str) -> Result<IdentityId, AuthError> {
        let login_key = validate_login_key(login_key)?;
        self.policy
            .check(plaintext)
            .map_err(AuthError::InvalidCredential)?;

        if self.identities.get_by_login_key(&login_key).await?.is_some() {
            return Err(AuthError::DuplicateKey);
        }

        let secret = self
            .hasher
            .spawn_hash(plaintext.to_string())
            .await
            .map_err(hashing_error)?;

        // The unique constraint settles a race between two registrations
        match self
            .identities
            .create(&NewIdentity::new(login_key, secret))
            .await?
        {
            Some(identity) => {
                info!(identity_id = identity.id, "Identity registered");
                Ok(identity.id)
            }
            None => Err(AuthError::DuplicateKey),
        }
    }

    /// Verify a credential and return the identity it belongs to
    ///
    /// # Errors
    ///
    /// - `NotFound` if no identity has this login key
    /// - `AuthenticationFailed` if the credential does not match
    ///
    /// Both cost one full Argon2 verification.
    pub async fn verify(&self, login_key: &str, plaintext: &str) -> Result<IdentityId, AuthError> {
        Ok(self.verify_identity(login_key, plaintext).await?.id)
    }

    /// Like [`verify`](Self::verify), but returns the identity record with
    /// the secret that was checked (or its rehashed replacement)
    pub async fn verify_identity(&self, login_key: &str, plaintext: &str) -> Result<Identity, AuthError> {
        let login_key = normalize_login_key(login_key);

        let mut identity = match self.identities.get_by_login_key(&login_key).await? {
            Some(identity) => identity,
            None => {
                self.hasher
                    .spawn_verify_decoy(plaintext.to_string())
                    .await
                    .map_err(hashing_error)?;
                debug!("Verification failed: unknown login key");
                return Err(AuthError::NotFound);
            }
        };

        let matched = self
            .hasher
            .spawn_verify(plaintext.to_string(), identity.credential_secret.clone())
            .await
            .map_err(hashing_error)?;

        if !matched {
            debug!(identity_id = identity.id, "Verification failed: credential mismatch");
            return Err(AuthError::AuthenticationFailed);
        }

        if self.hasher.needs_rehash(&identity.credential_secret) {
            if let Some(secret) = self.rehash(&identity, plaintext).await {
                identity.credential_secret = secret;
            }
        }

        Ok(identity)
    }

    /// Whether `plaintext` is still the identity's credential
    ///
    /// `verified_secret` is the secret a previous verification checked. If
    /// the stored secret is unchanged no hashing is done; otherwise the
    /// plaintext is verified against the stored secret again, so a rehash
    /// does not count as a change. A removed identity is never current.
    pub async fn is_current(
        &self,
        identity_id: IdentityId,
        plaintext: &str,
        verified_secret: Option<&str>,
    ) -> Result<bool, AuthError> {
        let identity = match self.identities.get_by_id(identity_id).await? {
            Some(identity) => identity,
            None => return Ok(false),
        };
        if verified_secret == Some(identity.credential_secret.as_str()) {
            return Ok(true);
        }

        self.hasher
            .spawn_verify(plaintext.to_string(), identity.credential_secret)
            .await
            .map_err(hashing_error)
    }

    /// Replace an identity's credential and revoke all of its sessions
    ///
    /// # Errors
    ///
    /// - `InvalidCredential` if the new plaintext fails the credential policy
    /// - `NotFound` if the identity does not exist
    pub async fn update_credential(
        &self,
        identity_id: IdentityId,
        new_plaintext: &str,
    ) -> Result<(), AuthError> {
        self.policy
            .check(new_plaintext)
            .map_err(AuthError::InvalidCredential)?;

        if self.identities.get_by_id(identity_id).await?.is_none() {
            return Err(AuthError::NotFound);
        }

        let secret = self
            .hasher
            .spawn_hash(new_plaintext.to_string())
            .await
            .map_err(hashing_error)?;

        if !self.identities.update_secret(identity_id, &secret).await? {
            return Err(AuthError::NotFound);
        }

        let revoked = self.sessions.revoke_all(identity_id).await?;
        info!(identity_id, revoked, "Credential updated");
        Ok(())
    }

    /// Get identity by ID
    pub async fn get(&self, identity_id: IdentityId) -> Result<Option<Identity>, AuthError> {
        Ok(self.identities.get_by_id(identity_id).await?)
    }

    /// Get identity by login key (normalized before lookup)
    pub async fn find_by_login_key(&self, login_key: &str) -> Result<Option<Identity>, AuthError> {
        Ok(self
            .identities
            .get_by_login_key(&normalize_login_key(login_key))
            .await?)
    }

    /// Revoke every session of an identity, then delete it
    pub async fn remove(&self, identity_id: IdentityId) -> Result<(), AuthError> {
        self.sessions.revoke_all(identity_id).await?;
        if !self.identities.delete(identity_id).await? {
            return Err(AuthError::NotFound);
        }
        info!(identity_id, "Identity removed");
        Ok(())
    }

    /// Returns the new secret once it is stored
    async fn rehash(&self, identity: &Identity, plaintext: &str) -> Option<String> {
        let secret = match self.hasher.spawn_hash(plaintext.to_string()).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(identity_id = identity.id, "Rehash failed: {:#}", e);
                return None;
            }
        };

        // Lost to a concurrent credential change if the stored secret moved on
        match self
            .identities
            .replace_secret(identity.id, &identity.credential_secret, &secret)
            .await
        {
            Ok(true) => {
                debug!(identity_id = identity.id, "Credential rehashed");
                Some(secret)
            }
            Ok(false) => {
                debug!(identity_id = identity.id, "Rehash skipped, secret changed");
                None
            }
            Err(e) => {
                warn!(identity_id = identity.id, "Failed to store rehashed credential: {:#}", e);
                None
            }
        }
    }
}

fn validate_login_key(raw: &str) -> Result<String, AuthError> {
    let login_key = normalize_login_key(raw);
    if login_key.is_empty() {
        return Err(AuthError::InvalidLoginKey("login key is empty".to_string()));
    }
    if login_key.chars().count() > MAX_LOGIN_KEY_LENGTH {
        return Err(AuthError::InvalidLoginKey(format!(
            "login key exceeds {} characters",
            MAX_LOGIN_KEY_LENGTH
        )));
    }
    Ok(login_key)
}

fn hashing_error(e: anyhow::Error) -> AuthError {
    AuthError::Hashing(format!("{:#}", e))
}
