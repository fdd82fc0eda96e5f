//! Credential hashing
//!
//! One-way hashing and verification of plaintext credentials using Argon2id
//! (version 0x13) with tunable work parameters, a random salt per record,
//! and an optional application-wide pepper fed to Argon2 as its secret input.
//!
//! Secrets are PHC strings, so each one records the parameters it was made
//! with. That lets [`CredentialHasher::needs_rehash`] spot secrets produced
//! under an older configuration.
//!
//! Argon2 is deliberately slow. Async callers go through
//! [`CredentialHasher::spawn_hash`] and [`CredentialHasher::spawn_verify`],
//! which run on tokio's blocking pool.

use crate::config::HashConfig;
use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

/// Plaintext behind the decoy secret. Never matches a real login.
const DECOY_CREDENTIAL: &str = "sessionward-decoy-credential";

/// Argon2id hasher bound to one set of work parameters and pepper
pub struct CredentialHasher {
    params: Params,
    pepper: Option<Vec<u8>>,
    decoy: OnceCell<String>,
}

impl fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHasher")
            .field("memory_kib", &self.params.m_cost())
            .field("iterations", &self.params.t_cost())
            .field("parallelism", &self.params.p_cost())
            .field("peppered", &self.pepper.is_some())
            .finish()
    }
}

impl CredentialHasher {
    /// Create a hasher with explicit parameters
    pub fn new(params: Params, pepper: Option<Vec<u8>>) -> Self {
        Self {
            params,
            pepper,
            decoy: OnceCell::new(),
        }
    }

    /// Create a hasher from the `hash` config section
    pub fn from_config(config: &HashConfig) -> Result<Self> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| anyhow::anyhow!("Invalid Argon2 parameters: {}", e))?;
        let pepper = config
            .pepper
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|p| p.as_bytes().to_vec());
        Ok(Self::new(params, pepper))
    }

    fn argon2(&self) -> Result<Argon2<'_>> {
        match &self.pepper {
            Some(pepper) => Argon2::new_with_secret(
                pepper,
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )
            .map_err(|e| anyhow::anyhow!("Invalid Argon2 pepper: {}", e)),
            None => Ok(Argon2::new(
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )),
        }
    }

    /// Hash a plaintext credential into a PHC string
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let secret = self
            .argon2()?
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash credential: {}", e))
            .context("Credential hashing failed")?;

        Ok(secret.to_string())
    }

    /// Verify a plaintext credential against a stored secret.
    ///
    /// The comparison is constant time. Returns an error only when the
    /// stored secret cannot be parsed.
    pub fn verify(&self, plaintext: &str, secret: &str) -> Result<bool> {
        let parsed = PasswordHash::new(secret)
            .map_err(|e| anyhow::anyhow!("Invalid credential secret format: {}", e))
            .context("Failed to parse credential secret")?;

        match self.argon2()?.verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(anyhow::anyhow!("Credential verification failed: {}", e))
                .context("Credential verification error"),
        }
    }

    /// Whether `secret` was produced with a different algorithm, version
    /// or work parameters than this hasher uses
    pub fn needs_rehash(&self, secret: &str) -> bool {
        let parsed = match PasswordHash::new(secret) {
            Ok(parsed) => parsed,
            Err(_) => return true,
        };

        if parsed.algorithm != Algorithm::Argon2id.ident()
            || parsed.version != Some(u32::from(Version::V0x13))
        {
            return true;
        }

        match Params::try_from(&parsed) {
            Ok(stored) => {
                stored.m_cost() != self.params.m_cost()
                    || stored.t_cost() != self.params.t_cost()
                    || stored.p_cost() != self.params.p_cost()
            }
            Err(_) => true,
        }
    }

    /// Run a full verification against a fixed decoy secret.
    ///
    /// Used when the login key is unknown so the failure costs as much as
    /// a wrong credential for a known key.
    pub fn verify_decoy(&self, plaintext: &str) -> Result<()> {
        let decoy = self.decoy.get_or_try_init(|| self.hash(DECOY_CREDENTIAL))?;
        self.verify(plaintext, decoy)?;
        Ok(())
    }

    /// [`hash`](Self::hash) on the blocking pool
    pub async fn spawn_hash(self: &Arc<Self>, plaintext: String) -> Result<String> {
        let hasher = Arc::clone(self);
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .context("Hashing task failed")?
    }

    /// [`verify`](Self::verify) on the blocking pool
    pub async fn spawn_verify(self: &Arc<Self>, plaintext: String, secret: String) -> Result<bool> {
        let hasher = Arc::clone(self);
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &secret))
            .await
            .context("Verification task failed")?
    }

    /// [`verify_decoy`](Self::verify_decoy) on the blocking pool
    pub async fn spawn_verify_decoy(self: &Arc<Self>, plaintext: String) -> Result<()> {
        let hasher = Arc::clone(self);
        tokio::task::spawn_blocking(move || hasher.verify_decoy(&plaintext))
            .await
            .context("Verification task failed")?
    }
}

/// Cheap parameters for tests
#[cfg(test)]
pub(crate) fn test_hasher() -> CredentialHasher {
    let params = Params::new(1024, 1, 1, None).expect("valid test params");
    CredentialHasher::new(params, None)
}
