//! Identity model
//!
//! An identity is a login key plus the one-way secret derived from its
//! credential. The plaintext credential never reaches this type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity primary key
pub type IdentityId = i64;

/// Longest accepted login key, in characters
pub const MAX_LOGIN_KEY_LENGTH: usize = 255;

/// A registered identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Unique identifier assigned by the store
    pub id: IdentityId,
    /// Normalized login key (unique)
    pub login_key: String,
    /// Argon2id PHC string
    #[serde(skip_serializing)]
    pub credential_secret: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last credential change
    pub updated_at: DateTime<Utc>,
}

/// Identity fields supplied at registration, before the store assigns an id
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub login_key: String,
    pub credential_secret: String,
    pub created_at: DateTime<Utc>,
}

impl NewIdentity {
    pub fn new(login_key: impl Into<String>, credential_secret: impl Into<String>) -> Self {
        Self {
            login_key: login_key.into(),
            credential_secret: credential_secret.into(),
            created_at: Utc::now(),
        }
    }

    /// Attach the id the store assigned
    pub fn into_identity(self, id: IdentityId) -> Identity {
        Identity {
            id,
            login_key: self.login_key,
            credential_secret: self.credential_secret,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Normalize a login key for storage and lookup.
///
/// Keys compare case-insensitively and ignore surrounding whitespace, so
/// `" Alice@Example.com "` and `"alice@example.com"` name the same identity.
pub fn normalize_login_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}
