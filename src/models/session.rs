//! Session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::IdentityId;

/// Session record bound to an identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque token (primary key)
    pub token: String,
    /// Owning identity
    pub identity_id: IdentityId,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
    /// Set once, never cleared
    pub revoked: bool,
    /// When the session was revoked
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a session at a given instant.
///
/// `Expired` and `Revoked` are terminal. When both apply, `Revoked` wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
    Revoked,
}

impl Session {
    /// Create a fresh, active session
    pub fn new(
        token: String,
        identity_id: IdentityId,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            identity_id,
            created_at,
            expires_at,
            revoked: false,
            revoked_at: None,
        }
    }

    /// State of the session at `now`
    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        if self.revoked {
            SessionState::Revoked
        } else if self.expires_at <= now {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }
}
