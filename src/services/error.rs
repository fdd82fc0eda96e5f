//! Error types for credential and session operations

/// Outcome of a failed authentication operation.
///
/// Messages never carry plaintext credentials, secrets, or tokens.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Login key already registered
    #[error("Login key already registered")]
    DuplicateKey,

    /// Login key is empty or too long
    #[error("Invalid login key: {0}")]
    InvalidLoginKey(String),

    /// Plaintext credential rejected by policy
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// No identity with that key or id
    #[error("Identity not found")]
    NotFound,

    /// Identity exists but the credential did not match
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Token is malformed or unknown
    #[error("Invalid session token")]
    InvalidToken,

    /// Session passed its expiry
    #[error("Session expired")]
    Expired,

    /// Session was revoked
    #[error("Session revoked")]
    Revoked,

    /// Too many failed logins for this key
    #[error("Too many failed login attempts")]
    RateLimited,

    /// Hash computation failed or a stored secret could not be parsed
    #[error("Hashing error: {0}")]
    Hashing(String),

    /// Storage layer failure, passed through unchanged
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl AuthError {
    /// Message safe to show the party that attempted to log in.
    ///
    /// Unknown login keys and wrong credentials read the same.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::NotFound | AuthError::AuthenticationFailed => "invalid login or password",
            AuthError::DuplicateKey => "login key already registered",
            AuthError::InvalidLoginKey(_) => "invalid login key",
            AuthError::InvalidCredential(_) => "credential does not meet requirements",
            AuthError::InvalidToken | AuthError::Expired | AuthError::Revoked => {
                "session is not valid"
            }
            AuthError::RateLimited => "too many attempts, try again later",
            AuthError::Hashing(_) | AuthError::Storage(_) => "internal error",
        }
    }

    /// Whether the caller should treat this as a server-side failure
    pub fn is_internal(&self) -> bool {
        matches!(self, AuthError::Hashing(_) | AuthError::Storage(_))
    }
}
