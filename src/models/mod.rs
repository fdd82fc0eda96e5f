//! Data models
//!
//! Records persisted by the storage layer:
//! - `Identity`: login key plus credential secret
//! - `Session`: opaque token bound to an identity

mod identity;
mod session;

pub use identity::{normalize_login_key, Identity, IdentityId, NewIdentity, MAX_LOGIN_KEY_LENGTH};
pub use session::{Session, SessionState};
