//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the operations for a specific entity.

pub mod identity;
pub mod memory;
pub mod session;

pub use identity::{IdentityRepository, SqlxIdentityRepository};
pub use memory::{MemoryIdentityRepository, MemorySessionRepository};
pub use session::{SessionRepository, SqlxSessionRepository};

use crate::db::DynDatabasePool;
use anyhow::{Context, Result};
use sqlx::{MySqlPool, SqlitePool};

/// Whether a statement failed on a UNIQUE or PRIMARY KEY constraint
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub(crate) fn sqlite_pool(pool: &DynDatabasePool) -> Result<&SqlitePool> {
    pool.as_sqlite().context("Database pool is not SQLite")
}

pub(crate) fn mysql_pool(pool: &DynDatabasePool) -> Result<&MySqlPool> {
    pool.as_mysql().context("Database pool is not MySQL")
}
