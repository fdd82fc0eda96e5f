//! Session repository
//!
//! Database operations for session tokens.
//!
//! This module provides:
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL
//!
//! Every state change is one conditional statement, so two callers racing on
//! the same token observe a single winner.

use super::{is_unique_violation, mysql_pool, sqlite_pool};
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{IdentityId, Session};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session. Returns false if the token is already taken.
    async fn insert(&self, session: &Session) -> Result<bool>;

    /// Get session by token
    async fn get(&self, token: &str) -> Result<Option<Session>>;

    /// Move `expires_at` forward to `expires_at`, only while the session is
    /// active at `now`. Returns whether a row changed.
    async fn refresh(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Revoke a session that is active at `now`. Returns whether a row changed.
    async fn revoke(&self, token: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Revoke every session of an identity that is active at `now`
    async fn revoke_by_identity(&self, identity_id: IdentityId, now: DateTime<Utc>) -> Result<u64>;

    /// Delete sessions whose expiry is at or before `now`
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// All session rows of an identity, newest first
    async fn list_by_identity(&self, identity_id: IdentityId) -> Result<Vec<Session>>;
}

/// SQLx-based session repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn insert(&self, session: &Session) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => insert_session_sqlite(sqlite_pool(&self.pool)?, session).await,
            DatabaseDriver::Mysql => insert_session_mysql(mysql_pool(&self.pool)?, session).await,
        }
    }

    async fn get(&self, token: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_session_sqlite(sqlite_pool(&self.pool)?, token).await,
            DatabaseDriver::Mysql => get_session_mysql(mysql_pool(&self.pool)?, token).await,
        }
    }

    async fn refresh(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                refresh_session_sqlite(sqlite_pool(&self.pool)?, token, expires_at, now).await
            }
            DatabaseDriver::Mysql => {
                refresh_session_mysql(mysql_pool(&self.pool)?, token, expires_at, now).await
            }
        }
    }

    async fn revoke(&self, token: &str, now: DateTime<Utc>) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => revoke_session_sqlite(sqlite_pool(&self.pool)?, token, now).await,
            DatabaseDriver::Mysql => revoke_session_mysql(mysql_pool(&self.pool)?, token, now).await,
        }
    }

    async fn revoke_by_identity(&self, identity_id: IdentityId, now: DateTime<Utc>) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                revoke_by_identity_sqlite(sqlite_pool(&self.pool)?, identity_id, now).await
            }
            DatabaseDriver::Mysql => {
                revoke_by_identity_mysql(mysql_pool(&self.pool)?, identity_id, now).await
            }
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_expired_sqlite(sqlite_pool(&self.pool)?, now).await,
            DatabaseDriver::Mysql => delete_expired_mysql(mysql_pool(&self.pool)?, now).await,
        }
    }

    async fn list_by_identity(&self, identity_id: IdentityId) -> Result<Vec<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_by_identity_sqlite(sqlite_pool(&self.pool)?, identity_id).await
            }
            DatabaseDriver::Mysql => {
                list_by_identity_mysql(mysql_pool(&self.pool)?, identity_id).await
            }
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn insert_session_sqlite(pool: &SqlitePool, session: &Session) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO sessions (token, identity_id, created_at, expires_at, revoked, revoked_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.token)
    .bind(session.identity_id)
    .bind(session.created_at)
    .bind(session.expires_at)
    .bind(session.revoked)
    .bind(session.revoked_at)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e).context("Failed to insert session"),
    }
}

async fn get_session_sqlite(pool: &SqlitePool, token: &str) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT token, identity_id, created_at, expires_at, revoked, revoked_at
        FROM sessions
        WHERE token = ?
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await
    .context("Failed to get session")?;

    match row {
        Some(row) => Ok(Some(row_to_session_sqlite(&row)?)),
        None => Ok(None),
    }
}

async fn refresh_session_sqlite(
    pool: &SqlitePool,
    token: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sessions SET expires_at = ?
        WHERE token = ? AND revoked = 0 AND expires_at > ? AND expires_at < ?
        "#,
    )
    .bind(expires_at)
    .bind(token)
    .bind(now)
    .bind(expires_at)
    .execute(pool)
    .await
    .context("Failed to refresh session")?;

    Ok(result.rows_affected() > 0)
}

async fn revoke_session_sqlite(pool: &SqlitePool, token: &str, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sessions SET revoked = 1, revoked_at = ?
        WHERE token = ? AND revoked = 0 AND expires_at > ?
        "#,
    )
    .bind(now)
    .bind(token)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to revoke session")?;

    Ok(result.rows_affected() > 0)
}

async fn revoke_by_identity_sqlite(
    pool: &SqlitePool,
    identity_id: IdentityId,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE sessions SET revoked = 1, revoked_at = ?
        WHERE identity_id = ? AND revoked = 0 AND expires_at > ?
        "#,
    )
    .bind(now)
    .bind(identity_id)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to revoke sessions by identity")?;

    Ok(result.rows_affected())
}

async fn delete_expired_sqlite(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

async fn list_by_identity_sqlite(
    pool: &SqlitePool,
    identity_id: IdentityId,
) -> Result<Vec<Session>> {
    let rows = sqlx::query(
        r#"
        SELECT token, identity_id, created_at, expires_at, revoked, revoked_at
        FROM sessions
        WHERE identity_id = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(identity_id)
    .fetch_all(pool)
    .await
    .context("Failed to list sessions by identity")?;

    rows.iter().map(row_to_session_sqlite).collect()
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    Ok(Session {
        token: row.try_get("token")?,
        identity_id: row.try_get("identity_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked: row.try_get("revoked")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn insert_session_mysql(pool: &MySqlPool, session: &Session) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO sessions (token, identity_id, created_at, expires_at, revoked, revoked_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.token)
    .bind(session.identity_id)
    .bind(session.created_at)
    .bind(session.expires_at)
    .bind(session.revoked)
    .bind(session.revoked_at)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e).context("Failed to insert session"),
    }
}

async fn get_session_mysql(pool: &MySqlPool, token: &str) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT token, identity_id, created_at, expires_at, revoked, revoked_at
        FROM sessions
        WHERE token = ?
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await
    .context("Failed to get session")?;

    match row {
        Some(row) => Ok(Some(row_to_session_mysql(&row)?)),
        None => Ok(None),
    }
}

async fn refresh_session_mysql(
    pool: &MySqlPool,
    token: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sessions SET expires_at = ?
        WHERE token = ? AND revoked = FALSE AND expires_at > ? AND expires_at < ?
        "#,
    )
    .bind(expires_at)
    .bind(token)
    .bind(now)
    .bind(expires_at)
    .execute(pool)
    .await
    .context("Failed to refresh session")?;

    Ok(result.rows_affected() > 0)
}

async fn revoke_session_mysql(pool: &MySqlPool, token: &str, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sessions SET revoked = TRUE, revoked_at = ?
        WHERE token = ? AND revoked = FALSE AND expires_at > ?
        "#,
    )
    .bind(now)
    .bind(token)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to revoke session")?;

    Ok(result.rows_affected() > 0)
}

async fn revoke_by_identity_mysql(
    pool: &MySqlPool,
    identity_id: IdentityId,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE sessions SET revoked = TRUE, revoked_at = ?
        WHERE identity_id = ? AND revoked = FALSE AND expires_at > ?
        "#,
    )
    .bind(now)
    .bind(identity_id)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to revoke sessions by identity")?;

    Ok(result.rows_affected())
}

async fn delete_expired_mysql(pool: &MySqlPool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

async fn list_by_identity_mysql(pool: &MySqlPool, identity_id: IdentityId) -> Result<Vec<Session>> {
    let rows = sqlx::query(
        r#"
        SELECT token, identity_id, created_at, expires_at, revoked, revoked_at
        FROM sessions
        WHERE identity_id = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(identity_id)
    .fetch_all(pool)
    .await
    .context("Failed to list sessions by identity")?;

    rows.iter().map(row_to_session_mysql).collect()
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Session> {
    Ok(Session {
        token: row.try_get("token")?,
        identity_id: row.try_get("identity_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked: row.try_get("revoked")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}
