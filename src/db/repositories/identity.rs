//! Identity repository
//!
//! Database operations for identities.
//!
//! This module provides:
//! - `IdentityRepository` trait defining the interface for identity data access
//! - `SqlxIdentityRepository` implementing the trait for SQLite and MySQL

use super::{is_unique_violation, mysql_pool, sqlite_pool};
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Identity, IdentityId, NewIdentity};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Identity repository trait
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Insert a new identity.
    ///
    /// Returns `None` if the login key is already taken.
    async fn create(&self, identity: &NewIdentity) -> Result<Option<Identity>>;

    /// Get identity by ID
    async fn get_by_id(&self, id: IdentityId) -> Result<Option<Identity>>;

    /// Get identity by normalized login key
    async fn get_by_login_key(&self, login_key: &str) -> Result<Option<Identity>>;

    /// Replace the credential secret. Returns false if the identity is gone.
    async fn update_secret(&self, id: IdentityId, credential_secret: &str) -> Result<bool>;

    /// Swap the credential secret only if it still equals `current`
    async fn replace_secret(&self, id: IdentityId, current: &str, new: &str) -> Result<bool>;

    /// Delete an identity (sessions cascade)
    async fn delete(&self, id: IdentityId) -> Result<bool>;

    /// Count identities
    async fn count(&self) -> Result<i64>;
}

/// SQLx-based identity repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxIdentityRepository {
    pool: DynDatabasePool,
}

impl SqlxIdentityRepository {
    /// Create a new SQLx identity repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn IdentityRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl IdentityRepository for SqlxIdentityRepository {
    async fn create(&self, identity: &NewIdentity) -> Result<Option<Identity>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_identity_sqlite(sqlite_pool(&self.pool)?, identity).await,
            DatabaseDriver::Mysql => create_identity_mysql(mysql_pool(&self.pool)?, identity).await,
        }
    }

    async fn get_by_id(&self, id: IdentityId) -> Result<Option<Identity>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_identity_by_id_sqlite(sqlite_pool(&self.pool)?, id).await,
            DatabaseDriver::Mysql => get_identity_by_id_mysql(mysql_pool(&self.pool)?, id).await,
        }
    }

    async fn get_by_login_key(&self, login_key: &str) -> Result<Option<Identity>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_identity_by_login_key_sqlite(sqlite_pool(&self.pool)?, login_key).await
            }
            DatabaseDriver::Mysql => {
                get_identity_by_login_key_mysql(mysql_pool(&self.pool)?, login_key).await
            }
        }
    }

    async fn update_secret(&self, id: IdentityId, credential_secret: &str) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                update_secret_sqlite(sqlite_pool(&self.pool)?, id, credential_secret).await
            }
            DatabaseDriver::Mysql => {
                update_secret_mysql(mysql_pool(&self.pool)?, id, credential_secret).await
            }
        }
    }

    async fn replace_secret(&self, id: IdentityId, current: &str, new: &str) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                replace_secret_sqlite(sqlite_pool(&self.pool)?, id, current, new).await
            }
            DatabaseDriver::Mysql => {
                replace_secret_mysql(mysql_pool(&self.pool)?, id, current, new).await
            }
        }
    }

    async fn delete(&self, id: IdentityId) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_identity_sqlite(sqlite_pool(&self.pool)?, id).await,
            DatabaseDriver::Mysql => delete_identity_mysql(mysql_pool(&self.pool)?, id).await,
        }
    }

    async fn count(&self) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => count_identities_sqlite(sqlite_pool(&self.pool)?).await,
            DatabaseDriver::Mysql => count_identities_mysql(mysql_pool(&self.pool)?).await,
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_identity_sqlite(
    pool: &SqlitePool,
    identity: &NewIdentity,
) -> Result<Option<Identity>> {
    let result = sqlx::query(
        r#"
        INSERT INTO identities (login_key, credential_secret, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&identity.login_key)
    .bind(&identity.credential_secret)
    .bind(identity.created_at)
    .bind(identity.created_at)
    .execute(pool)
    .await;

    match result {
        Ok(done) => Ok(Some(identity.clone().into_identity(done.last_insert_rowid()))),
        Err(e) if is_unique_violation(&e) => Ok(None),
        Err(e) => Err(e).context("Failed to create identity"),
    }
}

async fn get_identity_by_id_sqlite(pool: &SqlitePool, id: IdentityId) -> Result<Option<Identity>> {
    let row = sqlx::query(
        r#"
        SELECT id, login_key, credential_secret, created_at, updated_at
        FROM identities
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get identity by ID")?;

    match row {
        Some(row) => Ok(Some(row_to_identity_sqlite(&row)?)),
        None => Ok(None),
    }
}

async fn get_identity_by_login_key_sqlite(
    pool: &SqlitePool,
    login_key: &str,
) -> Result<Option<Identity>> {
    let row = sqlx::query(
        r#"
        SELECT id, login_key, credential_secret, created_at, updated_at
        FROM identities
        WHERE login_key = ?
        "#,
    )
    .bind(login_key)
    .fetch_optional(pool)
    .await
    .context("Failed to get identity by login key")?;

    match row {
        Some(row) => Ok(Some(row_to_identity_sqlite(&row)?)),
        None => Ok(None),
    }
}

async fn update_secret_sqlite(
    pool: &SqlitePool,
    id: IdentityId,
    credential_secret: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE identities SET credential_secret = ?, updated_at = ? WHERE id = ?",
    )
    .bind(credential_secret)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to update credential secret")?;

    Ok(result.rows_affected() > 0)
}

async fn replace_secret_sqlite(
    pool: &SqlitePool,
    id: IdentityId,
    current: &str,
    new: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE identities SET credential_secret = ?, updated_at = ? WHERE id = ? AND credential_secret = ?",
    )
    .bind(new)
    .bind(Utc::now())
    .bind(id)
    .bind(current)
    .execute(pool)
    .await
    .context("Failed to replace credential secret")?;

    Ok(result.rows_affected() > 0)
}

async fn delete_identity_sqlite(pool: &SqlitePool, id: IdentityId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM identities WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete identity")?;

    Ok(result.rows_affected() > 0)
}

async fn count_identities_sqlite(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM identities")
        .fetch_one(pool)
        .await
        .context("Failed to count identities")?;

    Ok(row.get("count"))
}

fn row_to_identity_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Identity> {
    Ok(Identity {
        id: row.try_get("id")?,
        login_key: row.try_get("login_key")?,
        credential_secret: row.try_get("credential_secret")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_identity_mysql(pool: &MySqlPool, identity: &NewIdentity) -> Result<Option<Identity>> {
    let result = sqlx::query(
        r#"
        INSERT INTO identities (login_key, credential_secret, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&identity.login_key)
    .bind(&identity.credential_secret)
    .bind(identity.created_at)
    .bind(identity.created_at)
    .execute(pool)
    .await;

    match result {
        Ok(done) => Ok(Some(
            identity.clone().into_identity(done.last_insert_id() as i64),
        )),
        Err(e) if is_unique_violation(&e) => Ok(None),
        Err(e) => Err(e).context("Failed to create identity"),
    }
}

async fn get_identity_by_id_mysql(pool: &MySqlPool, id: IdentityId) -> Result<Option<Identity>> {
    let row = sqlx::query(
        r#"
        SELECT id, login_key, credential_secret, created_at, updated_at
        FROM identities
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get identity by ID")?;

    match row {
        Some(row) => Ok(Some(row_to_identity_mysql(&row)?)),
        None => Ok(None),
    }
}

async fn get_identity_by_login_key_mysql(
    pool: &MySqlPool,
    login_key: &str,
) -> Result<Option<Identity>> {
    let row = sqlx::query(
        r#"
        SELECT id, login_key, credential_secret, created_at, updated_at
        FROM identities
        WHERE login_key = ?
        "#,
    )
    .bind(login_key)
    .fetch_optional(pool)
    .await
    .context("Failed to get identity by login key")?;

    match row {
        Some(row) => Ok(Some(row_to_identity_mysql(&row)?)),
        None => Ok(None),
    }
}

async fn update_secret_mysql(
    pool: &MySqlPool,
    id: IdentityId,
    credential_secret: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE identities SET credential_secret = ?, updated_at = ? WHERE id = ?",
    )
    .bind(credential_secret)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to update credential secret")?;

    // MySQL reports matched-but-unchanged rows as 0 affected
    if result.rows_affected() > 0 {
        return Ok(true);
    }
    Ok(get_identity_by_id_mysql(pool, id).await?.is_some())
}

async fn replace_secret_mysql(
    pool: &MySqlPool,
    id: IdentityId,
    current: &str,
    new: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE identities SET credential_secret = ?, updated_at = ? WHERE id = ? AND credential_secret = ?",
    )
    .bind(new)
    .bind(Utc::now())
    .bind(id)
    .bind(current)
    .execute(pool)
    .await
    .context("Failed to replace credential secret")?;

    Ok(result.rows_affected() > 0)
}

async fn delete_identity_mysql(pool: &MySqlPool, id: IdentityId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM identities WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete identity")?;

    Ok(result.rows_affected() > 0)
}

async fn count_identities_mysql(pool: &MySqlPool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM identities")
        .fetch_one(pool)
        .await
        .context("Failed to count identities")?;

    Ok(row.get("count"))
}

fn row_to_identity_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Identity> {
    Ok(Identity {
        id: row.try_get("id")?,
        login_key: row.try_get("login_key")?,
        credential_secret: row.try_get("credential_secret")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
