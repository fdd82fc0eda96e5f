//! Database migrations
//!
//! Migrations are embedded as SQL strings with one dialect for SQLite and one
//! for MySQL. Applied versions are tracked in the `_migrations` table, so
//! running the set twice is a no-op.
//!
//! # Usage
//!
//! ```ignore
//! use sessionward::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_identities",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS identities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                login_key VARCHAR(255) NOT NULL UNIQUE,
                credential_secret VARCHAR(255) NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS identities (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                login_key VARCHAR(255) NOT NULL UNIQUE,
                credential_secret VARCHAR(255) NOT NULL,
                created_at TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                updated_at TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6)
            );
        "#,
    },
    // Session rows cascade with their identity so no live token can
    // outlive the record it points at.
    Migration {
        version: 2,
        name: "create_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token VARCHAR(128) PRIMARY KEY,
                identity_id INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                expires_at TIMESTAMP NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0,
                revoked_at TIMESTAMP,
                FOREIGN KEY (identity_id) REFERENCES identities(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_identity_id ON sessions(identity_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token VARCHAR(128) PRIMARY KEY,
                identity_id BIGINT NOT NULL,
                created_at TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                expires_at TIMESTAMP(6) NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT FALSE,
                revoked_at TIMESTAMP(6) NULL,
                INDEX idx_sessions_identity_id (identity_id),
                INDEX idx_sessions_expires_at (expires_at),
                FOREIGN KEY (identity_id) REFERENCES identities(id) ON DELETE CASCADE
            );
        "#,
    },
];

/// Run all pending migrations in version order.
///
/// Returns the number of migrations applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

async fn get_applied_migrations(pool: &DynDatabasePool) -> Result<Vec<MigrationRecord>> {
    match (pool.as_sqlite(), pool.as_mysql()) {
        (Some(sqlite), _) => get_applied_migrations_sqlite(sqlite).await,
        (None, Some(mysql)) => get_applied_migrations_mysql(mysql).await,
        (None, None) => anyhow::bail!("Database pool exposes no SQLite or MySQL handle"),
    }
}

async fn get_applied_migrations_sqlite(pool: &SqlitePool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to read applied migrations")?;

    Ok(rows
        .iter()
        .map(|row| MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}

async fn get_applied_migrations_mysql(pool: &MySqlPool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to read applied migrations")?;

    Ok(rows
        .iter()
        .map(|row| {
            let version: i32 = row.get("version");
            MigrationRecord {
                version: version as i64,
                name: row.get("name"),
                applied_at: row.get("applied_at"),
            }
        })
        .collect())
}

/// Apply one migration and record it in a single transaction.
///
/// MySQL commits implicitly around DDL, so every MySQL statement must be
/// safe to re-run on its own.
async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    match (pool.as_sqlite(), pool.as_mysql()) {
        (Some(sqlite), _) => apply_migration_sqlite(sqlite, migration).await,
        (None, Some(mysql)) => apply_migration_mysql(mysql, migration).await,
        (None, None) => anyhow::bail!("Database pool exposes no SQLite or MySQL handle"),
    }
}

async fn apply_migration_sqlite(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin migration")?;

    for statement in split_sql_statements(migration.up_sqlite) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }
    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await
        .context("Failed to record migration")?;

    tx.commit().await.context("Failed to commit migration")?;
    Ok(())
}

async fn apply_migration_mysql(pool: &MySqlPool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin migration")?;

    for statement in split_sql_statements(migration.up_mysql) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }
    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await
        .context("Failed to record migration")?;

    tx.commit().await.context("Failed to commit migration")?;
    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, dropping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

/// Check if a string contains only SQL comments
fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}
