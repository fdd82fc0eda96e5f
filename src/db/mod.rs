//! Database layer
//!
//! Durable storage for identities and sessions. Supports:
//! - SQLite (default)
//! - MySQL
//!
//! The database is the single source of truth for both tables; anything
//! held in process memory is an optimization layered on top.
//!
//! # Usage
//!
//! ```ignore
//! use sessionward::config::DatabaseConfig;
//! use sessionward::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
