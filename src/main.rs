//! sessionward - Session store housekeeping
//!
//! Loads configuration, prepares the database, and sweeps expired sessions
//! and stale login throttling entries until interrupted.

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sessionward::{
    config::Config,
    db::{self, migrations},
    services::build_authenticator,
};

/// How often stale throttling entries are dropped
const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sessionward=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting sessionward...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let auth = build_authenticator(pool.clone(), &config)?;

    let sweeper = auth.sessions().clone().spawn_sweeper(Duration::from_secs(
        config.session.sweep_interval_seconds.max(1),
    ));
    tracing::info!(
        "Session sweeper started (every {}s)",
        config.session.sweep_interval_seconds.max(1)
    );

    // Start rate limiter cleanup task
    let limiter_cleanup = {
        let limiter = auth.limiter().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LIMITER_CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                let dropped = limiter.cleanup().await;
                if dropped > 0 {
                    tracing::debug!("Dropped {} stale throttling entries", dropped);
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    sweeper.abort();
    limiter_cleanup.abort();
    pool.close().await;

    Ok(())
}
