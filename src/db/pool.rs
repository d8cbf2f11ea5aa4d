//! Database connection pool management for pharmstream
//!
//! This module provides connection pooling using SQLx with configuration
//! options for connection limits, timeouts, and retry behavior.

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::ConnectOptions;
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Type alias for the database connection pool
pub type DbPool = PgPool;

/// Create a new database connection pool
///
/// The pool is shared by all domain handlers so that no handler invocation
/// competes unboundedly for a single connection.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    // Parse connection options from URL
    let connect_options = PgConnectOptions::from_str(&config.url)
        .map_err(|e| Error::config(format!("Invalid database URL: {}", e)))?
        // Set application name for monitoring
        .application_name("pharmstream")
        // Enable statement logging in debug mode
        .log_statements(tracing::log::LevelFilter::Debug)
        .statement_cache_capacity(100);

    // Configure pool options
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_max_size)
        .min_connections(config.pool_min_idle)
        .acquire_timeout(config.pool_timeout())
        .idle_timeout(Some(config.idle_timeout()))
        // Test connections before use
        .test_before_acquire(true)
        .max_lifetime(Some(Duration::from_secs(3600))) // 1 hour
        .connect_with(connect_options)
        .await
        .map_err(|e| Error::database(format!("Failed to create connection pool: {}", e)))?;

    // Verify connectivity
    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await
        .map_err(|e| Error::database(format!("Failed to verify database connection: {}", e)))?;

    tracing::info!(
        max_connections = config.pool_max_size,
        min_idle = config.pool_min_idle,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Create a lazily-connecting pool
///
/// Used where a pool handle is needed before the database is reachable,
/// e.g. wiring the health endpoint in tests.
pub fn create_lazy_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let connect_options = PgConnectOptions::from_str(&config.url)
        .map_err(|e| Error::config(format!("Invalid database URL: {}", e)))?
        .application_name("pharmstream");

    Ok(PgPoolOptions::new()
        .max_connections(config.pool_max_size)
        .acquire_timeout(config.pool_timeout())
        .connect_lazy_with(connect_options))
}

/// Pool health check
///
/// Verifies that the pool can acquire a connection and execute a simple query.
pub async fn health_check(pool: &DbPool) -> Result<()> {
    let start = std::time::Instant::now();

    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::database(format!("Health check failed: {}", e)))?;

    let elapsed = start.elapsed();

    if elapsed > Duration::from_secs(1) {
        tracing::warn!(
            elapsed_ms = elapsed.as_millis(),
            "Database health check slow"
        );
    }

    Ok(())
}
