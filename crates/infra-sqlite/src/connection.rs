// SQLite Connection Pool Setup

use quern_core::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Create a SQLite connection pool with WAL mode and optimizations
///
/// # Configuration
/// - `QUERN_POOL_SIZE`: Max connections (default: 10)
/// - `QUERN_POOL_TIMEOUT`: Busy timeout in seconds (default: 5)
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let max_connections: u32 = std::env::var("QUERN_POOL_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let busy_timeout_secs: u64 = std::env::var("QUERN_POOL_TIMEOUT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    // Every fresh `sqlite::memory:` connection is a fresh database, so an
    // in-memory store must keep a single connection.
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        max_connections
    };

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| Error::Storage(format!("invalid database url: {e}")))?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(busy_timeout_secs))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

    Ok(pool)
}
