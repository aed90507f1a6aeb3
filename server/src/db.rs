//! Relational store plumbing.
//!
//! Builds the SQLite connection pool shared by the repositories and the
//! database-backed session store, and applies the embedded migrations in
//! `server/migrations/`.
//!
//! In-memory databases (`sqlite::memory:`) live only as long as their
//! connection, so the pool is pinned to a single connection that is never
//! recycled.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info};

/// URL used by tests and throwaway development servers.
pub const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Errors raised by the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The driver reported a failure (connection, query, decode).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying the embedded migrations failed.
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An insert collided with a unique column.
    #[error("duplicate value for unique column '{0}'")]
    Conflict(String),
}

impl StoreError {
    /// Converts a driver error, mapping unique-constraint violations to
    /// [`StoreError::Conflict`] for the given column.
    pub(crate) fn from_insert(err: sqlx::Error, column: &str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Conflict(column.to_string())
            }
            _ => Self::Database(err),
        }
    }

    /// Returns `true` if this error is a unique-constraint collision.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Opens a connection pool for the given SQLite URL.
///
/// The database file is created if it does not exist.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the URL is malformed or the first
/// connection cannot be opened.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let in_memory = is_in_memory(database_url);
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections.max(1))
    };

    let pool = pool_options.connect_with(options).await?;

    info!(
        in_memory = in_memory,
        max_connections = pool.options().get_max_connections(),
        "Database pool ready"
    );

    Ok(pool)
}

/// Applies all pending migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    debug!("Database migrations applied");
    Ok(())
}

/// Opens a pool and brings the schema up to date.
pub async fn connect_and_migrate(
    database_url: &str,
    max_connections: u32,
) -> Result<SqlitePool, StoreError> {
    let pool = connect(database_url, max_connections).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Fresh, migrated in-memory database.
pub async fn connect_in_memory() -> Result<SqlitePool, StoreError> {
    connect_and_migrate(IN_MEMORY_URL, 1).await
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}
