//! Database connection and statement execution

pub mod executor;
pub mod schema_sync;
pub mod sqlite_helpers;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use executor::Executor;
pub use schema_sync::{SchemaSyncResult, sync_entity};

use crate::config::Config;
use crate::orm::{Entity, Repository, descriptor_of};

/// Database wrapper providing connection pool access
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn options(url: &str) -> Result<SqliteConnectOptions> {
        Ok(SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL '{url}'"))?
            .create_if_missing(true)
            .foreign_keys(true))
    }

    /// Create a new database connection pool
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(Self::options(url)?)
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;

        Ok(Self { pool })
    }

    /// Connect using the URL and pool size from `config`
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::connect(&config.database_url, config.database_max_connections).await
    }

    /// Create a new database connection pool with retry logic.
    /// Retries every `retry_interval` until successful.
    pub async fn connect_with_retry(
        url: &str,
        max_connections: u32,
        retry_interval: Duration,
    ) -> Result<Self> {
        let options = Self::options(url)?;
        loop {
            match SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .acquire_timeout(Duration::from_secs(10))
                .connect_with(options.clone())
                .await
            {
                Ok(pool) => return Ok(Self { pool }),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_secs = retry_interval.as_secs(),
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    /// A private in-memory database.
    ///
    /// Uses a single connection that is never recycled, since every SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(Self::options("sqlite::memory:")?)
            .await
            .context("Failed to open in-memory database")?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Executor running statements directly on the pool
    pub fn executor(&self) -> Executor {
        Executor::Pool(self.pool.clone())
    }

    /// Generic repository for `T`
    pub fn repository<T: Entity>(&self) -> crate::Result<Repository<T>> {
        Repository::new(self)
    }

    /// Create or extend the table for `T` (and its join tables)
    pub async fn sync<T: Entity>(&self) -> crate::Result<SchemaSyncResult> {
        let descriptor = descriptor_of::<T>()?;
        Ok(sync_entity(&self.pool, &descriptor).await?)
    }
}
