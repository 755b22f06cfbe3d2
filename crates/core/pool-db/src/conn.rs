//! Internal connection and connection pool implementations

use sqlx::{
    Pool, Postgres,
    migrate::{MigrateError, Migrator},
    postgres::PgPoolOptions,
};
use tracing::instrument;

use crate::config::PoolConfig;

/// Errors that can occur when connecting to the job pool database.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// Error connecting to the database.
    #[error("Error connecting to job pool db: {0}")]
    Connection(#[source] sqlx::Error),

    /// An error occurred while running migrations.
    #[error("Error running migrations: {0}")]
    MigrationFailed(#[source] MigrateError),
}

/// A connection pool to the job pool database.
#[derive(Debug, Clone)]
pub struct DbConnPool(Pool<Postgres>);

impl DbConnPool {
    /// Set up a connection pool with the given configuration.
    #[instrument(skip_all, err)]
    pub async fn connect(url: &str, config: &PoolConfig) -> Result<Self, ConnError> {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .max_lifetime(config.max_lifetime)
            .idle_timeout(config.idle_timeout)
            .connect(url)
            .await
            .map(Self)
            .map_err(ConnError::Connection)
    }

    /// Runs migrations on the database.
    ///
    /// SQLx does the right things:
    /// - Locks the DB before running migrations.
    /// - Never runs the same migration twice.
    /// - Errors on changes to old migrations.
    #[instrument(skip(self), err)]
    pub async fn run_migrations(&self) -> Result<(), ConnError> {
        static MIGRATOR: Migrator = sqlx::migrate!();
        MIGRATOR
            .run(&self.0)
            .await
            .map_err(ConnError::MigrationFailed)
    }
}

impl std::ops::Deref for DbConnPool {
    type Target = Pool<Postgres>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

