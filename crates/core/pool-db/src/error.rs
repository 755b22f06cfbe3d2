//! Error types for job pool database operations

use crate::conn::ConnError;

/// Errors that can occur when interacting with the job pool database
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error connecting to job pool db: {0}")]
    Connection(sqlx::Error),

    #[error("Error running migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Error executing database query: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Error encoding code version files: {0}")]
    FileMapEncoding(#[source] serde_json::Error),
}

impl Error {
    /// Returns `true` if the error is likely to be a transient connection issue.
    ///
    /// This is used to determine if an operation should be retried.
    ///
    /// The following errors are considered retryable:
    /// - `Error::Connection`: the initial connection to the database failed.
    /// - `sqlx::Error::Io`: an I/O error, often a network issue or a closed socket.
    /// - `sqlx::Error::Tls`: an error during the TLS handshake.
    /// - `sqlx::Error::PoolTimedOut`: the pool timed out waiting for a free connection.
    /// - `sqlx::Error::PoolClosed`: the pool was closed while an operation was pending.
    ///
    /// Other database errors, such as constraint violations, are not considered
    /// transient and will not be retried.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Returns `true` if the error is retryable.
    ///
    /// This includes connection errors plus transaction-level errors that are
    /// expected with concurrent claimants and row-level locking:
    /// - **Serialization failures** (PostgreSQL error code `40001`)
    /// - **Deadlock detected** (PostgreSQL error code `40P01`)
    ///
    /// Both are transient and safe to retry from the beginning of the
    /// transaction.
    pub fn is_retryable(&self) -> bool {
        if self.is_connection_error() {
            return true;
        }

        matches!(
            self,
            Error::Database(sqlx::Error::Database(err))
                if err.code().is_some_and(|code| matches!(
                    code.as_ref(),
                    "40001" | // serialization_failure
                    "40P01"   // deadlock_detected
                ))
        )
    }
}

impl From<ConnError> for Error {
    fn from(err: ConnError) -> Self {
        match err {
            ConnError::Connection(err) => Error::Connection(err),
            ConnError::MigrationFailed(err) => Error::Migration(err),
        }
    }
}
