//! PostgreSQL-backed coordination store for the job pool
//!
//! The database is the only coordination mechanism between pool processes.
//! There is no message broker and no inter-worker networking; any machine
//! that can reach PostgreSQL can participate. This crate owns the schema
//! (embedded migrations), the job queue operations and the code version
//! store.
//!
//! [`PoolDb`] is the entry point. It wraps a connection pool and delegates
//! to the operation modules, which are also usable directly against any
//! [`sqlx::Executor`] for callers that manage their own transactions.

use std::{sync::Arc, time::Duration};

use backon::{ExponentialBuilder, Retryable as _};
use sqlx::{Pool, Postgres, types::JsonValue};

pub mod code_versions;
pub mod config;
pub mod conn;
pub mod error;
pub mod jobs;
pub mod worker_id;

pub use self::{
    code_versions::{CodeVersionMeta, FileMap, Published, VersionHash, version_hash_of},
    config::PoolConfig,
    conn::DbConnPool,
    error::Error,
    jobs::{Job, JobId, JobStatus, NewJob, ReclaimedJobs},
    worker_id::{WorkerId, WorkerIdOwned},
};

/// Handle to the pool coordination database.
///
/// Cheap to clone; all clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct PoolDb {
    pool: DbConnPool,
    url: Arc<str>,
}

impl PoolDb {
    /// Connects to the database and runs any pending migrations.
    pub async fn connect(url: impl Into<Arc<str>>, config: &PoolConfig) -> Result<Self, Error> {
        let url = url.into();
        let pool = DbConnPool::connect(&url, config).await?;
        pool.run_migrations().await?;
        Ok(Self { pool, url })
    }

    /// Connects like [`connect`](Self::connect), retrying connection
    /// failures with exponential backoff.
    ///
    /// Only connection-level errors are retried. A migration failure or any
    /// other database error surfaces immediately.
    pub async fn connect_with_retry(
        url: impl Into<Arc<str>>,
        config: &PoolConfig,
        max_delay: Duration,
    ) -> Result<Self, Error> {
        let url = url.into();
        let connect = || {
            let url = Arc::clone(&url);
            async move { Self::connect(url, config).await }
        };
        connect
            .retry(ExponentialBuilder::default().with_max_delay(max_delay))
            .when(Error::is_connection_error)
            .notify(|err, wait| {
                tracing::warn!(
                    error = %err,
                    wait_secs = wait.as_secs_f64(),
                    "database connection failed, retrying"
                );
            })
            .await
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// The URL this handle connected with.
    pub fn url(&self) -> &str {
        &self.url
    }

    // Job queue

    /// See [`jobs::insert`].
    pub async fn insert_job(&self, job: &NewJob) -> Result<JobId, Error> {
        jobs::insert(self.pool(), job).await.map_err(Into::into)
    }

    /// See [`jobs::claim_batch`].
    pub async fn claim_job_batch(
        &self,
        worker_id: &WorkerIdOwned,
        job_types: Option<&[String]>,
        limit: i64,
    ) -> Result<Vec<Job>, Error> {
        jobs::claim_batch(self.pool(), worker_id, job_types, limit)
            .await
            .map_err(Into::into)
    }

    /// See [`jobs::start`].
    pub async fn start_job(&self, id: JobId) -> Result<bool, Error> {
        jobs::start(self.pool(), id).await.map_err(Into::into)
    }

    /// See [`jobs::complete`].
    pub async fn complete_job(
        &self,
        id: JobId,
        worker_id: &WorkerIdOwned,
        result_data: &JsonValue,
        output: &str,
        exit_code: i32,
    ) -> Result<bool, Error> {
        jobs::complete(self.pool(), id, worker_id, result_data, output, exit_code)
            .await
            .map_err(Into::into)
    }

    /// See [`jobs::fail`].
    pub async fn fail_job(
        &self,
        id: JobId,
        worker_id: &WorkerIdOwned,
        error: &str,
        output: Option<&str>,
        exit_code: i32,
    ) -> Result<bool, Error> {
        jobs::fail(self.pool(), id, worker_id, error, output, exit_code)
            .await
            .map_err(Into::into)
    }

    /// See [`jobs::reclaim_stale`].
    pub async fn reclaim_stale_jobs(
        &self,
        stale_timeout: Duration,
        max_attempts: i32,
    ) -> Result<ReclaimedJobs, Error> {
        jobs::reclaim_stale(self, stale_timeout, max_attempts).await
    }

    /// See [`jobs::get_by_id`].
    pub async fn job_by_id(&self, id: JobId) -> Result<Option<Job>, Error> {
        jobs::get_by_id(self.pool(), id).await.map_err(Into::into)
    }

    /// See [`jobs::list_first_page`].
    pub async fn jobs_first_page(
        &self,
        limit: i64,
        statuses: Option<&[JobStatus]>,
    ) -> Result<Vec<Job>, Error> {
        jobs::list_first_page(self.pool(), limit, statuses)
            .await
            .map_err(Into::into)
    }

    /// See [`jobs::list_next_page`].
    pub async fn jobs_next_page(
        &self,
        limit: i64,
        last_job_id: JobId,
        statuses: Option<&[JobStatus]>,
    ) -> Result<Vec<Job>, Error> {
        jobs::list_next_page(self.pool(), limit, last_job_id, statuses)
            .await
            .map_err(Into::into)
    }

    /// See [`jobs::count_by_status`].
    pub async fn count_jobs_by_status(&self, status: JobStatus) -> Result<i64, Error> {
        jobs::count_by_status(self.pool(), status)
            .await
            .map_err(Into::into)
    }

    /// See [`jobs::delete_terminal`].
    pub async fn delete_terminal_jobs(&self) -> Result<u64, Error> {
        jobs::delete_terminal(self.pool()).await.map_err(Into::into)
    }

    // Code versions

    /// See [`code_versions::publish`].
    pub async fn publish_code_version(
        &self,
        hash: &VersionHash,
        files: &FileMap,
        published_by: &str,
    ) -> Result<Published, Error> {
        code_versions::publish(self, hash, files, published_by).await
    }

    /// See [`code_versions::latest`].
    pub async fn latest_code_version(&self) -> Result<Option<CodeVersionMeta>, Error> {
        code_versions::latest(self.pool()).await.map_err(Into::into)
    }

    /// See [`code_versions::get_files`].
    pub async fn code_version_files(
        &self,
        hash: &VersionHash,
    ) -> Result<Option<FileMap>, Error> {
        code_versions::get_files(self.pool(), hash).await
    }
}
