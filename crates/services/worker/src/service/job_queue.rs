//! Job queue abstraction for the worker service.
//!
//! This module provides a `JobQueue` wrapper around `PoolDb` that
//! encapsulates the queue operations the worker runtime needs. All
//! operations include automatic retry logic on connection errors.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use monitoring::logging;
use pool_db::{Error as PoolDbError, Job, JobId, PoolDb, ReclaimedJobs, WorkerIdOwned};

use crate::handler::JobOutput;

/// A job queue abstraction that wraps `PoolDb` operations.
#[derive(Clone, Debug)]
pub(crate) struct JobQueue {
    db: PoolDb,
    worker_id: WorkerIdOwned,
}

impl JobQueue {
    #[must_use]
    pub fn new(db: PoolDb, worker_id: WorkerIdOwned) -> Self {
        Self { db, worker_id }
    }

    /// Claims up to `limit` pending jobs for this worker.
    ///
    /// Includes automatic retry logic on connection errors.
    pub async fn claim_batch(
        &self,
        job_types: Option<&[String]>,
        limit: i64,
    ) -> Result<Vec<Job>, PoolDbError> {
        (|| self.db.claim_job_batch(&self.worker_id, job_types, limit))
            .retry(with_policy())
            .when(PoolDbError::is_connection_error)
            .notify(|err, dur| {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    error = %err, error_source = logging::error_source(&err),
                    "Connection error while claiming jobs. Retrying in {:.1}s",
                    dur.as_secs_f32()
                );
            })
            .await
    }

    /// Marks a claimed job as started.
    ///
    /// Includes automatic retry logic on connection errors.
    pub async fn mark_job_started(&self, job_id: JobId) -> Result<bool, PoolDbError> {
        (|| self.db.start_job(job_id))
            .retry(with_policy())
            .when(PoolDbError::is_connection_error)
            .notify(|err, dur| {
                tracing::warn!(
                    job_id = %job_id,
                    error = %err, error_source = logging::error_source(&err),
                    "Connection error while marking job as started. Retrying in {:.1}s",
                    dur.as_secs_f32()
                );
            })
            .await
    }

    /// Marks a job this worker owns as `COMPLETED`.
    ///
    /// Returns `false` if the job is no longer owned by this worker.
    /// Includes automatic retry logic on connection errors.
    pub async fn mark_job_completed(
        &self,
        job_id: JobId,
        result: &JobOutput,
    ) -> Result<bool, PoolDbError> {
        (|| {
            self.db
                .complete_job(job_id, &self.worker_id, &result.data, &result.output, 0)
        })
        .retry(with_policy())
        .when(PoolDbError::is_connection_error)
        .notify(|err, dur| {
            tracing::warn!(
                job_id = %job_id,
                error = %err, error_source = logging::error_source(&err),
                "Connection error while marking job as completed. Retrying in {:.1}s",
                dur.as_secs_f32()
            );
        })
        .await
    }

    /// Marks a job this worker owns as `FAILED`.
    ///
    /// Returns `false` if the job is no longer owned by this worker.
    /// Includes automatic retry logic on connection errors.
    pub async fn mark_job_failed(
        &self,
        job_id: JobId,
        error: &str,
        exit_code: i32,
    ) -> Result<bool, PoolDbError> {
        (|| {
            self.db
                .fail_job(job_id, &self.worker_id, error, None, exit_code)
        })
        .retry(with_policy())
        .when(PoolDbError::is_connection_error)
        .notify(|err, dur| {
            tracing::warn!(
                job_id = %job_id,
                error = %err, error_source = logging::error_source(&err),
                "Connection error while marking job as failed. Retrying in {:.1}s",
                dur.as_secs_f32()
            );
        })
        .await
    }

    /// Sweeps stale running jobs back to `PENDING` (or fails them at the
    /// attempt cutoff).
    ///
    /// Includes automatic retry logic on connection errors.
    pub async fn reclaim_stale(
        &self,
        stale_timeout: Duration,
        max_attempts: i32,
    ) -> Result<ReclaimedJobs, PoolDbError> {
        (|| self.db.reclaim_stale_jobs(stale_timeout, max_attempts))
            .retry(with_policy())
            .when(PoolDbError::is_connection_error)
            .notify(|err, dur| {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    error = %err, error_source = logging::error_source(&err),
                    "Connection error while sweeping stale jobs. Retrying in {:.1}s",
                    dur.as_secs_f32()
                );
            })
            .await
    }
}

/// A retry policy for the worker queue operations.
///
/// The retry policy is an exponential backoff with:
/// - jitter: false
/// - factor: 2
/// - `min_delay`: 1s
/// - `max_delay`: 60s
/// - `max_times`: 3
#[inline]
fn with_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
}
