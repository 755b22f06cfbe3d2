//! Job pool queue operations
//!
//! This module is the only mutation path into job state. Every transition
//! (claim, start, complete, fail, reclaim) is a single parameterized
//! statement (or a single transaction), so coordination across worker
//! processes reduces to row-level locking inside PostgreSQL. The claim path
//! relies on `FOR UPDATE SKIP LOCKED` so concurrent claimants never select
//! overlapping rows; contention degrades to smaller batches, never blocking.

use std::time::Duration;

use sqlx::{
    Executor, Postgres,
    types::{
        JsonValue,
        chrono::{DateTime, Utc},
    },
};

mod job_id;
mod job_status;

pub use self::{
    job_id::{JobId, JobIdConvError, JobIdFromStrError},
    job_status::JobStatus,
};
use crate::worker_id::{WorkerId, WorkerIdOwned};

/// A unit of work in the pool.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    /// Unique identifier for the job, assigned by the store
    pub id: JobId,

    /// Job type string used for handler dispatch
    pub job_type: String,

    /// Opaque payload, interpreted only by the handler
    pub payload: JsonValue,

    /// Current status of the job
    pub status: JobStatus,

    /// Higher-priority pending jobs are claimed first
    pub priority: i32,

    /// Maximum time the job may remain running before it is considered stale
    pub timeout_seconds: i32,

    /// Number of times this job has been claimed
    pub attempts: i32,

    /// Identity of the worker holding the job while running
    pub claimed_by: Option<WorkerIdOwned>,

    /// When the current (or last) claim was taken
    pub claimed_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Handler-defined structured result, populated on completion
    pub result_data: Option<JsonValue>,

    /// Free-text output, populated on terminal transition
    pub output: Option<String>,

    /// Error text, populated on failure
    pub error: Option<String>,

    /// Process-style exit code, populated on terminal transition
    pub exit_code: Option<i32>,

    /// Provenance of the producer that inserted the job
    pub source_machine: Option<String>,

    /// Job creation timestamp
    pub created_at: DateTime<Utc>,

    /// Job last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Parameters for enqueueing a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub payload: JsonValue,
    pub priority: i32,
    pub timeout_seconds: i32,
    pub source_machine: Option<String>,
}

impl NewJob {
    /// Creates a new job with priority 0 and the default 1 hour timeout.
    pub fn new(job_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: 0,
            timeout_seconds: 3600,
            source_machine: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: i32) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_source_machine(mut self, source_machine: impl Into<String>) -> Self {
        self.source_machine = Some(source_machine.into());
        self
    }
}

/// Outcome of a stale-jobs sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimedJobs {
    /// Jobs reset to `PENDING`, eligible for a different worker
    pub reclaimed: u64,
    /// Jobs failed permanently for exceeding the claim-attempt cutoff
    pub poisoned: u64,
}

/// Insert a new job into the queue with `PENDING` status
///
/// Producers are external to the pool core; this entry point exists for them
/// and for tests.
#[tracing::instrument(skip(exe, job), fields(job_type = %job.job_type), err)]
pub async fn insert<'c, E>(exe: E, job: &NewJob) -> Result<JobId, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO jobs (job_type, payload, status, priority, timeout_seconds, source_machine)
        VALUES ($1, $2, 'PENDING', $3, $4, $5)
        RETURNING id
    "#};
    sqlx::query_scalar(query)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(job.timeout_seconds)
        .bind(&job.source_machine)
        .fetch_one(exe)
        .await
}

/// Atomically claim up to `limit` pending jobs for a worker
///
/// Selects pending rows ordered by priority (descending) then insertion
/// order, skipping rows already locked by a concurrent claimant, and
/// transitions them to `RUNNING` with the claim tag and timestamp recorded,
/// all in one statement, so no two calls can ever return overlapping job
/// sets, regardless of process or machine.
///
/// `job_types` optionally restricts the claim to the given types; `None`
/// claims any type. If fewer than `limit` pending rows exist, returns
/// however many are available.
///
/// The claim also increments `attempts`, which feeds the poison-job cutoff
/// in [`reclaim_stale`].
#[tracing::instrument(skip(exe), err)]
pub async fn claim_batch<'c, 'a, E>(
    exe: E,
    worker_id: impl Into<WorkerId<'a>> + std::fmt::Debug,
    job_types: Option<&[String]>,
    limit: i64,
) -> Result<Vec<Job>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        WITH claimable AS (
            SELECT id
            FROM jobs
            WHERE status = 'PENDING'
              AND ($2::text[] IS NULL OR job_type = ANY($2))
            ORDER BY priority DESC, id ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
        )
        UPDATE jobs
        SET status = 'RUNNING',
            claimed_by = $1,
            claimed_at = now(),
            attempts = attempts + 1,
            updated_at = now()
        FROM claimable
        WHERE jobs.id = claimable.id
        RETURNING jobs.*
    "#};
    let mut jobs: Vec<Job> = sqlx::query_as(query)
        .bind(worker_id.into())
        .bind(job_types)
        .bind(limit)
        .fetch_all(exe)
        .await?;

    // `UPDATE ... RETURNING` has no ordering guarantee; restore claim order.
    jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    Ok(jobs)
}

/// Idempotent start marker for a claimed job
///
/// Ownership was already fixed by the claim; this only bumps `updated_at`
/// on a running row for audit purposes. Returns whether the row was touched.
#[tracing::instrument(skip(exe), err)]
pub async fn start<'c, E>(exe: E, id: JobId) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE jobs
        SET updated_at = now()
        WHERE id = $1 AND status = 'RUNNING'
    "#};
    let result = sqlx::query(query).bind(id).execute(exe).await?;
    Ok(result.rows_affected() == 1)
}

/// Transition a running job this worker owns to `COMPLETED`
///
/// Returns `true` if the row was transitioned. A `false` return means
/// ownership has already moved on (the job timed out and was reclaimed, or
/// is already terminal) and the caller's result is simply discarded. A
/// no-op rather than an error: late reports from a slow worker must never
/// clobber the new owner's row.
#[tracing::instrument(skip(exe, result_data, output), err)]
pub async fn complete<'c, 'a, E>(
    exe: E,
    id: JobId,
    worker_id: impl Into<WorkerId<'a>> + std::fmt::Debug,
    result_data: &JsonValue,
    output: &str,
    exit_code: i32,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE jobs
        SET status = 'COMPLETED',
            result_data = $3,
            output = $4,
            exit_code = $5,
            completed_at = now(),
            updated_at = now()
        WHERE id = $1 AND status = 'RUNNING' AND claimed_by = $2
    "#};
    let result = sqlx::query(query)
        .bind(id)
        .bind(worker_id.into())
        .bind(result_data)
        .bind(output)
        .bind(exit_code)
        .execute(exe)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Transition a running job this worker owns to `FAILED`
///
/// Same ownership guard and late-report semantics as [`complete`].
#[tracing::instrument(skip(exe, error, output), err)]
pub async fn fail<'c, 'a, E>(
    exe: E,
    id: JobId,
    worker_id: impl Into<WorkerId<'a>> + std::fmt::Debug,
    error: &str,
    output: Option<&str>,
    exit_code: i32,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE jobs
        SET status = 'FAILED',
            error = $3,
            output = $4,
            exit_code = $5,
            completed_at = now(),
            updated_at = now()
        WHERE id = $1 AND status = 'RUNNING' AND claimed_by = $2
    "#};
    let result = sqlx::query(query)
        .bind(id)
        .bind(worker_id.into())
        .bind(error)
        .bind(output)
        .bind(exit_code)
        .execute(exe)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Error text recorded on jobs failed by the poison cutoff.
pub const POISONED_JOB_ERROR: &str = "exceeded maximum claim attempts after stale reclaim";

/// Reclaim jobs whose worker exceeded the running timeout
///
/// A running job is stale once `now() - claimed_at` exceeds its own
/// `timeout_seconds`, or the global `stale_timeout` floor when the per-job
/// value is absent or unreasonable (<= 0). Stale jobs are reset to `PENDING`
/// with the claim cleared, making them eligible for any worker. This is the
/// sole fault-recovery mechanism: a crashed worker leaves no other trace.
///
/// Jobs that have already been claimed `max_attempts` times are failed
/// permanently instead of being re-queued, so a handler that crashes its
/// worker cannot cycle through the pool forever.
///
/// Both updates run in one transaction.
#[tracing::instrument(skip(db), err)]
pub async fn reclaim_stale(
    db: &crate::PoolDb,
    stale_timeout: Duration,
    max_attempts: i32,
) -> Result<ReclaimedJobs, crate::Error> {
    let floor_secs = stale_timeout.as_secs_f64();
    let mut tx = db.pool().begin().await.map_err(crate::Error::Database)?;

    // Poison cutoff first, so rows at the limit are not re-queued below.
    let poison = indoc::indoc! {r#"
        UPDATE jobs
        SET status = 'FAILED',
            error = $3,
            exit_code = -1,
            completed_at = now(),
            updated_at = now()
        WHERE status = 'RUNNING'
          AND claimed_at + make_interval(secs =>
                CASE WHEN timeout_seconds > 0 THEN timeout_seconds::float8 ELSE $1 END
              ) < now()
          AND attempts >= $2
    "#};
    let poisoned = sqlx::query(poison)
        .bind(floor_secs)
        .bind(max_attempts)
        .bind(POISONED_JOB_ERROR)
        .execute(&mut *tx)
        .await
        .map_err(crate::Error::Database)?
        .rows_affected();

    let requeue = indoc::indoc! {r#"
        UPDATE jobs
        SET status = 'PENDING',
            claimed_by = NULL,
            claimed_at = NULL,
            updated_at = now()
        WHERE status = 'RUNNING'
          AND claimed_at + make_interval(secs =>
                CASE WHEN timeout_seconds > 0 THEN timeout_seconds::float8 ELSE $1 END
              ) < now()
          AND attempts < $2
    "#};
    let reclaimed = sqlx::query(requeue)
        .bind(floor_secs)
        .bind(max_attempts)
        .execute(&mut *tx)
        .await
        .map_err(crate::Error::Database)?
        .rows_affected();

    tx.commit().await.map_err(crate::Error::Database)?;

    Ok(ReclaimedJobs {
        reclaimed,
        poisoned,
    })
}

/// Returns the job with the given ID
#[tracing::instrument(skip(exe), err)]
pub async fn get_by_id<'c, E>(exe: E, id: JobId) -> Result<Option<Job>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT * FROM jobs WHERE id = $1
    "#};
    sqlx::query_as(query).bind(id).fetch_optional(exe).await
}

/// List the first page of jobs, optionally filtered by status
///
/// Returns jobs ordered by ID in descending order (newest first).
#[tracing::instrument(skip(exe), err)]
pub async fn list_first_page<'c, E>(
    exe: E,
    limit: i64,
    statuses: Option<&[JobStatus]>,
) -> Result<Vec<Job>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT * FROM jobs
        WHERE ($2::text[] IS NULL OR status = ANY($2))
        ORDER BY id DESC
        LIMIT $1
    "#};
    sqlx::query_as(query)
        .bind(limit)
        .bind(statuses)
        .fetch_all(exe)
        .await
}

/// List subsequent pages of jobs using cursor-based pagination
///
/// Returns jobs with IDs less than the cursor, ordered by ID in descending
/// order. `last_job_id` is the ID of the last job from the previous page.
#[tracing::instrument(skip(exe), err)]
pub async fn list_next_page<'c, E>(
    exe: E,
    limit: i64,
    last_job_id: JobId,
    statuses: Option<&[JobStatus]>,
) -> Result<Vec<Job>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT * FROM jobs
        WHERE id < $2 AND ($3::text[] IS NULL OR status = ANY($3))
        ORDER BY id DESC
        LIMIT $1
    "#};
    sqlx::query_as(query)
        .bind(limit)
        .bind(last_job_id)
        .bind(statuses)
        .fetch_all(exe)
        .await
}

/// Count jobs in the given status
#[tracing::instrument(skip(exe), err)]
pub async fn count_by_status<'c, E>(exe: E, status: JobStatus) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT COUNT(*) FROM jobs WHERE status = $1
    "#};
    sqlx::query_scalar(query).bind(status).fetch_one(exe).await
}

/// Delete all jobs in terminal states
///
/// The core never deletes jobs on its own; this exists for operators.
/// Returns the number of jobs deleted.
#[tracing::instrument(skip(exe), err)]
pub async fn delete_terminal<'c, E>(exe: E) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        DELETE FROM jobs WHERE status = ANY($1)
    "#};
    let result = sqlx::query(query)
        .bind(JobStatus::terminal_statuses())
        .execute(exe)
        .await?;
    Ok(result.rows_affected())
}

/// In-tree integration tests
#[cfg(test)]
mod tests {
    mod it_claim;
    mod it_lifecycle;
}
