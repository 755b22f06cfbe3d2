//! Worker runtime.
//!
//! The worker's life is a single polling loop: claim a batch sized to the
//! free execution slots, run each job's handler concurrently, record
//! results, and periodically sweep stale jobs and check for published code
//! updates. A pending code update pauses claiming and is applied only once
//! the worker is idle, so running jobs are never interrupted by a restart.

use std::{sync::Arc, time::Duration};

use monitoring::logging;
use pool_db::{Job, PoolDb, VersionHash};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

mod error;
mod job_queue;
mod job_set;

pub use self::error::InitError;
use self::{
    job_queue::JobQueue,
    job_set::{JobOutcome, JobSet},
};
use crate::{
    config::Config,
    handler::HandlerRegistry,
    updater::{UpdateCheck, Updater},
    worker_id::WorkerId,
};

/// Exit code recorded when a job's type has no registered handler.
const NO_HANDLER_EXIT_CODE: i32 = 127;
/// Exit code recorded when a handler panics.
const PANIC_EXIT_CODE: i32 = 101;

/// How the worker's run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Graceful shutdown was requested and all running jobs have finished
    Shutdown,
    /// A code update was applied; the supervisor should restart the process
    /// with identical arguments
    RestartRequested,
}

/// A pool worker bound to one database and one handler registry.
pub struct Worker {
    worker_id: WorkerId,
    config: Config,
    queue: JobQueue,
    registry: Arc<HandlerRegistry>,
    updater: Option<Updater>,
    job_set: JobSet,
}

impl Worker {
    /// Create a new worker instance
    ///
    /// An empty registry is rejected up front: a worker with no handlers
    /// would claim jobs only to fail every one of them.
    pub fn new(
        worker_id: WorkerId,
        db: PoolDb,
        config: Config,
        registry: HandlerRegistry,
        updater: Option<Updater>,
    ) -> Result<Self, InitError> {
        if registry.is_empty() {
            return Err(InitError::NoHandlers);
        }
        let queue = JobQueue::new(db, worker_id.clone().into());
        Ok(Self {
            worker_id,
            config,
            queue,
            registry: Arc::new(registry),
            updater,
            job_set: JobSet::default(),
        })
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Run the worker until shutdown or a code update.
    ///
    /// Cancelling `shutdown` stops claiming and waits for the jobs already
    /// executing to finish before returning [`Outcome::Shutdown`]. Nothing
    /// that happens during job execution ends the loop early; database
    /// trouble while claiming, sweeping or recording results is logged and
    /// absorbed, with stale reclaim as the backstop.
    pub async fn run(mut self, shutdown: CancellationToken) -> Outcome {
        tracing::info!(
            worker_id = %self.worker_id,
            max_concurrent = self.config.max_concurrent,
            job_types = ?self.config.job_types,
            "worker started"
        );

        let mut poll_interval = tokio::time::interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stale_interval = tokio::time::interval(self.config.stale_sweep_interval);
        stale_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let update_enabled =
            self.updater.is_some() && self.config.update_check_interval.is_some();
        let mut update_interval = tokio::time::interval(
            self.config
                .update_check_interval
                .unwrap_or(Duration::from_secs(300)),
        );
        update_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // A drifted code version waiting for the worker to go idle.
        let mut pending_update: Option<VersionHash> = None;

        loop {
            tokio::select! { biased;
                // 1. Graceful shutdown: drain running jobs, then exit
                () = shutdown.cancelled() => {
                    tracing::info!(
                        worker_id = %self.worker_id,
                        running = self.job_set.len(),
                        "shutdown requested, draining running jobs"
                    );
                    while let Some((job_id, outcome)) = self.job_set.join_next().await {
                        self.handle_job_outcome(job_id, outcome).await;
                    }
                    return Outcome::Shutdown;
                }

                // 2. Record results of finished handler tasks; the freed
                //    slot is offered back to the queue right away
                Some((job_id, outcome)) = self.job_set.join_next(), if !self.job_set.is_empty() => {
                    self.handle_job_outcome(job_id, outcome).await;
                    poll_interval.reset_immediately();
                }

                // 3. Claim and spawn new jobs, unless an update is pending.
                //    A non-empty claim suggests a backlog, so claim again
                //    without waiting out the interval; the poll sleep only
                //    applies to the idle path.
                _ = poll_interval.tick() => {
                    if pending_update.is_none() && self.claim_and_spawn().await > 0 {
                        poll_interval.reset_immediately();
                    }
                }

                // 4. Periodically sweep stale jobs back into the queue
                _ = stale_interval.tick() => {
                    self.sweep_stale_jobs().await;
                }

                // 5. Periodically check for published code updates
                _ = update_interval.tick(), if update_enabled && pending_update.is_none() => {
                    pending_update = self.check_for_update().await;
                }
            }

            // Apply a pending update once the last running job has drained.
            if let Some(version) = pending_update.take() {
                if self.job_set.is_empty() {
                    match self.apply_update(&version).await {
                        Ok(()) => return Outcome::RestartRequested,
                        Err(()) => {} // Logged, retried on a later check
                    }
                } else {
                    pending_update = Some(version);
                }
            }
        }
    }

    /// Claims a batch sized to the free execution slots and spawns handlers.
    ///
    /// Returns the number of jobs claimed. Claim errors are logged and left
    /// for the next poll cycle; pending jobs stay claimable by other workers
    /// in the meantime.
    async fn claim_and_spawn(&mut self) -> usize {
        let capacity = self.config.max_concurrent.saturating_sub(self.job_set.len());
        if capacity == 0 {
            return 0;
        }
        let limit = (capacity as i64).min(self.config.batch_size);

        let jobs = match self
            .queue
            .claim_batch(self.config.job_types.as_deref(), limit)
            .await
        {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    error = %err, error_source = logging::error_source(&err),
                    "failed to claim jobs, will retry next poll"
                );
                return 0;
            }
        };

        let claimed = jobs.len();
        for job in jobs {
            self.spawn_job(job).await;
        }
        claimed
    }

    /// Spawns the handler for a claimed job in the job set.
    ///
    /// A job whose type has no registered handler (and no fallback) is
    /// failed immediately so it does not bounce through the stale sweep.
    #[instrument(skip(self, job), fields(worker_id = %self.worker_id, job_id = %job.id))]
    async fn spawn_job(&mut self, job: Job) {
        let Some(handler) = self.registry.resolve(&job.job_type) else {
            tracing::warn!(job_type = %job.job_type, "no handler registered, failing job");
            let error = format!("no handler registered for job type '{}'", job.job_type);
            if let Err(err) = self
                .queue
                .mark_job_failed(job.id, &error, NO_HANDLER_EXIT_CODE)
                .await
            {
                tracing::warn!(
                    error = %err, error_source = logging::error_source(&err),
                    "failed to record missing-handler failure"
                );
            }
            return;
        };

        tracing::debug!(job_type = %job.job_type, attempts = job.attempts, "starting job");
        if let Err(err) = self.queue.mark_job_started(job.id).await {
            // Audit-only transition, the claim already fixed ownership.
            tracing::warn!(
                error = %err, error_source = logging::error_source(&err),
                "failed to mark job started"
            );
        }

        self.job_set.spawn(job.id, handler.run(job));
    }

    /// Records the outcome of a finished handler task.
    ///
    /// A recording failure (after the queue layer's retries) drops the
    /// result and keeps the loop running; the job stays `RUNNING` until the
    /// stale sweep puts it back in the queue.
    async fn handle_job_outcome(&mut self, job_id: pool_db::JobId, outcome: JobOutcome) {
        let recorded = match outcome {
            JobOutcome::Finished(Ok(output)) => {
                tracing::info!(worker_id = %self.worker_id, %job_id, "job completed");
                self.queue.mark_job_completed(job_id, &output).await
            }
            JobOutcome::Finished(Err(err)) => {
                tracing::error!(
                    worker_id = %self.worker_id, %job_id,
                    error = %err, error_source = logging::error_source(&err),
                    "job failed"
                );
                self.queue
                    .mark_job_failed(job_id, &err.to_string(), err.exit_code())
                    .await
            }
            JobOutcome::Panicked => {
                tracing::error!(worker_id = %self.worker_id, %job_id, "job handler panicked");
                self.queue
                    .mark_job_failed(job_id, "job handler panicked", PANIC_EXIT_CODE)
                    .await
            }
        };

        match recorded {
            Ok(true) => {}
            Ok(false) => {
                // The job timed out and was reclaimed while we ran it; the
                // new owner's result wins and ours is discarded.
                tracing::warn!(
                    worker_id = %self.worker_id, %job_id,
                    "job no longer owned by this worker, result discarded"
                );
            }
            Err(err) => {
                tracing::warn!(
                    worker_id = %self.worker_id, %job_id,
                    error = %err, error_source = logging::error_source(&err),
                    "failed to record job result, leaving the job to the stale sweep"
                );
            }
        }
    }

    /// Sweeps stale running jobs; failures degrade to a warning.
    async fn sweep_stale_jobs(&self) {
        match self
            .queue
            .reclaim_stale(self.config.stale_timeout, self.config.max_attempts)
            .await
        {
            Ok(swept) if swept.reclaimed > 0 || swept.poisoned > 0 => {
                tracing::info!(
                    worker_id = %self.worker_id,
                    reclaimed = swept.reclaimed,
                    poisoned = swept.poisoned,
                    "swept stale jobs"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    error = %err, error_source = logging::error_source(&err),
                    "stale job sweep failed"
                );
            }
        }
    }

    /// Checks for a published code version differing from the local one.
    async fn check_for_update(&self) -> Option<VersionHash> {
        let updater = self.updater.as_ref()?;
        match updater.check().await {
            Ok(UpdateCheck::Drifted(version)) => {
                tracing::info!(
                    worker_id = %self.worker_id,
                    version = %version.short(),
                    running = self.job_set.len(),
                    "code update available, pausing claims until idle"
                );
                Some(version)
            }
            Ok(UpdateCheck::UpToDate | UpdateCheck::NoPublishedVersion) => None,
            Err(err) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    error = %err, error_source = logging::error_source(&err),
                    "code update check failed"
                );
                None
            }
        }
    }

    /// Applies a pending code update. Failures are logged, not fatal.
    async fn apply_update(&self, version: &VersionHash) -> Result<(), ()> {
        let Some(updater) = self.updater.as_ref() else {
            return Err(());
        };
        match updater.pull_and_apply(version).await {
            Ok(()) => {
                tracing::info!(
                    worker_id = %self.worker_id,
                    version = %version.short(),
                    "code update applied, requesting restart"
                );
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    error = %err, error_source = logging::error_source(&err),
                    "failed to apply code update"
                );
                Err(())
            }
        }
    }
}
