//! Set of concurrently executing handler tasks, keyed by job ID.

use std::collections::HashMap;

use pool_db::JobId;
use tokio::task::{Id, JoinSet};

use crate::handler::{HandlerError, JobOutput};

/// What a joined handler task produced.
pub(crate) enum JobOutcome {
    Finished(Result<JobOutput, HandlerError>),
    Panicked,
}

/// Tracks the handler tasks currently executing on this worker.
#[derive(Default)]
pub(crate) struct JobSet {
    tasks: JoinSet<(JobId, Result<JobOutput, HandlerError>)>,
    // Task-id to job-id mapping, needed to attribute panicked tasks.
    running: HashMap<Id, JobId>,
}

impl JobSet {
    /// Spawns a handler future for the given job.
    pub fn spawn<F>(&mut self, job_id: JobId, fut: F)
    where
        F: Future<Output = Result<JobOutput, HandlerError>> + Send + 'static,
    {
        let handle = self.tasks.spawn(async move { (job_id, fut.await) });
        self.running.insert(handle.id(), job_id);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for the next handler task to finish.
    ///
    /// Returns `None` when no tasks are running.
    pub async fn join_next(&mut self) -> Option<(JobId, JobOutcome)> {
        loop {
            match self.tasks.join_next_with_id().await? {
                Ok((task_id, (job_id, result))) => {
                    self.running.remove(&task_id);
                    return Some((job_id, JobOutcome::Finished(result)));
                }
                Err(join_err) => {
                    // Tasks are never aborted individually, a join error
                    // means the handler panicked.
                    let Some(job_id) = self.running.remove(&join_err.id()) else {
                        continue;
                    };
                    return Some((job_id, JobOutcome::Panicked));
                }
            }
        }
    }
}
