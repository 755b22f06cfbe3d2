use std::{path::PathBuf, time::Duration};

/// Configuration specific to the worker service
///
/// This configuration contains all fields needed by the worker runtime to
/// claim and execute jobs. It is created from command line arguments by the
/// poold binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Job types this worker claims; `None` claims any type
    pub job_types: Option<Vec<String>>,

    /// Maximum number of jobs executing concurrently
    pub max_concurrent: usize,

    /// Maximum number of jobs claimed per poll cycle
    pub batch_size: i64,

    /// Interval between queue poll cycles
    pub poll_interval: Duration,

    /// Interval between stale-job sweeps
    pub stale_sweep_interval: Duration,

    /// Global staleness floor for running jobs without a usable per-job timeout
    pub stale_timeout: Duration,

    /// Claim-attempt cutoff after which a repeatedly stale job is failed
    pub max_attempts: i32,

    /// Interval between code version drift checks, `None` disables updates
    pub update_check_interval: Option<Duration>,

    /// Directory containing the managed source files
    pub code_root: PathBuf,

    /// Managed source files, relative to `code_root`
    pub managed_files: Vec<String>,
}
